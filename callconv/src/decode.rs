use crate::error::bail_rewrite;
use crate::error::RewriteError;
use crate::ir::Definition;
use crate::ir::Function;
use crate::ir::Printer;
use crate::ir::Type;
use crate::parser::Parser;
use anyhow::Result;

/// Name of the function computing the new arguments from the old ones.
pub const FORWARD: &str = "forward";
/// Name of the function recovering the old arguments from the new ones.
pub const BACKWARD: &str = "backward";

/// Pair of straight-line transform functions emitted by a scheduler.
///
/// The payload is a module in the textual IR holding exactly `@forward` and
/// `@backward`:
///
/// ```text
/// module {
///   def @backward(%p0: Tensor[(4, 4), float32], %p1: Tensor[(4), float32]) -> (Tensor[(16), float32], Tensor[(4), float32]) {
///     (reshape(%p0) : Tensor[(16), float32], %p1)
///   }
///   def @forward(%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> (Tensor[(4, 4), float32], Tensor[(4), float32]) {
///     (reshape(%x) : Tensor[(4, 4), float32], %y)
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSpec {
    forward: Function,
    backward: Function,
}

impl TransformSpec {
    pub fn new(forward: Function, backward: Function) -> Self {
        Self { forward, backward }
    }
    pub fn forward(&self) -> &Function {
        &self.forward
    }
    pub fn backward(&self) -> &Function {
        &self.backward
    }
    /// Parse the payload of a rewrite annotation.
    pub fn decode(raw: &str) -> Result<TransformSpec> {
        let module = match Parser::parse(raw) {
            Ok(module) => module,
            Err(e) => bail_rewrite!(RewriteError::Decode(e.to_string())),
        };
        let mut forward = None;
        let mut backward = None;
        for (name, definition) in module.iter() {
            match (name.as_str(), definition) {
                (FORWARD, Definition::Function(f)) => forward = Some(f.clone()),
                (BACKWARD, Definition::Function(f)) => backward = Some(f.clone()),
                _ => bail_rewrite!(RewriteError::Schema(format!(
                    "unexpected definition @{name}, expected only @{FORWARD} and @{BACKWARD}"
                ))),
            }
        }
        let (forward, backward) = match (forward, backward) {
            (Some(forward), Some(backward)) => (forward, backward),
            _ => bail_rewrite!(RewriteError::Schema(format!(
                "expected functions @{FORWARD} and @{BACKWARD}"
            ))),
        };
        match forward.declared_ret_type() {
            Some(Type::Tuple(_)) => {}
            Some(other) => bail_rewrite!(RewriteError::Schema(format!(
                "@{FORWARD} must return a tuple, got {other}"
            ))),
            None => bail_rewrite!(RewriteError::Schema(format!(
                "@{FORWARD} has no return type"
            ))),
        }
        Ok(TransformSpec { forward, backward })
    }
    /// Print the payload in the format accepted by [TransformSpec::decode].
    pub fn encode(&self) -> String {
        let mut printer = Printer::new();
        let backward = printer.definition(BACKWARD, &Definition::Function(self.backward.clone()), 1);
        let forward = printer.definition(FORWARD, &Definition::Function(self.forward.clone()), 1);
        format!("module {{\n  {backward}\n  {forward}\n}}")
    }
    /// Types of the values `forward` produces.
    pub fn forward_types(&self) -> &[Type] {
        match self.forward.declared_ret_type() {
            Some(Type::Tuple(types)) => types,
            _ => &[],
        }
    }
    /// Number of fields in the body tuple of `forward`.
    ///
    /// The body and the declared return tuple have to agree, otherwise the
    /// new arguments can not be typed.
    pub fn forward_arity(&self) -> Result<usize> {
        let fields = match self.forward.body().as_tuple() {
            Some(fields) => fields,
            None => bail_rewrite!(RewriteError::MalformedTransform(format!(
                "body of @{FORWARD} is not a tuple"
            ))),
        };
        let declared = self.forward_types().len();
        if fields.len() != declared {
            bail_rewrite!(RewriteError::ArityMismatch(format!(
                "@{FORWARD} returns {} values but declares {declared}",
                fields.len()
            )));
        }
        Ok(fields.len())
    }
}

use crate::error::bail_rewrite;
use crate::error::RewriteError;
use crate::ir::Attr;
use crate::ir::Callee;
use crate::ir::Expr;
use crate::ir::ExprKind;
use crate::ir::Function;
use crate::ir::Printer;
use crate::ir::Target;
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt::Formatter;

/// A kernel compiled for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArtifact {
    name: String,
    target: Target,
    kernel: Function,
}

impl KernelArtifact {
    pub fn new(name: &str, target: Target, kernel: Function) -> Self {
        Self {
            name: name.to_string(),
            target,
            kernel,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn target(&self) -> &Target {
        &self.target
    }
    /// The scheduled kernel this artifact was produced from.
    pub fn kernel(&self) -> &Function {
        &self.kernel
    }
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.kernel.attr(name)
    }
    pub fn without_attr(&self, name: &str) -> Self {
        Self {
            kernel: self.kernel.without_attr(name),
            ..self.clone()
        }
    }
}

/// A top-level binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    /// High-level function.
    Function(Function),
    /// Kernel that was produced by an earlier lowering stage but has not been
    /// scheduled and compiled yet.
    Kernel(Function),
    /// Compiled kernel.
    Artifact(KernelArtifact),
}

/// Symbol table of a program.
///
/// All changes go through [Module::add], [Module::remove] and
/// [Module::update]. A module is a value: cloning it gives an independent
/// symbol table that shares the (immutable) definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    definitions: BTreeMap<String, Definition>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.definitions.len()
    }
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Definition)> {
        self.definitions.iter()
    }
    pub fn lookup(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }
    /// Return the high-level function bound to `name`, if any.
    pub fn function(&self, name: &str) -> Option<&Function> {
        match self.lookup(name)? {
            Definition::Function(f) => Some(f),
            _ => None,
        }
    }
    /// Bind `name`; the symbol must not be defined yet.
    pub fn add(&mut self, name: &str, definition: Definition) -> Result<()> {
        if self.definitions.contains_key(name) {
            bail_rewrite!(RewriteError::DuplicateSymbol {
                name: name.to_string(),
                reason: "symbol is already defined".to_string(),
            });
        }
        self.definitions.insert(name.to_string(), definition);
        Ok(())
    }
    /// Replace the definition of an existing symbol.
    pub fn update(&mut self, name: &str, definition: Definition) -> Result<()> {
        match self.definitions.get_mut(name) {
            Some(slot) => {
                *slot = definition;
                Ok(())
            }
            None => bail_rewrite!(RewriteError::DanglingSymbol(name.to_string())),
        }
    }
    /// Unbind `name`.
    ///
    /// `in_flight` is the number of call sites the caller is rebinding right
    /// now. Any reference beyond those would dangle after removal, so the
    /// removal is refused.
    pub fn remove(&mut self, name: &str, in_flight: usize) -> Result<Definition> {
        if !self.definitions.contains_key(name) {
            bail_rewrite!(RewriteError::DanglingSymbol(name.to_string()));
        }
        let refs = self.references(name);
        if refs > in_flight {
            bail_rewrite!(RewriteError::DuplicateSymbol {
                name: name.to_string(),
                reason: format!("{refs} call sites reference it, only {in_flight} are rebound"),
            });
        }
        match self.definitions.remove(name) {
            Some(definition) => Ok(definition),
            None => bail_rewrite!(RewriteError::DanglingSymbol(name.to_string())),
        }
    }
    /// Number of call sites in the module's functions that call `name`.
    pub fn references(&self, name: &str) -> usize {
        self.definitions
            .values()
            .map(|definition| match definition {
                Definition::Function(f) => count_references(f.body(), name),
                Definition::Kernel(_) | Definition::Artifact(_) => 0,
            })
            .sum()
    }
    /// Names called from the module's functions that have no definition.
    pub fn dangling(&self) -> Vec<String> {
        let mut out = vec![];
        for definition in self.definitions.values() {
            if let Definition::Function(f) = definition {
                collect_callees(f.body(), &mut out);
            }
        }
        out.retain(|name| !self.definitions.contains_key(name));
        out.sort();
        out.dedup();
        out
    }
}

fn count_references(expr: &Expr, name: &str) -> usize {
    match expr.kind() {
        ExprKind::Var(_) | ExprKind::Constant(_) => 0,
        ExprKind::Tuple(fields) => fields.iter().map(|e| count_references(e, name)).sum(),
        ExprKind::Function(f) => count_references(f.body(), name),
        ExprKind::Call(call) => {
            let own = match call.callee() {
                Callee::Global(gv) | Callee::Lowered(gv) if gv.name() == name => 1,
                Callee::Function(f) => count_references(f.body(), name),
                _ => 0,
            };
            own + call
                .args()
                .iter()
                .map(|e| count_references(e, name))
                .sum::<usize>()
        }
    }
}

fn collect_callees(expr: &Expr, out: &mut Vec<String>) {
    match expr.kind() {
        ExprKind::Var(_) | ExprKind::Constant(_) => {}
        ExprKind::Tuple(fields) => fields.iter().for_each(|e| collect_callees(e, out)),
        ExprKind::Function(f) => collect_callees(f.body(), out),
        ExprKind::Call(call) => {
            match call.callee() {
                Callee::Global(gv) | Callee::Lowered(gv) => out.push(gv.name().to_string()),
                Callee::Function(f) => collect_callees(f.body(), out),
                Callee::Op(_) => {}
            }
            call.args().iter().for_each(|e| collect_callees(e, out));
        }
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Printer::new().module(self))
    }
}

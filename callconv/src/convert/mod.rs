//! Conversion logic for the argument rewrite.
//!
//! [ArgumentRewriter] walks the entry function of a module and hands every
//! candidate call to a [RewriteStrategy]. The strategy is chosen when the
//! pass is constructed: [Legacy] drives scheduling through the schedule
//! cache, [Deferred] consumes scheduling results attached to lowered calls.

use crate::error::bail_rewrite;
use crate::error::RewriteError;
use crate::ir::spaces;
use crate::ir::Call;
use crate::ir::Callee;
use crate::ir::Definition;
use crate::ir::Expr;
use crate::ir::ExprKind;
use crate::ir::Function;
use crate::ir::Module;
use crate::ir::Target;
use crate::ir::Type;
use anyhow::Result;
use tracing::debug;

mod arguments;
mod deferred;
mod legacy;

pub use deferred::Deferred;
pub use legacy::Legacy;

/// Whether a rewrite changed the IR.
///
/// If a rewrite changes the IR, it returns the changed value.
#[derive(Debug, Clone, PartialEq)]
pub enum RewriteResult<T> {
    Changed(T),
    Unchanged,
}

impl<T> RewriteResult<T> {
    pub fn is_changed(&self) -> Option<&T> {
        match self {
            RewriteResult::Changed(value) => Some(value),
            RewriteResult::Unchanged => None,
        }
    }
}

/// A pass is a transformation that can be applied to a module.
pub trait Pass {
    const NAME: &'static str;
    /// Apply the pass.
    ///
    /// The input is never modified; a changed module is returned as a new
    /// value, so an error leaves the caller with the module it had.
    fn convert(&self, module: &Module) -> Result<RewriteResult<Module>>;
}

/// How a single call is rewritten.
pub trait RewriteStrategy {
    /// The name of the strategy; is used for logging.
    const NAME: &'static str;
    /// Returns true if the strategy handles the given call.
    ///
    /// This method is not allowed to mutate the IR.
    fn is_candidate(&self, call: &Call) -> bool;
    /// Rewrites a candidate call whose arguments were already visited.
    ///
    /// `checked_type` is the result type of the call. The module is the
    /// staged copy owned by the pass; changes to its bindings become visible
    /// only when the whole pass succeeds.
    fn rewrite_call(
        &self,
        module: &mut Module,
        call: &Call,
        checked_type: Option<&Type>,
        target: &Target,
    ) -> Result<RewriteResult<Expr>>;
    /// Publish state recorded by [RewriteStrategy::rewrite_call] once the
    /// whole pass succeeded.
    fn commit(&self) -> Result<()> {
        Ok(())
    }
    /// Drop state recorded by a pass that failed.
    fn abort(&self) {}
}

/// Post-schedule argument rewrite.
///
/// Visits the entry function in pre-order, arguments before the call that
/// consumes them. Callees are not descended into: a nested function is a
/// fusion group that the strategy treats as a whole.
pub struct ArgumentRewriter<S: RewriteStrategy> {
    strategy: S,
    entry: String,
    default_target: Option<Target>,
}

impl<S: RewriteStrategy> ArgumentRewriter<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            entry: "main".to_string(),
            default_target: None,
        }
    }
    /// Name of the function to rewrite (`main` by default).
    pub fn with_entry(mut self, entry: &str) -> Self {
        self.entry = entry.to_string();
        self
    }
    /// Target for calls that carry no placement of their own.
    pub fn with_default_target(mut self, target: Option<Target>) -> Self {
        self.default_target = target;
        self
    }
    fn target(&self, call: &Call) -> Result<Target> {
        match call.target().or(self.default_target.as_ref()) {
            Some(target) => Ok(target.clone()),
            None => {
                let text = Expr::call(call.clone()).to_string();
                bail_rewrite!(RewriteError::MissingTarget(text))
            }
        }
    }
    /// Rewrite a copy of `module`; nothing outside the copy is touched.
    fn stage(&self, module: &Module, entry: &Function) -> Result<Module> {
        let mut staged = module.clone();
        let body = self.visit(&mut staged, entry.body(), 0)?;
        if let RewriteResult::Changed(body) = body {
            let entry = Definition::Function(entry.with_body(body));
            staged.update(&self.entry, entry)?;
        }
        Ok(staged)
    }
    fn visit_all(&self, module: &mut Module, exprs: &[Expr], indent: i32) -> Result<Option<Vec<Expr>>> {
        let mut changed = false;
        let mut out = Vec::with_capacity(exprs.len());
        for expr in exprs {
            match self.visit(module, expr, indent)? {
                RewriteResult::Changed(new) => {
                    changed = true;
                    out.push(new);
                }
                RewriteResult::Unchanged => out.push(expr.clone()),
            }
        }
        Ok(if changed { Some(out) } else { None })
    }
    fn visit(&self, module: &mut Module, expr: &Expr, indent: i32) -> Result<RewriteResult<Expr>> {
        let typ = expr.checked_type().cloned();
        match expr.kind() {
            ExprKind::Var(_) | ExprKind::Constant(_) => Ok(RewriteResult::Unchanged),
            ExprKind::Tuple(fields) => match self.visit_all(module, fields, indent)? {
                Some(fields) => Ok(RewriteResult::Changed(Expr::new(ExprKind::Tuple(fields), typ))),
                None => Ok(RewriteResult::Unchanged),
            },
            ExprKind::Function(f) => match self.visit(module, f.body(), indent + 1)? {
                RewriteResult::Changed(body) => {
                    let f = f.with_body(body);
                    Ok(RewriteResult::Changed(Expr::new(ExprKind::Function(f), typ)))
                }
                RewriteResult::Unchanged => Ok(RewriteResult::Unchanged),
            },
            ExprKind::Call(call) => {
                let args = self.visit_all(module, call.args(), indent + 1)?;
                let args_changed = args.is_some();
                let call = match args {
                    Some(args) => call.with_args(args),
                    None => call.clone(),
                };
                if self.strategy.is_candidate(&call) {
                    debug!(
                        "{}Matching {} with {}",
                        spaces(indent),
                        callee_name(&call),
                        S::NAME
                    );
                    let target = self.target(&call)?;
                    let result = self
                        .strategy
                        .rewrite_call(module, &call, typ.as_ref(), &target)?;
                    if let RewriteResult::Changed(new) = result {
                        debug!("{}----> Changed", spaces(indent));
                        return Ok(RewriteResult::Changed(new));
                    }
                }
                if args_changed {
                    return Ok(RewriteResult::Changed(Expr::new(ExprKind::Call(call), typ)));
                }
                Ok(RewriteResult::Unchanged)
            }
        }
    }
}

impl<S: RewriteStrategy> Pass for ArgumentRewriter<S> {
    const NAME: &'static str = "post-schedule-argument-rewrite";
    fn convert(&self, module: &Module) -> Result<RewriteResult<Module>> {
        let entry = match module.function(&self.entry) {
            Some(entry) => entry.clone(),
            None => bail_rewrite!(RewriteError::MissingEntry(self.entry.clone())),
        };
        let staged = match self.stage(module, &entry) {
            Ok(staged) => staged,
            Err(e) => {
                self.strategy.abort();
                return Err(e);
            }
        };
        self.strategy.commit()?;
        if staged == *module {
            Ok(RewriteResult::Unchanged)
        } else {
            Ok(RewriteResult::Changed(staged))
        }
    }
}

/// Short description of a callee for logging.
pub(crate) fn callee_name(call: &Call) -> String {
    match call.callee() {
        Callee::Op(name) => name.clone(),
        Callee::Global(gv) | Callee::Lowered(gv) => format!("@{}", gv.name()),
        Callee::Function(_) => "fn".to_string(),
    }
}

//! Expression substitution engine.
//!
//! A transform function is a template: its body is a tuple of output
//! expressions built from its parameters. [substitute] specializes the
//! template for concrete arguments by replacing parameter occurrences, keyed
//! by variable identity. The template itself is never evaluated.

use crate::error::bail_rewrite;
use crate::error::RewriteError;
use crate::ir::Call;
use crate::ir::Callee;
use crate::ir::Expr;
use crate::ir::ExprKind;
use crate::ir::Function;
use crate::ir::Var;
use anyhow::Result;
use std::collections::HashMap;

/// Bind the first `n_before` parameters of `transform` to `args` and return
/// the first `n_after` fields of its body with the bound parameters replaced.
///
/// Parameters beyond `n_before` stay as they are. Rebuilt nodes carry no
/// checked type; subtrees without bound parameters are shared with the
/// template unchanged.
pub fn substitute(
    transform: &Function,
    args: &[Expr],
    n_before: usize,
    n_after: usize,
) -> Result<Vec<Expr>> {
    if transform.params().len() < n_before {
        bail_rewrite!(RewriteError::ArityMismatch(format!(
            "transform takes {} parameters, can not bind {n_before}",
            transform.params().len()
        )));
    }
    if args.len() != n_before {
        bail_rewrite!(RewriteError::ArityMismatch(format!(
            "expected {n_before} arguments, got {}",
            args.len()
        )));
    }
    let fields = match transform.body().as_tuple() {
        Some(fields) => fields,
        None => bail_rewrite!(RewriteError::MalformedTransform(format!(
            "body is not a tuple: {}",
            transform.body()
        ))),
    };
    if fields.len() < n_after {
        bail_rewrite!(RewriteError::MalformedTransform(format!(
            "body has {} fields, {n_after} requested",
            fields.len()
        )));
    }
    let bindings = transform
        .params()
        .iter()
        .take(n_before)
        .cloned()
        .zip(args.iter().cloned())
        .collect::<HashMap<Var, Expr>>();
    let substituter = Substituter { bindings };
    Ok(fields
        .iter()
        .take(n_after)
        .map(|field| substituter.rewrite(field))
        .collect())
}

struct Substituter {
    bindings: HashMap<Var, Expr>,
}

impl Substituter {
    fn rewrite(&self, expr: &Expr) -> Expr {
        match self.visit(expr) {
            Some(new) => new,
            None => expr.clone(),
        }
    }
    /// Rewritten copy of `expr`, or `None` when nothing below it is bound.
    fn visit(&self, expr: &Expr) -> Option<Expr> {
        match expr.kind() {
            ExprKind::Var(var) => self.bindings.get(var).cloned(),
            ExprKind::Constant(_) => None,
            ExprKind::Tuple(fields) => {
                let fields = self.visit_all(fields)?;
                Some(Expr::new(ExprKind::Tuple(fields), None))
            }
            ExprKind::Function(function) => {
                let function = self.visit_function(function)?;
                Some(Expr::new(ExprKind::Function(function), None))
            }
            ExprKind::Call(call) => {
                let callee = match call.callee() {
                    Callee::Function(function) => self.visit_function(function).map(Callee::Function),
                    _ => None,
                };
                let args = self.visit_all(call.args());
                if callee.is_none() && args.is_none() {
                    return None;
                }
                let mut new: Call = call.clone();
                if let Some(callee) = callee {
                    new = new.with_callee(callee);
                }
                if let Some(args) = args {
                    new = new.with_args(args);
                }
                Some(Expr::call(new))
            }
        }
    }
    fn visit_all(&self, exprs: &[Expr]) -> Option<Vec<Expr>> {
        let visited = exprs.iter().map(|e| self.visit(e)).collect::<Vec<_>>();
        if visited.iter().all(|e| e.is_none()) {
            return None;
        }
        Some(
            visited
                .into_iter()
                .zip(exprs)
                .map(|(new, old)| new.unwrap_or_else(|| old.clone()))
                .collect(),
        )
    }
    fn visit_function(&self, function: &Function) -> Option<Function> {
        self.visit(function.body()).map(|body| function.with_body(body))
    }
}

use crate::decode::TransformSpec;
use crate::error::bail_rewrite;
use crate::error::RewriteError;
use crate::ir::Expr;
use anyhow::Result;
use std::collections::HashMap;

/// New call-site arguments: the first `new_arg_count` outputs of `forward`
/// applied to `args`, each typed by the return tuple of `forward`.
pub(crate) fn rewrite_arguments(
    spec: &TransformSpec,
    args: &[Expr],
    new_arg_count: usize,
) -> Result<Vec<Expr>> {
    spec.forward_arity()?;
    let new_args = crate::subst::substitute(spec.forward(), args, args.len(), new_arg_count)?;
    let new_args = new_args
        .iter()
        .zip(spec.forward_types())
        .map(|(arg, typ)| arg.with_type(typ.clone()))
        .collect::<Vec<Expr>>();
    check_leaves(args, &new_args)?;
    Ok(new_args)
}

/// Only leaves may be re-derived by a transform.
///
/// Every original argument that is not a variable or constant has to reach
/// the new arguments as is, and not more often than it was passed before.
pub(crate) fn check_leaves(original: &[Expr], new: &[Expr]) -> Result<()> {
    let mut before: HashMap<&Expr, usize> = HashMap::new();
    for arg in original.iter().filter(|arg| !arg.is_leaf()) {
        *before.entry(arg).or_default() += 1;
    }
    let mut after: HashMap<&Expr, usize> = HashMap::new();
    for arg in new {
        *after.entry(arg).or_default() += 1;
    }
    for arg in original.iter().filter(|arg| !arg.is_leaf()) {
        let passed = before.get(arg).copied().unwrap_or(0);
        let reached = after.get(arg).copied().unwrap_or(0);
        if reached == 0 {
            bail_rewrite!(RewriteError::UnsupportedRewrite {
                arg: arg.to_string(),
                reason: "is dropped by the transform".to_string(),
            });
        }
        if passed < reached {
            bail_rewrite!(RewriteError::UnsupportedRewrite {
                arg: arg.to_string(),
                reason: format!("is passed {passed} times but duplicated {reached} times"),
            });
        }
    }
    Ok(())
}

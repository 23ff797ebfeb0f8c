use crate::convert::arguments::rewrite_arguments;
use crate::convert::RewriteResult;
use crate::convert::RewriteStrategy;
use crate::decode::TransformSpec;
use crate::error::bail_rewrite;
use crate::error::RewriteError;
use crate::ir::Attr;
use crate::ir::Attributes;
use crate::ir::Call;
use crate::ir::Callee;
use crate::ir::Definition;
use crate::ir::Expr;
use crate::ir::ExprKind;
use crate::ir::FuncType;
use crate::ir::Function;
use crate::ir::Module;
use crate::ir::Target;
use crate::ir::Type;
use crate::ir::ANCHOR_ATTRS;
use crate::ir::ANCHOR_OP;
use crate::ir::ARGUMENT_REWRITE;
use crate::ir::RELAY_TO_KERNEL;
use crate::schedule::Backend;
use crate::schedule::HookRegistry;
use crate::schedule::MissingHookPolicy;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Rewrite of lowered calls whose kernel was produced by an earlier lowering
/// stage.
///
/// The kernel bound to the callee is scheduled through the hook registered
/// for the call's anchor operator, its arguments are reconciled when the
/// scheduler left a rewrite annotation, and it is lowered under the pass
/// context of the call's target. The lowered artifact replaces the kernel
/// under the same name.
pub struct Deferred {
    hooks: HookRegistry,
    backend: Arc<dyn Backend>,
    missing_hook: MissingHookPolicy,
}

impl Deferred {
    pub fn new(hooks: HookRegistry, backend: Arc<dyn Backend>) -> Self {
        Self {
            hooks,
            backend,
            missing_hook: MissingHookPolicy::default(),
        }
    }
    pub fn with_missing_hook(mut self, policy: MissingHookPolicy) -> Self {
        self.missing_hook = policy;
        self
    }
    fn schedule(&self, call: &Call, kernel: &Function, target: &Target) -> Result<Function> {
        let anchor = match call.attrs().str(ANCHOR_OP) {
            Some(anchor) => anchor,
            None => return Ok(kernel.clone()),
        };
        let anchor_attrs = call
            .attrs()
            .dict(ANCHOR_ATTRS)
            .cloned()
            .unwrap_or_else(Attributes::new);
        match self.hooks.lookup(anchor, target) {
            Some(hook) => hook.schedule(&anchor_attrs, kernel, target),
            None => match self.missing_hook {
                MissingHookPolicy::Warn => {
                    warn!(
                        "No schedule hook registered for {anchor} under target {}",
                        target.kind()
                    );
                    Ok(kernel.clone())
                }
                MissingHookPolicy::Fail => Err(MissingHookPolicy::error(anchor, target).into()),
            },
        }
    }
}

impl RewriteStrategy for Deferred {
    const NAME: &'static str = "deferred";
    fn is_candidate(&self, call: &Call) -> bool {
        matches!(call.callee(), Callee::Lowered(_)) && call.attrs().contains(RELAY_TO_KERNEL)
    }
    fn rewrite_call(
        &self,
        module: &mut Module,
        call: &Call,
        checked_type: Option<&Type>,
        target: &Target,
    ) -> Result<RewriteResult<Expr>> {
        let gv = match call.callee() {
            Callee::Lowered(gv) => gv,
            _ => return Ok(RewriteResult::Unchanged),
        };
        let name = gv.name().to_string();
        let kernel = match module.lookup(&name) {
            Some(Definition::Kernel(kernel)) => kernel.clone(),
            Some(Definition::Artifact(_)) => {
                debug!("@{name} is already lowered, skipping");
                return Ok(RewriteResult::Unchanged);
            }
            Some(Definition::Function(_)) => bail_rewrite!(RewriteError::MalformedTransform(
                format!("lowered call refers to the high-level function @{name}")
            )),
            None => bail_rewrite!(RewriteError::DanglingSymbol(name)),
        };
        let call_type = match checked_type {
            Some(typ) => typ.clone(),
            None => bail_rewrite!(RewriteError::Untyped(Expr::call(call.clone()).to_string())),
        };
        let scheduled = self.schedule(call, &kernel, target)?;

        let (new_gv, args, scheduled) = match scheduled.attr(ARGUMENT_REWRITE) {
            Some(Attr::Str(raw)) => {
                let spec = TransformSpec::decode(raw)?;
                let outputs = call_type.flatten().len();
                let new_arg_count = spec.forward_arity()?;
                debug!("@{name} writes {outputs} outputs, takes {new_arg_count} arguments");
                let args = rewrite_arguments(&spec, call.args(), new_arg_count)?;
                let mut arg_types = vec![];
                for arg in &args {
                    match arg.checked_type() {
                        Some(typ) => arg_types.push(typ.clone()),
                        None => bail_rewrite!(RewriteError::Untyped(arg.to_string())),
                    }
                }
                let func_type = FuncType::new(arg_types, call_type.clone());
                let new_gv = gv.with_type(Type::Func(func_type));
                info!(
                    "Rewrote arguments of @{name}: {} -> {}",
                    call.args().len(),
                    args.len()
                );
                (new_gv, args, scheduled.without_attr(ARGUMENT_REWRITE))
            }
            Some(other) => bail_rewrite!(RewriteError::MalformedTransform(format!(
                "annotation on @{name} must be a string, got {other}"
            ))),
            None => (gv.clone(), call.args().to_vec(), scheduled),
        };

        let ctx = self.backend.pass_context(target);
        let lowered = self.backend.lower(&scheduled, &name, &ctx)?;
        module.remove(&name, 1)?;
        module.add(&name, Definition::Artifact(lowered))?;

        let new_call = call.with_callee(Callee::Lowered(new_gv)).with_args(args);
        Ok(RewriteResult::Changed(Expr::new(
            ExprKind::Call(new_call),
            Some(call_type),
        )))
    }
}

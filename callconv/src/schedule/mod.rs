//! Interfaces to the collaborators of the rewrite: schedulers, the kernel
//! compiler used by the schedule cache and the lowering backend.
//!
//! The rewrite never schedules or lowers anything itself. Downstream projects
//! plug their implementations in through these traits; [replay] contains the
//! implementations used by the command-line driver.

use crate::error::RewriteError;
use crate::ir::Attributes;
use crate::ir::Function;
use crate::ir::KernelArtifact;
use crate::ir::Target;
use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

pub mod replay;

pub use crate::cache::CompiledKernel;
pub use crate::cache::Placeholder;

/// Optimizes a kernel for a target.
pub trait ScheduleHook: Send + Sync {
    fn schedule(&self, anchor_attrs: &Attributes, kernel: &Function, target: &Target) -> Result<Function>;
}

impl<F> ScheduleHook for F
where
    F: Fn(&Attributes, &Function, &Target) -> Result<Function> + Send + Sync,
{
    fn schedule(&self, anchor_attrs: &Attributes, kernel: &Function, target: &Target) -> Result<Function> {
        self(anchor_attrs, kernel, target)
    }
}

/// Schedule hooks by anchor operator.
///
/// A hook registered for a target kind takes precedence over the generic hook
/// of the same anchor.
#[derive(Clone, Default)]
pub struct HookRegistry {
    generic: HashMap<String, Arc<dyn ScheduleHook>>,
    by_kind: HashMap<(String, String), Arc<dyn ScheduleHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn register(&mut self, anchor: &str, hook: Arc<dyn ScheduleHook>) {
        self.generic.insert(anchor.to_string(), hook);
    }
    pub fn register_for_kind(&mut self, anchor: &str, kind: &str, hook: Arc<dyn ScheduleHook>) {
        self.by_kind
            .insert((anchor.to_string(), kind.to_string()), hook);
    }
    pub fn lookup(&self, anchor: &str, target: &Target) -> Option<Arc<dyn ScheduleHook>> {
        let key = (anchor.to_string(), target.kind().to_string());
        self.by_kind
            .get(&key)
            .or_else(|| self.generic.get(anchor))
            .cloned()
    }
    pub fn is_empty(&self) -> bool {
        self.generic.is_empty() && self.by_kind.is_empty()
    }
}

/// What to do when no schedule hook exists for an anchor operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingHookPolicy {
    /// Log a warning and continue with the unscheduled kernel.
    #[default]
    Warn,
    /// Abort with [RewriteError::MissingScheduleHook].
    Fail,
}

impl FromStr for MissingHookPolicy {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "warn" => Ok(MissingHookPolicy::Warn),
            "fail" => Ok(MissingHookPolicy::Fail),
            _ => Err(anyhow::anyhow!("Unknown missing hook policy: {s}")),
        }
    }
}

impl Display for MissingHookPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingHookPolicy::Warn => write!(f, "warn"),
            MissingHookPolicy::Fail => write!(f, "fail"),
        }
    }
}

impl MissingHookPolicy {
    pub fn error(anchor: &str, target: &Target) -> RewriteError {
        RewriteError::MissingScheduleHook {
            anchor: anchor.to_string(),
            target: target.kind().to_string(),
        }
    }
}

/// Target-specific configuration that lowering runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassContext {
    target: Target,
    config: Attributes,
}

impl PassContext {
    pub fn new(target: Target, config: Attributes) -> Self {
        Self { target, config }
    }
    pub fn target(&self) -> &Target {
        &self.target
    }
    pub fn config(&self) -> &Attributes {
        &self.config
    }
}

/// Lowering backend for deferred mode.
pub trait Backend: Send + Sync {
    /// Context for lowering kernels placed on `target`.
    fn pass_context(&self, target: &Target) -> PassContext;
    fn lower(&self, kernel: &Function, name: &str, ctx: &PassContext) -> Result<KernelArtifact>;
}

/// Schedules and lowers a whole function in legacy mode.
///
/// Invoked by the schedule cache at most once per distinct function and
/// target.
pub trait KernelCompiler: Send + Sync {
    fn compile(&self, function: &Function, target: &Target) -> Result<CompiledKernel>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Attr;
    use crate::ir::Expr;
    use crate::ir::Var;

    fn tagging(tag: &'static str) -> Arc<dyn ScheduleHook> {
        Arc::new(move |_: &Attributes, kernel: &Function, _: &Target| {
            Ok(kernel.with_attr("scheduled_by", Attr::Str(tag.to_string())))
        })
    }

    #[test]
    fn test_lookup_prefers_target_kind() {
        let mut registry = HookRegistry::new();
        assert!(registry.is_empty());
        registry.register("nn.conv2d", tagging("generic"));
        registry.register_for_kind("nn.conv2d", "edgex", tagging("edgex"));

        let x = Var::new("x", None);
        let kernel = Function::new(vec![x.clone()], Expr::var(&x), None);
        let attrs = Attributes::new();
        let schedule = |target: &str| {
            let target = Target::new(target);
            let hook = registry.lookup("nn.conv2d", &target).unwrap();
            let scheduled = hook.schedule(&attrs, &kernel, &target).unwrap();
            scheduled.attrs().str("scheduled_by").unwrap().to_string()
        };
        assert_eq!(schedule("edgex"), "edgex");
        assert_eq!(schedule("llvm"), "generic");
        assert!(registry.lookup("add", &Target::new("edgex")).is_none());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("warn".parse::<MissingHookPolicy>().unwrap(), MissingHookPolicy::Warn);
        assert_eq!("fail".parse::<MissingHookPolicy>().unwrap(), MissingHookPolicy::Fail);
        assert!("ignore".parse::<MissingHookPolicy>().is_err());
        assert_eq!(MissingHookPolicy::default().to_string(), "warn");
    }
}

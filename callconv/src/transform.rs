use crate::cache::ScheduleCache;
use crate::convert::ArgumentRewriter;
use crate::convert::Deferred;
use crate::convert::Legacy;
use crate::convert::Pass;
use crate::convert::RewriteResult;
use crate::ir::Module;
use crate::ir::Target;
use crate::schedule::replay::PassthroughBackend;
use crate::schedule::replay::ReplayCompiler;
use crate::schedule::Backend;
use crate::schedule::HookRegistry;
use crate::schedule::KernelCompiler;
use crate::schedule::MissingHookPolicy;
use anyhow::Result;
use clap::Arg;
use clap::ArgMatches;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;

/// Which strategy the argument rewrite runs with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// The pass schedules nested functions through the schedule cache.
    #[default]
    Legacy,
    /// Scheduling results are attached to lowered calls.
    Deferred,
}

impl FromStr for Mode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "legacy" => Ok(Mode::Legacy),
            "deferred" => Ok(Mode::Deferred),
            _ => Err(anyhow::anyhow!("Unknown mode: {s}")),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Legacy => write!(f, "legacy"),
            Mode::Deferred => write!(f, "deferred"),
        }
    }
}

/// Configuration of a [transform] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    mode: Mode,
    entry: String,
    default_target: Option<Target>,
    missing_hook: MissingHookPolicy,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            entry: "main".to_string(),
            default_target: None,
            missing_hook: MissingHookPolicy::default(),
        }
    }
}

impl TransformOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
    pub fn with_entry(mut self, entry: &str) -> Self {
        self.entry = entry.to_string();
        self
    }
    pub fn with_default_target(mut self, target: Target) -> Self {
        self.default_target = Some(target);
        self
    }
    pub fn with_missing_hook(mut self, policy: MissingHookPolicy) -> Self {
        self.missing_hook = policy;
        self
    }
    pub fn mode(&self) -> Mode {
        self.mode
    }
    pub fn entry(&self) -> &str {
        &self.entry
    }
    pub fn default_target(&self) -> Option<&Target> {
        self.default_target.as_ref()
    }
    pub fn missing_hook(&self) -> MissingHookPolicy {
        self.missing_hook
    }
    /// Read the options defined by [default_arguments].
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut options = TransformOptions::new();
        if let Some(mode) = matches.get_one::<String>("mode") {
            options = options.with_mode(mode.parse()?);
        }
        if let Some(entry) = matches.get_one::<String>("entry") {
            options = options.with_entry(entry);
        }
        if let Some(target) = matches.get_one::<String>("target") {
            options = options.with_default_target(target.parse()?);
        }
        if let Some(policy) = matches.get_one::<String>("on-missing-hook") {
            options = options.with_missing_hook(policy.parse()?);
        }
        Ok(options)
    }
}

/// Initialize logging with the given level.
pub fn init_subscriber(level: Level) -> Result<(), SetGlobalDefaultError> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_test_writer()
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}

/// Default arguments that are available in callconv.
///
/// `--debug` is not included to allow downstream projects to handle the
/// logging differently.
pub fn default_arguments() -> Vec<Arg> {
    vec![
        Arg::new("mode")
            .long("mode")
            .help("Rewrite strategy")
            .value_parser(["legacy", "deferred"])
            .default_value("legacy"),
        Arg::new("target")
            .long("target")
            .help("Target for calls without a placement (e.g. `llvm -mcpu=skylake`)"),
        Arg::new("entry")
            .long("entry")
            .help("Function to rewrite")
            .default_value("main"),
        Arg::new("on-missing-hook")
            .long("on-missing-hook")
            .help("What to do when no schedule hook exists for an anchor operator")
            .value_parser(["warn", "fail"])
            .default_value("warn"),
    ]
}

/// External collaborators of the rewrite.
///
/// The default replays scheduling decisions already recorded in the module
/// and uses the process-wide schedule cache.
#[derive(Clone)]
pub struct Collaborators {
    pub cache: Arc<ScheduleCache>,
    pub compiler: Arc<dyn KernelCompiler>,
    pub hooks: HookRegistry,
    pub backend: Arc<dyn Backend>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            cache: ScheduleCache::global(),
            compiler: Arc::new(ReplayCompiler),
            hooks: HookRegistry::new(),
            backend: Arc::new(PassthroughBackend),
        }
    }
}

/// Run the post-schedule argument rewrite with the given collaborators.
pub fn transform_with(
    module: &Module,
    options: &TransformOptions,
    collaborators: &Collaborators,
) -> Result<RewriteResult<Module>> {
    info!("Running argument rewrite in {} mode", options.mode());
    let default_target = options.default_target().cloned();
    match options.mode() {
        Mode::Legacy => {
            let strategy = Legacy::new(
                collaborators.cache.clone(),
                collaborators.compiler.clone(),
            );
            ArgumentRewriter::new(strategy)
                .with_entry(options.entry())
                .with_default_target(default_target)
                .convert(module)
        }
        Mode::Deferred => {
            let strategy = Deferred::new(collaborators.hooks.clone(), collaborators.backend.clone())
                .with_missing_hook(options.missing_hook());
            ArgumentRewriter::new(strategy)
                .with_entry(options.entry())
                .with_default_target(default_target)
                .convert(module)
        }
    }
}

/// Run the post-schedule argument rewrite on `module`.
///
/// This is the main function that most users will interact with.
pub fn transform(module: &Module, options: &TransformOptions) -> Result<RewriteResult<Module>> {
    transform_with(module, options, &Collaborators::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Command;

    #[test]
    fn test_options_from_matches() {
        let cli = Command::new("callconv").args(default_arguments());
        let matches = cli
            .clone()
            .try_get_matches_from(["callconv", "--mode", "deferred", "--target", "edgex -mcpu=v2"])
            .unwrap();
        let options = TransformOptions::from_matches(&matches).unwrap();
        assert_eq!(options.mode(), Mode::Deferred);
        assert_eq!(options.entry(), "main");
        assert_eq!(options.default_target().unwrap().option("mcpu"), Some("v2"));
        assert_eq!(options.missing_hook(), MissingHookPolicy::Warn);

        let matches = cli.clone().try_get_matches_from(["callconv"]).unwrap();
        let options = TransformOptions::from_matches(&matches).unwrap();
        assert_eq!(options, TransformOptions::default());

        assert!(cli
            .try_get_matches_from(["callconv", "--on-missing-hook", "ignore"])
            .is_err());
    }
}

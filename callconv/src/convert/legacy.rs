use crate::cache::CacheEntry;
use crate::cache::Placeholder;
use crate::cache::ScheduleCache;
use crate::convert::arguments::rewrite_arguments;
use crate::convert::RewriteResult;
use crate::convert::RewriteStrategy;
use crate::decode::TransformSpec;
use crate::error::bail_rewrite;
use crate::error::RewriteError;
use crate::ir::Attr;
use crate::ir::Call;
use crate::ir::Callee;
use crate::ir::Expr;
use crate::ir::ExprKind;
use crate::ir::Function;
use crate::ir::Module;
use crate::ir::Target;
use crate::ir::Type;
use crate::ir::Var;
use crate::ir::ARGUMENT_REWRITE;
use crate::ir::PRIMITIVE;
use crate::ir::SCHEDULE_CACHE_KEY;
use crate::schedule::KernelCompiler;
use crate::subst::substitute;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Rewrite that drives scheduling itself, before anything is lowered.
///
/// Every call of a nested function is looked up in the schedule cache. When
/// the compiled kernel asks for a different calling convention, the call is
/// replaced by a call of a wrapper:
///
/// ```text
/// new_v0, new_v1, ... = forward(v0, v1, ...)
/// fn (p0, p1, ...) {
///     r0, r1, ... = backward(p0, p1, ...)
///     original(r0, r1, ...)
/// }(new_v0, new_v1, ...)
/// ```
///
/// Revised cache entries are held back until the pass commits, so a pass that
/// fails leaves the cache as it found it.
pub struct Legacy {
    cache: Arc<ScheduleCache>,
    compiler: Arc<dyn KernelCompiler>,
    pending: Mutex<HashMap<u64, CacheEntry>>,
}

/// Fingerprint of a function ignoring the markers the rewrite moves around.
fn identity(function: &Function) -> String {
    function
        .without_attr(SCHEDULE_CACHE_KEY)
        .without_attr(PRIMITIVE)
        .fingerprint()
}

/// Whether `function` is the source of `entry` or the wrapper built for it.
fn belongs_to(function: &Function, entry: &CacheEntry) -> bool {
    let source = identity(entry.source_function());
    if identity(function) == source {
        return true;
    }
    match function.body().as_call().map(|call| call.callee()) {
        Some(Callee::Function(inner)) if entry.applied().is_some() => identity(inner) == source,
        _ => false,
    }
}

impl Legacy {
    pub fn new(cache: Arc<ScheduleCache>, compiler: Arc<dyn KernelCompiler>) -> Self {
        Self {
            cache,
            compiler,
            pending: Mutex::new(HashMap::new()),
        }
    }
    fn is_cached(&self, function: &Function) -> bool {
        let key = match function.attrs().int(SCHEDULE_CACHE_KEY) {
            Some(key) if 0 <= key => key as u64,
            _ => return false,
        };
        let entry = match self.entry(key) {
            Some(entry) => entry,
            None => return false,
        };
        if belongs_to(function, &entry) {
            return true;
        }
        warn!("ScheduleCacheKey {key} refers to another function, scheduling again");
        false
    }
    /// Entry for `key` as this pass sees it, pending revisions included.
    fn entry(&self, key: u64) -> Option<CacheEntry> {
        if let Some(entry) = self.pending.lock().get(&key) {
            return Some(entry.clone());
        }
        self.cache.get(key)
    }
    /// Build the call of the wrapper and return it with the wrapper params.
    fn wrap(
        &self,
        spec: &TransformSpec,
        function: &Function,
        call: &Call,
        checked_type: Option<&Type>,
        outputs: usize,
    ) -> Result<(Expr, Vec<Var>)> {
        let arity = spec.forward_arity()?;
        let new_arg_count = match arity.checked_sub(outputs) {
            Some(n) => n,
            None => bail_rewrite!(RewriteError::ArityMismatch(format!(
                "transform produces {arity} values, fewer than the {outputs} outputs"
            ))),
        };
        let new_args = rewrite_arguments(spec, call.args(), new_arg_count)?;
        let params = spec
            .forward_types()
            .iter()
            .take(new_arg_count)
            .enumerate()
            .map(|(i, typ)| Var::typed(&format!("p{i}"), typ.clone()))
            .collect::<Vec<Var>>();
        let param_exprs = params.iter().map(Expr::var).collect::<Vec<Expr>>();
        let recovered = substitute(spec.backward(), &param_exprs, new_arg_count, call.args().len())?
            .into_iter()
            .zip(function.params())
            .map(|(arg, param)| match param.typ() {
                Some(typ) => arg.with_type(typ.clone()),
                None => arg,
            })
            .collect::<Vec<Expr>>();

        let inner = function.without_attr(PRIMITIVE);
        let inner_call = Call::new(Callee::Function(inner), recovered);
        let inner_call = Expr::new(ExprKind::Call(inner_call), function.ret_type().cloned());
        let wrapper = function
            .with_params(params.clone())
            .with_body(inner_call)
            .with_attr(PRIMITIVE, Attr::Int(1));
        let new_call = call
            .with_callee(Callee::Function(wrapper))
            .with_args(new_args);
        let new_call = Expr::new(ExprKind::Call(new_call), checked_type.cloned());
        Ok((new_call, params))
    }
    fn revised_entry(&self, entry: &CacheEntry, spec: &TransformSpec, params: &[Var]) -> Result<CacheEntry> {
        let mut inputs = vec![];
        for param in params {
            match param.typ() {
                Some(typ @ Type::Tensor(_)) => inputs.push(Placeholder::new(param.name(), typ.clone())),
                Some(other) => bail_rewrite!(RewriteError::MalformedTransform(format!(
                    "kernel input %{} must be a tensor, got {other}",
                    param.name()
                ))),
                None => bail_rewrite!(RewriteError::Untyped(format!("%{}", param.name()))),
            }
        }
        let mut revised = entry.with_inputs(inputs).with_applied(spec.clone());
        if let Some(kernel) = entry.compiled_kernel() {
            revised = revised.with_kernel(kernel.without_attr(ARGUMENT_REWRITE));
        }
        Ok(revised)
    }
}

impl RewriteStrategy for Legacy {
    const NAME: &'static str = "legacy";
    fn is_candidate(&self, call: &Call) -> bool {
        matches!(call.callee(), Callee::Function(_))
    }
    fn rewrite_call(
        &self,
        _module: &mut Module,
        call: &Call,
        checked_type: Option<&Type>,
        target: &Target,
    ) -> Result<RewriteResult<Expr>> {
        let function = match call.callee() {
            Callee::Function(function) => function,
            _ => return Ok(RewriteResult::Unchanged),
        };
        if self.is_cached(function) {
            debug!("Callee is already scheduled, skipping");
            return Ok(RewriteResult::Unchanged);
        }
        let (key, entry) = self
            .cache
            .lookup_or_compute(function, target, || self.compiler.compile(function, target))?;
        let entry = self.pending.lock().get(&key).cloned().unwrap_or(entry);
        let tagged = function
            .without_attr(ARGUMENT_REWRITE)
            .with_attr(SCHEDULE_CACHE_KEY, Attr::Int(key as i64));
        let outputs = entry.outputs().len();

        if let Some(spec) = entry.applied() {
            debug!("Reusing the transform applied to schedule {key}");
            let (new_call, _) = self.wrap(spec, &tagged, call, checked_type, outputs)?;
            return Ok(RewriteResult::Changed(new_call));
        }
        let passthrough = call.with_callee(Callee::Function(tagged.clone()));
        let passthrough = Expr::new(ExprKind::Call(passthrough), checked_type.cloned());
        let kernel = match entry.compiled_kernel() {
            Some(kernel) => kernel,
            None => return Ok(RewriteResult::Changed(passthrough)),
        };
        let raw = match kernel.attr(ARGUMENT_REWRITE) {
            Some(Attr::Str(raw)) => raw,
            Some(other) => bail_rewrite!(RewriteError::MalformedTransform(format!(
                "annotation on @{} must be a string, got {other}",
                kernel.name()
            ))),
            None => return Ok(RewriteResult::Changed(passthrough)),
        };
        let spec = TransformSpec::decode(raw)?;
        let (new_call, params) = self.wrap(&spec, &tagged, call, checked_type, outputs)?;
        let revised = self.revised_entry(&entry, &spec, &params)?;
        self.pending.lock().insert(key, revised);
        info!(
            "Rewrote arguments of schedule {key}: {} -> {} inputs",
            call.args().len(),
            params.len()
        );
        Ok(RewriteResult::Changed(new_call))
    }
    fn commit(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.pending.lock());
        for (key, entry) in pending {
            self.cache.replace_entry(key, entry)?;
        }
        Ok(())
    }
    fn abort(&self) {
        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            debug!("Dropping {} revised schedule(s) of the failed pass", dropped.len());
        }
    }
}

//! Process-wide schedule cache.
//!
//! Maps a `(function, target)` pair to the kernel compiled for it. Functions
//! are compared structurally: two functions that only differ in variable
//! identities (or in the cache key tag added by the rewrite) share an entry.
//!
//! Every key owns a [Shared] slot. A populated slot is read without further
//! exclusion. Computing or replacing an entry holds the slot's write guard, so
//! concurrent lookups of the same pair wait for a single computation and
//! [ScheduleCache::replace_entry] never races with it.

use crate::decode::TransformSpec;
use crate::error::bail_rewrite;
use crate::error::RewriteError;
use crate::ir::Function;
use crate::ir::KernelArtifact;
use crate::ir::Target;
use crate::ir::Type;
use crate::ir::SCHEDULE_CACHE_KEY;
use crate::shared::Shared;
use crate::shared::SharedExt;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::debug;

/// Named buffer of a compiled kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    name: String,
    typ: Type,
}

impl Placeholder {
    pub fn new(name: &str, typ: Type) -> Self {
        Self {
            name: name.to_string(),
            typ,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn typ(&self) -> &Type {
        &self.typ
    }
}

/// Result of scheduling and lowering one function for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledKernel {
    /// Compiled kernel; `None` when the function needs no kernel of its own.
    pub kernel: Option<KernelArtifact>,
    pub inputs: Vec<Placeholder>,
    pub outputs: Vec<Placeholder>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    key: u64,
    source_function: Function,
    target: Target,
    compiled_kernel: Option<KernelArtifact>,
    inputs: Vec<Placeholder>,
    outputs: Vec<Placeholder>,
    applied: Option<TransformSpec>,
}

impl CacheEntry {
    fn new(key: u64, source_function: Function, target: Target, compiled: CompiledKernel) -> Self {
        Self {
            key,
            source_function,
            target,
            compiled_kernel: compiled.kernel,
            inputs: compiled.inputs,
            outputs: compiled.outputs,
            applied: None,
        }
    }
    pub fn key(&self) -> u64 {
        self.key
    }
    pub fn source_function(&self) -> &Function {
        &self.source_function
    }
    pub fn target(&self) -> &Target {
        &self.target
    }
    pub fn compiled_kernel(&self) -> Option<&KernelArtifact> {
        self.compiled_kernel.as_ref()
    }
    pub fn inputs(&self) -> &[Placeholder] {
        &self.inputs
    }
    pub fn outputs(&self) -> &[Placeholder] {
        &self.outputs
    }
    /// Transform that was already consumed for this entry.
    ///
    /// Call sites that share the schedule are wrapped with the same transform.
    pub fn applied(&self) -> Option<&TransformSpec> {
        self.applied.as_ref()
    }
    pub fn with_kernel(&self, kernel: KernelArtifact) -> Self {
        Self {
            compiled_kernel: Some(kernel),
            ..self.clone()
        }
    }
    pub fn with_inputs(&self, inputs: Vec<Placeholder>) -> Self {
        Self {
            inputs,
            ..self.clone()
        }
    }
    pub fn with_applied(&self, applied: TransformSpec) -> Self {
        Self {
            applied: Some(applied),
            ..self.clone()
        }
    }
}

type Slot = Shared<Option<CacheEntry>>;

#[derive(Default)]
struct CacheState {
    keys: HashMap<(String, Target), u64>,
    slots: HashMap<u64, Slot>,
    next_key: u64,
}

#[derive(Default)]
pub struct ScheduleCache {
    state: Mutex<CacheState>,
}

static GLOBAL: OnceLock<Arc<ScheduleCache>> = OnceLock::new();

impl ScheduleCache {
    pub fn new() -> Self {
        Self::default()
    }
    /// The cache shared by every pass in this process.
    pub fn global() -> Arc<ScheduleCache> {
        GLOBAL.get_or_init(|| Arc::new(ScheduleCache::new())).clone()
    }
    fn slot(&self, key: u64) -> Option<Slot> {
        self.state.lock().slots.get(&key).cloned()
    }
    /// Return the entry for `(function, target)`, running `compute` on a miss.
    ///
    /// `compute` runs at most once per distinct pair for the lifetime of the
    /// cache. When it fails, the error is returned and the slot stays empty.
    pub fn lookup_or_compute<F>(
        &self,
        function: &Function,
        target: &Target,
        compute: F,
    ) -> Result<(u64, CacheEntry)>
    where
        F: FnOnce() -> Result<CompiledKernel>,
    {
        let fingerprint = function.without_attr(SCHEDULE_CACHE_KEY).fingerprint();
        let (key, slot) = {
            let mut state = self.state.lock();
            let id = (fingerprint, target.clone());
            let key = match state.keys.get(&id).copied() {
                Some(key) => key,
                None => {
                    let key = state.next_key;
                    state.next_key += 1;
                    state.keys.insert(id, key);
                    key
                }
            };
            (key, state.slots.entry(key).or_default().clone())
        };
        {
            let entry = slot.rd();
            if let Some(entry) = entry.as_ref() {
                return Ok((key, entry.clone()));
            }
        }
        let mut guard = slot.wr();
        if let Some(entry) = guard.as_ref() {
            return Ok((key, entry.clone()));
        }
        debug!("Schedule cache miss for key {key} on {target}");
        let compiled = compute()?;
        let entry = CacheEntry::new(key, function.clone(), target.clone(), compiled);
        *guard = Some(entry.clone());
        Ok((key, entry))
    }
    /// Overwrite the entry stored under `key`; the key is kept.
    pub fn replace_entry(&self, key: u64, entry: CacheEntry) -> Result<()> {
        let slot = match self.slot(key) {
            Some(slot) => slot,
            None => bail_rewrite!(RewriteError::UnknownCacheKey(key)),
        };
        let mut guard = slot.wr();
        if guard.is_none() {
            bail_rewrite!(RewriteError::UnknownCacheKey(key));
        }
        *guard = Some(CacheEntry { key, ..entry });
        Ok(())
    }
    pub fn get(&self, key: u64) -> Option<CacheEntry> {
        let slot = self.slot(key)?;
        let entry = slot.rd();
        entry.clone()
    }
    /// Number of populated entries.
    pub fn len(&self) -> usize {
        let slots = self.state.lock().slots.values().cloned().collect::<Vec<Slot>>();
        slots.iter().filter(|slot| slot.rd().is_some()).count()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Drop every entry. Keys handed out before stay unique.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.keys.clear();
        state.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Attr;
    use crate::ir::DType;
    use crate::ir::Expr;
    use crate::ir::Var;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Barrier;

    fn negative(name: &str) -> Function {
        let t = Type::tensor(vec![8], DType::Float32);
        let x = Var::typed(name, t.clone());
        let body = Expr::op("negative", vec![Expr::var(&x)]).with_type(t.clone());
        Function::new(vec![x], body, Some(t))
    }

    fn compiled(f: &Function) -> CompiledKernel {
        let t = Type::tensor(vec![8], DType::Float32);
        CompiledKernel {
            kernel: Some(KernelArtifact::new("k", Target::new("llvm"), f.clone())),
            inputs: vec![Placeholder::new("x", t.clone())],
            outputs: vec![Placeholder::new("out", t)],
        }
    }

    #[test]
    fn test_structural_keying() {
        let cache = ScheduleCache::new();
        let llvm = Target::new("llvm");
        let f = negative("x");
        let (k1, e1) = cache.lookup_or_compute(&f, &llvm, || Ok(compiled(&f))).unwrap();
        let g = negative("renamed").with_attr(SCHEDULE_CACHE_KEY, Attr::Int(k1 as i64));
        let (k2, e2) = cache
            .lookup_or_compute(&g, &llvm, || panic!("should be cached"))
            .unwrap();
        assert_eq!(k1, k2);
        assert_eq!(e1, e2);

        let cuda = Target::new("cuda");
        let (k3, _) = cache.lookup_or_compute(&f, &cuda, || Ok(compiled(&f))).unwrap();
        assert_ne!(k1, k3);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_compute_leaves_slot_empty() {
        let cache = ScheduleCache::new();
        let llvm = Target::new("llvm");
        let f = negative("x");
        let result = cache.lookup_or_compute(&f, &llvm, || Err(anyhow::anyhow!("lowering failed")));
        assert!(result.is_err());
        assert!(cache.is_empty());
        let (key, _) = cache.lookup_or_compute(&f, &llvm, || Ok(compiled(&f))).unwrap();
        assert!(cache.get(key).is_some());
    }

    #[test]
    fn test_replace_entry_keeps_key() {
        let cache = ScheduleCache::new();
        let llvm = Target::new("llvm");
        let f = negative("x");
        let (key, entry) = cache.lookup_or_compute(&f, &llvm, || Ok(compiled(&f))).unwrap();
        let t = Type::tensor(vec![2, 4], DType::Float32);
        let revised = entry.with_inputs(vec![Placeholder::new("p0", t)]);
        cache.replace_entry(key, revised.clone()).unwrap();
        assert_eq!(cache.get(key), Some(revised));
        let (again, seen) = cache
            .lookup_or_compute(&f, &llvm, || panic!("should be cached"))
            .unwrap();
        assert_eq!(again, key);
        assert_eq!(seen.inputs()[0].name(), "p0");

        let err = cache.replace_entry(key + 100, entry).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RewriteError>(),
            Some(RewriteError::UnknownCacheKey(_))
        ));
    }

    #[test]
    fn test_single_computation_under_contention() {
        let n = 16;
        let cache = Arc::new(ScheduleCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(n));
        let handles = (0..n)
            .map(|i| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    // Structurally equal, but distinct variables per thread.
                    let f = negative(&format!("x{i}"));
                    barrier.wait();
                    cache
                        .lookup_or_compute(&f, &Target::new("llvm"), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(compiled(&f))
                        })
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();
        let results = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|(key, _)| *key == results[0].0));
        assert!(results.iter().all(|(_, entry)| *entry == results[0].1));
    }

    #[test]
    fn test_clear() {
        let cache = ScheduleCache::new();
        let f = negative("x");
        let (key, _) = cache
            .lookup_or_compute(&f, &Target::new("llvm"), || Ok(compiled(&f)))
            .unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(key).is_none());
        let (fresh, _) = cache
            .lookup_or_compute(&f, &Target::new("llvm"), || Ok(compiled(&f)))
            .unwrap();
        assert_ne!(fresh, key);
    }
}

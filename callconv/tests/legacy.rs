extern crate callconv;

use anyhow::Result;
use callconv::cache::CompiledKernel;
use callconv::cache::ScheduleCache;
use callconv::convert::RewriteResult;
use callconv::ir::Attr;
use callconv::ir::Function;
use callconv::ir::KernelArtifact;
use callconv::ir::Target;
use callconv::ir::ARGUMENT_REWRITE;
use callconv::parser::Parser;
use callconv::schedule::replay::PassthroughBackend;
use callconv::schedule::replay::ReplayCompiler;
use callconv::schedule::HookRegistry;
use callconv::schedule::KernelCompiler;
use callconv::tester::Tester;
use callconv::transform_with;
use callconv::Collaborators;
use callconv::Mode;
use callconv::RewriteError;
use callconv::TransformOptions;
use indoc::indoc;
use std::panic::Location;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Packs `%x` into a matrix, keeps `%y` and appends the output buffer.
const PACK: &str = indoc! {"
module {
  def @backward(%p0: Tensor[(4, 4), float32], %p1: Tensor[(4), float32], %p2: Tensor[(4), float32]) -> (Tensor[(16), float32], Tensor[(4), float32]) {
    (unpack(%p0) : Tensor[(16), float32], %p1)
  }
  def @forward(%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> (Tensor[(4, 4), float32], Tensor[(4), float32], Tensor[(4), float32]) {
    (pack(%x) : Tensor[(4, 4), float32], %y, zero_buffer() : Tensor[(4), float32])
  }
}"};

/// Scheduler that asks every kernel for a new calling convention.
struct Rescheduler {
    payload: Option<String>,
    calls: AtomicUsize,
}

impl Rescheduler {
    fn new(payload: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            payload: payload.map(|p| p.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KernelCompiler for Rescheduler {
    fn compile(&self, function: &Function, target: &Target) -> Result<CompiledKernel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut compiled = ReplayCompiler.compile(function, target)?;
        if let (Some(kernel), Some(payload)) = (&compiled.kernel, &self.payload) {
            let annotated = kernel
                .kernel()
                .with_attr(ARGUMENT_REWRITE, Attr::Str(payload.clone()));
            compiled.kernel = Some(KernelArtifact::new(
                kernel.name(),
                kernel.target().clone(),
                annotated,
            ));
        }
        Ok(compiled)
    }
}

fn collaborators(compiler: Arc<Rescheduler>) -> Collaborators {
    Collaborators {
        cache: Arc::new(ScheduleCache::new()),
        compiler,
        hooks: HookRegistry::new(),
        backend: Arc::new(PassthroughBackend),
    }
}

fn options() -> TransformOptions {
    TransformOptions::new().with_mode(Mode::Legacy)
}

fn rewrite_error(err: &anyhow::Error) -> &RewriteError {
    err.downcast_ref::<RewriteError>().unwrap()
}

const SRC: &str = indoc! {r#"
module {
  def @main(%a: Tensor[(16), float32], %b: Tensor[(4), float32]) -> Tensor[(4), float32] {
    fn (%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1} {
      my_op(%x, %y) : Tensor[(4), float32]
    }(%a, %b) on "edgex"
  }
}"#};

#[test]
fn test_rewrite_wraps_call() {
    Tester::init_tracing();
    let compiler = Rescheduler::new(Some(PACK));
    let collaborators = collaborators(compiler.clone());
    let (module, actual) = Tester::transform_with(&options(), &collaborators, SRC);
    let expected = indoc! {r#"
    module {
      def @main(%a: Tensor[(16), float32], %b: Tensor[(4), float32]) -> Tensor[(4), float32] {
        fn (%p0: Tensor[(4, 4), float32], %p1: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1, ScheduleCacheKey = 0} {
          fn (%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {ScheduleCacheKey = 0} {
            my_op(%x, %y) : Tensor[(4), float32]
          }(unpack(%p0) : Tensor[(16), float32], %p1)
        }(pack(%a) : Tensor[(4, 4), float32], %b) on "edgex"
      }
    }"#};
    Tester::check_lines_exact(&actual, expected, Location::caller());
    Tester::verify(&module);
    assert_eq!(compiler.calls(), 1);

    let entry = collaborators.cache.get(0).unwrap();
    let inputs = entry
        .inputs()
        .iter()
        .map(|p| format!("{}: {}", p.name(), p.typ()))
        .collect::<Vec<String>>();
    assert_eq!(
        inputs,
        vec!["p0: Tensor[(4, 4), float32]", "p1: Tensor[(4), float32]"]
    );
    assert_eq!(entry.outputs().len(), 1);
    assert!(entry.applied().is_some());
    let kernel = entry.compiled_kernel().unwrap();
    assert!(kernel.attr(ARGUMENT_REWRITE).is_none());
}

#[test]
fn test_rewrite_is_idempotent() {
    let compiler = Rescheduler::new(Some(PACK));
    let collaborators = collaborators(compiler.clone());
    let (module, _) = Tester::transform_with(&options(), &collaborators, SRC);
    let again = transform_with(&module, &options(), &collaborators).unwrap();
    assert_eq!(again, RewriteResult::Unchanged);
    assert_eq!(compiler.calls(), 1);
    assert_eq!(collaborators.cache.len(), 1);
}

#[test]
fn test_kernel_without_annotation_is_tagged_only() {
    let compiler = Rescheduler::new(None);
    let collaborators = collaborators(compiler.clone());
    let (_module, actual) = Tester::transform_with(&options(), &collaborators, SRC);
    let expected = indoc! {r#"
    fn (%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1, ScheduleCacheKey = 0} {
      my_op(%x, %y) : Tensor[(4), float32]
    }(%a, %b) on "edgex"
    "#};
    Tester::check_lines_contain(&actual, expected, Location::caller());
    let entry = collaborators.cache.get(0).unwrap();
    assert!(entry.applied().is_none());
    assert_eq!(entry.inputs().len(), 2);
}

#[test]
fn test_shared_schedule_is_wrapped_consistently() {
    let src = indoc! {r#"
    module {
      def @main(%a: Tensor[(16), float32], %b: Tensor[(4), float32]) -> (Tensor[(4), float32], Tensor[(4), float32]) {
        (fn (%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1} {
          my_op(%x, %y) : Tensor[(4), float32]
        }(%a, %b) on "edgex", fn (%u: Tensor[(16), float32], %v: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1} {
          my_op(%u, %v) : Tensor[(4), float32]
        }(%a, %b) on "edgex")
      }
    }"#};
    let compiler = Rescheduler::new(Some(PACK));
    let collaborators = collaborators(compiler.clone());
    let (_module, actual) = Tester::transform_with(&options(), &collaborators, src);
    assert_eq!(compiler.calls(), 1);
    assert_eq!(actual.matches("}(pack(%a) : Tensor[(4, 4), float32], %b)").count(), 2);
    assert_eq!(actual.matches("(unpack(%p0) : Tensor[(16), float32], %p1)").count(), 2);
}

#[test]
fn test_computed_argument_must_survive() {
    let src = indoc! {r#"
    module {
      def @main(%a: Tensor[(16), float32], %b: Tensor[(4), float32], %c: Tensor[(4), float32]) -> Tensor[(4), float32] {
        fn (%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1} {
          my_op(%x, %y) : Tensor[(4), float32]
        }(%a, mul(%b, %c) : Tensor[(4), float32]) on "edgex"
      }
    }"#};
    let negate = indoc! {"
    module {
      def @backward(%p0: Tensor[(4, 4), float32], %p1: Tensor[(4), float32]) -> (Tensor[(16), float32], Tensor[(4), float32]) {
        (unpack(%p0) : Tensor[(16), float32], negative(%p1) : Tensor[(4), float32])
      }
      def @forward(%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> (Tensor[(4, 4), float32], Tensor[(4), float32], Tensor[(4), float32]) {
        (pack(%x) : Tensor[(4, 4), float32], negative(%y) : Tensor[(4), float32], zero_buffer() : Tensor[(4), float32])
      }
    }"};
    let compiler = Rescheduler::new(Some(negate));
    let collaborators = collaborators(compiler);
    let module = Parser::parse(src).unwrap();
    let err = transform_with(&module, &options(), &collaborators).unwrap_err();
    assert!(matches!(
        rewrite_error(&err),
        RewriteError::UnsupportedRewrite { .. }
    ));
    let entry = collaborators.cache.get(0).unwrap();
    assert!(entry.applied().is_none());
    assert!(entry.compiled_kernel().unwrap().attr(ARGUMENT_REWRITE).is_some());
}

#[test]
fn test_computed_argument_passed_through() {
    let src = indoc! {r#"
    module {
      def @main(%a: Tensor[(16), float32], %b: Tensor[(4), float32], %c: Tensor[(4), float32]) -> Tensor[(4), float32] {
        fn (%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1} {
          my_op(%x, %y) : Tensor[(4), float32]
        }(%a, mul(%b, %c) : Tensor[(4), float32]) on "edgex"
      }
    }"#};
    let collaborators = collaborators(Rescheduler::new(Some(PACK)));
    let (_module, actual) = Tester::transform_with(&options(), &collaborators, src);
    assert!(actual.contains("}(pack(%a) : Tensor[(4, 4), float32], mul(%b, %c) : Tensor[(4), float32]) on \"edgex\""));
}

#[test]
fn test_arity_mismatch() {
    // Takes one argument while the call passes two.
    let narrow = indoc! {"
    module {
      def @backward(%p0: Tensor[(16), float32]) -> (Tensor[(16), float32],) {
        (%p0,)
      }
      def @forward(%x: Tensor[(16), float32]) -> (Tensor[(16), float32], Tensor[(4), float32]) {
        (%x, zero_buffer() : Tensor[(4), float32])
      }
    }"};
    let collaborators = collaborators(Rescheduler::new(Some(narrow)));
    let module = Parser::parse(SRC).unwrap();
    let err = transform_with(&module, &options(), &collaborators).unwrap_err();
    assert!(matches!(rewrite_error(&err), RewriteError::ArityMismatch(_)));

    // Fewer values than output buffers.
    let short = indoc! {"
    module {
      def @backward(%p0: Tensor[(16), float32]) -> (Tensor[(16), float32],) {
        (%p0,)
      }
      def @forward(%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> () {
        ()
      }
    }"};
    let collaborators = self::collaborators(Rescheduler::new(Some(short)));
    let err = transform_with(&module, &options(), &collaborators).unwrap_err();
    assert!(matches!(rewrite_error(&err), RewriteError::ArityMismatch(_)));
}

#[test]
fn test_undecodable_annotation() {
    let collaborators = collaborators(Rescheduler::new(Some("module { def @forward(")));
    let module = Parser::parse(SRC).unwrap();
    let err = transform_with(&module, &options(), &collaborators).unwrap_err();
    assert!(matches!(rewrite_error(&err), RewriteError::Decode(_)));
}

#[test]
fn test_missing_target() {
    let src = SRC.replace(" on \"edgex\"", "");
    let collaborators = collaborators(Rescheduler::new(Some(PACK)));
    let module = Parser::parse(&src).unwrap();
    let err = transform_with(&module, &options(), &collaborators).unwrap_err();
    assert!(matches!(rewrite_error(&err), RewriteError::MissingTarget(_)));

    let options = options().with_default_target(Target::new("edgex"));
    let result = transform_with(&module, &options, &collaborators).unwrap();
    assert!(result.is_changed().is_some());
}

#[test]
fn test_missing_entry() {
    let collaborators = collaborators(Rescheduler::new(None));
    let module = Parser::parse(SRC).unwrap();
    let options = options().with_entry("other");
    let err = transform_with(&module, &options, &collaborators).unwrap_err();
    assert!(matches!(rewrite_error(&err), RewriteError::MissingEntry(_)));
}

#[test]
fn test_failed_pass_leaves_cache_untouched() {
    // The second call passes three arguments to a transform taking two.
    let src = indoc! {r#"
    module {
      def @main(%a: Tensor[(16), float32], %b: Tensor[(4), float32]) -> (Tensor[(4), float32], Tensor[(4), float32]) {
        (fn (%x: Tensor[(16), float32], %y: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1} {
          my_op(%x, %y) : Tensor[(4), float32]
        }(%a, %b) on "edgex", fn (%u: Tensor[(16), float32], %v: Tensor[(4), float32], %w: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1} {
          other_op(%u, %v, %w) : Tensor[(4), float32]
        }(%a, %b, %b) on "edgex")
      }
    }"#};
    let collaborators = collaborators(Rescheduler::new(Some(PACK)));
    let module = Parser::parse(src).unwrap();
    let err = transform_with(&module, &options(), &collaborators).unwrap_err();
    assert!(matches!(rewrite_error(&err), RewriteError::ArityMismatch(_)));

    let entry = collaborators.cache.get(0).unwrap();
    assert!(entry.applied().is_none());
    assert!(entry.compiled_kernel().unwrap().attr(ARGUMENT_REWRITE).is_some());
    let inputs = entry.inputs().iter().map(|p| p.name()).collect::<Vec<&str>>();
    assert_eq!(inputs, vec!["x", "y"]);

    // A pass that succeeds publishes the revised entry.
    let module = Parser::parse(SRC).unwrap();
    transform_with(&module, &options(), &collaborators).unwrap();
    let entry = collaborators.cache.get(0).unwrap();
    assert!(entry.applied().is_some());
    assert_eq!(entry.inputs()[0].name(), "p0");
}

#[test]
fn test_foreign_cache_key_is_scheduled_again() {
    let compiler = Rescheduler::new(None);
    let collaborators = collaborators(compiler.clone());
    let module = Parser::parse(SRC).unwrap();
    transform_with(&module, &options(), &collaborators).unwrap();
    assert_eq!(compiler.calls(), 1);

    // Tagged against some other cache, where key 0 was a different function.
    let src = indoc! {r#"
    module {
      def @main(%a: Tensor[(4), float32]) -> Tensor[(4), float32] {
        fn (%x: Tensor[(4), float32]) -> Tensor[(4), float32] attributes {Primitive = 1, ScheduleCacheKey = 0} {
          negative(%x) : Tensor[(4), float32]
        }(%a) on "edgex"
      }
    }"#};
    let (_module, actual) = Tester::transform_with(&options(), &collaborators, src);
    assert_eq!(compiler.calls(), 2);
    assert!(actual.contains("attributes {Primitive = 1, ScheduleCacheKey = 1}"));
    assert_eq!(collaborators.cache.len(), 2);
}

//! callconv reconciles calling conventions after kernel scheduling.
//!
//! A scheduler that optimizes a kernel for a target may decide that the kernel
//! should take its arguments differently: reordered, split, padded or in
//! another layout. The call sites in the high-level program still pass the
//! original arguments. Instead of re-deriving the change, the scheduler
//! attaches a pair of transform functions to the kernel:
//!
//! - `forward` computes the new arguments from the original ones.
//! - `backward` recovers the original arguments from the new ones.
//!
//! The post-schedule argument rewrite ([convert::ArgumentRewriter]) specializes
//! these templates by substitution ([subst::substitute]) to rewrite every
//! affected call site. It runs in one of two modes:
//!
//! - [convert::Legacy] schedules nested functions itself through the
//!   [cache::ScheduleCache] and wraps each rewritten call in a new fused
//!   function that converts the arguments back.
//! - [convert::Deferred] consumes scheduling results attached to lowered calls
//!   and rebinds the lowered kernel under the same name.
//!
//! The schedule cache memoizes `(function, target) -> compiled kernel` so
//! that scheduling runs at most once per distinct function body and target,
//! also when several compilations look up the same pair concurrently.
//!
//! The program is represented in a small textual IR, see [parser::Parser].
//! To see the pass in action, run the `callconv` binary on a module.

pub mod cache;
pub mod convert;
pub mod decode;
pub mod error;
pub mod ir;
pub mod parser;
pub mod schedule;
pub mod shared;
pub mod subst;
#[cfg(feature = "test-utils")]
pub mod tester;
mod transform;

pub use error::RewriteError;
pub use transform::default_arguments;
pub use transform::init_subscriber;
pub use transform::transform;
pub use transform::transform_with;
pub use transform::Collaborators;
pub use transform::Mode;
pub use transform::TransformOptions;

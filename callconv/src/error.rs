//! Errors raised by the argument rewrite and its supporting pieces.
//!
//! Everything except [RewriteError::MissingScheduleHook] is a contract
//! violation: the pass aborts the current module instead of emitting a
//! partially rewritten calling convention. Functions in this crate return
//! [anyhow::Result], so callers match on a variant with
//! `err.downcast_ref::<RewriteError>()`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("arity mismatch: {0}")]
    ArityMismatch(String),

    #[error("malformed transform function: {0}")]
    MalformedTransform(String),

    #[error("failed to decode transform payload: {0}")]
    Decode(String),

    #[error("transform payload has an invalid layout: {0}")]
    Schema(String),

    #[error("unsupported rewrite: non-leaf argument `{arg}` {reason}")]
    UnsupportedRewrite { arg: String, reason: String },

    #[error("single definition violated for @{name}: {reason}")]
    DuplicateSymbol { name: String, reason: String },

    #[error("symbol @{0} is not defined in the module")]
    DanglingSymbol(String),

    #[error("no schedule hook registered for anchor `{anchor}` under target `{target}`")]
    MissingScheduleHook { anchor: String, target: String },

    #[error("can not determine the target of call `{0}`, run device planning first")]
    MissingTarget(String),

    #[error("expression `{0}` has no checked type")]
    Untyped(String),

    #[error("entry function @{0} not found")]
    MissingEntry(String),

    #[error("schedule cache has no entry with key {0}")]
    UnknownCacheKey(u64),
}

/// Shorthand to return a [RewriteError] through [anyhow].
macro_rules! bail_rewrite {
    ($err:expr) => {
        return Err(anyhow::Error::new($err))
    };
}

pub(crate) use bail_rewrite;

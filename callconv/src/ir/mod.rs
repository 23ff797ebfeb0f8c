//! Intermediate representation (IR) rewritten by the pass.
//!
//! The IR is a small functional language: [Expr] trees with [Var], [Constant],
//! tuples, calls and function literals, bound to symbols inside a [Module].
//! All nodes are immutable values.

mod attribute;
mod expr;
mod function;
mod module;
mod printer;
mod target;
mod typ;

pub use attribute::Attr;
pub use attribute::Attributes;
pub use attribute::ANCHOR_ATTRS;
pub use attribute::ANCHOR_OP;
pub use attribute::ARGUMENT_REWRITE;
pub use attribute::PRIMITIVE;
pub use attribute::RELAY_TO_KERNEL;
pub use attribute::SCHEDULE_CACHE_KEY;
pub use expr::Call;
pub use expr::Callee;
pub use expr::Constant;
pub use expr::Expr;
pub use expr::ExprKind;
pub use expr::GlobalVar;
pub use expr::Var;
pub use function::Function;
pub use module::Definition;
pub use module::KernelArtifact;
pub use module::Module;
pub use printer::Printer;
pub use target::Target;
pub use typ::DType;
pub use typ::FuncType;
pub use typ::TensorType;
pub use typ::Type;

pub fn spaces(indent: i32) -> String {
    "  ".repeat(indent as usize)
}

/// Escape a string so that it can be printed between double quotes.
pub fn escape(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for c in src.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [escape].
pub fn unescape(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[test]
fn test_escape() {
    let src = "def @f() {\n  \"x\\y\"\n}";
    let escaped = escape(src);
    assert!(!escaped.contains('\n'));
    assert_eq!(unescape(&escaped), src);
}

use crate::ir::escape;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt::Formatter;

/// Marks a function as a fused primitive (a direct leaf of fusion).
pub const PRIMITIVE: &str = "Primitive";
/// Tag attached to a callee once it has been looked up in the schedule cache.
pub const SCHEDULE_CACHE_KEY: &str = "ScheduleCacheKey";
/// Attribute a scheduler sets on a kernel when the calling convention changes.
///
/// The value is the encoded [crate::decode::TransformSpec].
pub const ARGUMENT_REWRITE: &str = "post_schedule_argument_rewrite";
/// Call metadata marking a lowered call whose convention must be reconciled.
pub const RELAY_TO_KERNEL: &str = "relay_to_kernel";
/// Call metadata naming the operator that anchored scheduling.
pub const ANCHOR_OP: &str = "anchor_op";
/// Call metadata holding the attributes of the anchor operator.
pub const ANCHOR_ATTRS: &str = "anchor_attrs";

/// Known-constant annotation value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attr {
    Int(i64),
    Bool(bool),
    Str(String),
    Dict(Attributes),
}

impl Attr {
    /// Whether this value counts as "set" (`1`, `true`, non-empty).
    pub fn is_nonzero(&self) -> bool {
        match self {
            Attr::Int(i) => *i != 0,
            Attr::Bool(b) => *b,
            Attr::Str(s) => !s.is_empty(),
            Attr::Dict(d) => !d.is_empty(),
        }
    }
}

impl Display for Attr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Attr::Int(i) => write!(f, "{i}"),
            Attr::Bool(b) => write!(f, "{b}"),
            Attr::Str(s) => write!(f, "\"{}\"", escape(s)),
            Attr::Dict(d) => write!(f, "{d}"),
        }
    }
}

/// Ordered string-keyed annotations.
///
/// Attribute sets are values: [Attributes::with] and [Attributes::without]
/// return a modified copy and leave `self` untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Attributes {
    map: BTreeMap<String, Attr>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
    pub fn len(&self) -> usize {
        self.map.len()
    }
    pub fn get(&self, name: &str) -> Option<&Attr> {
        self.map.get(name)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Attr::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Attr::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn dict(&self, name: &str) -> Option<&Attributes> {
        match self.get(name)? {
            Attr::Dict(d) => Some(d),
            _ => None,
        }
    }
    pub fn has_nonzero(&self, name: &str) -> bool {
        self.get(name).map(|a| a.is_nonzero()).unwrap_or(false)
    }
    pub fn insert(&mut self, name: &str, attr: Attr) {
        self.map.insert(name.to_string(), attr);
    }
    pub fn with(&self, name: &str, attr: Attr) -> Self {
        let mut out = self.clone();
        out.insert(name, attr);
        out
    }
    pub fn without(&self, name: &str) -> Self {
        let mut out = self.clone();
        out.map.remove(name);
        out
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Attr)> {
        self.map.iter()
    }
}

impl Display for Attributes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, attr)) in self.map.iter().enumerate() {
            if 0 < i {
                write!(f, ", ")?;
            }
            write!(f, "{name} = {attr}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_on_write() {
        let attrs = Attributes::new().with(PRIMITIVE, Attr::Int(1));
        let stripped = attrs.without(PRIMITIVE);
        assert!(attrs.has_nonzero(PRIMITIVE));
        assert!(!stripped.has_nonzero(PRIMITIVE));
        assert!(stripped.is_empty());
    }

    #[test]
    fn test_display() {
        let inner = Attributes::new().with("axis", Attr::Int(1));
        let attrs = Attributes::new()
            .with("b", Attr::Str("say \"hi\"".to_string()))
            .with("a", Attr::Dict(inner))
            .with("c", Attr::Bool(true));
        assert_eq!(
            attrs.to_string(),
            r#"{a = {axis = 1}, b = "say \"hi\"", c = true}"#
        );
    }
}

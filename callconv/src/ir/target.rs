use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::str::FromStr;

/// Compilation target such as `edgex` or `llvm -mcpu=skylake`.
///
/// Two targets are the same cache key component only when kind and all
/// options match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    kind: String,
    options: BTreeMap<String, String>,
}

impl Target {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            options: BTreeMap::new(),
        }
    }
    pub fn with_option(&self, key: &str, value: &str) -> Self {
        let mut out = self.clone();
        out.options.insert(key.to_string(), value.to_string());
        out
    }
    pub fn kind(&self) -> &str {
        &self.kind
    }
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|v| v.as_str())
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;
    /// Parse `kind -key=value -flag`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let kind = match parts.next() {
            Some(kind) => kind,
            None => return Err(anyhow::anyhow!("Empty target string")),
        };
        let mut target = Target::new(kind);
        for part in parts {
            let part = match part.strip_prefix('-') {
                Some(part) => part,
                None => return Err(anyhow::anyhow!("Expected -key=value, got {part}")),
            };
            target = match part.split_once('=') {
                Some((key, value)) => target.with_option(key, value),
                None => target.with_option(part, "true"),
            };
        }
        Ok(target)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        for (key, value) in &self.options {
            write!(f, " -{key}={value}")?;
        }
        Ok(())
    }
}

#[test]
fn test_parse_target() {
    let target: Target = "llvm -mcpu=skylake".parse().unwrap();
    assert_eq!(target.kind(), "llvm");
    assert_eq!(target.option("mcpu"), Some("skylake"));
    assert_eq!(target.to_string(), "llvm -mcpu=skylake");
    assert!("".parse::<Target>().is_err());
    assert_ne!(target, Target::new("llvm"));
}

//! Global property keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

/// A unique, non-string property key.
///
/// Two symbols are equal only if they come from the same `Symbol::new` call;
/// the description is informational.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    id: u64,
    description: String,
}

impl Symbol {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Key of a property on a global-like object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyKey {
    Name(String),
    Symbol(Symbol),
}

impl PropertyKey {
    /// Returns the name if this is a string key.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Symbol(_) => None,
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Self::Symbol(_))
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Symbol> for PropertyKey {
    fn from(symbol: Symbol) -> Self {
        Self::Symbol(symbol)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Symbol(sym) => write!(f, "Symbol({})", sym.description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_with_same_description_differ() {
        let a = Symbol::new("token");
        let b = Symbol::new("token");
        assert_ne!(a, b);
        assert_eq!(a.description(), "token");
        assert_eq!(PropertyKey::from(a.clone()), PropertyKey::from(a));
    }

    #[test]
    fn display_formats() {
        assert_eq!(PropertyKey::from("counter").to_string(), "counter");
        assert_eq!(PropertyKey::from(Symbol::new("s")).to_string(), "Symbol(s)");
    }

    #[test]
    fn name_accessor() {
        assert_eq!(PropertyKey::from("x").as_name(), Some("x"));
        assert!(PropertyKey::from(Symbol::new("x")).as_name().is_none());
    }
}

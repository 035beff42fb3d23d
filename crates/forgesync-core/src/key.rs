//! Object identity: every declared entity is addressed by `(kind, name)`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Prefix distinguishing deferred-update shadow kinds from their base kind.
pub const DEFERRED_PREFIX: &str = "deferred-";

/// Short lowercase tag identifying an object type - cheaply cloneable.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Kind(Arc<str>);

impl Kind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The shadow kind for this kind (`tag` → `deferred-tag`).
    pub fn deferred(&self) -> Kind {
        Kind::new(format!("{}{}", DEFERRED_PREFIX, self.0))
    }

    /// Whether this is a deferred-update shadow kind.
    pub fn is_deferred(&self) -> bool {
        self.0.starts_with(DEFERRED_PREFIX)
    }

    /// The base kind of a shadow kind (`deferred-tag` → `tag`); identity
    /// for non-shadow kinds.
    pub fn base(&self) -> Kind {
        match self.0.strip_prefix(DEFERRED_PREFIX) {
            Some(rest) => Kind::new(rest),
            None => self.clone(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Kind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Kind {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialOrd for Kind {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Kind {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Serialize for Kind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Kind::new(String::deserialize(deserializer)?))
    }
}

/// Stable identity of a declared entity. Ordering is `(kind, name)`
/// lexicographic, which is the deterministic order used everywhere a
/// sequence of entities must be reproducible.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub kind: Kind,
    pub name: String,
}

impl Key {
    pub fn new(kind: impl Into<Kind>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parse a `kind:name` spec as given on the command line.
    pub fn parse(spec: &str) -> Option<Self> {
        let (kind, name) = spec.split_once(':')?;
        if kind.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(kind, name))
    }

    /// The shadow key for this key (`tag:build` → `deferred-tag:build`).
    pub fn deferred(&self) -> Key {
        Key {
            kind: self.kind.deferred(),
            name: self.name.clone(),
        }
    }

    /// The base key of a shadow key; identity for non-shadow keys.
    pub fn base(&self) -> Key {
        Key {
            kind: self.kind.base(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_and_parse() {
        let key = Key::new("tag", "fedora-42-build");
        assert_eq!(key.to_string(), "tag:fedora-42-build");
        assert_eq!(Key::parse("tag:fedora-42-build"), Some(key));
        assert_eq!(Key::parse("no-separator"), None);
        assert_eq!(Key::parse(":empty-kind"), None);
    }

    #[test]
    fn key_ordering_is_kind_then_name() {
        let mut keys = vec![
            Key::new("target", "a"),
            Key::new("tag", "z"),
            Key::new("tag", "a"),
        ];
        keys.sort();
        assert_eq!(keys[0], Key::new("tag", "a"));
        assert_eq!(keys[1], Key::new("tag", "z"));
        assert_eq!(keys[2], Key::new("target", "a"));
    }

    #[test]
    fn deferred_round_trip() {
        let key = Key::new("tag", "build");
        let shadow = key.deferred();
        assert_eq!(shadow.to_string(), "deferred-tag:build");
        assert!(shadow.kind.is_deferred());
        assert!(!key.kind.is_deferred());
        assert_eq!(shadow.base(), key);
    }
}

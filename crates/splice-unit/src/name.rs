//! Unit identifiers
//!
//! Provides [`UnitName`], the JVM internal name of one compilation unit.
//! Nested units share their enclosing unit's name followed by `$segment`,
//! which gives every identifier a parent chain used for exclusion.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// File extension of unit entries
pub const UNIT_EXTENSION: &str = ".class";

/// Internal name of a unit, e.g. `com/host/net/Server$Worker`
///
/// Dotted names (`com.host.net.Server`) are accepted on parse and normalized
/// to the slashed form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitName(String);

impl UnitName {
    /// Create from an internal or dotted name
    ///
    /// # Errors
    /// Returns error if the name is empty or has an empty package segment
    pub fn new(name: &str) -> Result<Self, NameError> {
        name.parse()
    }

    /// Slashed internal name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Class-name part after the last `/`
    #[inline]
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, s)| s)
    }

    /// Package part before the last `/` (empty for the default package)
    #[inline]
    #[must_use]
    pub fn package(&self) -> &str {
        self.0.rsplit_once('/').map_or("", |(p, _)| p)
    }

    /// Offset of the `$` that separates the enclosing unit, if nested
    fn nest_split(&self, last: bool) -> Option<usize> {
        let simple = self.simple_name();
        let base = self.0.len() - simple.len();
        let found = if last { simple.rfind('$') } else { simple.find('$') };
        // a leading or trailing `$` is part of the name, not a nesting separator
        found
            .filter(|&i| i > 0 && i + 1 < simple.len())
            .map(|i| base + i)
    }

    /// Whether this unit is nested inside another
    #[inline]
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.nest_split(true).is_some()
    }

    /// Directly enclosing unit (`None` for top-level units)
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.nest_split(true).map(|i| Self(self.0[..i].to_string()))
    }

    /// Top-level unit this one is nested in (itself if top-level)
    #[must_use]
    pub fn outermost(&self) -> Self {
        self.nest_split(false)
            .map_or_else(|| self.clone(), |i| Self(self.0[..i].to_string()))
    }

    /// Enclosing units, innermost first
    pub fn ancestors(&self) -> impl Iterator<Item = Self> {
        std::iter::successors(self.parent(), Self::parent)
    }

    /// Whether `self` encloses `other` at any depth
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.ancestors().any(|a| a == *self)
    }

    /// Whether the name lies under an entry prefix such as `com/host/`
    #[inline]
    #[must_use]
    pub fn is_within(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Archive entry name, e.g. `com/host/Server.class`
    #[inline]
    #[must_use]
    pub fn entry_name(&self) -> String {
        format!("{}{UNIT_EXTENSION}", self.0)
    }

    /// Identifier for an archive entry, if the entry is a unit
    #[must_use]
    pub fn from_entry_name(entry: &str) -> Option<Self> {
        entry
            .strip_suffix(UNIT_EXTENSION)
            .filter(|stem| !stem.contains('.'))
            .and_then(|stem| stem.parse().ok())
    }

    /// Type descriptor, e.g. `Lcom/host/Server;`
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> String {
        format!("L{};", self.0)
    }
}

impl Display for UnitName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UnitName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NameError::Empty);
        }
        let normalized = s.replace('.', "/");
        if normalized.split('/').any(str::is_empty) {
            return Err(NameError::EmptySegment(s.to_string()));
        }
        if let Some(c) = normalized.chars().find(|c| matches!(c, ';' | '[' | '<' | '>')) {
            return Err(NameError::InvalidChar {
                name: s.to_string(),
                found: c,
            });
        }
        Ok(Self(normalized))
    }
}

impl AsRef<str> for UnitName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors related to unit identifiers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// Empty identifier
    #[error("unit name is empty")]
    Empty,

    /// Empty package or class segment
    #[error("unit name '{0}' contains an empty segment")]
    EmptySegment(String),

    /// Character not allowed in an internal name
    #[error("unit name '{name}' contains invalid character {found:?}")]
    InvalidChar { name: String, found: char },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> UnitName {
        s.parse().unwrap()
    }

    #[test]
    fn name_parses_dotted_and_slashed() {
        assert_eq!(name("com.host.Server"), name("com/host/Server"));
        assert_eq!(name("com.host.Server").as_str(), "com/host/Server");
    }

    #[test]
    fn name_rejects_bad_input() {
        assert_eq!(UnitName::new(""), Err(NameError::Empty));
        assert!(matches!(UnitName::new("a//B"), Err(NameError::EmptySegment(_))));
        assert!(matches!(UnitName::new("a/B;"), Err(NameError::InvalidChar { .. })));
    }

    #[test]
    fn name_parent_chain() {
        let deep = name("a/b/Outer$Inner$Deep");
        assert!(deep.is_nested());
        assert_eq!(deep.parent(), Some(name("a/b/Outer$Inner")));
        assert_eq!(deep.outermost(), name("a/b/Outer"));
        assert_eq!(
            deep.ancestors().collect::<Vec<_>>(),
            vec![name("a/b/Outer$Inner"), name("a/b/Outer")]
        );
        assert_eq!(name("a/b/Outer").parent(), None);
    }

    #[test]
    fn name_dollar_in_package_is_not_nesting() {
        let n = name("a$b/Top");
        assert!(!n.is_nested());
        assert_eq!(n.outermost(), n);
    }

    #[test]
    fn name_edge_dollars_are_not_nesting() {
        assert!(!name("a/$Proxy").is_nested());
        assert!(!name("a/Trailing$").is_nested());
    }

    #[test]
    fn name_ancestor_relation() {
        let outer = name("a/Outer");
        assert!(outer.is_ancestor_of(&name("a/Outer$1")));
        assert!(outer.is_ancestor_of(&name("a/Outer$A$B")));
        assert!(!outer.is_ancestor_of(&outer));
        assert!(!outer.is_ancestor_of(&name("a/OuterSibling")));
        assert!(!outer.is_ancestor_of(&name("a/OuterX$Y")));
    }

    #[test]
    fn name_entry_names() {
        let n = name("com/host/Server$Worker");
        assert_eq!(n.entry_name(), "com/host/Server$Worker.class");
        assert_eq!(UnitName::from_entry_name(&n.entry_name()), Some(n));
        assert_eq!(UnitName::from_entry_name("META-INF/MANIFEST.MF"), None);
        assert_eq!(UnitName::from_entry_name("com/host/"), None);
        assert_eq!(UnitName::from_entry_name("META-INF/versions/9/x.y.class"), None);
    }

    #[test]
    fn name_parts() {
        let n = name("com/host/Server");
        assert_eq!(n.package(), "com/host");
        assert_eq!(n.simple_name(), "Server");
        assert!(n.is_within("com/host/"));
        assert!(!n.is_within("com/other/"));
        assert_eq!(n.descriptor(), "Lcom/host/Server;");
        assert_eq!(name("Top").package(), "");
    }
}

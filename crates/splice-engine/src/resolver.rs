//! Runtime unit resolution
//!
//! Synthesis rules are skipped when the runtime already loads a unit with
//! the rule's current tag. Where "the runtime" looks is injected through
//! [`UnitResolver`]; the default [`ArchiveResolver`] searches a classpath of
//! archives and directories.

use std::fs;
use std::path::{Path, PathBuf};

use splice_unit::{ClassFile, TagSite, UnitName, VersionTag};

use crate::container::Container;

/// What the runtime knows about a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitMetadata {
    pub name: UnitName,
    /// Class-level version tags
    pub tags: Vec<VersionTag>,
}

impl UnitMetadata {
    /// Read metadata from unit bytes
    ///
    /// Returns `None` if the bytes are not a well-formed unit.
    #[must_use]
    pub fn from_bytes(name: UnitName, bytes: &[u8]) -> Option<Self> {
        let class = ClassFile::parse(bytes).ok()?;
        let tags = class.tags(TagSite::Class).ok()?;
        Some(Self { name, tags })
    }

    /// Tag with the given name, if present
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&VersionTag> {
        self.tags.iter().find(|t| t.name() == name)
    }

    /// Whether the unit carries exactly `tag`
    #[must_use]
    pub fn has_tag(&self, tag: &VersionTag) -> bool {
        self.tag(tag.name()) == Some(tag)
    }
}

/// Resolves units in the host's runtime environment
#[cfg_attr(test, mockall::automock)]
pub trait UnitResolver {
    /// Metadata for `unit`, or `None` if the runtime cannot load it
    fn resolve(&self, unit: &UnitName) -> Option<UnitMetadata>;
}

/// Resolver over archives and directories, searched in order
#[derive(Debug, Clone, Default)]
pub struct ArchiveResolver {
    classpath: Vec<PathBuf>,
}

impl ArchiveResolver {
    /// Create resolver over `classpath`
    #[inline]
    #[must_use]
    pub fn new(classpath: Vec<PathBuf>) -> Self {
        Self { classpath }
    }

    /// Searched locations
    #[inline]
    #[must_use]
    pub fn classpath(&self) -> &[PathBuf] {
        &self.classpath
    }

    fn lookup(location: &Path, unit: &UnitName) -> Option<Vec<u8>> {
        if location.is_dir() {
            return fs::read(location.join(unit.entry_name())).ok();
        }
        match Container::open(location).and_then(|mut c| c.read_unit(unit)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!("Skipping classpath entry {}: {}", location.display(), e);
                None
            }
        }
    }
}

impl UnitResolver for ArchiveResolver {
    fn resolve(&self, unit: &UnitName) -> Option<UnitMetadata> {
        self.classpath.iter().find_map(|location| {
            let bytes = Self::lookup(location, unit)?;
            let metadata = UnitMetadata::from_bytes(unit.clone(), &bytes);
            if metadata.is_none() {
                tracing::warn!("Unit {} in {} is malformed", unit, location.display());
            }
            metadata
        })
    }
}

//! Companion package
//!
//! The engine ships its own runtime units (the interception proxies, the
//! tag carrier) in a companion archive. Units under the configured prefixes
//! are grouped by their top-level unit; a group is injected as a whole and
//! replaces every unit the container holds for that top-level identifier.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use splice_unit::{ClassFile, ContentHash, TagSite, UnitName, VersionTag};

use crate::container::Container;
use crate::error::EngineResult;

/// Units sharing one top-level identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitGroup {
    units: BTreeMap<UnitName, Vec<u8>>,
}

impl UnitGroup {
    /// Add a unit to the group
    pub fn insert(&mut self, unit: UnitName, bytes: Vec<u8>) {
        self.units.insert(unit, bytes);
    }

    /// Units in name order (top-level unit first)
    pub fn units(&self) -> impl Iterator<Item = (&UnitName, &[u8])> {
        self.units.iter().map(|(name, bytes)| (name, bytes.as_slice()))
    }

    /// Number of units
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the group holds no units
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Class-level tag `carrier` on the top-level unit `root`
    #[must_use]
    pub fn tag(&self, root: &UnitName, carrier: &str) -> Option<VersionTag> {
        let bytes = self.units.get(root)?;
        ClassFile::parse(bytes)
            .and_then(|class| class.tag(TagSite::Class, carrier))
            .ok()
            .flatten()
    }

    /// Digest over every unit's name and bytes
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        let mut buffer = Vec::new();
        for (name, bytes) in &self.units {
            buffer.extend_from_slice(name.as_str().as_bytes());
            buffer.push(0);
            buffer.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
            buffer.extend_from_slice(bytes);
        }
        ContentHash::compute(&buffer)
    }
}

/// Decision for one companion group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupDecision {
    /// Container already holds the current definition
    Current,
    /// Container holds nothing for this identifier
    Missing,
    /// Container holds an older or different definition
    Stale,
}

/// Units loaded from the companion archive
#[derive(Debug, Clone)]
pub struct CompanionPackage {
    path: PathBuf,
    carrier: String,
    groups: BTreeMap<UnitName, UnitGroup>,
    carrier_bytes: Option<Vec<u8>>,
}

impl CompanionPackage {
    /// Load units under `prefixes` and the tag carrier from `path`
    ///
    /// # Errors
    /// Returns error if the archive cannot be opened or read
    pub fn load(path: &Path, prefixes: &[String], carrier: &str) -> EngineResult<Self> {
        let mut container = Container::open(path)?;
        let carrier_name = carrier.parse::<UnitName>().ok();
        let mut groups: BTreeMap<UnitName, UnitGroup> = BTreeMap::new();
        let mut carrier_bytes = None;

        for entry in container.entries()? {
            let Some(unit) = entry.kind.unit() else {
                continue;
            };
            if carrier_name.as_ref() == Some(unit) {
                carrier_bytes = Some(container.read(entry.index)?);
                continue;
            }
            if prefixes.iter().any(|p| unit.is_within(p)) {
                let bytes = container.read(entry.index)?;
                groups.entry(unit.outermost()).or_default().insert(unit.clone(), bytes);
            }
        }

        tracing::debug!(
            "Loaded companion {}: {} groups, carrier {}",
            path.display(),
            groups.len(),
            if carrier_bytes.is_some() { "present" } else { "absent" }
        );
        Ok(Self {
            path: path.to_path_buf(),
            carrier: carrier.to_string(),
            groups,
            carrier_bytes,
        })
    }

    /// Archive path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Groups keyed by top-level identifier
    #[inline]
    #[must_use]
    pub fn groups(&self) -> &BTreeMap<UnitName, UnitGroup> {
        &self.groups
    }

    /// Tag carrier unit bytes, if the package ships one
    #[inline]
    #[must_use]
    pub fn carrier_bytes(&self) -> Option<&[u8]> {
        self.carrier_bytes.as_deref()
    }

    /// Whether `unit` belongs to a companion group
    #[must_use]
    pub fn manages(&self, unit: &UnitName) -> bool {
        self.groups.contains_key(&unit.outermost())
    }

    /// Compare a companion group against what the container holds
    ///
    /// A group whose top-level unit carries a tag is current only when the
    /// installed top-level unit has the same tag. Untagged groups fall back
    /// to comparing content digests.
    #[must_use]
    pub fn decide(&self, root: &UnitName, installed: Option<&UnitGroup>) -> GroupDecision {
        let Some(installed) = installed.filter(|g| !g.is_empty()) else {
            return GroupDecision::Missing;
        };
        let Some(group) = self.groups.get(root) else {
            return GroupDecision::Current;
        };
        let current = match group.tag(root, &self.carrier) {
            Some(tag) => installed.tag(root, &self.carrier).as_ref() == Some(&tag),
            None => installed.hash() == group.hash(),
        };
        if current {
            GroupDecision::Current
        } else {
            GroupDecision::Stale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerWriter;
    use pretty_assertions::assert_eq;
    use splice_unit::UnitBuilder;

    const CARRIER: &str = "splice/runtime/PatchVersion";

    fn tagged(name: &str, version: &str) -> Vec<u8> {
        UnitBuilder::new(name)
            .tag(VersionTag::new(CARRIER, version))
            .dump()
            .unwrap()
    }

    fn plain(name: &str) -> Vec<u8> {
        UnitBuilder::new(name).dump().unwrap()
    }

    fn name(s: &str) -> UnitName {
        s.parse().unwrap()
    }

    fn package(entries: &[(&str, Vec<u8>)]) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let mut writer = ContainerWriter::new(tmp.path().to_path_buf(), tmp.as_file_mut());
        for (entry, bytes) in entries {
            writer.add(entry, bytes).unwrap();
        }
        writer.finish().unwrap();
        tmp
    }

    #[test]
    fn companion_groups_by_top_level_unit() {
        let tmp = package(&[
            ("splice/runtime/Hooks.class", tagged("splice/runtime/Hooks", "1")),
            ("splice/runtime/Hooks$1.class", plain("splice/runtime/Hooks$1")),
            ("splice/runtime/Proxy.class", plain("splice/runtime/Proxy")),
            ("splice/runtime/PatchVersion.class", plain(CARRIER)),
            ("other/Tool.class", plain("other/Tool")),
        ]);
        let companion =
            CompanionPackage::load(tmp.path(), &["splice/runtime/".to_string()], CARRIER).unwrap();

        let roots: Vec<_> = companion.groups().keys().map(UnitName::as_str).collect();
        assert_eq!(roots, vec!["splice/runtime/Hooks", "splice/runtime/Proxy"]);
        assert_eq!(companion.groups()[&name("splice/runtime/Hooks")].len(), 2);
        assert!(companion.carrier_bytes().is_some());
        assert!(companion.manages(&name("splice/runtime/Hooks$2")));
        assert!(!companion.manages(&name("other/Tool")));
    }

    #[test]
    fn companion_tagged_group_decision() {
        let tmp = package(&[("splice/runtime/Hooks.class", tagged("splice/runtime/Hooks", "2"))]);
        let companion =
            CompanionPackage::load(tmp.path(), &["splice/".to_string()], CARRIER).unwrap();
        let root = name("splice/runtime/Hooks");

        let mut same = UnitGroup::default();
        same.insert(root.clone(), tagged("splice/runtime/Hooks", "2"));
        let mut old = UnitGroup::default();
        old.insert(root.clone(), tagged("splice/runtime/Hooks", "1"));
        let mut untagged = UnitGroup::default();
        untagged.insert(root.clone(), plain("splice/runtime/Hooks"));

        assert_eq!(companion.decide(&root, None), GroupDecision::Missing);
        assert_eq!(companion.decide(&root, Some(&same)), GroupDecision::Current);
        assert_eq!(companion.decide(&root, Some(&old)), GroupDecision::Stale);
        assert_eq!(companion.decide(&root, Some(&untagged)), GroupDecision::Stale);
    }

    #[test]
    fn companion_untagged_group_compares_digests() {
        let tmp = package(&[
            ("splice/runtime/Proxy.class", plain("splice/runtime/Proxy")),
            ("splice/runtime/Proxy$1.class", plain("splice/runtime/Proxy$1")),
        ]);
        let companion =
            CompanionPackage::load(tmp.path(), &["splice/".to_string()], CARRIER).unwrap();
        let root = name("splice/runtime/Proxy");

        let identical = companion.groups()[&root].clone();
        let mut partial = UnitGroup::default();
        partial.insert(root.clone(), plain("splice/runtime/Proxy"));

        assert_eq!(companion.decide(&root, Some(&identical)), GroupDecision::Current);
        assert_eq!(companion.decide(&root, Some(&partial)), GroupDecision::Stale);
    }

    #[test]
    fn companion_without_prefixes_only_carries_carrier() {
        let tmp = package(&[
            ("splice/runtime/PatchVersion.class", plain(CARRIER)),
            ("splice/runtime/Hooks.class", plain("splice/runtime/Hooks")),
        ]);
        let companion = CompanionPackage::load(tmp.path(), &[], CARRIER).unwrap();
        assert!(companion.groups().is_empty());
        assert!(companion.carrier_bytes().is_some());
    }
}

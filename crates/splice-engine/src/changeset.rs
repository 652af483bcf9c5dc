//! Pending change set
//!
//! Collects everything one run will write: rewritten entries, wholly new
//! units, and the identifiers whose old definitions must not be copied
//! through. Built during Scanning and Deciding, consumed by Writing.

use std::collections::{BTreeMap, BTreeSet};

use splice_unit::UnitName;

/// Origin of an added unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddedKind {
    /// Tag carrier annotation type
    Carrier,
    /// Output of a synthesis rule
    Synthesized,
    /// Copied from the companion package
    Companion,
}

/// Unit written into the new container that was not rewritten in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedUnit {
    pub name: UnitName,
    pub kind: AddedKind,
    pub bytes: Vec<u8>,
}

/// Per-run record of container changes
#[derive(Debug, Default)]
pub struct PendingChangeSet {
    changed: BTreeMap<UnitName, Vec<u8>>,
    added: Vec<AddedUnit>,
    excluded: BTreeSet<UnitName>,
}

impl PendingChangeSet {
    /// Empty change set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record rewritten bytes for an existing entry
    ///
    /// A later change for the same unit replaces the earlier one.
    pub fn change(&mut self, unit: UnitName, bytes: Vec<u8>) {
        self.changed.insert(unit, bytes);
    }

    /// Queue a unit to be written ahead of pass-through entries
    pub fn add(&mut self, name: UnitName, kind: AddedKind, bytes: Vec<u8>) {
        self.added.push(AddedUnit { name, kind, bytes });
    }

    /// Exclude a unit and all of its nested units from pass-through
    pub fn exclude(&mut self, unit: UnitName) {
        self.excluded.insert(unit);
    }

    /// Whether `unit` or any unit enclosing it is excluded
    #[must_use]
    pub fn is_excluded(&self, unit: &UnitName) -> bool {
        self.excluded.contains(unit) || unit.ancestors().any(|a| self.excluded.contains(&a))
    }

    /// Rewritten bytes for an entry, if any
    #[inline]
    #[must_use]
    pub fn changed(&self, unit: &UnitName) -> Option<&[u8]> {
        self.changed.get(unit).map(Vec::as_slice)
    }

    /// Rewritten entries in name order
    pub fn changes(&self) -> impl Iterator<Item = (&UnitName, &[u8])> {
        self.changed.iter().map(|(name, bytes)| (name, bytes.as_slice()))
    }

    /// Added units in queue order
    #[inline]
    #[must_use]
    pub fn added(&self) -> &[AddedUnit] {
        &self.added
    }

    /// Number of added units of one kind
    #[must_use]
    pub fn added_count(&self, kind: AddedKind) -> usize {
        self.added.iter().filter(|u| u.kind == kind).count()
    }

    /// Excluded identifiers
    pub fn exclusions(&self) -> impl Iterator<Item = &UnitName> {
        self.excluded.iter()
    }

    /// Number of rewritten entries
    #[inline]
    #[must_use]
    pub fn changed_len(&self) -> usize {
        self.changed.len()
    }

    /// Whether the run would leave the container as it is
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty()
    }
}

//! Rule registry
//!
//! Provides [`RuleRegistry`], built once at startup, and [`FrozenRules`], the
//! read-only view a patch run works from.

use std::collections::BTreeMap;

use splice_unit::UnitName;
use tracing::debug;

use crate::error::RegistryError;
use crate::rule::{StructuralRule, SynthesisRule, TransformationRule};

/// Mutable registry of `unit → rule`
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<UnitName, TransformationRule>,
}

impl RuleRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule under its target
    ///
    /// # Errors
    /// Returns [`RegistryError::Duplicate`] if the target already has a rule
    pub fn register(&mut self, rule: TransformationRule) -> Result<(), RegistryError> {
        if let Some(existing) = self.rules.get(rule.target()) {
            return Err(RegistryError::Duplicate {
                target: rule.target().clone(),
                existing: existing.name().to_string(),
            });
        }
        debug!(rule = rule.name(), target = %rule.target(), "rule registered");
        self.rules.insert(rule.target().clone(), rule);
        Ok(())
    }

    /// Register several rules, stopping at the first duplicate
    ///
    /// # Errors
    /// Returns [`RegistryError::Duplicate`] on the first conflicting target
    pub fn register_all(
        &mut self,
        rules: impl IntoIterator<Item = TransformationRule>,
    ) -> Result<(), RegistryError> {
        rules.into_iter().try_for_each(|rule| self.register(rule))
    }

    /// Get number of registered rules
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// End registration
    #[must_use]
    pub fn freeze(self) -> FrozenRules {
        FrozenRules { rules: self.rules }
    }
}

/// Read-only rule set for one patch run
#[derive(Debug, Default)]
pub struct FrozenRules {
    rules: BTreeMap<UnitName, TransformationRule>,
}

impl FrozenRules {
    /// Rule registered for `unit`
    #[inline]
    #[must_use]
    pub fn get(&self, unit: &UnitName) -> Option<&TransformationRule> {
        self.rules.get(unit)
    }

    /// Structural rule registered for `unit`
    #[must_use]
    pub fn structural(&self, unit: &UnitName) -> Option<&dyn StructuralRule> {
        match self.rules.get(unit)? {
            TransformationRule::Structural(rule) => Some(rule.as_ref()),
            TransformationRule::Synthesis(_) => None,
        }
    }

    /// All synthesis rules, ordered by target
    pub fn synthesis(&self) -> impl Iterator<Item = &dyn SynthesisRule> {
        self.rules.values().filter_map(|rule| match rule {
            TransformationRule::Synthesis(rule) => Some(rule.as_ref()),
            TransformationRule::Structural(_) => None,
        })
    }

    /// All rules, ordered by target
    pub fn iter(&self) -> impl Iterator<Item = &TransformationRule> {
        self.rules.values()
    }

    /// Get number of rules
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if there are no rules
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

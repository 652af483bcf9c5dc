//! Transformation rule variants
//!
//! A rule either edits an existing unit through its structural model
//! ([`StructuralRule`]) or produces a unit's bytes from nothing
//! ([`SynthesisRule`]). The engine only switches on [`TransformationRule`]
//! at the point of invocation.

use std::fmt::Debug;

use splice_unit::{ClassFile, UnitBuilder, UnitName, UnitResult, VersionTag};

use crate::error::RuleError;

/// Result of applying a structural rule to one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Unit already carries the rule's current tag
    Unchanged,
    /// New unit bytes
    Patched(Vec<u8>),
    /// Expected structure not found; the unit stays as it is
    Inapplicable(String),
}

impl RuleOutcome {
    /// Whether the unit was rewritten
    #[inline]
    #[must_use]
    pub fn is_patched(&self) -> bool {
        matches!(self, Self::Patched(_))
    }
}

/// Rule that edits an existing unit
pub trait StructuralRule: Send + Sync + Debug {
    /// Rule identity used in logs and reports
    fn name(&self) -> &str;

    /// Unit this rule applies to
    fn target(&self) -> &UnitName;

    /// Tag attached to every element this rule edits
    fn tag(&self) -> &VersionTag;

    /// Apply to a parsed unit
    ///
    /// `raw` holds the unit's original bytes for rules that need them.
    ///
    /// # Errors
    /// Returns error if editing or re-serializing the unit fails
    fn apply(&self, model: ClassFile, raw: &[u8]) -> Result<RuleOutcome, RuleError>;
}

/// Rule that emits a whole unit with no parse step
///
/// The emitted bytes must already carry [`SynthesisRule::tag`] at class level.
pub trait SynthesisRule: Send + Sync + Debug {
    /// Rule identity used in logs and reports
    fn name(&self) -> &str;

    /// Unit this rule produces
    fn target(&self) -> &UnitName;

    /// Tag embedded in the emitted unit
    fn tag(&self) -> &VersionTag;

    /// Emit unit bytes
    ///
    /// # Errors
    /// Returns error if the unit cannot be built
    fn dump(&self) -> Result<Vec<u8>, RuleError>;

    /// Unit whose old definition (and nested units) the output replaces
    #[inline]
    fn supersedes(&self) -> UnitName {
        self.target().clone()
    }
}

/// Either rule variant
#[derive(Debug)]
pub enum TransformationRule {
    Structural(Box<dyn StructuralRule>),
    Synthesis(Box<dyn SynthesisRule>),
}

impl TransformationRule {
    /// Box a structural rule
    #[inline]
    pub fn structural(rule: impl StructuralRule + 'static) -> Self {
        Self::Structural(Box::new(rule))
    }

    /// Box a synthesis rule
    #[inline]
    pub fn synthesis(rule: impl SynthesisRule + 'static) -> Self {
        Self::Synthesis(Box::new(rule))
    }

    /// Rule identity
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Structural(rule) => rule.name(),
            Self::Synthesis(rule) => rule.name(),
        }
    }

    /// Unit the rule is registered for
    #[must_use]
    pub fn target(&self) -> &UnitName {
        match self {
            Self::Structural(rule) => rule.target(),
            Self::Synthesis(rule) => rule.target(),
        }
    }

    /// Current tag of the rule
    #[must_use]
    pub fn tag(&self) -> &VersionTag {
        match self {
            Self::Structural(rule) => rule.tag(),
            Self::Synthesis(rule) => rule.tag(),
        }
    }
}

type Emit = dyn Fn(UnitBuilder) -> UnitResult<UnitBuilder> + Send + Sync;

/// Synthesis rule that assembles its unit with [`UnitBuilder`]
///
/// The class-level tag is attached automatically.
pub struct BuilderSynthesis {
    name: String,
    target: UnitName,
    tag: VersionTag,
    supersedes: Option<UnitName>,
    emit: Box<Emit>,
}

impl BuilderSynthesis {
    /// Create a synthesis rule; `emit` adds members to the prepared builder
    pub fn new<F>(name: impl Into<String>, target: UnitName, tag: VersionTag, emit: F) -> Self
    where
        F: Fn(UnitBuilder) -> UnitResult<UnitBuilder> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            target,
            tag,
            supersedes: None,
            emit: Box::new(emit),
        }
    }

    /// Replace a unit other than the target
    #[must_use]
    pub fn with_supersedes(mut self, unit: UnitName) -> Self {
        self.supersedes = Some(unit);
        self
    }
}

impl Debug for BuilderSynthesis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderSynthesis")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl SynthesisRule for BuilderSynthesis {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> &UnitName {
        &self.target
    }

    fn tag(&self) -> &VersionTag {
        &self.tag
    }

    fn dump(&self) -> Result<Vec<u8>, RuleError> {
        let builder = UnitBuilder::new(self.target.as_str()).tag(self.tag.clone());
        Ok((self.emit)(builder)?.dump()?)
    }

    fn supersedes(&self) -> UnitName {
        self.supersedes.clone().unwrap_or_else(|| self.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_unit::{access, CodeBody, TagSite};

    fn synthesis() -> BuilderSynthesis {
        BuilderSynthesis::new(
            "hello",
            "gen/Hello".parse().unwrap(),
            VersionTag::new("splice/runtime/PatchVersion", "1"),
            |b| Ok(b.method(access::PUBLIC, "run", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))),
        )
    }

    #[test]
    fn synthesis_embeds_tag() {
        let rule = synthesis();
        let class = ClassFile::parse(&rule.dump().unwrap()).unwrap();
        assert_eq!(class.name().unwrap(), "gen/Hello");
        assert!(class.has_tag(TagSite::Class, rule.tag()).unwrap());
        assert_eq!(class.find_method("run", "()V"), Some(0));
    }

    #[test]
    fn synthesis_supersedes_defaults_to_target() {
        let rule = synthesis();
        assert_eq!(rule.supersedes(), *rule.target());

        let rule = rule.with_supersedes("gen/Old".parse().unwrap());
        assert_eq!(rule.supersedes().as_str(), "gen/Old");
    }

    #[test]
    fn synthesis_emit_error_propagates() {
        let rule = BuilderSynthesis::new(
            "broken",
            "gen/Broken".parse().unwrap(),
            VersionTag::new("splice/runtime/PatchVersion", "1"),
            |_| Err(splice_unit::UnitError::malformed("nope")),
        );
        assert!(matches!(rule.dump(), Err(RuleError::Unit(_))));
    }

    #[test]
    fn variant_accessors() {
        let rule = TransformationRule::synthesis(synthesis());
        assert_eq!(rule.name(), "hello");
        assert_eq!(rule.target().as_str(), "gen/Hello");
        assert_eq!(rule.tag().version(), "1");
    }

    #[test]
    fn outcome_is_patched() {
        assert!(RuleOutcome::Patched(vec![]).is_patched());
        assert!(!RuleOutcome::Unchanged.is_patched());
        assert!(!RuleOutcome::Inapplicable("x".into()).is_patched());
    }
}

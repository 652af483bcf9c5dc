//! Member-editing structural rule
//!
//! [`MethodRule`] implements the full structural protocol for one method:
//! locate it by name and descriptor, skip it if already current, strip stale
//! tags, edit, tag, re-serialize. Only the edit itself is pluggable.

use std::fmt::Debug;

use splice_unit::{ClassFile, TagSite, UnitName, VersionTag};
use tracing::debug;

use crate::error::RuleError;
use crate::rule::{RuleOutcome, StructuralRule};

/// The pluggable part of a [`MethodRule`]
pub trait MethodEdit: Send + Sync + Debug {
    /// Edit method `index` of `class` in place
    ///
    /// # Errors
    /// Returns error if the method cannot be edited
    fn edit(&self, class: &mut ClassFile, index: usize) -> Result<(), RuleError>;
}

/// Structural rule editing one method of one unit
#[derive(Debug)]
pub struct MethodRule<E> {
    name: String,
    target: UnitName,
    method: String,
    descriptor: String,
    tag: VersionTag,
    edit: E,
}

impl<E: MethodEdit> MethodRule<E> {
    /// Create a rule editing `target.method descriptor`
    pub fn new(
        name: impl Into<String>,
        target: UnitName,
        method: impl Into<String>,
        descriptor: impl Into<String>,
        tag: VersionTag,
        edit: E,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            method: method.into(),
            descriptor: descriptor.into(),
            tag,
            edit,
        }
    }

    /// Method name and descriptor this rule edits
    #[inline]
    #[must_use]
    pub fn member(&self) -> (&str, &str) {
        (&self.method, &self.descriptor)
    }

    /// The edit
    #[inline]
    #[must_use]
    pub fn edit(&self) -> &E {
        &self.edit
    }
}

impl<E: MethodEdit> StructuralRule for MethodRule<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> &UnitName {
        &self.target
    }

    fn tag(&self) -> &VersionTag {
        &self.tag
    }

    fn apply(&self, mut model: ClassFile, _raw: &[u8]) -> Result<RuleOutcome, RuleError> {
        let Some(index) = model.find_method(&self.method, &self.descriptor) else {
            return Ok(RuleOutcome::Inapplicable(format!(
                "method {}{} not found in {}",
                self.method, self.descriptor, self.target
            )));
        };
        let site = TagSite::Method(index);

        if model.has_tag(site, &self.tag)? {
            debug!(rule = %self.name, unit = %self.target, "already at {}", self.tag);
            return Ok(RuleOutcome::Unchanged);
        }

        let stale = model.strip_tags(site, self.tag.name())?;
        self.edit.edit(&mut model, index)?;
        model.attach_tag(site, &self.tag)?;
        debug!(
            rule = %self.name,
            unit = %self.target,
            method = %model.method_signature(index),
            stale,
            "method edited"
        );
        Ok(RuleOutcome::Patched(model.to_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use splice_unit::{access, CodeBody, UnitBuilder};

    const CARRIER: &str = "splice/runtime/PatchVersion";

    /// Prepends four `nop`s
    #[derive(Debug)]
    struct Pad;

    impl MethodEdit for Pad {
        fn edit(&self, class: &mut ClassFile, index: usize) -> Result<(), RuleError> {
            let mut code = class
                .method_code(index)?
                .ok_or_else(|| RuleError::failed("pad", "abstract method"))?;
            code.insert_prologue(&class.pool, &[0, 0, 0, 0], 0)?;
            class.set_method_code(index, &code)?;
            Ok(())
        }
    }

    fn unit() -> Vec<u8> {
        UnitBuilder::new("host/Server")
            .method(access::PUBLIC, "<init>", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))
            .method(access::PUBLIC, "accept", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))
            .dump()
            .unwrap()
    }

    fn rule(version: &str) -> MethodRule<Pad> {
        MethodRule::new(
            "pad-accept",
            "host/Server".parse().unwrap(),
            "accept",
            "()V",
            VersionTag::new(CARRIER, version),
            Pad,
        )
    }

    fn apply(rule: &MethodRule<Pad>, bytes: &[u8]) -> RuleOutcome {
        rule.apply(ClassFile::parse(bytes).unwrap(), bytes).unwrap()
    }

    #[test]
    fn method_rule_patches_and_tags() {
        let RuleOutcome::Patched(bytes) = apply(&rule("1"), &unit()) else {
            panic!("expected patch");
        };
        let class = ClassFile::parse(&bytes).unwrap();
        let index = class.find_method("accept", "()V").unwrap();
        assert_eq!(class.method_code(index).unwrap().unwrap().code, vec![0, 0, 0, 0, 0xb1]);
        assert_eq!(
            class.tags(TagSite::Method(index)).unwrap(),
            vec![VersionTag::new(CARRIER, "1")]
        );
        // constructor untouched
        assert_eq!(class.method_code(0).unwrap().unwrap().code, vec![0xb1]);
    }

    #[test]
    fn method_rule_is_idempotent() {
        let RuleOutcome::Patched(bytes) = apply(&rule("1"), &unit()) else {
            panic!("expected patch");
        };
        assert_eq!(apply(&rule("1"), &bytes), RuleOutcome::Unchanged);
    }

    #[test]
    fn method_rule_upgrade_keeps_single_tag() {
        let RuleOutcome::Patched(v1) = apply(&rule("1"), &unit()) else {
            panic!("expected patch");
        };
        let RuleOutcome::Patched(v2) = apply(&rule("2"), &v1) else {
            panic!("expected patch");
        };
        let class = ClassFile::parse(&v2).unwrap();
        let index = class.find_method("accept", "()V").unwrap();
        let tags = class.tags(TagSite::Method(index)).unwrap();
        assert_eq!(tags, vec![VersionTag::new(CARRIER, "2")]);
    }

    #[test]
    fn method_rule_missing_member_is_inapplicable() {
        let rule = MethodRule::new(
            "pad-missing",
            "host/Server".parse().unwrap(),
            "accept",
            "(I)V",
            VersionTag::new(CARRIER, "1"),
            Pad,
        );
        assert!(matches!(apply(&rule, &unit()), RuleOutcome::Inapplicable(_)));
        assert_eq!(rule.member(), ("accept", "(I)V"));
    }

    #[test]
    fn method_rule_locates_by_signature_not_position() {
        let reordered = UnitBuilder::new("host/Server")
            .method(access::PUBLIC, "accept", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))
            .method(access::PUBLIC, "<init>", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))
            .dump()
            .unwrap();
        let RuleOutcome::Patched(bytes) = apply(&rule("1"), &reordered) else {
            panic!("expected patch");
        };
        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.method_code(0).unwrap().unwrap().code.len(), 5);
        assert_eq!(class.method_code(1).unwrap().unwrap().code.len(), 1);
    }
}

//! Version tag inspection

use std::fmt::{self, Display, Formatter};
use std::path::Path;

use splice_unit::{ClassFile, TagSite, UnitName, UnitResult, VersionTag};

use crate::container::Container;
use crate::error::EngineResult;

/// Tags found on one unit and its members
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitTags {
    pub class: Vec<VersionTag>,
    /// `(name + descriptor, tags)` for every tagged method
    pub methods: Vec<(String, Vec<VersionTag>)>,
    /// `(name + descriptor, tags)` for every tagged field
    pub fields: Vec<(String, Vec<VersionTag>)>,
}

impl UnitTags {
    /// Collect tags from a parsed unit
    ///
    /// # Errors
    /// Returns error if an annotation table is malformed
    pub fn collect(class: &ClassFile) -> UnitResult<Self> {
        let mut tags = Self {
            class: class.tags(TagSite::Class)?,
            ..Self::default()
        };
        for index in 0..class.methods.len() {
            let found = class.tags(TagSite::Method(index))?;
            if !found.is_empty() {
                tags.methods.push((class.method_signature(index), found));
            }
        }
        for (index, field) in class.fields.iter().enumerate() {
            let found = class.tags(TagSite::Field(index))?;
            if !found.is_empty() {
                let signature = format!(
                    "{}:{}",
                    class.pool.utf8(field.name_index)?,
                    class.pool.utf8(field.descriptor_index)?
                );
                tags.fields.push((signature, found));
            }
        }
        Ok(tags)
    }

    /// Whether no element carries a tag
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.class.is_empty() && self.methods.is_empty() && self.fields.is_empty()
    }
}

impl Display for UnitTags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for tag in &self.class {
            writeln!(f, "class {tag}")?;
        }
        for (kind, members) in [("method", &self.methods), ("field", &self.fields)] {
            for (signature, tags) in members {
                for tag in tags {
                    writeln!(f, "{kind} {signature} {tag}")?;
                }
            }
        }
        Ok(())
    }
}

/// Tags of `unit` inside the archive at `container`
///
/// Returns `None` if the archive has no such unit.
///
/// # Errors
/// Returns error if the archive cannot be read or the unit is malformed
pub fn inspect_tags(container: &Path, unit: &UnitName) -> EngineResult<Option<UnitTags>> {
    let mut container = Container::open(container)?;
    let Some(bytes) = container.read_unit(unit)? else {
        return Ok(None);
    };
    let class = ClassFile::parse(&bytes)?;
    Ok(Some(UnitTags::collect(&class)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_unit::{access, CodeBody, UnitBuilder};

    #[test]
    fn tags_collects_every_site() {
        let tag = VersionTag::new("splice/runtime/PatchVersion", "4");
        let mut class = UnitBuilder::new("host/net/Server")
            .tag(tag.clone())
            .field(access::PRIVATE, "port", "I")
            .method(access::PUBLIC, "start", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))
            .build()
            .unwrap();
        class.attach_tag(TagSite::Method(0), &tag).unwrap();
        class.attach_tag(TagSite::Field(0), &tag.with_version("5")).unwrap();

        let tags = UnitTags::collect(&class).unwrap();
        assert_eq!(tags.class, vec![tag.clone()]);
        assert_eq!(tags.methods, vec![("start()V".to_string(), vec![tag])]);
        assert_eq!(tags.fields[0].0, "port:I");

        let text = tags.to_string();
        assert!(text.contains("method start()V"));
        assert!(text.contains("field port:I"));
    }

    #[test]
    fn tags_empty_for_untagged_unit() {
        let class = UnitBuilder::new("host/Plain").build().unwrap();
        assert!(UnitTags::collect(&class).unwrap().is_empty());
    }
}

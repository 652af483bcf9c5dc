//! Version tags
//!
//! A [`VersionTag`] is a runtime-visible annotation whose type is the tag name
//! and whose single string element `version` holds an opaque version string.
//! Attaching a tag always removes earlier tags of the same name first, so at
//! most one tag per name exists on any element.

use std::fmt::{self, Display, Formatter};

use crate::annotation::{self, Annotation};
use crate::class::{Attribute, ClassFile};
use crate::error::{UnitError, UnitResult};
use crate::pool::ConstantPool;

/// Element name holding the version string
pub const VERSION_ELEMENT: &str = "version";

/// `(name, version)` marker embedded in unit metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionTag {
    name: String,
    version: String,
}

impl VersionTag {
    /// Create a tag; `name` is the internal name of the annotation type
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Tag name (annotation type internal name)
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque version string
    #[inline]
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Annotation type descriptor for this tag
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> String {
        descriptor_of(&self.name)
    }

    /// Same name, different version
    #[must_use]
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self::new(self.name.clone(), version)
    }
}

impl Display for VersionTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "@{}(version={:?})", self.name, self.version)
    }
}

fn descriptor_of(name: &str) -> String {
    format!("L{name};")
}

/// Element of a unit that can carry tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSite {
    /// The class itself
    Class,
    /// Method at index
    Method(usize),
    /// Field at index
    Field(usize),
}

impl ClassFile {
    fn site_attributes(&self, site: TagSite) -> UnitResult<&[Attribute]> {
        match site {
            TagSite::Class => Some(self.attributes.as_slice()),
            TagSite::Method(i) => self.methods.get(i).map(|m| m.attributes.as_slice()),
            TagSite::Field(i) => self.fields.get(i).map(|f| f.attributes.as_slice()),
        }
        .ok_or_else(|| UnitError::malformed(format!("no such tag site {site:?}")))
    }

    fn site_parts(&mut self, site: TagSite) -> UnitResult<(&mut Vec<Attribute>, &mut ConstantPool)> {
        let attributes = match site {
            TagSite::Class => Some(&mut self.attributes),
            TagSite::Method(i) => self.methods.get_mut(i).map(|m| &mut m.attributes),
            TagSite::Field(i) => self.fields.get_mut(i).map(|f| &mut f.attributes),
        }
        .ok_or_else(|| UnitError::malformed(format!("no such tag site {site:?}")))?;
        Ok((attributes, &mut self.pool))
    }

    /// All version tags on an element, in declaration order
    ///
    /// Any annotation carrying a string `version` element counts as a tag.
    ///
    /// # Errors
    /// Returns error if the site does not exist or annotations are malformed
    pub fn tags(&self, site: TagSite) -> UnitResult<Vec<VersionTag>> {
        let attributes = self.site_attributes(site)?;
        let mut tags = Vec::new();
        for a in annotation::read(attributes, &self.pool)? {
            let Some(version) = a.string_element(&self.pool, VERSION_ELEMENT)? else {
                continue;
            };
            let descriptor = a.type_descriptor(&self.pool)?;
            let name = descriptor
                .strip_prefix('L')
                .and_then(|d| d.strip_suffix(';'))
                .unwrap_or(&descriptor)
                .to_string();
            tags.push(VersionTag::new(name, version));
        }
        Ok(tags)
    }

    /// The authoritative tag named `name`, if present
    ///
    /// # Errors
    /// Returns error if the site does not exist or annotations are malformed
    pub fn tag(&self, site: TagSite, name: &str) -> UnitResult<Option<VersionTag>> {
        Ok(self.tags(site)?.into_iter().find(|t| t.name() == name))
    }

    /// Whether the element carries exactly `tag` (same name and version)
    ///
    /// # Errors
    /// Returns error if the site does not exist or annotations are malformed
    pub fn has_tag(&self, site: TagSite, tag: &VersionTag) -> UnitResult<bool> {
        Ok(self.tag(site, tag.name())?.as_ref() == Some(tag))
    }

    /// Remove every tag named `name`, returning how many were removed
    ///
    /// # Errors
    /// Returns error if the site does not exist or annotations are malformed
    pub fn strip_tags(&mut self, site: TagSite, name: &str) -> UnitResult<usize> {
        let descriptor = descriptor_of(name);
        let (attributes, pool) = self.site_parts(site)?;
        let mut annotations = annotation::read(attributes, pool)?;
        let before = annotations.len();
        annotations.retain(|a| !pool.utf8_eq(a.type_index(), &descriptor));
        let removed = before - annotations.len();
        if removed > 0 {
            annotation::write(attributes, pool, &annotations)?;
        }
        Ok(removed)
    }

    /// Replace any tag with the same name by `tag`
    ///
    /// # Errors
    /// Returns error if the site does not exist, annotations are malformed,
    /// or the constant pool is full
    pub fn attach_tag(&mut self, site: TagSite, tag: &VersionTag) -> UnitResult<()> {
        self.strip_tags(site, tag.name())?;
        let (attributes, pool) = self.site_parts(site)?;
        let mut annotations = annotation::read(attributes, pool)?;
        annotations.push(Annotation::with_string(
            pool,
            &tag.descriptor(),
            VERSION_ELEMENT,
            tag.version(),
        )?);
        annotation::write(attributes, pool, &annotations)
    }
}

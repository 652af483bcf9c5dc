//! Binary unit builder
//!
//! Emits class files from scratch for units that have no compiled form to
//! parse. Callers assemble instruction bytes themselves; constants they need
//! are interned through [`UnitBuilder::pool_mut`] before the code is added.

use crate::annotation::{self, Annotation};
use crate::class::{access, Attribute, ClassFile, Member};
use crate::code::{CodeAttribute, CODE};
use crate::error::{UnitError, UnitResult};
use crate::pool::ConstantPool;
use crate::tag::{TagSite, VersionTag};

/// Default class-file major version (Java 8)
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

const OBJECT: &str = "java/lang/Object";
const ANNOTATION_INTERFACE: &str = "java/lang/annotation/Annotation";
const RETENTION: &str = "Ljava/lang/annotation/Retention;";
const RETENTION_POLICY: &str = "Ljava/lang/annotation/RetentionPolicy;";

/// Method body: stack limits plus raw instruction bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBody {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

impl CodeBody {
    #[inline]
    #[must_use]
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
        }
    }
}

/// Builder for synthesized class files
///
/// The first failure is remembered and reported by [`UnitBuilder::build`],
/// so calls can be chained without intermediate error handling.
#[derive(Debug)]
pub struct UnitBuilder {
    class: ClassFile,
    tags: Vec<VersionTag>,
    error: Option<UnitError>,
}

impl UnitBuilder {
    /// Public class extending `java/lang/Object`
    #[must_use]
    pub fn new(internal_name: &str) -> Self {
        let mut builder = Self {
            class: ClassFile {
                minor_version: 0,
                major_version: DEFAULT_MAJOR_VERSION,
                pool: ConstantPool::new(),
                access_flags: access::PUBLIC | access::SUPER,
                this_class: 0,
                super_class: 0,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                attributes: Vec::new(),
            },
            tags: Vec::new(),
            error: None,
        };
        builder.class.this_class = builder.try_intern(|p| p.intern_class(internal_name));
        builder.class.super_class = builder.try_intern(|p| p.intern_class(OBJECT));
        builder
    }

    /// Runtime-retained annotation interface with a single `version()` element
    ///
    /// This is the definition a version tag's name refers to.
    #[must_use]
    pub fn annotation_type(internal_name: &str) -> Self {
        let mut builder = Self::new(internal_name)
            .access(access::PUBLIC | access::INTERFACE | access::ABSTRACT | access::ANNOTATION)
            .interface(ANNOTATION_INTERFACE)
            .method(
                access::PUBLIC | access::ABSTRACT,
                crate::tag::VERSION_ELEMENT,
                "()Ljava/lang/String;",
                None,
            );
        builder.annotate_retention();
        builder
    }

    fn annotate_retention(&mut self) {
        if self.error.is_some() {
            return;
        }
        let result = Annotation::with_enum(
            &mut self.class.pool,
            RETENTION,
            "value",
            RETENTION_POLICY,
            "RUNTIME",
        )
        .and_then(|a| annotation::write(&mut self.class.attributes, &mut self.class.pool, &[a]));
        if let Err(e) = result {
            self.error = Some(e);
        }
    }

    fn try_intern(&mut self, f: impl FnOnce(&mut ConstantPool) -> UnitResult<u16>) -> u16 {
        if self.error.is_some() {
            return 0;
        }
        match f(&mut self.class.pool) {
            Ok(index) => index,
            Err(e) => {
                self.error = Some(e);
                0
            }
        }
    }

    /// Constant pool, for interning constants referenced by method code
    #[inline]
    pub fn pool_mut(&mut self) -> &mut ConstantPool {
        &mut self.class.pool
    }

    /// Class access flags
    #[inline]
    #[must_use]
    pub fn access(mut self, flags: u16) -> Self {
        self.class.access_flags = flags;
        self
    }

    /// Class-file major version
    #[inline]
    #[must_use]
    pub fn major_version(mut self, major: u16) -> Self {
        self.class.major_version = major;
        self
    }

    /// Superclass internal name
    #[must_use]
    pub fn super_class(mut self, internal_name: &str) -> Self {
        self.class.super_class = self.try_intern(|p| p.intern_class(internal_name));
        self
    }

    /// Add an implemented interface
    #[must_use]
    pub fn interface(mut self, internal_name: &str) -> Self {
        let index = self.try_intern(|p| p.intern_class(internal_name));
        self.class.interfaces.push(index);
        self
    }

    /// Add a field
    #[must_use]
    pub fn field(mut self, flags: u16, name: &str, descriptor: &str) -> Self {
        let name_index = self.try_intern(|p| p.intern_utf8(name));
        let descriptor_index = self.try_intern(|p| p.intern_utf8(descriptor));
        self.class.fields.push(Member {
            access_flags: flags,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        self
    }

    /// Add a method; `body` is `None` for abstract and native methods
    #[must_use]
    pub fn method(mut self, flags: u16, name: &str, descriptor: &str, body: Option<CodeBody>) -> Self {
        let name_index = self.try_intern(|p| p.intern_utf8(name));
        let descriptor_index = self.try_intern(|p| p.intern_utf8(descriptor));
        let mut attributes = Vec::new();

        if let Some(body) = body {
            let code_name = self.try_intern(|p| p.intern_utf8(CODE));
            let encoded = CodeAttribute {
                max_stack: body.max_stack,
                max_locals: body.max_locals,
                code: body.code,
                exception_table: Vec::new(),
                attributes: Vec::new(),
            }
            .encode();
            match encoded {
                Ok(data) => attributes.push(Attribute {
                    name_index: code_name,
                    data,
                }),
                Err(e) => {
                    self.error.get_or_insert(e);
                }
            }
        }

        self.class.methods.push(Member {
            access_flags: flags,
            name_index,
            descriptor_index,
            attributes,
        });
        self
    }

    /// Embed a class-level version tag
    #[must_use]
    pub fn tag(mut self, tag: VersionTag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Finish the class file
    ///
    /// # Errors
    /// Returns the first error recorded while building
    pub fn build(mut self) -> UnitResult<ClassFile> {
        if let Some(e) = self.error {
            return Err(e);
        }
        for tag in &self.tags {
            self.class.attach_tag(TagSite::Class, tag)?;
        }
        Ok(self.class)
    }

    /// Finish and serialize
    ///
    /// # Errors
    /// Returns error if building or encoding fails
    pub fn dump(self) -> UnitResult<Vec<u8>> {
        self.build()?.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_parseable_class() {
        let bytes = UnitBuilder::new("gen/Hello")
            .interface("java/lang/Runnable")
            .method(access::PUBLIC, "run", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))
            .dump()
            .unwrap();

        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.name().unwrap(), "gen/Hello");
        assert_eq!(class.interfaces.len(), 1);
        assert_eq!(class.method_code(0).unwrap().unwrap().code, vec![0xb1]);
    }

    #[test]
    fn embeds_class_tag() {
        let tag = VersionTag::new("splice/runtime/PatchVersion", "4");
        let class = UnitBuilder::new("gen/Tagged").tag(tag.clone()).build().unwrap();
        assert!(class.has_tag(TagSite::Class, &tag).unwrap());
    }

    #[test]
    fn annotation_type_shape() {
        let class = UnitBuilder::annotation_type("splice/runtime/PatchVersion")
            .build()
            .unwrap();
        assert_ne!(class.access_flags & access::ANNOTATION, 0);
        assert_eq!(
            class.pool.class_name(class.interfaces[0]).unwrap(),
            ANNOTATION_INTERFACE
        );
        assert_eq!(class.find_method("version", "()Ljava/lang/String;"), Some(0));
        assert!(class.method_code(0).unwrap().is_none());
        let retention = annotation::read(&class.attributes, &class.pool).unwrap();
        assert_eq!(retention[0].type_descriptor(&class.pool).unwrap(), RETENTION);
    }

    #[test]
    fn oversized_code_is_reported_at_build() {
        let result = UnitBuilder::new("gen/Huge")
            .method(access::PUBLIC, "big", "()V", Some(CodeBody::new(0, 0, vec![0; 70_000])))
            .build();
        assert!(matches!(result, Err(UnitError::Overflow { what: "code", .. })));
    }
}

//! Class-file model: parse and serialize
//!
//! [`ClassFile`] is the structural representation a rule edits. Attributes are
//! kept as raw blobs; [`crate::code`] and [`crate::annotation`] decode the ones
//! rules need on demand.

use crate::bytes::{ByteReader, ByteWriter};
use crate::error::{UnitError, UnitResult};
use crate::pool::ConstantPool;

/// Class-file magic number
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Access flag constants shared by classes and members
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
}

/// Raw attribute: name index plus undecoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: u16,
    pub data: Vec<u8>,
}

impl Attribute {
    fn parse(r: &mut ByteReader<'_>) -> UnitResult<Self> {
        let name_index = r.u16()?;
        let len = r.u32()?;
        let data = r.take(len as usize)?.to_vec();
        Ok(Self { name_index, data })
    }

    fn write(&self, w: &mut ByteWriter) -> UnitResult<()> {
        w.u16(self.name_index);
        w.blob32("attribute", &self.data)
    }

    pub(crate) fn parse_table(r: &mut ByteReader<'_>) -> UnitResult<Vec<Self>> {
        let count = r.u16()?;
        (0..count).map(|_| Self::parse(r)).collect()
    }

    pub(crate) fn write_table(attributes: &[Self], w: &mut ByteWriter) -> UnitResult<()> {
        w.len16("attributes", attributes.len())?;
        attributes.iter().try_for_each(|a| a.write(w))
    }
}

/// Field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl Member {
    fn parse(r: &mut ByteReader<'_>) -> UnitResult<Self> {
        Ok(Self {
            access_flags: r.u16()?,
            name_index: r.u16()?,
            descriptor_index: r.u16()?,
            attributes: Attribute::parse_table(r)?,
        })
    }

    fn write(&self, w: &mut ByteWriter) -> UnitResult<()> {
        w.u16(self.access_flags);
        w.u16(self.name_index);
        w.u16(self.descriptor_index);
        Attribute::write_table(&self.attributes, w)
    }

    /// Whether this member's name and descriptor match
    #[must_use]
    pub fn matches(&self, pool: &ConstantPool, name: &str, descriptor: &str) -> bool {
        pool.utf8_eq(self.name_index, name) && pool.utf8_eq(self.descriptor_index, descriptor)
    }

    /// Position of the first attribute named `name`
    #[must_use]
    pub fn attribute_position(&self, pool: &ConstantPool, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| pool.utf8_eq(a.name_index, name))
    }
}

/// Parsed class file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Decode a class file
    ///
    /// # Errors
    /// Returns [`UnitError`] if the bytes are not a well-formed class file
    pub fn parse(bytes: &[u8]) -> UnitResult<Self> {
        let mut r = ByteReader::new(bytes);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(UnitError::BadMagic(magic));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        let pool = ConstantPool::parse(&mut r)?;
        let access_flags = r.u16()?;
        let this_class = r.u16()?;
        let super_class = r.u16()?;

        let interface_count = r.u16()?;
        let interfaces = (0..interface_count)
            .map(|_| r.u16())
            .collect::<UnitResult<Vec<_>>>()?;

        let field_count = r.u16()?;
        let fields = (0..field_count)
            .map(|_| Member::parse(&mut r))
            .collect::<UnitResult<Vec<_>>>()?;

        let method_count = r.u16()?;
        let methods = (0..method_count)
            .map(|_| Member::parse(&mut r))
            .collect::<UnitResult<Vec<_>>>()?;

        let attributes = Attribute::parse_table(&mut r)?;
        r.finish()?;

        let class = Self {
            minor_version,
            major_version,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        // this_class must resolve, or every later lookup is meaningless
        class.name()?;
        Ok(class)
    }

    /// Encode the class file
    ///
    /// # Errors
    /// Returns [`UnitError::Overflow`] if a table outgrew the format limits
    pub fn to_bytes(&self) -> UnitResult<Vec<u8>> {
        let mut w = ByteWriter::with_capacity(1024);
        w.u32(MAGIC);
        w.u16(self.minor_version);
        w.u16(self.major_version);
        self.pool.write(&mut w)?;
        w.u16(self.access_flags);
        w.u16(self.this_class);
        w.u16(self.super_class);
        w.len16("interfaces", self.interfaces.len())?;
        for interface in &self.interfaces {
            w.u16(*interface);
        }
        w.len16("fields", self.fields.len())?;
        for field in &self.fields {
            field.write(&mut w)?;
        }
        w.len16("methods", self.methods.len())?;
        for method in &self.methods {
            method.write(&mut w)?;
        }
        Attribute::write_table(&self.attributes, &mut w)?;
        Ok(w.into_inner())
    }

    /// Internal name of this class
    ///
    /// # Errors
    /// Returns error if `this_class` does not resolve
    pub fn name(&self) -> UnitResult<String> {
        self.pool.class_name(self.this_class)
    }

    /// Internal name of the superclass (`None` for `java/lang/Object`)
    ///
    /// # Errors
    /// Returns error if `super_class` does not resolve
    pub fn super_name(&self) -> UnitResult<Option<String>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.pool.class_name(self.super_class).map(Some)
    }

    /// Index of the method with the given name and descriptor
    #[must_use]
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.matches(&self.pool, name, descriptor))
    }

    /// Index of the field with the given name and descriptor
    #[must_use]
    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.matches(&self.pool, name, descriptor))
    }

    /// `name + descriptor` of a method, for diagnostics
    #[must_use]
    pub fn method_signature(&self, index: usize) -> String {
        self.methods.get(index).map_or_else(String::new, |m| {
            format!(
                "{}{}",
                self.pool.utf8(m.name_index).unwrap_or_default(),
                self.pool.utf8(m.descriptor_index).unwrap_or_default()
            )
        })
    }
}

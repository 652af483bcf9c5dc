//! Constant pool model
//!
//! Entries keep their original order and raw payload so that an unedited
//! pool serializes back byte-for-byte. Interning helpers only ever append.

use crate::bytes::{ByteReader, ByteWriter};
use crate::error::{UnitError, UnitResult};
use crate::mutf8;

/// A single constant pool entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Index 0 and the upper slot of 8-byte constants
    Unusable,
    /// Raw modified UTF-8 bytes
    Utf8(Vec<u8>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

impl Constant {
    /// Whether this constant occupies two pool slots
    #[inline]
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, Self::Long(_) | Self::Double(_))
    }

    fn tag(&self) -> u8 {
        match self {
            Self::Unusable => 0,
            Self::Utf8(_) => 1,
            Self::Integer(_) => 3,
            Self::Float(_) => 4,
            Self::Long(_) => 5,
            Self::Double(_) => 6,
            Self::Class(_) => 7,
            Self::String(_) => 8,
            Self::FieldRef { .. } => 9,
            Self::MethodRef { .. } => 10,
            Self::InterfaceMethodRef { .. } => 11,
            Self::NameAndType { .. } => 12,
            Self::MethodHandle { .. } => 15,
            Self::MethodType(_) => 16,
            Self::Dynamic { .. } => 17,
            Self::InvokeDynamic { .. } => 18,
            Self::Module(_) => 19,
            Self::Package(_) => 20,
        }
    }
}

/// Ordered constant pool (slot 0 is always [`Constant::Unusable`])
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Create an empty pool
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }

    /// Number of slots including slot 0 (the on-disk `constant_pool_count`)
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn parse(r: &mut ByteReader<'_>) -> UnitResult<Self> {
        let count = r.u16()?;
        if count == 0 {
            return Err(UnitError::malformed("constant_pool_count is zero"));
        }
        let mut entries = Vec::with_capacity(usize::from(count));
        entries.push(Constant::Unusable);

        let mut index: u16 = 1;
        while index < count {
            let tag = r.u8()?;
            let constant = match tag {
                1 => {
                    let len = r.u16()?;
                    Constant::Utf8(r.take(usize::from(len))?.to_vec())
                }
                3 => Constant::Integer(r.u32()?),
                4 => Constant::Float(r.u32()?),
                5 => Constant::Long(u64::from(r.u32()?) << 32 | u64::from(r.u32()?)),
                6 => Constant::Double(u64::from(r.u32()?) << 32 | u64::from(r.u32()?)),
                7 => Constant::Class(r.u16()?),
                8 => Constant::String(r.u16()?),
                9 => Constant::FieldRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                10 => Constant::MethodRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                11 => Constant::InterfaceMethodRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                12 => Constant::NameAndType {
                    name: r.u16()?,
                    descriptor: r.u16()?,
                },
                15 => Constant::MethodHandle {
                    kind: r.u8()?,
                    reference: r.u16()?,
                },
                16 => Constant::MethodType(r.u16()?),
                17 => Constant::Dynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                18 => Constant::InvokeDynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                19 => Constant::Module(r.u16()?),
                20 => Constant::Package(r.u16()?),
                other => return Err(UnitError::BadConstantTag { tag: other, index }),
            };

            let wide = constant.is_wide();
            entries.push(constant);
            if wide {
                entries.push(Constant::Unusable);
                index = index.saturating_add(2);
            } else {
                index += 1;
            }
        }

        if entries.len() != usize::from(count) {
            return Err(UnitError::malformed(
                "8-byte constant overruns constant_pool_count",
            ));
        }
        Ok(Self { entries })
    }

    pub(crate) fn write(&self, w: &mut ByteWriter) -> UnitResult<()> {
        w.len16("constant pool", self.entries.len())?;
        for constant in self.entries.iter().skip(1) {
            if matches!(constant, Constant::Unusable) {
                continue;
            }
            w.u8(constant.tag());
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(bytes) => {
                    w.len16("utf8 constant", bytes.len())?;
                    w.bytes(bytes);
                }
                Constant::Integer(v) | Constant::Float(v) => w.u32(*v),
                Constant::Long(v) | Constant::Double(v) => {
                    w.u32((v >> 32) as u32);
                    w.u32(*v as u32);
                }
                Constant::Class(i)
                | Constant::String(i)
                | Constant::MethodType(i)
                | Constant::Module(i)
                | Constant::Package(i) => w.u16(*i),
                Constant::FieldRef { class, name_and_type }
                | Constant::MethodRef { class, name_and_type }
                | Constant::InterfaceMethodRef { class, name_and_type } => {
                    w.u16(*class);
                    w.u16(*name_and_type);
                }
                Constant::NameAndType { name, descriptor } => {
                    w.u16(*name);
                    w.u16(*descriptor);
                }
                Constant::MethodHandle { kind, reference } => {
                    w.u8(*kind);
                    w.u16(*reference);
                }
                Constant::Dynamic { bootstrap, name_and_type }
                | Constant::InvokeDynamic { bootstrap, name_and_type } => {
                    w.u16(*bootstrap);
                    w.u16(*name_and_type);
                }
            }
        }
        Ok(())
    }

    /// Entry at `index`
    ///
    /// # Errors
    /// Returns error if index is out of range or an unusable slot
    pub fn get(&self, index: u16) -> UnitResult<&Constant> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => Err(UnitError::bad_index(index, "no usable entry")),
            Some(constant) => Ok(constant),
        }
    }

    /// Decoded `CONSTANT_Utf8` at `index`
    ///
    /// # Errors
    /// Returns error if the entry is not Utf8 or cannot be decoded
    pub fn utf8(&self, index: u16) -> UnitResult<String> {
        match self.get(index)? {
            Constant::Utf8(bytes) => mutf8::decode(bytes),
            other => Err(UnitError::bad_index(index, format!("expected Utf8, found {other:?}"))),
        }
    }

    /// Compare a Utf8 entry against `expected` without allocating
    #[must_use]
    pub fn utf8_eq(&self, index: u16, expected: &str) -> bool {
        match self.get(index) {
            Ok(Constant::Utf8(bytes)) => *bytes == mutf8::encode(expected),
            _ => false,
        }
    }

    /// Internal name of the `CONSTANT_Class` at `index`
    ///
    /// # Errors
    /// Returns error if the entry is not a class reference
    pub fn class_name(&self, index: u16) -> UnitResult<String> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(UnitError::bad_index(index, format!("expected Class, found {other:?}"))),
        }
    }

    /// Append a constant, returning its index
    ///
    /// # Errors
    /// Returns error if the pool is full
    pub fn push(&mut self, constant: Constant) -> UnitResult<u16> {
        let slots = if constant.is_wide() { 2 } else { 1 };
        let index = self.entries.len();
        if index + slots > usize::from(u16::MAX) {
            return Err(UnitError::Overflow {
                what: "constant pool",
                len: index + slots,
            });
        }
        let wide = constant.is_wide();
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index as u16)
    }

    fn find(&self, wanted: &Constant) -> Option<u16> {
        self.entries
            .iter()
            .position(|c| c == wanted)
            .filter(|&i| i != 0)
            .map(|i| i as u16)
    }

    fn intern(&mut self, constant: Constant) -> UnitResult<u16> {
        match self.find(&constant) {
            Some(index) => Ok(index),
            None => self.push(constant),
        }
    }

    /// Index of an existing or newly appended Utf8 entry
    ///
    /// # Errors
    /// Returns error if the pool is full
    pub fn intern_utf8(&mut self, value: &str) -> UnitResult<u16> {
        self.intern(Constant::Utf8(mutf8::encode(value)))
    }

    /// Index of a `CONSTANT_Class` for an internal name
    ///
    /// # Errors
    /// Returns error if the pool is full
    pub fn intern_class(&mut self, internal_name: &str) -> UnitResult<u16> {
        let name = self.intern_utf8(internal_name)?;
        self.intern(Constant::Class(name))
    }

    /// Index of a `CONSTANT_String`
    ///
    /// # Errors
    /// Returns error if the pool is full
    pub fn intern_string(&mut self, value: &str) -> UnitResult<u16> {
        let utf8 = self.intern_utf8(value)?;
        self.intern(Constant::String(utf8))
    }

    /// Index of a `CONSTANT_NameAndType`
    ///
    /// # Errors
    /// Returns error if the pool is full
    pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> UnitResult<u16> {
        let name = self.intern_utf8(name)?;
        let descriptor = self.intern_utf8(descriptor)?;
        self.intern(Constant::NameAndType { name, descriptor })
    }

    /// Index of a `CONSTANT_Methodref`
    ///
    /// # Errors
    /// Returns error if the pool is full
    pub fn intern_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> UnitResult<u16> {
        let class = self.intern_class(owner)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::MethodRef {
            class,
            name_and_type,
        })
    }

    /// Iterate `(index, constant)` over usable entries
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16, c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_has_reserved_slot() {
        let pool = ConstantPool::new();
        assert_eq!(pool.count(), 1);
        assert!(pool.get(0).is_err());
    }

    #[test]
    fn intern_reuses_existing_entries() {
        let mut pool = ConstantPool::new();
        let a = pool.intern_class("java/lang/Object").unwrap();
        let b = pool.intern_class("java/lang/Object").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.count(), 3);
        assert_eq!(pool.class_name(a).unwrap(), "java/lang/Object");
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.push(Constant::Long(7)).unwrap();
        let next = pool.intern_utf8("x").unwrap();
        assert_eq!(long, 1);
        assert_eq!(next, 3);
        assert!(pool.get(2).is_err());
    }

    #[test]
    fn method_ref_shares_components() {
        let mut pool = ConstantPool::new();
        let m = pool.intern_method_ref("a/B", "run", "()V").unwrap();
        match pool.get(m).unwrap() {
            Constant::MethodRef { class, .. } => {
                assert_eq!(pool.class_name(*class).unwrap(), "a/B");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_write_preserves_order() {
        let mut pool = ConstantPool::new();
        pool.intern_utf8("z").unwrap();
        pool.push(Constant::Double(0x4000_0000_0000_0000)).unwrap();
        pool.intern_class("a/A").unwrap();

        let mut w = ByteWriter::new();
        pool.write(&mut w).unwrap();
        let bytes = w.into_inner();

        let parsed = ConstantPool::parse(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(parsed, pool);
    }

    #[test]
    fn utf8_eq_matches_encoded_value() {
        let mut pool = ConstantPool::new();
        let i = pool.intern_utf8("version").unwrap();
        assert!(pool.utf8_eq(i, "version"));
        assert!(!pool.utf8_eq(i, "versions"));
    }
}

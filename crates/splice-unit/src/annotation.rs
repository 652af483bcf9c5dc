//! `RuntimeVisibleAnnotations` handling
//!
//! Each annotation keeps its exact encoded bytes, so removing one entry leaves
//! every other annotation untouched on re-serialization.

use crate::bytes::{ByteReader, ByteWriter};
use crate::class::Attribute;
use crate::error::{UnitError, UnitResult};
use crate::pool::ConstantPool;

/// Attribute name for runtime-visible annotations
pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";

/// Maximum nesting accepted while skipping element values
const MAX_DEPTH: usize = 64;

/// One encoded annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    type_index: u16,
    raw: Vec<u8>,
}

impl Annotation {
    /// Constant pool index of the annotation's type descriptor
    #[inline]
    #[must_use]
    pub fn type_index(&self) -> u16 {
        self.type_index
    }

    /// Encoded bytes (type index, pairs)
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Type descriptor, e.g. `Lsplice/runtime/PatchVersion;`
    ///
    /// # Errors
    /// Returns error if the type index is not a Utf8 entry
    pub fn type_descriptor(&self, pool: &ConstantPool) -> UnitResult<String> {
        pool.utf8(self.type_index)
    }

    /// Value of a string-valued (`s`) element
    ///
    /// # Errors
    /// Returns error if the encoded annotation is malformed
    pub fn string_element(&self, pool: &ConstantPool, name: &str) -> UnitResult<Option<String>> {
        let mut r = ByteReader::new(&self.raw);
        r.u16()?;
        let pairs = r.u16()?;
        for _ in 0..pairs {
            let element_name = r.u16()?;
            if pool.utf8_eq(element_name, name) {
                let tag = r.u8()?;
                if tag != b's' {
                    return Ok(None);
                }
                return pool.utf8(r.u16()?).map(Some);
            }
            skip_element_value(&mut r, 0)?;
        }
        Ok(None)
    }

    /// Build an annotation with a single string element
    ///
    /// # Errors
    /// Returns error if the constant pool is full
    pub fn with_string(
        pool: &mut ConstantPool,
        type_descriptor: &str,
        element: &str,
        value: &str,
    ) -> UnitResult<Self> {
        let type_index = pool.intern_utf8(type_descriptor)?;
        let element_index = pool.intern_utf8(element)?;
        let value_index = pool.intern_utf8(value)?;

        let mut w = ByteWriter::with_capacity(10);
        w.u16(type_index);
        w.u16(1);
        w.u16(element_index);
        w.u8(b's');
        w.u16(value_index);
        Ok(Self {
            type_index,
            raw: w.into_inner(),
        })
    }

    /// Build an annotation with a single enum element
    ///
    /// # Errors
    /// Returns error if the constant pool is full
    pub fn with_enum(
        pool: &mut ConstantPool,
        type_descriptor: &str,
        element: &str,
        enum_descriptor: &str,
        constant: &str,
    ) -> UnitResult<Self> {
        let type_index = pool.intern_utf8(type_descriptor)?;
        let element_index = pool.intern_utf8(element)?;
        let enum_index = pool.intern_utf8(enum_descriptor)?;
        let constant_index = pool.intern_utf8(constant)?;

        let mut w = ByteWriter::with_capacity(12);
        w.u16(type_index);
        w.u16(1);
        w.u16(element_index);
        w.u8(b'e');
        w.u16(enum_index);
        w.u16(constant_index);
        Ok(Self {
            type_index,
            raw: w.into_inner(),
        })
    }
}

fn skip_element_value(r: &mut ByteReader<'_>, depth: usize) -> UnitResult<()> {
    if depth > MAX_DEPTH {
        return Err(UnitError::malformed("annotation nesting too deep"));
    }
    match r.u8()? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            r.u16()?;
        }
        b'e' => {
            r.u16()?;
            r.u16()?;
        }
        b'@' => skip_annotation(r, depth + 1)?,
        b'[' => {
            let count = r.u16()?;
            for _ in 0..count {
                skip_element_value(r, depth + 1)?;
            }
        }
        other => {
            return Err(UnitError::malformed(format!(
                "unknown element value tag {:?}",
                char::from(other)
            )))
        }
    }
    Ok(())
}

fn skip_annotation(r: &mut ByteReader<'_>, depth: usize) -> UnitResult<()> {
    r.u16()?;
    let pairs = r.u16()?;
    for _ in 0..pairs {
        r.u16()?;
        skip_element_value(r, depth)?;
    }
    Ok(())
}

/// Decode a `RuntimeVisibleAnnotations` payload
///
/// # Errors
/// Returns error if the payload is malformed
pub fn decode(data: &[u8]) -> UnitResult<Vec<Annotation>> {
    let mut r = ByteReader::new(data);
    let count = r.u16()?;
    let mut annotations = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let start = r.position();
        let type_index = r.u16()?;
        let pairs = r.u16()?;
        for _ in 0..pairs {
            r.u16()?;
            skip_element_value(&mut r, 0)?;
        }
        annotations.push(Annotation {
            type_index,
            raw: data[start..r.position()].to_vec(),
        });
    }
    r.finish()?;
    Ok(annotations)
}

/// Encode annotations back into a `RuntimeVisibleAnnotations` payload
///
/// # Errors
/// Returns error if there are more than `u16::MAX` annotations
pub fn encode(annotations: &[Annotation]) -> UnitResult<Vec<u8>> {
    let mut w = ByteWriter::new();
    w.len16("annotations", annotations.len())?;
    for annotation in annotations {
        w.bytes(&annotation.raw);
    }
    Ok(w.into_inner())
}

/// Annotations carried in an attribute table
///
/// # Errors
/// Returns error if the attribute is malformed
pub fn read(attributes: &[Attribute], pool: &ConstantPool) -> UnitResult<Vec<Annotation>> {
    attributes
        .iter()
        .find(|a| pool.utf8_eq(a.name_index, RUNTIME_VISIBLE_ANNOTATIONS))
        .map_or_else(|| Ok(Vec::new()), |a| decode(&a.data))
}

/// Replace the annotations of an attribute table
///
/// An empty list removes the attribute entirely.
///
/// # Errors
/// Returns error if encoding fails or the pool is full
pub fn write(
    attributes: &mut Vec<Attribute>,
    pool: &mut ConstantPool,
    annotations: &[Annotation],
) -> UnitResult<()> {
    let position = attributes
        .iter()
        .position(|a| pool.utf8_eq(a.name_index, RUNTIME_VISIBLE_ANNOTATIONS));

    if annotations.is_empty() {
        if let Some(pos) = position {
            attributes.remove(pos);
        }
        return Ok(());
    }

    let data = encode(annotations)?;
    match position {
        Some(pos) => attributes[pos].data = data,
        None => attributes.push(Attribute {
            name_index: pool.intern_utf8(RUNTIME_VISIBLE_ANNOTATIONS)?,
            data,
        }),
    }
    Ok(())
}

//! `Code` attribute decoding and prologue insertion
//!
//! Instructions stay opaque bytes. The only edit supported here is inserting a
//! prologue at offset 0, which shifts every absolute bytecode offset stored in
//! the attribute by the prologue length. Relative branch offsets need no
//! change. Prologues must be a multiple of four bytes so that
//! `tableswitch`/`lookupswitch` padding stays aligned.

use crate::bytes::{ByteReader, ByteWriter};
use crate::class::{Attribute, ClassFile};
use crate::error::{UnitError, UnitResult};
use crate::pool::ConstantPool;

/// Attribute name of method bodies
pub const CODE: &str = "Code";

const LINE_NUMBER_TABLE: &str = "LineNumberTable";
const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
const STACK_MAP_TABLE: &str = "StackMapTable";

/// Largest legal `code_length`
const MAX_CODE_LENGTH: usize = 65_535;

/// One exception handler range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// Decoded `Code` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    /// Decode from the raw attribute payload
    ///
    /// # Errors
    /// Returns error if the payload is truncated or has trailing bytes
    pub fn decode(data: &[u8]) -> UnitResult<Self> {
        let mut r = ByteReader::new(data);
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_len = r.u32()? as usize;
        let code = r.take(code_len)?.to_vec();
        let handlers = r.u16()?;
        let exception_table = (0..handlers)
            .map(|_| {
                Ok(ExceptionEntry {
                    start_pc: r.u16()?,
                    end_pc: r.u16()?,
                    handler_pc: r.u16()?,
                    catch_type: r.u16()?,
                })
            })
            .collect::<UnitResult<Vec<_>>>()?;
        let attributes = Attribute::parse_table(&mut r)?;
        r.finish()?;
        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Encode to a raw attribute payload
    ///
    /// # Errors
    /// Returns error if the code or a table exceeds format limits
    pub fn encode(&self) -> UnitResult<Vec<u8>> {
        if self.code.len() > MAX_CODE_LENGTH {
            return Err(UnitError::Overflow {
                what: "code",
                len: self.code.len(),
            });
        }
        let mut w = ByteWriter::with_capacity(self.code.len() + 32);
        w.u16(self.max_stack);
        w.u16(self.max_locals);
        w.blob32("code", &self.code)?;
        w.len16("exception table", self.exception_table.len())?;
        for e in &self.exception_table {
            w.u16(e.start_pc);
            w.u16(e.end_pc);
            w.u16(e.handler_pc);
            w.u16(e.catch_type);
        }
        Attribute::write_table(&self.attributes, &mut w)?;
        Ok(w.into_inner())
    }

    /// Insert `prologue` before the first instruction
    ///
    /// `extra_stack` is the operand stack depth the prologue needs; `max_stack`
    /// is raised to at least that value.
    ///
    /// # Errors
    /// Returns error if the prologue is not 4-byte aligned, the body would
    /// exceed the code length limit, or a debug table is malformed
    pub fn insert_prologue(
        &mut self,
        pool: &ConstantPool,
        prologue: &[u8],
        extra_stack: u16,
    ) -> UnitResult<()> {
        if prologue.len() % 4 != 0 {
            return Err(UnitError::malformed(format!(
                "prologue length {} is not a multiple of 4",
                prologue.len()
            )));
        }
        let total = self.code.len() + prologue.len();
        if total > MAX_CODE_LENGTH {
            return Err(UnitError::Overflow { what: "code", len: total });
        }
        let shift = prologue.len() as u16;

        let exception_table = self
            .exception_table
            .iter()
            .map(|e| {
                Ok(ExceptionEntry {
                    start_pc: shift_pc(e.start_pc, shift, "exception start_pc")?,
                    end_pc: shift_pc(e.end_pc, shift, "exception end_pc")?,
                    handler_pc: shift_pc(e.handler_pc, shift, "exception handler_pc")?,
                    catch_type: e.catch_type,
                })
            })
            .collect::<UnitResult<Vec<_>>>()?;

        let attributes = self
            .attributes
            .iter()
            .map(|attribute| {
                let data = if pool.utf8_eq(attribute.name_index, LINE_NUMBER_TABLE) {
                    shift_table(&attribute.data, 4, shift)?
                } else if pool.utf8_eq(attribute.name_index, LOCAL_VARIABLE_TABLE)
                    || pool.utf8_eq(attribute.name_index, LOCAL_VARIABLE_TYPE_TABLE)
                {
                    shift_table(&attribute.data, 10, shift)?
                } else if pool.utf8_eq(attribute.name_index, STACK_MAP_TABLE) {
                    shift_first_frame(&attribute.data, shift)?
                } else {
                    attribute.data.clone()
                };
                Ok(Attribute {
                    name_index: attribute.name_index,
                    data,
                })
            })
            .collect::<UnitResult<Vec<_>>>()?;

        let mut code = Vec::with_capacity(total);
        code.extend_from_slice(prologue);
        code.extend_from_slice(&self.code);
        self.code = code;
        self.max_stack = self.max_stack.max(extra_stack);
        self.exception_table = exception_table;
        self.attributes = attributes;
        Ok(())
    }
}

/// `pc + shift`, or an overflow error for offsets past the format limit
fn shift_pc(pc: u16, shift: u16, what: &'static str) -> UnitResult<u16> {
    pc.checked_add(shift).ok_or(UnitError::Overflow {
        what,
        len: usize::from(pc) + usize::from(shift),
    })
}

/// Shift the leading `start_pc` of every fixed-size row in a u16-counted table
fn shift_table(data: &[u8], row_len: usize, shift: u16) -> UnitResult<Vec<u8>> {
    let mut r = ByteReader::new(data);
    let count = r.u16()?;
    let mut w = ByteWriter::with_capacity(data.len());
    w.u16(count);
    for _ in 0..count {
        let row = r.take(row_len)?;
        let start_pc = u16::from_be_bytes([row[0], row[1]]);
        w.u16(shift_pc(start_pc, shift, "debug table start_pc")?);
        w.bytes(&row[2..]);
    }
    r.finish()?;
    Ok(w.into_inner())
}

/// Only the first frame's `offset_delta` is absolute; later frames are relative
fn shift_first_frame(data: &[u8], shift: u16) -> UnitResult<Vec<u8>> {
    let mut r = ByteReader::new(data);
    let count = r.u16()?;
    let mut w = ByteWriter::with_capacity(data.len() + 2);
    w.u16(count);
    if count == 0 {
        r.finish()?;
        return Ok(w.into_inner());
    }

    let frame_type = r.u8()?;
    match frame_type {
        // same_frame
        0..=63 => {
            let delta = shift_pc(u16::from(frame_type), shift, "stack map offset")?;
            if delta <= 63 {
                w.u8(delta as u8);
            } else {
                w.u8(251);
                w.u16(delta);
            }
        }
        // same_locals_1_stack_item_frame
        64..=127 => {
            let delta = shift_pc(u16::from(frame_type - 64), shift, "stack map offset")?;
            if delta <= 63 {
                w.u8(64 + delta as u8);
            } else {
                w.u8(247);
                w.u16(delta);
            }
        }
        247..=255 => {
            let delta = r.u16()?;
            w.u8(frame_type);
            w.u16(shift_pc(delta, shift, "stack map offset")?);
        }
        reserved => {
            return Err(UnitError::malformed(format!(
                "reserved stack map frame type {reserved}"
            )))
        }
    }

    let rest = r.remaining();
    w.bytes(r.take(rest)?);
    Ok(w.into_inner())
}

impl ClassFile {
    /// Decoded body of method `index`, if it has one
    ///
    /// # Errors
    /// Returns error if the `Code` attribute is malformed
    pub fn method_code(&self, index: usize) -> UnitResult<Option<CodeAttribute>> {
        let Some(method) = self.methods.get(index) else {
            return Ok(None);
        };
        match method.attribute_position(&self.pool, CODE) {
            Some(pos) => CodeAttribute::decode(&method.attributes[pos].data).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the body of method `index`
    ///
    /// # Errors
    /// Returns error if the method has no `Code` attribute or encoding fails
    pub fn set_method_code(&mut self, index: usize, code: &CodeAttribute) -> UnitResult<()> {
        let data = code.encode()?;
        let method = self
            .methods
            .get_mut(index)
            .ok_or_else(|| UnitError::malformed(format!("no method at index {index}")))?;
        let pos = method
            .attribute_position(&self.pool, CODE)
            .ok_or_else(|| UnitError::malformed("method has no Code attribute"))?;
        method.attributes[pos].data = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(names: &[&str]) -> (ConstantPool, Vec<u16>) {
        let mut pool = ConstantPool::new();
        let ids = names.iter().map(|n| pool.intern_utf8(n).unwrap()).collect();
        (pool, ids)
    }

    fn body(pool_ids: &[u16]) -> CodeAttribute {
        let line_numbers = {
            let mut w = ByteWriter::new();
            w.u16(1);
            w.u16(0);
            w.u16(42);
            w.into_inner()
        };
        let stack_map = vec![0, 1, 5];
        CodeAttribute {
            max_stack: 0,
            max_locals: 1,
            code: vec![0x00, 0x00, 0x00, 0x00, 0x00, 0xb1],
            exception_table: vec![ExceptionEntry {
                start_pc: 0,
                end_pc: 4,
                handler_pc: 5,
                catch_type: 0,
            }],
            attributes: vec![
                Attribute {
                    name_index: pool_ids[0],
                    data: line_numbers,
                },
                Attribute {
                    name_index: pool_ids[1],
                    data: stack_map,
                },
            ],
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let (_, ids) = pool_with(&[LINE_NUMBER_TABLE, STACK_MAP_TABLE]);
        let code = body(&ids);
        assert_eq!(CodeAttribute::decode(&code.encode().unwrap()).unwrap(), code);
    }

    #[test]
    fn prologue_shifts_offsets() {
        let (pool, ids) = pool_with(&[LINE_NUMBER_TABLE, STACK_MAP_TABLE]);
        let mut code = body(&ids);
        code.insert_prologue(&pool, &[0x2a, 0xb8, 0x00, 0x01], 1).unwrap();

        assert_eq!(&code.code[..4], &[0x2a, 0xb8, 0x00, 0x01]);
        assert_eq!(code.code.len(), 10);
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.exception_table[0].start_pc, 4);
        assert_eq!(code.exception_table[0].end_pc, 8);
        assert_eq!(code.exception_table[0].handler_pc, 9);
        // line number start_pc 0 -> 4
        assert_eq!(code.attributes[0].data, vec![0, 1, 0, 4, 0, 42]);
        // same_frame delta 5 -> 9
        assert_eq!(code.attributes[1].data, vec![0, 1, 9]);
    }

    #[test]
    fn prologue_widens_same_frame_past_63() {
        let shifted = shift_first_frame(&[0, 1, 62], 4).unwrap();
        assert_eq!(shifted, vec![0, 1, 251, 0, 66]);
    }

    #[test]
    fn prologue_widens_stack_item_frame() {
        // same_locals_1_stack_item with delta 61, then an Integer verification type
        let shifted = shift_first_frame(&[0, 1, 64 + 61, 1], 4).unwrap();
        assert_eq!(shifted, vec![0, 1, 247, 0, 65, 1]);
    }

    #[test]
    fn prologue_must_be_aligned() {
        let (pool, ids) = pool_with(&[LINE_NUMBER_TABLE, STACK_MAP_TABLE]);
        let mut code = body(&ids);
        assert!(code.insert_prologue(&pool, &[0x00, 0x00], 0).is_err());
    }

    #[test]
    fn prologue_rejects_offsets_past_limit() {
        let (pool, ids) = pool_with(&[LINE_NUMBER_TABLE, STACK_MAP_TABLE]);
        let mut code = body(&ids);
        code.attributes[0].data = vec![0, 1, 0xff, 0xfe, 0, 42];
        let before = code.clone();

        let err = code.insert_prologue(&pool, &[0, 0, 0, 0], 0).unwrap_err();
        assert!(matches!(err, UnitError::Overflow { .. }));
        assert_eq!(code, before);
    }

    #[test]
    fn exception_range_past_limit_is_an_error() {
        let (pool, ids) = pool_with(&[LINE_NUMBER_TABLE, STACK_MAP_TABLE]);
        let mut code = body(&ids);
        code.exception_table[0].handler_pc = u16::MAX;
        assert!(matches!(
            code.insert_prologue(&pool, &[0, 0, 0, 0], 0),
            Err(UnitError::Overflow { .. })
        ));
    }

    #[test]
    fn later_frames_are_untouched() {
        // full_frame-free table: extended same frame then a chop frame
        let data = [0, 2, 251, 0, 10, 248, 0, 3];
        let shifted = shift_first_frame(&data, 8).unwrap();
        assert_eq!(shifted, vec![0, 2, 251, 0, 18, 248, 0, 3]);
    }
}

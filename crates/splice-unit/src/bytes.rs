//! Big-endian cursor primitives shared by the decoders and encoders

use crate::error::{UnitError, UnitResult};

/// Forward-only reader over a byte slice
#[derive(Debug, Clone)]
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[inline]
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> UnitResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(UnitError::Truncated {
                offset: self.pos,
                needed: len,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> UnitResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> UnitResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> UnitResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Fail unless every byte was consumed
    pub(crate) fn finish(&self) -> UnitResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(UnitError::TrailingBytes(n)),
        }
    }
}

/// Growable big-endian writer
#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub(crate) fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    #[inline]
    pub(crate) fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    #[inline]
    pub(crate) fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    #[inline]
    pub(crate) fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write a table length, rejecting anything above `u16::MAX`
    pub(crate) fn len16(&mut self, what: &'static str, len: usize) -> UnitResult<()> {
        let value = u16::try_from(len).map_err(|_| UnitError::Overflow { what, len })?;
        self.u16(value);
        Ok(())
    }

    /// Write a length-prefixed (u32) blob
    pub(crate) fn blob32(&mut self, what: &'static str, data: &[u8]) -> UnitResult<()> {
        let len = u32::try_from(data.len()).map_err(|_| UnitError::Overflow {
            what,
            len: data.len(),
        })?;
        self.u32(len);
        self.bytes(data);
        Ok(())
    }

    #[inline]
    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reads_big_endian() {
        let mut r = ByteReader::new(&[0x12, 0x34, 0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(r.u16().unwrap(), 0x1234);
        assert_eq!(r.u32().unwrap(), 0xCAFE_BABE);
        assert!(r.finish().is_ok());
    }

    #[test]
    fn reader_reports_truncation() {
        let mut r = ByteReader::new(&[0x01]);
        let err = r.u16().unwrap_err();
        assert_eq!(err, UnitError::Truncated { offset: 0, needed: 2 });
    }

    #[test]
    fn writer_rejects_oversized_table() {
        let mut w = ByteWriter::new();
        assert!(w.len16("fields", 70_000).is_err());
        assert!(w.len16("fields", 3).is_ok());
        assert_eq!(w.into_inner(), vec![0, 3]);
    }
}

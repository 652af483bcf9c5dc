//! Error types for the unit model
//!
//! Every parse failure maps to [`UnitError`]; the engine treats any of them as
//! a malformed unit and leaves the entry unpatched.

/// Errors raised while decoding or encoding a unit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    /// Input does not start with the class-file magic number
    #[error("bad magic: expected 0xCAFEBABE, got {0:#010x}")]
    BadMagic(u32),

    /// Input ended before a structure was complete
    #[error("truncated unit: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// Unknown constant pool tag
    #[error("unknown constant pool tag {tag} at index {index}")]
    BadConstantTag { tag: u8, index: u16 },

    /// Constant pool index out of range or of the wrong kind
    #[error("invalid constant pool reference #{index}: {reason}")]
    BadPoolIndex { index: u16, reason: String },

    /// Structurally invalid content
    #[error("malformed unit: {0}")]
    Malformed(String),

    /// Trailing bytes after the last attribute
    #[error("{0} trailing bytes after unit")]
    TrailingBytes(usize),

    /// A table outgrew the u16/u32 limit of the format
    #[error("{what} exceeds format limit ({len})")]
    Overflow { what: &'static str, len: usize },
}

impl UnitError {
    /// Create malformed error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Create pool index error
    pub fn bad_index(index: u16, reason: impl Into<String>) -> Self {
        Self::BadPoolIndex {
            index,
            reason: reason.into(),
        }
    }
}

/// Result alias for unit operations
pub type UnitResult<T> = Result<T, UnitError>;

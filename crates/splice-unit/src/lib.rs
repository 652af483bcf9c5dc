//! Splice Unit Model
//!
//! Structural model of JVM class files with byte-preserving serialization,
//! plus the identifiers and version tags the patch engine works with.
//!
//! # Core Concepts
//!
//! - [`ClassFile`]: Parsed unit; untouched parts re-serialize byte for byte
//! - [`UnitName`]: Internal name with nested-unit parent chain
//! - [`VersionTag`]: `(name, version)` marker stored as a runtime annotation
//! - [`UnitBuilder`]: Emits class files that have no compiled form to parse
//! - [`ContentHash`]: 32-byte Blake3 digest for containers and entries
//!
//! # Example
//!
//! ```rust,ignore
//! use splice_unit::{ClassFile, TagSite, VersionTag};
//!
//! let mut class = ClassFile::parse(&bytes)?;
//! let index = class.find_method("accept", "()V").unwrap();
//! class.attach_tag(TagSite::Method(index), &VersionTag::new("splice/runtime/PatchVersion", "2"))?;
//! let patched = class.to_bytes()?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod bytes;

pub mod annotation;
pub mod builder;
pub mod class;
pub mod code;
pub mod error;
pub mod hash;
pub mod mutf8;
pub mod name;
pub mod pool;
pub mod tag;

// Re-exports
pub use annotation::Annotation;
pub use builder::{CodeBody, UnitBuilder};
pub use class::{access, Attribute, ClassFile, Member};
pub use code::{CodeAttribute, ExceptionEntry};
pub use error::{UnitError, UnitResult};
pub use hash::{ContentHash, HashError};
pub use name::{NameError, UnitName};
pub use pool::{Constant, ConstantPool};
pub use tag::{TagSite, VersionTag};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Splice Transformation Rules
//!
//! The protocol every patch rule follows, and the registry the engine reads
//! rules from.
//!
//! # Core Concepts
//!
//! - [`StructuralRule`]: Edits a parsed unit and re-serializes it
//! - [`SynthesisRule`]: Emits a unit that has no compiled form
//! - [`TransformationRule`]: Tagged union of the two
//! - [`MethodRule`]: Structural rule for one method; only the [`MethodEdit`] varies
//! - [`RuleRegistry`]: `unit → rule` mapping, frozen before a run
//!
//! # Example
//!
//! ```rust,ignore
//! use splice_rules::{MethodRule, RuleRegistry, TransformationRule};
//!
//! let mut registry = RuleRegistry::new();
//! registry.register(TransformationRule::structural(MethodRule::new(
//!     "server-hook", target, "accept", "()V", tag, HookCall::new(owner, "onAccept"),
//! )))?;
//! let rules = registry.freeze();
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod method;
mod registry;
mod rule;

// Re-exports
pub use error::{RegistryError, RuleError};
pub use method::{MethodEdit, MethodRule};
pub use registry::{FrozenRules, RuleRegistry};
pub use rule::{BuilderSynthesis, RuleOutcome, StructuralRule, SynthesisRule, TransformationRule};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

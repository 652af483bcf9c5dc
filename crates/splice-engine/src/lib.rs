//! Splice Patch Engine
//!
//! Opens a container archive, applies the registered transformation rules,
//! injects companion and synthesized units, and swaps the result in for the
//! original with a backup.
//!
//! # Core Concepts
//!
//! - [`PatchEngine`]: Scanning, Deciding, Writing, Swapping for one run
//! - [`PendingChangeSet`]: Rewritten entries, added units and exclusions
//! - [`UnitResolver`]: Injected lookup of units in the runtime environment
//! - [`CompanionPackage`]: Engine-owned units grouped by top-level identifier
//! - [`PatchOutcome`]: `NothingToDo` or a [`PatchReport`] requiring restart
//!
//! # Example
//!
//! ```rust,ignore
//! use splice_engine::{PatchConfig, PatchEngine};
//! use splice_rules::RuleRegistry;
//!
//! let mut registry = RuleRegistry::new();
//! registry.register(my_rule)?;
//!
//! let config = PatchConfig::load("splice.toml".as_ref())?;
//! let mut engine = PatchEngine::open(config, registry.freeze(), &[])?;
//! if engine.run()?.requires_restart() {
//!     println!("restart the host to load the patched container");
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod changeset;
pub mod companion;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod resolver;
pub mod swap;

pub use changeset::{AddedKind, AddedUnit, PendingChangeSet};
pub use companion::{CompanionPackage, GroupDecision, UnitGroup};
pub use config::{CompanionConfig, PatchConfig};
pub use container::{Container, ContainerWriter, EntryInfo, EntryKind};
pub use engine::{PatchEngine, PatchOutcome, PatchPhase, PatchReport};
pub use error::{EngineError, EngineResult};
pub use inspect::{inspect_tags, UnitTags};
pub use resolver::{ArchiveResolver, UnitMetadata, UnitResolver};
pub use swap::{backup_path, ensure_backup, restore_backup, Backup};

/// Version of the splice-engine crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Patch engine
//!
//! One run moves through
//!
//! ```text
//! Scanning -> Deciding -> Writing -> Swapping -> Done
//! ```
//!
//! with `Failed` reachable from the phases that touch the filesystem.
//! Per-unit problems (malformed units, inapplicable or failing rules) never
//! abort a run; they are logged and listed in the [`PatchReport`]. Archive
//! I/O failures abort it and leave the container as it was.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Display, Formatter};
use std::io::BufWriter;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use splice_rules::{FrozenRules, RuleOutcome, StructuralRule, SynthesisRule, TransformationRule};
use splice_unit::{ClassFile, ContentHash, UnitBuilder, UnitName};
use tempfile::NamedTempFile;

use crate::changeset::{AddedKind, PendingChangeSet};
use crate::companion::{CompanionPackage, GroupDecision, UnitGroup};
use crate::config::PatchConfig;
use crate::container::{file_hash, Container, ContainerWriter, EntryInfo};
use crate::error::{EngineError, EngineResult};
use crate::resolver::{ArchiveResolver, UnitResolver};
use crate::swap::{ensure_backup, parent_dir, swap_in};

/// Phase of a patch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchPhase {
    Scanning,
    Deciding,
    Writing,
    Swapping,
    Done,
    Failed,
}

impl PatchPhase {
    /// Whether a run may move from `self` to `next`
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Scanning, Self::Deciding)
                | (Self::Deciding, Self::Writing)
                | (Self::Deciding, Self::Done)
                | (Self::Writing, Self::Swapping)
                | (Self::Swapping, Self::Done)
                | (Self::Scanning | Self::Writing | Self::Swapping, Self::Failed)
        )
    }

    /// Whether the run has ended
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl Display for PatchPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scanning => "scanning",
            Self::Deciding => "deciding",
            Self::Writing => "writing",
            Self::Swapping => "swapping",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of a run that replaced the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub container: PathBuf,
    pub original_hash: ContentHash,
    pub new_hash: ContentHash,
    pub backup: PathBuf,
    /// Whether this run created the backup
    pub backup_created: bool,
    /// Entries rewritten by structural rules
    pub patched: Vec<UnitName>,
    /// Units emitted by synthesis rules
    pub synthesized: Vec<UnitName>,
    /// Companion units written (top-level and nested)
    pub companion: Vec<UnitName>,
    pub carrier_added: bool,
    /// Old entries dropped because their identifier was superseded
    pub excluded: usize,
    /// Entries copied through unchanged
    pub copied: usize,
    /// `rule: reason` for rules whose expected structure was missing
    pub inapplicable: Vec<String>,
    /// `rule: error` for rules that failed or panicked
    pub failed: Vec<String>,
    /// Units that could not be parsed and were copied as they were
    pub malformed: Vec<UnitName>,
}

/// Result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Everything was current; the filesystem was not touched
    NothingToDo,
    /// The container was replaced
    Patched(Box<PatchReport>),
}

impl PatchOutcome {
    /// Whether the host must restart to load the new container
    #[inline]
    #[must_use]
    pub fn requires_restart(&self) -> bool {
        matches!(self, Self::Patched(_))
    }

    /// Report of a patching run
    #[must_use]
    pub fn report(&self) -> Option<&PatchReport> {
        match self {
            Self::NothingToDo => None,
            Self::Patched(report) => Some(&**report),
        }
    }
}

/// Result of applying one structural rule to one entry
#[derive(Debug)]
enum Application {
    Patched(Vec<u8>),
    Unchanged,
    Inapplicable(String),
    Malformed(String),
    Failed(String),
}

/// Everything Scanning learns about the container
#[derive(Debug, Default)]
struct Scan {
    original_hash: ContentHash,
    entries: Vec<EntryInfo>,
    changes: PendingChangeSet,
    carrier_present: bool,
    installed: BTreeMap<UnitName, UnitGroup>,
    patched: Vec<UnitName>,
    inapplicable: Vec<String>,
    failed: Vec<String>,
    malformed: Vec<UnitName>,
}

/// Written but not yet swapped archive
struct Staged {
    file: NamedTempFile,
    hash: ContentHash,
    excluded: usize,
    copied: usize,
}

/// Drives one patch run over a container
pub struct PatchEngine {
    config: PatchConfig,
    rules: FrozenRules,
    resolver: Box<dyn UnitResolver>,
    companion: Option<CompanionPackage>,
    phase: PatchPhase,
}

impl PatchEngine {
    /// Create an engine resolving runtime units over the configured classpath
    #[must_use]
    pub fn new(config: PatchConfig, rules: FrozenRules) -> Self {
        let resolver = ArchiveResolver::new(config.effective_classpath());
        Self {
            config,
            rules,
            resolver: Box::new(resolver),
            companion: None,
            phase: PatchPhase::Scanning,
        }
    }

    /// Create an engine and load the configured companion package
    ///
    /// `extra_prefixes` are added to the configured companion prefixes.
    ///
    /// # Errors
    /// Returns error if the companion archive cannot be read
    pub fn open(config: PatchConfig, rules: FrozenRules, extra_prefixes: &[String]) -> EngineResult<Self> {
        let companion = match &config.companion {
            Some(companion) => {
                let mut prefixes = companion.prefixes.clone();
                prefixes.extend(extra_prefixes.iter().cloned());
                Some(CompanionPackage::load(&companion.path, &prefixes, &config.tag_carrier)?)
            }
            None => None,
        };
        let mut engine = Self::new(config, rules);
        engine.companion = companion;
        Ok(engine)
    }

    /// Replace the runtime resolver
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl UnitResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Use a companion package
    #[must_use]
    pub fn with_companion(mut self, companion: CompanionPackage) -> Self {
        self.companion = Some(companion);
        self
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> PatchPhase {
        self.phase
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Run the engine once
    ///
    /// # Errors
    /// Returns error if the container cannot be read, the new archive cannot
    /// be written, or the swap fails. The container is untouched in every
    /// error case.
    pub fn run(&mut self) -> EngineResult<PatchOutcome> {
        self.phase = PatchPhase::Scanning;
        let result = self.run_phases();
        if let Err(e) = &result {
            tracing::error!("Patch run failed while {}: {}", self.phase, e);
            self.advance(PatchPhase::Failed);
        }
        result
    }

    fn advance(&mut self, next: PatchPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "invalid phase change {} -> {}",
            self.phase,
            next
        );
        tracing::debug!("Phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    fn run_phases(&mut self) -> EngineResult<PatchOutcome> {
        tracing::info!(
            "Scanning {} with {} rules",
            self.config.container.display(),
            self.rules.len()
        );
        let mut scan = self.scan()?;

        self.advance(PatchPhase::Deciding);
        let synthesized = self.plan_synthesis(&mut scan);
        let companion = self.plan_companion(&mut scan);
        if scan.changes.is_empty() {
            tracing::info!("Container is current, nothing to do");
            self.advance(PatchPhase::Done);
            return Ok(PatchOutcome::NothingToDo);
        }
        let carrier_added = !scan.carrier_present;

        self.advance(PatchPhase::Writing);
        let staged = self.write(&scan)?;

        self.advance(PatchPhase::Swapping);
        let container = self.config.container.clone();
        let backup = ensure_backup(&container, &self.config.backup_suffix)?;
        swap_in(staged.file, &container, &backup.path)?;

        self.advance(PatchPhase::Done);
        let report = PatchReport {
            container,
            original_hash: scan.original_hash,
            new_hash: staged.hash,
            backup: backup.path,
            backup_created: backup.created,
            patched: scan.patched,
            synthesized,
            companion,
            carrier_added,
            excluded: staged.excluded,
            copied: staged.copied,
            inapplicable: scan.inapplicable,
            failed: scan.failed,
            malformed: scan.malformed,
        };
        tracing::info!(
            "Patched {}: {} rewritten, {} synthesized, {} companion units, {} -> {}",
            report.container.display(),
            report.patched.len(),
            report.synthesized.len(),
            report.companion.len(),
            report.original_hash.short(),
            report.new_hash.short()
        );
        Ok(PatchOutcome::Patched(Box::new(report)))
    }

    fn scan(&self) -> EngineResult<Scan> {
        let path = &self.config.container;
        let mut container = Container::open(path)?;
        let mut scan = Scan {
            original_hash: file_hash(path)?,
            entries: container.entries()?,
            ..Scan::default()
        };
        let carrier: Option<UnitName> = self.config.tag_carrier.parse().ok();
        let mut seen = BTreeSet::new();

        for entry in &scan.entries {
            let Some(unit) = entry.kind.unit() else {
                continue;
            };
            if carrier.as_ref() == Some(unit) {
                scan.carrier_present = true;
            }

            let mut bytes = None;
            if self.companion.as_ref().is_some_and(|c| c.manages(unit)) {
                let raw = container.read(entry.index)?;
                scan.installed
                    .entry(unit.outermost())
                    .or_default()
                    .insert(unit.clone(), raw.clone());
                bytes = Some(raw);
            }

            if !self.config.in_namespace(unit) {
                continue;
            }
            let Some(rule) = self.rules.structural(unit) else {
                continue;
            };
            seen.insert(unit.clone());
            let raw = match bytes {
                Some(raw) => raw,
                None => container.read(entry.index)?,
            };

            match apply_isolated(rule, &raw) {
                Application::Patched(patched) => {
                    tracing::debug!("Rule {} patched {}", rule.name(), unit);
                    scan.changes.change(unit.clone(), patched);
                    scan.patched.push(unit.clone());
                }
                Application::Unchanged => {
                    tracing::debug!("Rule {} already applied to {}", rule.name(), unit);
                }
                Application::Inapplicable(reason) => {
                    tracing::warn!("Rule {} inapplicable to {}: {}", rule.name(), unit, reason);
                    scan.inapplicable.push(format!("{}: {reason}", rule.name()));
                }
                Application::Malformed(reason) => {
                    tracing::warn!("Unit {} is malformed, copying unchanged: {}", unit, reason);
                    scan.malformed.push(unit.clone());
                }
                Application::Failed(reason) => {
                    tracing::error!("Rule {} failed on {}: {}", rule.name(), unit, reason);
                    scan.failed.push(format!("{}: {reason}", rule.name()));
                }
            }
        }

        for rule in self.rules.iter() {
            let target = rule.target();
            if matches!(rule, TransformationRule::Structural(_)) && !seen.contains(target) {
                let reason = if self.config.in_namespace(target) {
                    "unit not in container"
                } else {
                    "unit outside patchable namespaces"
                };
                tracing::warn!("Rule {} inapplicable to {}: {}", rule.name(), target, reason);
                scan.inapplicable.push(format!("{}: {reason}", rule.name()));
            }
        }
        Ok(scan)
    }

    fn plan_synthesis(&self, scan: &mut Scan) -> Vec<UnitName> {
        let mut synthesized = Vec::new();
        for rule in self.rules.synthesis() {
            let target = rule.target();
            if let Some(metadata) = self.resolver.resolve(target) {
                if metadata.has_tag(rule.tag()) {
                    tracing::debug!("Synthesis {} current at {}", rule.name(), rule.tag());
                    continue;
                }
            }
            match dump_isolated(rule) {
                Ok(bytes) => {
                    tracing::debug!("Synthesis {} emitted {} ({} bytes)", rule.name(), target, bytes.len());
                    scan.changes.add(target.clone(), AddedKind::Synthesized, bytes);
                    scan.changes.exclude(target.clone());
                    scan.changes.exclude(rule.supersedes());
                    synthesized.push(target.clone());
                }
                Err(reason) => {
                    tracing::error!("Synthesis {} failed: {}", rule.name(), reason);
                    scan.failed.push(format!("{}: {reason}", rule.name()));
                }
            }
        }
        synthesized
    }

    fn plan_companion(&self, scan: &mut Scan) -> Vec<UnitName> {
        let Some(companion) = &self.companion else {
            return Vec::new();
        };
        let mut written = Vec::new();
        for (root, group) in companion.groups() {
            match companion.decide(root, scan.installed.get(root)) {
                GroupDecision::Current => {
                    tracing::debug!("Companion unit {} is current", root);
                }
                decision => {
                    tracing::debug!("Companion unit {} {:?}, injecting {} units", root, decision, group.len());
                    for (unit, bytes) in group.units() {
                        scan.changes.add(unit.clone(), AddedKind::Companion, bytes.to_vec());
                        written.push(unit.clone());
                    }
                    scan.changes.exclude(root.clone());
                }
            }
        }
        written
    }

    fn carrier_bytes(&self) -> EngineResult<Vec<u8>> {
        if let Some(bytes) = self.companion.as_ref().and_then(CompanionPackage::carrier_bytes) {
            return Ok(bytes.to_vec());
        }
        Ok(UnitBuilder::annotation_type(&self.config.tag_carrier).dump()?)
    }

    fn write(&self, scan: &Scan) -> EngineResult<Staged> {
        let path = &self.config.container;
        let dir = parent_dir(path);
        let mut file = NamedTempFile::new_in(dir).map_err(|e| EngineError::io(dir, e))?;
        let tmp_path = file.path().to_path_buf();
        let mut container = Container::open(path)?;
        let mut excluded = 0;
        let mut copied = 0;

        {
            let mut writer = ContainerWriter::new(&tmp_path, BufWriter::new(file.as_file_mut()));

            for entry in &scan.entries {
                if writer.contains(&entry.name) {
                    continue;
                }
                if let Some(unit) = entry.kind.unit() {
                    if scan.changes.is_excluded(unit) {
                        tracing::debug!("Dropping superseded {}", entry.name);
                        excluded += 1;
                        continue;
                    }
                    if let Some(bytes) = scan.changes.changed(unit) {
                        writer.add_unit(unit, bytes)?;
                        continue;
                    }
                }
                container.copy_to(entry.index, &mut writer)?;
                copied += 1;
            }

            if !scan.carrier_present {
                if let Ok(carrier) = self.config.tag_carrier.parse::<UnitName>() {
                    writer.add_unit(&carrier, &self.carrier_bytes()?)?;
                    tracing::debug!("Added tag carrier {}", carrier);
                }
            }

            for added in scan.changes.added() {
                if !writer.add_unit(&added.name, &added.bytes)? {
                    tracing::warn!("Skipping duplicate {:?} unit {}", added.kind, added.name);
                }
            }

            writer
                .finish()?
                .into_inner()
                .map_err(|e| EngineError::io(&tmp_path, e.into_error()))?;
        }

        file.as_file()
            .sync_all()
            .map_err(|e| EngineError::io(&tmp_path, e))?;
        let hash = file_hash(&tmp_path)?;
        tracing::debug!("Staged {} ({})", tmp_path.display(), hash.short());
        Ok(Staged {
            file,
            hash,
            excluded,
            copied,
        })
    }
}

impl Debug for PatchEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchEngine")
            .field("config", &self.config)
            .field("rules", &self.rules.len())
            .field("companion", &self.companion.as_ref().map(CompanionPackage::path))
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// Apply a structural rule, turning errors and panics into an outcome
fn apply_isolated(rule: &dyn StructuralRule, raw: &[u8]) -> Application {
    let model = match ClassFile::parse(raw) {
        Ok(model) => model,
        Err(e) => return Application::Malformed(e.to_string()),
    };
    match panic::catch_unwind(AssertUnwindSafe(|| rule.apply(model, raw))) {
        Ok(Ok(RuleOutcome::Patched(bytes))) => match ClassFile::parse(&bytes) {
            Ok(_) => Application::Patched(bytes),
            Err(e) => Application::Failed(format!("produced a malformed unit: {e}")),
        },
        Ok(Ok(RuleOutcome::Unchanged)) => Application::Unchanged,
        Ok(Ok(RuleOutcome::Inapplicable(reason))) => Application::Inapplicable(reason),
        Ok(Err(e)) => Application::Failed(e.to_string()),
        Err(payload) => Application::Failed(format!("panicked: {}", panic_message(&*payload))),
    }
}

/// Emit a synthesis rule's unit, turning errors and panics into a message
fn dump_isolated(rule: &dyn SynthesisRule) -> Result<Vec<u8>, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| rule.dump())) {
        Ok(Ok(bytes)) => ClassFile::parse(&bytes)
            .map(|_| bytes)
            .map_err(|e| format!("produced a malformed unit: {e}")),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{MockUnitResolver, UnitMetadata};
    use splice_rules::{BuilderSynthesis, RuleRegistry};
    use splice_unit::VersionTag;

    const CARRIER: &str = "splice/runtime/PatchVersion";

    #[test]
    fn phase_transitions() {
        use PatchPhase::*;
        assert!(Scanning.can_advance_to(Deciding));
        assert!(Deciding.can_advance_to(Done));
        assert!(Writing.can_advance_to(Failed));
        assert!(!Deciding.can_advance_to(Failed));
        assert!(!Done.can_advance_to(Scanning));
        assert!(!Scanning.can_advance_to(Writing));
        assert!(Done.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 7");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static");
    }

    #[test]
    fn apply_isolated_reports_malformed() {
        #[derive(Debug)]
        struct Never;
        impl StructuralRule for Never {
            fn name(&self) -> &str {
                "never"
            }
            fn target(&self) -> &UnitName {
                unreachable!()
            }
            fn tag(&self) -> &VersionTag {
                unreachable!()
            }
            fn apply(&self, _: ClassFile, _: &[u8]) -> Result<RuleOutcome, splice_rules::RuleError> {
                unreachable!("malformed units never reach a rule")
            }
        }
        assert!(matches!(apply_isolated(&Never, b"junk"), Application::Malformed(_)));
    }

    #[test]
    fn synthesis_skipped_when_runtime_current() {
        let tag = VersionTag::new(CARRIER, "1");
        let target: UnitName = "host/Gen".parse().unwrap();
        let mut registry = RuleRegistry::new();
        registry
            .register(TransformationRule::synthesis(BuilderSynthesis::new(
                "gen",
                target.clone(),
                tag.clone(),
                Ok,
            )))
            .unwrap();

        let mut resolver = MockUnitResolver::new();
        let found = UnitMetadata {
            name: target.clone(),
            tags: vec![tag],
        };
        resolver
            .expect_resolve()
            .withf(move |unit| *unit == target)
            .times(1)
            .returning(move |_| Some(found.clone()));

        let engine = PatchEngine::new(PatchConfig::new("unused.jar"), registry.freeze())
            .with_resolver(resolver);
        let mut scan = Scan::default();
        assert!(engine.plan_synthesis(&mut scan).is_empty());
        assert!(scan.changes.is_empty());
    }

    #[test]
    fn synthesis_planned_with_exclusion() {
        let target: UnitName = "host/Gen".parse().unwrap();
        let old: UnitName = "host/OldGen".parse().unwrap();
        let mut registry = RuleRegistry::new();
        registry
            .register(TransformationRule::synthesis(
                BuilderSynthesis::new("gen", target.clone(), VersionTag::new(CARRIER, "2"), Ok)
                    .with_supersedes(old.clone()),
            ))
            .unwrap();

        let mut resolver = MockUnitResolver::new();
        resolver.expect_resolve().returning(|_| None);

        let engine = PatchEngine::new(PatchConfig::new("unused.jar"), registry.freeze())
            .with_resolver(resolver);
        let mut scan = Scan::default();
        assert_eq!(engine.plan_synthesis(&mut scan), vec![target.clone()]);
        assert!(scan.changes.is_excluded(&"host/OldGen$1".parse().unwrap()));
        assert!(scan.changes.is_excluded(&target));
        assert_eq!(scan.changes.added_count(AddedKind::Synthesized), 1);
    }
}

//! Testing utilities for the Splice workspace
//!
//! Shared fixtures: synthetic units, on-disk fixture containers, and sample
//! rules that patch, fail, or panic.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use splice_rules::{
    BuilderSynthesis, MethodEdit, MethodRule, RuleError, RuleOutcome, StructuralRule,
    TransformationRule,
};
use splice_unit::{access, ClassFile, CodeBody, UnitBuilder, UnitName, VersionTag};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const CARRIER: &str = "splice/runtime/PatchVersion";

pub const MANIFEST: &str = "META-INF/MANIFEST.MF";

pub fn name(s: &str) -> UnitName {
    s.parse().unwrap()
}

pub fn tag(version: &str) -> VersionTag {
    VersionTag::new(CARRIER, version)
}

/// Unit with a constructor and `start()V`, both `return`
pub fn server_unit(internal_name: &str) -> Vec<u8> {
    UnitBuilder::new(internal_name)
        .field(access::PRIVATE, "port", "I")
        .method(access::PUBLIC, "<init>", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))
        .method(access::PUBLIC, "start", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))
        .dump()
        .unwrap()
}

/// Unit whose constructor runs `super()` like compiled code does
pub fn constructed_unit(internal_name: &str) -> Vec<u8> {
    let mut builder = UnitBuilder::new(internal_name);
    let init = builder
        .pool_mut()
        .intern_method_ref("java/lang/Object", "<init>", "()V")
        .unwrap();
    let [hi, lo] = init.to_be_bytes();
    builder
        .method(
            access::PUBLIC,
            "<init>",
            "()V",
            Some(CodeBody::new(1, 1, vec![0x2a, 0xb7, hi, lo, 0xb1])),
        )
        .dump()
        .unwrap()
}

/// Empty unit
pub fn plain_unit(internal_name: &str) -> Vec<u8> {
    UnitBuilder::new(internal_name).dump().unwrap()
}

/// Empty unit carrying a class-level tag
pub fn tagged_unit(internal_name: &str, version: &str) -> Vec<u8> {
    UnitBuilder::new(internal_name).tag(tag(version)).dump().unwrap()
}

/// Write a zip archive with the given entries, in order
pub fn write_jar(path: &Path, entries: &[(String, Vec<u8>)]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (entry, bytes) in entries {
        zip.start_file(entry.as_str(), SimpleFileOptions::default())
            .unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// Every entry of an archive, by name
pub fn read_jar(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).unwrap();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        entries.insert(entry.name().to_owned(), bytes);
    }
    entries
}

/// Entry names of an archive, in archive order
pub fn jar_entry_names(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|index| archive.name_for_index(index).unwrap().to_owned())
        .collect()
}

/// Entry for a unit
pub fn unit_entry(internal_name: &str, bytes: Vec<u8>) -> (String, Vec<u8>) {
    (format!("{internal_name}.class"), bytes)
}

/// Host container used across engine tests
///
/// ```text
/// META-INF/MANIFEST.MF
/// host/net/Server.class          start()V, <init>()V
/// host/net/Server$Worker.class
/// host/net/Session.class         start()V, <init>()V
/// host/util/Helper.class
/// lib/Other.class                outside the host namespace
/// ```
pub fn host_entries() -> Vec<(String, Vec<u8>)> {
    vec![
        (MANIFEST.to_string(), b"Manifest-Version: 1.0\r\n\r\n".to_vec()),
        unit_entry("host/net/Server", server_unit("host/net/Server")),
        unit_entry("host/net/Server$Worker", plain_unit("host/net/Server$Worker")),
        unit_entry("host/net/Session", server_unit("host/net/Session")),
        unit_entry("host/util/Helper", plain_unit("host/util/Helper")),
        unit_entry("lib/Other", server_unit("lib/Other")),
    ]
}

/// Write the host container into `dir` and return its path
pub fn host_jar(dir: &Path) -> PathBuf {
    let path = dir.join("host.jar");
    write_jar(&path, &host_entries());
    path
}

/// Edit that prepends four `nop`s
#[derive(Debug, Clone, Copy, Default)]
pub struct PadEdit;

impl MethodEdit for PadEdit {
    fn edit(&self, class: &mut ClassFile, index: usize) -> Result<(), RuleError> {
        let mut code = class
            .method_code(index)?
            .ok_or_else(|| RuleError::failed("pad", "method has no body"))?;
        code.insert_prologue(&class.pool, &[0, 0, 0, 0], 0)?;
        class.set_method_code(index, &code)?;
        Ok(())
    }
}

/// Rule padding `target.start()V`
pub fn pad_rule(target: &str, version: &str) -> TransformationRule {
    TransformationRule::structural(MethodRule::new(
        format!("pad-{target}"),
        name(target),
        "start",
        "()V",
        tag(version),
        PadEdit,
    ))
}

/// Rule padding a method the unit does not declare
pub fn missing_method_rule(target: &str) -> TransformationRule {
    TransformationRule::structural(MethodRule::new(
        "pad-missing",
        name(target),
        "stop",
        "()V",
        tag("1"),
        PadEdit,
    ))
}

/// Structural rule that panics on every unit
#[derive(Debug)]
pub struct PanickingRule {
    pub target: UnitName,
    pub tag: VersionTag,
}

impl StructuralRule for PanickingRule {
    fn name(&self) -> &str {
        "panicking"
    }

    fn target(&self) -> &UnitName {
        &self.target
    }

    fn tag(&self) -> &VersionTag {
        &self.tag
    }

    fn apply(&self, _model: ClassFile, _raw: &[u8]) -> Result<RuleOutcome, RuleError> {
        panic!("rule exploded on {}", self.target)
    }
}

/// Structural rule that always returns an error
#[derive(Debug)]
pub struct ErroringRule {
    pub target: UnitName,
    pub tag: VersionTag,
}

impl StructuralRule for ErroringRule {
    fn name(&self) -> &str {
        "erroring"
    }

    fn target(&self) -> &UnitName {
        &self.target
    }

    fn tag(&self) -> &VersionTag {
        &self.tag
    }

    fn apply(&self, _model: ClassFile, _raw: &[u8]) -> Result<RuleOutcome, RuleError> {
        Err(RuleError::failed("erroring", "refusing to edit"))
    }
}

/// Structural rule returning bytes that are not a unit
#[derive(Debug)]
pub struct CorruptingRule {
    pub target: UnitName,
    pub tag: VersionTag,
}

impl StructuralRule for CorruptingRule {
    fn name(&self) -> &str {
        "corrupting"
    }

    fn target(&self) -> &UnitName {
        &self.target
    }

    fn tag(&self) -> &VersionTag {
        &self.tag
    }

    fn apply(&self, _model: ClassFile, _raw: &[u8]) -> Result<RuleOutcome, RuleError> {
        Ok(RuleOutcome::Patched(b"\xca\xfe\xba\xbe".to_vec()))
    }
}

/// Synthesis rule emitting `target` with a static `generated()V`
pub fn generated_rule(target: &str, version: &str) -> TransformationRule {
    TransformationRule::synthesis(BuilderSynthesis::new(
        format!("gen-{target}"),
        name(target),
        tag(version),
        |builder| {
            Ok(builder.method(
                access::PUBLIC | access::STATIC,
                "generated",
                "()V",
                Some(CodeBody::new(0, 0, vec![0xb1])),
            ))
        },
    ))
}

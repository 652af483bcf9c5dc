//! Container access
//!
//! [`Container`] reads a zip archive entry by entry; [`ContainerWriter`]
//! assembles a new archive from added bytes and raw copies of the old
//! entries. The original archive is never opened for writing.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use splice_unit::{ContentHash, UnitName};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{EngineError, EngineResult};

/// What an archive entry holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Directory marker
    Directory,
    /// Bytecode unit
    Unit(UnitName),
    /// Anything else (manifests, resources)
    Resource,
}

impl EntryKind {
    /// Classify an entry by name
    #[must_use]
    pub fn classify(name: &str, is_dir: bool) -> Self {
        if is_dir {
            return Self::Directory;
        }
        UnitName::from_entry_name(name).map_or(Self::Resource, Self::Unit)
    }

    /// Unit identifier, if the entry is a unit
    #[inline]
    #[must_use]
    pub fn unit(&self) -> Option<&UnitName> {
        match self {
            Self::Unit(name) => Some(name),
            Self::Directory | Self::Resource => None,
        }
    }
}

/// Name and kind of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub index: usize,
    pub name: String,
    pub kind: EntryKind,
}

/// Read-only view of a container archive
#[derive(Debug)]
pub struct Container {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
}

impl Container {
    /// Open an archive for reading
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or is not a zip archive
    pub fn open(path: &Path) -> EngineResult<Self> {
        let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| EngineError::archive(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    /// Archive path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    /// Whether the archive has no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Name and kind of the entry at `index`
    ///
    /// # Errors
    /// Returns error if the entry header cannot be read
    pub fn entry(&mut self, index: usize) -> EngineResult<EntryInfo> {
        let entry = self
            .archive
            .by_index_raw(index)
            .map_err(|e| EngineError::archive(&self.path, e))?;
        let name = entry.name().to_owned();
        let kind = EntryKind::classify(&name, entry.is_dir());
        Ok(EntryInfo { index, name, kind })
    }

    /// All entries in archive order
    ///
    /// # Errors
    /// Returns error if any entry header cannot be read
    pub fn entries(&mut self) -> EngineResult<Vec<EntryInfo>> {
        (0..self.len()).map(|i| self.entry(i)).collect()
    }

    /// Decompressed bytes of the entry at `index`
    ///
    /// # Errors
    /// Returns error if the entry cannot be read or decompressed
    pub fn read(&mut self, index: usize) -> EngineResult<Vec<u8>> {
        let mut entry = self
            .archive
            .by_index(index)
            .map_err(|e| EngineError::archive(&self.path, e))?;
        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| EngineError::io(&self.path, e))?;
        Ok(bytes)
    }

    /// Bytes of a unit, or `None` if the archive lacks it
    ///
    /// # Errors
    /// Returns error if the entry exists but cannot be read
    pub fn read_unit(&mut self, unit: &UnitName) -> EngineResult<Option<Vec<u8>>> {
        let Some(index) = self.archive.index_for_name(&unit.entry_name()) else {
            return Ok(None);
        };
        self.read(index).map(Some)
    }

    /// Copy the entry at `index` into `writer` without recompressing
    ///
    /// # Errors
    /// Returns error if the entry cannot be read or written
    pub fn copy_to<W: Write + Seek>(
        &mut self,
        index: usize,
        writer: &mut ContainerWriter<W>,
    ) -> EngineResult<()> {
        let entry = self
            .archive
            .by_index_raw(index)
            .map_err(|e| EngineError::archive(&self.path, e))?;
        let name = entry.name().to_owned();
        writer
            .zip
            .raw_copy_file(entry)
            .map_err(|e| EngineError::archive(&writer.path, e))?;
        writer.written.insert(name);
        Ok(())
    }
}

/// Digest of a whole file
///
/// # Errors
/// Returns error if the file cannot be read
pub fn file_hash(path: &Path) -> EngineResult<ContentHash> {
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    ContentHash::compute_reader(BufReader::new(file)).map_err(|e| EngineError::io(path, e))
}

/// Builder for a new archive that tracks the entry names it has written
pub struct ContainerWriter<W: Write + Seek> {
    path: PathBuf,
    zip: ZipWriter<W>,
    written: HashSet<String>,
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Start an archive over `sink`; `path` names it in errors
    pub fn new(path: impl Into<PathBuf>, sink: W) -> Self {
        Self {
            path: path.into(),
            zip: ZipWriter::new(sink),
            written: HashSet::new(),
        }
    }

    /// Whether an entry with this name has been written
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.written.contains(name)
    }

    /// Number of entries written
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.written.len()
    }

    /// Whether nothing has been written yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }

    /// Write a new entry; returns `false` if the name was already written
    ///
    /// # Errors
    /// Returns error if the archive cannot be written
    pub fn add(&mut self, name: &str, bytes: &[u8]) -> EngineResult<bool> {
        if self.written.contains(name) {
            return Ok(false);
        }
        self.zip
            .start_file(name, SimpleFileOptions::default())
            .map_err(|e| EngineError::archive(&self.path, e))?;
        self.zip
            .write_all(bytes)
            .map_err(|e| EngineError::io(&self.path, e))?;
        self.written.insert(name.to_owned());
        Ok(true)
    }

    /// Write a unit under its entry name
    ///
    /// # Errors
    /// Returns error if the archive cannot be written
    pub fn add_unit(&mut self, unit: &UnitName, bytes: &[u8]) -> EngineResult<bool> {
        self.add(&unit.entry_name(), bytes)
    }

    /// Write the central directory and return the sink
    ///
    /// # Errors
    /// Returns error if the archive cannot be finalized
    pub fn finish(self) -> EngineResult<W> {
        self.zip
            .finish()
            .map_err(|e| EngineError::archive(&self.path, e))
    }
}

impl<W: Write + Seek> std::fmt::Debug for ContainerWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerWriter")
            .field("path", &self.path)
            .field("written", &self.written.len())
            .finish_non_exhaustive()
    }
}

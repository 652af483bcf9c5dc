//! Patch configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! container = "/srv/host/server.jar"
//! namespaces = ["host/net/", "host/runtime/"]
//! tag_carrier = "splice/runtime/PatchVersion"
//!
//! [companion]
//! path = "/srv/host/splice.jar"
//! prefixes = ["splice/runtime/"]
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use splice_intercept::InstallConfig;

use crate::error::{EngineError, EngineResult};

/// Default backup file suffix
pub const DEFAULT_BACKUP_SUFFIX: &str = ".bak";

/// Default version tag carrier annotation
pub const DEFAULT_TAG_CARRIER: &str = "splice/runtime/PatchVersion";

/// Settings for one patch run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchConfig {
    /// Container archive to patch
    pub container: PathBuf,
    /// Suffix appended to the container file name for the backup
    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,
    /// Entry prefixes eligible for patching; empty means every unit
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Internal name of the annotation that carries version tags
    #[serde(default = "default_tag_carrier")]
    pub tag_carrier: String,
    /// Companion package supplying engine-owned units
    #[serde(default)]
    pub companion: Option<CompanionConfig>,
    /// Archives and directories the runtime resolver searches
    ///
    /// Empty means the container itself.
    #[serde(default)]
    pub classpath: Vec<PathBuf>,
    /// Interception pipeline hook points
    #[serde(default)]
    pub intercept: Option<InstallConfig>,
}

/// Companion package settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanionConfig {
    /// Archive holding the companion units
    pub path: PathBuf,
    /// Entry prefixes of units to inject
    #[serde(default)]
    pub prefixes: Vec<String>,
}

fn default_backup_suffix() -> String {
    DEFAULT_BACKUP_SUFFIX.to_string()
}

fn default_tag_carrier() -> String {
    DEFAULT_TAG_CARRIER.to_string()
}

impl PatchConfig {
    /// Configuration with defaults for `container`
    #[must_use]
    pub fn new(container: impl Into<PathBuf>) -> Self {
        Self {
            container: container.into(),
            backup_suffix: default_backup_suffix(),
            namespaces: Vec::new(),
            tag_carrier: default_tag_carrier(),
            companion: None,
            classpath: Vec::new(),
            intercept: None,
        }
    }

    /// Load from a TOML file
    ///
    /// Relative paths inside the file resolve against the file's directory.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not a valid config
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let mut config = Self::from_toml(&text).map_err(|e| EngineError::config(path, e))?;
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Returns the parser's message if the text is not a valid config
    pub fn from_toml(text: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(text).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.backup_suffix.is_empty() {
            return Err("backup_suffix must not be empty".to_string());
        }
        if self.tag_carrier.is_empty() {
            return Err("tag_carrier must not be empty".to_string());
        }
        if self.container.file_name().is_none() {
            return Err(format!("container {} has no file name", self.container.display()));
        }
        Ok(())
    }

    fn resolve_relative(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.container);
        self.classpath.iter_mut().for_each(resolve);
        if let Some(companion) = &mut self.companion {
            resolve(&mut companion.path);
        }
    }

    /// With backup suffix
    #[inline]
    #[must_use]
    pub fn with_backup_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.backup_suffix = suffix.into();
        self
    }

    /// With patchable namespaces
    #[inline]
    #[must_use]
    pub fn with_namespaces<S: Into<String>>(mut self, namespaces: impl IntoIterator<Item = S>) -> Self {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// With tag carrier
    #[inline]
    #[must_use]
    pub fn with_tag_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.tag_carrier = carrier.into();
        self
    }

    /// With companion package
    #[inline]
    #[must_use]
    pub fn with_companion(mut self, companion: CompanionConfig) -> Self {
        self.companion = Some(companion);
        self
    }

    /// With resolver classpath
    #[inline]
    #[must_use]
    pub fn with_classpath(mut self, classpath: Vec<PathBuf>) -> Self {
        self.classpath = classpath;
        self
    }

    /// With interception hook points
    #[inline]
    #[must_use]
    pub fn with_intercept(mut self, intercept: InstallConfig) -> Self {
        self.intercept = Some(intercept);
        self
    }

    /// Classpath the resolver should search
    #[must_use]
    pub fn effective_classpath(&self) -> Vec<PathBuf> {
        if self.classpath.is_empty() {
            vec![self.container.clone()]
        } else {
            self.classpath.clone()
        }
    }

    /// Whether a unit entry lies in a patchable namespace
    #[must_use]
    pub fn in_namespace(&self, unit: &splice_unit::UnitName) -> bool {
        self.namespaces.is_empty() || self.namespaces.iter().any(|ns| unit.is_within(ns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn config_defaults() {
        let config = PatchConfig::from_toml(r#"container = "host.jar""#).unwrap();
        assert_eq!(config, PatchConfig::new("host.jar"));
        assert_eq!(config.backup_suffix, ".bak");
        assert_eq!(config.tag_carrier, DEFAULT_TAG_CARRIER);
        assert_eq!(config.effective_classpath(), vec![PathBuf::from("host.jar")]);
    }

    #[test]
    fn config_full() {
        let config = PatchConfig::from_toml(
            r#"
            container = "/srv/host.jar"
            backup_suffix = ".orig"
            namespaces = ["host/net/"]
            classpath = ["/srv/host.jar", "/srv/lib"]

            [companion]
            path = "/srv/splice.jar"
            prefixes = ["splice/runtime/"]
            "#,
        )
        .unwrap();
        assert_eq!(config.backup_suffix, ".orig");
        assert_eq!(config.namespaces, vec!["host/net/".to_string()]);
        assert_eq!(config.classpath.len(), 2);
        assert_eq!(
            config.companion,
            Some(CompanionConfig {
                path: "/srv/splice.jar".into(),
                prefixes: vec!["splice/runtime/".into()],
            })
        );
    }

    #[test]
    fn config_rejects_unknown_and_empty() {
        assert!(PatchConfig::from_toml(r#"container = "a.jar"
            colour = "blue""#)
        .is_err());
        assert!(PatchConfig::from_toml(r#"container = "a.jar"
            backup_suffix = """#)
        .is_err());
        assert!(PatchConfig::from_toml("").is_err());
    }

    #[test]
    fn config_namespace_filter() {
        let unit = "host/net/Server".parse().unwrap();
        assert!(PatchConfig::new("a.jar").in_namespace(&unit));
        assert!(PatchConfig::new("a.jar").with_namespaces(["host/"]).in_namespace(&unit));
        assert!(!PatchConfig::new("a.jar").with_namespaces(["lib/"]).in_namespace(&unit));
    }

    #[test]
    fn config_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splice.toml");
        std::fs::write(
            &path,
            r#"
            container = "host.jar"
            [companion]
            path = "lib/splice.jar"
            "#,
        )
        .unwrap();

        let config = PatchConfig::load(&path).unwrap();
        assert_eq!(config.container, dir.path().join("host.jar"));
        assert_eq!(config.companion.unwrap().path, dir.path().join("lib/splice.jar"));
    }

    #[test]
    fn config_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "container = 3").unwrap();
        let err = PatchConfig::load(&path).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }
}

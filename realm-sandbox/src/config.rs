//! Sandbox options and the `sandbox.toml` loader.
//!
//! ```toml
//! [sandbox]
//! strict = true
//! speedy = false
//! singular = false
//! recovery = "fresh"
//! inactive_writes = "ignore"
//! patchers = ["timer", "listener", "dom-insertion", "history"]
//! rebind = ["fetch"]
//! ```

use realm_types::PatcherKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Result, SandboxError};

/// What happens to a sandbox's global record when it unmounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    /// The record is discarded; the next mount starts empty.
    #[default]
    Fresh,
    /// The record survives unmount and is visible again on remount.
    Preserve,
}

/// How the membrane treats writes while the sandbox is not mounted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InactiveWrites {
    /// Drop the write silently.
    #[default]
    Ignore,
    /// Fail the write with a script `TypeError`.
    Reject,
}

/// Per-sandbox options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxOptions {
    /// Reject writes to read-only host globals instead of absorbing them locally.
    pub strict: bool,
    /// Cache host reads of frozen properties inside the membrane.
    pub speedy: bool,
    /// Only one sandbox may be mounted at a time (enforced by the manager).
    pub singular: bool,
    pub recovery: RecoveryMode,
    pub inactive_writes: InactiveWrites,
    /// Patchers to install on mount. Install order is fixed regardless of list order.
    pub patchers: Vec<PatcherKind>,
    /// Host functions exposed bound to the real global.
    pub rebind: Vec<String>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            strict: true,
            speedy: false,
            singular: false,
            recovery: RecoveryMode::Fresh,
            inactive_writes: InactiveWrites::Ignore,
            patchers: PatcherKind::ALL.to_vec(),
            rebind: vec!["fetch".to_string()],
        }
    }
}

impl SandboxOptions {
    /// Parses a `[sandbox]` table from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| SandboxError::Config(e.to_string()))?;
        file.sandbox.validate()?;
        Ok(file.sandbox)
    }

    /// Checks the options for contradictions.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        if let Some(dup) = self.patchers.iter().find(|k| !seen.insert(**k)) {
            return Err(SandboxError::Configuration(format!(
                "patcher '{dup}' listed more than once"
            )));
        }
        if let Some(empty) = self.rebind.iter().find(|name| name.trim().is_empty()) {
            return Err(SandboxError::Configuration(format!(
                "invalid rebind entry '{empty}'"
            )));
        }
        Ok(())
    }

    /// Enabled patchers in install order.
    pub fn patchers_in_install_order(&self) -> Vec<PatcherKind> {
        let mut kinds = self.patchers.clone();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// Options loaded from disk, remembering where they came from.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    options: SandboxOptions,
    config_path: Option<PathBuf>,
}

impl SandboxConfig {
    /// Loads options from `path`. A missing, unreadable or malformed file
    /// falls back to defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            info!("No sandbox config at {:?}, using defaults", path);
            return Self::with_options(SandboxOptions::default());
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match SandboxOptions::from_toml_str(&contents) {
                Ok(options) => {
                    info!("Loaded sandbox config from {:?}", path);
                    Self {
                        options,
                        config_path: Some(path),
                    }
                }
                Err(e) => {
                    warn!("Failed to parse sandbox config {:?}: {}. Using defaults.", path, e);
                    Self {
                        options: SandboxOptions::default(),
                        config_path: Some(path),
                    }
                }
            },
            Err(e) => {
                warn!("Failed to read sandbox config {:?}: {}", path, e);
                Self {
                    options: SandboxOptions::default(),
                    config_path: Some(path),
                }
            }
        }
    }

    pub fn with_options(options: SandboxOptions) -> Self {
        Self {
            options,
            config_path: None,
        }
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    pub fn has_config_file(&self) -> bool {
        self.config_path.is_some()
    }

    pub fn into_options(self) -> SandboxOptions {
        self.options
    }
}

/// Raw TOML structure.
#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    sandbox: SandboxOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn load_from_str(contents: &str) -> SandboxConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.toml");
        std::fs::write(&path, contents).unwrap();
        SandboxConfig::load_from(path)
    }

    #[test]
    fn defaults() {
        let options = SandboxOptions::default();
        assert!(options.strict);
        assert_eq!(options.recovery, RecoveryMode::Fresh);
        assert_eq!(options.patchers, PatcherKind::ALL.to_vec());
        assert_eq!(options.rebind, vec!["fetch".to_string()]);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::load_from(dir.path().join("nope.toml"));
        assert!(!config.has_config_file());
        assert_eq!(config.options(), &SandboxOptions::default());
    }

    #[test]
    fn full_file() {
        let config = load_from_str(
            r#"
[sandbox]
strict = false
speedy = true
singular = true
recovery = "preserve"
inactive_writes = "reject"
patchers = ["history", "timer"]
rebind = ["fetch", "console"]
"#,
        );
        assert!(config.has_config_file());
        let options = config.options();
        assert!(!options.strict);
        assert!(options.speedy);
        assert!(options.singular);
        assert_eq!(options.recovery, RecoveryMode::Preserve);
        assert_eq!(options.inactive_writes, InactiveWrites::Reject);
        assert_eq!(
            options.patchers_in_install_order(),
            vec![PatcherKind::Timer, PatcherKind::History]
        );
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = load_from_str("[sandbox]\nspeedy = true\n");
        assert!(config.options().speedy);
        assert!(config.options().strict);
        assert_eq!(config.options().patchers.len(), 4);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let config = load_from_str("this is not toml {{{{");
        assert!(config.has_config_file());
        assert_eq!(config.options(), &SandboxOptions::default());
    }

    #[test]
    fn unknown_patcher_is_a_parse_error() {
        let err = SandboxOptions::from_toml_str("[sandbox]\npatchers = [\"clipboard\"]\n").unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn duplicate_patchers_are_rejected() {
        let options = SandboxOptions {
            patchers: vec![PatcherKind::Timer, PatcherKind::Timer],
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(SandboxError::Configuration(_))));
    }

    #[test]
    fn unreadable_path_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::load_from(dir.path());
        assert_eq!(config.options(), &SandboxOptions::default());
    }
}

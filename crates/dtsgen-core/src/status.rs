//! Per-run status document.
//!
//! A run's outcome is recorded as a flat JSON object of boolean and string
//! flags (`data/data.json` under the run root). The document makes re-runs
//! idempotent and is the only input of the metrics pass.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A single status value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    Bool(bool),
    Text(String),
}

impl StatusValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StatusValue::Bool(value) => Some(*value),
            StatusValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StatusValue::Text(value) => Some(value),
            StatusValue::Bool(_) => None,
        }
    }
}

impl From<bool> for StatusValue {
    fn from(value: bool) -> Self {
        StatusValue::Bool(value)
    }
}

impl From<&str> for StatusValue {
    fn from(value: &str) -> Self {
        StatusValue::Text(value.to_string())
    }
}

impl From<String> for StatusValue {
    fn from(value: String) -> Self {
        StatusValue::Text(value)
    }
}

/// Well-known boolean flags of the status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFlag {
    /// The run finished all requested stages.
    Usable,
    PackageDataMissing,
    PackageInstallationFailed,
    CommonjsUnsupported,
    Es5Unsupported,
    LlmRejected,
    UnexpectedFailure,
    HasRepository,
    HasPackageJson,
    HasReadme,
    HasMain,
    HasTests,
    /// Written by the controller's finalization step.
    Finished,
}

impl StatusFlag {
    /// Outcome taxonomy, mutually exclusive apart from `llm_rejected`.
    pub const OUTCOMES: [StatusFlag; 7] = [
        StatusFlag::Usable,
        StatusFlag::PackageDataMissing,
        StatusFlag::PackageInstallationFailed,
        StatusFlag::CommonjsUnsupported,
        StatusFlag::Es5Unsupported,
        StatusFlag::LlmRejected,
        StatusFlag::UnexpectedFailure,
    ];

    /// Which kinds of package data were found.
    pub const DATA: [StatusFlag; 5] = [
        StatusFlag::HasRepository,
        StatusFlag::HasPackageJson,
        StatusFlag::HasReadme,
        StatusFlag::HasMain,
        StatusFlag::HasTests,
    ];

    pub fn key(self) -> &'static str {
        match self {
            StatusFlag::Usable => "usable",
            StatusFlag::PackageDataMissing => "package_data_missing",
            StatusFlag::PackageInstallationFailed => "package_installation_failed",
            StatusFlag::CommonjsUnsupported => "commonjs_unsupported",
            StatusFlag::Es5Unsupported => "es5_unsupported",
            StatusFlag::LlmRejected => "llm_rejected",
            StatusFlag::UnexpectedFailure => "unexpected_failure",
            StatusFlag::HasRepository => "has_repository",
            StatusFlag::HasPackageJson => "has_package_json",
            StatusFlag::HasReadme => "has_readme",
            StatusFlag::HasMain => "has_main",
            StatusFlag::HasTests => "has_tests",
            StatusFlag::Finished => "finished",
        }
    }

    /// Every flag a finished run must carry.
    pub fn baseline() -> impl Iterator<Item = StatusFlag> {
        Self::OUTCOMES
            .into_iter()
            .chain(Self::DATA)
            .chain(std::iter::once(StatusFlag::Finished))
    }
}

impl std::fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Key under which a failed run stores its error message.
pub const FAILURE_MESSAGE_KEY: &str = "failure_message";

/// Errors produced by the status store.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("key {key:?} not found at {path:?}")]
    MissingKey { key: String, path: PathBuf },

    #[error("key {key:?} at {path:?} is not a boolean")]
    NotABool { key: String, path: PathBuf },

    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed status document {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for status operations.
pub type StatusResult<T> = std::result::Result<T, StatusError>;

/// Status document of one run.
///
/// Reads and writes go straight to disk. There is no cross-process locking:
/// each run owns its document and runs never share a root.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// The whole document; empty when nothing was written yet.
    pub fn snapshot(&self) -> StatusResult<BTreeMap<String, StatusValue>> {
        if !self.path.is_file() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| StatusError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StatusError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Store `value` under `key`.
    ///
    /// With `must_exist_already` the key has to be present beforehand, which
    /// is how outcome updates assert that the baseline was initialized.
    pub fn set(
        &self,
        key: &str,
        value: impl Into<StatusValue>,
        must_exist_already: bool,
    ) -> StatusResult<()> {
        let mut data = self.snapshot()?;
        if must_exist_already && !data.contains_key(key) {
            return Err(self.missing(key));
        }
        data.insert(key.to_string(), value.into());
        self.persist(&data)
    }

    /// Read `key`, falling back to `default` unless `must_exist` is set.
    pub fn get(
        &self,
        key: &str,
        must_exist: bool,
        default: Option<StatusValue>,
    ) -> StatusResult<Option<StatusValue>> {
        let mut data = self.snapshot()?;
        match data.remove(key) {
            Some(value) => Ok(Some(value)),
            None if must_exist => Err(self.missing(key)),
            None => Ok(default),
        }
    }

    /// Read a flag that must exist and be boolean.
    pub fn flag(&self, flag: StatusFlag) -> StatusResult<bool> {
        let value = self.get(flag.key(), true, None)?;
        value
            .and_then(|value| value.as_bool())
            .ok_or_else(|| StatusError::NotABool {
                key: flag.key().to_string(),
                path: self.path.clone(),
            })
    }

    pub fn set_flag(
        &self,
        flag: StatusFlag,
        value: bool,
        must_exist_already: bool,
    ) -> StatusResult<()> {
        self.set(flag.key(), value, must_exist_already)
    }

    /// Write every baseline flag as `false` in a single update.
    pub fn initialize_baseline(&self) -> StatusResult<()> {
        let mut data = self.snapshot()?;
        for flag in StatusFlag::baseline() {
            data.insert(flag.key().to_string(), StatusValue::Bool(false));
        }
        self.persist(&data)
    }

    /// Whether a previous run completed (successfully or not).
    pub fn is_finished(&self) -> StatusResult<bool> {
        let value = self.get(StatusFlag::Finished.key(), false, None)?;
        Ok(value.and_then(|value| value.as_bool()).unwrap_or(false))
    }

    fn persist(&self, data: &BTreeMap<String, StatusValue>) -> StatusResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StatusError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(data).map_err(|source| StatusError::Json {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, content).map_err(|source| StatusError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn missing(&self, key: &str) -> StatusError {
        StatusError::MissingKey {
            key: key.to_string(),
            path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, StatusStore) {
        let dir = tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("data").join("data.json"));
        (dir, store)
    }

    #[test]
    fn test_set_and_get_roundtrip() {
        let (_dir, store) = store();
        store.set("usable", true, false).unwrap();
        store.set("failure_message", "boom", false).unwrap();

        assert_eq!(
            store.get("usable", true, None).unwrap(),
            Some(StatusValue::Bool(true))
        );
        assert_eq!(
            store.get("failure_message", true, None).unwrap(),
            Some(StatusValue::Text("boom".to_string()))
        );
    }

    #[test]
    fn test_set_requires_existing_key_when_asked() {
        let (_dir, store) = store();
        let err = store.set("usable", true, true).unwrap_err();
        assert!(matches!(err, StatusError::MissingKey { ref key, .. } if key == "usable"));
        assert!(!store.exists());

        store.set("usable", false, false).unwrap();
        store.set("usable", true, true).unwrap();
        assert!(store.flag(StatusFlag::Usable).unwrap());
    }

    #[test]
    fn test_get_missing_key() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get("usable", true, None),
            Err(StatusError::MissingKey { .. })
        ));
        assert_eq!(
            store
                .get("usable", false, Some(StatusValue::Bool(true)))
                .unwrap(),
            Some(StatusValue::Bool(true))
        );
        assert_eq!(store.get("usable", false, None).unwrap(), None);
    }

    #[test]
    fn test_baseline_covers_every_flag() {
        let (_dir, store) = store();
        store.set("failure_message", "kept", false).unwrap();
        store.initialize_baseline().unwrap();

        let snapshot = store.snapshot().unwrap();
        for flag in StatusFlag::baseline() {
            assert_eq!(snapshot.get(flag.key()), Some(&StatusValue::Bool(false)));
        }
        assert_eq!(
            snapshot.get(FAILURE_MESSAGE_KEY),
            Some(&StatusValue::Text("kept".to_string()))
        );
        assert!(!store.is_finished().unwrap());
    }

    #[test]
    fn test_flag_rejects_text_values() {
        let (_dir, store) = store();
        store.set("usable", "yes", false).unwrap();
        assert!(matches!(
            store.flag(StatusFlag::Usable),
            Err(StatusError::NotABool { .. })
        ));
    }

    #[test]
    fn test_document_is_pretty_json() {
        let (_dir, store) = store();
        store.set_flag(StatusFlag::Es5Unsupported, true, false).unwrap();
        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, "{\n  \"es5_unsupported\": true\n}");
    }

    #[test]
    fn test_malformed_document_is_reported() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "not json").unwrap();
        assert!(matches!(store.snapshot(), Err(StatusError::Json { .. })));
    }

    #[test]
    fn test_flag_keys_match_serde_names() {
        for flag in StatusFlag::baseline() {
            let json = serde_json::to_string(&flag).unwrap();
            assert_eq!(json, format!("\"{}\"", flag.key()));
        }
    }
}

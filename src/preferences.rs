//! Persisted user preferences.
//!
//! A flat JSON object of string keys to string values, rewritten atomically
//! on every change.

use crate::collaborators::PreferenceStore;
use crate::error::PreferenceError;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

/// File-backed preference store.
pub struct FilePreferenceStore {
    values: RwLock<BTreeMap<String, String>>,
    path: PathBuf,
}

impl FilePreferenceStore {
    /// Load preferences from `path`; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, PreferenceError> {
        let values = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| PreferenceError::ReadFailed {
                path: path.display().to_string(),
                source: e,
            })?;

            serde_json::from_str(&contents)
                .map_err(|e| PreferenceError::ParseError(format!("Invalid JSON: {}", e)))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            values: RwLock::new(values),
            path: path.to_path_buf(),
        })
    }

    /// Load preferences, falling back to an empty store on a corrupt file.
    ///
    /// The broken file is left in place and replaced on the next write.
    pub fn load_or_empty(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!("Ignoring unreadable preferences at {:?}: {}", path, e);
            Self {
                values: RwLock::new(BTreeMap::new()),
                path: path.to_path_buf(),
            }
        })
    }

    /// Write all values to disk using write-to-temp then rename.
    fn save(&self, values: &BTreeMap<String, String>) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| PreferenceError::ParseError(format!("Failed to serialize: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        let values = self
            .values
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    /// The in-memory value is updated even when the write fails.
    fn put(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let mut values = self
            .values
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = FilePreferenceStore::load(&dir.path().join("prefs.json")).unwrap();
        assert_eq!(store.get("HDMI_USEROPTION").unwrap(), None);
    }

    #[test]
    fn test_put_persists_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let store = FilePreferenceStore::load(&path).unwrap();
        store.put("HDMI_USEROPTION", "HDMI_ON").unwrap();
        store.put("other", "value").unwrap();

        let reloaded = FilePreferenceStore::load(&path).unwrap();
        assert_eq!(
            reloaded.get("HDMI_USEROPTION").unwrap().as_deref(),
            Some("HDMI_ON")
        );
        assert_eq!(reloaded.get("other").unwrap().as_deref(), Some("value"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            FilePreferenceStore::load(&path),
            Err(PreferenceError::ParseError(_))
        ));

        let store = FilePreferenceStore::load_or_empty(&path);
        assert_eq!(store.get("HDMI_USEROPTION").unwrap(), None);
        store.put("HDMI_USEROPTION", "HDMI_OFF").unwrap();
        assert!(FilePreferenceStore::load(&path).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_write_keeps_memory_value() {
        let dir = tempdir().unwrap();
        // Parent "directory" is a regular file, so the write cannot succeed
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let store = FilePreferenceStore::load_or_empty(&blocker.join("prefs.json"));

        assert!(store.put("HDMI_USEROPTION", "HDMI_ON").is_err());
        assert_eq!(
            store.get("HDMI_USEROPTION").unwrap().as_deref(),
            Some("HDMI_ON")
        );
    }
}

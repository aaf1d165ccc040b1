//! Durable storage for the binding table

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::KeyBinding;

const FORMAT_VERSION: u32 = 1;

/// Errors from the storage collaborator
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported bindings file version {0}")]
    UnsupportedVersion(u32),
}

/// Persistence for keybindings.
///
/// `commit` replaces the stored table with `bindings` and must be durable
/// when it returns `Ok`.
pub trait BindingStore: Send + Sync {
    fn load(&self) -> Result<Vec<KeyBinding>, StoreError>;

    fn commit(&self, bindings: &[KeyBinding]) -> Result<(), StoreError>;
}

#[derive(Serialize, Deserialize)]
struct StoredBindings {
    version: u32,
    bindings: Vec<KeyBinding>,
}

/// Bindings stored as a single JSON document
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "bindings.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl BindingStore for JsonFileStore {
    fn load(&self) -> Result<Vec<KeyBinding>, StoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "no bindings file, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredBindings = serde_json::from_slice(&content)?;
        if stored.version != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(stored.version));
        }
        Ok(stored.bindings)
    }

    fn commit(&self, bindings: &[KeyBinding]) -> Result<(), StoreError> {
        let stored = StoredBindings {
            version: FORMAT_VERSION,
            bindings: bindings.to_vec(),
        };

        // Write next to the target and rename so readers never see a
        // half-written file
        let temp = self.temp_path();
        let file = fs::File::create(&temp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &stored)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&temp, &self.path)?;

        // The rename is only durable once the directory entry is
        if let Some(parent) = self.path.parent() {
            sync_dir(parent)?;
        }

        debug!(path = ?self.path, count = bindings.len(), "bindings committed");
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::model::BindingId;
    use crate::hotkey::{Modifier, ModifierSet};

    fn sample() -> Vec<KeyBinding> {
        vec![KeyBinding {
            id: BindingId(7),
            target: "/Applications/kitty.app".to_string(),
            modifiers: ModifierSet::of(&[Modifier::Option, Modifier::Command]),
            key: "t".to_string(),
            enabled: true,
            order: 0,
        }]
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("bindings.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_commit_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("bindings.json"));

        store.commit(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
        assert!(!dir.path().join("bindings.json.tmp").exists());

        store.commit(&[]).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.json");
        fs::write(&path, r#"{"version":9,"bindings":[]}"#).unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion(9)));
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_sync_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        sync_dir(dir.path()).unwrap();
        sync_dir(Path::new("")).unwrap();

        let err = sync_dir(&dir.path().join("gone")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_commit_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nope").join("bindings.json"));
        assert!(matches!(store.commit(&sample()), Err(StoreError::Io(_))));
    }
}

//! Applied state persisted as a JSON file
//!
//! Every save writes a temporary file next to the state file and renames it
//! into place, so a crash mid-write never leaves a truncated state. The
//! previous file is kept as `<name>.bak`.

use declarative::{AppliedState, Error, Result, StateStore};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// State store backed by a JSON file.
pub struct FileStateStore {
    path: PathBuf,
    /// Serializes the physical write; the executor saves from worker threads
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "bak")
    }

    fn temp_path(&self) -> PathBuf {
        sibling(&self.path, &format!("tmp.{}", std::process::id()))
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

fn state_error(action: &str, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::State(format!("Failed to {action} {}: {e}", path.display()))
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<AppliedState> {
        if !self.path.exists() {
            log::debug!("State file does not exist, using empty state");
            return Ok(AppliedState::default());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| state_error("read state file", &self.path, e))?;
        let state: AppliedState = serde_json::from_str(&content)
            .map_err(|e| state_error("parse state file", &self.path, e))?;

        if state.version > declarative::state::STATE_VERSION {
            return Err(Error::State(format!(
                "{} was written by a newer lakeform (state version {})",
                self.path.display(),
                state.version
            )));
        }

        log::debug!(
            "Loaded state serial {} ({} resources) from {}",
            state.serial,
            state.len(),
            self.path.display()
        );
        Ok(state)
    }

    fn save(&self, state: &AppliedState) -> Result<()> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| state_error("create state directory", dir, e))?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        {
            let mut file =
                fs::File::create(&temp).map_err(|e| state_error("create", &temp, e))?;
            file.write_all(content.as_bytes())
                .and_then(|()| file.write_all(b"\n"))
                .and_then(|()| file.sync_all())
                .map_err(|e| state_error("write", &temp, e))?;
        }

        if self.path.exists() {
            fs::copy(&self.path, self.backup_path())
                .map_err(|e| state_error("back up", &self.path, e))?;
        }
        fs::rename(&temp, &self.path).map_err(|e| state_error("replace", &self.path, e))?;

        log::debug!("Saved state serial {} to {}", state.serial, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{AppliedResource, ResourceId, Value};
    use tempfile::TempDir;

    fn role_state(serial_bumps: usize) -> AppliedState {
        let mut state = AppliedState::default();
        for i in 0..serial_bumps {
            let id = ResourceId::new("iam_role", format!("role{i}"));
            let mut resource = AppliedResource::new(id.clone(), format!("lottery-role-{i}"));
            resource
                .outputs
                .insert("arn".into(), Value::from(format!("arn:aws:iam::1:role/lottery-role-{i}")));
            state.record(&id, Some(resource));
        }
        state
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("lottery.state.json"));
        let state = store.load().unwrap();
        assert!(state.is_empty());
        assert_eq!(state.serial, 0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("nested").join("lottery.state.json"));
        let state = role_state(2);
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.serial, state.serial);
        assert_eq!(loaded.resources, state.resources);
        assert!(!store.backup_path().exists());
    }

    #[test]
    fn test_previous_state_kept_as_backup() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("lottery.state.json"));
        store.save(&role_state(1)).unwrap();
        store.save(&role_state(3)).unwrap();

        let backup: AppliedState =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup.len(), 1);
        assert_eq!(store.load().unwrap().len(), 3);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lottery.state.json");
        fs::write(&path, "{ not json").unwrap();
        let err = FileStateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::State(ref msg) if msg.contains("parse state file")));
    }

    #[test]
    fn test_newer_state_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lottery.state.json");
        let mut state = AppliedState::default();
        state.version = declarative::state::STATE_VERSION + 1;
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();
        assert!(FileStateStore::new(&path).load().is_err());
    }

    #[test]
    fn test_sibling_paths() {
        let path = Path::new("/state/lottery.state.json");
        assert_eq!(sibling(path, "bak"), PathBuf::from("/state/lottery.state.json.bak"));
    }
}

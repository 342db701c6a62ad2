//! Storage layer for ftask
//!
//! All state lives in one data directory:
//!
//! ```text
//! <data dir>/
//!   config.toml         # Optional configuration
//!   tasks.json          # Task forest, array order = sibling order
//!   templates.json      # Recurring templates
//!   reset_state.json    # Last logical day the reset ran for
//!   overrides.json      # Pending local goal overrides
//!   ftask.lock          # Held for the duration of a read-modify-write
//! ```
//!
//! The data directory defaults to the platform data dir and can be
//! overridden with `--data-dir` or `FTASK_DATA_DIR`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::overrides::OverrideEntry;
use crate::recurring::{RecurringTaskTemplate, ResetState};
use crate::task::Task;

pub const TASKS_FILE: &str = "tasks.json";
pub const TEMPLATES_FILE: &str = "templates.json";
pub const RESET_STATE_FILE: &str = "reset_state.json";
pub const OVERRIDES_FILE: &str = "overrides.json";
pub const LOCK_FILE: &str = "ftask.lock";

/// Storage manager for ftask state
#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Storage in `explicit` if given, else the platform data directory.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = explicit {
            return Ok(Self::new(dir));
        }
        let dirs = ProjectDirs::from("", "", "ftask").ok_or_else(|| {
            Error::InvalidConfig(
                "no home directory found; pass --data-dir or set FTASK_DATA_DIR".to_string(),
            )
        })?;
        Ok(Self::new(dirs.data_dir()))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.data_dir.join(TASKS_FILE)
    }

    pub fn templates_file(&self) -> PathBuf {
        self.data_dir.join(TEMPLATES_FILE)
    }

    pub fn reset_state_file(&self) -> PathBuf {
        self.data_dir.join(RESET_STATE_FILE)
    }

    pub fn overrides_file(&self) -> PathBuf {
        self.data_dir.join(OVERRIDES_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }

    /// Resolve a path from configuration against the data directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    /// Take the store-wide lock. Released on drop.
    pub fn lock(&self) -> Result<FileLock> {
        fs::create_dir_all(&self.data_dir)?;
        FileLock::acquire(self.lock_file(), DEFAULT_LOCK_TIMEOUT_MS)
    }

    // =========================================================================
    // File I/O helpers
    // =========================================================================

    /// Write JSON data atomically (write to temp, then rename)
    pub fn write_json<T: Serialize + ?Sized>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }

    /// Read JSON data from a file, or `None` if it does not exist
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    // =========================================================================
    // Typed state
    // =========================================================================

    pub fn load_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.read_json(&self.tasks_file())?.unwrap_or_default())
    }

    pub fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        self.write_json(&self.tasks_file(), tasks)
    }

    pub fn load_templates(&self) -> Result<Vec<RecurringTaskTemplate>> {
        Ok(self.read_json(&self.templates_file())?.unwrap_or_default())
    }

    pub fn save_templates(&self, templates: &[RecurringTaskTemplate]) -> Result<()> {
        self.write_json(&self.templates_file(), templates)
    }

    pub fn load_reset_state(&self) -> Result<ResetState> {
        Ok(self.read_json(&self.reset_state_file())?.unwrap_or_default())
    }

    pub fn save_reset_state(&self, state: &ResetState) -> Result<()> {
        self.write_json(&self.reset_state_file(), state)
    }

    pub fn load_overrides(&self) -> Result<HashMap<String, OverrideEntry>> {
        Ok(self.read_json(&self.overrides_file())?.unwrap_or_default())
    }

    pub fn save_overrides(&self, entries: &HashMap<String, OverrideEntry>) -> Result<()> {
        self.write_json(&self.overrides_file(), entries)
    }
}

/// Append one JSON record as a line, creating the file and its directory.
///
/// Used for outboxes another process consumes, so it does not take the
/// store lock.
pub fn append_jsonl<T: Serialize + ?Sized>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string(record)?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{json}")?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_storage_paths() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path());

        assert_eq!(storage.tasks_file(), temp.path().join("tasks.json"));
        assert_eq!(storage.templates_file(), temp.path().join("templates.json"));
        assert_eq!(storage.reset_state_file(), temp.path().join("reset_state.json"));
        assert_eq!(
            storage.resolve_path(Path::new("feeds/goals.json")),
            temp.path().join("feeds/goals.json")
        );
        assert_eq!(
            storage.resolve_path(Path::new("/abs/goals.json")),
            PathBuf::from("/abs/goals.json")
        );
    }

    #[test]
    fn test_missing_files_load_empty() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().join("fresh"));

        assert!(storage.load_tasks().unwrap().is_empty());
        assert!(storage.load_templates().unwrap().is_empty());
        assert_eq!(storage.load_reset_state().unwrap(), ResetState::default());
    }

    #[test]
    fn test_tasks_round_trip_preserves_order() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path());
        let now = Utc::now();
        let tasks = vec![
            Task::new("b", None, now).with_id("b"),
            Task::new("a", None, now).with_id("a"),
            Task::new("b1", Some("b".to_string()), now).with_id("b1"),
        ];

        storage.save_tasks(&tasks).unwrap();
        let loaded = storage.load_tasks().unwrap();
        assert_eq!(loaded, tasks);
        assert!(!temp.path().join("tasks.json.tmp").exists());
    }

    #[test]
    fn test_reset_state_round_trip() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path());
        let state = ResetState {
            last_reset_date: NaiveDate::from_ymd_opt(2026, 3, 10),
        };
        storage.save_reset_state(&state).unwrap();
        assert_eq!(storage.load_reset_state().unwrap(), state);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path());
        fs::write(storage.tasks_file(), "[{").unwrap();
        assert!(matches!(storage.load_tasks(), Err(Error::Json(_))));
    }

    #[test]
    fn test_append_jsonl_creates_and_appends() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("bridge/outbox.jsonl");

        append_jsonl(&file, &serde_json::json!({"n": 1})).unwrap();
        append_jsonl(&file, &serde_json::json!({"n": 2})).unwrap();

        let content = fs::read_to_string(&file).unwrap();
        let records: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["n"], 2);
    }
}

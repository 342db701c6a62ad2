#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use chrono::{DateTime, FixedOffset, TimeZone};
use ftask::config::Config;
use ftask::storage::Storage;
use ftask::store::TaskStore;
use tempfile::TempDir;

/// Scratch data directory for one test.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn read_file(&self, rel_path: &str) -> String {
        fs::read_to_string(self.dir.path().join(rel_path)).expect("read file")
    }

    pub fn write_config(&self, contents: &str) -> PathBuf {
        self.write_file("config.toml", contents)
    }

    pub fn storage(&self) -> Storage {
        Storage::new(self.dir.path())
    }

    /// Open a store with the config found in the directory.
    pub fn store(&self) -> TaskStore {
        let config = Config::load_from_dir(self.dir.path());
        TaskStore::open(self.storage(), config).expect("open store")
    }

    /// The binary, pointed at this data directory.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("ftask").expect("binary");
        cmd.env("FTASK_DATA_DIR", self.dir.path())
            .env_remove("FTASK_CALENDAR_TOKEN")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Run a command with `--json` and return the parsed envelope.
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.cmd().arg("--json").args(args).output().expect("run");
        serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
            panic!(
                "invalid json from {args:?}: {err}\nstdout: {}\nstderr: {}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
        })
    }
}

/// A wall-clock instant in UTC+0 for logical-date tests.
pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .expect("offset")
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("valid instant")
}

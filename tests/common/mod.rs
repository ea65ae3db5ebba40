//! Common test utilities for sqle integration tests.
//!
//! Provides `TestEnv` for isolated test environments: every binary runs with
//! its working directory in a fresh temp dir (so `./logs` lands there) and an
//! embedded SQLite database instead of MySQL.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use assert_cmd::Command;
pub use tempfile::TempDir;

/// A test environment with an isolated working directory.
///
/// `sqled()` returns a `Command` that sets `SQLE_DATABASE_URL` and
/// `SQLE_PT_TEMPLATE` per invocation, making tests parallel-safe.
pub struct TestEnv {
    pub work_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            work_dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.work_dir.path()
    }

    /// SQLite database inside the working directory.
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.path().join("sqle.db").display())
    }

    /// The pt-online-schema-change template shipped with the crate.
    pub fn template_path(&self) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("scripts")
            .join("pt-online-schema-change.template")
    }

    pub fn log_file(&self) -> PathBuf {
        self.path().join("logs").join("sqled.log")
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("etc").join("sqle.yml")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.path().join("sqled.pid")
    }

    /// Get a Command for the sqled binary.
    pub fn sqled(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_sqled"));
        cmd.current_dir(self.path());
        cmd.env("SQLE_DATABASE_URL", self.database_url());
        cmd.env("SQLE_PT_TEMPLATE", self.template_path());
        cmd
    }

    /// `std::process::Command` for sqled, for tests that keep it running.
    pub fn sqled_process(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_sqled"));
        cmd.current_dir(self.path());
        cmd.env("SQLE_DATABASE_URL", self.database_url());
        cmd.env("SQLE_PT_TEMPLATE", self.template_path());
        cmd
    }

    /// Get a Command for the scannerd binary.
    pub fn scannerd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_scannerd"));
        cmd.current_dir(self.path());
        cmd.env_remove("SQLE_SCANNER_TOKEN");
        cmd
    }

    /// Read the service log, or an empty string if it does not exist yet.
    pub fn log_contents(&self) -> String {
        std::fs::read_to_string(self.log_file()).unwrap_or_default()
    }

    /// Poll the service log until it contains `needle`.
    pub fn wait_for_log(&self, needle: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.log_contents().contains(needle) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

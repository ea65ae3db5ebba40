//! Service log sink.
//!
//! Logs go to `<log_path>/sqled.log` through a non-blocking writer. The
//! subscriber is returned as a [`Dispatch`] instead of being installed
//! globally, so every [`LifecycleManager`](super::LifecycleManager) owns its
//! own sink.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

const LOG_FILE_PREFIX: &str = "sqled";
const LOG_FILE_SUFFIX: &str = "log";

const DEFAULT_FILTER: &str = "info";
const DEBUG_FILTER: &str = "debug,hyper=info,hyper_util=info,h2=info";

pub struct LogSink {
    dispatch: Dispatch,
    guard: Option<WorkerGuard>,
    file: PathBuf,
}

impl LogSink {
    /// Open the sink in `log_dir`, creating the directory if needed.
    pub fn init(log_dir: &Path, debug: bool) -> Result<Self> {
        let init_error = |reason: String| Error::LoggingInit {
            path: log_dir.to_path_buf(),
            reason,
        };

        fs::create_dir_all(log_dir).map_err(|e| init_error(e.to_string()))?;

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix(LOG_FILE_SUFFIX)
            .build(log_dir)
            .map_err(|e| init_error(e.to_string()))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let filter = EnvFilter::new(if debug { DEBUG_FILTER } else { DEFAULT_FILTER });
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_env_filter(filter)
            .finish();

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            guard: Some(guard),
            file: log_dir.join(format!("{}.{}", LOG_FILE_PREFIX, LOG_FILE_SUFFIX)),
        })
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Path of the log file.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Flush buffered lines and stop the writer thread.
    pub fn close(&mut self) {
        self.guard.take();
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("file", &self.file)
            .field("open", &self.guard.is_some())
            .finish()
    }
}

//! Startup and shutdown of the `sqled` service.
//!
//! Startup runs in a fixed order and stops at the first fatal step:
//!
//! 1. open the log sink
//! 2. write the pid file (failure is logged, serving continues)
//! 3. load the pt-online-schema-change template
//! 4. open storage, migrate and seed when auto-migrate is on
//! 5. resolve the dialect parser (failure is logged, serving continues)
//! 6. spawn the API task
//!
//! The manager then waits for whichever comes first: the shutdown future
//! (normally an OS signal) or an exit notification from the API task.
//! Teardown removes the pid file and then closes the log sink.
//!
//! Progress is published on a `watch` channel. A fatal step moves the state
//! straight to [`LifecycleState::Stopped`], never through `Serving`.

pub mod logging;
pub mod pid_file;
pub mod signal;

use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn};

use crate::api::{self, AppState, DbTarget};
use crate::config::ResolvedConfig;
use crate::parser_client::ParserClient;
use crate::policy::DefaultPolicySet;
use crate::storage::{MigrationOutcome, Storage};
use crate::template::{DEFAULT_TEMPLATE_PATH, PtTemplate};
use crate::{Error, Result};

pub use logging::LogSink;
pub use pid_file::PidFile;
pub use signal::{TerminationSignal, TerminationSignals};

/// How long teardown waits for in-flight API requests.
const API_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    LoggingReady,
    StorageReady,
    Serving,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::NotStarted => "not_started",
            LifecycleState::LoggingReady => "logging_ready",
            LifecycleState::StorageReady => "storage_ready",
            LifecycleState::Serving => "serving",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What ended the serving phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The shutdown future completed (an OS signal for [`LifecycleManager::run`]).
    Requested,
    /// The API task stopped on its own.
    ApiExited,
}

/// Process-level options that are not part of the resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub pid_file: Option<PathBuf>,
    pub template_path: PathBuf,
    /// Overrides the MySQL URL built from the database configuration.
    pub database_url: Option<String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            pid_file: None,
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            database_url: None,
        }
    }
}

/// Owns one run of the service: its log sink, pid file, storage and API task.
pub struct LifecycleManager {
    config: ResolvedConfig,
    options: ServiceOptions,
    state: watch::Sender<LifecycleState>,
}

impl LifecycleManager {
    pub fn new(config: ResolvedConfig, options: ServiceOptions) -> Self {
        let (state, _) = watch::channel(LifecycleState::NotStarted);
        Self {
            config,
            options,
            state,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run until SIGINT, SIGTERM or SIGUSR2 arrives, or the API task exits.
    pub async fn run(&self) -> Result<ShutdownCause> {
        let mut signals = TerminationSignals::register()?;
        self.run_until(async move {
            let signal = signals.recv().await;
            info!(%signal, "Received termination signal");
        })
        .await
    }

    /// Run until `shutdown` completes or the API task exits.
    ///
    /// Returns `Err` for a fatal startup failure, after tearing down whatever
    /// had been created. A pid file that could not be written does not stop the
    /// service; its error is returned once the service has shut down normally.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<ShutdownCause>
    where
        F: Future<Output = ()>,
    {
        let server = &self.config.server;
        let mut sink = match LogSink::init(&server.log_path, server.debug) {
            Ok(sink) => sink,
            Err(e) => {
                self.transition(LifecycleState::Stopped);
                return Err(e);
            }
        };
        let dispatch = sink.dispatch().clone();

        let outcome = async {
            self.transition(LifecycleState::LoggingReady);

            let mut pid_file = None;
            let mut pid_error = None;
            let outcome = self
                .start_and_serve(shutdown, &mut pid_file, &mut pid_error)
                .await;

            if let Some(pid_file) = pid_file {
                match pid_file.remove() {
                    Ok(()) => info!(path = %pid_file.path().display(), "Removed pid file"),
                    Err(e) => warn!(path = %pid_file.path().display(), "Failed to remove pid file: {}", e),
                }
            }
            if let Err(ref e) = outcome {
                error!("Service startup failed: {}", e);
            }
            info!("Closing log sink");

            match (outcome, pid_error) {
                (Ok(_), Some(e)) => Err(e),
                (outcome, _) => outcome,
            }
        }
        .with_subscriber(dispatch)
        .await;

        sink.close();
        self.transition(LifecycleState::Stopped);
        outcome
    }

    async fn start_and_serve<F>(
        &self,
        shutdown: F,
        pid_slot: &mut Option<PidFile>,
        pid_error: &mut Option<Error>,
    ) -> Result<ShutdownCause>
    where
        F: Future<Output = ()>,
    {
        if let Some(ref path) = self.options.pid_file {
            let pid_file = PidFile::new(path);
            let pid = std::process::id();
            match pid_file.write(pid) {
                Ok(()) => info!(pid, path = %path.display(), "Wrote pid file"),
                Err(source) => {
                    let e = Error::PidFile {
                        path: path.clone(),
                        source,
                    };
                    error!("{}", e);
                    *pid_error = Some(e);
                }
            }
            *pid_slot = Some(pid_file);
        }

        let template = PtTemplate::load(&self.options.template_path)?;
        info!(path = %template.source().display(), "Loaded pt-online-schema-change template");

        let storage = self.open_storage().await?;
        match storage
            .migrate_if_requested(self.config.server.auto_migrate, &DefaultPolicySet::default())
            .await
        {
            Ok(MigrationOutcome::Skipped) => info!("Auto-migrate disabled, skipping migration"),
            Ok(MigrationOutcome::Applied(_)) => {}
            Err(e) => {
                storage.close().await;
                return Err(e);
            }
        }
        self.transition(LifecycleState::StorageReady);

        let parser = &self.config.remote_parser;
        let parser = match ParserClient::connect(&parser.host, &parser.port).await {
            Ok(client) => {
                info!(address = %client, "Dialect parser configured");
                Some(client)
            }
            Err(e) => {
                warn!("Running without dialect parser: {}", e);
                None
            }
        };

        let db = &self.config.db;
        let state = AppState {
            storage: storage.clone(),
            template: Arc::new(template),
            db: DbTarget {
                host: db.host.clone(),
                port: db.port.clone(),
                user: db.user.clone(),
                schema: db.schema.clone(),
            },
            parser,
        };
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.server.port));
        let api_shutdown = CancellationToken::new();
        let (exit_tx, mut exit_rx) = mpsc::channel(1);
        let mut api_task = api::spawn_api(addr, state, api_shutdown.clone(), exit_tx);

        self.transition(LifecycleState::Serving);

        let cause = tokio::select! {
            _ = shutdown => ShutdownCause::Requested,
            exit = exit_rx.recv() => {
                if let Some(exit) = exit {
                    warn!("API task exited: {}", exit);
                }
                ShutdownCause::ApiExited
            }
        };

        self.transition(LifecycleState::Draining);
        api_shutdown.cancel();
        if tokio::time::timeout(API_DRAIN_TIMEOUT, &mut api_task)
            .await
            .is_err()
        {
            warn!(
                "API did not stop within {}s, aborting",
                API_DRAIN_TIMEOUT.as_secs()
            );
            api_task.abort();
        }
        storage.close().await;

        Ok(cause)
    }

    async fn open_storage(&self) -> Result<Storage> {
        let debug = self.config.server.debug;
        match self.options.database_url {
            Some(ref url) => Storage::connect(url, debug).await,
            None => Storage::open(&self.config.db, debug).await,
        }
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        info!(from = %previous, to = %next, "Lifecycle state changed");
    }
}

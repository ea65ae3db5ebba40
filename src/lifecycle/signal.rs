//! OS termination signals that stop the service.
//!
//! On unix the service stops on SIGINT, SIGTERM and SIGUSR2. SIGKILL cannot be
//! caught, so it never reaches this code. Elsewhere only Ctrl-C is handled.

use std::fmt;

use crate::{Error, Result};

/// Which signal ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
    User2,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::User2 => "SIGUSR2",
        };
        f.write_str(name)
    }
}

/// Registered signal handlers.
///
/// Handlers are installed by [`TerminationSignals::register`], so signals
/// that arrive between registration and [`TerminationSignals::recv`] are not lost.
#[cfg(unix)]
pub struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    user2: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    /// Install the handlers. Must be called inside a tokio runtime.
    pub fn register() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(Error::Signal)?,
            terminate: signal(SignalKind::terminate()).map_err(Error::Signal)?,
            user2: signal(SignalKind::user_defined2()).map_err(Error::Signal)?,
        })
    }

    /// Wait for the next termination signal.
    pub async fn recv(&mut self) -> TerminationSignal {
        tokio::select! {
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
            _ = self.terminate.recv() => TerminationSignal::Terminate,
            _ = self.user2.recv() => TerminationSignal::User2,
        }
    }
}

#[cfg(not(unix))]
pub struct TerminationSignals {
    _private: (),
}

#[cfg(not(unix))]
impl TerminationSignals {
    pub fn register() -> Result<Self> {
        Ok(Self { _private: () })
    }

    pub async fn recv(&mut self) -> TerminationSignal {
        match tokio::signal::ctrl_c().await {
            Ok(()) => TerminationSignal::Interrupt,
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending().await
            }
        }
    }
}

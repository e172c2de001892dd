// Unix signal handling for the server loop

use crate::error::{RagError, Result};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// What the server should do in response to a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSignal {
    /// SIGTERM, SIGINT, SIGHUP
    Shutdown,
    /// SIGUSR1: drop built corpora so they are rebuilt from disk
    Reload,
}

pub struct SignalHandler {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
    sigusr1: Signal,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
            sigusr1: install(SignalKind::user_defined1(), "SIGUSR1")?,
        })
    }

    pub async fn wait(&mut self) -> ServerSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                ServerSignal::Shutdown
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                ServerSignal::Shutdown
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                ServerSignal::Shutdown
            }
            _ = self.sigusr1.recv() => {
                tracing::info!("Received SIGUSR1");
                ServerSignal::Reload
            }
        }
    }
}

fn install(kind: SignalKind, name: &str) -> Result<Signal> {
    signal(kind).map_err(|e| RagError::Io {
        source: e,
        context: format!("Failed to setup {} handler", name),
    })
}

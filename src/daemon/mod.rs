// Daemon module: foreground socket server in front of RagService

mod ipc;
mod signals;

pub use ipc::{read_frame, write_frame, IpcClient, IpcMessage, IpcResponse, IpcServer};
pub use signals::{ServerSignal, SignalHandler};

use crate::config::{expand_tilde, Config};
use crate::error::{RagError, Result};
use crate::service::RagService;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::{Notify, Semaphore};
use tokio::task;

/// Socket server owning the service and its listener
pub struct Server {
    service: Arc<RagService>,
    ipc_server: IpcServer,
    connections: Arc<Semaphore>,
    preload: bool,
    stop: Arc<Notify>,
}

impl Server {
    /// Build the production service from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let service = Arc::new(RagService::from_config(config)?);
        let mut server = Self::new(
            service,
            expand_tilde(&config.server.socket_path),
            config.server.max_connections,
        );
        server.preload = config.server.preload;
        Ok(server)
    }

    pub fn new(service: Arc<RagService>, socket_path: PathBuf, max_connections: usize) -> Self {
        Self {
            service,
            ipc_server: IpcServer::new(socket_path),
            connections: Arc::new(Semaphore::new(max_connections.max(1))),
            preload: false,
            stop: Arc::new(Notify::new()),
        }
    }

    pub fn service(&self) -> &Arc<RagService> {
        &self.service
    }

    /// Bind the socket ahead of `run_foreground`
    pub async fn bind(&mut self) -> Result<()> {
        self.ipc_server.bind().await
    }

    /// Serve until a shutdown signal or a `stop` request
    pub async fn run_foreground(&mut self) -> Result<()> {
        let mut signal_handler = SignalHandler::new()?;

        if !self.ipc_server.is_bound() {
            self.ipc_server.bind().await?;
        }

        if self.preload {
            let service = Arc::clone(&self.service);
            task::spawn(async move {
                if let Err(e) = service.preload().await {
                    tracing::error!("Corpus preload failed: {}", e);
                }
            });
        }

        tracing::info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.ipc_server.accept() => {
                    let stream = match accepted {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::error!("Accept failed: {}", e);
                            continue;
                        }
                    };

                    let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
                        tracing::warn!("Connection limit reached, rejecting client");
                        task::spawn(reject_client(stream));
                        continue;
                    };

                    let service = Arc::clone(&self.service);
                    let stop = Arc::clone(&self.stop);
                    task::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = handle_client(stream, service, stop).await {
                            tracing::error!("Client handler error: {}", e);
                        }
                    });
                }

                sig = signal_handler.wait() => match sig {
                    ServerSignal::Shutdown => {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    ServerSignal::Reload => {
                        let cache = self.service.cache();
                        for id in cache.built_ids() {
                            cache.invalidate(&id);
                        }
                        tracing::info!("Built corpora dropped; they rebuild on next use");
                    }
                },

                _ = self.stop.notified() => {
                    tracing::info!("Stop requested by client");
                    break;
                }
            }
        }

        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down server");
        self.ipc_server.shutdown()?;
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

async fn reject_client(mut stream: UnixStream) {
    let response = IpcResponse::from_error(&RagError::Server(
        "Too many concurrent connections".to_string(),
    ));
    if let Err(e) = write_frame(&mut stream, &response).await {
        tracing::debug!("Failed to reject client: {}", e);
    }
}

/// Serve one request on one connection
async fn handle_client(
    mut stream: UnixStream,
    service: Arc<RagService>,
    stop: Arc<Notify>,
) -> Result<()> {
    let message: IpcMessage = match read_frame(&mut stream).await {
        Ok(message) => message,
        Err(e) => {
            let response = IpcResponse::from_error(&e);
            write_frame(&mut stream, &response).await?;
            return Err(e);
        }
    };

    let response = match message {
        IpcMessage::Ask(request) => {
            let answer = service.submit(request).await;
            let success = !answer.is_error();
            let data = to_json(&answer)?;
            IpcResponse {
                success,
                message: None,
                data: Some(data),
            }
        }
        IpcMessage::Subscribe { execution_id } => {
            let mut updates = Box::pin(service.subscribe(&execution_id));
            while let Some(update) = updates.next().await {
                write_frame(&mut stream, &update).await?;
            }
            return Ok(());
        }
        IpcMessage::SelectCorpus {
            corpus_id,
            session_id,
        } => match service.select_corpus(&corpus_id, session_id.as_deref()).await {
            Ok(selection) => IpcResponse::success_with_data(to_json(&selection)?),
            Err(e) => IpcResponse::from_error(&e),
        },
        IpcMessage::ListCorpora => match service.list_corpora() {
            Ok(corpora) => IpcResponse::success_with_data(to_json(&corpora)?),
            Err(e) => IpcResponse::from_error(&e),
        },
        IpcMessage::ClearSession { session_id } => match service.clear_session(&session_id) {
            Ok(()) => IpcResponse::success("Session cleared"),
            Err(e) => IpcResponse::from_error(&e),
        },
        IpcMessage::Status => IpcResponse::success_with_data(to_json(&service.status())?),
        IpcMessage::Stop => {
            stop.notify_one();
            IpcResponse::success("Shutdown initiated")
        }
    };

    write_frame(&mut stream, &response).await
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| RagError::Json {
        source: e,
        context: "Failed to serialize response".to_string(),
    })
}

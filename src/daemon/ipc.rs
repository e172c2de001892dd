// Unix domain socket transport with length-prefixed JSON frames

use crate::error::{RagError, Result};
use crate::service::{AskRequest, StepUpdate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Maximum frame size (10MB)
const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Requests accepted by the server, one per connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    /// Answer a question
    Ask(AskRequest),
    /// Stream progress frames for an execution
    Subscribe { execution_id: String },
    /// Build a corpus and bind a session to it
    SelectCorpus {
        corpus_id: String,
        #[serde(default)]
        session_id: Option<String>,
    },
    ListCorpora,
    ClearSession { session_id: String },
    /// Request server status
    Status,
    /// Request server to stop
    Stop,
}

/// Response frame sent for every request except `subscribe`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn success_with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Error response carrying the stable status flag
    pub fn from_error(error: &RagError) -> Self {
        Self {
            success: false,
            message: Some(error.to_string()),
            data: Some(serde_json::json!({ "status": error.status() })),
        }
    }
}

/// Unix domain socket listener
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Bind to the socket path, replacing a stale socket file
    pub async fn bind(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to remove existing socket: {:?}", self.socket_path),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to create socket directory: {:?}", parent),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to bind to socket: {:?}", self.socket_path),
        })?;

        self.listener = Some(listener);

        tracing::info!("IPC server listening on {:?}", self.socket_path);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.listener.is_some()
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| RagError::Server("Server not bound".to_string()))?;

        let (stream, _addr) = listener.accept().await.map_err(|e| RagError::Io {
            source: e,
            context: "Failed to accept connection".to_string(),
        })?;

        Ok(stream)
    }

    /// Remove the socket file
    pub fn shutdown(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to remove socket: {:?}", self.socket_path),
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Read one length-prefixed JSON frame
pub async fn read_frame<T, R>(reader: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let length = reader.read_u32().await.map_err(|e| RagError::Io {
        source: e,
        context: "Failed to read frame length".to_string(),
    })?;

    if length > MAX_MESSAGE_SIZE {
        return Err(RagError::Server(format!(
            "Frame too large: {} bytes (max: {})",
            length, MAX_MESSAGE_SIZE
        )));
    }

    let mut buffer = vec![0u8; length as usize];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|e| RagError::Io {
            source: e,
            context: "Failed to read frame payload".to_string(),
        })?;

    serde_json::from_slice(&buffer).map_err(|e| RagError::Json {
        source: e,
        context: "Failed to deserialize frame".to_string(),
    })
}

/// Write one length-prefixed (u32 big-endian) JSON frame
pub async fn write_frame<T, W>(writer: &mut W, value: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(value).map_err(|e| RagError::Json {
        source: e,
        context: "Failed to serialize frame".to_string(),
    })?;

    if payload.len() > MAX_MESSAGE_SIZE as usize {
        return Err(RagError::Server(format!(
            "Frame too large: {} bytes (max: {})",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    writer
        .write_u32(payload.len() as u32)
        .await
        .map_err(|e| RagError::Io {
            source: e,
            context: "Failed to write frame length".to_string(),
        })?;

    writer.write_all(&payload).await.map_err(|e| RagError::Io {
        source: e,
        context: "Failed to write frame payload".to_string(),
    })?;

    writer.flush().await.map_err(|e| RagError::Io {
        source: e,
        context: "Failed to flush frame".to_string(),
    })?;

    Ok(())
}

/// Client side of the socket protocol
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    RagError::ServerNotRunning
                }
                _ => RagError::Io {
                    source: e,
                    context: format!("Failed to connect to server at {:?}", self.socket_path),
                },
            })
    }

    /// Send a request and wait for its single response frame
    pub async fn send(&self, message: &IpcMessage) -> Result<IpcResponse> {
        let mut stream = self.connect().await?;
        write_frame(&mut stream, message).await?;
        read_frame(&mut stream).await
    }

    /// Subscribe to an execution, calling `on_update` for each frame
    ///
    /// Returns once the terminal `{done: true}` frame arrives.
    pub async fn subscribe<F>(&self, execution_id: &str, mut on_update: F) -> Result<()>
    where
        F: FnMut(&StepUpdate),
    {
        let mut stream = self.connect().await?;
        write_frame(
            &mut stream,
            &IpcMessage::Subscribe {
                execution_id: execution_id.to_string(),
            },
        )
        .await?;

        loop {
            let update: StepUpdate = read_frame(&mut stream).await?;
            on_update(&update);
            if matches!(update, StepUpdate::Done { .. }) {
                return Ok(());
            }
        }
    }
}

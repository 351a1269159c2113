//! IPC transport implementations
//!
//! Messages are framed as one JSON document per line.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(&mut self, message: &T) -> Result<(), IpcError>;

    /// Receive the next message from the other end
    async fn receive<T: DeserializeOwned + Send>(&mut self) -> Result<T, IpcError>;

    /// Close the sending half of the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Serialize a message into a newline-terminated frame
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, IpcError> {
    let mut json =
        serde_json::to_string(message).map_err(|e| IpcError::SerializationError(e.to_string()))?;
    json.push('\n');
    Ok(json)
}

/// Parse one frame, tolerating trailing whitespace and `\r\n` endings
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, IpcError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Line-delimited JSON transport over any async byte stream pair
pub struct LineTransport<R, W> {
    reader: BufReader<R>,
    writer: Option<W>,
    line: String,
}

/// Transport used inside worker processes
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Some(writer),
            line: String::new(),
        }
    }

    /// Whether the sending half is still open
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl LineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Transport bound to this process's stdin/stdout
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl Default for LineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    fn default() -> Self {
        Self::stdio()
    }
}

#[async_trait]
impl<R, W> IpcTransport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send<T: Serialize + Send + Sync>(&mut self, message: &T) -> Result<(), IpcError> {
        let frame = encode_line(message)?;
        let writer = self.writer.as_mut().ok_or(IpcError::NotConnected)?;

        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn receive<T: DeserializeOwned + Send>(&mut self) -> Result<T, IpcError> {
        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line).await?;
            if read == 0 {
                return Err(IpcError::ConnectionClosed);
            }
            if self.line.trim().is_empty() {
                continue;
            }
            return decode_line(&self.line);
        }
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        if let Some(mut writer) = self.writer.take() {
            log::debug!("Closing IPC transport");
            writer.shutdown().await?;
        }
        Ok(())
    }
}

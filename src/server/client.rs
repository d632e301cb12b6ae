//! Ingress Client
//!
//! Minimal async client for the activity line protocol.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use super::command::{Command, ProtocolError, Response};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Server error: {0}")]
    Server(String),
    #[error("Unexpected response: {0:?}")]
    Unexpected(Response),
    #[error("Connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub struct Client {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(4096),
        })
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.call(&Command::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    /// Report activity; returns the new deadline in epoch millis
    pub async fn activity(&mut self, workspace_id: &str, timeout_ms: Option<i64>) -> Result<u64> {
        let cmd = Command::Activity {
            workspace_id: workspace_id.to_string(),
            timeout_ms,
        };
        match self.call(&cmd).await? {
            Response::Deadline(at) => Ok(at),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    pub async fn stop(&mut self, workspace_id: &str) -> Result<()> {
        let cmd = Command::Stop {
            workspace_id: workspace_id.to_string(),
        };
        match self.call(&cmd).await? {
            Response::Ok => Ok(()),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    pub async fn expires(&mut self, workspace_id: &str) -> Result<Option<u64>> {
        let cmd = Command::Expires {
            workspace_id: workspace_id.to_string(),
        };
        match self.call(&cmd).await? {
            Response::Expiration(at) => Ok(Some(at)),
            Response::Nil => Ok(None),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    pub async fn stats(&mut self) -> Result<String> {
        match self.call(&Command::Stats).await? {
            Response::Value(v) => Ok(v),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    /// Send a raw line and return the raw response line
    pub async fn raw(&mut self, line: &str) -> Result<String> {
        self.send_line(line).await?;
        self.read_line().await
    }

    async fn call(&mut self, cmd: &Command) -> Result<Response> {
        let line = self.raw(&cmd.to_line()).await?;
        match Response::from_line(&line)? {
            Response::Error(e) => Err(ClientError::Server(e)),
            response => Ok(response),
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line = self.buffer.split_to(pos);
                self.buffer.advance(1);
                let line = String::from_utf8_lossy(&line);
                return Ok(line.trim_end_matches('\r').to_string());
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}

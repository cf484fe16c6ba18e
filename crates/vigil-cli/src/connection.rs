//! Async TCP connection to a store or sentinel node.
//!
//! [`RespClient`] connects on first use, authenticates when a password
//! is configured, and drops the socket after any failure so the next
//! call reconnects. Every command is bounded by the command timeout.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use vigil_core::decode::{parse_info, InfoMap};
use vigil_core::{Address, ClientError, StoreClient, WriteOutcome};
use vigil_protocol::{parse_frame, Frame};

/// A single buffered socket.
struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Connection {
    async fn connect(address: &Address) -> std::io::Result<Self> {
        let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
        })
    }

    async fn send(&mut self, tokens: &[&str]) -> Result<Frame, ConnError> {
        self.write_buf.clear();
        Frame::command(tokens).serialize(&mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        self.read_response().await
    }

    async fn read_response(&mut self) -> Result<Frame, ConnError> {
        loop {
            if !self.read_buf.is_empty() {
                if let Some((frame, consumed)) = parse_frame(&self.read_buf)? {
                    let _ = self.read_buf.split_to(consumed);
                    return Ok(frame);
                }
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ConnError::Disconnected);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ConnError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Protocol(#[from] vigil_protocol::ProtocolError),

    #[error("server disconnected")]
    Disconnected,
}

/// Lazily connected, self-healing client for one node.
pub struct RespClient {
    address: Address,
    password: Option<String>,
    timeout: Duration,
    conn: Option<Connection>,
}

impl RespClient {
    pub fn new(address: Address, password: Option<String>, timeout: Duration) -> Self {
        Self {
            address,
            password,
            timeout,
            conn: None,
        }
    }

    /// Sends one command, connecting first if needed. Any transport
    /// failure drops the connection.
    async fn call(&mut self, tokens: &[&str]) -> Result<Frame, ClientError> {
        let timeout = self.timeout;
        let result = tokio::time::timeout(timeout, self.call_inner(tokens)).await;
        let result = match result {
            Ok(r) => r,
            Err(_) => Err(ClientError::Timeout(
                self.address.clone(),
                timeout.as_millis() as u64,
            )),
        };
        if result.is_err() {
            self.conn = None;
        }
        result
    }

    async fn call_inner(&mut self, tokens: &[&str]) -> Result<Frame, ClientError> {
        if self.conn.is_none() {
            self.conn = Some(self.open().await?);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(ClientError::Unreachable(
                self.address.clone(),
                "not connected".into(),
            ));
        };
        conn.send(tokens).await.map_err(|e| self.transport_error(e))
    }

    async fn open(&self) -> Result<Connection, ClientError> {
        debug!(address = %self.address, "connecting");
        let mut conn = Connection::connect(&self.address)
            .await
            .map_err(|e| ClientError::Unreachable(self.address.clone(), e.to_string()))?;

        if let Some(pw) = &self.password {
            match conn.send(&["AUTH", pw]).await {
                Ok(Frame::Simple(s)) if s == "OK" => {}
                Ok(Frame::Error(e)) => {
                    return Err(ClientError::Auth(self.address.clone(), e));
                }
                Ok(_) => {
                    return Err(ClientError::Auth(
                        self.address.clone(),
                        "unexpected response to AUTH".into(),
                    ));
                }
                Err(e) => return Err(self.transport_error(e)),
            }
        }
        Ok(conn)
    }

    fn transport_error(&self, e: ConnError) -> ClientError {
        match e {
            ConnError::Protocol(e) => ClientError::Protocol(self.address.clone(), e.to_string()),
            other => ClientError::Unreachable(self.address.clone(), other.to_string()),
        }
    }

    fn server_error(&self, msg: String) -> ClientError {
        ClientError::Server(self.address.clone(), msg)
    }
}

#[async_trait(?Send)]
impl StoreClient for RespClient {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn ping(&mut self) -> Result<(), ClientError> {
        match self.call(&["PING"]).await? {
            Frame::Error(e) => Err(self.server_error(e)),
            _ => Ok(()),
        }
    }

    async fn info(&mut self, section: &str) -> Result<InfoMap, ClientError> {
        match self.call(&["INFO", section]).await? {
            Frame::Error(e) => Err(self.server_error(e)),
            frame => match frame.as_text() {
                Some(text) => Ok(parse_info(&text)),
                None => Err(ClientError::Protocol(
                    self.address.clone(),
                    "INFO reply is not a string".into(),
                )),
            },
        }
    }

    async fn execute_raw(&mut self, args: &[&str]) -> Result<Vec<String>, ClientError> {
        match self.call(args).await? {
            Frame::Error(e) => Err(self.server_error(e)),
            frame => Ok(frame.flatten()),
        }
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<WriteOutcome, ClientError> {
        match self.call(&["SET", key, value]).await? {
            Frame::Error(e) if e.starts_with("READONLY") => Ok(WriteOutcome::ReadOnlyRejected),
            Frame::Error(e) => Err(self.server_error(e)),
            _ => Ok(WriteOutcome::Accepted),
        }
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, ClientError> {
        match self.call(&["GET", key]).await? {
            Frame::Error(e) => Err(self.server_error(e)),
            frame => Ok(frame.as_text()),
        }
    }

    async fn del(&mut self, keys: &[&str]) -> Result<u64, ClientError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut tokens = Vec::with_capacity(keys.len() + 1);
        tokens.push("DEL");
        tokens.extend_from_slice(keys);
        match self.call(&tokens).await? {
            Frame::Integer(n) => Ok(n.max(0) as u64),
            Frame::Error(e) => Err(self.server_error(e)),
            _ => Err(ClientError::Protocol(
                self.address.clone(),
                "DEL reply is not an integer".into(),
            )),
        }
    }
}

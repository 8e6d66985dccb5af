use crate::config::AdbConfig;
use crate::error::{AdbError, AdbResult};
use crate::protocol::{self, AdbStatus};
use crate::sync_conn::SyncConnection;
use std::fmt;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Any duplex byte stream that can carry the ADB protocol.
pub trait AdbStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AdbStream for T {}

/// Produces fresh connections to the ADB server.
///
/// Every operation dials its own connection; nothing is pooled because each
/// sub-mode (device transport, shell, sync) permanently changes the socket.
pub trait Dialer: Send + Sync {
    fn dial(&self) -> impl Future<Output = AdbResult<Connection>> + Send;
}

/// Dials the ADB server over TCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpDialer {
    config: AdbConfig,
}

impl TcpDialer {
    pub fn new(config: AdbConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdbConfig {
        &self.config
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(AdbConfig::default())
    }
}

impl Dialer for TcpDialer {
    async fn dial(&self) -> AdbResult<Connection> {
        let addr = self.config.addr();
        debug!("Connecting to ADB server at {}", addr);
        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;
        Ok(Connection::new(stream))
    }
}

/// A socket to the ADB server speaking the host framing protocol.
///
/// Reads and writes only move forward. After a protocol violation the
/// connection is unusable and must be dropped.
pub struct Connection {
    stream: Box<dyn AdbStream>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new<S: AdbStream + 'static>(stream: S) -> Self {
        Self {
            stream: Box::new(stream),
        }
    }

    /// Send a length-prefixed request.
    pub async fn send_request(&mut self, request: &str) -> AdbResult<()> {
        debug!("Sending request: {:?}", request);
        let encoded = protocol::encode_request(request)?;
        self.write_all(&encoded).await
    }

    /// Read the 4-byte status token that answers `request`.
    ///
    /// `FAIL` is followed by a length-prefixed message which becomes the
    /// error.
    pub async fn read_status(&mut self, request: &str) -> AdbResult<()> {
        let mut status = [0u8; 4];
        self.read_exact(&mut status)
            .await
            .map_err(|e| e.wrap(format!("error reading status for {}", request)))?;
        match protocol::parse_status(&status)? {
            AdbStatus::Okay => {
                trace!("OKAY for {:?}", request);
                Ok(())
            }
            AdbStatus::Fail => {
                let msg = self.read_message().await?;
                let msg = String::from_utf8_lossy(&msg).to_string();
                debug!("FAIL for {:?}: {}", request, msg);
                Err(AdbError::server(msg))
            }
        }
    }

    /// Read a 4-hex-digit length header followed by exactly that many bytes.
    pub async fn read_message(&mut self) -> AdbResult<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.read_exact(&mut len_buf).await?;
        let len = protocol::parse_hex_length(&len_buf)?;
        let mut data = vec![0u8; len];
        if len > 0 {
            self.read_exact(&mut data)
                .await
                .map_err(|e| e.wrap(format!("error reading {} byte message", len)))?;
        }
        Ok(data)
    }

    /// Read everything until the peer closes the stream.
    pub async fn read_until_close(&mut self) -> AdbResult<Vec<u8>> {
        let mut data = Vec::new();
        self.stream.read_to_end(&mut data).await?;
        Ok(data)
    }

    /// Send a request and wait for its status, with no response body.
    pub async fn round_trip_no_response(&mut self, request: &str) -> AdbResult<()> {
        self.send_request(request).await?;
        self.read_status(request).await
    }

    /// Send a request, wait for `OKAY`, then read one length-prefixed body.
    pub async fn round_trip(&mut self, request: &str) -> AdbResult<Vec<u8>> {
        self.round_trip_no_response(request).await?;
        self.read_message().await
    }

    /// Shut the stream down. Dropping a connection also closes it; this
    /// variant flushes first and reports failures.
    pub async fn close(mut self) -> AdbResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Switch this connection into sync mode. There is no way back.
    pub fn into_sync(self) -> SyncConnection {
        SyncConnection::new(self)
    }

    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> AdbResult<()> {
        self.stream.read_exact(buf).await?;
        Ok(())
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> AdbResult<()> {
        self.stream.write_all(buf).await?;
        Ok(())
    }

    pub(crate) async fn read_u32_le(&mut self) -> AdbResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf).await?;
        Ok(u32::from_le_bytes(buf))
    }
}

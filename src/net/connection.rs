//! Byte-stream connection with inactivity timeouts.
//!
//! Every read and write is bounded by the configured window: if no bytes move
//! within it the operation fails with `Error::TransportTimeout`, which callers
//! keep distinct from hard transport failures.

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, trace};

pub struct Connection<S = TcpStream> {
    stream: S,
    peer: String,
    config: ConnectionConfig,
    bytes_sent: u64,
    bytes_received: u64,
}

impl Connection<TcpStream> {
    /// Connect to `host:port` with the configured socket buffer sizes. The
    /// connect attempt is bounded by the send timeout.
    pub async fn open(host: &str, port: u16, config: ConnectionConfig) -> Result<Self> {
        let peer = format!("{}:{}", host, port);
        let window = config.send_timeout();

        let stream = match timeout(window, connect(host, port, &config)).await {
            Err(_) => return Err(Error::TransportTimeout(window)),
            Ok(Err(e)) => {
                return Err(Error::transport(format!("Failed to connect to {}", peer), e));
            }
            Ok(Ok(stream)) => stream,
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
        }

        debug!(%peer, "Connection opened");
        Ok(Self::from_stream(stream, peer, config))
    }
}

/// Try each resolved address in turn; the last failure is returned.
async fn connect(host: &str, port: u16, config: &ConnectionConfig) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in lookup_host((host, port)).await? {
        let socket = sized_socket(addr, config)?;
        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("No address for {}", host))
    }))
}

/// Unconnected socket for `addr` carrying the configured kernel buffer
/// sizes. The kernel may round or clamp them, so a refusal is only logged.
fn sized_socket(addr: SocketAddr, config: &ConnectionConfig) -> io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    let send = u32::try_from(config.send_buffer_size).unwrap_or(u32::MAX);
    let receive = u32::try_from(config.receive_buffer_size).unwrap_or(u32::MAX);
    if let Err(e) = socket.set_send_buffer_size(send) {
        debug!(%addr, size = send, error = %e, "Failed to set SO_SNDBUF");
    }
    if let Err(e) = socket.set_recv_buffer_size(receive) {
        debug!(%addr, size = receive, error = %e, "Failed to set SO_RCVBUF");
    }
    Ok(socket)
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn from_stream(stream: S, peer: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            stream,
            peer: peer.into(),
            config,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Write all of `data`.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let window = self.config.send_timeout();
        match timeout(window, self.stream.write_all(data)).await {
            Err(_) => Err(Error::TransportTimeout(window)),
            Ok(Err(e)) => Err(Error::transport(
                format!("Write to {} failed after {} bytes", self.peer, self.bytes_sent),
                e,
            )),
            Ok(Ok(())) => {
                self.bytes_sent += data.len() as u64;
                trace!(peer = %self.peer, bytes = data.len(), "Sent");
                Ok(())
            }
        }
    }

    pub async fn flush(&mut self) -> Result<()> {
        let window = self.config.send_timeout();
        match timeout(window, self.stream.flush()).await {
            Err(_) => Err(Error::TransportTimeout(window)),
            Ok(Err(e)) => Err(Error::transport(format!("Flush to {} failed", self.peer), e)),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Read into `buf`. Returns 0 when the peer has closed the connection.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let window = self.config.receive_timeout();
        match timeout(window, self.stream.read(buf)).await {
            Err(_) => Err(Error::TransportTimeout(window)),
            Ok(Err(e)) => Err(Error::transport(
                format!(
                    "Read from {} failed after {} bytes",
                    self.peer, self.bytes_received
                ),
                e,
            )),
            Ok(Ok(n)) => {
                self.bytes_received += n as u64;
                trace!(peer = %self.peer, bytes = n, "Received");
                Ok(n)
            }
        }
    }

    /// Shut down the write side and drop the stream. Errors are logged only;
    /// the exchange is already over when this runs.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Shutdown failed");
        }
        debug!(
            peer = %self.peer,
            sent = self.bytes_sent,
            received = self.bytes_received,
            "Connection closed"
        );
    }
}

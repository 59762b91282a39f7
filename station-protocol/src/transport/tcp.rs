//! TCP Transport
//!
//! Opens and owns the raw TCP session for one hardware peer. Establishment
//! applies the station keep-alive profile so half-dead links are detected by
//! the OS in addition to the liveness probe. The read-side primitives are
//! peek-based and non-blocking: "no data" is the steady state, not an error.

use crate::{ConnectionConfig, Result, StationError};
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Peek buffer size; register and line protocols never frame anywhere near this
const PEEK_BUF_SIZE: usize = 4096;

/// One established TCP session
pub struct TcpTransport {
    stream: TcpStream,
    remote_addr: SocketAddr,
}

impl TcpTransport {
    /// Open a connection described by `config`
    ///
    /// Connects within `connect_timeout`, then applies the keep-alive profile
    /// (time / interval / retry count) and disables Nagle. Failures are
    /// logged and returned as ordinary errors; this function never panics.
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let addr = config.socket_addr()?;
        debug!("connecting to {}", addr);

        let stream = match timeout(config.connect_timeout(), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let error = StationError::from_io_error(e, &format!("connecting to {}", addr));
                warn!("connect to {} failed: {}", addr, error);
                return Err(error);
            }
            Err(_) => {
                let error = StationError::Timeout(format!(
                    "connecting to {} ({} ms)",
                    addr, config.connect_timeout_ms
                ));
                warn!("{}", error);
                return Err(error);
            }
        };

        if let Err(e) = Self::apply_socket_options(&stream, config) {
            warn!("failed to tune socket options for {}: {}", addr, e);
            return Err(StationError::Io(e));
        }

        info!("connected to {}", addr);

        Ok(Self {
            stream,
            remote_addr: addr,
        })
    }

    /// Keep-alive profile plus TCP_NODELAY; handshake traffic is latency sensitive
    fn apply_socket_options(
        stream: &TcpStream,
        config: &ConnectionConfig,
    ) -> std::io::Result<()> {
        stream.set_nodelay(true)?;

        let sock = SockRef::from(stream);
        if config.keep_alive_enable {
            #[allow(unused_mut)]
            let mut keepalive = TcpKeepalive::new()
                .with_time(Duration::from_secs(config.tcp_keep_alive_time_s))
                .with_interval(Duration::from_secs(config.tcp_keep_alive_interval_s));
            #[cfg(not(windows))]
            {
                keepalive = keepalive.with_retries(config.tcp_keep_alive_retry_count);
            }
            sock.set_tcp_keepalive(&keepalive)?;
        } else {
            sock.set_keepalive(false)?;
        }
        Ok(())
    }

    /// Remote peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Whether the transport still reports an established connection
    pub fn is_connected(&self) -> bool {
        self.stream.peer_addr().is_ok()
    }

    /// Duplicate the session socket as a second tokio stream
    ///
    /// Both handles refer to the same TCP connection. This is how the
    /// register client shares the device's session: the device keeps one
    /// handle for liveness peeking, the register codec owns the other.
    pub fn try_clone_stream(&self) -> Result<TcpStream> {
        let sock = SockRef::from(&self.stream).try_clone()?;
        sock.set_nonblocking(true)?;
        let std_stream: std::net::TcpStream = sock.into();
        Ok(TcpStream::from_std(std_stream)?)
    }

    /// Wait up to `dur` for the stream to become readable
    ///
    /// `Ok(false)` means the link stayed quiet, which is the healthy idle
    /// state, not a fault.
    pub async fn readable_within(&self, dur: Duration) -> std::io::Result<bool> {
        match timeout(dur, self.stream.ready(Interest::READABLE)).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Peek the number of buffered bytes without consuming them
    ///
    /// Only valid to call when the stream is readable; zero bytes on a
    /// readable stream means the peer closed the connection.
    pub async fn peek_available(&self) -> std::io::Result<usize> {
        let mut buf = [0u8; PEEK_BUF_SIZE];
        self.stream.peek(&mut buf).await
    }

    /// Number of bytes available right now, without blocking or consuming
    pub async fn available(&self) -> usize {
        let mut buf = [0u8; PEEK_BUF_SIZE];
        match timeout(Duration::ZERO, self.stream.peek(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("peek on {} failed: {}", self.remote_addr, e);
                0
            }
            Err(_) => 0,
        }
    }

    /// Read whatever is currently buffered; `None` when there is nothing
    ///
    /// Faults are reported as "no data"; the caller polls again on the next
    /// cycle and the liveness probe owns failure detection.
    pub async fn read_available(&self) -> Option<Vec<u8>> {
        let available = self.available().await;
        if available == 0 {
            return None;
        }

        let mut buf = vec![0u8; available];
        match self.stream.try_read(&mut buf) {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some(buf)
            }
            Err(e) => {
                debug!("read on {} failed: {}", self.remote_addr, e);
                None
            }
        }
    }

    /// Write a full buffer within the send timeout
    pub async fn write_all(&mut self, data: &[u8], send_timeout: Duration) -> Result<()> {
        match timeout(send_timeout, async {
            self.stream.write_all(data).await?;
            self.stream.flush().await
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StationError::from_io_error(
                e,
                &format!("writing to {}", self.remote_addr),
            )),
            Err(_) => Err(StationError::Timeout(format!(
                "writing to {}",
                self.remote_addr
            ))),
        }
    }

    /// Shut the session down
    pub async fn shutdown(mut self) -> Result<()> {
        debug!("closing connection to {}", self.remote_addr);
        self.stream.shutdown().await?;
        Ok(())
    }
}

//! Transport abstraction
//!
//! The ingestion loop talks to the bridge through two small traits so the
//! same loop runs against real TCP in production and against a scripted link
//! in tests.
//!
//! Implementations:
//! - `TcpConnector` / `TcpByteStream`: tokio TCP
//! - `SimulatedConnector` / `SimulatedStream`: in-process link for tests

pub mod simulated;

pub use simulated::{SimulatedConnector, SimulatedLink, SimulatedStream};

use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;

/// Opens streams to the bridge
pub trait Connector: Send + 'static {
    type Stream: ByteStream;

    fn connect<'a>(
        &'a mut self,
        addr: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Self::Stream>> + Send + 'a>>;
}

/// A connected byte stream
pub trait ByteStream: Send + 'static {
    /// Wait up to `wait` for the stream to become readable, then read.
    ///
    /// - `Ok(None)`: nothing arrived within `wait`
    /// - `Ok(Some(n))`: `n` bytes read (0 on a spurious wakeup)
    /// - `Err(_)`: the link is unusable, including orderly close by the peer
    fn read_within<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = IoResult<Option<usize>>> + Send + 'a>>;
}

/// Production connector over tokio TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        TcpConnector { connect_timeout }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpByteStream;

    fn connect<'a>(
        &'a mut self,
        addr: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Self::Stream>> + Send + 'a>> {
        Box::pin(async move {
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| IoError::new(ErrorKind::TimedOut, "connect timed out"))??;
            stream.set_nodelay(true)?;
            Ok(TcpByteStream { stream })
        })
    }
}

#[derive(Debug)]
pub struct TcpByteStream {
    stream: TcpStream,
}

impl ByteStream for TcpByteStream {
    fn read_within<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = IoResult<Option<usize>>> + Send + 'a>> {
        Box::pin(async move {
            match tokio::time::timeout(wait, self.stream.readable()).await {
                Err(_) => Ok(None),
                Ok(ready) => {
                    ready?;
                    match self.stream.try_read(buf) {
                        Ok(0) => Err(IoError::new(
                            ErrorKind::UnexpectedEof,
                            "connection closed by peer",
                        )),
                        Ok(n) => Ok(Some(n)),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Some(0)),
                        Err(e) => Err(e),
                    }
                }
            }
        })
    }
}

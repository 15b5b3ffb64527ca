//! Byte-stream transports the driver can run over.
//!
//! The driver needs only an async duplex byte channel. [`Connector`] opens
//! one for a robot address; discovery and pairing stay outside the crate.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::debug;

/// An open duplex byte channel to the robot.
pub trait ByteChannel: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteChannel for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed channel handed to the connection tasks.
pub type BoxedChannel = Box<dyn ByteChannel>;

/// Failures of the underlying byte stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel could not be opened.
    #[error("failed to open transport to {address}: {source}")]
    Open {
        /// Address that was dialled.
        address: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The robot closed the stream.
    #[error("transport reached end of stream")]
    Closed,
    /// Reading from the stream failed.
    #[error("transport read failed: {0}")]
    Read(#[source] io::Error),
    /// Writing to the stream failed.
    #[error("transport write failed: {0}")]
    Write(#[source] io::Error),
}

/// Opens byte channels to robots.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to the robot at `address`.
    ///
    /// # Errors
    /// Returns [`TransportError::Open`] if no connection can be made.
    async fn open(&self, address: &str) -> Result<BoxedChannel, TransportError>;
}

/// Connects through a TCP endpoint that bridges to the robot's serial link.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    endpoint: SocketAddr,
}

impl TcpConnector {
    /// Create a connector for the bridge listening on `endpoint`.
    #[must_use]
    pub const fn new(endpoint: SocketAddr) -> Self { Self { endpoint } }

    /// Return the bridge endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> SocketAddr { self.endpoint }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, address: &str) -> Result<BoxedChannel, TransportError> {
        debug!(%address, endpoint = %self.endpoint, "opening tcp bridge");
        let stream = TcpStream::connect(self.endpoint)
            .await
            .map_err(|source| TransportError::Open {
                address: address.to_owned(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| TransportError::Open {
            address: address.to_owned(),
            source,
        })?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "test assertions")]
mod tests {
    use rstest::rstest;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn tcp_connector_reaches_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let endpoint = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 2];
            socket.read_exact(&mut buf).await.expect("read");
            buf
        });

        let mut channel = TcpConnector::new(endpoint)
            .open("000666112233")
            .await
            .expect("open");
        channel.write_all(&[0xFF, 0xFF]).await.expect("write");

        assert_eq!(server.await.expect("join"), [0xFF, 0xFF]);
    }

    #[rstest]
    #[tokio::test]
    async fn refused_bridge_reports_open_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let endpoint = listener.local_addr().expect("addr");
        drop(listener);

        let err = TcpConnector::new(endpoint)
            .open("000666112233")
            .await
            .err()
            .expect("refused");
        assert!(matches!(err, TransportError::Open { .. }));
    }
}

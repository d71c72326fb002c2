//! Outbound connection establishment.
//!
//! # Responsibilities
//! - Define the connector contract the pool depends on
//! - Provide a plain TCP connector with an optional connect timeout
//!
//! # Design Decisions
//! - Encryption is out of scope; `tls://` authorities are refused rather
//!   than silently downgraded
//! - Cancelling the returned future abandons the connect attempt

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::config::ClientConfig;
use crate::net::connection::Connection;
use crate::pool::Authority;

/// Opens connections to an authority.
///
/// Implementations resolve to a fresh duplex stream or an I/O error.
/// Dropping the returned future must cancel the attempt.
pub trait Connector: 'static {
    type Connection: Connection;

    fn connect(&self, authority: &Authority)
        -> impl Future<Output = io::Result<Self::Connection>>;
}

/// Connects over plain TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Create a new connector without a connect timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector honoring the configured connect timeout.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Connector for TcpConnector {
    type Connection = TcpStream;

    async fn connect(&self, authority: &Authority) -> io::Result<TcpStream> {
        if authority.is_tls() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no TLS support for {}", authority),
            ));
        }

        let address = authority.address().to_string();
        tracing::debug!(authority = %authority, "Connecting");

        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, TcpStream::connect(address))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connection to {} timed out after {:?}", authority, limit),
                    )
                })??,
            None => TcpStream::connect(address).await?,
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

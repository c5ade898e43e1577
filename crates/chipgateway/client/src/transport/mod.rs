//! Message transport between the engine and the gateway server
//!
//! The engine only needs to post a JSON body to a resource and read the answer. The
//! [`Transport`] trait captures that, [`HttpTransport`] implements it with HTTP/1.1 on top of
//! a byte stream opened by a [`Connector`].

pub mod error;
mod http;

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

pub use error::TransportError;
pub use http::HttpTransport;

/// Request/response exchange with the gateway server
#[async_trait]
pub trait Transport: Send {
    /// Post `body` to `resource` and return the answer body
    ///
    /// Implementations stop waiting and return [`TransportError::Cancelled`] as soon as
    /// `cancel` fires.
    async fn send(
        &mut self,
        resource: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError>;

    /// Release the connection
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens byte streams to the gateway server
///
/// This is where TLS plugs in: a connector returns an already negotiated channel.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stream type produced by the connector
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Value of the `Host` header
    fn authority(&self) -> &str;

    /// Open a new stream
    async fn connect(&self) -> io::Result<Self::Stream>;
}

/// Plain TCP connector for development gateways
#[derive(Debug, Clone)]
pub struct TcpConnector {
    authority: String,
}

impl TcpConnector {
    /// Connect to `authority`, given as `host:port`
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }

    /// Connect to the host and port of `url`
    pub fn from_url(url: &Url) -> io::Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URL has no host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URL has no port"))?;
        Ok(Self::new(format!("{host}:{port}")))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn authority(&self) -> &str {
        &self.authority
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        debug!(authority = %self.authority, "Opening TCP connection");
        let stream = TcpStream::connect(&self.authority).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_connector_authority() {
        let url = Url::parse("https://gateway.example/cg").unwrap();
        assert_eq!(TcpConnector::from_url(&url).unwrap().authority(), "gateway.example:443");

        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(TcpConnector::from_url(&url).unwrap().authority(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::new(address.to_string());
        assert!(connector.connect().await.is_err());
    }
}

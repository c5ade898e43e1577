//! HTTP/1.1 transport over a reusable connection

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{ACCEPT, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, HeaderValue};
use hyper::{Request, Response, StatusCode, Version};
use hyper_util::rt::TokioIo;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{Connector, Transport, TransportError};

const JSON: &str = "application/json";

struct Connection {
    sender: SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// [`Transport`] posting JSON over HTTP/1.1
///
/// One connection is kept open while the server allows keep-alive. A request that fails
/// with a broken connection is sent again once on a fresh connection.
pub struct HttpTransport<C: Connector> {
    connector: C,
    connection: Option<Connection>,
}

impl<C: Connector> HttpTransport<C> {
    /// Create a transport, no connection is opened before the first request
    pub const fn new(connector: C) -> Self {
        Self {
            connector,
            connection: None,
        }
    }

    /// The connector
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Whether a connection is open for reuse
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| !connection.sender.is_closed())
    }

    fn request(&self, resource: &str, body: Bytes) -> Result<Request<Full<Bytes>>, TransportError> {
        Ok(Request::post(resource)
            .header(HOST, self.connector.authority())
            .header(ACCEPT, JSON)
            .header(CONTENT_TYPE, JSON)
            .header(CONTENT_LENGTH, body.len())
            .body(Full::new(body))?)
    }

    async fn connect(connector: &C) -> Result<Connection, TransportError> {
        let stream = connector.connect().await.map_err(TransportError::Connect)?;
        let (sender, connection) = http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream))
            .await
            .map_err(TransportError::classify)?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "HTTP connection closed with error");
            }
        });
        debug!(authority = %connector.authority(), "Connection established");
        Ok(Connection { sender, driver })
    }

    async fn exchange(
        &mut self,
        resource: &str,
        body: Bytes,
        fresh: bool,
    ) -> Result<Bytes, TransportError> {
        let request = self.request(resource, body)?;
        let reusable = self
            .connection
            .take()
            .filter(|connection| !fresh && !connection.sender.is_closed());
        let mut connection = match reusable {
            Some(connection) => connection,
            None => Self::connect(&self.connector).await?,
        };

        connection
            .sender
            .ready()
            .await
            .map_err(TransportError::classify)?;
        let response = connection
            .sender
            .send_request(request)
            .await
            .map_err(TransportError::classify)?;

        let status = response.status();
        let keep_alive = keep_alive(&response);
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(TransportError::classify)?
            .to_bytes();
        trace!(%status, length = body.len(), keep_alive, "Received response");

        if status != StatusCode::OK {
            return Err(TransportError::Status(status.as_u16()));
        }
        if keep_alive {
            self.connection = Some(connection);
        }
        Ok(body)
    }

    async fn attempt(
        &mut self,
        resource: &str,
        body: Bytes,
        fresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.exchange(resource, body, fresh) => result,
        };
        if matches!(result, Err(TransportError::Cancelled)) {
            debug!("Exchange cancelled, shutting connection down");
            self.connection = None;
        }
        result
    }
}

/// Whether the server keeps the connection open after `response`
fn keep_alive<B>(response: &Response<B>) -> bool {
    let connection = response.headers().get(CONNECTION).map(HeaderValue::as_bytes);
    let has = |token: &str| {
        connection.is_some_and(|value| {
            value
                .split(|b| *b == b',')
                .any(|item| item.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
        })
    };
    match response.version() {
        Version::HTTP_10 => has("keep-alive"),
        Version::HTTP_11 => !has("close"),
        _ => false,
    }
}

#[async_trait]
impl<C: Connector> Transport for HttpTransport<C> {
    async fn send(
        &mut self,
        resource: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        trace!(resource, length = body.len(), "Sending request");

        match self.attempt(resource, body.clone(), false, cancel).await {
            Err(e) if e.is_retryable() && !cancel.is_cancelled() => {
                info!(error = %e, resource, "Connection failed, retrying once on a new connection");
                self.attempt(resource, body, true, cancel).await
            }
            result => result,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.connection.take().is_some() {
            debug!("Connection closed");
        }
        Ok(())
    }
}

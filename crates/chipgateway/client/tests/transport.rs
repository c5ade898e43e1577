//! HTTP transport against an in-memory server

use std::convert::Infallible;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{ACCEPT, CONNECTION, CONTENT_TYPE, HOST, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, DuplexStream};

use chipgateway_client::{Bytes, CancellationToken, Connector, HttpTransport, Transport, TransportError};

const AUTHORITY: &str = "gateway.test:443";

/// How the server treats one connection
#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Answer 200 with the request body, keep the connection
    Echo,
    /// Answer 200 and close the connection
    Close,
    /// Answer with a status
    Status(u16),
    /// Never answer
    Hang,
    /// Read the request and drop the connection
    Reset,
    /// Refuse to open the connection
    Refuse,
}

#[derive(Debug, Clone)]
struct Seen {
    method: String,
    uri: String,
    host: Option<String>,
    accept: Option<String>,
    content_type: Option<String>,
}

#[derive(Clone)]
struct DuplexConnector {
    behaviors: Arc<Vec<Behavior>>,
    connects: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl DuplexConnector {
    fn new(behaviors: Vec<Behavior>) -> Self {
        Self {
            behaviors: Arc::new(behaviors),
            connects: Arc::default(),
            seen: Arc::default(),
        }
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    fn authority(&self) -> &str {
        AUTHORITY
    }

    async fn connect(&self) -> io::Result<DuplexStream> {
        let index = self.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behaviors.get(index).copied().unwrap_or(Behavior::Echo);
        if let Behavior::Refuse = behavior {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, behavior, self.seen.clone()));
        Ok(client)
    }
}

fn header(request: &Request<Incoming>, name: hyper::header::HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

async fn serve(mut stream: DuplexStream, behavior: Behavior, seen: Arc<Mutex<Vec<Seen>>>) {
    if let Behavior::Reset = behavior {
        let mut buffer = [0u8; 1024];
        let _ = stream.read(&mut buffer).await;
        return;
    }

    let service = service_fn(move |request: Request<Incoming>| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(Seen {
                method: request.method().to_string(),
                uri: request.uri().to_string(),
                host: header(&request, HOST),
                accept: header(&request, ACCEPT),
                content_type: header(&request, CONTENT_TYPE),
            });
            let body = request
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();

            if let Behavior::Hang = behavior {
                std::future::pending::<()>().await;
            }
            let mut response = Response::new(Full::new(body));
            match behavior {
                Behavior::Status(status) => {
                    *response.status_mut() = StatusCode::from_u16(status).unwrap();
                }
                Behavior::Close => {
                    response
                        .headers_mut()
                        .insert(CONNECTION, HeaderValue::from_static("close"));
                }
                _ => {}
            }
            Ok::<_, Infallible>(response)
        }
    });

    let _ = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await;
}

#[tokio::test]
async fn test_request_shape_and_connection_reuse() {
    let connector = DuplexConnector::new(vec![Behavior::Echo]);
    let mut transport = HttpTransport::new(connector.clone());
    let cancel = CancellationToken::new();

    let first = transport
        .send("/cg/HelloRequest", Bytes::from_static(b"{\"a\":1}"), &cancel)
        .await
        .unwrap();
    let second = transport
        .send("/cg/GetCommand?tenant=7", Bytes::from_static(b"{}"), &cancel)
        .await
        .unwrap();

    assert_eq!(&first[..], b"{\"a\":1}");
    assert_eq!(&second[..], b"{}");
    assert_eq!(connector.connects(), 1);
    assert!(transport.is_connected());

    let seen = connector.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].uri, "/cg/HelloRequest");
    assert_eq!(seen[1].uri, "/cg/GetCommand?tenant=7");
    assert_eq!(seen[0].host.as_deref(), Some(AUTHORITY));
    assert_eq!(seen[0].accept.as_deref(), Some("application/json"));
    assert_eq!(seen[0].content_type.as_deref(), Some("application/json"));

    transport.close().await.unwrap();
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_connection_close_opens_new_connection() {
    let connector = DuplexConnector::new(vec![Behavior::Close, Behavior::Echo]);
    let mut transport = HttpTransport::new(connector.clone());
    let cancel = CancellationToken::new();

    transport
        .send("/a", Bytes::from_static(b"1"), &cancel)
        .await
        .unwrap();
    assert!(!transport.is_connected());
    transport
        .send("/b", Bytes::from_static(b"2"), &cancel)
        .await
        .unwrap();
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_broken_connection_is_retried_exactly_once() {
    let connector = DuplexConnector::new(vec![Behavior::Reset, Behavior::Reset, Behavior::Echo]);
    let mut transport = HttpTransport::new(connector.clone());

    let error = transport
        .send("/cg/GetCommand", Bytes::from_static(b"{}"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(error.is_retryable(), "{error}");
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_refused_connection_is_not_retried() {
    let connector = DuplexConnector::new(vec![Behavior::Refuse, Behavior::Echo]);
    let mut transport = HttpTransport::new(connector.clone());

    let error = transport
        .send("/cg/HelloRequest", Bytes::from_static(b"{}"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(&error, TransportError::Connect(e) if e.kind() == io::ErrorKind::ConnectionRefused),
        "{error}"
    );
    assert_eq!(connector.connects(), 1);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_retry_recovers_on_fresh_connection() {
    let connector = DuplexConnector::new(vec![Behavior::Reset, Behavior::Echo]);
    let mut transport = HttpTransport::new(connector.clone());

    let answer = transport
        .send("/cg/GetCommand", Bytes::from_static(b"{}"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(&answer[..], b"{}");
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_error_status_is_not_retried() {
    let connector = DuplexConnector::new(vec![Behavior::Status(500)]);
    let mut transport = HttpTransport::new(connector.clone());

    let error = transport
        .send("/cg/HelloRequest", Bytes::from_static(b"{}"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, TransportError::Status(500)));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_cancellation_interrupts_exchange() {
    let connector = DuplexConnector::new(vec![Behavior::Hang]);
    let mut transport = HttpTransport::new(connector.clone());
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let error = transport
        .send("/cg/GetCommand", Bytes::from_static(b"{}"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(error, TransportError::Cancelled));
    assert_eq!(connector.connects(), 1);
    assert!(!transport.is_connected());

    let error = transport
        .send("/cg/GetCommand", Bytes::from_static(b"{}"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(error, TransportError::Cancelled));
    assert_eq!(connector.connects(), 1);
}

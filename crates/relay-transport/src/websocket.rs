//! WebSocket backend sessions.
//!
//! This module opens one outbound WebSocket per external session using
//! tokio-tungstenite. Each connection gets a writer task draining a FIFO
//! queue, so events leave in the order they were emitted, and a reader task
//! that tags every backend event with its owning session.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_core::{
    BackendError, BackendSession, BackendSink, ConnectError, ConnectRequest, Connector, SessionId,
};
use relay_protocol::{codec, Encoding, Event};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::retry::RetryPolicy;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Backend service URL.
    pub url: String,
    /// Query parameter carrying the session identity.
    pub identity_param: String,
    /// Retry policy for the initial connection.
    pub retry: RetryPolicy,
    /// Bound on each connection attempt.
    pub connect_timeout: Duration,
    /// Encoding spoken with the backend.
    pub encoding: Encoding,
}

impl WebSocketConfig {
    /// Create a config for a backend URL with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000".to_string(),
            identity_param: "user_email".to_string(),
            retry: RetryPolicy::none(),
            connect_timeout: Duration::from_secs(5),
            encoding: Encoding::Text,
        }
    }
}

/// Opens [`WebSocketBackend`] sessions.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a new connector.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Get the connector configuration.
    #[must_use]
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Build the backend URL for a session, appending its identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URL is not a valid `ws`/`wss` URL.
    pub fn target_url(&self, identity: Option<&str>) -> Result<Url, ConnectError> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| ConnectError::InvalidTarget(format!("{}: {}", self.config.url, e)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConnectError::InvalidTarget(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        if let Some(identity) = identity {
            url.query_pairs_mut()
                .append_pair(&self.config.identity_param, identity);
        }

        Ok(url)
    }

    async fn open(&self, url: &Url) -> Result<WsStream, ConnectError> {
        let target = url.to_string();
        match tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str())).await
        {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(ConnectError::Unreachable {
                target,
                reason: e.to_string(),
            }),
            Err(_) => Err(ConnectError::Timeout { target }),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn BackendSession>, ConnectError> {
        let url = self.target_url(request.identity.as_deref())?;
        let mut backoff = self.config.retry.backoff();

        let stream = loop {
            match self.open(&url).await {
                Ok(stream) => break stream,
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        debug!(
                            session = %request.session,
                            attempt = backoff.attempt(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Backend connect failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        };

        info!(session = %request.session, target = %url, "Backend WebSocket connected");

        let backend = WebSocketBackend::spawn(
            request.session,
            url.to_string(),
            stream,
            request.sink,
            self.config.encoding,
        );
        Ok(Arc::new(backend))
    }
}

enum Outgoing {
    Event(Event),
    Close,
}

/// State shared between a backend session and its tasks.
struct Link {
    session: SessionId,
    sink: BackendSink,
    healthy: AtomicBool,
    closing: AtomicBool,
}

impl Link {
    /// Mark the link failed. The owner hears about it once, and only if the
    /// failure was not caused by our own close.
    fn fail(&self, reason: String) {
        if self.healthy.swap(false, Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst) {
            warn!(session = %self.session, reason = %reason, "Backend WebSocket failed");
            self.sink.fault(reason);
        }
    }
}

/// A backend session over one outbound WebSocket.
pub struct WebSocketBackend {
    link: Arc<Link>,
    target: String,
    tx: mpsc::UnboundedSender<Outgoing>,
    reader: JoinHandle<()>,
}

impl WebSocketBackend {
    fn spawn(
        session: SessionId,
        target: String,
        stream: WsStream,
        sink: BackendSink,
        encoding: Encoding,
    ) -> Self {
        let link = Arc::new(Link {
            session,
            sink,
            healthy: AtomicBool::new(true),
            closing: AtomicBool::new(false),
        });

        let (write, read) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(Arc::clone(&link), write, rx, encoding));
        let reader = tokio::spawn(read_loop(Arc::clone(&link), read));

        Self {
            link,
            target,
            tx,
            reader,
        }
    }
}

#[async_trait]
impl BackendSession for WebSocketBackend {
    fn session(&self) -> &SessionId {
        &self.link.session
    }

    fn target(&self) -> &str {
        &self.target
    }

    async fn emit(&self, event: Event) -> Result<(), BackendError> {
        if !self.is_healthy() {
            return Err(BackendError::Closed);
        }
        self.tx
            .send(Outgoing::Event(event))
            .map_err(|_| BackendError::Closed)
    }

    async fn close(&self) -> Result<(), BackendError> {
        if self.link.closing.swap(true, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }
        self.link.healthy.store(false, Ordering::SeqCst);
        self.reader.abort();

        debug!(session = %self.link.session, "Closing backend WebSocket");
        if self.tx.send(Outgoing::Close).is_err() {
            trace!(session = %self.link.session, "Writer already stopped");
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.link.healthy.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketBackend {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_loop(
    link: Arc<Link>,
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    encoding: Encoding,
) {
    while let Some(outgoing) = rx.recv().await {
        let event = match outgoing {
            Outgoing::Event(event) => event,
            Outgoing::Close => break,
        };

        let message = match encode(&event, encoding) {
            Ok(message) => message,
            Err(e) => {
                warn!(session = %link.session, event = %event.name, error = %e, "Dropping unencodable event");
                continue;
            }
        };

        trace!(session = %link.session, event = %event.name, "Gateway -> backend");
        if let Err(e) = write.send(message).await {
            link.fail(format!("send failed: {e}"));
            break;
        }
    }

    if let Err(e) = write.close().await {
        trace!(session = %link.session, error = %e, "Backend close handshake incomplete");
    }
}

async fn read_loop(link: Arc<Link>, mut read: SplitStream<WsStream>) {
    loop {
        let event = match read.next().await {
            Some(Ok(Message::Text(text))) => codec::decode_text(&text),
            Some(Ok(Message::Binary(data))) => codec::decode(&data),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("backend closed connection: {}", f.reason))
                    .unwrap_or_else(|| "backend closed connection".to_string());
                link.fail(reason);
                return;
            }
            Some(Err(WsError::ConnectionClosed)) | None => {
                link.fail("backend connection ended".to_string());
                return;
            }
            Some(Err(e)) => {
                link.fail(format!("receive failed: {e}"));
                return;
            }
        };

        match event {
            Ok(event) => {
                trace!(session = %link.session, event = %event.name, "Backend -> gateway");
                if !link.sink.deliver(event) {
                    debug!(session = %link.session, "External session gone, stopping reader");
                    return;
                }
            }
            Err(e) => warn!(session = %link.session, error = %e, "Undecodable backend message"),
        }
    }
}

fn encode(event: &Event, encoding: Encoding) -> Result<Message, relay_protocol::ProtocolError> {
    Ok(match encoding {
        Encoding::Text => Message::Text(codec::encode_text(event)?),
        Encoding::Binary => Message::Binary(codec::encode(event)?.to_vec()),
    })
}

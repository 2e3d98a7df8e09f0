//! HTTP surface of the relay gateway.
//!
//! Routes WebSocket upgrades to the relay and signaling session loops and
//! serves the health probes.

use crate::config::Config;
use crate::gateway::run_relay_session;
use crate::meeting_log::HttpMeetingLog;
use crate::metrics;
use crate::signaling::run_signaling_session;
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use relay_core::{Connector, MeetingLog, RelayNamespace, RoomDirectory};
use relay_protocol::Domain;
use relay_transport::WebSocketConnector;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Game relay namespace, if enabled.
    pub game: Option<Arc<RelayNamespace>>,
    /// Meeting relay namespace, if enabled.
    pub meeting: Option<Arc<RelayNamespace>>,
    /// Rooms of the signaling endpoint.
    pub directory: Arc<RoomDirectory>,
    /// One permit per open WebSocket session.
    pub permits: Arc<Semaphore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state with WebSocket backends for each enabled namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the meeting log URL is invalid.
    pub fn new(config: Config) -> Result<Self> {
        let connector = |domain: Domain| -> Arc<dyn Connector> {
            Arc::new(WebSocketConnector::new(
                config.relay(domain).connector_config(),
            ))
        };
        let game = connector(Domain::Game);
        let meeting = connector(Domain::Meeting);
        Self::with_connectors(config, game, meeting)
    }

    /// Create app state over explicit backend connectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the meeting log URL is invalid.
    pub fn with_connectors(
        config: Config,
        game: Arc<dyn Connector>,
        meeting: Arc<dyn Connector>,
    ) -> Result<Self> {
        let namespace = |domain: Domain, connector: Arc<dyn Connector>| {
            config
                .relay(domain)
                .enabled
                .then(|| Arc::new(RelayNamespace::new(domain, connector)))
        };

        let mut directory = RoomDirectory::with_config(config.signaling.directory_config());
        if let Some(url) = &config.signaling.meeting_log_url {
            let log = HttpMeetingLog::new(url, config.signaling.meeting_log_key.clone())?;
            info!("Meeting log: {}", url);
            directory = directory.with_log(Arc::new(log) as Arc<dyn MeetingLog>);
        }

        Ok(Self {
            game: namespace(Domain::Game, game),
            meeting: namespace(Domain::Meeting, meeting),
            directory: Arc::new(directory),
            permits: Arc::new(Semaphore::new(config.limits.max_connections)),
            config,
        })
    }

    /// The relay namespace for a domain, if enabled.
    #[must_use]
    pub fn namespace(&self, domain: Domain) -> Option<&Arc<RelayNamespace>> {
        match domain {
            Domain::Game => self.game.as_ref(),
            Domain::Meeting => self.meeting.as_ref(),
        }
    }

    fn namespaces(&self) -> impl Iterator<Item = &Arc<RelayNamespace>> {
        self.game.iter().chain(self.meeting.iter())
    }
}

/// Build the HTTP router for the enabled endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    let config = &state.config;
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/live", get(live_handler));

    if state.game.is_some() {
        app = app.route(&config.game.path, get(game_handler));
    }
    if state.meeting.is_some() {
        app = app.route(&config.meeting.path, get(meeting_handler));
    }
    if config.signaling.enabled {
        app = app.route(&config.signaling.path, get(signaling_handler));
    }

    app.with_state(state)
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(AppState::new(config)?);

    info!("Relay gateway listening on {}", addr);
    for domain in Domain::ALL {
        if state.namespace(domain).is_some() {
            let relay = state.config.relay(domain);
            info!(
                "{} endpoint: ws://{}{} -> {}",
                domain, addr, relay.path, relay.backend_url
            );
        }
    }
    if state.config.signaling.enabled {
        info!("Signaling endpoint: ws://{}{}", addr, state.config.signaling.path);
    }

    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for namespace in state.namespaces() {
        namespace.registry().close_all().await;
    }
    info!("Relay gateway stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Identity supplied on the upgrade request.
#[derive(Debug, Default, Deserialize)]
struct IdentityQuery {
    user_email: Option<String>,
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (active_clients, connected_backends) = state
        .namespaces()
        .map(|ns| ns.registry().stats())
        .fold((0, 0), |(clients, backends), stats| {
            (
                clients + stats.active_sessions,
                backends + stats.healthy_backends,
            )
        });

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_clients": active_clients,
        "connected_backends": connected_backends,
        "rooms": state.directory.room_count(),
    }))
}

async fn ready_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ready" }))
}

async fn live_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Game namespace upgrade handler. Game sessions carry no identity.
async fn game_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    relay_upgrade(ws, state, Domain::Game, None)
}

/// Meeting namespace upgrade handler.
async fn meeting_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<IdentityQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    relay_upgrade(ws, state, Domain::Meeting, query.user_email)
}

fn relay_upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    domain: Domain,
    identity: Option<String>,
) -> Response {
    let Some(namespace) = state.namespace(domain).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(permit) = Arc::clone(&state.permits).try_acquire_owned() else {
        return over_capacity(domain.as_str());
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            run_relay_session(socket, namespace, identity).await;
            drop(permit);
        })
}

/// Signaling endpoint upgrade handler.
async fn signaling_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<IdentityQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Ok(permit) = Arc::clone(&state.permits).try_acquire_owned() else {
        return over_capacity("signaling");
    };

    let directory = Arc::clone(&state.directory);
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            run_signaling_session(socket, directory, query.user_email).await;
            drop(permit);
        })
}

fn over_capacity(endpoint: &'static str) -> Response {
    warn!(endpoint, "Connection limit reached, rejecting upgrade");
    metrics::record_error("capacity");
    (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use relay_core::memory::MemoryConnector;
    use relay_protocol::signaling::{NewPeer, RelayedOffer, RoomJoined};
    use relay_protocol::{codec, Event};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{
        accept_async, connect_async, tungstenite::Message as WsMessage, MaybeTlsStream,
        WebSocketStream,
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Serve the gateway on an ephemeral port, with backend URLs built from
    /// the bound address.
    async fn spawn_gateway(configure: impl FnOnce(&mut Config, SocketAddr)) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config = Config::default();
        config.metrics.enabled = false;
        config.meeting.backend_url = format!("ws://{addr}/signal");
        configure(&mut config, addr);

        let state = Arc::new(AppState::new(config).unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    /// A game backend that answers `createMatch` with `matchCreated`.
    async fn spawn_game_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                        let event = codec::decode_text(&text).unwrap();
                        if event.is("createMatch") {
                            let reply =
                                Event::new("matchCreated", json!({"matchCode": "AB12", "role": "X"}));
                            let text = codec::encode_text(&reply).unwrap();
                            ws.send(WsMessage::Text(text)).await.unwrap();
                        }
                    }
                });
            }
        });
        addr
    }

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    async fn connect(addr: SocketAddr, path: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
        client
    }

    async fn send(client: &mut Client, event: Event) {
        let text = codec::encode_text(&event).unwrap();
        client.send(WsMessage::Text(text)).await.unwrap();
    }

    async fn recv(client: &mut Client) -> Event {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for event")
                .unwrap()
                .unwrap();
            match message {
                WsMessage::Text(text) => return codec::decode_text(&text).unwrap(),
                WsMessage::Binary(data) => return codec::decode(&data).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_game_events_reach_backend_and_back() {
        let backend = spawn_game_backend().await;
        let addr = spawn_gateway(|config, _| {
            config.game.backend_url = format!("ws://{backend}/socket");
        })
        .await;

        let mut client = connect(addr, "/game").await;
        send(&mut client, Event::bare("createMatch")).await;

        let reply = recv(&mut client).await;
        assert!(reply.is("matchCreated"));
        assert_eq!(reply.data["matchCode"], "AB12");
    }

    #[tokio::test]
    async fn test_unreachable_game_backend() {
        let dead = closed_port().await;
        let addr = spawn_gateway(|config, _| {
            config.game.backend_url = format!("ws://{dead}/socket");
        })
        .await;

        let mut client = connect(addr, "/game").await;
        let notice = recv(&mut client).await;
        assert_eq!(notice.error_message(), Some("Failed to connect to game server"));

        // The session stays open and every later event is a miss.
        send(&mut client, Event::bare("createMatch")).await;
        let miss = recv(&mut client).await;
        assert_eq!(miss.error_message(), Some("Backend connection not found"));
    }

    #[tokio::test]
    async fn test_unreachable_meeting_backend() {
        let dead = closed_port().await;
        let addr = spawn_gateway(|config, _| {
            config.meeting.backend_url = format!("ws://{dead}/signal");
            config.meeting.retry.max_attempts = 1;
        })
        .await;

        let mut client = connect(addr, "/meeting?user_email=alice@example.com").await;
        let notice = recv(&mut client).await;
        assert_eq!(
            notice.error_message(),
            Some("Failed to connect to meeting server")
        );

        send(&mut client, Event::new("join", json!({"room": "m-42"}))).await;
        let miss = recv(&mut client).await;
        assert_eq!(miss.error_message(), Some("Backend connection not found"));
    }

    #[tokio::test]
    async fn test_leaving_during_connect_retries_frees_the_slot() {
        let dead = closed_port().await;
        let addr = spawn_gateway(|config, _| {
            config.limits.max_connections = 1;
            config.meeting.backend_url = format!("ws://{dead}/signal");
            config.meeting.retry.max_attempts = 4;
            config.meeting.retry.initial_delay_ms = 1_000;
            config.meeting.retry.max_delay_ms = 2_000;
        })
        .await;

        let mut client = connect(addr, "/meeting").await;
        client.close(None).await.unwrap();
        drop(client);

        // Retries alone would hold the slot for several seconds.
        let reconnected = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok((client, _)) = connect_async(format!("ws://{addr}/signal")).await {
                    return client;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        assert!(reconnected.is_ok(), "slot still held by the departed session");
    }

    #[tokio::test]
    async fn test_events_sent_while_connecting_are_relayed() {
        let backend = spawn_game_backend().await;
        let addr = spawn_gateway(|config, _| {
            config.game.backend_url = format!("ws://{backend}/socket");
        })
        .await;

        let mut client = connect(addr, "/game").await;
        send(&mut client, Event::bare("createMatch")).await;
        send(&mut client, Event::bare("createMatch")).await;

        assert!(recv(&mut client).await.is("matchCreated"));
        assert!(recv(&mut client).await.is("matchCreated"));
    }

    #[tokio::test]
    async fn test_meeting_signaling_through_gateway() {
        let addr = spawn_gateway(|_, _| {}).await;

        let mut alice = connect(addr, "/meeting?user_email=alice@example.com").await;
        send(&mut alice, Event::new("join", json!({"room": "m-42"}))).await;
        let joined: RoomJoined = recv(&mut alice).await.payload().unwrap();
        assert!(joined.peers.is_empty());

        let mut bob = connect(addr, "/meeting?user_email=bob@example.com").await;
        send(&mut bob, Event::new("join", json!({"room": "m-42"}))).await;

        let joined: RoomJoined = recv(&mut bob).await.payload().unwrap();
        assert_eq!(joined.room, "m-42");
        assert_eq!(joined.peers.len(), 1);
        assert_eq!(
            joined.peer_info[0].user_email.as_deref(),
            Some("alice@example.com")
        );
        let alice_id = joined.peers[0].clone();

        let new_peer = recv(&mut alice).await;
        assert!(new_peer.is("new-peer"));
        let new_peer: NewPeer = new_peer.payload().unwrap();
        assert_eq!(new_peer.user_email.as_deref(), Some("bob@example.com"));

        send(
            &mut bob,
            Event::new(
                "offer",
                json!({"room": "m-42", "targetId": alice_id, "offer": {"type": "offer", "sdp": "v=0"}}),
            ),
        )
        .await;

        let offer = recv(&mut alice).await;
        assert!(offer.is("offer"));
        let offer: RelayedOffer = offer.payload().unwrap();
        assert_eq!(offer.peer_id, new_peer.peer_id);
        assert_eq!(offer.offer, json!({"type": "offer", "sdp": "v=0"}));
    }

    #[tokio::test]
    async fn test_signaling_replies_in_binary() {
        let addr = spawn_gateway(|_, _| {}).await;
        let mut client = connect(addr, "/signal").await;

        let join = codec::encode(&Event::new("join", json!({"room": "m-1"}))).unwrap();
        client.send(WsMessage::Binary(join.to_vec())).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let WsMessage::Binary(data) = reply else {
            panic!("expected a binary reply, got {reply:?}");
        };
        assert!(codec::decode(&data).unwrap().is("room-joined"));
    }

    #[tokio::test]
    async fn test_malformed_message_is_reported() {
        let addr = spawn_gateway(|_, _| {}).await;
        let mut client = connect(addr, "/signal").await;

        client
            .send(WsMessage::Text("not json".to_string()))
            .await
            .unwrap();
        let notice = recv(&mut client).await;
        assert_eq!(notice.error_message(), Some("Malformed message"));
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let addr = spawn_gateway(|config, _| {
            config.limits.max_connections = 1;
        })
        .await;

        let _first = connect(addr, "/signal").await;
        let second = connect_async(format!("ws://{addr}/signal")).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_disabled_namespace_is_not_routed() {
        let addr = spawn_gateway(|config, _| {
            config.game.enabled = false;
        })
        .await;

        assert!(connect_async(format!("ws://{addr}/game")).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_meeting_log_url_is_rejected() {
        let mut config = Config::default();
        config.signaling.meeting_log_url = Some("not a url".into());
        assert!(AppState::new(config).is_err());

        let mut config = Config::default();
        config.signaling.meeting_log_url = Some("http://127.0.0.1:5000".into());
        assert!(AppState::new(config).is_ok());
    }

    #[tokio::test]
    async fn test_health_counts_sessions() {
        let mut config = Config::default();
        config.metrics.enabled = false;
        let (game, _inbox) = MemoryConnector::new("ws://game");
        let (meeting, _meeting_inbox) = MemoryConnector::new("ws://meeting");
        let state = Arc::new(AppState::with_connectors(
            config,
            Arc::new(game),
            Arc::new(meeting),
        )
        .unwrap());

        let game_ns = state.namespace(Domain::Game).unwrap();
        let session = relay_core::SessionId::new("sid_a");
        let (sink, _rx) = relay_core::BackendSink::channel(session.clone());
        game_ns.on_connect(&session, None, sink).await.unwrap();

        let Json(body) = health_handler(State(Arc::clone(&state))).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_clients"], 1);
        assert_eq!(body["connected_backends"], 1);
        assert_eq!(body["rooms"], 0);

        let Json(ready) = ready_handler().await;
        assert_eq!(ready["status"], "ready");
        let Json(live) = live_handler().await;
        assert_eq!(live["status"], "alive");
    }
}

//! Signaling session loop backed by the room directory.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use relay_core::{RoomDirectory, SessionId, SignalingError};
use relay_protocol::{Encoding, Event};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics::{self, SessionMetricsGuard};
use crate::wire::{send_event, Inbound};

const NAMESPACE: &str = "signaling";

/// Drive one signaling session until it disconnects.
pub async fn run_signaling_session(
    socket: WebSocket,
    directory: Arc<RoomDirectory>,
    identity: Option<String>,
) {
    let _metrics_guard = SessionMetricsGuard::new(NAMESPACE);

    let session = SessionId::generate();
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel();
    let mut encoding = Encoding::Text;

    directory.attach(session.clone(), identity, outbox);

    loop {
        tokio::select! {
            Some(event) = inbox.recv() => {
                metrics::record_event(NAMESPACE, "outbound");
                if send_event(&mut sender, &event, encoding).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                let inbound = match msg {
                    Some(Ok(message)) => Inbound::from(message),
                    Some(Err(e)) => {
                        warn!(session = %session, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => Inbound::Close,
                };

                let reply = match inbound {
                    Inbound::Event(event, used) => {
                        encoding = used;
                        metrics::record_event(NAMESPACE, "inbound");
                        let reply = handle(&directory, &session, event);
                        metrics::set_active_rooms(directory.room_count());
                        reply
                    }
                    Inbound::Malformed(e) => {
                        debug!(session = %session, error = %e, "Malformed signaling message");
                        metrics::record_error("decode");
                        Some(Event::error("Malformed message"))
                    }
                    Inbound::Ping(data) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        None
                    }
                    Inbound::Ignore => None,
                    Inbound::Close => break,
                };

                if let Some(reply) = reply {
                    if send_event(&mut sender, &reply, encoding).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    let left = directory.detach(&session);
    metrics::set_active_rooms(directory.room_count());
    debug!(session = %session, rooms = left.len(), "Signaling session closed");
}

/// Apply one event, returning the error notice for the sender if any.
fn handle(directory: &RoomDirectory, session: &SessionId, event: Event) -> Option<Event> {
    match directory.handle(session, event) {
        Ok(()) => None,
        Err(SignalingError::UnknownEvent(name)) => {
            warn!(session = %session, event = %name, "Dropping unknown signaling event");
            None
        }
        Err(e) => {
            debug!(session = %session, error = %e, "Signaling event rejected");
            Some(e.to_event())
        }
    }
}

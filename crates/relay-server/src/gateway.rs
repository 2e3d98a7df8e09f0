//! Relay session loop for the game and meeting namespaces.
//!
//! Each external session runs in its own task: it opens the backend session,
//! then multiplexes client messages and relay instructions until either side
//! goes away. The client is read while the backend connect is still
//! retrying, so a client that leaves early releases its slot at once.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use relay_core::{
    BackendSink, InstructionKind, RelayError, RelayInstruction, RelayNamespace, SessionId,
};
use relay_protocol::{Encoding, Event};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::metrics::{self, SessionMetricsGuard};
use crate::wire::{send_event, ClientSender, Inbound};

/// Drive one external session of a relay namespace.
pub async fn run_relay_session(
    socket: WebSocket,
    namespace: Arc<RelayNamespace>,
    identity: Option<String>,
) {
    let ns = namespace.domain().as_str();
    let _metrics_guard = SessionMetricsGuard::new(ns);

    let session = SessionId::generate();
    debug!(namespace = ns, session = %session, identity = ?identity, "External session connected");

    let (sender, mut receiver) = socket.split();
    let (sink, mut instructions) = BackendSink::channel(session.clone());
    let mut relay = Relay {
        namespace: &namespace,
        session: &session,
        sender,
        encoding: Encoding::Text,
    };

    // Events that arrive while connecting are replayed once the outcome is known.
    let mut pending = Vec::new();
    let mut connecting = Box::pin(namespace.on_connect(&session, identity, sink));

    let connected = loop {
        tokio::select! {
            result = &mut connecting => break Some(result),

            msg = receiver.next() => match relay.read(msg) {
                Inbound::Ping(data) => {
                    if relay.pong(data).await.is_break() {
                        break None;
                    }
                }
                Inbound::Ignore => {}
                Inbound::Close => break None,
                inbound => pending.push(inbound),
            }
        }
    };
    // Dropping an unfinished connect cancels its remaining attempts.
    drop(connecting);

    match connected {
        Some(result) => {
            // A failed connect leaves the session open; later events report misses.
            let flow = match result {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    metrics::record_connect_failure(ns);
                    match e.to_event() {
                        Some(event) => relay.send(&event).await,
                        None => ControlFlow::Continue(()),
                    }
                }
            };
            metrics::set_healthy_backends(ns, namespace.registry().healthy_count());

            if flow.is_continue() {
                relay.serve(pending, &mut instructions, &mut receiver).await;
            }
        }
        None => {
            debug!(namespace = ns, session = %session, "External session left before backend connect finished");
        }
    }

    namespace.on_disconnect(&session).await;
    metrics::set_healthy_backends(ns, namespace.registry().healthy_count());
    debug!(namespace = ns, session = %session, "External session closed");
}

/// One external session's side of the relay.
struct Relay<'a> {
    namespace: &'a RelayNamespace,
    session: &'a SessionId,
    sender: ClientSender,
    encoding: Encoding,
}

impl Relay<'_> {
    fn ns(&self) -> &'static str {
        self.namespace.domain().as_str()
    }

    /// Replay buffered client messages, then multiplex until either side closes.
    async fn serve(
        &mut self,
        pending: Vec<Inbound>,
        instructions: &mut UnboundedReceiver<RelayInstruction>,
        receiver: &mut SplitStream<WebSocket>,
    ) {
        for inbound in pending {
            if self.handle(inbound).await.is_break() {
                return;
            }
        }

        loop {
            let flow = tokio::select! {
                Some(instruction) = instructions.recv() => self.deliver(instruction).await,
                msg = receiver.next() => {
                    let inbound = self.read(msg);
                    self.handle(inbound).await
                }
            };
            if flow.is_break() {
                return;
            }
        }
    }

    /// Classify the next item of the client stream.
    fn read(&self, msg: Option<Result<Message, axum::Error>>) -> Inbound {
        match msg {
            Some(Ok(message)) => Inbound::from(message),
            Some(Err(e)) => {
                warn!(namespace = self.ns(), session = %self.session, error = %e, "WebSocket error");
                metrics::record_error("websocket");
                Inbound::Close
            }
            None => Inbound::Close,
        }
    }

    async fn handle(&mut self, inbound: Inbound) -> ControlFlow<()> {
        match inbound {
            Inbound::Event(event, used) => {
                self.encoding = used;
                metrics::record_event(self.ns(), "inbound");
                self.forward(event).await
            }
            Inbound::Malformed(e) => {
                debug!(namespace = self.ns(), session = %self.session, error = %e, "Malformed client message");
                metrics::record_error("decode");
                self.send(&Event::error("Malformed message")).await
            }
            Inbound::Ping(data) => self.pong(data).await,
            Inbound::Ignore => ControlFlow::Continue(()),
            Inbound::Close => ControlFlow::Break(()),
        }
    }

    /// Pass a relay instruction on to the client.
    async fn deliver(&mut self, instruction: RelayInstruction) -> ControlFlow<()> {
        if matches!(instruction.kind, InstructionKind::Fault(_)) {
            metrics::record_backend_fault(self.ns());
            metrics::set_healthy_backends(self.ns(), self.namespace.registry().healthy_count());
        }

        match self.namespace.on_backend_event(instruction) {
            Some(event) => {
                metrics::record_event(self.ns(), "outbound");
                self.send(&event).await
            }
            None => ControlFlow::Continue(()),
        }
    }

    /// Forward one client event, reporting relay errors back to the client.
    async fn forward(&mut self, event: Event) -> ControlFlow<()> {
        let Err(e) = self.namespace.on_client_event(self.session, event).await else {
            return ControlFlow::Continue(());
        };

        if matches!(e, RelayError::NotFound) {
            metrics::record_relay_miss(self.ns());
        }

        match e.to_event() {
            Some(notice) => self.send(&notice).await,
            None => ControlFlow::Continue(()),
        }
    }

    async fn send(&mut self, event: &Event) -> ControlFlow<()> {
        match send_event(&mut self.sender, event, self.encoding).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                debug!(session = %self.session, error = %e, "Client write failed");
                ControlFlow::Break(())
            }
        }
    }

    async fn pong(&mut self, data: Vec<u8>) -> ControlFlow<()> {
        match self.sender.send(Message::Pong(data)).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }
}

//! Event framing on external WebSocket sessions.

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use relay_protocol::{codec, Encoding, Event, ProtocolError};

/// Write half of an external session.
pub type ClientSender = SplitSink<WebSocket, Message>;

/// What a client WebSocket message means to a session loop.
pub enum Inbound {
    /// A decoded event and the encoding it arrived in.
    Event(Event, Encoding),
    /// A data message that is not a valid event.
    Malformed(ProtocolError),
    /// A ping to answer.
    Ping(Vec<u8>),
    /// The client closed the session.
    Close,
    /// Nothing to do.
    Ignore,
}

impl From<Message> for Inbound {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => match codec::decode_text(&text) {
                Ok(event) => Inbound::Event(event, Encoding::Text),
                Err(e) => Inbound::Malformed(e),
            },
            Message::Binary(data) => match codec::decode(&data) {
                Ok(event) => Inbound::Event(event, Encoding::Binary),
                Err(e) => Inbound::Malformed(e),
            },
            Message::Ping(data) => Inbound::Ping(data),
            Message::Pong(_) => Inbound::Ignore,
            Message::Close(_) => Inbound::Close,
        }
    }
}

/// Send an event in the given encoding.
pub async fn send_event(sender: &mut ClientSender, event: &Event, encoding: Encoding) -> Result<()> {
    let message = match encoding {
        Encoding::Text => Message::Text(codec::encode_text(event)?),
        Encoding::Binary => Message::Binary(codec::encode(event)?.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}

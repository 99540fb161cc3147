//! Chat client connection
//!
//! Connects to a chat server, performs the username handshake and exchanges
//! message records. Used by the `chat_client` binary and the integration tests.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::ClientError;
use crate::message::{Message, MessageType};
use crate::types::SessionId;

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sending half of a client connection
pub struct ChatSender {
    sink: SplitSink<ClientStream, WsMessage>,
}

impl ChatSender {
    /// Send one record
    ///
    /// The sender id is left at 0; the server stamps the real one.
    pub async fn send(&mut self, message: Message) -> Result<(), ClientError> {
        let text = message.encode()?;
        self.sink.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    /// Send a record of the given type
    pub async fn send_kind(&mut self, kind: MessageType, body: &str) -> Result<(), ClientError> {
        self.send(Message::new(SessionId::default(), kind, body)).await
    }

    /// Send a raw text frame, bypassing record encoding
    pub async fn send_raw(&mut self, text: &str) -> Result<(), ClientError> {
        self.sink.send(WsMessage::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.sink.close().await?;
        Ok(())
    }
}

/// Receiving half of a client connection
pub struct ChatReceiver {
    source: SplitStream<ClientStream>,
}

impl ChatReceiver {
    /// Next record from the server, or None once the server closed
    pub async fn recv(&mut self) -> Result<Option<Message>, ClientError> {
        while let Some(frame) = self.source.next().await {
            match frame? {
                WsMessage::Text(text) => return Ok(Some(Message::decode(&text)?)),
                WsMessage::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }
}

/// A connected chat client
pub struct ChatClient {
    sender: ChatSender,
    receiver: ChatReceiver,
}

impl ChatClient {
    /// Connect to `url` and introduce ourselves as `username`
    pub async fn connect(url: &str, username: &str) -> Result<Self, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (sink, source) = ws_stream.split();

        let mut sender = ChatSender { sink };
        sender.send_raw(username).await?;

        Ok(Self {
            sender,
            receiver: ChatReceiver { source },
        })
    }

    pub async fn send(&mut self, message: Message) -> Result<(), ClientError> {
        self.sender.send(message).await
    }

    pub async fn send_text(&mut self, body: &str) -> Result<(), ClientError> {
        self.sender.send_kind(MessageType::Text, body).await
    }

    pub async fn send_kind(&mut self, kind: MessageType, body: &str) -> Result<(), ClientError> {
        self.sender.send_kind(kind, body).await
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<(), ClientError> {
        self.sender.send_raw(text).await
    }

    pub async fn recv(&mut self) -> Result<Option<Message>, ClientError> {
        self.receiver.recv().await
    }

    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.sender.close().await
    }

    /// Split into independently usable halves
    pub fn into_split(self) -> (ChatSender, ChatReceiver) {
        (self.sender, self.receiver)
    }
}

/// Map one console line to the record it sends
///
/// `logout` in any case logs out; every other line is chat text.
pub fn parse_console_line(line: &str) -> Message {
    if line.trim().eq_ignore_ascii_case("logout") {
        Message::new(SessionId::default(), MessageType::Logout, "")
    } else {
        Message::new(SessionId::default(), MessageType::Text, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logout_any_case() {
        for line in ["logout", "LOGOUT", "LogOut", " logout "] {
            assert_eq!(parse_console_line(line).kind, MessageType::Logout);
        }
    }

    #[test]
    fn test_other_lines_are_text() {
        let msg = parse_console_line("hello everyone");
        assert_eq!(msg.kind, MessageType::Text);
        assert_eq!(msg.body, "hello everyone");

        // Only the bare word counts
        assert_eq!(parse_console_line("logout now").kind, MessageType::Text);
        assert_eq!(parse_console_line("block bob").kind, MessageType::Text);
    }
}

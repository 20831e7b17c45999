// Streaming transport abstraction and its WebSocket implementation.
//
// The session only talks to `Transport`/`Connector`, so tests can script
// frames and failures without opening sockets.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("transport is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// One inbound frame, still undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes,
        }
    }
}

/// A live, bidirectional frame stream.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound frame. `None` means the peer closed the stream cleanly.
    /// Must be cancel-safe: it is polled inside `select!`.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports to a URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// How a raw WebSocket message maps onto the transport contract.
#[derive(Debug)]
pub enum Classified {
    Frame(Frame),
    /// Control traffic (ping/pong/raw frames); keep reading.
    Skip,
    Closed,
    Failed(TransportError),
}

/// Classify one item read from a WebSocket stream.
pub fn classify(item: Result<Message, tungstenite::Error>) -> Classified {
    match item {
        Ok(Message::Text(text)) => Classified::Frame(Frame::Text(text.to_string())),
        Ok(Message::Binary(bytes)) => Classified::Frame(Frame::Binary(bytes.to_vec())),
        Ok(Message::Close(frame)) => {
            info!("Server sent close frame: {frame:?}");
            Classified::Closed
        }
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Classified::Skip,
        Err(tungstenite::Error::ConnectionClosed) => Classified::Closed,
        Err(e) => Classified::Failed(TransportError::WebSocket(e)),
    }
}

/// [`Transport`] over any tokio-tungstenite stream.
pub struct WsTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> WsTransport<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let item = self.stream.next().await?;
            match classify(item) {
                Classified::Frame(frame) => return Some(Ok(frame)),
                Classified::Skip => continue,
                Classified::Closed => return None,
                Classified::Failed(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Connects with `tokio_tungstenite::connect_async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        debug!("Opening WebSocket to {url}");
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(Box::new(WsTransport::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Error as WsError;

    #[test]
    fn text_becomes_text_frame() {
        match classify(Ok(Message::Text("hello".into()))) {
            Classified::Frame(Frame::Text(t)) => assert_eq!(t, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn binary_becomes_binary_frame() {
        match classify(Ok(Message::Binary(vec![1, 2, 3].into()))) {
            Classified::Frame(frame) => assert_eq!(frame.as_bytes(), &[1, 2, 3]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn control_messages_are_skipped() {
        assert!(matches!(classify(Ok(Message::Ping(vec![].into()))), Classified::Skip));
        assert!(matches!(classify(Ok(Message::Pong(vec![].into()))), Classified::Skip));
    }

    #[test]
    fn close_frame_and_connection_closed_end_stream() {
        assert!(matches!(classify(Ok(Message::Close(None))), Classified::Closed));
        assert!(matches!(classify(Err(WsError::ConnectionClosed)), Classified::Closed));
    }

    #[test]
    fn other_errors_fail_the_transport() {
        assert!(matches!(
            classify(Err(WsError::AlreadyClosed)),
            Classified::Failed(TransportError::WebSocket(_))
        ));
    }

    #[test]
    fn json_payload_preserved_exactly() {
        let payload = r#"{"type":"GAME_UPDATE","payload":{"homeScore":3}}"#;
        match classify(Ok(Message::Text(payload.into()))) {
            Classified::Frame(frame) => assert_eq!(frame.as_bytes(), payload.as_bytes()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn ws_transport_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Ping(vec![9].into())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"PONG"}"#.into())).await.unwrap();
            // Echo back whatever the client sends, then close.
            let echoed = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(t))) => break t.to_string(),
                    Some(Ok(_)) => continue,
                    other => panic!("server read failed: {other:?}"),
                }
            };
            ws.send(Message::Text(echoed.into())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut transport = TungsteniteConnector
            .connect(&format!("ws://{addr}/ws/simulation/live"))
            .await
            .unwrap();

        let first = transport.recv().await.unwrap().unwrap();
        assert_eq!(first, Frame::Text(r#"{"type":"PONG"}"#.into()));

        transport.send(r#"{"type":"PING","payload":{}}"#.into()).await.unwrap();
        let echoed = transport.recv().await.unwrap().unwrap();
        assert_eq!(echoed, Frame::Text(r#"{"type":"PING","payload":{}}"#.into()));

        assert!(transport.recv().await.is_none());
        let _ = transport.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TungsteniteConnector.connect(&format!("ws://{addr}/")).await;
        assert!(result.is_err());
    }
}

//! Websocket plumbing behind two small traits so the supervisor can be driven
//! by a scripted source in tests.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::decoder::Frame;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("receive failed: {0}")]
    Receive(String),
}

/// An open connection yielding data frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Next data frame. `None` means the peer closed the connection.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn close(&mut self);
}

/// Opens connections to the central server.
#[async_trait]
pub trait Connector: Send + Sync {
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Box<dyn FrameSource>, TransportError>;
}

pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn endpoint(&self) -> String {
        self.url.to_string()
    }

    async fn connect(&self) -> Result<Box<dyn FrameSource>, TransportError> {
        let (stream, response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|err| TransportError::Connect {
                    endpoint: self.endpoint(),
                    reason: err.to_string(),
                })?;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WebSocketSource { stream }))
    }
}

struct WebSocketSource {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(TransportError::Receive(err.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text))),
                Message::Binary(bytes) => return Some(Ok(Frame::Binary(bytes))),
                Message::Close(frame) => {
                    debug!(?frame, "server closed websocket");
                    return None;
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("control frame skipped");
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "websocket close handshake failed");
        }
    }
}

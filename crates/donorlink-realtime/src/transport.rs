//! Push channel transport.
//!
//! A [`Connector`] turns handshake credentials into a [`Link`]: an outbound
//! command sender plus a stream of decoded inbound events. The production
//! connector speaks WebSocket; tests use [`crate::mock::MockConnector`].

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use donorlink_core::{defaults, Command, Error, Event, Result, Session};

/// Header carrying the identity id on the upgrade request.
pub const IDENTITY_HEADER: &str = "x-identity-id";

/// Connection-time credentials. Never sent as an event payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub identity_id: String,
    pub auth_token: String,
}

impl Handshake {
    pub fn from_session(session: &Session) -> Self {
        Self {
            identity_id: session.identity.id.clone(),
            auth_token: session.auth_token.clone(),
        }
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("identity_id", &self.identity_id)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// An established push channel.
///
/// Dropping the `outbound` sender closes the underlying connection; the
/// `inbound` stream ends when the server goes away.
pub struct Link {
    pub outbound: mpsc::Sender<Command>,
    pub inbound: BoxStream<'static, Result<Event>>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("outbound_closed", &self.outbound.is_closed())
            .finish_non_exhaustive()
    }
}

/// Opens push channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake. An `Err` counts as a failed attempt.
    async fn connect(&self, handshake: &Handshake) -> Result<Link>;
}

/// WebSocket connector speaking the `{"event", "data"}` frame format.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    outbound_buffer: usize,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outbound_buffer: defaults::OUTBOUND_BUFFER,
        }
    }

    pub fn with_outbound_buffer(mut self, size: usize) -> Self {
        self.outbound_buffer = size.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, handshake: &Handshake) -> Result<Link> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Config(format!("invalid push url {}: {e}", self.url)))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", handshake.auth_token))
            .map_err(|_| Error::InvalidInput("auth token is not a valid header value".into()))?;
        let identity = HeaderValue::from_str(&handshake.identity_id)
            .map_err(|_| Error::InvalidInput("identity id is not a valid header value".into()))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(HeaderName::from_static(IDENTITY_HEADER), identity);

        let (ws, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");

        let (mut sink, stream) = ws.split();
        let (outbound, mut rx) = mpsc::channel::<Command>(self.outbound_buffer);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let frame = match command.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(command = %command.name, error = %e, "Failed to encode command");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    warn!(command = %command.name, error = %e, "Failed to send command");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let inbound = stream
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => match Event::from_frame(&text) {
                        Ok(event) => Some(Ok(event)),
                        Err(e) => {
                            warn!(error = %e, frame_len = text.len(), "Skipping malformed frame");
                            None
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Server closed push channel");
                        None
                    }
                    Ok(other) => {
                        trace!(kind = ?std::mem::discriminant(&other), "Ignoring non-text frame");
                        None
                    }
                    Err(e) => Some(Err(Error::Transport(e.to_string()))),
                }
            })
            .boxed();

        Ok(Link { outbound, inbound })
    }
}

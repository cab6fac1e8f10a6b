//! Outbound connection from a fleet node to a courier hub.
//!
//! The connector dials the hub, presents the shared secret as its first
//! frame, and then exchanges envelopes. Inbound envelopes are decoded on a
//! background task and delivered through a channel. Reconnecting after a
//! drop is left to the caller.

use std::time::Duration;

use courier_common::{Envelope, EnvelopeError, Payload};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Envelopes received from the hub. Ends when the connection does.
pub type Inbound = mpsc::Receiver<Envelope>;

const INBOUND_CAPACITY: usize = 256;

/// How long [`Connector::close`] waits for the hub to acknowledge.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },
    #[error("transport error: {0}")]
    Transport(#[source] Box<tungstenite::Error>),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl From<tungstenite::Error> for ConnectorError {
    fn from(e: tungstenite::Error) -> Self {
        ConnectorError::Transport(Box::new(e))
    }
}

pub struct Connector {
    source_id: String,
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

impl Connector {
    /// Dial `url` (e.g. `ws://hub:4100/courier/ws`) and authenticate with
    /// `auth_key`. Envelopes sent through this connector carry `source_id`.
    pub async fn connect(
        url: &str,
        auth_key: &str,
        source_id: impl Into<String>,
    ) -> Result<(Self, Inbound), ConnectorError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|source| ConnectorError::Connect {
                url: url.to_string(),
                source: Box::new(source),
            })?;
        let (mut sink, stream) = ws.split();

        sink.send(Message::Text(auth_key.to_string().into())).await?;

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(read_loop(stream, tx));

        tracing::debug!(%url, "connected to hub");

        let connector = Self {
            source_id: source_id.into(),
            sink,
            reader,
        };
        Ok((connector, rx))
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Wrap `payload` in a new envelope from this node and send it.
    /// Returns the envelope id.
    pub async fn send(&mut self, payload: impl Into<Payload>) -> Result<Uuid, ConnectorError> {
        let envelope = Envelope::new(self.source_id.clone(), payload);
        self.forward(&envelope).await?;
        Ok(envelope.id())
    }

    /// Send an existing envelope unchanged, keeping its id and source.
    pub async fn forward(&mut self, envelope: &Envelope) -> Result<(), ConnectorError> {
        let text = envelope.encode()?;
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Send a close frame and wait briefly for the hub to finish the close
    /// handshake.
    pub async fn close(mut self) -> Result<(), ConnectorError> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let sent = self.sink.send(Message::Close(Some(frame))).await;

        if time::timeout(CLOSE_GRACE, &mut self.reader).await.is_err() {
            tracing::debug!("hub did not finish close handshake in time");
            self.reader.abort();
        }

        match sent {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, inbound: mpsc::Sender<Envelope>) {
    while let Some(msg) = stream.next().await {
        let decoded = match msg {
            Ok(Message::Text(text)) => Envelope::decode(text.as_str().as_bytes()),
            Ok(Message::Binary(bytes)) => Envelope::decode(&bytes),
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "hub closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(?e, "hub connection read error");
                break;
            }
        };

        match decoded {
            Ok(envelope) => {
                if inbound.send(envelope).await.is_err() {
                    // Nobody is listening any more.
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed frame from hub"),
        }
    }
}

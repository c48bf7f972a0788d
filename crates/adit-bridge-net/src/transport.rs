//! ---
//! adit_section: "05-networking-external-interfaces"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Manager and Instance connectivity."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::trace;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events delivered from the transport to its owning supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel reached the open state.
    Opened,
    /// A text frame arrived.
    Text(String),
    /// The peer answered a ping.
    Pong,
    /// The channel closed, with the close code when the peer sent one.
    Closed {
        /// Protocol close code, when present.
        code: Option<u16>,
    },
    /// The channel failed; no further events follow.
    Error(String),
}

/// Errors surfaced while establishing the channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connect deadline elapsed before the channel opened.
    #[error("connect deadline elapsed")]
    Deadline,
    /// The handshake itself failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// A bidirectional text-framed control channel to one Instance, with
/// out-of-band ping/pong.
///
/// The receive half runs as a detached pump task that forwards every frame
/// to the owner's event channel. [`ControlTransport::close_forceful`]
/// aborts that pump *before* tearing the socket down, so intentional
/// shutdown can never be observed as a spurious close event.
#[derive(Debug)]
pub struct ControlTransport {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

impl ControlTransport {
    /// Open the channel, failing if the open state is not reached within
    /// `deadline`. Dropping the returned future cancels the attempt; that
    /// makes a half-open connect safe to abandon without further teardown.
    pub async fn connect(
        url: &str,
        deadline: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let connect = connect_async(url);
        let (stream, _response) = match tokio::time::timeout(deadline, connect).await {
            Err(_) => return Err(TransportError::Deadline),
            Ok(Err(err)) => return Err(TransportError::Handshake(err.to_string())),
            Ok(Ok(established)) => established,
        };

        let (sink, source) = stream.split();
        let reader = tokio::spawn(pump(source, events.clone()));
        let _ = events.send(TransportEvent::Opened);

        Ok(Self { sink, reader })
    }

    /// Send a text frame. Reports whether the frame was handed to the
    /// socket; callers do not retry.
    pub async fn send_text(&mut self, text: &str) -> bool {
        self.sink
            .send(Message::Text(text.to_owned()))
            .await
            .is_ok()
    }

    /// Send an out-of-band ping.
    pub async fn send_ping(&mut self) -> bool {
        self.sink.send(Message::Ping(Vec::new())).await.is_ok()
    }

    /// Tear the channel down. Event delivery is detached first, so no close
    /// or error event escapes an intentional shutdown. Safe to call in any
    /// state; errors on the dying socket are ignored.
    pub async fn close_forceful(mut self) {
        self.reader.abort();
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

async fn pump(mut source: SplitStream<WsStream>, events: mpsc::UnboundedSender<TransportEvent>) {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                if events.send(TransportEvent::Text(text)).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Pong(_))) => {
                if events.send(TransportEvent::Pong).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Ping(_))) => {
                // tungstenite queues the protocol-level reply itself.
                trace!("control transport pinged by peer");
            }
            Some(Ok(Message::Binary(_))) | Some(Ok(Message::Frame(_))) => {
                trace!("ignoring non-text frame on control transport");
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map(|frame| u16::from(frame.code));
                let _ = events.send(TransportEvent::Closed { code });
                return;
            }
            Some(Err(err)) => {
                let _ = events.send(TransportEvent::Error(err.to_string()));
                return;
            }
            None => {
                let _ = events.send(TransportEvent::Closed { code: None });
                return;
            }
        }
    }
}

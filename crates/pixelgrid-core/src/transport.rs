//! Transports between a [`ConnectionManager`](crate::connection::ConnectionManager)
//! and the pixel table server.
//!
//! A transport hands back a [`TransportLink`]: a one-shot readiness signal,
//! a command sender and an inbound message receiver. Messages keep their
//! order in both directions.

use crate::config::ClientConfig;
use crate::connection::ConnectionError;
use crate::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Handshake outcome: the server-assigned identity, or a failure reason.
pub type Readiness = Result<String, String>;

/// Commands sent to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Send(ClientMessage),
    Close,
}

/// Client side of an open transport.
#[derive(Debug)]
pub struct TransportLink {
    pub ready: oneshot::Receiver<Readiness>,
    pub commands: mpsc::UnboundedSender<TransportCommand>,
    pub incoming: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Backend side of an open transport, driven by the transport implementation.
#[derive(Debug)]
pub struct TransportEnds {
    pub ready: Option<oneshot::Sender<Readiness>>,
    pub incoming: mpsc::UnboundedSender<ServerMessage>,
    pub commands: mpsc::UnboundedReceiver<TransportCommand>,
}

impl TransportEnds {
    /// Fire the readiness signal once. Later calls are ignored.
    pub fn signal_ready(&mut self, readiness: Readiness) {
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(readiness);
        }
    }
}

/// Create a connected link/ends pair.
pub fn link_pair() -> (TransportLink, TransportEnds) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    (
        TransportLink { ready: ready_rx, commands: command_tx, incoming: incoming_rx },
        TransportEnds { ready: Some(ready_tx), incoming: incoming_tx, commands: command_rx },
    )
}

/// Opens links to the server.
pub trait Transport {
    fn open(&mut self, config: &ClientConfig) -> Result<TransportLink, ConnectionError>;
}

// ============================================================================
// WebSocket transport
// ============================================================================

/// WebSocket transport running on the current tokio runtime.
#[derive(Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self, config: &ClientConfig) -> Result<TransportLink, ConnectionError> {
        let url = config
            .endpoint()
            .map_err(|e| ConnectionError::InvalidEndpoint(e.to_string()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConnectionError::Transport(format!("No async runtime: {}", e)))?;

        let (link, ends) = link_pair();
        runtime.spawn(run_socket(url, ends));
        Ok(link)
    }
}

async fn run_socket(url: Url, mut ends: TransportEnds) {
    log::info!("WebSocket task: connecting to {}", url.host_str().unwrap_or("<unknown>"));

    let socket = match connect_async(url.as_str()).await {
        Ok((socket, response)) => {
            log::info!("WebSocket connected, status: {}", response.status());
            socket
        }
        Err(e) => {
            log::error!("WebSocket connection failed: {}", e);
            ends.signal_ready(Err(format!("Connection failed: {}", e)));
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            command = ends.commands.recv() => match command {
                Some(TransportCommand::Send(msg)) => {
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            log::error!("Failed to encode client message: {}", e);
                            continue;
                        }
                    };
                    log::debug!("WebSocket sending: {}", &json[..json.len().min(100)]);
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        log::error!("WebSocket send error: {}", e);
                        break;
                    }
                }
                Some(TransportCommand::Close) | None => {
                    log::info!("WebSocket close requested");
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(txt))) => {
                    match serde_json::from_str::<ServerMessage>(txt.as_str()) {
                        Ok(ServerMessage::Connected { identity }) if ends.ready.is_some() => {
                            ends.signal_ready(Ok(identity));
                        }
                        Ok(ServerMessage::Error { message }) if ends.ready.is_some() => {
                            ends.signal_ready(Err(message));
                            break;
                        }
                        Ok(msg) => {
                            if ends.incoming.send(msg).is_err() {
                                log::debug!("Inbound receiver dropped; closing socket");
                                let _ = sink.close().await;
                                break;
                            }
                        }
                        Err(e) => log::warn!("Failed to parse server message: {}", e),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("WebSocket received close frame");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::error!("WebSocket read error: {}", e);
                    break;
                }
            },
        }
    }

    ends.signal_ready(Err("Connection closed before handshake".to_string()));
    log::info!("WebSocket task exiting");
}

// ============================================================================
// Loopback transport
// ============================================================================

#[derive(Debug, Default)]
struct LoopbackShared {
    opens: usize,
    auto_accept: Option<String>,
    ends: Option<TransportEnds>,
    sent: Vec<ClientMessage>,
    closed: bool,
}

/// In-memory transport whose backend side is scripted through a [`LoopbackRemote`].
///
/// Useful for tests and for hosts that want to run the grid offline.
#[derive(Debug)]
pub struct LoopbackTransport {
    shared: Rc<RefCell<LoopbackShared>>,
}

/// Backend side of a [`LoopbackTransport`].
#[derive(Debug, Clone)]
pub struct LoopbackRemote {
    shared: Rc<RefCell<LoopbackShared>>,
}

impl LoopbackTransport {
    /// A transport that waits for [`LoopbackRemote::accept`].
    pub fn new() -> (Self, LoopbackRemote) {
        let shared = Rc::new(RefCell::new(LoopbackShared::default()));
        (Self { shared: shared.clone() }, LoopbackRemote { shared })
    }

    /// A transport that completes the handshake as soon as it is opened.
    pub fn accepting(identity: impl Into<String>) -> (Self, LoopbackRemote) {
        let (transport, remote) = Self::new();
        transport.shared.borrow_mut().auto_accept = Some(identity.into());
        (transport, remote)
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self, _config: &ClientConfig) -> Result<TransportLink, ConnectionError> {
        let mut shared = self.shared.borrow_mut();
        shared.opens += 1;
        shared.closed = false;
        let (link, mut ends) = link_pair();
        if let Some(identity) = shared.auto_accept.clone() {
            ends.signal_ready(Ok(identity));
        }
        shared.ends = Some(ends);
        Ok(link)
    }
}

impl LoopbackRemote {
    /// Number of times the transport was opened.
    pub fn opens(&self) -> usize {
        self.shared.borrow().opens
    }

    /// Complete the handshake.
    pub fn accept(&self, identity: &str) {
        if let Some(ends) = self.shared.borrow_mut().ends.as_mut() {
            ends.signal_ready(Ok(identity.to_string()));
        }
    }

    /// Fail the handshake.
    pub fn reject(&self, reason: &str) {
        if let Some(ends) = self.shared.borrow_mut().ends.as_mut() {
            ends.signal_ready(Err(reason.to_string()));
        }
    }

    /// Deliver a message to the client. Returns false when no link is open.
    pub fn push(&self, msg: ServerMessage) -> bool {
        match self.shared.borrow().ends.as_ref() {
            Some(ends) => ends.incoming.send(msg).is_ok(),
            None => false,
        }
    }

    /// Messages the client sent so far, in order.
    pub fn sent(&self) -> Vec<ClientMessage> {
        let mut shared = self.shared.borrow_mut();
        let mut drained = Vec::new();
        let mut closed = false;
        if let Some(ends) = shared.ends.as_mut() {
            while let Ok(command) = ends.commands.try_recv() {
                match command {
                    TransportCommand::Send(msg) => drained.push(msg),
                    TransportCommand::Close => closed = true,
                }
            }
        }
        shared.sent.extend(drained);
        shared.closed |= closed;
        shared.sent.clone()
    }

    /// Whether the client asked to close the link.
    pub fn is_closed(&self) -> bool {
        self.sent();
        self.shared.borrow().closed
    }

    /// Drop the backend side, as if the server went away.
    pub fn hang_up(&self) {
        self.shared.borrow_mut().ends = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_pair_preserves_order() {
        let (mut link, ends) = link_pair();
        for position in 0..3 {
            ends.incoming.send(ServerMessage::RowDeleted { position }).unwrap();
        }
        let received: Vec<_> = std::iter::from_fn(|| link.incoming.try_recv().ok()).collect();
        assert_eq!(
            received,
            (0..3).map(|position| ServerMessage::RowDeleted { position }).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_signal_ready_fires_once() {
        let (mut link, mut ends) = link_pair();
        ends.signal_ready(Ok("first".into()));
        ends.signal_ready(Ok("second".into()));
        assert_eq!(link.ready.try_recv().unwrap(), Ok("first".to_string()));
    }

    #[test]
    fn test_loopback_records_sent_messages() {
        let (mut transport, remote) = LoopbackTransport::accepting("me");
        let link = transport.open(&ClientConfig::default()).unwrap();
        link.commands.send(TransportCommand::Send(ClientMessage::ClearGrid)).unwrap();
        link.commands.send(TransportCommand::Close).unwrap();

        assert_eq!(remote.sent(), vec![ClientMessage::ClearGrid]);
        assert!(remote.is_closed());
        assert_eq!(remote.opens(), 1);
    }

    #[test]
    fn test_websocket_transport_rejects_bad_endpoint() {
        let config = ClientConfig { uri: "not a url".into(), ..Default::default() };
        let err = WebSocketTransport::new().open(&config).unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidEndpoint(_)));
    }
}

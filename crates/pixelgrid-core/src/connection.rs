//! Connection lifecycle and snapshot fan-out.
//!
//! The [`ConnectionManager`] owns one transport link at a time. After the
//! handshake it subscribes to the pixel table, keeps a replica of the rows it
//! is told about and republishes the whole grid to its listeners after every
//! row event.

use crate::color::Color;
use crate::config::ClientConfig;
use crate::grid::PixelUpdate;
use crate::listeners::{Listeners, Subscription};
use crate::protocol::{ClientMessage, PixelRow, ServerMessage};
use crate::transport::{Transport, TransportCommand, TransportLink};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Connection errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Connection timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Connection closed")]
    Closed,
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Connection state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

struct ActiveLink {
    commands: mpsc::UnboundedSender<TransportCommand>,
    incoming: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Owns the link to the pixel table backend.
pub struct ConnectionManager<T: Transport> {
    config: ClientConfig,
    transport: T,
    state: ConnectionState,
    identity: Option<String>,
    link: Option<ActiveLink>,
    /// Replica of the subscribed table, keyed by position.
    table: BTreeMap<u32, PixelRow>,
    listeners: Listeners<[PixelUpdate]>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            state: ConnectionState::Disconnected,
            identity: None,
            link: None,
            table: BTreeMap::new(),
            listeners: Listeners::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Identity assigned by the backend during the handshake.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Open the transport and wait for the handshake.
    ///
    /// Resolves immediately when already connected. The wait is bounded by
    /// `connect_timeout_ms`; on any failure the link is closed and the state
    /// becomes [`ConnectionState::Failed`].
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        log::info!("Connecting to {}", self.config.uri);

        let TransportLink { ready, commands, incoming } = match self.transport.open(&self.config) {
            Ok(link) => link,
            Err(e) => {
                log::error!("Failed to open transport: {}", e);
                self.state = ConnectionState::Failed(e.to_string());
                return Err(e);
            }
        };

        let readiness = match tokio::time::timeout(self.config.connect_timeout(), ready).await {
            Ok(Ok(Ok(identity))) => Ok(identity),
            Ok(Ok(Err(reason))) => Err(ConnectionError::Handshake(reason)),
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::Timeout { after_ms: self.config.connect_timeout_ms }),
        };

        match readiness {
            Ok(identity) => {
                log::info!("Connected as {}", identity);
                self.identity = Some(identity);
                self.link = Some(ActiveLink { commands, incoming });
                self.table.clear();
                self.state = ConnectionState::Connected;
                let query = self.config.subscription_query.clone();
                self.send("subscribe", ClientMessage::Subscribe { query });
                Ok(())
            }
            Err(e) => {
                log::error!("Connection failed: {}", e);
                let _ = commands.send(TransportCommand::Close);
                self.state = ConnectionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Tear down the link. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.commands.send(TransportCommand::Close);
            log::info!("Disconnected");
        }
        self.table.clear();
        self.identity = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Register a snapshot listener.
    pub fn on_grid_update(&self, callback: impl FnMut(&[PixelUpdate]) + 'static) -> Subscription {
        self.listeners.add(callback)
    }

    /// Handle every inbound message that is already queued, without waiting.
    ///
    /// Returns the number of messages handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(link) = self.link.as_mut() {
            match link.incoming.try_recv() {
                Ok(msg) => {
                    self.handle_message(msg);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.on_remote_close();
                    break;
                }
            }
        }
        handled
    }

    /// Wait for the next inbound message and handle it.
    ///
    /// Returns false when there is no link or the backend closed it.
    pub async fn process_next(&mut self) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        match link.incoming.recv().await {
            Some(msg) => {
                self.handle_message(msg);
                true
            }
            None => {
                self.on_remote_close();
                false
            }
        }
    }

    /// Paint `indices` with `color`, or erase them when `color` is `None`.
    pub fn paint(&self, indices: &[u32], color: Option<&Color>) -> bool {
        self.send(
            "paint",
            ClientMessage::Paint {
                positions: indices.to_vec(),
                color: color.map(|c| c.as_str().to_string()),
            },
        )
    }

    pub fn clear_grid(&self) -> bool {
        self.send("clear_grid", ClientMessage::ClearGrid)
    }

    pub fn sync_identity(&self, external_id: &str, email: Option<&str>, username: Option<&str>) -> bool {
        self.send(
            "sync_identity",
            ClientMessage::SyncIdentity {
                external_id: external_id.to_string(),
                email: email.map(str::to_string),
                username: username.map(str::to_string),
            },
        )
    }

    /// Full grid as currently known: one update per cell, `None` where unpainted.
    pub fn snapshot(&self) -> Vec<PixelUpdate> {
        let mut pixels: Vec<PixelUpdate> = (0..self.cell_count()).map(PixelUpdate::erase).collect();
        for row in self.table.values() {
            match Color::parse(&row.color) {
                Ok(color) => pixels[row.position as usize].color = Some(color),
                Err(e) => log::warn!("Skipping pixel {} with bad color {:?}: {}", row.position, row.color, e),
            }
        }
        pixels
    }

    fn cell_count(&self) -> u32 {
        self.config.grid_size * self.config.grid_size
    }

    fn send(&self, reducer: &str, msg: ClientMessage) -> bool {
        if !self.is_connected() {
            log::warn!("Dropping {}: not connected", reducer);
            return false;
        }
        let Some(link) = self.link.as_ref() else {
            return false;
        };
        if link.commands.send(TransportCommand::Send(msg)).is_err() {
            log::warn!("Dropping {}: transport gone", reducer);
            return false;
        }
        true
    }

    fn handle_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::SubscriptionApplied { rows } => {
                log::debug!("Subscription applied with {} rows", rows.len());
                self.table.clear();
                for row in rows {
                    self.upsert(row);
                }
                self.publish();
            }
            ServerMessage::RowInserted { row } | ServerMessage::RowUpdated { row } => {
                self.upsert(row);
                self.publish();
            }
            ServerMessage::RowDeleted { position } => {
                self.table.remove(&position);
                self.publish();
            }
            ServerMessage::ReducerFailed { reducer, message } => {
                log::warn!("Reducer {} failed: {}", reducer, message);
            }
            ServerMessage::Error { message } => {
                log::error!("Server error: {}", message);
            }
            ServerMessage::Connected { identity } => {
                log::debug!("Identity refreshed: {}", identity);
                self.identity = Some(identity);
            }
        }
    }

    fn upsert(&mut self, row: PixelRow) {
        if row.position >= self.cell_count() {
            log::warn!("Ignoring pixel row at out-of-range position {}", row.position);
            return;
        }
        self.table.insert(row.position, row);
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        let delivered = self.listeners.notify(&snapshot[..]);
        log::debug!("Published grid snapshot to {} listeners", delivered);
    }

    fn on_remote_close(&mut self) {
        log::warn!("Backend closed the connection");
        self.link = None;
        self.table.clear();
        self.identity = None;
        self.state = ConnectionState::Disconnected;
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.commands.send(TransportCommand::Close);
        }
    }
}

//! Authoritative pixel table, user tables and reducers.
//!
//! Reducers run against the caller's connection identity. Once a connection
//! has synced an external id, user rows and rate-limit windows are keyed by
//! that id, so they outlive the connection. Every row change is broadcast
//! while the row's map entry is locked, so subscribers see changes to one cell
//! in the order they were applied.

use crate::config::ServerConfig;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pixelgrid_core::color::Color;
use pixelgrid_core::protocol::{PIXEL_TABLE_QUERY, PixelRow, ServerMessage};
use pixelgrid_core::rate_limit::{
    CLEAR_GRID, GET_PIXEL_GRID, RateLimitPolicy, RateLimiter, UPDATE_PIXEL,
};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 1024;

/// A user synced from the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub external_id: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub last_active_ms: u64,
}

/// Shared application state
pub struct AppState {
    grid_size: u32,
    token: Option<String>,
    admins: HashSet<String>,
    policy: RateLimitPolicy,
    /// Pixel table keyed by position. Absent rows are unpainted.
    pixels: DashMap<u32, PixelRow>,
    /// Synced users keyed by external id.
    users: DashMap<String, User>,
    /// External id synced by each live connection.
    sessions: DashMap<String, String>,
    /// Connected identities and their connect time.
    connected: DashMap<String, u64>,
    /// Rate-limit windows keyed by external id, or by connection identity
    /// before the connection has synced.
    limiters: DashMap<String, RateLimiter>,
    tx: broadcast::Sender<ServerMessage>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            grid_size: config.grid_size,
            token: config.token.clone(),
            admins: config.admins.clone(),
            policy: config.policy.clone(),
            pixels: DashMap::new(),
            users: DashMap::new(),
            sessions: DashMap::new(),
            connected: DashMap::new(),
            limiters: DashMap::new(),
            tx,
        }
    }

    /// Whether a connection presenting `token` may upgrade.
    pub fn authorize(&self, token: Option<&str>) -> bool {
        match &self.token {
            Some(expected) => token == Some(expected.as_str()),
            None => true,
        }
    }

    /// Register a connection and subscribe it to row events.
    pub fn connect(&self, identity: &str) -> broadcast::Receiver<ServerMessage> {
        self.connected.insert(identity.to_string(), now_ms());
        info!("Client connected: {}", identity);
        self.tx.subscribe()
    }

    /// Drop the connection. The synced user's row and rate window are kept.
    pub fn disconnect(&self, identity: &str) {
        self.connected.remove(identity);
        // Windows keyed by the connection itself are never reachable again.
        self.limiters.remove(identity);
        match self.sessions.remove(identity) {
            Some((_, external_id)) => info!("User {} disconnected", external_id),
            None => info!("Client disconnected: {}", identity),
        }
    }

    pub fn is_connected(&self, identity: &str) -> bool {
        self.connected.contains_key(identity)
    }

    /// The user synced by the connection `identity`.
    pub fn user(&self, identity: &str) -> Option<User> {
        let external_id = self.sessions.get(identity)?.value().clone();
        self.users.get(&external_id).map(|u| u.clone())
    }

    /// Key for the rate window charged to `identity`.
    fn rate_key(&self, identity: &str) -> String {
        self.sessions
            .get(identity)
            .map(|external_id| external_id.value().clone())
            .unwrap_or_else(|| identity.to_string())
    }

    /// Current rows ordered by position.
    pub fn rows(&self) -> Vec<PixelRow> {
        let mut rows: Vec<PixelRow> = self.pixels.iter().map(|entry| entry.value().clone()).collect();
        rows.sort_by_key(|row| row.position);
        rows
    }

    fn rate_check(&self, identity: &str, operation: &str) -> Result<(), String> {
        let key = self.rate_key(identity);
        let mut limiter = self.limiters.entry(key.clone()).or_default();
        limiter
            .check(&key, &self.policy, operation)
            .into_result(operation)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Answer a subscription with the current table.
    pub fn subscribe(&self, identity: &str, query: &str) -> Result<Vec<PixelRow>, String> {
        if query.trim() != PIXEL_TABLE_QUERY {
            return Err(format!("Unsupported query: {}", query));
        }
        self.rate_check(identity, GET_PIXEL_GRID)?;
        Ok(self.rows())
    }

    /// Create or update the user row for `external_id` and bind this
    /// connection to it.
    pub fn sync_identity(
        &self,
        identity: &str,
        external_id: String,
        email: Option<String>,
        username: Option<String>,
    ) -> Result<(), String> {
        if external_id.is_empty() {
            return Err("External id cannot be empty".to_string());
        }
        let now = now_ms();
        self.users
            .entry(external_id.clone())
            .and_modify(|user| {
                user.email = email.clone().or(user.email.take());
                user.username = username.clone().or(user.username.take());
                user.last_active_ms = now;
            })
            .or_insert_with(|| User {
                external_id: external_id.clone(),
                email,
                username,
                last_active_ms: now,
            });
        self.sessions.insert(identity.to_string(), external_id.clone());
        info!("Synced user {} with identity {}", external_id, identity);
        Ok(())
    }

    /// Paint `positions` with `color`, or delete them when `color` is `None`.
    ///
    /// Returns the number of rows changed.
    pub fn paint(&self, identity: &str, positions: &[u32], color: Option<&str>) -> Result<usize, String> {
        if positions.is_empty() {
            return Ok(0);
        }
        let Some(external_id) = self.sessions.get(identity).map(|id| id.value().clone()) else {
            warn!("Unknown user {} attempted to paint", identity);
            return Err("Unknown user".to_string());
        };
        if !self.is_connected(identity) {
            warn!("Disconnected user {} attempted to paint", identity);
            return Err("Not connected".to_string());
        }
        let color = match color {
            Some(raw) => Some(Color::parse(raw).map_err(|e| e.to_string())?),
            None => None,
        };
        self.rate_check(identity, UPDATE_PIXEL)?;

        debug!("Painting {} pixels with {:?} by {}", positions.len(), color, identity);
        let now = now_ms();
        if let Some(mut user) = self.users.get_mut(&external_id) {
            user.last_active_ms = now;
        }

        let limit = self.grid_size * self.grid_size;
        let mut changed = 0;
        for &position in positions {
            if position >= limit {
                warn!("Invalid position {} ignored", position);
                continue;
            }
            match &color {
                Some(color) => {
                    let row = PixelRow {
                        position,
                        color: color.to_string(),
                        last_modified_by: identity.to_string(),
                        updated_at_ms: now,
                    };
                    let entry = self.pixels.entry(position);
                    let existed = matches!(entry, Entry::Occupied(_));
                    let _guard = entry.insert(row.clone());
                    let msg = if existed {
                        ServerMessage::RowUpdated { row }
                    } else {
                        ServerMessage::RowInserted { row }
                    };
                    let _ = self.tx.send(msg);
                    changed += 1;
                }
                None => {
                    if let Entry::Occupied(entry) = self.pixels.entry(position) {
                        let _ = self.tx.send(ServerMessage::RowDeleted { position });
                        entry.remove();
                        changed += 1;
                    }
                }
            }
        }
        Ok(changed)
    }

    /// Delete every row. Admin only.
    pub fn clear_grid(&self, identity: &str) -> Result<usize, String> {
        let is_admin = self
            .user(identity)
            .is_some_and(|user| self.admins.contains(&user.external_id));
        if !is_admin {
            warn!("Non-admin {} attempted to clear grid", identity);
            return Err("Unauthorized: Only admins can clear the grid".to_string());
        }
        self.rate_check(identity, CLEAR_GRID)?;

        info!("Clearing entire grid by admin {}", identity);
        let positions: Vec<u32> = self.pixels.iter().map(|entry| *entry.key()).collect();
        let mut cleared = 0;
        for position in positions {
            if let Entry::Occupied(entry) = self.pixels.entry(position) {
                let _ = self.tx.send(ServerMessage::RowDeleted { position });
                entry.remove();
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let mut config = ServerConfig::default();
        config.grid_size = 4;
        config.admins.insert("admin_1".to_string());
        AppState::new(&config)
    }

    fn synced(state: &AppState, identity: &str, external_id: &str) -> broadcast::Receiver<ServerMessage> {
        let rx = state.connect(identity);
        state.sync_identity(identity, external_id.to_string(), None, None).unwrap();
        rx
    }

    fn drain(rx: &mut broadcast::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_paint_insert_update_delete() {
        let state = state();
        let mut rx = synced(&state, "conn-a", "user_1");

        assert_eq!(state.paint("conn-a", &[0, 1], Some("#F00")), Ok(2));
        assert_eq!(state.paint("conn-a", &[1], Some("#00ff00")), Ok(1));
        assert_eq!(state.paint("conn-a", &[0, 3], None), Ok(1));

        let events = drain(&mut rx);
        assert!(matches!(&events[0], ServerMessage::RowInserted { row } if row.color == "#ff0000"));
        assert!(matches!(&events[2], ServerMessage::RowUpdated { row } if row.position == 1));
        assert_eq!(events[3], ServerMessage::RowDeleted { position: 0 });
        assert_eq!(events.len(), 4);

        let rows = state.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_modified_by, "conn-a");
    }

    #[test]
    fn test_paint_requires_synced_user() {
        let state = state();
        let _rx = state.connect("conn-a");
        assert!(state.paint("conn-a", &[0], Some("#fff")).is_err());
        assert!(state.rows().is_empty());
    }

    #[test]
    fn test_out_of_range_positions_ignored() {
        let state = state();
        let _rx = synced(&state, "conn-a", "user_1");
        assert_eq!(state.paint("conn-a", &[15, 16, 99], Some("#fff")), Ok(1));
    }

    #[test]
    fn test_bad_color_rejected() {
        let state = state();
        let _rx = synced(&state, "conn-a", "user_1");
        assert!(state.paint("conn-a", &[0], Some("red")).is_err());
    }

    #[test]
    fn test_sync_identity_merges_fields() {
        let state = state();
        let _rx = state.connect("conn-a");
        state
            .sync_identity("conn-a", "user_1".into(), Some("a@b.c".into()), None)
            .unwrap();
        state
            .sync_identity("conn-a", "user_1".into(), None, Some("alice".into()))
            .unwrap();

        let user = state.user("conn-a").unwrap();
        assert_eq!(user.email.as_deref(), Some("a@b.c"));
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert!(state.sync_identity("conn-a", String::new(), None, None).is_err());
    }

    #[test]
    fn test_clear_grid_admin_only() {
        let state = state();
        let _rx = synced(&state, "conn-a", "user_1");
        let mut admin_rx = synced(&state, "conn-b", "admin_1");
        state.paint("conn-a", &[0, 5], Some("#fff")).unwrap();
        drain(&mut admin_rx);

        assert!(state.clear_grid("conn-a").is_err());
        assert_eq!(state.clear_grid("conn-b"), Ok(2));
        assert!(state.rows().is_empty());
        assert_eq!(drain(&mut admin_rx).len(), 2);
    }

    #[test]
    fn test_paint_rate_limited() {
        let mut config = ServerConfig::default();
        config.policy = RateLimitPolicy::new(2).with_weight(UPDATE_PIXEL, 1);
        let state = AppState::new(&config);
        let _rx = synced(&state, "conn-a", "user_1");

        assert!(state.paint("conn-a", &[0], Some("#fff")).is_ok());
        assert!(state.paint("conn-a", &[1], Some("#fff")).is_ok());
        let err = state.paint("conn-a", &[2], Some("#fff")).unwrap_err();
        assert!(err.contains("Rate limit exceeded"));
    }

    #[test]
    fn test_rate_window_follows_external_id_across_connections() {
        let mut config = ServerConfig::default();
        config.policy = RateLimitPolicy::new(2).with_weight(UPDATE_PIXEL, 1);
        let state = AppState::new(&config);

        let _rx_a = synced(&state, "conn-a", "user_1");
        assert!(state.paint("conn-a", &[0], Some("#fff")).is_ok());
        assert!(state.paint("conn-a", &[1], Some("#fff")).is_ok());
        assert!(state.paint("conn-a", &[2], Some("#fff")).is_err());
        state.disconnect("conn-a");

        let _rx_b = synced(&state, "conn-b", "user_1");
        let err = state.paint("conn-b", &[2], Some("#fff")).unwrap_err();
        assert!(err.contains("Rate limit exceeded"));

        // Another user has its own window.
        let _rx_c = synced(&state, "conn-c", "user_2");
        assert_eq!(state.paint("conn-c", &[2], Some("#fff")), Ok(1));
    }

    #[test]
    fn test_reconnects_reuse_one_user_row() {
        let state = state();
        for conn in ["conn-a", "conn-b", "conn-c"] {
            let _rx = state.connect(conn);
            state
                .sync_identity(conn, "user_1".into(), Some("a@b.c".into()), None)
                .unwrap();
            state.disconnect(conn);
        }

        assert_eq!(state.users.len(), 1);
        assert!(state.sessions.is_empty());
        assert!(state.connected.is_empty());
        assert!(state.user("conn-c").is_none());

        let _rx = synced(&state, "conn-d", "user_1");
        assert_eq!(state.user("conn-d").unwrap().email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_unsynced_windows_dropped_on_disconnect() {
        let state = state();
        let _rx = state.connect("conn-a");
        state.subscribe("conn-a", PIXEL_TABLE_QUERY).unwrap();
        assert!(state.limiters.contains_key("conn-a"));

        state.disconnect("conn-a");
        assert!(state.limiters.is_empty());
    }

    #[test]
    fn test_subscribe_checks_query_and_token() {
        let state = state();
        assert!(state.subscribe("conn-a", "SELECT * FROM user").is_err());
        assert_eq!(state.subscribe("conn-a", PIXEL_TABLE_QUERY), Ok(vec![]));
        assert!(state.authorize(None));

        let mut config = ServerConfig::default();
        config.token = Some("secret".into());
        let locked = AppState::new(&config);
        assert!(!locked.authorize(None));
        assert!(!locked.authorize(Some("guess")));
        assert!(locked.authorize(Some("secret")));
    }
}

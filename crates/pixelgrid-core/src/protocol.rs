//! Wire protocol between clients and the pixel table server.
//!
//! Messages are JSON objects tagged by `type`:
//! ```json
//! { "type": "subscribe", "query": "SELECT * FROM pixel" }
//! { "type": "paint", "positions": [0, 1, 32, 33], "color": "#ff0000" }
//! { "type": "row_deleted", "position": 33 }
//! ```

use serde::{Deserialize, Serialize};

/// Query selecting the full pixel table.
pub const PIXEL_TABLE_QUERY: &str = "SELECT * FROM pixel";

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a table query
    Subscribe { query: String },
    /// Paint (or erase, when `color` is absent) a batch of cells
    Paint {
        positions: Vec<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    /// Clear every cell (admin only)
    ClearGrid,
    /// Attach an external account to this connection
    SyncIdentity {
        external_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake complete
    Connected { identity: String },
    /// Initial rows of a subscription
    SubscriptionApplied { rows: Vec<PixelRow> },
    RowInserted { row: PixelRow },
    RowUpdated { row: PixelRow },
    RowDeleted { position: u32 },
    /// A mutation was refused by the server
    ReducerFailed { reducer: String, message: String },
    /// Error message
    Error { message: String },
}

/// One row of the server's pixel table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRow {
    /// `y * grid_size + x`
    pub position: u32,
    pub color: String,
    pub last_modified_by: String,
    #[serde(default)]
    pub updated_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialize() {
        let msg = ClientMessage::Paint { positions: vec![1, 2], color: None };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"paint","positions":[1,2]}"#);
    }

    #[test]
    fn test_server_message_deserialize() {
        let json = r##"{"type":"row_inserted","row":{"position":3,"color":"#fff","last_modified_by":"abc"}}"##;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::RowInserted { row } => {
                assert_eq!(row.position, 3);
                assert_eq!(row.updated_at_ms, 0);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_sync_identity_optional_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"sync_identity","external_id":"user_1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SyncIdentity { external_id: "user_1".into(), email: None, username: None }
        );
    }
}

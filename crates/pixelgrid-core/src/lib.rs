//! PixelGrid Core Library
//!
//! Client-side synchronization engine for a shared pixel grid: the local
//! grid-state reducer, drag-to-paint interaction, rate limiting and the
//! connection to the authoritative pixel table.

pub mod color;
pub mod config;
pub mod connection;
pub mod drag;
pub mod grid;
pub mod input;
pub mod listeners;
pub mod protocol;
pub mod rate_limit;
pub mod redraw;
pub mod session;
pub mod store;
pub mod transport;

pub use color::{Color, ColorError};
pub use config::{ClientConfig, ConfigError};
pub use connection::{ConnectionError, ConnectionManager, ConnectionState};
pub use drag::{DragMode, DragOutcome, DragPaintController, PaintIntent, Tool};
pub use grid::{CellCoord, CellRect, DragSelection, GridError, GridGeometry, PixelUpdate};
pub use input::{MouseButton, PointerEvent};
pub use listeners::{Listeners, Subscription};
pub use protocol::{ClientMessage, PixelRow, ServerMessage};
pub use rate_limit::{RateDecision, RateLimitError, RateLimitPolicy, RateLimiter};
pub use redraw::RedrawFlag;
pub use session::{GridSession, SessionIdentity, SessionStatus};
pub use store::{GridAction, GridState, GridStateStore};
pub use transport::{LoopbackRemote, LoopbackTransport, Transport, WebSocketTransport};

//! One client's grid session.
//!
//! [`GridSession`] wires the pieces together: pointer events go through the
//! drag controller, committed intents are rate checked, applied locally and
//! sent; snapshots from the backend are queued by a listener and applied in
//! arrival order on the next [`GridSession::tick`].

use crate::color::Color;
use crate::config::ClientConfig;
use crate::connection::{ConnectionError, ConnectionManager, ConnectionState};
use crate::drag::{DragMode, DragOutcome, DragPaintController, PaintIntent, Tool};
use crate::grid::{GridGeometry, PixelUpdate};
use crate::input::PointerEvent;
use crate::listeners::Subscription;
use crate::rate_limit::{CLEAR_GRID, RateLimitPolicy, RateLimiter, UPDATE_PIXEL};
use crate::redraw::RedrawFlag;
use crate::store::{GridState, GridStateStore};
use crate::transport::Transport;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

/// Network status as seen by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Offline,
    Connecting,
    Live,
    Failed(ConnectionError),
}

impl SessionStatus {
    /// Message to show in place of the canvas, if any.
    pub fn error_message(&self) -> Option<String> {
        match self {
            SessionStatus::Failed(e) => Some(format!("Failed to connect to the grid: {}", e)),
            _ => None,
        }
    }
}

/// External account attached to the connection after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub external_id: String,
    pub email: Option<String>,
    pub username: Option<String>,
}

impl SessionIdentity {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self { external_id: external_id.into(), email: None, username: None }
    }
}

pub struct GridSession<T: Transport> {
    store: GridStateStore,
    controller: DragPaintController,
    connection: ConnectionManager<T>,
    limiter: RateLimiter,
    policy: RateLimitPolicy,
    identity: Option<SessionIdentity>,
    status: SessionStatus,
    redraw: RedrawFlag,
    inbox: Rc<RefCell<VecDeque<Vec<PixelUpdate>>>>,
    subscription: Subscription,
}

impl<T: Transport> GridSession<T> {
    pub fn new(config: ClientConfig, transport: T, policy: RateLimitPolicy) -> Self {
        let store = GridStateStore::new(config.grid_size);
        let controller = DragPaintController::new(config.geometry());
        let connection = ConnectionManager::new(config, transport);

        let inbox: Rc<RefCell<VecDeque<Vec<PixelUpdate>>>> = Rc::default();
        let queue = inbox.clone();
        let subscription = connection.on_grid_update(move |pixels| {
            queue.borrow_mut().push_back(pixels.to_vec());
        });

        Self {
            store,
            controller,
            connection,
            limiter: RateLimiter::new(),
            policy,
            identity: None,
            status: SessionStatus::Offline,
            redraw: RedrawFlag::new(),
            inbox,
            subscription,
        }
    }

    pub fn with_identity(mut self, identity: SessionIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Connect and, once live, attach the session identity.
    pub async fn start(&mut self) -> Result<(), ConnectionError> {
        self.status = SessionStatus::Connecting;
        self.redraw.request();

        let result = self.connection.connect().await;
        match &result {
            Ok(()) => {
                self.status = SessionStatus::Live;
                if let Some(identity) = &self.identity {
                    self.connection.sync_identity(
                        &identity.external_id,
                        identity.email.as_deref(),
                        identity.username.as_deref(),
                    );
                }
            }
            Err(e) => self.status = SessionStatus::Failed(e.clone()),
        }
        self.redraw.request();
        result
    }

    /// Per-frame host call: handle queued backend events and apply snapshots.
    ///
    /// Returns the number of snapshots applied.
    pub fn tick(&mut self) -> usize {
        self.connection.poll();
        if self.status == SessionStatus::Live && !self.connection.is_connected() {
            log::warn!("Grid connection lost");
            self.status = SessionStatus::Offline;
            self.redraw.request();
        }

        let mut applied = 0;
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(pixels) = next else {
                break;
            };
            match self.store.apply_remote_snapshot(pixels) {
                Ok(_) => applied += 1,
                Err(e) => log::warn!("Discarding remote snapshot: {}", e),
            }
        }
        if applied > 0 {
            self.redraw.request();
        }
        applied
    }

    /// Feed one pointer event through the drag controller.
    pub fn handle_pointer(&mut self, event: PointerEvent) -> DragOutcome {
        let outcome = self.controller.handle_pointer_event(&mut self.store, event);
        if outcome.redraw {
            self.redraw.request();
        }
        if let Some(intent) = &outcome.intent {
            self.commit(intent);
        }
        outcome
    }

    /// Connection check, rate check, apply optimistically, then send.
    /// Returns whether it was sent.
    fn commit(&mut self, intent: &PaintIntent) -> bool {
        if !self.connection.is_connected() {
            log::warn!("Not connected, dropping paint of {} cells", intent.updates.len());
            return false;
        }
        let key = self.rate_key();
        let decision = self.limiter.check(&key, &self.policy, UPDATE_PIXEL);
        if let Err(e) = decision.into_result(UPDATE_PIXEL) {
            log::warn!("Skipping paint of {} cells: {}", intent.updates.len(), e);
            return false;
        }

        if let Err(e) = self.store.apply_local_updates(intent.updates.clone()) {
            log::warn!("Rejected local paint: {}", e);
            return false;
        }
        self.redraw.request();
        self.connection.paint(&intent.positions(), intent.color.as_ref())
    }

    /// Ask the backend to clear every cell. Returns whether it was sent.
    pub fn clear_grid(&mut self) -> bool {
        if !self.connection.is_connected() {
            log::warn!("Not connected, dropping clear");
            return false;
        }
        let key = self.rate_key();
        let decision = self.limiter.check(&key, &self.policy, CLEAR_GRID);
        if let Err(e) = decision.into_result(CLEAR_GRID) {
            log::warn!("Skipping clear: {}", e);
            return false;
        }
        self.connection.clear_grid()
    }

    pub fn set_color(&mut self, color: Color) {
        self.controller.set_color(color);
        self.redraw.request();
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.controller.set_tool(tool);
        self.redraw.request();
    }

    /// Disconnect and drop the snapshot listener.
    pub fn shutdown(&mut self) {
        self.subscription.unsubscribe();
        self.connection.disconnect();
        self.inbox.borrow_mut().clear();
        self.status = SessionStatus::Offline;
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn connection_state(&self) -> &ConnectionState {
        self.connection.state()
    }

    pub fn state(&self) -> Arc<GridState> {
        self.store.state()
    }

    pub fn drag_mode(&self) -> DragMode {
        self.controller.drag_mode()
    }

    pub fn tool(&self) -> Tool {
        self.controller.current_tool()
    }

    pub fn selected_color(&self) -> &Color {
        self.controller.selected_color()
    }

    pub fn geometry(&self) -> GridGeometry {
        self.controller.geometry()
    }

    pub fn redraw_flag(&self) -> RedrawFlag {
        self.redraw.clone()
    }

    /// Key the rate limiter counts against.
    fn rate_key(&self) -> String {
        match (&self.identity, self.connection.identity()) {
            (Some(identity), _) => identity.external_id.clone(),
            (None, Some(identity)) => identity.to_string(),
            (None, None) => "anonymous".to_string(),
        }
    }
}

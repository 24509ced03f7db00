//! Drag-to-paint interaction.
//!
//! Pointer-down starts a rectangle, pointer-move stretches it (local marquee
//! only, no network traffic), pointer-up turns it into one [`PaintIntent`]
//! covering every cell of the inclusive rectangle.

use crate::color::Color;
use crate::grid::{CellRect, GridGeometry, PixelUpdate};
use crate::input::{MouseButton, PointerEvent};
use crate::store::{GridAction, GridStateStore};
use serde::{Deserialize, Serialize};

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
}

/// What the live drag rectangle will do when released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragMode {
    Paint(Color),
    Erase,
}

/// State of the drag interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DragPhase {
    #[default]
    Idle,
    Dragging {
        /// Button that started the drag.
        button: MouseButton,
    },
}

/// One committed rectangle: a batch of cell writes sharing one color.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintIntent {
    pub rect: CellRect,
    /// `None` erases.
    pub color: Option<Color>,
    /// Row-major updates covering `rect`.
    pub updates: Vec<PixelUpdate>,
}

impl PaintIntent {
    fn new(rect: CellRect, color: Option<Color>, grid_size: u32) -> Self {
        let updates = rect
            .indices(grid_size)
            .map(|index| PixelUpdate { index, color: color.clone() })
            .collect();
        Self { rect, color, updates }
    }

    /// Linear indices in the batch.
    pub fn positions(&self) -> Vec<u32> {
        self.updates.iter().map(|u| u.index).collect()
    }

    pub fn is_erase(&self) -> bool {
        self.color.is_none()
    }
}

/// What the host should do after an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DragOutcome {
    /// Interaction state changed; a redraw should be requested.
    pub redraw: bool,
    /// The host must swallow the context menu / default action.
    pub suppress_context_menu: bool,
    /// Set on pointer-up after a drag.
    pub intent: Option<PaintIntent>,
}

/// Turns pointer events into drag state and paint intents.
///
/// The controller only touches hover and drag fields of the store; cell
/// writes are returned as a [`PaintIntent`] for the caller to commit.
#[derive(Debug, Clone)]
pub struct DragPaintController {
    geometry: GridGeometry,
    current_tool: Tool,
    selected_color: Color,
    phase: DragPhase,
}

impl DragPaintController {
    pub fn new(geometry: GridGeometry) -> Self {
        Self {
            geometry,
            current_tool: Tool::default(),
            selected_color: Color::white(),
            phase: DragPhase::Idle,
        }
    }

    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    pub fn current_tool(&self) -> Tool {
        self.current_tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.current_tool = tool;
    }

    pub fn selected_color(&self) -> &Color {
        &self.selected_color
    }

    /// Picking a color switches back to the brush.
    pub fn set_color(&mut self, color: Color) {
        self.selected_color = color;
        self.current_tool = Tool::Brush;
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, DragPhase::Dragging { .. })
    }

    /// Mode the live rectangle is previewed in.
    pub fn drag_mode(&self) -> DragMode {
        let secondary_drag = matches!(self.phase, DragPhase::Dragging { button } if button.is_secondary());
        if secondary_drag || self.current_tool == Tool::Eraser {
            DragMode::Erase
        } else {
            DragMode::Paint(self.selected_color.clone())
        }
    }

    pub fn handle_pointer_event(&mut self, store: &mut GridStateStore, event: PointerEvent) -> DragOutcome {
        match event {
            PointerEvent::Down { position, button } => {
                if self.is_dragging() {
                    return DragOutcome { suppress_context_menu: true, ..Default::default() };
                }
                let coord = self.geometry.cell_at(position);
                dispatch(store, GridAction::StartDrag(coord));
                self.phase = DragPhase::Dragging { button };
                DragOutcome { redraw: true, suppress_context_menu: true, intent: None }
            }
            PointerEvent::Move { position } => {
                let coord = self.geometry.cell_at(position);
                dispatch(store, GridAction::SetHover(Some(coord)));
                if self.is_dragging() {
                    dispatch(store, GridAction::UpdateDrag(coord));
                }
                DragOutcome { redraw: true, ..Default::default() }
            }
            PointerEvent::Leave => {
                dispatch(store, GridAction::SetHover(None));
                DragOutcome { redraw: true, ..Default::default() }
            }
            PointerEvent::ContextMenu => DragOutcome {
                suppress_context_menu: self.is_dragging(),
                ..Default::default()
            },
            PointerEvent::Up { button, .. } => self.release(store, button),
        }
    }

    fn release(&mut self, store: &mut GridStateStore, button: MouseButton) -> DragOutcome {
        if !self.is_dragging() {
            log::debug!("Ignoring pointer-up without a drag in progress");
            return DragOutcome::default();
        }
        self.phase = DragPhase::Idle;

        let selection = store.state().drag();
        dispatch(store, GridAction::EndDrag);

        let Some(selection) = selection else {
            return DragOutcome {
                redraw: true,
                suppress_context_menu: button.is_secondary(),
                intent: None,
            };
        };

        // Secondary-button release erases regardless of the selected tool.
        let erase = button.is_secondary() || self.current_tool == Tool::Eraser;
        let color = if erase { None } else { Some(self.selected_color.clone()) };
        let intent = PaintIntent::new(selection.normalized(), color, self.geometry.grid_size);

        DragOutcome {
            redraw: true,
            suppress_context_menu: button.is_secondary(),
            intent: Some(intent),
        }
    }
}

/// Interaction actions carry clamped coordinates; a rejection means the
/// store and geometry disagree on the grid size and is absorbed.
fn dispatch(store: &mut GridStateStore, action: GridAction) {
    if let Err(e) = store.dispatch(action) {
        log::debug!("Interaction update ignored: {}", e);
    }
}

//! Grid state store.
//!
//! The canonical local view of the grid lives in an immutable [`GridState`].
//! Every [`GridAction`] produces a new version through [`GridState::reduce`];
//! nothing mutates a published version in place, so a renderer can hold an
//! `Arc<GridState>` while the next version is being computed.
//!
//! Local edits are optimistic: they land immediately. Remote snapshots are
//! authoritative and overwrite every cell they name, so a disagreeing remote
//! write always wins over an earlier optimistic one.

use crate::color::Color;
use crate::grid::{CellCoord, DragSelection, GridError, PixelUpdate};
use std::sync::Arc;

/// One state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum GridAction {
    StartDrag(CellCoord),
    UpdateDrag(CellCoord),
    EndDrag,
    SetHover(Option<CellCoord>),
    /// Optimistic local edits, applied before the backend confirms them.
    ApplyLocalUpdates(Vec<PixelUpdate>),
    /// Authoritative cells from the backend.
    ApplyRemoteSnapshot(Vec<PixelUpdate>),
}

/// An immutable version of the grid plus transient interaction state.
#[derive(Debug, Clone)]
pub struct GridState {
    size: u32,
    cells: Arc<[Option<Color>]>,
    hover: Option<CellCoord>,
    drag: Option<DragSelection>,
    version: u64,
}

impl GridState {
    /// An unpainted `size x size` grid.
    pub fn new(size: u32) -> Self {
        let count = size as usize * size as usize;
        Self {
            size,
            cells: vec![None; count].into(),
            hover: None,
            drag: None,
            version: 0,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Always `size * size`.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> &[Option<Color>] {
        &self.cells
    }

    pub fn cell(&self, index: u32) -> Option<&Color> {
        self.cells.get(index as usize).and_then(Option::as_ref)
    }

    pub fn hover(&self) -> Option<CellCoord> {
        self.hover
    }

    pub fn drag(&self) -> Option<DragSelection> {
        self.drag
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Monotonic version counter, bumped by every transition.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Painted cells as `(index, color)` pairs.
    pub fn painted(&self) -> impl Iterator<Item = (u32, &Color)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i as u32, c)))
    }

    fn check_coord(&self, coord: CellCoord) -> Result<(), GridError> {
        if coord.x >= self.size || coord.y >= self.size {
            return Err(GridError::OutOfBounds { x: coord.x, y: coord.y, size: self.size });
        }
        Ok(())
    }

    /// Copy the cells with a batch written over them. Nothing is written
    /// unless every index is in range.
    fn write_cells(&self, updates: &[PixelUpdate]) -> Result<Arc<[Option<Color>]>, GridError> {
        let limit = self.cells.len() as u64;
        if let Some(bad) = updates.iter().find(|u| u.index as u64 >= limit) {
            return Err(GridError::InvalidUpdate { index: bad.index, size: self.size });
        }
        let mut cells = self.cells.to_vec();
        for update in updates {
            cells[update.index as usize] = update.color.clone();
        }
        Ok(cells.into())
    }

    /// Compute the next version. On error `self` is untouched.
    pub fn reduce(&self, action: GridAction) -> Result<GridState, GridError> {
        let mut next = self.clone();
        next.version = self.version + 1;

        match action {
            GridAction::StartDrag(coord) => {
                self.check_coord(coord)?;
                next.drag = Some(DragSelection { start: coord, end: coord });
            }
            GridAction::UpdateDrag(coord) => {
                self.check_coord(coord)?;
                if let Some(drag) = next.drag.as_mut() {
                    drag.end = coord;
                }
            }
            GridAction::EndDrag => {
                next.drag = None;
            }
            GridAction::SetHover(coord) => {
                if let Some(coord) = coord {
                    self.check_coord(coord)?;
                }
                next.hover = coord;
            }
            GridAction::ApplyLocalUpdates(updates) | GridAction::ApplyRemoteSnapshot(updates) => {
                next.cells = self.write_cells(&updates)?;
            }
        }

        Ok(next)
    }
}

/// Owns the current [`GridState`] version and is its single mutation entry point.
#[derive(Debug, Clone)]
pub struct GridStateStore {
    current: Arc<GridState>,
}

impl GridStateStore {
    pub fn new(size: u32) -> Self {
        Self {
            current: Arc::new(GridState::new(size)),
        }
    }

    /// The current version. Cheap to clone and safe to hold across dispatches.
    pub fn state(&self) -> Arc<GridState> {
        Arc::clone(&self.current)
    }

    /// Apply one action. The stored version only changes on success.
    pub fn dispatch(&mut self, action: GridAction) -> Result<Arc<GridState>, GridError> {
        let next = self.current.reduce(action)?;
        self.current = Arc::new(next);
        Ok(self.state())
    }

    pub fn apply_local_updates(&mut self, updates: Vec<PixelUpdate>) -> Result<Arc<GridState>, GridError> {
        self.dispatch(GridAction::ApplyLocalUpdates(updates))
    }

    pub fn apply_remote_snapshot(&mut self, pixels: Vec<PixelUpdate>) -> Result<Arc<GridState>, GridError> {
        self.dispatch(GridAction::ApplyRemoteSnapshot(pixels))
    }
}

impl Default for GridStateStore {
    fn default() -> Self {
        Self::new(crate::grid::DEFAULT_GRID_SIZE)
    }
}

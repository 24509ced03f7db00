//! Grid data model: cell coordinates, rectangles, pixel updates and geometry.

use crate::color::Color;
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default grid side length in cells.
pub const DEFAULT_GRID_SIZE: u32 = 32;

/// Default cell side length in surface pixels (480px / 32 cells).
pub const DEFAULT_CELL_SIZE: f64 = 15.0;

/// Grid errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("Invalid update: index {index} outside grid of {size}x{size}")]
    InvalidUpdate { index: u32, size: u32 },
    #[error("Coordinate ({x}, {y}) outside grid of {size}x{size}")]
    OutOfBounds { x: u32, y: u32, size: u32 },
}

/// A grid position in cell units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

impl CellCoord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Linear index `y * size + x`.
    pub fn index(self, size: u32) -> u32 {
        self.y * size + self.x
    }
}

/// The unit of mutation: one cell and its new color (`None` erases).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelUpdate {
    pub index: u32,
    pub color: Option<Color>,
}

impl PixelUpdate {
    pub fn paint(index: u32, color: Color) -> Self {
        Self { index, color: Some(color) }
    }

    pub fn erase(index: u32) -> Self {
        Self { index, color: None }
    }
}

/// A normalized, inclusive cell rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub min_x: u32,
    pub min_y: u32,
    pub width: u32,
    pub height: u32,
}

impl CellRect {
    /// Normalize two corners into `(min_x, min_y, width, height)`.
    pub fn from_corners(a: CellCoord, b: CellCoord) -> Self {
        let min_x = a.x.min(b.x);
        let min_y = a.y.min(b.y);
        Self {
            min_x,
            min_y,
            width: a.x.max(b.x) - min_x + 1,
            height: a.y.max(b.y) - min_y + 1,
        }
    }

    /// Number of cells covered.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Linear indices of every covered cell, row-major.
    pub fn indices(&self, size: u32) -> impl Iterator<Item = u32> + '_ {
        (self.min_y..self.min_y + self.height).flat_map(move |y| {
            (self.min_x..self.min_x + self.width).map(move |x| y * size + x)
        })
    }
}

/// The live drag rectangle, in raw (unnormalized) corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragSelection {
    pub start: CellCoord,
    pub end: CellCoord,
}

impl DragSelection {
    pub fn normalized(&self) -> CellRect {
        CellRect::from_corners(self.start, self.end)
    }
}

/// Maps between surface pixels and grid cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    /// Cells per side.
    pub grid_size: u32,
    /// Side length of one cell in surface pixels.
    pub cell_size: f64,
}

impl Default for GridGeometry {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}

impl GridGeometry {
    pub fn new(grid_size: u32, cell_size: f64) -> Self {
        Self { grid_size, cell_size }
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.grid_size as usize * self.grid_size as usize
    }

    /// Side length of the drawing surface in pixels.
    pub fn surface_size(&self) -> f64 {
        self.grid_size as f64 * self.cell_size
    }

    /// Cell under a surface point. Points outside the surface clamp to the edge.
    pub fn cell_at(&self, point: Point) -> CellCoord {
        let max = self.grid_size.saturating_sub(1) as f64;
        let clamp = |v: f64| {
            let cell = (v / self.cell_size).floor();
            if cell.is_nan() { 0 } else { cell.clamp(0.0, max) as u32 }
        };
        CellCoord::new(clamp(point.x), clamp(point.y))
    }

    /// Surface rectangle covered by a cell.
    pub fn cell_rect(&self, coord: CellCoord) -> Rect {
        let x0 = coord.x as f64 * self.cell_size;
        let y0 = coord.y as f64 * self.cell_size;
        Rect::new(x0, y0, x0 + self.cell_size, y0 + self.cell_size)
    }

    /// Surface rectangle covered by a linear index.
    pub fn index_rect(&self, index: u32) -> Rect {
        self.cell_rect(CellCoord::new(index % self.grid_size, index / self.grid_size))
    }

    /// Surface rectangle covered by a cell rectangle.
    pub fn span_rect(&self, rect: CellRect) -> Rect {
        let x0 = rect.min_x as f64 * self.cell_size;
        let y0 = rect.min_y as f64 * self.cell_size;
        Rect::new(
            x0,
            y0,
            x0 + rect.width as f64 * self.cell_size,
            y0 + rect.height as f64 * self.cell_size,
        )
    }
}

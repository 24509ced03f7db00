//! Drawing surface abstraction and the grid frame painter.

use kurbo::{BezPath, Point, Rect};
use peniko::Color;
use pixelgrid_core::drag::DragMode;
use pixelgrid_core::grid::GridGeometry;
use pixelgrid_core::store::GridState;
use std::collections::BTreeMap;
use thiserror::Error;

/// Renderer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Drawing surface unavailable")]
    SurfaceUnavailable,
}

/// Alpha applied to the selected color for the paint-mode drag tint.
pub const PAINT_TINT_ALPHA: u8 = 0x88;

/// Colors and stroke widths of the grid view.
#[derive(Debug, Clone, Copy)]
pub struct GridPalette {
    pub background: Color,
    pub grid_line: Color,
    pub grid_line_width: f64,
    /// Hover highlight (white @ 10%).
    pub hover: Color,
    /// Drag tint in erase mode (white @ 20%).
    pub erase_tint: Color,
    /// Drag rectangle border (white @ 80%).
    pub selection_border: Color,
    pub selection_border_width: f64,
}

impl Default for GridPalette {
    fn default() -> Self {
        Self {
            background: Color::from_rgba8(0x15, 0x15, 0x15, 255),
            grid_line: Color::from_rgba8(0x33, 0x33, 0x33, 255),
            grid_line_width: 1.0,
            hover: Color::from_rgba8(255, 255, 255, 26),
            erase_tint: Color::from_rgba8(255, 255, 255, 51),
            selection_border: Color::from_rgba8(255, 255, 255, 204),
            selection_border_width: 2.0,
        }
    }
}

impl GridPalette {
    /// Fill for the live drag rectangle.
    pub fn drag_tint(&self, mode: &DragMode) -> Color {
        match mode {
            DragMode::Erase => self.erase_tint,
            DragMode::Paint(color) => Color::from(&color.with_alpha(PAINT_TINT_ALPHA)),
        }
    }
}

/// Context for a single render frame.
pub struct FrameContext<'a> {
    /// The grid version to draw.
    pub state: &'a GridState,
    pub geometry: GridGeometry,
    pub palette: GridPalette,
    /// How the live drag rectangle is tinted.
    pub drag_mode: DragMode,
}

impl<'a> FrameContext<'a> {
    pub fn new(state: &'a GridState, geometry: GridGeometry) -> Self {
        Self {
            state,
            geometry,
            palette: GridPalette::default(),
            drag_mode: DragMode::Paint(pixelgrid_core::Color::white()),
        }
    }

    pub fn with_palette(mut self, palette: GridPalette) -> Self {
        self.palette = palette;
        self
    }

    pub fn with_drag_mode(mut self, mode: DragMode) -> Self {
        self.drag_mode = mode;
        self
    }
}

/// Trait for drawing backends.
pub trait Surface {
    /// Prepare for a frame. An error defers the frame.
    fn begin_frame(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    /// Start the frame with `color` and paint it over `bounds`, the grid area.
    fn clear(&mut self, color: Color, bounds: Rect);

    /// Fill every rectangle with one color in a single operation.
    fn fill_rects(&mut self, color: Color, rects: &[Rect]);

    fn stroke_path(&mut self, color: Color, width: f64, path: &BezPath);

    fn stroke_rect(&mut self, color: Color, width: f64, rect: Rect);
}

/// Static grid lines as one path.
pub fn grid_path(geometry: &GridGeometry) -> BezPath {
    let extent = geometry.surface_size();
    let mut path = BezPath::new();
    for i in 0..=geometry.grid_size {
        let offset = i as f64 * geometry.cell_size;
        path.move_to(Point::new(offset, 0.0));
        path.line_to(Point::new(offset, extent));
        path.move_to(Point::new(0.0, offset));
        path.line_to(Point::new(extent, offset));
    }
    path
}

/// Draw one frame: background, one fill per color, grid lines, then the
/// hover or drag overlay.
pub fn draw_frame<S: Surface + ?Sized>(surface: &mut S, ctx: &FrameContext, grid_lines: &BezPath) {
    let palette = &ctx.palette;
    let extent = ctx.geometry.surface_size();
    surface.clear(palette.background, Rect::new(0.0, 0.0, extent, extent));

    let mut groups: BTreeMap<&pixelgrid_core::Color, Vec<Rect>> = BTreeMap::new();
    for (index, color) in ctx.state.painted() {
        groups.entry(color).or_default().push(ctx.geometry.index_rect(index));
    }
    for (color, rects) in &groups {
        surface.fill_rects(Color::from(*color), rects);
    }

    surface.stroke_path(palette.grid_line, palette.grid_line_width, grid_lines);

    match ctx.state.drag() {
        Some(selection) => {
            let span = ctx.geometry.span_rect(selection.normalized());
            surface.fill_rects(palette.drag_tint(&ctx.drag_mode), &[span]);
            surface.stroke_rect(palette.selection_border, palette.selection_border_width, span);
        }
        None => {
            if let Some(hover) = ctx.state.hover() {
                surface.fill_rects(palette.hover, &[ctx.geometry.cell_rect(hover)]);
            }
        }
    }
}

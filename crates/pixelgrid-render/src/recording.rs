//! Surface that records draw commands instead of rasterizing them.

use crate::renderer::{RenderError, Surface};
use kurbo::{BezPath, Rect};
use peniko::Color;

/// One recorded draw call.
#[derive(Debug, Clone)]
pub enum DrawCommand {
    Clear { color: Color, bounds: Rect },
    FillRects { color: Color, rects: Vec<Rect> },
    StrokePath { color: Color, width: f64, path: BezPath },
    StrokeRect { color: Color, width: f64, rect: Rect },
}

/// Records every draw call of every frame.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    commands: Vec<DrawCommand>,
    frames: usize,
    available: bool,
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self { commands: Vec::new(), frames: 0, available: true }
    }

    /// Simulate the backing surface going away or coming back.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DrawCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Frames started so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of fill operations recorded.
    pub fn fill_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|cmd| matches!(cmd, DrawCommand::FillRects { .. }))
            .count()
    }
}

impl Surface for RecordingSurface {
    fn begin_frame(&mut self) -> Result<(), RenderError> {
        if !self.available {
            return Err(RenderError::SurfaceUnavailable);
        }
        self.frames += 1;
        self.commands.clear();
        Ok(())
    }

    fn clear(&mut self, color: Color, bounds: Rect) {
        self.commands.push(DrawCommand::Clear { color, bounds });
    }

    fn fill_rects(&mut self, color: Color, rects: &[Rect]) {
        self.commands.push(DrawCommand::FillRects { color, rects: rects.to_vec() });
    }

    fn stroke_path(&mut self, color: Color, width: f64, path: &BezPath) {
        self.commands.push(DrawCommand::StrokePath { color, width, path: path.clone() });
    }

    fn stroke_rect(&mut self, color: Color, width: f64, rect: Rect) {
        self.commands.push(DrawCommand::StrokeRect { color, width, rect });
    }
}

//! PixelGrid Render Library
//!
//! Render loop and drawing surfaces for the pixel grid.
//! The default surface uses Vello for GPU-accelerated rendering.

pub mod recording;
mod render_loop;
mod renderer;

#[cfg(feature = "vello-renderer")]
mod vello_impl;

pub use recording::{DrawCommand, RecordingSurface};
pub use render_loop::{FrameOutcome, RenderLoop};
pub use renderer::{FrameContext, GridPalette, PAINT_TINT_ALPHA, RenderError, Surface, draw_frame, grid_path};

#[cfg(feature = "vello-renderer")]
pub use vello_impl::VelloSurface;

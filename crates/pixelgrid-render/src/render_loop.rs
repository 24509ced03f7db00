//! Dirty-flag driven redraw scheduling.

use crate::renderer::{FrameContext, Surface, draw_frame, grid_path};
use kurbo::BezPath;
use pixelgrid_core::grid::GridGeometry;
use pixelgrid_core::redraw::RedrawFlag;

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was drawn.
    Drawn,
    /// Nothing requested a redraw.
    Idle,
    /// The surface is missing or unavailable; the loop disarmed itself.
    Deferred,
    /// Disarmed or cancelled; nothing happens until re-armed.
    Inert,
}

/// Redraws a surface once per display tick while the dirty flag is set.
pub struct RenderLoop<S: Surface> {
    surface: Option<S>,
    redraw: RedrawFlag,
    armed: bool,
    cancelled: bool,
    geometry: GridGeometry,
    /// Precomputed grid lines for `geometry`.
    grid_lines: BezPath,
}

impl<S: Surface> RenderLoop<S> {
    pub fn new(geometry: GridGeometry, redraw: RedrawFlag) -> Self {
        redraw.request();
        Self {
            surface: None,
            redraw,
            armed: true,
            cancelled: false,
            geometry,
            grid_lines: grid_path(&geometry),
        }
    }

    /// Mount a surface. Re-arms the loop and requests a redraw.
    pub fn attach_surface(&mut self, surface: S) {
        self.surface = Some(surface);
        self.rearm();
    }

    pub fn detach_surface(&mut self) -> Option<S> {
        self.surface.take()
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut S> {
        self.surface.as_mut()
    }

    /// Resume ticking after a deferral.
    pub fn rearm(&mut self) {
        if self.cancelled {
            return;
        }
        self.armed = true;
        self.redraw.request();
    }

    /// Cancel the pending frame. Every later tick is inert.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn redraw_flag(&self) -> &RedrawFlag {
        &self.redraw
    }

    /// Host display-refresh callback.
    pub fn tick(&mut self, ctx: &FrameContext) -> FrameOutcome {
        if !self.armed {
            return FrameOutcome::Inert;
        }
        if ctx.geometry != self.geometry {
            self.geometry = ctx.geometry;
            self.grid_lines = grid_path(&self.geometry);
        }

        if !self.redraw.is_requested() {
            return FrameOutcome::Idle;
        }
        let Some(surface) = self.surface.as_mut() else {
            log::debug!("No drawing surface mounted; render loop deferred");
            self.armed = false;
            return FrameOutcome::Deferred;
        };
        if let Err(e) = surface.begin_frame() {
            log::debug!("Render loop deferred: {}", e);
            self.armed = false;
            return FrameOutcome::Deferred;
        }

        // Cleared before drawing so a request that lands mid-draw survives.
        if !self.redraw.take() {
            return FrameOutcome::Idle;
        }
        draw_frame(surface, ctx, &self.grid_lines);
        FrameOutcome::Drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{DrawCommand, RecordingSurface};
    use crate::renderer::{RenderError, Surface};
    use kurbo::{Rect, Shape as _};
    use peniko::Color;
    use pixelgrid_core::store::GridStateStore;

    fn setup() -> (RenderLoop<RecordingSurface>, RedrawFlag, GridStateStore) {
        let flag = RedrawFlag::new();
        let render_loop = RenderLoop::new(GridGeometry::default(), flag.clone());
        (render_loop, flag, GridStateStore::new(32))
    }

    #[test]
    fn test_draws_only_when_dirty() {
        let (mut render_loop, flag, store) = setup();
        render_loop.attach_surface(RecordingSurface::new());
        let state = store.state();
        let ctx = FrameContext::new(&state, GridGeometry::default());

        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Drawn);
        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Idle);
        flag.request();
        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Drawn);
        assert!(!flag.is_requested());
    }

    #[test]
    fn test_idle_ticks_start_no_frame() {
        let (mut render_loop, _flag, store) = setup();
        render_loop.attach_surface(RecordingSurface::new());
        let state = store.state();
        let ctx = FrameContext::new(&state, GridGeometry::default());

        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Drawn);
        let drawn = render_loop.surface().map(|s| s.commands().len()).unwrap_or_default();
        assert!(drawn > 0);

        for _ in 0..3 {
            assert_eq!(render_loop.tick(&ctx), FrameOutcome::Idle);
        }
        let surface = render_loop.surface().unwrap();
        assert_eq!(surface.frames(), 1);
        assert_eq!(surface.commands().len(), drawn);
    }

    #[test]
    fn test_missing_surface_defers_until_rearmed() {
        let (mut render_loop, flag, store) = setup();
        let state = store.state();
        let ctx = FrameContext::new(&state, GridGeometry::default());

        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Deferred);
        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Inert);
        assert!(flag.is_requested());

        render_loop.attach_surface(RecordingSurface::new());
        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Drawn);
    }

    #[test]
    fn test_unavailable_surface_defers() {
        let (mut render_loop, _flag, store) = setup();
        let mut surface = RecordingSurface::new();
        surface.set_available(false);
        render_loop.attach_surface(surface);
        let state = store.state();
        let ctx = FrameContext::new(&state, GridGeometry::default());

        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Deferred);
        if let Some(surface) = render_loop.surface_mut() {
            surface.set_available(true);
        }
        render_loop.rearm();
        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Drawn);
    }

    #[test]
    fn test_cancel_makes_loop_inert() {
        let (mut render_loop, flag, store) = setup();
        render_loop.attach_surface(RecordingSurface::new());
        render_loop.cancel();
        render_loop.rearm();
        flag.request();

        let state = store.state();
        let ctx = FrameContext::new(&state, GridGeometry::default());
        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Inert);
        assert_eq!(render_loop.surface().map(RecordingSurface::frames), Some(0));
    }

    /// Requests another frame from inside a draw call, like an update landing mid-draw.
    struct InterruptingSurface {
        flag: RedrawFlag,
        fills: usize,
    }

    impl Surface for InterruptingSurface {
        fn begin_frame(&mut self) -> Result<(), RenderError> {
            Ok(())
        }
        fn clear(&mut self, _color: Color, _bounds: Rect) {
            self.flag.request();
        }
        fn fill_rects(&mut self, _color: Color, _rects: &[Rect]) {
            self.fills += 1;
        }
        fn stroke_path(&mut self, _color: Color, _width: f64, _path: &BezPath) {}
        fn stroke_rect(&mut self, _color: Color, _width: f64, _rect: Rect) {}
    }

    #[test]
    fn test_request_during_draw_is_not_lost() {
        let flag = RedrawFlag::new();
        let mut render_loop = RenderLoop::new(GridGeometry::default(), flag.clone());
        render_loop.attach_surface(InterruptingSurface { flag: flag.clone(), fills: 0 });
        let store = GridStateStore::new(32);
        let state = store.state();
        let ctx = FrameContext::new(&state, GridGeometry::default());

        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Drawn);
        assert!(flag.is_requested());
        assert_eq!(render_loop.tick(&ctx), FrameOutcome::Drawn);
        assert_eq!(render_loop.surface().map(|s| s.fills), Some(0));
    }

    #[test]
    fn test_geometry_change_rebuilds_grid_lines() {
        let (mut render_loop, _flag, store) = setup();
        render_loop.attach_surface(RecordingSurface::new());
        let state = store.state();
        let small = GridGeometry::new(32, 5.0);
        render_loop.tick(&FrameContext::new(&state, small));

        let surface = render_loop.surface().unwrap();
        let path = surface.commands().iter().find_map(|cmd| match cmd {
            DrawCommand::StrokePath { path, .. } => Some(path.clone()),
            _ => None,
        });
        assert_eq!(path.map(|p| p.bounding_box().width()), Some(160.0));
    }
}

//! Vello-based surface implementation.

use crate::renderer::Surface;
use kurbo::{Affine, BezPath, Rect, Shape as KurboShape, Stroke};
use peniko::{Color, Fill};
use vello::Scene;

/// Surface that builds a Vello scene for GPU rendering.
///
/// The host renders [`VelloSurface::scene`] with a `vello::Renderer` after
/// each drawn frame, scaled by `transform`.
pub struct VelloSurface {
    /// The Vello scene being built.
    scene: Scene,
    /// Applied to every draw (HiDPI scale, canvas offset).
    transform: Affine,
    /// Background of the last frame, also filled over the grid area.
    base_color: Color,
}

impl Default for VelloSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl VelloSurface {
    pub fn new() -> Self {
        Self {
            scene: Scene::new(),
            transform: Affine::IDENTITY,
            base_color: Color::BLACK,
        }
    }

    /// Set the transform for the device pixel ratio.
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.transform = Affine::scale(scale_factor);
        self
    }

    pub fn set_transform(&mut self, transform: Affine) {
        self.transform = transform;
    }

    /// Get the built scene for rendering.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Take ownership of the scene (resets internal scene).
    pub fn take_scene(&mut self) -> Scene {
        std::mem::take(&mut self.scene)
    }

    /// Color to pass as `base_color` in the render parameters.
    pub fn base_color(&self) -> Color {
        self.base_color
    }
}

impl Surface for VelloSurface {
    fn clear(&mut self, color: Color, bounds: Rect) {
        self.scene.reset();
        self.base_color = color;
        self.scene.fill(Fill::NonZero, self.transform, color, None, &bounds);
    }

    fn fill_rects(&mut self, color: Color, rects: &[Rect]) {
        if rects.is_empty() {
            return;
        }
        // One path per color group keeps the encoding to one fill.
        let mut path = BezPath::new();
        for rect in rects {
            path.extend(rect.path_elements(0.1));
        }
        self.scene.fill(Fill::NonZero, self.transform, color, None, &path);
    }

    fn stroke_path(&mut self, color: Color, width: f64, path: &BezPath) {
        self.scene.stroke(&Stroke::new(width), self.transform, color, None, path);
    }

    fn stroke_rect(&mut self, color: Color, width: f64, rect: Rect) {
        self.scene.stroke(&Stroke::new(width), self.transform, color, None, &rect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{FrameContext, GridPalette, draw_frame, grid_path};
    use pixelgrid_core::grid::GridGeometry;
    use pixelgrid_core::store::GridStateStore;

    #[test]
    fn test_frame_sets_base_color() {
        let store = GridStateStore::new(4);
        let state = store.state();
        let geometry = GridGeometry::new(4, 10.0);
        let mut surface = VelloSurface::new().with_scale_factor(2.0);
        draw_frame(&mut surface, &FrameContext::new(&state, geometry), &grid_path(&geometry));

        assert_eq!(surface.base_color().components, GridPalette::default().background.components);
    }

    #[test]
    fn test_clear_fills_grid_area() {
        let mut surface = VelloSurface::new();
        assert!(surface.scene().encoding().is_empty());

        surface.clear(Color::BLACK, Rect::new(0.0, 0.0, 40.0, 40.0));
        assert!(!surface.scene().encoding().is_empty());
    }
}

//! Viewport module: world ↔ stage mapping with pan/zoom state.

use kurbo::{Affine, Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};

/// Default lower zoom bound.
pub const MIN_SCALE: f64 = 0.1;
/// Default upper zoom bound.
pub const MAX_SCALE: f64 = 10.0;

/// Viewport manages the view transform for the surface.
///
/// Stage coordinates are pixels on the rendering surface; world coordinates
/// are the units elements are stored in. `stage = world * scale + pan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Stage-space translation.
    pub pan: Vec2,
    /// Always within `[min_scale, max_scale]`.
    pub scale: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    /// Stage size in pixels.
    pub size: Size,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            pan: Vec2::ZERO,
            scale: 1.0,
            min_scale: MIN_SCALE,
            max_scale: MAX_SCALE,
            size: Size::new(800.0, 600.0),
        }
    }
}

impl Viewport {
    /// Create a default view of a viewport with the given size.
    pub fn new(size: Size) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Affine that maps world coordinates to stage coordinates.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.pan) * Affine::scale(self.scale)
    }

    /// Affine that maps stage coordinates back to world coordinates.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.scale) * Affine::translate(-self.pan)
    }

    /// Convert world coordinates to stage (screen) coordinates.
    pub fn world_to_stage(&self, world: Point) -> Point {
        self.transform() * world
    }

    /// Convert stage (screen) coordinates to world coordinates.
    pub fn stage_to_world(&self, stage: Point) -> Point {
        self.inverse_transform() * stage
    }

    /// Set the pan offset in stage pixels.
    pub fn set_pan(&mut self, pan: Vec2) {
        self.pan = pan;
    }

    /// Pan by a delta in stage pixels.
    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan += delta;
    }

    /// Set the zoom level, clamped to the bounds. Non-finite values are
    /// ignored.
    pub fn set_scale(&mut self, scale: f64) {
        if scale.is_finite() {
            self.scale = scale.clamp(self.min_scale, self.max_scale);
        }
    }

    /// Change the zoom bounds and re-clamp the current scale.
    pub fn set_scale_bounds(&mut self, min: f64, max: f64) {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.min_scale = min.max(f64::EPSILON);
        self.max_scale = max.max(self.min_scale);
        self.scale = self.scale.clamp(self.min_scale, self.max_scale);
    }

    /// Set the viewport size in stage pixels.
    pub fn set_size(&mut self, size: Size) {
        self.size = size;
    }

    /// Zoom by `factor`, keeping the world point under `anchor` fixed.
    pub fn zoom_at(&mut self, anchor: Point, factor: f64) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let new_scale = (self.scale * factor).clamp(self.min_scale, self.max_scale);
        if (new_scale - self.scale).abs() < f64::EPSILON {
            return;
        }

        let world = self.stage_to_world(anchor);
        self.scale = new_scale;

        let drifted = self.world_to_stage(world);
        self.pan += anchor - drifted;
    }

    /// Back to the origin at 100%.
    pub fn reset(&mut self) {
        self.pan = Vec2::ZERO;
        self.scale = 1.0_f64.clamp(self.min_scale, self.max_scale);
    }

    /// Center `bounds` in the stage with `padding` pixels on every side.
    /// `None` resets the view.
    pub fn fit_to_content(&mut self, bounds: Option<Rect>, padding: f64) {
        let Some(bounds) = bounds else {
            self.reset();
            return;
        };

        let padded = Size::new(
            (self.size.width - padding * 2.0).max(1.0),
            (self.size.height - padding * 2.0).max(1.0),
        );
        let scale_x = padded.width / bounds.width().max(1.0);
        let scale_y = padded.height / bounds.height().max(1.0);
        self.scale = scale_x.min(scale_y).clamp(self.min_scale, self.max_scale);

        let stage_center = Point::new(self.size.width / 2.0, self.size.height / 2.0);
        let content_center = bounds.center();
        self.pan = Vec2::new(
            stage_center.x - content_center.x * self.scale,
            stage_center.y - content_center.y * self.scale,
        );
    }

    /// World-space rectangle currently on screen.
    pub fn visible_world_rect(&self) -> Rect {
        Rect::from_points(
            self.stage_to_world(Point::ZERO),
            self.stage_to_world(Point::new(self.size.width, self.size.height)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_viewport() {
        let viewport = Viewport::default();
        assert_eq!(viewport.pan, Vec2::ZERO);
        assert!((viewport.scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stage_to_world_with_pan_and_scale() {
        let mut viewport = Viewport::default();
        viewport.set_pan(Vec2::new(50.0, 100.0));
        viewport.set_scale(2.0);
        let world = viewport.stage_to_world(Point::new(150.0, 300.0));
        assert!((world.x - 50.0).abs() < f64::EPSILON);
        assert!((world.y - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_roundtrip_conversion() {
        let mut viewport = Viewport::default();
        viewport.pan = Vec2::new(30.0, -20.0);
        viewport.scale = 1.5;
        let original = Point::new(123.0, 456.0);
        let back = viewport.world_to_stage(viewport.stage_to_world(original));
        assert!((back.x - original.x).abs() < 1e-10);
        assert!((back.y - original.y).abs() < 1e-10);
    }

    #[test]
    fn test_zoom_at_keeps_anchor_fixed() {
        let mut viewport = Viewport::default();
        viewport.pan = Vec2::new(17.0, -42.0);
        let anchor = Point::new(320.0, 240.0);
        let before = viewport.stage_to_world(anchor);
        for factor in [1.25, 0.5, 3.0, 0.9] {
            viewport.zoom_at(anchor, factor);
            let after = viewport.stage_to_world(anchor);
            assert!((after.x - before.x).abs() < 1e-9);
            assert!((after.y - before.y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zoom_clamp() {
        let mut viewport = Viewport::default();
        viewport.zoom_at(Point::ZERO, 0.001);
        assert!((viewport.scale - viewport.min_scale).abs() < f64::EPSILON);
        viewport.zoom_at(Point::ZERO, 1.0e6);
        assert!((viewport.scale - viewport.max_scale).abs() < f64::EPSILON);
        viewport.set_scale(f64::NAN);
        assert!((viewport.scale - viewport.max_scale).abs() < f64::EPSILON);
    }

    #[test]
    fn test_set_scale_bounds_reclamps() {
        let mut viewport = Viewport::default();
        viewport.set_scale(8.0);
        viewport.set_scale_bounds(0.5, 4.0);
        assert!((viewport.scale - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fit_empty_resets() {
        let mut viewport = Viewport::default();
        viewport.pan = Vec2::new(10.0, 10.0);
        viewport.scale = 3.0;
        viewport.fit_to_content(None, 50.0);
        assert_eq!(viewport.pan, Vec2::ZERO);
        assert!((viewport.scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fit_centers_content() {
        let mut viewport = Viewport::new(Size::new(800.0, 600.0));
        viewport.fit_to_content(Some(Rect::new(0.0, 0.0, 100.0, 50.0)), 50.0);
        assert!((viewport.scale - 7.0).abs() < 1e-9);
        let center = viewport.world_to_stage(Point::new(50.0, 25.0));
        assert!((center.x - 400.0).abs() < 1e-9);
        assert!((center.y - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_single_point_does_not_divide_by_zero() {
        let mut viewport = Viewport::default();
        viewport.fit_to_content(Some(Rect::new(5.0, 5.0, 5.0, 5.0)), 50.0);
        assert!(viewport.scale.is_finite());
        assert!((viewport.scale - viewport.max_scale).abs() < f64::EPSILON);
    }

    #[test]
    fn test_visible_world_rect() {
        let mut viewport = Viewport::new(Size::new(200.0, 100.0));
        viewport.scale = 2.0;
        viewport.pan = Vec2::new(-20.0, 0.0);
        assert_eq!(viewport.visible_world_rect(), Rect::new(10.0, 0.0, 110.0, 50.0));
    }
}

//! Visual style payload carried by every element.

use peniko::Color;
use serde::{Deserialize, Serialize};

/// RGBA8 color that survives a JSON round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::new(0, 0, 0, 255);
    pub const WHITE: Rgba = Rgba::new(255, 255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Scale alpha by an opacity in `[0, 1]`.
    pub fn with_opacity(self, opacity: f64) -> Self {
        let alpha = (f64::from(self.a) * opacity.clamp(0.0, 1.0)).round() as u8;
        Self { a: alpha, ..self }
    }
}

impl From<Color> for Rgba {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self::new(rgba.r, rgba.g, rgba.b, rgba.a)
    }
}

impl From<Rgba> for Color {
    fn from(color: Rgba) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Stroke and fill properties for an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementStyle {
    pub stroke_color: Rgba,
    pub stroke_width: f64,
    /// `None` means unfilled.
    #[serde(default)]
    pub fill_color: Option<Rgba>,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_opacity() -> f64 {
    1.0
}

impl Default for ElementStyle {
    fn default() -> Self {
        Self {
            stroke_color: Rgba::BLACK,
            stroke_width: 2.0,
            fill_color: None,
            opacity: 1.0,
        }
    }
}

impl ElementStyle {
    /// Stroke color with opacity applied, ready for the renderer.
    pub fn stroke(&self) -> Color {
        self.stroke_color.with_opacity(self.opacity).into()
    }

    /// Fill color with opacity applied.
    pub fn fill(&self) -> Option<Color> {
        self.fill_color
            .map(|c| c.with_opacity(self.opacity).into())
    }

    pub fn is_filled(&self) -> bool {
        self.fill_color.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_roundtrip_through_peniko() {
        let rgba = Rgba::new(10, 20, 30, 40);
        let color: Color = rgba.into();
        assert_eq!(Rgba::from(color), rgba);
    }

    #[test]
    fn test_opacity_scales_alpha() {
        assert_eq!(Rgba::BLACK.with_opacity(0.5).a, 128);
        assert_eq!(Rgba::BLACK.with_opacity(2.0).a, 255);
    }

    #[test]
    fn test_style_defaults_from_json() {
        let style: ElementStyle = serde_json::from_str(
            r#"{ "stroke_color": { "r": 1, "g": 2, "b": 3, "a": 255 }, "stroke_width": 1.5 }"#,
        )
        .unwrap();
        assert!(!style.is_filled());
        assert!((style.opacity - 1.0).abs() < f64::EPSILON);
    }
}

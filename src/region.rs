/// Region and semantic class model
///
/// A `Region` is one classified glomerulus candidate expressed in percent
/// coordinates of its source image (0-100, origin at the top-left corner).
/// Ingestion and the viewport engine both produce and consume this type.
use std::fmt;
use serde::{Deserialize, Serialize};

/// Semantic class of a detected glomerulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlomerulusClass {
    Normal,
    Cellular,
    Sclerotic,
    Membranous,
    Crescents,
}

impl GlomerulusClass {
    pub const ALL: [GlomerulusClass; 5] = [
        GlomerulusClass::Normal,
        GlomerulusClass::Cellular,
        GlomerulusClass::Sclerotic,
        GlomerulusClass::Membranous,
        GlomerulusClass::Crescents,
    ];

    /// Serialized key, as used in datasets and exports
    pub fn as_str(&self) -> &'static str {
        match self {
            GlomerulusClass::Normal => "normal",
            GlomerulusClass::Cellular => "cellular",
            GlomerulusClass::Sclerotic => "sclerotic",
            GlomerulusClass::Membranous => "membranous",
            GlomerulusClass::Crescents => "crescents",
        }
    }

    /// Display label and colors for this class
    pub fn style(&self) -> ClassStyle {
        match self {
            GlomerulusClass::Normal => ClassStyle {
                label: "固有细胞无增生",
                color: Color::rgb(0x22, 0xc5, 0x5e),
                fill: Color::rgba(34, 197, 94, 0.25),
            },
            GlomerulusClass::Cellular => ClassStyle {
                label: "毛细血管内增生",
                color: Color::rgb(0xef, 0x44, 0x44),
                fill: Color::rgba(239, 68, 68, 0.25),
            },
            GlomerulusClass::Sclerotic => ClassStyle {
                label: "硬化",
                color: Color::rgb(0xea, 0xb3, 0x08),
                fill: Color::rgba(234, 179, 8, 0.25),
            },
            GlomerulusClass::Membranous => ClassStyle {
                label: "单纯系膜增生",
                color: Color::rgb(0x3b, 0x82, 0xf6),
                fill: Color::rgba(59, 130, 246, 0.25),
            },
            GlomerulusClass::Crescents => ClassStyle {
                label: "新月体",
                color: Color::rgb(0xdb, 0x27, 0x77),
                fill: Color::rgba(219, 39, 119, 0.25),
            },
        }
    }
}

impl fmt::Display for GlomerulusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassStyle {
    pub label: &'static str,
    /// Stroke / accent color
    pub color: Color,
    /// Translucent fill drawn under a hovered box
    pub fill: Color,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// `#rrggbb`, alpha is dropped
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_css(&self) -> String {
        if self.a >= 1.0 {
            self.to_hex()
        } else {
            format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, self.a)
        }
    }
}

/// A classified, percent-coordinate bounding box.
///
/// `x + width` / `y + height` may overflow 100 for boxes near the image edge;
/// use [`Region::clipped`] when drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(rename = "type")]
    pub class: GlomerulusClass,
    pub confidence: f64,
}

/// Axis-aligned box in percent space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Percent-space containment, edges inclusive
    pub fn contains(&self, x_pct: f64, y_pct: f64) -> bool {
        x_pct >= self.x && x_pct <= self.right() && y_pct >= self.y && y_pct <= self.bottom()
    }

    /// Visible part of the box inside the image (`[0, 100]` on both axes).
    /// Returns `None` only when nothing of the box is on the image.
    pub fn clipped(&self) -> Option<PercentRect> {
        let left = self.x.max(0.0);
        let top = self.y.max(0.0);
        let right = self.right().min(100.0);
        let bottom = self.bottom().min(100.0);

        if right < left || bottom < top {
            return None;
        }

        Some(PercentRect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        })
    }

    /// Copy with geometry rounded to `geometry_decimals` and confidence to
    /// `confidence_decimals`. Only used at export boundaries.
    pub fn rounded(&self, geometry_decimals: u32, confidence_decimals: u32) -> Region {
        Region {
            id: self.id.clone(),
            x: round_to(self.x, geometry_decimals),
            y: round_to(self.y, geometry_decimals),
            width: round_to(self.width, geometry_decimals),
            height: round_to(self.height, geometry_decimals),
            class: self.class,
            confidence: round_to(self.confidence, confidence_decimals),
        }
    }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f64, y: f64, width: f64, height: f64) -> Region {
        Region {
            id: "r".to_string(),
            x,
            y,
            width,
            height,
            class: GlomerulusClass::Cellular,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_class_serialization_uses_lowercase_keys() {
        let json = serde_json::to_string(&region(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert!(json.contains(r#""type":"cellular""#));

        let parsed: Region = serde_json::from_str(
            r#"{"id":"a","x":1,"y":2,"width":3,"height":4,"type":"crescents","confidence":0.5}"#,
        )
        .unwrap();
        assert_eq!(parsed.class, GlomerulusClass::Crescents);
    }

    #[test]
    fn test_every_class_has_distinct_style() {
        for (i, a) in GlomerulusClass::ALL.iter().enumerate() {
            for b in GlomerulusClass::ALL.iter().skip(i + 1) {
                assert_ne!(a.style().color, b.style().color);
                assert_ne!(a.style().label, b.style().label);
            }
            assert!(a.style().fill.a < 1.0);
        }
    }

    #[test]
    fn test_color_formatting() {
        let style = GlomerulusClass::Sclerotic.style();
        assert_eq!(style.color.to_hex(), "#eab308");
        assert_eq!(style.fill.to_css(), "rgba(234, 179, 8, 0.25)");
    }

    #[test]
    fn test_edges_and_center() {
        let r = region(10.0, 20.0, 4.0, 6.0);
        assert_eq!(r.center(), (12.0, 23.0));
        assert_eq!(r.right(), 14.0);
        assert_eq!(r.bottom(), 26.0);
        assert!(r.contains(14.0, 26.0));
        assert!(!r.contains(14.1, 23.0));
    }

    #[test]
    fn test_clipping_keeps_overflowing_boxes() {
        let edge = region(97.0, -2.0, 5.0, 5.0);
        let clipped = edge.clipped().unwrap();
        assert_eq!(clipped.x, 97.0);
        assert_eq!(clipped.y, 0.0);
        assert!((clipped.width - 3.0).abs() < 1e-9);
        assert!((clipped.height - 3.0).abs() < 1e-9);

        assert!(region(120.0, 10.0, 5.0, 5.0).clipped().is_none());
    }

    #[test]
    fn test_rounding_only_touches_requested_precision() {
        let r = Region {
            confidence: 0.956,
            ..region(12.34567, 8.91011, 5.0, 5.0)
        };
        let rounded = r.rounded(1, 2);
        assert_eq!(rounded.x, 12.3);
        assert_eq!(rounded.y, 8.9);
        assert_eq!(rounded.confidence, 0.96);
        // original untouched
        assert_eq!(r.x, 12.34567);
    }
}

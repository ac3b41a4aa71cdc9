/// Coordinate normalization between source units and percent space
///
/// Detections arrive in the units of the annotation tool (pixels, or already
/// percentages for Label Studio rectangles). Everything downstream works in
/// percent of image width/height, so the overlay lines up at any display
/// resolution. No rounding happens here.
use std::path::Path;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: f64, height: f64 },

    #[error("failed to read image header from {path}: {source}")]
    Probe {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// How the source document expresses box coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// Percent when the detections carry `original_width/original_height`
    /// (the Label Studio layout), pixels otherwise
    #[default]
    Auto,
    /// Absolute pixels of the annotated image
    Pixels,
    /// Already 0-100 of width/height
    Percent,
}

/// Pixel size of the source image at annotation time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageDimensions {
    width: f64,
    height: f64,
}

/// A box in absolute source units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A box in percent of image size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ImageDimensions {
    pub fn new(width: f64, height: f64) -> Result<Self, NormalizeError> {
        if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
            return Err(NormalizeError::InvalidDimensions { width, height });
        }
        Ok(Self { width, height })
    }

    /// The 100x100 space used when the source is already in percent
    pub fn percent_space() -> Self {
        Self {
            width: 100.0,
            height: 100.0,
        }
    }

    /// Read width/height from the image header. Pixel data is not decoded.
    pub fn probe(path: &Path) -> Result<Self, NormalizeError> {
        let (width, height) = image::image_dimensions(path).map_err(|source| NormalizeError::Probe {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Probed {}: {}x{}", path.display(), width, height);
        Self::new(width as f64, height as f64)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn normalize(&self, b: AbsoluteBox) -> PercentBox {
        PercentBox {
            x: b.x / self.width * 100.0,
            y: b.y / self.height * 100.0,
            width: b.width / self.width * 100.0,
            height: b.height / self.height * 100.0,
        }
    }

    pub fn denormalize(&self, b: PercentBox) -> AbsoluteBox {
        AbsoluteBox {
            x: b.x / 100.0 * self.width,
            y: b.y / 100.0 * self.height,
            width: b.width / 100.0 * self.width,
            height: b.height / 100.0 * self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_pct(expected: f64, actual: f64, pct: f64) -> bool {
        if expected == 0.0 {
            return actual.abs() < 1e-9;
        }
        ((actual - expected) / expected).abs() * 100.0 <= pct
    }

    #[test]
    fn test_normalize_basic() {
        let dims = ImageDimensions::new(2000.0, 1000.0).unwrap();
        let pct = dims.normalize(AbsoluteBox {
            x: 500.0,
            y: 250.0,
            width: 100.0,
            height: 50.0,
        });
        assert_eq!(pct.x, 25.0);
        assert_eq!(pct.y, 25.0);
        assert_eq!(pct.width, 5.0);
        assert_eq!(pct.height, 5.0);
    }

    #[test]
    fn test_round_trip_within_tolerance() {
        let cases = [
            (4032.0, 3024.0, 1234.567, 89.01, 33.3, 250.75),
            (640.0, 480.0, 0.0, 479.9, 1.0, 0.5),
            (9999.0, 7.0, 3333.3, 6.999, 0.001, 0.002),
        ];
        for (w, h, x, y, bw, bh) in cases {
            let dims = ImageDimensions::new(w, h).unwrap();
            let original = AbsoluteBox { x, y, width: bw, height: bh };
            let back = dims.denormalize(dims.normalize(original));
            assert!(within_pct(original.x, back.x, 0.01));
            assert!(within_pct(original.y, back.y, 0.01));
            assert!(within_pct(original.width, back.width, 0.01));
            assert!(within_pct(original.height, back.height, 0.01));
        }
    }

    #[test]
    fn test_percent_space_is_identity() {
        let dims = ImageDimensions::percent_space();
        let pct = dims.normalize(AbsoluteBox {
            x: 12.5,
            y: 40.25,
            width: 3.0,
            height: 4.0,
        });
        assert_eq!(pct.x, 12.5);
        assert_eq!(pct.y, 40.25);
    }

    #[test]
    fn test_rejects_degenerate_dimensions() {
        assert!(ImageDimensions::new(0.0, 100.0).is_err());
        assert!(ImageDimensions::new(100.0, -1.0).is_err());
        assert!(ImageDimensions::new(f64::NAN, 100.0).is_err());
    }

    #[test]
    fn test_probe_missing_file_is_error() {
        let path = std::env::temp_dir().join("pathoview-missing-image-probe.png");
        assert!(ImageDimensions::probe(&path).is_err());
    }
}

use std::path::PathBuf;
use std::time::Duration;
use log::warn;
use once_cell::sync::Lazy;

use crate::normalize::CoordinateSpace;
use crate::region::GlomerulusClass;
use crate::settings::UserSettings;
use crate::viewport::transform::ZoomLimits;

// Default values for configuration
// These serve as fallback values and can be used for "reset to defaults" functionality
pub const DEFAULT_MIN_SCALE: f64 = 0.5;
pub const DEFAULT_MAX_SCALE: f64 = 8.0;
pub const DEFAULT_SCALE_STEP: f64 = 0.1;
pub const DEFAULT_DOUBLE_CLICK_THRESHOLD_MS: u16 = 250;

// Captured regions are fixed-size placeholders until someone classifies them
pub const CAPTURE_BOX_SIZE: f64 = 5.0;
pub const CAPTURE_CLASS: GlomerulusClass = GlomerulusClass::Cellular;
pub const CAPTURE_CONFIDENCE: f64 = 0.95;
pub const CAPTURE_EXPORT_DECIMALS: u32 = 1;

// Rounding of ingestion output
pub const INGEST_GEOMETRY_DECIMALS: u32 = 4;
pub const INGEST_CONFIDENCE_DECIMALS: u32 = 2;

/// Knobs of one viewport engine
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerSettings {
    pub zoom: ZoomLimits,
    pub double_click_threshold: Duration,
    pub show_annotations: bool,
    pub show_heatmap: bool,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            zoom: ZoomLimits::default(),
            double_click_threshold: Duration::from_millis(DEFAULT_DOUBLE_CLICK_THRESHOLD_MS as u64),
            show_annotations: true,
            show_heatmap: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub merge_threshold: f64,               // Dedup center distance, source units
    pub coordinate_space: CoordinateSpace,  // Unit of incoming box geometry
    pub store_path: Option<PathBuf>,        // None = built-in demo store
    pub viewer: ViewerSettings,
}

impl Config {
    pub fn from_settings(settings: &UserSettings) -> Self {
        let mut zoom = ZoomLimits {
            min_scale: settings.min_scale,
            max_scale: settings.max_scale,
            step: settings.scale_step,
        };
        if !(zoom.min_scale > 0.0 && zoom.min_scale <= zoom.max_scale && zoom.step > 0.0) {
            warn!(
                "Invalid zoom settings (min {}, max {}, step {}), using defaults",
                zoom.min_scale,
                zoom.max_scale,
                zoom.step
            );
            zoom = ZoomLimits::default();
        }

        let merge_threshold = if crate::ingest::is_valid_threshold(settings.merge_threshold) {
            settings.merge_threshold
        } else {
            warn!("Invalid merge_threshold {}, using default", settings.merge_threshold);
            crate::ingest::dedup::DEFAULT_MERGE_THRESHOLD
        };

        Config {
            merge_threshold,
            coordinate_space: settings.get_coordinate_space(),
            store_path: settings
                .store_path
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            viewer: ViewerSettings {
                zoom,
                double_click_threshold: Duration::from_millis(settings.double_click_threshold_ms as u64),
                show_annotations: settings.show_annotations,
                show_heatmap: settings.show_heatmap,
            },
        }
    }
}

/// Configuration from the default settings file, for the binary
pub static CONFIG: Lazy<Config> = Lazy::new(|| Config::from_settings(&UserSettings::load(None)));

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info, warn, error};

use crate::config::{
    DEFAULT_DOUBLE_CLICK_THRESHOLD_MS, DEFAULT_MAX_SCALE, DEFAULT_MIN_SCALE, DEFAULT_SCALE_STEP,
};
use crate::ingest::dedup::DEFAULT_MERGE_THRESHOLD;
use crate::normalize::CoordinateSpace;

/// User-specific settings that persist across runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Center distance below which two detections are merged (source units)
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f64,

    /// Unit of incoming box geometry: "auto", "pixels" or "percent"
    #[serde(default = "default_coordinate_space")]
    pub coordinate_space: String,

    /// Store file used by `lookup` and as the `ingest --store` default
    #[serde(default)]
    pub store_path: Option<String>,

    #[serde(default = "default_min_scale")]
    pub min_scale: f64,

    #[serde(default = "default_max_scale")]
    pub max_scale: f64,

    /// Relative zoom change per wheel notch or button press
    #[serde(default = "default_scale_step")]
    pub scale_step: f64,

    /// Double-click detection threshold in milliseconds
    #[serde(default = "default_double_click_threshold_ms")]
    pub double_click_threshold_ms: u16,

    #[serde(default = "default_show_annotations")]
    pub show_annotations: bool,

    #[serde(default)]
    pub show_heatmap: bool,
}

fn default_merge_threshold() -> f64 {
    DEFAULT_MERGE_THRESHOLD
}

fn default_coordinate_space() -> String {
    "auto".to_string()
}

fn default_min_scale() -> f64 {
    DEFAULT_MIN_SCALE
}

fn default_max_scale() -> f64 {
    DEFAULT_MAX_SCALE
}

fn default_scale_step() -> f64 {
    DEFAULT_SCALE_STEP
}

fn default_double_click_threshold_ms() -> u16 {
    DEFAULT_DOUBLE_CLICK_THRESHOLD_MS
}

fn default_show_annotations() -> bool {
    true
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            coordinate_space: default_coordinate_space(),
            store_path: None,
            min_scale: DEFAULT_MIN_SCALE,
            max_scale: DEFAULT_MAX_SCALE,
            scale_step: DEFAULT_SCALE_STEP,
            double_click_threshold_ms: DEFAULT_DOUBLE_CLICK_THRESHOLD_MS,
            show_annotations: true,
            show_heatmap: false,
        }
    }
}

impl UserSettings {
    /// Get the path to the settings file
    /// On macOS: ~/Library/Application Support/pathoview/settings.yaml
    /// On Linux: ~/.config/pathoview/settings.yaml
    /// On Windows: C:\Users\<user>\AppData\Roaming\pathoview\settings.yaml
    pub fn settings_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."));

        config_dir.join("pathoview").join("settings.yaml")
    }

    /// Load settings from the YAML file
    /// If custom_path is provided, uses that path; otherwise uses the default settings path
    pub fn load(custom_path: Option<&str>) -> Self {
        let path = match custom_path {
            Some(p) => {
                info!("Using custom settings path: {}", p);
                PathBuf::from(p)
            }
            None => Self::settings_path(),
        };

        if !path.exists() {
            info!("Settings file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_yaml(&contents, &path),
            Err(e) => {
                error!("Failed to read settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }
        }
    }

    fn from_yaml(contents: &str, path: &Path) -> Self {
        match serde_yaml::from_str::<UserSettings>(contents) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                debug!(
                    "Settings: merge_threshold={}, coordinates={}, zoom={}..{} step {}",
                    settings.merge_threshold,
                    settings.coordinate_space,
                    settings.min_scale,
                    settings.max_scale,
                    settings.scale_step
                );
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }
        }
    }

    /// Save settings to `path` while preserving comments of an existing file
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create settings directory: {}", e))?;
            }
        }

        // If file exists, try to preserve comments by doing in-place value updates
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(contents) => {
                    let updated = self.update_yaml_values(&contents);
                    fs::write(path, updated)
                        .map_err(|e| format!("Failed to write settings file: {}", e))?;
                    info!("Saved settings to {:?} (comments preserved)", path);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to read existing settings file for comment preservation: {}", e);
                }
            }
        }

        fs::write(path, self.to_yaml_with_comments())
            .map_err(|e| format!("Failed to write settings file: {}", e))?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Update YAML values while preserving existing comments and structure
    fn update_yaml_values(&self, yaml_content: &str) -> String {
        let mut result = yaml_content.to_string();

        result = Self::replace_yaml_value(&result, "merge_threshold", &format_float(self.merge_threshold));
        result = Self::replace_yaml_value(&result, "coordinate_space", &format!("\"{}\"", self.coordinate_space));
        result = Self::replace_yaml_value(&result, "store_path", &self.store_path_yaml());
        result = Self::replace_yaml_value(&result, "min_scale", &format_float(self.min_scale));
        result = Self::replace_yaml_value(&result, "max_scale", &format_float(self.max_scale));
        result = Self::replace_yaml_value(&result, "scale_step", &format_float(self.scale_step));
        result = Self::replace_yaml_value(&result, "double_click_threshold_ms", &self.double_click_threshold_ms.to_string());
        result = Self::replace_yaml_value(&result, "show_annotations", &self.show_annotations.to_string());
        result = Self::replace_yaml_value(&result, "show_heatmap", &self.show_heatmap.to_string());

        result
    }

    /// Replace a YAML key's value while preserving the rest of the line
    fn replace_yaml_value(yaml: &str, key: &str, new_value: &str) -> String {
        let pattern = format!(r"(?m)^(\s*{}\s*:\s*).*$", regex::escape(key));
        let replacement = format!("${{1}}{}", new_value);

        match regex::Regex::new(&pattern) {
            Ok(re) => re.replace_all(yaml, replacement.as_str()).to_string(),
            Err(e) => {
                warn!("Failed to create regex for key '{}': {}", key, e);
                yaml.to_string()
            }
        }
    }

    fn store_path_yaml(&self) -> String {
        match &self.store_path {
            Some(p) => format!("\"{}\"", p.replace('\\', "\\\\").replace('"', "\\\"")),
            None => "~".to_string(),
        }
    }

    /// Generate YAML content with comments for new files
    pub fn to_yaml_with_comments(&self) -> String {
        format!(
            r#"# pathoview User Settings
# Loaded on every run unless --settings points elsewhere.
# Settings specified here override the built-in defaults.

# Detections whose centers are closer than this (in source units) are merged
merge_threshold: {}

# Unit of incoming box geometry: "auto", "pixels" or "percent"
# - "auto": percent when boxes carry original_width/original_height
#   (Label Studio exports), pixels otherwise
# - "pixels": divided by the source image size during ingestion
# - "percent": already 0-100, passed through unchanged
coordinate_space: "{}"

# Annotation store file used by `lookup` and `ingest --store`
# ~ means the built-in demo datasets
store_path: {}

# Zoom limits of the viewer
min_scale: {}
max_scale: {}

# Relative zoom change per wheel notch or zoom button press
scale_step: {}

# Double-click detection threshold in milliseconds (double-click resets zoom)
double_click_threshold_ms: {}

# Draw annotation boxes over the image
show_annotations: {}

# Draw the heatmap layer
show_heatmap: {}
"#,
            format_float(self.merge_threshold),
            self.coordinate_space,
            self.store_path_yaml(),
            format_float(self.min_scale),
            format_float(self.max_scale),
            format_float(self.scale_step),
            self.double_click_threshold_ms,
            self.show_annotations,
            self.show_heatmap
        )
    }

    /// Convert coordinate_space string to CoordinateSpace enum
    pub fn get_coordinate_space(&self) -> CoordinateSpace {
        match self.coordinate_space.to_lowercase().as_str() {
            "auto" => CoordinateSpace::Auto,
            "pixels" | "pixel" | "px" => CoordinateSpace::Pixels,
            "percent" | "pct" | "%" => CoordinateSpace::Percent,
            _ => {
                warn!("Unknown coordinate space '{}', defaulting to auto", self.coordinate_space);
                CoordinateSpace::Auto
            }
        }
    }
}

/// Floats always keep a decimal point so YAML reads them back as floats
fn format_float(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') || text.contains('e') || text.contains("inf") || text.contains("NaN") {
        text
    } else {
        format!("{text}.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pathoview-settings-{}-{}.yaml", name, std::process::id()))
    }

    #[test]
    fn test_template_round_trips_to_defaults() {
        let yaml = UserSettings::default().to_yaml_with_comments();
        let parsed: UserSettings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, UserSettings::default());
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let parsed: UserSettings = serde_yaml::from_str("merge_threshold: 2.5\n").unwrap();
        assert_eq!(parsed.merge_threshold, 2.5);
        assert_eq!(parsed.max_scale, DEFAULT_MAX_SCALE);
        assert!(parsed.show_annotations);
        assert!(parsed.store_path.is_none());
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let path = temp_settings("invalid");
        fs::write(&path, "merge_threshold: [not, a, number]\n").unwrap();
        let loaded = UserSettings::load(path.to_str());
        assert_eq!(loaded, UserSettings::default());
        fs::remove_file(&path).ok();

        assert_eq!(UserSettings::load(Some("/definitely/not/here.yaml")), UserSettings::default());
    }

    #[test]
    fn test_save_preserves_comments() {
        let path = temp_settings("comments");
        fs::remove_file(&path).ok();

        let mut settings = UserSettings::default();
        settings.save_to(&path).unwrap();

        settings.max_scale = 12.0;
        settings.store_path = Some("/data/store.json".to_string());
        settings.save_to(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("# Zoom limits of the viewer"));
        assert!(contents.contains("max_scale: 12.0"));

        let loaded = UserSettings::load(path.to_str());
        assert_eq!(loaded.max_scale, 12.0);
        assert_eq!(loaded.store_path.as_deref(), Some("/data/store.json"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_coordinate_space_parsing() {
        let mut settings = UserSettings::default();
        assert_eq!(settings.get_coordinate_space(), CoordinateSpace::Auto);
        settings.coordinate_space = "Percent".to_string();
        assert_eq!(settings.get_coordinate_space(), CoordinateSpace::Percent);
        settings.coordinate_space = "px".to_string();
        assert_eq!(settings.get_coordinate_space(), CoordinateSpace::Pixels);
        settings.coordinate_space = "furlongs".to_string();
        assert_eq!(settings.get_coordinate_space(), CoordinateSpace::Auto);
    }
}

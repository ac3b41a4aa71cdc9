/// Capture mode recording and export
///
/// Captured points become fixed-size regions that are kept apart from the
/// displayed dataset. They only leave the engine through `export_json`.
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{CAPTURE_BOX_SIZE, CAPTURE_CLASS, CAPTURE_CONFIDENCE, CAPTURE_EXPORT_DECIMALS};
use crate::region::{round_to, GlomerulusClass, Region};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to serialize captured regions: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("clipboard unavailable: {0}")]
    Clipboard(String),
}

/// Destination for exported text
pub trait ClipboardSink {
    fn set_text(&mut self, text: &str) -> Result<(), ExportError>;
}

/// System clipboard via arboard
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl ClipboardSink for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ExportError> {
        let mut clipboard = arboard::Clipboard::new().map_err(|e| ExportError::Clipboard(e.to_string()))?;
        clipboard
            .set_text(text.to_owned())
            .map_err(|e| ExportError::Clipboard(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ExportedRegion<'a> {
    id: &'a str,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(rename = "type")]
    class: GlomerulusClass,
    confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    regions: Vec<Region>,
    /// Last sequence number handed out; survives `clear`
    next_seq: u64,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, x_pct: f64, y_pct: f64) -> &Region {
        self.next_seq += 1;
        let region = Region {
            id: format!("rec-{}", self.next_seq),
            x: x_pct,
            y: y_pct,
            width: CAPTURE_BOX_SIZE,
            height: CAPTURE_BOX_SIZE,
            class: CAPTURE_CLASS,
            confidence: CAPTURE_CONFIDENCE,
        };
        debug!("Captured {} at ({:.1}%, {:.1}%)", region.id, x_pct, y_pct);
        self.regions.push(region);
        &self.regions[self.regions.len() - 1]
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Drop every captured region, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.regions.len();
        self.regions.clear();
        count
    }

    /// Pretty-printed JSON list, `x`/`y` rounded to one decimal
    pub fn export_json(&self) -> Result<String, ExportError> {
        let exported: Vec<ExportedRegion> = self
            .regions
            .iter()
            .map(|r| ExportedRegion {
                id: &r.id,
                x: round_to(r.x, CAPTURE_EXPORT_DECIMALS),
                y: round_to(r.y, CAPTURE_EXPORT_DECIMALS),
                width: CAPTURE_BOX_SIZE,
                height: CAPTURE_BOX_SIZE,
                class: CAPTURE_CLASS,
                confidence: CAPTURE_CONFIDENCE,
            })
            .collect();
        Ok(serde_json::to_string_pretty(&exported)?)
    }

    /// Export into `sink`. On failure the captured list stays as it was.
    pub fn copy_to(&self, sink: &mut dyn ClipboardSink) -> Result<usize, ExportError> {
        let json = self.export_json()?;
        match sink.set_text(&json) {
            Ok(()) => {
                info!("Copied {} captured region(s) to clipboard", self.regions.len());
                Ok(self.regions.len())
            }
            Err(e) => {
                warn!("Copying captures failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemorySink {
        text: Option<String>,
        fail: bool,
    }

    impl ClipboardSink for MemorySink {
        fn set_text(&mut self, text: &str) -> Result<(), ExportError> {
            if self.fail {
                return Err(ExportError::Clipboard("denied".to_string()));
            }
            self.text = Some(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_record_uses_fixed_defaults() {
        let mut session = CaptureSession::new();
        let region = session.record(12.345, 67.891).clone();
        assert_eq!(region.id, "rec-1");
        assert_eq!(region.width, 5.0);
        assert_eq!(region.class, GlomerulusClass::Cellular);
        assert_eq!(region.confidence, 0.95);
        // full precision in memory, rounding only on export
        assert_eq!(region.x, 12.345);
    }

    #[test]
    fn test_ids_keep_counting_after_clear() {
        let mut session = CaptureSession::new();
        session.record(1.0, 1.0);
        session.record(2.0, 2.0);
        assert_eq!(session.clear(), 2);
        assert!(session.is_empty());
        assert_eq!(session.record(3.0, 3.0).id, "rec-3");
    }

    #[test]
    fn test_export_rounds_to_one_decimal() {
        let mut session = CaptureSession::new();
        session.record(12.345, 67.891);
        let json = session.export_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let first = &value[0];
        assert_eq!(first["id"], "rec-1");
        assert_eq!(first["x"].as_f64(), Some(12.3));
        assert_eq!(first["y"].as_f64(), Some(67.9));
        assert_eq!(first["width"].as_f64(), Some(5.0));
        assert_eq!(first["type"], "cellular");
        assert_eq!(first["confidence"].as_f64(), Some(0.95));
        assert!(json.contains('\n'));
    }

    #[test]
    fn test_export_of_empty_session() {
        assert_eq!(CaptureSession::new().export_json().unwrap(), "[]");
    }

    #[test]
    fn test_failed_copy_keeps_captures() {
        let mut session = CaptureSession::new();
        session.record(10.0, 10.0);

        let mut broken = MemorySink {
            fail: true,
            ..MemorySink::default()
        };
        assert!(matches!(session.copy_to(&mut broken), Err(ExportError::Clipboard(_))));
        assert_eq!(session.len(), 1);

        let mut sink = MemorySink::default();
        assert_eq!(session.copy_to(&mut sink).unwrap(), 1);
        assert!(sink.text.unwrap().contains("rec-1"));
    }
}

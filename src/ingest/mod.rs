/// Annotation ingestion
///
/// Turns an annotation tool export into a deduplicated, classified Region list
/// in percent coordinates: parse, dedup, normalize, number.
pub mod classify;
pub mod dedup;
pub mod parser;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use log::{debug, info, warn};

use crate::normalize::{CoordinateSpace, ImageDimensions, NormalizeError};
use crate::region::Region;
use self::dedup::{dedup_detections, DEFAULT_MERGE_THRESHOLD};
use self::parser::{parse_document, RawDetection};

pub const DEFAULT_ID_PREFIX: &str = "final";

/// Failures that abort a whole ingestion run. Per-detection problems never
/// end up here; those detections are skipped.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("input is not well-formed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized export layout: {0}")]
    UnrecognizedLayout(String),

    #[error("task {0} not found in export")]
    TaskNotFound(u64),

    #[error("merge threshold must be a finite, non-negative distance, got {0}")]
    InvalidThreshold(f64),

    #[error("source image size unknown; pass --image-width/--image-height or --image, or use percent coordinates")]
    MissingDimensions,

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub coordinate_space: CoordinateSpace,
    /// Explicit source image size, wins over everything else
    pub dimensions: Option<ImageDimensions>,
    /// Image whose header provides the size when nothing else does
    pub image_path: Option<PathBuf>,
    pub threshold: f64,
    pub task_id: Option<u64>,
    pub id_prefix: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            coordinate_space: CoordinateSpace::Auto,
            dimensions: None,
            image_path: None,
            threshold: DEFAULT_MERGE_THRESHOLD,
            task_id: None,
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub task_id: Option<u64>,
    pub regions: Vec<Region>,
    /// Result entries seen, including the ones dropped
    pub total_detections: usize,
    pub skipped: usize,
    pub merged: usize,
    pub replaced: usize,
    /// Every distinct label text, for checking the keyword table
    pub labels_seen: BTreeSet<String>,
}

pub fn ingest_file(path: &Path, options: &IngestOptions) -> Result<IngestReport, IngestError> {
    info!("Ingesting annotations from {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    ingest_str(&content, options)
}

/// Whether `threshold` can be used as a merge distance
pub fn is_valid_threshold(threshold: f64) -> bool {
    threshold.is_finite() && threshold >= 0.0
}

pub fn ingest_str(content: &str, options: &IngestOptions) -> Result<IngestReport, IngestError> {
    if !is_valid_threshold(options.threshold) {
        return Err(IngestError::InvalidThreshold(options.threshold));
    }
    let document = parse_document(content, options.task_id)?;
    let dims = resolve_dimensions(options, &document.detections)?;
    debug!("Normalizing against {}x{}", dims.width(), dims.height());

    let outcome = dedup_detections(&document.detections, options.threshold);

    let regions: Vec<Region> = outcome
        .boxes
        .iter()
        .enumerate()
        .map(|(i, unique)| {
            let pct = dims.normalize(unique.bbox);
            Region {
                id: format!("{}-{}", options.id_prefix, i),
                x: pct.x,
                y: pct.y,
                width: pct.width,
                height: pct.height,
                class: unique.classification.class,
                confidence: unique.confidence.clamp(0.0, 1.0),
            }
        })
        .collect();

    let labels_seen = document
        .detections
        .iter()
        .flat_map(|d| d.labels.iter().cloned())
        .collect();

    let report = IngestReport {
        task_id: document.task_id,
        total_detections: document.detections.len() + document.skipped,
        skipped: document.skipped + outcome.skipped,
        merged: outcome.merged,
        replaced: outcome.replaced,
        regions,
        labels_seen,
    };

    info!(
        "Ingested {} unique region(s) from {} detection(s): {} skipped, {} merged ({} replaced)",
        report.regions.len(),
        report.total_detections,
        report.skipped,
        report.merged,
        report.replaced
    );

    Ok(report)
}

fn resolve_dimensions(
    options: &IngestOptions,
    detections: &[RawDetection],
) -> Result<ImageDimensions, IngestError> {
    let mut reported = detections.iter().filter_map(|d| d.original_size);
    let first_reported = reported.next();

    match options.coordinate_space {
        CoordinateSpace::Percent => return Ok(ImageDimensions::percent_space()),
        // Label Studio stores rectangle values as percentages of the
        // original size it reports alongside them
        CoordinateSpace::Auto if first_reported.is_some() => {
            debug!("Detections carry their original image size, reading geometry as percent");
            return Ok(ImageDimensions::percent_space());
        }
        CoordinateSpace::Auto | CoordinateSpace::Pixels => {}
    }

    if let Some(dims) = options.dimensions {
        return Ok(dims);
    }

    if let Some((width, height)) = first_reported {
        if reported.any(|other| other != (width, height)) {
            warn!("Detections report differing image sizes; using {}x{}", width, height);
        }
        return Ok(ImageDimensions::new(width, height)?);
    }

    if let Some(path) = &options.image_path {
        return Ok(ImageDimensions::probe(path)?);
    }

    Err(IngestError::MissingDimensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::GlomerulusClass;

    fn item(x: f64, y: f64, w: f64, h: f64, label: &str, score: Option<f64>) -> String {
        let score = score.map(|s| format!(", \"score\": {s}")).unwrap_or_default();
        format!(
            r#"{{"type": "rectanglelabels"{score}, "value": {{"x": {x}, "y": {y}, "width": {w}, "height": {h}, "rectanglelabels": ["{label}"]}}}}"#
        )
    }

    fn task(items: &[String]) -> String {
        format!(r#"{{"id": 598, "annotations": [{{"result": [{}]}}]}}"#, items.join(","))
    }

    #[test]
    fn test_pixel_ingestion_normalizes_after_dedup() {
        let doc = task(&[
            item(100.0, 200.0, 50.0, 40.0, "毛细血管内增生肾小球", Some(0.8)),
            item(100.4, 200.2, 50.0, 40.0, "硬化肾小球", Some(0.6)),
            item(1000.0, 500.0, 80.0, 80.0, "肾小球", None),
        ]);
        let options = IngestOptions {
            dimensions: Some(ImageDimensions::new(2000.0, 1000.0).unwrap()),
            ..IngestOptions::default()
        };

        let report = ingest_str(&doc, &options).unwrap();
        assert_eq!(report.task_id, Some(598));
        assert_eq!(report.total_detections, 3);
        assert_eq!(report.merged, 1);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.regions.len(), 2);

        let first = &report.regions[0];
        assert_eq!(first.id, "final-0");
        assert_eq!(first.class, GlomerulusClass::Sclerotic);
        assert!((first.x - 5.02).abs() < 1e-9);
        assert!((first.y - 20.02).abs() < 1e-9);
        assert!((first.width - 2.5).abs() < 1e-9);
        assert_eq!(first.confidence, 0.6);

        let second = &report.regions[1];
        assert_eq!(second.id, "final-1");
        assert_eq!(second.class, GlomerulusClass::Cellular);
        assert_eq!(second.confidence, 0.95);
        assert!(report.labels_seen.contains("肾小球"));
    }

    #[test]
    fn test_percent_space_passes_through() {
        let doc = task(&[item(12.5, 40.0, 3.0, 4.0, "新月体", Some(0.9))]);
        let options = IngestOptions {
            coordinate_space: CoordinateSpace::Percent,
            ..IngestOptions::default()
        };
        let report = ingest_str(&doc, &options).unwrap();
        assert_eq!(report.regions[0].x, 12.5);
        assert_eq!(report.regions[0].class, GlomerulusClass::Crescents);
    }

    fn label_studio_doc() -> &'static str {
        r#"{"annotations": [{"result": [
            {"type": "rectanglelabels", "original_width": 4000, "original_height": 3000, "score": 0.91,
             "value": {"x": 39.6398, "y": 40.6705, "width": 2.6135, "height": 2.2062, "rectanglelabels": ["固有"]}},
            {"type": "rectanglelabels", "original_width": 4000, "original_height": 3000,
             "value": {"x": 39.9, "y": 40.9, "width": 2.6, "height": 2.2, "rectanglelabels": ["硬化"]}}
        ]}]}"#
    }

    #[test]
    fn test_label_studio_values_are_already_percent() {
        let report = ingest_str(label_studio_doc(), &IngestOptions::default()).unwrap();
        // Centers 0.35 apart in percent units, so the threshold merges them
        assert_eq!(report.regions.len(), 1);
        let region = &report.regions[0];
        assert_eq!(region.class, GlomerulusClass::Sclerotic);
        assert!((region.x - 39.9).abs() < 1e-9);
        assert!((region.y - 40.9).abs() < 1e-9);
        assert!((region.width - 2.6).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_pixels_divides_by_reported_size() {
        let doc = r#"{"annotations": [{"result": [
            {"type": "rectanglelabels", "original_width": 400, "original_height": 200,
             "value": {"x": 40, "y": 20, "width": 4, "height": 2, "rectanglelabels": ["固有"]}}
        ]}]}"#;
        let options = IngestOptions {
            coordinate_space: CoordinateSpace::Pixels,
            ..IngestOptions::default()
        };
        let report = ingest_str(doc, &options).unwrap();
        assert!((report.regions[0].x - 10.0).abs() < 1e-9);
        assert!((report.regions[0].y - 10.0).abs() < 1e-9);
        assert_eq!(report.regions[0].class, GlomerulusClass::Normal);
    }

    #[test]
    fn test_missing_dimensions_is_fatal() {
        let doc = task(&[item(1.0, 1.0, 1.0, 1.0, "硬化", None)]);
        assert!(matches!(
            ingest_str(&doc, &IngestOptions::default()),
            Err(IngestError::MissingDimensions)
        ));
    }

    #[test]
    fn test_unusable_threshold_is_rejected() {
        let doc = task(&[item(1.0, 1.0, 1.0, 1.0, "硬化", None)]);
        for threshold in [f64::NAN, -1.0, f64::INFINITY] {
            let options = IngestOptions {
                coordinate_space: CoordinateSpace::Percent,
                threshold,
                ..IngestOptions::default()
            };
            assert!(matches!(ingest_str(&doc, &options), Err(IngestError::InvalidThreshold(_))));
        }
        assert!(is_valid_threshold(0.0));
    }

    #[test]
    fn test_malformed_document_is_fatal() {
        assert!(matches!(
            ingest_str("[{\"id\": 1,", &IngestOptions::default()),
            Err(IngestError::Json(_))
        ));
    }

    #[test]
    fn test_missing_input_file_is_io_error() {
        let path = std::env::temp_dir().join("pathoview-no-such-export.json");
        assert!(matches!(
            ingest_file(&path, &IngestOptions::default()),
            Err(IngestError::Io { .. })
        ));
    }
}

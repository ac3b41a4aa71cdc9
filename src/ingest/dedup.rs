/// Proximity deduplication of raw detections
///
/// Annotation exports often contain the same glomerulus several times, once
/// per label an annotator tried. Boxes whose centers are closer than the
/// threshold are collapsed into one, keeping the most specific diagnosis.
use log::{debug, trace};

use super::classify::{classify_labels, Classification};
use super::parser::RawDetection;
use crate::normalize::AbsoluteBox;

/// Center distance (source units) below which two boxes are the same structure
pub const DEFAULT_MERGE_THRESHOLD: f64 = 1.0;

/// Confidence used when the source carries no score
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// A detection that survived deduplication, still in source units
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueBox {
    pub bbox: AbsoluteBox,
    pub classification: Classification,
    pub confidence: f64,
    /// Position of the winning detection in the input
    pub source_index: usize,
}

impl UniqueBox {
    pub fn center(&self) -> (f64, f64) {
        (
            self.bbox.x + self.bbox.width / 2.0,
            self.bbox.y + self.bbox.height / 2.0,
        )
    }

    fn distance_to(&self, other: &UniqueBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub boxes: Vec<UniqueBox>,
    /// Non-rectangular or malformed detections that were dropped
    pub skipped: usize,
    /// Detections absorbed into an earlier box
    pub merged: usize,
    /// Merges where the newcomer replaced the accepted box
    pub replaced: usize,
}

/// Collapse near-duplicate detections, processing them in input order.
///
/// A duplicate replaces the accepted box only when its priority is strictly
/// higher; equal priority keeps the first one seen.
pub fn dedup_detections(detections: &[RawDetection], threshold: f64) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    let mut candidates = Vec::with_capacity(detections.len());

    for (index, detection) in detections.iter().enumerate() {
        let Some(bbox) = detection.rectangle() else {
            debug!("Skipping detection #{}: {:?} is not a usable rectangle", index, detection.kind);
            outcome.skipped += 1;
            continue;
        };

        candidates.push(UniqueBox {
            bbox,
            classification: classify_labels(&detection.labels),
            confidence: detection.score.unwrap_or(DEFAULT_CONFIDENCE),
            source_index: index,
        });
    }

    let mut pass = merge_pass(candidates, threshold);
    outcome.merged += pass.merged;
    outcome.replaced += pass.replaced;

    // A replacement moves the accepted center, which can land it next to
    // another accepted box. Re-run until nothing merges.
    while pass.merged > 0 {
        pass = merge_pass(pass.boxes, threshold);
        if pass.merged > 0 {
            debug!("Settle pass merged {} residual duplicate(s)", pass.merged);
        }
        outcome.merged += pass.merged;
        outcome.replaced += pass.replaced;
    }

    outcome.boxes = pass.boxes;
    outcome
}

struct PassResult {
    boxes: Vec<UniqueBox>,
    merged: usize,
    replaced: usize,
}

fn merge_pass(candidates: Vec<UniqueBox>, threshold: f64) -> PassResult {
    let mut accepted: Vec<UniqueBox> = Vec::with_capacity(candidates.len());
    let mut merged = 0;
    let mut replaced = 0;

    for candidate in candidates {
        let existing = accepted
            .iter()
            .position(|b| b.distance_to(&candidate) < threshold);

        match existing {
            Some(i) => {
                merged += 1;
                if candidate.classification.priority > accepted[i].classification.priority {
                    trace!(
                        "Detection #{} ({}) replaces #{} ({})",
                        candidate.source_index,
                        candidate.classification.class,
                        accepted[i].source_index,
                        accepted[i].classification.class
                    );
                    accepted[i] = candidate;
                    replaced += 1;
                }
            }
            None => accepted.push(candidate),
        }
    }

    PassResult {
        boxes: accepted,
        merged,
        replaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parser::DetectionKind;
    use crate::region::GlomerulusClass;

    fn rect(x: f64, y: f64, w: f64, h: f64, label: &str) -> RawDetection {
        RawDetection {
            kind: DetectionKind::Rectangle,
            bbox: Some(AbsoluteBox { x, y, width: w, height: h }),
            labels: vec![label.to_string()],
            score: None,
            original_size: None,
        }
    }

    fn with_score(mut d: RawDetection, score: f64) -> RawDetection {
        d.score = Some(score);
        d
    }

    #[test]
    fn test_threshold_is_strict() {
        // centers at (12, 12) and (12 + d, 12)
        for (distance, expected) in [(0.999, 1), (1.0, 2), (1.001, 2)] {
            let input = vec![
                rect(10.0, 10.0, 4.0, 4.0, "肾小球"),
                rect(10.0 + distance, 10.0, 4.0, 4.0, "肾小球"),
            ];
            let out = dedup_detections(&input, DEFAULT_MERGE_THRESHOLD);
            assert_eq!(out.boxes.len(), expected, "distance {distance}");
        }
    }

    #[test]
    fn test_higher_priority_wins_regardless_of_order() {
        let sclerotic = with_score(rect(10.0, 10.0, 4.0, 4.0, "硬化"), 0.7);
        let cellular = with_score(rect(10.3, 10.2, 4.0, 4.0, "毛细血管内增生"), 0.99);

        let out = dedup_detections(&[sclerotic.clone(), cellular.clone()], 1.0);
        assert_eq!(out.boxes.len(), 1);
        assert_eq!(out.boxes[0].classification.class, GlomerulusClass::Sclerotic);
        assert_eq!(out.boxes[0].bbox.x, 10.0);
        assert_eq!(out.boxes[0].confidence, 0.7);
        assert_eq!(out.replaced, 0);

        let out = dedup_detections(&[cellular, sclerotic], 1.0);
        assert_eq!(out.boxes.len(), 1);
        assert_eq!(out.boxes[0].classification.class, GlomerulusClass::Sclerotic);
        // the replacing detection brings its own geometry and score
        assert_eq!(out.boxes[0].bbox.x, 10.0);
        assert_eq!(out.boxes[0].confidence, 0.7);
        assert_eq!(out.replaced, 1);
    }

    #[test]
    fn test_equal_priority_keeps_first() {
        let a = with_score(rect(0.0, 0.0, 2.0, 2.0, "系膜"), 0.5);
        let b = with_score(rect(0.5, 0.0, 2.0, 2.0, "单纯系膜增生"), 0.99);
        let out = dedup_detections(&[a, b], 1.0);
        assert_eq!(out.boxes.len(), 1);
        assert_eq!(out.boxes[0].source_index, 0);
        assert_eq!(out.boxes[0].confidence, 0.5);
    }

    #[test]
    fn test_unsupported_and_malformed_are_skipped() {
        let mut polygon = rect(0.0, 0.0, 1.0, 1.0, "硬化");
        polygon.kind = DetectionKind::Other("polygonlabels".to_string());
        let mut no_box = rect(0.0, 0.0, 1.0, 1.0, "硬化");
        no_box.bbox = None;
        let nan = rect(f64::NAN, 0.0, 1.0, 1.0, "硬化");
        let negative = rect(5.0, 5.0, -1.0, 1.0, "硬化");

        let out = dedup_detections(&[polygon, no_box, nan, negative, rect(50.0, 50.0, 2.0, 2.0, "")], 1.0);
        assert_eq!(out.skipped, 4);
        assert_eq!(out.boxes.len(), 1);
        assert_eq!(out.boxes[0].source_index, 4);
    }

    #[test]
    fn test_missing_score_defaults() {
        let out = dedup_detections(&[rect(0.0, 0.0, 1.0, 1.0, "")], 1.0);
        assert_eq!(out.boxes[0].confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_replacement_does_not_leave_residual_duplicates() {
        // A at center 0, B at center 1.5 (distinct), C at 0.9 close to A only.
        // C replaces A and lands 0.6 from B, which the settle pass collapses.
        let a = rect(-1.0, -1.0, 2.0, 2.0, "肾小球");
        let b = rect(0.5, -1.0, 2.0, 2.0, "毛细血管");
        let c = rect(-0.1, -1.0, 2.0, 2.0, "硬化");
        let out = dedup_detections(&[a, b, c], 1.0);

        assert_eq!(out.boxes.len(), 1);
        assert_eq!(out.boxes[0].classification.class, GlomerulusClass::Sclerotic);
    }

    #[test]
    fn test_no_residual_duplicates_on_dense_grid() {
        let labels = ["硬化", "新月体", "系膜", "固有", "毛细血管", "肾小球"];
        let mut input = Vec::new();
        let mut seed: u64 = 7;
        for i in 0..300 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = ((seed >> 33) % 400) as f64 / 10.0;
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let y = ((seed >> 33) % 400) as f64 / 10.0;
            input.push(rect(x, y, 3.0, 3.0, labels[i % labels.len()]));
        }

        let out = dedup_detections(&input, DEFAULT_MERGE_THRESHOLD);
        assert!(out.boxes.len() <= input.len());
        for (i, a) in out.boxes.iter().enumerate() {
            for b in out.boxes.iter().skip(i + 1) {
                assert!(a.distance_to(b) >= DEFAULT_MERGE_THRESHOLD);
            }
        }
    }
}

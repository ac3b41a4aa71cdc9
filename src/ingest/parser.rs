/// Label Studio export parser
///
/// Accepts the shapes an export is found in the wild: a single task, a list of
/// tasks, an object carrying `result`, or a bare list of result items. The
/// JSON may also be pasted into a Markdown note, fenced or not.
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::IngestError;
use crate::normalize::AbsoluteBox;

/// The only result type that carries an axis-aligned box
pub const RECTANGLE_KIND: &str = "rectanglelabels";

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*\s*(\{.*\}|\[.*\])\s*```").expect("fenced JSON pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionKind {
    Rectangle,
    Other(String),
}

/// One unprocessed detection, coordinates in source units
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub kind: DetectionKind,
    /// `None` when the value block lacks numeric x/y/width/height
    pub bbox: Option<AbsoluteBox>,
    pub labels: Vec<String>,
    pub score: Option<f64>,
    /// Source image size reported next to the box, if any
    pub original_size: Option<(f64, f64)>,
}

impl RawDetection {
    /// Rectangle with a finite, non-negative box
    pub fn rectangle(&self) -> Option<AbsoluteBox> {
        if self.kind != DetectionKind::Rectangle {
            return None;
        }
        let b = self.bbox?;
        let finite = [b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite());
        if !finite || b.width < 0.0 || b.height < 0.0 {
            return None;
        }
        Some(b)
    }
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub task_id: Option<u64>,
    pub detections: Vec<RawDetection>,
    /// Result entries that were not even objects
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct ResultItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    original_width: Option<f64>,
    #[serde(default)]
    original_height: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RectangleValue {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default)]
    rectanglelabels: Vec<String>,
}

/// Strip Markdown / prose around the JSON payload.
///
/// Content that already starts with `{` or `[` is returned as is. Otherwise a
/// fenced block is preferred, then the span from the first `{` to the last `}`.
pub fn extract_json_payload(content: &str) -> &str {
    let trimmed = content.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }

    if let Some(caps) = FENCED_JSON.captures(content) {
        if let Some(m) = caps.get(1) {
            return m.as_str();
        }
    }

    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => trimmed,
    }
}

/// Parse an export into raw detections.
///
/// `task_id` picks one task out of a task list; for a single-task document a
/// mismatch is only warned about.
pub fn parse_document(content: &str, task_id: Option<u64>) -> Result<ParsedDocument, IngestError> {
    let payload = extract_json_payload(content);
    let data: Value = serde_json::from_str(payload)?;

    let (found_task_id, results) = locate_results(&data, task_id)?;

    let mut detections = Vec::with_capacity(results.len());
    let mut skipped = 0;
    for (index, item) in results.iter().enumerate() {
        match parse_result_item(item) {
            Some(detection) => detections.push(detection),
            None => {
                debug!("Skipping result #{}: not a result object", index);
                skipped += 1;
            }
        }
    }

    Ok(ParsedDocument {
        task_id: found_task_id,
        detections,
        skipped,
    })
}

fn locate_results(data: &Value, task_id: Option<u64>) -> Result<(Option<u64>, Vec<Value>), IngestError> {
    match data {
        Value::Array(items) => {
            if items.is_empty() {
                warn!("Document is an empty list, nothing to ingest");
                return Ok((None, Vec::new()));
            }
            if items.iter().any(|item| item.get("annotations").is_some()) {
                let task = match task_id {
                    Some(wanted) => items
                        .iter()
                        .find(|item| item.get("id").and_then(Value::as_u64) == Some(wanted))
                        .ok_or(IngestError::TaskNotFound(wanted))?,
                    None => &items[0],
                };
                return task_results(task);
            }
            if let Some(result) = items[0].get("result") {
                return Ok((None, result_list(result)?));
            }
            Ok((None, items.clone()))
        }
        Value::Object(obj) => {
            if obj.contains_key("annotations") {
                let (found, results) = task_results(data)?;
                if let (Some(wanted), Some(found)) = (task_id, found) {
                    if wanted != found {
                        warn!("Task id is {}, not {}; proceeding anyway", found, wanted);
                    }
                }
                return Ok((found, results));
            }
            if let Some(result) = obj.get("result") {
                return Ok((None, result_list(result)?));
            }
            Err(IngestError::UnrecognizedLayout(
                "object has neither `annotations` nor `result`".to_string(),
            ))
        }
        other => Err(IngestError::UnrecognizedLayout(format!(
            "top level is {}, expected an object or a list",
            json_kind(other)
        ))),
    }
}

fn task_results(task: &Value) -> Result<(Option<u64>, Vec<Value>), IngestError> {
    let id = task.get("id").and_then(Value::as_u64);
    let annotations = task
        .get("annotations")
        .and_then(Value::as_array)
        .ok_or_else(|| IngestError::UnrecognizedLayout("`annotations` is not a list".to_string()))?;

    let Some(first) = annotations.first() else {
        warn!("Task {:?} has no annotations", id);
        return Ok((id, Vec::new()));
    };

    match first.get("result") {
        Some(result) => Ok((id, result_list(result)?)),
        None => {
            warn!("First annotation of task {:?} has no result", id);
            Ok((id, Vec::new()))
        }
    }
}

fn result_list(result: &Value) -> Result<Vec<Value>, IngestError> {
    result
        .as_array()
        .cloned()
        .ok_or_else(|| IngestError::UnrecognizedLayout("`result` is not a list".to_string()))
}

fn parse_result_item(item: &Value) -> Option<RawDetection> {
    let parsed: ResultItem = serde_json::from_value(item.clone()).ok()?;

    let kind = match parsed.kind.as_deref() {
        Some(RECTANGLE_KIND) => DetectionKind::Rectangle,
        Some(other) => DetectionKind::Other(other.to_string()),
        None => DetectionKind::Other(String::new()),
    };

    let rect = parsed
        .value
        .and_then(|value| serde_json::from_value::<RectangleValue>(value).ok());

    let (bbox, labels) = match rect {
        Some(v) => (
            Some(AbsoluteBox {
                x: v.x,
                y: v.y,
                width: v.width,
                height: v.height,
            }),
            v.rectanglelabels,
        ),
        None => (None, Vec::new()),
    };

    let original_size = match (parsed.original_width, parsed.original_height) {
        (Some(w), Some(h)) => Some((w, h)),
        _ => None,
    };

    Some(RawDetection {
        kind,
        bbox,
        labels,
        score: parsed.score,
        original_size,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASK: &str = r#"{
        "id": 598,
        "annotations": [{
            "result": [
                {"type": "rectanglelabels", "score": 0.91, "original_width": 4000, "original_height": 3000,
                 "value": {"x": 10.0, "y": 20.0, "width": 4.0, "height": 5.0, "rectanglelabels": ["硬化肾小球"]}},
                {"type": "polygonlabels", "value": {"points": [[1, 2], [3, 4]], "polygonlabels": ["肾小球"]}},
                {"type": "rectanglelabels", "value": {"x": "oops", "y": 1, "width": 1, "height": 1}},
                42
            ]
        }]
    }"#;

    #[test]
    fn test_parse_single_task() {
        let doc = parse_document(TASK, None).unwrap();
        assert_eq!(doc.task_id, Some(598));
        assert_eq!(doc.detections.len(), 3);
        assert_eq!(doc.skipped, 1);

        let first = &doc.detections[0];
        assert_eq!(first.kind, DetectionKind::Rectangle);
        assert_eq!(first.labels, vec!["硬化肾小球".to_string()]);
        assert_eq!(first.score, Some(0.91));
        assert_eq!(first.original_size, Some((4000.0, 3000.0)));
        assert!(first.rectangle().is_some());

        assert_eq!(doc.detections[1].kind, DetectionKind::Other("polygonlabels".to_string()));
        assert!(doc.detections[1].rectangle().is_none());
        // malformed geometry is kept for the deduplicator to drop
        assert!(doc.detections[2].rectangle().is_none());
    }

    #[test]
    fn test_parse_task_list_selects_by_id() {
        let list = format!(
            "[{{\"id\": 1, \"annotations\": [{{\"result\": []}}]}}, {}]",
            TASK
        );
        let doc = parse_document(&list, Some(598)).unwrap();
        assert_eq!(doc.task_id, Some(598));
        assert_eq!(doc.detections.len(), 3);

        let first = parse_document(&list, None).unwrap();
        assert_eq!(first.task_id, Some(1));
        assert!(first.detections.is_empty());

        assert!(matches!(
            parse_document(&list, Some(7)),
            Err(IngestError::TaskNotFound(7))
        ));
    }

    #[test]
    fn test_parse_bare_result_list_and_result_object() {
        let bare = r#"[{"type": "rectanglelabels", "value": {"x": 1, "y": 2, "width": 3, "height": 4}}]"#;
        assert_eq!(parse_document(bare, None).unwrap().detections.len(), 1);

        let wrapped = r#"{"result": [{"type": "rectanglelabels", "value": {"x": 1, "y": 2, "width": 3, "height": 4}}]}"#;
        assert_eq!(parse_document(wrapped, None).unwrap().detections.len(), 1);
    }

    #[test]
    fn test_markdown_wrapped_payload() {
        let md = format!("# Task export\n\nSome notes.\n\n```json\n{}\n```\n\ntrailing text", TASK);
        let doc = parse_document(&md, None).unwrap();
        assert_eq!(doc.task_id, Some(598));

        let loose = format!("copied from the tool: {} (end)", TASK);
        assert_eq!(parse_document(&loose, None).unwrap().detections.len(), 3);
    }

    #[test]
    fn test_fatal_errors() {
        assert!(matches!(parse_document("{not json", None), Err(IngestError::Json(_))));
        assert!(matches!(
            parse_document("42", None),
            Err(IngestError::UnrecognizedLayout(_))
        ));
        assert!(matches!(
            parse_document(r#"{"foo": "bar"}"#, None),
            Err(IngestError::UnrecognizedLayout(_))
        ));
        assert!(matches!(
            parse_document(r#"{"result": {"x": 1}}"#, None),
            Err(IngestError::UnrecognizedLayout(_))
        ));
    }

    #[test]
    fn test_task_without_annotations_is_empty() {
        let doc = parse_document(r#"{"id": 3, "annotations": []}"#, None).unwrap();
        assert!(doc.detections.is_empty());
    }
}

/// Interactive viewport state machine
///
/// The engine is headless: the host feeds it pointer input, viewport
/// geometry and image load results, then renders from `overlay()`,
/// `hover_tooltip()` and `capture_markers()` and reacts to the events it
/// drains. Every engine owns its own transform, hover and capture list.
use std::collections::VecDeque;
use std::time::Instant;
use log::{debug, info, warn};

use super::capture::{CaptureSession, ClipboardSink, ExportError};
use super::transform::{
    percent_to_screen, pointer_to_percent, rendered_image_box, Point, Rect, Size, ViewportTransform,
    ZoomDirection,
};
use crate::config::ViewerSettings;
use crate::region::{Color, Region};
use crate::store::Dataset;

/// Distance of the tooltip anchor above the hovered box, in screen pixels
const TOOLTIP_OFFSET: f64 = 48.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionMode {
    /// Pan, zoom and hover
    Idle,
    /// Clicks on the image record regions; pan and zoom are disabled
    Capture,
}

impl InteractionMode {
    pub fn toggled(self) -> Self {
        match self {
            InteractionMode::Idle => InteractionMode::Capture,
            InteractionMode::Capture => InteractionMode::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageStatus {
    Loading,
    /// Natural size of the decoded image
    Loaded(Size),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorStyle {
    #[default]
    Default,
    Grab,
    Grabbing,
    Pointer,
    Crosshair,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    ModeChanged(InteractionMode),
    TransformChanged(ViewportTransform),
    /// Id of the newly hovered region, `None` when hover ended
    HoverChanged(Option<String>),
    RegionCaptured(Region),
    CapturesCleared(usize),
    CursorChanged(CursorStyle),
    ImageLoaded(Size),
    ImageFailed(String),
    LayersChanged { annotations: bool, heatmap: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoverTooltip {
    pub region_id: String,
    pub label: &'static str,
    /// Confidence as `xx.x%`
    pub confidence: String,
    pub color: Color,
    /// Bottom-center of the tooltip, centered above the box
    pub anchor: Point,
}

/// One annotation box ready to draw, in screen coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBox {
    pub region_id: String,
    /// Already clipped to the image box
    pub rect: Rect,
    pub color: Color,
    pub fill: Color,
    pub hovered: bool,
}

#[derive(Debug, Clone, Copy)]
struct DragState {
    cursor_grabbed_at: Point,
    starting_offset: (f64, f64),
}

pub struct ViewportEngine {
    image_ref: String,
    dataset: Dataset,
    settings: ViewerSettings,
    viewport: Rect,
    status: ImageStatus,
    mode: InteractionMode,
    transform: ViewportTransform,
    show_annotations: bool,
    show_heatmap: bool,
    pointer: Option<Point>,
    /// Index into `dataset.regions`
    hovered: Option<usize>,
    drag: Option<DragState>,
    last_press: Option<Instant>,
    captures: CaptureSession,
    cursor: CursorStyle,
    events: VecDeque<ViewerEvent>,
}

impl ViewportEngine {
    pub fn new(image_ref: impl Into<String>, dataset: Dataset, settings: ViewerSettings, viewport: Rect) -> Self {
        let image_ref = image_ref.into();
        debug!(
            "New viewport for {:?} with dataset `{}` ({} regions)",
            image_ref,
            dataset.name,
            dataset.len()
        );
        Self {
            image_ref,
            dataset,
            show_annotations: settings.show_annotations,
            show_heatmap: settings.show_heatmap,
            settings,
            viewport,
            status: ImageStatus::Loading,
            mode: InteractionMode::Idle,
            transform: ViewportTransform::identity(),
            pointer: None,
            hovered: None,
            drag: None,
            last_press: None,
            captures: CaptureSession::new(),
            cursor: CursorStyle::Default,
            events: VecDeque::new(),
        }
    }

    pub fn image_ref(&self) -> &str {
        &self.image_ref
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn status(&self) -> &ImageStatus {
        &self.status
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn transform(&self) -> ViewportTransform {
        self.transform
    }

    pub fn cursor(&self) -> CursorStyle {
        self.cursor
    }

    pub fn annotations_visible(&self) -> bool {
        self.show_annotations
    }

    pub fn heatmap_visible(&self) -> bool {
        self.show_heatmap
    }

    pub fn captures(&self) -> &[Region] {
        self.captures.regions()
    }

    pub fn drain_events(&mut self) -> Vec<ViewerEvent> {
        self.events.drain(..).collect()
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
        let before = self.transform;
        self.transform.clamp(viewport.size());
        self.emit_if_moved(before);
        self.update_hover();
    }

    pub fn on_image_loaded(&mut self, natural: Size) {
        if natural.is_empty() {
            self.on_image_failed(format!("image reports size {}x{}", natural.width, natural.height));
            return;
        }
        info!("Image {:?} loaded ({}x{})", self.image_ref, natural.width, natural.height);
        self.status = ImageStatus::Loaded(natural);
        self.events.push_back(ViewerEvent::ImageLoaded(natural));
        self.update_hover();
        self.refresh_cursor();
    }

    pub fn on_image_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Image {:?} failed to load: {}", self.image_ref, reason);
        self.status = ImageStatus::Failed(reason.clone());
        self.drag = None;
        self.set_hover(None);
        self.events.push_back(ViewerEvent::ImageFailed(reason));
        self.refresh_cursor();
    }

    /// The image as currently drawn, once it is loaded
    pub fn image_box(&self) -> Option<Rect> {
        match &self.status {
            ImageStatus::Loaded(natural) => Some(rendered_image_box(self.viewport, *natural, &self.transform)),
            _ => None,
        }
    }

    /// Pointer position as percent of the image. Not limited to the image.
    pub fn pointer_to_percent(&self, pointer: Point) -> Option<(f64, f64)> {
        pointer_to_percent(pointer, &self.image_box()?)
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        if self.mode == mode {
            return;
        }
        debug!("Interaction mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        self.drag = None;
        self.last_press = None;
        self.events.push_back(ViewerEvent::ModeChanged(mode));
        self.update_hover();
        self.refresh_cursor();
    }

    pub fn toggle_mode(&mut self) {
        self.set_mode(self.mode.toggled());
    }

    pub fn toggle_annotations(&mut self) {
        self.show_annotations = !self.show_annotations;
        self.emit_layers();
        self.update_hover();
        self.refresh_cursor();
    }

    pub fn toggle_heatmap(&mut self) {
        self.show_heatmap = !self.show_heatmap;
        self.emit_layers();
    }

    /// Zoom about the viewport center. Returns whether the scale changed.
    pub fn zoom_in(&mut self) -> bool {
        self.zoom_centered(ZoomDirection::In)
    }

    pub fn zoom_out(&mut self) -> bool {
        self.zoom_centered(ZoomDirection::Out)
    }

    /// Back to the fitted view. Works in both modes; only the pan and zoom
    /// gestures are locked while capturing.
    pub fn reset_transform(&mut self) {
        let before = self.transform;
        self.transform.reset();
        self.emit_if_moved(before);
        self.update_hover();
    }

    /// Wheel zoom anchored at the pointer; negative `delta_y` zooms in
    pub fn on_wheel(&mut self, pointer: Point, delta_y: f64) {
        if self.mode == InteractionMode::Capture || !self.viewport.contains(pointer) || delta_y == 0.0 {
            return;
        }
        let direction = if delta_y < 0.0 { ZoomDirection::In } else { ZoomDirection::Out };
        let anchor = self.to_local(pointer);
        self.zoom(direction, anchor);
    }

    /// Primary button down. `now` is the event time, used for double-click
    /// detection.
    pub fn on_pointer_pressed(&mut self, pointer: Point, now: Instant) {
        self.pointer = Some(pointer);
        if !self.viewport.contains(pointer) {
            return;
        }

        match self.mode {
            InteractionMode::Capture => self.capture_at(pointer),
            InteractionMode::Idle => {
                let is_double_click = self
                    .last_press
                    .map(|prev| now.saturating_duration_since(prev) <= self.settings.double_click_threshold)
                    .unwrap_or(false);

                if is_double_click {
                    debug!("Double-click, resetting zoom");
                    self.last_press = None;
                    self.drag = None;
                    self.reset_transform();
                } else {
                    self.last_press = Some(now);
                    self.drag = Some(DragState {
                        cursor_grabbed_at: pointer,
                        starting_offset: (self.transform.translate_x, self.transform.translate_y),
                    });
                }
            }
        }
        self.refresh_cursor();
    }

    pub fn on_pointer_moved(&mut self, pointer: Point) {
        self.pointer = Some(pointer);

        if let Some(drag) = self.drag {
            let before = self.transform;
            self.transform.pan_to(
                drag.starting_offset.0 + pointer.x - drag.cursor_grabbed_at.x,
                drag.starting_offset.1 + pointer.y - drag.cursor_grabbed_at.y,
                self.viewport.size(),
            );
            self.emit_if_moved(before);
        } else {
            self.update_hover();
        }
        self.refresh_cursor();
    }

    pub fn on_pointer_released(&mut self) {
        self.drag = None;
        self.update_hover();
        self.refresh_cursor();
    }

    pub fn on_pointer_left(&mut self) {
        self.pointer = None;
        self.drag = None;
        self.set_hover(None);
        self.refresh_cursor();
    }

    pub fn hovered_region(&self) -> Option<&Region> {
        self.hovered.and_then(|i| self.dataset.regions.get(i))
    }

    pub fn hover_tooltip(&self) -> Option<HoverTooltip> {
        let region = self.hovered_region()?;
        let rect = region_screen_rect(region, &self.image_box()?)?;
        let style = region.class.style();
        Some(HoverTooltip {
            region_id: region.id.clone(),
            label: style.label,
            confidence: format!("{:.1}%", region.confidence * 100.0),
            color: style.color,
            anchor: Point::new(rect.center().x, rect.y - TOOLTIP_OFFSET),
        })
    }

    /// Annotation boxes to draw; empty while the overlay is suppressed
    pub fn overlay(&self) -> Vec<OverlayBox> {
        let Some(image_box) = self.overlay_image_box() else {
            return Vec::new();
        };

        self.dataset
            .regions
            .iter()
            .enumerate()
            .filter_map(|(i, region)| {
                let rect = region_screen_rect(region, &image_box)?;
                let style = region.class.style();
                Some(OverlayBox {
                    region_id: region.id.clone(),
                    rect,
                    color: style.color,
                    fill: style.fill,
                    hovered: self.hovered == Some(i),
                })
            })
            .collect()
    }

    /// Screen positions of the captured points, shown in capture mode
    pub fn capture_markers(&self) -> Vec<Point> {
        if self.mode != InteractionMode::Capture {
            return Vec::new();
        }
        let Some(image_box) = self.image_box() else {
            return Vec::new();
        };
        self.captures
            .regions()
            .iter()
            .map(|r| percent_to_screen(r.x, r.y, &image_box))
            .collect()
    }

    pub fn export_captures(&self) -> Result<String, ExportError> {
        self.captures.export_json()
    }

    pub fn copy_captures(&self, sink: &mut dyn ClipboardSink) -> Result<usize, ExportError> {
        self.captures.copy_to(sink)
    }

    /// Forget captured points. The displayed dataset is not touched.
    pub fn clear_captures(&mut self) -> usize {
        let cleared = self.captures.clear();
        info!("Cleared {} captured region(s)", cleared);
        self.events.push_back(ViewerEvent::CapturesCleared(cleared));
        cleared
    }

    fn capture_at(&mut self, pointer: Point) {
        let Some(image_box) = self.image_box() else {
            debug!("Ignoring capture click, image not loaded");
            return;
        };
        if !image_box.contains(pointer) {
            debug!("Ignoring capture click outside the image");
            return;
        }
        if let Some((x, y)) = pointer_to_percent(pointer, &image_box) {
            let region = self.captures.record(x, y).clone();
            self.events.push_back(ViewerEvent::RegionCaptured(region));
        }
    }

    fn zoom_centered(&mut self, direction: ZoomDirection) -> bool {
        let size = self.viewport.size();
        self.zoom(direction, Point::new(size.width / 2.0, size.height / 2.0))
    }

    fn zoom(&mut self, direction: ZoomDirection, anchor: Point) -> bool {
        if self.mode == InteractionMode::Capture {
            return false;
        }
        let before = self.transform;
        let changed = self
            .transform
            .zoom_step(direction, anchor, &self.settings.zoom, self.viewport.size());
        self.emit_if_moved(before);
        self.update_hover();
        changed
    }

    fn to_local(&self, pointer: Point) -> Point {
        Point::new(pointer.x - self.viewport.x, pointer.y - self.viewport.y)
    }

    fn overlay_image_box(&self) -> Option<Rect> {
        if self.mode == InteractionMode::Capture || !self.show_annotations {
            return None;
        }
        self.image_box()
    }

    fn update_hover(&mut self) {
        let hovered = match (self.pointer, self.overlay_image_box()) {
            (Some(pointer), Some(image_box)) if self.viewport.contains(pointer) => self
                .dataset
                .regions
                .iter()
                .rposition(|region| {
                    region_screen_rect(region, &image_box)
                        .map(|rect| rect.contains(pointer))
                        .unwrap_or(false)
                }),
            _ => None,
        };
        self.set_hover(hovered);
    }

    fn set_hover(&mut self, hovered: Option<usize>) {
        if self.hovered == hovered {
            return;
        }
        self.hovered = hovered;
        let id = self.hovered_region().map(|r| r.id.clone());
        self.events.push_back(ViewerEvent::HoverChanged(id));
    }

    fn refresh_cursor(&mut self) {
        let over_viewport = self.pointer.map(|p| self.viewport.contains(p)).unwrap_or(false);
        let cursor = match self.mode {
            InteractionMode::Capture => {
                let over_image = match (self.pointer, self.image_box()) {
                    (Some(p), Some(image_box)) => image_box.contains(p),
                    _ => false,
                };
                if over_image { CursorStyle::Crosshair } else { CursorStyle::Default }
            }
            InteractionMode::Idle if self.drag.is_some() => CursorStyle::Grabbing,
            InteractionMode::Idle if self.hovered.is_some() => CursorStyle::Pointer,
            InteractionMode::Idle if over_viewport => CursorStyle::Grab,
            InteractionMode::Idle => CursorStyle::Default,
        };

        if cursor != self.cursor {
            self.cursor = cursor;
            self.events.push_back(ViewerEvent::CursorChanged(cursor));
        }
    }

    fn emit_if_moved(&mut self, before: ViewportTransform) {
        if before != self.transform {
            self.events.push_back(ViewerEvent::TransformChanged(self.transform));
        }
    }

    fn emit_layers(&mut self) {
        self.events.push_back(ViewerEvent::LayersChanged {
            annotations: self.show_annotations,
            heatmap: self.show_heatmap,
        });
    }
}

/// Screen rectangle of the visible part of `region`
fn region_screen_rect(region: &Region, image_box: &Rect) -> Option<Rect> {
    let clipped = region.clipped()?;
    let top_left = percent_to_screen(clipped.x, clipped.y, image_box);
    Some(Rect::new(
        top_left.x,
        top_left.y,
        clipped.width / 100.0 * image_box.width,
        clipped.height / 100.0 * image_box.height,
    ))
}

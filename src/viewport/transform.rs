/// Zoom/pan transform and screen geometry
///
/// The image is laid out with "contain" fit inside the viewport, then the
/// whole content layer is scaled about its top-left corner and translated.
/// All screen-space values are in host pixels; `Rect::x/y` of the viewport is
/// its position in the host window.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }
}

/// Scale bounds and the multiplicative step of one wheel notch / button press
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomLimits {
    pub min_scale: f64,
    pub max_scale: f64,
    pub step: f64,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self {
            min_scale: crate::config::DEFAULT_MIN_SCALE,
            max_scale: crate::config::DEFAULT_MAX_SCALE,
            step: crate::config::DEFAULT_SCALE_STEP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportTransform {
    pub scale: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl Default for ViewportTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ViewportTransform {
    pub const fn identity() -> Self {
        Self {
            scale: 1.0,
            translate_x: 0.0,
            translate_y: 0.0,
        }
    }

    /// Content-layer point (viewport-local) to viewport-local screen point
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            p.x * self.scale + self.translate_x,
            p.y * self.scale + self.translate_y,
        )
    }

    pub fn invert(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.translate_x) / self.scale,
            (p.y - self.translate_y) / self.scale,
        )
    }

    /// Set a new scale keeping the content under `anchor` (viewport-local)
    /// fixed on screen. Returns whether anything changed.
    pub fn zoom_to(&mut self, new_scale: f64, anchor: Point, limits: &ZoomLimits, viewport: Size) -> bool {
        let new_scale = new_scale.clamp(limits.min_scale, limits.max_scale);
        if (new_scale - self.scale).abs() < f64::EPSILON {
            return false;
        }

        let content = self.invert(anchor);
        self.scale = new_scale;
        self.translate_x = anchor.x - content.x * new_scale;
        self.translate_y = anchor.y - content.y * new_scale;
        self.clamp(viewport);
        true
    }

    pub fn zoom_step(&mut self, direction: ZoomDirection, anchor: Point, limits: &ZoomLimits, viewport: Size) -> bool {
        let target = match direction {
            ZoomDirection::In => self.scale * (1.0 + limits.step),
            ZoomDirection::Out => self.scale / (1.0 + limits.step),
        };
        self.zoom_to(target, anchor, limits, viewport)
    }

    pub fn pan_to(&mut self, translate_x: f64, translate_y: f64, viewport: Size) {
        self.translate_x = translate_x;
        self.translate_y = translate_y;
        self.clamp(viewport);
    }

    /// Keep the content layer from revealing past its own edges
    pub fn clamp(&mut self, viewport: Size) {
        self.translate_x = clamp_axis(self.translate_x, viewport.width, self.scale);
        self.translate_y = clamp_axis(self.translate_y, viewport.height, self.scale);
    }

    pub fn reset(&mut self) {
        *self = Self::identity();
    }
}

fn clamp_axis(translate: f64, extent: f64, scale: f64) -> f64 {
    let slack = extent - extent * scale;
    translate.clamp(slack.min(0.0), slack.max(0.0))
}

/// Untransformed image box: contain-fit and centered, viewport-local
pub fn fit_contain(viewport: Size, image: Size) -> Rect {
    if viewport.is_empty() || image.is_empty() {
        return Rect::default();
    }
    let ratio = (viewport.width / image.width).min(viewport.height / image.height);
    let width = image.width * ratio;
    let height = image.height * ratio;
    Rect::new(
        (viewport.width - width) / 2.0,
        (viewport.height - height) / 2.0,
        width,
        height,
    )
}

/// Where the image currently sits on screen
pub fn rendered_image_box(viewport: Rect, image: Size, transform: &ViewportTransform) -> Rect {
    let fitted = fit_contain(viewport.size(), image);
    let top_left = transform.apply(Point::new(fitted.x, fitted.y));
    Rect::new(
        viewport.x + top_left.x,
        viewport.y + top_left.y,
        fitted.width * transform.scale,
        fitted.height * transform.scale,
    )
}

/// Pointer position as percent of the rendered image box.
///
/// Works on the box as currently drawn, so the result does not depend on the
/// zoom level. `None` for a degenerate box.
pub fn pointer_to_percent(pointer: Point, image_box: &Rect) -> Option<(f64, f64)> {
    if image_box.width <= 0.0 || image_box.height <= 0.0 {
        return None;
    }
    Some((
        (pointer.x - image_box.x) / image_box.width * 100.0,
        (pointer.y - image_box.y) / image_box.height * 100.0,
    ))
}

pub fn percent_to_screen(x_pct: f64, y_pct: f64, image_box: &Rect) -> Point {
    Point::new(
        image_box.x + x_pct / 100.0 * image_box.width,
        image_box.y + y_pct / 100.0 * image_box.height,
    )
}

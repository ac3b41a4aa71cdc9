pub mod capture;
pub mod engine;
pub mod transform;

pub use capture::{CaptureSession, ClipboardSink, ExportError, SystemClipboard};
pub use engine::{
    CursorStyle, HoverTooltip, ImageStatus, InteractionMode, OverlayBox, ViewerEvent, ViewportEngine,
};
pub use transform::{Point, Rect, Size, ViewportTransform, ZoomLimits};

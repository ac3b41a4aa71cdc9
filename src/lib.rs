//! pathoview: glomerulus annotations for whole-slide pathology images.
//!
//! Ingestion turns annotation tool exports into deduplicated, classified
//! regions in percent coordinates; the store maps image keys to those
//! datasets; the viewport engine drives zoom, pan, hover and point capture
//! for a host UI.

pub mod build_info;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod normalize;
pub mod region;
pub mod settings;
pub mod store;
pub mod viewport;

pub use ingest::{ingest_file, ingest_str, IngestError, IngestOptions, IngestReport};
pub use normalize::{CoordinateSpace, ImageDimensions, NormalizeError};
pub use region::{GlomerulusClass, Region};
pub use store::{AnnotationStore, Dataset, StoreError};
pub use viewport::ViewportEngine;

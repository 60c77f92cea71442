//! Cheese Grinder Export
//!
//! This crate turns the moderation store into downloadable artifacts: a CSV
//! log of block records and captures, and a PDF report of the collected
//! comment snapshots.

pub mod csv;
pub mod pdf;

pub use csv::{csv_filename, encode_csv, export_csv};
pub use pdf::{
    export_pdf, pdf_filename, render_pdf, select_captures, CaptureOrder, PdfOptions, TextMode, TextRasterizer,
};

/// Error type for export operations.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no block records or captures to export")]
    Empty,
    #[error("no captures selected")]
    NoCaptures,
    #[error("capture image is not a base64 data URI")]
    InvalidDataUri,
    #[error("capture image has no pixels")]
    EmptyImage,
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("text rasterization failed: {0}")]
    Raster(String),
}

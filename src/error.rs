//! Error types for the canvas-tables library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`HarvestError`] — **Fatal for one course**: a page, anchor target or
//!   course could not be resolved, a linked page could not be fetched, or the
//!   document converter failed. Returned as `Err(HarvestError)` from
//!   [`crate::harvest::Harvester::harvest_course`]; the batch driver records
//!   it and moves on to the next course.
//!
//! * [`ImageError`] — **Non-fatal**: a single image could not be fetched,
//!   rasterised or written. The `img` keeps its remote reference (or follows
//!   the configured [`crate::config::RasterFallback`]) and the course carries
//!   on. Collected in [`crate::pipeline::images::MaterializeReport`].

use std::path::PathBuf;
use thiserror::Error;

/// All course-fatal errors returned by the canvas-tables library.
#[derive(Debug, Error)]
pub enum HarvestError {
    // ── Resolution errors ─────────────────────────────────────────────────
    /// The host platform does not know this course id.
    #[error("Course {course_id} not found\nCheck the locator line in the course list.")]
    CourseNotFound { course_id: u64 },

    /// The host platform does not know this page in the given course.
    #[error("Page '{page_url}' not found in course {course_id}")]
    PageNotFound { course_id: u64, page_url: String },

    /// A lookup against the host platform failed for another reason.
    #[error("Failed to resolve '{target}': {reason}")]
    Resolution { target: String, reason: String },

    /// A "continue" anchor qualified for inlining but its target page could not be fetched.
    #[error("Failed to fetch linked page '{page_url}': {reason}")]
    LinkedPageFetch { page_url: String, reason: String },

    // ── Transport errors ──────────────────────────────────────────────────
    /// The HTTP request failed or returned a non-success status.
    #[error("HTTP request to '{url}' failed: {reason}")]
    Http { url: String, reason: String },

    /// The HTTP request exceeded the configured timeout.
    #[error("HTTP request to '{url}' timed out after {secs}s\nIncrease --fetch-timeout.")]
    Timeout { url: String, secs: u64 },

    /// The host platform answered with a body we could not interpret.
    #[error("Unexpected response from '{url}': {detail}")]
    InvalidResponse { url: String, detail: String },

    // ── External tool errors ──────────────────────────────────────────────
    /// An external program could not be started or exited unsuccessfully.
    #[error("'{tool}' failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    /// An external program ran longer than the configured timeout.
    #[error("'{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    /// The document converter did not produce the requested output.
    #[error("Document conversion to '{output}' failed: {detail}")]
    Conversion { output: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read the course list.
    #[error("Failed to read course list '{path}': {source}")]
    CourseListUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image.
///
/// `index` is the image's 0-based position in the course fragment, the same
/// number that names its local file.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ImageError {
    /// The image could not be downloaded (transport error, timeout or non-2xx status).
    #[error("Image {index}: fetching '{url}' failed: {detail}")]
    Fetch {
        index: usize,
        url: String,
        detail: String,
    },

    /// The SVG payload was saved but could not be converted to PNG.
    #[error("Image {index}: rasterisation failed: {detail}")]
    Rasterize { index: usize, detail: String },

    /// The payload could not be written to the image directory.
    #[error("Image {index}: writing '{path}' failed: {detail}")]
    Write {
        index: usize,
        path: PathBuf,
        detail: String,
    },
}

impl ImageError {
    /// Position of the image this error belongs to.
    pub fn index(&self) -> usize {
        match self {
            ImageError::Fetch { index, .. }
            | ImageError::Rasterize { index, .. }
            | ImageError::Write { index, .. } => *index,
        }
    }
}

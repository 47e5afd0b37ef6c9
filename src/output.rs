//! Result types for single courses and whole batches.
//!
//! All types serialise to JSON so the CLI can emit a machine-readable report
//! with `--json`.

use crate::canvas::Course;
use crate::error::ImageError;
use crate::pipeline::images::ImageAsset;
use serde::Serialize;
use std::path::PathBuf;

/// Everything produced for one course.
#[derive(Debug, Clone, Serialize)]
pub struct CourseOutput {
    pub course: Course,
    /// Converted document, `<output_dir>/<stem>_tablas.docx`.
    pub output_path: PathBuf,
    /// Intermediate HTML handed to the converter.
    pub intermediate_path: PathBuf,
    pub stats: CourseStats,
    pub images: Vec<ImageAsset>,
    /// Non-fatal image failures; the affected `img` kept its remote `src` or
    /// followed the raster fallback.
    pub image_failures: Vec<ImageError>,
}

/// Counters for one course.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CourseStats {
    /// Week pages fetched.
    pub pages: usize,
    pub tables: usize,
    /// Tables that carried a trailing note.
    pub notes: usize,
    pub images_localised: usize,
    pub images_failed: usize,
    pub duration_ms: u64,
}

/// Outcome of one line of the course list.
#[derive(Debug, Serialize)]
pub struct CourseReport {
    /// 1-indexed position in the course list.
    pub index: usize,
    pub locator: String,
    pub course_id: u64,
    #[serde(flatten)]
    pub outcome: CourseOutcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CourseOutcome {
    Succeeded(Box<CourseOutput>),
    Failed { error: String },
}

/// Outcome of a whole course list.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub courses: Vec<CourseReport>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.courses.len()
    }

    pub fn succeeded(&self) -> usize {
        self.courses
            .iter()
            .filter(|c| matches!(c.outcome, CourseOutcome::Succeeded(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// Failed courses as `(index, locator, error)`.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &str, &str)> {
        self.courses.iter().filter_map(|c| match &c.outcome {
            CourseOutcome::Failed { error } => Some((c.index, c.locator.as_str(), error.as_str())),
            CourseOutcome::Succeeded(_) => None,
        })
    }
}

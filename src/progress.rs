//! Progress-callback trait for per-course harvesting events.
//!
//! Inject an [`Arc<dyn HarvestProgressCallback>`] via
//! [`crate::config::HarvestConfigBuilder::progress_callback`] to receive
//! events as the batch driver works through the course list.
//!
//! # Example
//!
//! ```rust
//! use canvas_tables::{HarvestConfig, HarvestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     failed: AtomicUsize,
//! }
//!
//! impl HarvestProgressCallback for CountingCallback {
//!     fn on_course_error(&self, index: usize, locator: &str, error: &str) {
//!         self.failed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{index}) {locator}: {error}");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { failed: AtomicUsize::new(0) });
//! let config = HarvestConfig::builder()
//!     .progress_callback(cb as Arc<dyn HarvestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the batch driver as it processes each course.
///
/// Courses run one after another, but implementations must still be
/// `Send + Sync` because the config that carries them is shared freely.
/// All methods default to no-ops.
pub trait HarvestProgressCallback: Send + Sync {
    /// Called once before the first course.
    fn on_batch_start(&self, total_courses: usize) {
        let _ = total_courses;
    }

    /// Called before a course is resolved.
    ///
    /// * `index`   — 1-indexed position in the course list
    /// * `locator` — the raw line from the course list
    fn on_course_start(&self, index: usize, locator: &str) {
        let _ = (index, locator);
    }

    /// Called when a course produced its document.
    fn on_course_complete(&self, index: usize, course_name: &str, tables: usize, output: &Path) {
        let _ = (index, course_name, tables, output);
    }

    /// Called when a course failed; the batch continues with the next one.
    fn on_course_error(&self, index: usize, locator: &str, error: &str) {
        let _ = (index, locator, error);
    }

    /// Called once after every course has been attempted.
    fn on_batch_complete(&self, total_courses: usize, succeeded: usize) {
        let _ = (total_courses, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl HarvestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::HarvestConfig`].
pub type ProgressCallback = Arc<dyn HarvestProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        started: AtomicUsize,
        completed: AtomicUsize,
        errors: AtomicUsize,
    }

    impl HarvestProgressCallback for TrackingCallback {
        fn on_course_start(&self, _index: usize, _locator: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_course_complete(&self, _index: usize, _name: &str, _tables: usize, _output: &Path) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_course_error(&self, _index: usize, _locator: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_course_start(1, "https://canvas/courses/1");
        cb.on_course_complete(1, "Algebra", 3, Path::new("out.docx"));
        cb.on_course_error(2, "garbage", "Course 0 not found");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_course_start(1, "a");
        tracker.on_course_complete(1, "A", 2, Path::new("a.docx"));
        tracker.on_course_start(2, "b");
        tracker.on_course_error(2, "b", "boom");

        assert_eq!(tracker.started.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}

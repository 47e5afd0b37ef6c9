//! # canvas-tables
//!
//! Harvest every table (and the note below it) from the week pages of Canvas
//! LMS courses into one Word document per course.
//!
//! ## Pipeline Overview
//!
//! ```text
//! course list
//!  │
//!  ├─ 1. Resolve   locator line → course id → course, modules, week pages
//!  ├─ 2. Sanitize  drop <link>/<script> from each page body
//!  ├─ 3. Inline    splice "continue" pages in place of their anchors
//!  ├─ 4. Extract   every table + trailing <pre> note (as <p>)
//!  ├─ 5. Style     borders, header colours, bold header cells
//!  ├─ 6. Images    download remote images, SVG → PNG
//!  └─ 7. Assemble  tablas.html → pandoc → table_results/<sis>_tablas.docx
//! ```
//!
//! Courses run one after another; a failing course is reported and the
//! batch moves on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use canvas_tables::{read_course_list, HarvestConfig, Harvester};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HarvestConfig::builder()
//!         .auth_token(std::env::var("CANVAS_API_TOKEN")?)
//!         .build()?;
//!     let harvester = Harvester::new(config)?;
//!     let courses = read_course_list("courses.txt").await?;
//!     let report = harvester.harvest_batch(&courses).await;
//!     eprintln!("{}/{} courses converted", report.succeeded(), report.total());
//!     Ok(())
//! }
//! ```
//!
//! ## External tools
//!
//! | Tool | Used for | Override |
//! |------|----------|----------|
//! | `rsvg-convert` | SVG → PNG | [`tools::CommandRasterizer`] or any [`tools::Rasterizer`] |
//! | `pandoc` | HTML → DOCX | [`tools::PandocConverter`] or any [`tools::DocumentConverter`] |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `canvas-tables` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod canvas;
pub mod config;
pub mod error;
pub mod harvest;
pub mod markup;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod tools;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use canvas::{CanvasApi, CanvasClient, Course, ModuleItem, Page};
pub use config::{HarvestConfig, HarvestConfigBuilder, RasterFallback};
pub use error::{HarvestError, ImageError};
pub use harvest::{course_id_from_locator, read_course_list, Harvester};
pub use markup::{Element, Fragment, Node};
pub use output::{BatchReport, CourseOutcome, CourseOutput, CourseReport, CourseStats};
pub use progress::{HarvestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use tools::{CommandRasterizer, DocumentConverter, PandocConverter, Rasterizer};

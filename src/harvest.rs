//! Course and batch drivers.
//!
//! [`Harvester::harvest_course`] runs the full pipeline for one course:
//!
//! ```text
//! course ─▶ modules ─▶ week pages ─▶ sanitize + inline (per page) ─▶ concat
//!        ─▶ extract ─▶ style ─▶ images ─▶ assemble ─▶ convert
//! ```
//!
//! [`Harvester::harvest_batch`] runs it for every line of a course list, one
//! course after another. A failing course is reported and skipped; it never
//! stops the batch.

use crate::canvas::{select_week_pages, CanvasApi, CanvasClient};
use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::markup::Fragment;
use crate::output::{BatchReport, CourseOutcome, CourseOutput, CourseReport, CourseStats};
use crate::pipeline::assemble::DocumentAssembler;
use crate::pipeline::extract::{extract_tables, render_items};
use crate::pipeline::images::ImageMaterializer;
use crate::pipeline::inline::LinkInliner;
use crate::pipeline::sanitize::sanitize_html;
use crate::tools::{CommandRasterizer, DocumentConverter, PandocConverter, Rasterizer};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Numeric course id of a course-list line: the first run of digits, or `0`.
///
/// `0` is never a valid Canvas course, so a line without digits fails at the
/// course lookup like any other unknown course.
pub fn course_id_from_locator(line: &str) -> u64 {
    let Some(digits) = RE_DIGITS.find(line) else {
        return 0;
    };
    digits.as_str().parse().unwrap_or_else(|_| {
        warn!("Course id '{}' in '{}' is out of range; using 0", digits.as_str(), line);
        0
    })
}

/// Read a course list: one locator per line, blank lines ignored.
pub async fn read_course_list(path: impl AsRef<Path>) -> Result<Vec<String>, HarvestError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| HarvestError::CourseListUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Runs the pipeline against a Canvas instance.
pub struct Harvester {
    config: HarvestConfig,
    canvas: Arc<dyn CanvasApi>,
    rasterizer: Arc<dyn Rasterizer>,
    converter: Arc<dyn DocumentConverter>,
    http: reqwest::Client,
}

impl Harvester {
    /// Production harvester: Canvas REST client, `rsvg-convert`, `pandoc`.
    pub fn new(config: HarvestConfig) -> Result<Self, HarvestError> {
        let canvas = Arc::new(CanvasClient::new(&config)?);
        let rasterizer = Arc::new(CommandRasterizer::new("rsvg-convert", config.tool_timeout_secs));
        let converter = Arc::new(PandocConverter::new(
            "pandoc",
            config.converter_args.clone(),
            config.tool_timeout_secs,
        ));
        Self::with_collaborators(config, canvas, rasterizer, converter)
    }

    /// Harvester over caller-supplied collaborators.
    pub fn with_collaborators(
        config: HarvestConfig,
        canvas: Arc<dyn CanvasApi>,
        rasterizer: Arc<dyn Rasterizer>,
        converter: Arc<dyn DocumentConverter>,
    ) -> Result<Self, HarvestError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| HarvestError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            config,
            canvas,
            rasterizer,
            converter,
            http,
        })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Fetch every week page of a course, sanitised and with continuation
    /// pages inlined, concatenated in module order.
    ///
    /// Returns the fragment and the number of week pages.
    pub async fn collect_pages(&self, course_id: u64) -> Result<(Fragment, usize), HarvestError> {
        let items = self.canvas.module_items(course_id).await?;
        let week_pages = select_week_pages(&items);
        if week_pages.is_empty() {
            warn!("Course {}: no week pages among {} module items", course_id, items.len());
        }

        let inliner = LinkInliner::new(course_id, &*self.canvas);
        let mut combined = Fragment::new();
        for page_url in &week_pages {
            let page = self.canvas.fetch_page(course_id, page_url).await?;
            debug!("Course {}: page '{}' ({} bytes)", course_id, page.url, page.body().len());
            let inlined = inliner.inline(sanitize_html(page.body())).await?;
            combined.append(inlined);
        }
        Ok((combined, week_pages.len()))
    }

    /// Run the whole pipeline for one course.
    pub async fn harvest_course(&self, course_id: u64) -> Result<CourseOutput, HarvestError> {
        let start = Instant::now();
        let course = self.canvas.course(course_id).await?;
        info!("Course {}: {}", course.id, course.name);

        // ── Step 1: Collect week pages ──────────────────────────────────
        let (fragment, pages) = self.collect_pages(course_id).await?;

        // ── Step 2: Extract tables and notes ────────────────────────────
        let items = extract_tables(&fragment, self.config.note_search_limit);
        let tables = items.len();
        let notes = items.iter().filter(|i| i.note.is_some()).count();
        info!("Course {}: {} table(s), {} note(s) across {} page(s)", course_id, tables, notes, pages);

        // ── Step 3: Styling and images ──────────────────────────────────
        let materializer = ImageMaterializer::new(&self.http, &*self.rasterizer, &self.config);
        let (document, images) = materializer.process(render_items(items)).await?;

        // ── Step 4: Assemble and convert ────────────────────────────────
        let assembler = DocumentAssembler::new(&self.config, &*self.converter);
        let assembled = assembler.assemble(document).await?;
        let output_path = assembler.hand_off(&assembled, &course.output_stem()).await?;

        let stats = CourseStats {
            pages,
            tables,
            notes,
            images_localised: images.assets.len(),
            images_failed: images.failures.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Course {} complete: {} in {}ms",
            course_id,
            output_path.display(),
            stats.duration_ms
        );

        Ok(CourseOutput {
            course,
            output_path,
            intermediate_path: assembled.path,
            stats,
            images: images.assets,
            image_failures: images.failures,
        })
    }

    /// Harvest every locator in order; failures are recorded, not returned.
    pub async fn harvest_batch(&self, locators: &[String]) -> BatchReport {
        let callback = self.config.progress_callback.as_ref();
        if let Some(cb) = callback {
            cb.on_batch_start(locators.len());
        }

        let mut report = BatchReport::default();
        for (i, locator) in locators.iter().enumerate() {
            let index = i + 1;
            let course_id = course_id_from_locator(locator);
            if let Some(cb) = callback {
                cb.on_course_start(index, locator);
            }

            let outcome = match self.harvest_course(course_id).await {
                Ok(output) => {
                    if let Some(cb) = callback {
                        cb.on_course_complete(
                            index,
                            &output.course.name,
                            output.stats.tables,
                            &output.output_path,
                        );
                    }
                    CourseOutcome::Succeeded(Box::new(output))
                }
                Err(e) => {
                    error!("{}) {}: {}", index, locator, e);
                    if let Some(cb) = callback {
                        cb.on_course_error(index, locator, &e.to_string());
                    }
                    CourseOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            report.courses.push(CourseReport {
                index,
                locator: locator.clone(),
                course_id,
                outcome,
            });
        }

        info!("Batch complete: {}/{} course(s) succeeded", report.succeeded(), report.total());
        if let Some(cb) = callback {
            cb.on_batch_complete(report.total(), report.succeeded());
        }
        report
    }
}

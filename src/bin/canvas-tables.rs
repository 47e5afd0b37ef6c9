//! CLI binary for canvas-tables.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `HarvestConfig`, runs the batch and prints a summary.

use anyhow::{bail, Context, Result};
use canvas_tables::{
    read_course_list, BatchReport, CanvasClient, CommandRasterizer, HarvestConfig,
    HarvestProgressCallback, Harvester, PandocConverter, ProgressCallback, RasterFallback,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the course list plus a log line
/// per finished course.
struct CliProgressCallback {
    bar: ProgressBar,
    course_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} courses  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Harvesting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            course_started: Mutex::new(None),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.course_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl HarvestProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_courses: usize) {
        self.bar.set_length(total_courses as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Harvesting tables from {total_courses} courses…"))
        ));
    }

    fn on_course_start(&self, index: usize, locator: &str) {
        if let Ok(mut t) = self.course_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(format!("{index}) {}", truncate(locator, 50)));
    }

    fn on_course_complete(&self, index: usize, course_name: &str, tables: usize, output: &Path) {
        let secs = self.elapsed_secs();
        self.bar.println(format!(
            "  {} {:>3}) {}  {}  {}",
            green("✓"),
            index,
            course_name,
            dim(&format!("{tables} tables → {}", output.display())),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_course_error(&self, index: usize, locator: &str, error: &str) {
        let secs = self.elapsed_secs();
        let first_line = error.lines().next().unwrap_or(error);
        self.bar.println(format!(
            "  {} {:>3}) {}  {}  {}",
            red("✗"),
            index,
            truncate(locator, 40),
            red(&truncate(first_line, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_courses: usize, succeeded: usize) {
        let failed = total_courses.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} courses converted successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} courses converted  ({} failed)",
                if failed == total_courses {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&succeeded.to_string()),
                total_courses,
                red(&failed.to_string()),
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Harvest every course listed in courses.txt
  CANVAS_API_TOKEN=... canvas-tables

  # Another list, another Canvas instance
  canvas-tables cursos.txt --base-url https://canvas.example.edu

  # Keep SVGs that rsvg-convert cannot handle
  canvas-tables --raster-fallback keep-vector

  # Extra pandoc arguments (repeatable)
  canvas-tables --pandoc-arg=--reference-doc=plantilla.docx

  # Machine-readable report
  canvas-tables --json --no-progress > report.json

COURSE LIST:
  One course per line. The first run of digits on a line is the course id,
  so both "12345" and "https://utpl.instructure.com/courses/12345" work.
  Lines without digits are reported as failed courses.

OUTPUT:
  table_results/<sis_course_id>_tablas.docx   one document per course
  imagenes/imagen_externa_<n>.<ext>           downloaded images
  tablas.html                                 last intermediate HTML

REQUIREMENTS:
  pandoc         HTML → DOCX
  rsvg-convert   SVG → PNG (librsvg)
"#;

/// Harvest tables from Canvas LMS week pages into Word documents.
#[derive(Parser, Debug)]
#[command(
    name = "canvas-tables",
    version,
    about = "Harvest tables from Canvas LMS week pages into Word documents",
    long_about = "Collect every table and its trailing note from the week pages of each \
course in a course list, localise their images and convert the result to one DOCX \
document per course with pandoc.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// File with one course locator per line.
    #[arg(default_value = "courses.txt")]
    courses: PathBuf,

    /// Canvas instance root, without /api/v1.
    #[arg(long, env = "CANVAS_BASE_URL", default_value = canvas_tables::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Canvas API bearer token.
    #[arg(long, env = "CANVAS_API_TOKEN", hide_env_values = true)]
    token: String,

    /// Directory for the converted documents.
    #[arg(short, long, env = "CANVAS_TABLES_OUTPUT_DIR", default_value = "table_results")]
    output_dir: PathBuf,

    /// Directory for downloaded images.
    #[arg(long, env = "CANVAS_TABLES_IMAGE_DIR", default_value = "imagenes")]
    image_dir: PathBuf,

    /// Intermediate HTML file handed to pandoc.
    #[arg(long, env = "CANVAS_TABLES_INTERMEDIATE", default_value = "tablas.html")]
    intermediate: PathBuf,

    /// Element siblings after a table searched for its note.
    #[arg(long, env = "CANVAS_TABLES_NOTE_LIMIT", default_value_t = 5,
          value_parser = clap::value_parser!(u32).range(1..))]
    note_limit: u32,

    /// HTTP timeout in seconds (pages, anchors, images).
    #[arg(long, env = "CANVAS_TABLES_FETCH_TIMEOUT", default_value_t = 30)]
    fetch_timeout: u64,

    /// Timeout in seconds for rsvg-convert and pandoc.
    #[arg(long, env = "CANVAS_TABLES_TOOL_TIMEOUT", default_value_t = 120)]
    tool_timeout: u64,

    /// What to do with an SVG image that could not be rasterised.
    #[arg(long, env = "CANVAS_TABLES_RASTER_FALLBACK", value_enum, default_value = "keep-remote")]
    raster_fallback: FallbackArg,

    /// SVG rasteriser program.
    #[arg(long, env = "CANVAS_TABLES_RASTERIZER", default_value = "rsvg-convert")]
    rasterizer: String,

    /// Document converter program.
    #[arg(long, env = "CANVAS_TABLES_PANDOC", default_value = "pandoc")]
    pandoc: String,

    /// Extra argument appended to the pandoc command line (repeatable).
    #[arg(long = "pandoc-arg", allow_hyphen_values = true)]
    pandoc_args: Vec<String>,

    /// Replace every <br> with a space before conversion.
    #[arg(long, env = "CANVAS_TABLES_FLATTEN_BR")]
    flatten_br: bool,

    /// Print the batch report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CANVAS_TABLES_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CANVAS_TABLES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CANVAS_TABLES_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FallbackArg {
    KeepRemote,
    KeepVector,
    Drop,
}

impl From<FallbackArg> for RasterFallback {
    fn from(v: FallbackArg) -> Self {
        match v {
            FallbackArg::KeepRemote => RasterFallback::KeepRemote,
            FallbackArg::KeepVector => RasterFallback::KeepVector,
            FallbackArg::Drop => RasterFallback::Drop,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let courses = read_course_list(&cli.courses)
        .await
        .with_context(|| format!("Failed to read course list {:?}", cli.courses))?;
    if courses.is_empty() {
        bail!("Course list {:?} is empty", cli.courses);
    }

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    let canvas = CanvasClient::new(&config).context("Failed to create Canvas client")?;
    let rasterizer = CommandRasterizer::new(cli.rasterizer.clone(), cli.tool_timeout);
    let converter = PandocConverter::new(
        cli.pandoc.clone(),
        config.converter_args.clone(),
        cli.tool_timeout,
    );
    let harvester = Harvester::with_collaborators(
        config,
        Arc::new(canvas),
        Arc::new(rasterizer),
        Arc::new(converter),
    )
    .context("Failed to set up harvester")?;

    let report = harvester.harvest_batch(&courses).await;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    }
    if !cli.quiet && !show_progress {
        print_summary(&report);
    }

    if report.succeeded() == 0 {
        bail!("All {} courses failed", report.total());
    }
    Ok(())
}

/// Map CLI args to `HarvestConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<HarvestConfig> {
    let mut builder = HarvestConfig::builder()
        .base_url(cli.base_url.clone())
        .auth_token(cli.token.clone())
        .note_search_limit(cli.note_limit as usize)
        .image_directory(cli.image_dir.clone())
        .output_dir(cli.output_dir.clone())
        .intermediate_file(cli.intermediate.clone())
        .fetch_timeout_secs(cli.fetch_timeout)
        .tool_timeout_secs(cli.tool_timeout)
        .raster_fallback(cli.raster_fallback.clone().into())
        .flatten_line_breaks(cli.flatten_br);

    for arg in &cli.pandoc_args {
        builder = builder.converter_arg(arg.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(report: &BatchReport) {
    eprintln!(
        "Converted {}/{} courses",
        report.succeeded(),
        report.total()
    );
    for (index, locator, error) in report.failures() {
        eprintln!("  {}) {}: {}", index, locator, error.lines().next().unwrap_or(error));
    }
}

//! Configuration types for a harvesting run.
//!
//! Bearer token, note lookahead, image folder and output folder all live in
//! [`HarvestConfig`], built via [`HarvestConfigBuilder`] and passed into the
//! pipeline at construction time.

use crate::error::HarvestError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default Canvas instance.
pub const DEFAULT_BASE_URL: &str = "https://utpl.instructure.com";

/// Configuration for harvesting one or more courses.
///
/// # Example
/// ```rust
/// use canvas_tables::HarvestConfig;
///
/// let config = HarvestConfig::builder()
///     .auth_token("secret")
///     .note_search_limit(3)
///     .image_directory("imgs")
///     .build()
///     .unwrap();
/// assert_eq!(config.note_search_limit, 3);
/// ```
#[derive(Clone)]
pub struct HarvestConfig {
    /// Root of the Canvas instance, without `/api/v1`. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,

    /// Bearer token for the Canvas REST API.
    pub auth_token: String,

    /// How many element siblings after a table are inspected for a `pre` note. Default: 5.
    ///
    /// Editors put the source/footnote right below the table, sometimes after
    /// an empty paragraph or a spacer `div`. Five steps catch those layouts
    /// without wandering into the next section.
    pub note_search_limit: usize,

    /// Directory that receives materialised images. Default: `imagenes`.
    pub image_directory: PathBuf,

    /// Directory that receives converted documents. Default: `table_results`.
    pub output_dir: PathBuf,

    /// Intermediate HTML file handed to the converter; overwritten per course. Default: `tablas.html`.
    pub intermediate_file: PathBuf,

    /// Timeout for every HTTP request (pages, anchors, images). Default: 30.
    pub fetch_timeout_secs: u64,

    /// Timeout for external programs (rasteriser, converter). Default: 120.
    pub tool_timeout_secs: u64,

    /// What to do with an `img` whose SVG payload could not be rasterised.
    pub raster_fallback: RasterFallback,

    /// Extra arguments appended to the document converter command line.
    pub converter_args: Vec<String>,

    /// Replace every `<br>` with a single space before hand-off. Default: false.
    pub flatten_line_breaks: bool,

    /// Receives per-course progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: String::new(),
            note_search_limit: 5,
            image_directory: PathBuf::from("imagenes"),
            output_dir: PathBuf::from("table_results"),
            intermediate_file: PathBuf::from("tablas.html"),
            fetch_timeout_secs: 30,
            tool_timeout_secs: 120,
            raster_fallback: RasterFallback::default(),
            converter_args: Vec::new(),
            flatten_line_breaks: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for HarvestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarvestConfig")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &if self.auth_token.is_empty() { "<unset>" } else { "<redacted>" },
            )
            .field("note_search_limit", &self.note_search_limit)
            .field("image_directory", &self.image_directory)
            .field("output_dir", &self.output_dir)
            .field("intermediate_file", &self.intermediate_file)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("raster_fallback", &self.raster_fallback)
            .field("converter_args", &self.converter_args)
            .field("flatten_line_breaks", &self.flatten_line_breaks)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn HarvestProgressCallback>"),
            )
            .finish()
    }
}

impl HarvestConfig {
    /// Create a new builder for `HarvestConfig`.
    pub fn builder() -> HarvestConfigBuilder {
        HarvestConfigBuilder {
            config: Self::default(),
        }
    }

    /// Canvas REST root, e.g. `https://utpl.instructure.com/api/v1`.
    pub fn api_root(&self) -> String {
        format!("{}/api/v1", self.base_url.trim_end_matches('/'))
    }
}

/// Builder for [`HarvestConfig`].
#[derive(Debug)]
pub struct HarvestConfigBuilder {
    config: HarvestConfig,
}

impl HarvestConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = token.into();
        self
    }

    pub fn note_search_limit(mut self, n: usize) -> Self {
        self.config.note_search_limit = n;
        self
    }

    pub fn image_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_directory = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn intermediate_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.intermediate_file = path.into();
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs;
        self
    }

    pub fn raster_fallback(mut self, fallback: RasterFallback) -> Self {
        self.config.raster_fallback = fallback;
        self
    }

    pub fn converter_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.converter_args.push(arg.into());
        self
    }

    pub fn flatten_line_breaks(mut self, v: bool) -> Self {
        self.config.flatten_line_breaks = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<HarvestConfig, HarvestError> {
        let c = &self.config;
        if c.note_search_limit == 0 {
            return Err(HarvestError::InvalidConfig(
                "note search limit must be ≥ 1".into(),
            ));
        }
        if !c.base_url.starts_with("http://") && !c.base_url.starts_with("https://") {
            return Err(HarvestError::InvalidConfig(format!(
                "base URL must be http(s), got '{}'",
                c.base_url
            )));
        }
        if c.fetch_timeout_secs == 0 || c.tool_timeout_secs == 0 {
            return Err(HarvestError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.image_directory.as_os_str().is_empty() {
            return Err(HarvestError::InvalidConfig(
                "image directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Fallback when an SVG image was downloaded but could not be rasterised.
///
/// | Variant | Resulting `img` |
/// |---------|-----------------|
/// | `KeepRemote` | original remote URL (default) |
/// | `KeepVector` | local `.svg` file |
/// | `Drop` | element removed |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RasterFallback {
    /// Leave the `src` pointing at the remote URL, same as a failed download.
    #[default]
    KeepRemote,
    /// Point the `src` at the saved vector file.
    KeepVector,
    /// Remove the `img` element from the document.
    Drop,
}

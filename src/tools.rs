//! External conversion tools: SVG rasteriser and HTML → DOCX converter.
//!
//! Both sit behind traits so the pipeline can be exercised without the
//! binaries installed. The default implementations shell out to
//! `rsvg-convert` and `pandoc`, each bounded by the configured tool timeout.

use crate::error::HarvestError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Converts a vector image file to a raster file.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, svg: &Path, png: &Path) -> Result<(), HarvestError>;
}

/// Converts the intermediate HTML file to the final document format.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, html: &Path, output: &Path) -> Result<(), HarvestError>;
}

/// `rsvg-convert -f png -o <png> <svg>`.
#[derive(Debug, Clone)]
pub struct CommandRasterizer {
    pub program: String,
    pub timeout: Duration,
}

impl CommandRasterizer {
    pub fn new(program: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Default for CommandRasterizer {
    fn default() -> Self {
        Self::new("rsvg-convert", 120)
    }
}

#[async_trait]
impl Rasterizer for CommandRasterizer {
    async fn rasterize(&self, svg: &Path, png: &Path) -> Result<(), HarvestError> {
        let args: Vec<OsString> = vec![
            "-f".into(),
            "png".into(),
            "-o".into(),
            png.into(),
            svg.into(),
        ];
        run_tool(&self.program, &args, self.timeout).await?;
        ensure_written(&self.program, png).await
    }
}

/// `pandoc <html> -f html -t docx -o <output> [extra args…]`.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    pub program: String,
    pub extra_args: Vec<String>,
    pub timeout: Duration,
}

impl PandocConverter {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            extra_args,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Default for PandocConverter {
    fn default() -> Self {
        Self::new("pandoc", Vec::new(), 120)
    }
}

#[async_trait]
impl DocumentConverter for PandocConverter {
    async fn convert(&self, html: &Path, output: &Path) -> Result<(), HarvestError> {
        let mut args: Vec<OsString> = vec![
            html.into(),
            "-f".into(),
            "html".into(),
            "-t".into(),
            "docx".into(),
            "-o".into(),
            output.into(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));

        run_tool(&self.program, &args, self.timeout)
            .await
            .map_err(|e| HarvestError::Conversion {
                output: output.to_path_buf(),
                detail: e.to_string(),
            })?;
        ensure_written(&self.program, output)
            .await
            .map_err(|e| HarvestError::Conversion {
                output: output.to_path_buf(),
                detail: e.to_string(),
            })
    }
}

/// Run `program args…`, failing on spawn error, timeout or non-zero exit.
async fn run_tool(program: &str, args: &[OsString], limit: Duration) -> Result<(), HarvestError> {
    debug!("Running {} {:?}", program, args);
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HarvestError::ToolFailed {
            tool: program.to_string(),
            detail: format!("could not start: {e}"),
        })?;

    let output = timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| HarvestError::ToolTimeout {
            tool: program.to_string(),
            secs: limit.as_secs(),
        })?
        .map_err(|e| HarvestError::ToolFailed {
            tool: program.to_string(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HarvestError::ToolFailed {
            tool: program.to_string(),
            detail: format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        });
    }
    Ok(())
}

async fn ensure_written(program: &str, path: &Path) -> Result<(), HarvestError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(HarvestError::ToolFailed {
            tool: program.to_string(),
            detail: format!("no output at '{}'", path.display()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_reports_tool_failure() {
        let r = CommandRasterizer::new("definitely-not-a-real-rasterizer-binary", 5);
        let dir = tempfile::tempdir().unwrap();
        let err = r
            .rasterize(&dir.path().join("a.svg"), &dir.path().join("a.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::ToolFailed { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn converter_failure_maps_to_conversion_error() {
        let c = PandocConverter::new("definitely-not-a-real-pandoc-binary", vec![], 5);
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("x.docx");
        let err = c.convert(&dir.path().join("x.html"), &out).await.unwrap_err();
        match err {
            HarvestError::Conversion { output, .. } => assert_eq!(output, out),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let err = run_tool("false", &[], Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("exit code 1"), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_tool_times_out() {
        let err = run_tool("sleep", &["5".into()], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::ToolTimeout { .. }), "got: {err:?}");
    }
}

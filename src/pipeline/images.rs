//! Image materialisation: make every remote `img` point at a local file.
//!
//! The converter runs offline and cannot render SVG, so each `http(s)` image
//! is downloaded into the image directory and its `src` rewritten:
//!
//! ```text
//! img #i ─▶ GET ─▶ non-2xx / timeout ─▶ keep remote src (ImageError::Fetch)
//!               └▶ 2xx ─▶ SVG?  ─▶ imagen_externa_i.svg ─▶ rasterise ─▶ imagen_externa_i.png
//!                        └ other ─▶ imagen_externa_i.<subtype>
//! ```
//!
//! `i` is the image's 0-based position among all `img` elements of the
//! course fragment, so names never collide within a run. Local (relative)
//! sources are left alone but still consume a position.
//!
//! Image failures never fail the course; they are collected in
//! [`MaterializeReport::failures`].

use crate::config::{HarvestConfig, RasterFallback};
use crate::error::{HarvestError, ImageError};
use crate::markup::{Fragment, Node};
use crate::pipeline::style::apply_presentation;
use crate::tools::Rasterizer;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How far into the payload we look for an `<svg` tag.
const SVG_SNIFF_BYTES: usize = 500;
const SVG_CONTENT_TYPE: &str = "image/svg+xml";
/// File stem prefix for materialised images.
const FILE_PREFIX: &str = "imagen_externa_";

/// An image persisted to the image directory.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ImageAsset {
    pub index: usize,
    pub source_url: String,
    /// File the `img` now points at.
    pub local_path: PathBuf,
    /// Extension of `local_path` (`png` for rasterised vectors).
    pub format: String,
    /// The saved vector original, for rasterised SVGs.
    pub vector_path: Option<PathBuf>,
}

/// What happened to the images of one fragment.
#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub assets: Vec<ImageAsset>,
    pub failures: Vec<ImageError>,
    /// Images whose `src` was not an absolute http(s) locator.
    pub skipped_local: usize,
}

/// Payload classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageKind {
    Vector,
    Raster { extension: String },
}

/// How an `img` element is rewritten.
#[derive(Debug, Clone)]
enum Rewrite {
    Keep,
    Src(String),
    Drop,
}

/// Downloads and localises the images of one course.
pub struct ImageMaterializer<'a> {
    http: &'a reqwest::Client,
    rasterizer: &'a dyn Rasterizer,
    image_dir: &'a Path,
    fallback: RasterFallback,
    timeout_secs: u64,
}

impl<'a> ImageMaterializer<'a> {
    pub fn new(
        http: &'a reqwest::Client,
        rasterizer: &'a dyn Rasterizer,
        config: &'a HarvestConfig,
    ) -> Self {
        Self {
            http,
            rasterizer,
            image_dir: &config.image_directory,
            fallback: config.raster_fallback,
            timeout_secs: config.fetch_timeout_secs,
        }
    }

    /// Presentational pass followed by image materialisation.
    pub async fn process(
        &self,
        fragment: Fragment,
    ) -> Result<(Fragment, MaterializeReport), HarvestError> {
        self.materialize(apply_presentation(fragment)).await
    }

    /// Download every remote image and rewrite its `src`.
    ///
    /// Only failing to create the image directory is an error.
    pub async fn materialize(
        &self,
        fragment: Fragment,
    ) -> Result<(Fragment, MaterializeReport), HarvestError> {
        let sources: Vec<Option<String>> = fragment
            .find_all("img")
            .iter()
            .map(|img| img.attr("src").map(String::from))
            .collect();

        let mut report = MaterializeReport::default();
        if sources.is_empty() {
            return Ok((fragment, report));
        }

        tokio::fs::create_dir_all(self.image_dir)
            .await
            .map_err(|e| HarvestError::OutputWriteFailed {
                path: self.image_dir.to_path_buf(),
                source: e,
            })?;

        let mut rewrites = Vec::with_capacity(sources.len());
        for (index, src) in sources.iter().enumerate() {
            let rewrite = match src.as_deref() {
                Some(url) if url.starts_with("http") => self.localise(index, url, &mut report).await,
                _ => {
                    report.skipped_local += 1;
                    Rewrite::Keep
                }
            };
            rewrites.push(rewrite);
        }

        info!(
            "Images: {} localised, {} failed, {} local",
            report.assets.len(),
            report.failures.len(),
            report.skipped_local
        );

        let mut position = 0;
        let nodes = apply_rewrites(fragment.into_nodes(), &rewrites, &mut position);
        Ok((Fragment::from_nodes(nodes), report))
    }

    async fn localise(&self, index: usize, url: &str, report: &mut MaterializeReport) -> Rewrite {
        let (content_type, payload) = match self.fetch(index, url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("{}", e);
                report.failures.push(e);
                return Rewrite::Keep;
            }
        };

        let base = self.image_dir.join(format!("{FILE_PREFIX}{index}"));
        match classify(content_type.as_deref(), &payload) {
            ImageKind::Vector => {
                let svg_path = with_ext(&base, "svg");
                let png_path = with_ext(&base, "png");
                if let Err(e) = write_payload(index, &svg_path, &payload).await {
                    warn!("{}", e);
                    report.failures.push(e);
                    return Rewrite::Keep;
                }

                match self.rasterizer.rasterize(&svg_path, &png_path).await {
                    Ok(()) => {
                        debug!("Image {}: {} → {}", index, url, png_path.display());
                        let src = path_src(&png_path);
                        report.assets.push(ImageAsset {
                            index,
                            source_url: url.to_string(),
                            local_path: png_path,
                            format: "png".into(),
                            vector_path: Some(svg_path),
                        });
                        Rewrite::Src(src)
                    }
                    Err(e) => {
                        let err = ImageError::Rasterize {
                            index,
                            detail: e.to_string(),
                        };
                        warn!("{} (fallback: {:?})", err, self.fallback);
                        report.failures.push(err);
                        match self.fallback {
                            RasterFallback::KeepRemote => Rewrite::Keep,
                            RasterFallback::KeepVector => {
                                let src = path_src(&svg_path);
                                report.assets.push(ImageAsset {
                                    index,
                                    source_url: url.to_string(),
                                    local_path: svg_path,
                                    format: "svg".into(),
                                    vector_path: None,
                                });
                                Rewrite::Src(src)
                            }
                            RasterFallback::Drop => Rewrite::Drop,
                        }
                    }
                }
            }
            ImageKind::Raster { extension } => {
                let path = with_ext(&base, &extension);
                if let Err(e) = write_payload(index, &path, &payload).await {
                    warn!("{}", e);
                    report.failures.push(e);
                    return Rewrite::Keep;
                }
                debug!("Image {}: {} → {}", index, url, path.display());
                let src = path_src(&path);
                report.assets.push(ImageAsset {
                    index,
                    source_url: url.to_string(),
                    local_path: path,
                    format: extension,
                    vector_path: None,
                });
                Rewrite::Src(src)
            }
        }
    }

    async fn fetch(&self, index: usize, url: &str) -> Result<(Option<String>, Vec<u8>), ImageError> {
        let fetch_err = |detail: String| ImageError::Fetch {
            index,
            url: url.to_string(),
            detail,
        };

        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                fetch_err(format!("timed out after {}s", self.timeout_secs))
            } else {
                fetch_err(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
        Ok((content_type, bytes.to_vec()))
    }
}

/// Classify a payload as vector or raster.
///
/// SVG wins if either the header says so or the first 500 bytes contain
/// `<svg`. Raster extensions come from the `image/*` subtype; for any other
/// (or missing) content type the payload's magic bytes decide, with the
/// header's subtype or `bin` as last resort.
pub fn classify(content_type: Option<&str>, payload: &[u8]) -> ImageKind {
    let content_type = content_type.map(|ct| ct.trim().to_ascii_lowercase());

    let head = &payload[..payload.len().min(SVG_SNIFF_BYTES)];
    let svg_header = content_type
        .as_deref()
        .is_some_and(|ct| ct.contains(SVG_CONTENT_TYPE));
    if svg_header || head.windows(4).any(|w| w == b"<svg") {
        return ImageKind::Vector;
    }

    let subtype = content_type.as_deref().and_then(|ct| {
        let mime = ct.split(';').next().unwrap_or("").trim();
        let (kind, sub) = mime.rsplit_once('/')?;
        (!sub.is_empty()).then(|| (kind.to_string(), sub.to_string()))
    });

    let extension = match subtype {
        Some((kind, sub)) if kind == "image" => sub,
        other => sniff_extension(payload)
            .or(other.map(|(_, sub)| sub))
            .unwrap_or_else(|| "bin".to_string()),
    };
    ImageKind::Raster { extension }
}

fn sniff_extension(payload: &[u8]) -> Option<String> {
    image::guess_format(payload)
        .ok()
        .and_then(|f| f.extensions_str().first().map(|e| e.to_string()))
}

fn with_ext(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn path_src(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn write_payload(index: usize, path: &Path, payload: &[u8]) -> Result<(), ImageError> {
    tokio::fs::write(path, payload)
        .await
        .map_err(|e| ImageError::Write {
            index,
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

fn apply_rewrites(nodes: Vec<Node>, rewrites: &[Rewrite], position: &mut usize) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Element(mut el) if el.is("img") => {
                let rewrite = rewrites.get(*position).cloned().unwrap_or(Rewrite::Keep);
                *position += 1;
                match rewrite {
                    Rewrite::Keep => out.push(Node::Element(el)),
                    Rewrite::Src(src) => {
                        el.set_attr("src", src);
                        out.push(Node::Element(el));
                    }
                    Rewrite::Drop => {}
                }
            }
            Node::Element(mut el) => {
                let children = std::mem::take(&mut el.children);
                el.children = apply_rewrites(children, rewrites, position);
                out.push(Node::Element(el));
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const SVG: &str = "<?xml version=\"1.0\"?><svg xmlns=\"http://www.w3.org/2000/svg\" width=\"4\" height=\"4\"></svg>";

    struct CopyRasterizer;

    #[async_trait]
    impl Rasterizer for CopyRasterizer {
        async fn rasterize(&self, svg: &Path, png: &Path) -> Result<(), HarvestError> {
            tokio::fs::metadata(svg)
                .await
                .map_err(|e| HarvestError::Internal(e.to_string()))?;
            tokio::fs::write(png, PNG_MAGIC)
                .await
                .map_err(|e| HarvestError::Internal(e.to_string()))
        }
    }

    struct BrokenRasterizer;

    #[async_trait]
    impl Rasterizer for BrokenRasterizer {
        async fn rasterize(&self, _svg: &Path, _png: &Path) -> Result<(), HarvestError> {
            Err(HarvestError::ToolFailed {
                tool: "rsvg-convert".into(),
                detail: "exit code 1: bad svg".into(),
            })
        }
    }

    fn config(dir: &Path, fallback: RasterFallback) -> HarvestConfig {
        HarvestConfig::builder()
            .image_directory(dir.join("imagenes"))
            .raster_fallback(fallback)
            .build()
            .unwrap()
    }

    #[test]
    fn classify_by_header_and_by_sniffing() {
        assert_eq!(classify(Some("image/svg+xml; charset=utf-8"), b"x"), ImageKind::Vector);
        assert_eq!(classify(Some("text/plain"), SVG.as_bytes()), ImageKind::Vector);
        assert_eq!(classify(None, SVG.as_bytes()), ImageKind::Vector);
        assert_eq!(
            classify(Some("image/jpeg"), b"\xff\xd8\xff"),
            ImageKind::Raster { extension: "jpeg".into() }
        );
        assert_eq!(
            classify(None, PNG_MAGIC),
            ImageKind::Raster { extension: "png".into() }
        );
        assert_eq!(
            classify(Some("application/octet-stream"), PNG_MAGIC),
            ImageKind::Raster { extension: "png".into() }
        );
        assert_eq!(
            classify(None, b"????"),
            ImageKind::Raster { extension: "bin".into() }
        );
    }

    #[test]
    fn svg_marker_past_sniff_window_is_not_seen() {
        let mut payload = vec![b' '; SVG_SNIFF_BYTES];
        payload.extend_from_slice(b"<svg></svg>");
        assert_ne!(classify(Some("image/png"), &payload), ImageKind::Vector);
    }

    #[tokio::test]
    async fn raster_image_is_saved_under_its_position() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/logo.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(PNG_MAGIC)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), RasterFallback::KeepRemote);
        let http = reqwest::Client::new();
        let materializer = ImageMaterializer::new(&http, &CopyRasterizer, &config);

        let html = format!(
            "<p><img src=\"local/a.png\"></p><table><tbody><tr><td><img src=\"{}/logo.png\" alt=\"logo\"></td></tr></tbody></table>",
            server.url()
        );
        let (out, report) = materializer.materialize(Fragment::parse(&html)).await.unwrap();

        let expected = dir.path().join("imagenes").join("imagen_externa_1.png");
        assert!(expected.exists());
        assert_eq!(report.assets.len(), 1);
        assert_eq!(report.skipped_local, 1);
        let imgs = out.find_all("img");
        assert_eq!(imgs[0].attr("src"), Some("local/a.png"));
        assert_eq!(imgs[1].attr("src"), expected.to_str());
        assert_eq!(imgs[1].attr("alt"), Some("logo"));
    }

    #[tokio::test]
    async fn svg_is_rasterised_and_both_files_exist() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/chart")
            .with_status(200)
            .with_header("content-type", "application/octet-stream")
            .with_body(SVG)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), RasterFallback::KeepRemote);
        let http = reqwest::Client::new();
        let materializer = ImageMaterializer::new(&http, &CopyRasterizer, &config);

        let html = format!("<img src=\"{}/chart\">", server.url());
        let (out, report) = materializer.materialize(Fragment::parse(&html)).await.unwrap();

        let svg = dir.path().join("imagenes/imagen_externa_0.svg");
        let png = dir.path().join("imagenes/imagen_externa_0.png");
        assert!(svg.exists() && png.exists());
        assert_eq!(out.find_all("img")[0].attr("src"), png.to_str());
        assert_eq!(report.assets[0].vector_path.as_deref(), Some(svg.as_path()));
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_remote_src() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/gone.png")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), RasterFallback::KeepRemote);
        let http = reqwest::Client::new();
        let materializer = ImageMaterializer::new(&http, &CopyRasterizer, &config);

        let url = format!("{}/gone.png", server.url());
        let html = format!("<img src=\"{url}\">");
        let (out, report) = materializer.materialize(Fragment::parse(&html)).await.unwrap();

        assert_eq!(out.find_all("img")[0].attr("src"), Some(url.as_str()));
        assert!(matches!(report.failures[0], ImageError::Fetch { index: 0, .. }));
        assert!(report.assets.is_empty());
    }

    #[tokio::test]
    async fn raster_fallback_policies() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v.svg")
            .with_status(200)
            .with_header("content-type", "image/svg+xml")
            .with_body(SVG)
            .create_async()
            .await;
        let url = format!("{}/v.svg", server.url());
        let html = format!("<p>a<img src=\"{url}\">b</p>");
        let http = reqwest::Client::new();

        let dir = tempfile::tempdir().unwrap();
        let keep = config(dir.path(), RasterFallback::KeepRemote);
        let (out, report) = ImageMaterializer::new(&http, &BrokenRasterizer, &keep)
            .materialize(Fragment::parse(&html))
            .await
            .unwrap();
        assert_eq!(out.find_all("img")[0].attr("src"), Some(url.as_str()));
        assert!(matches!(report.failures[0], ImageError::Rasterize { index: 0, .. }));

        let vector = config(dir.path(), RasterFallback::KeepVector);
        let (out, _) = ImageMaterializer::new(&http, &BrokenRasterizer, &vector)
            .materialize(Fragment::parse(&html))
            .await
            .unwrap();
        let svg = dir.path().join("imagenes/imagen_externa_0.svg");
        assert_eq!(out.find_all("img")[0].attr("src"), svg.to_str());

        let drop = config(dir.path(), RasterFallback::Drop);
        let (out, _) = ImageMaterializer::new(&http, &BrokenRasterizer, &drop)
            .materialize(Fragment::parse(&html))
            .await
            .unwrap();
        assert!(out.find_all("img").is_empty());
        assert_eq!(out.to_html(), "<p>ab</p>");
    }

    #[tokio::test]
    async fn fragment_without_images_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), RasterFallback::KeepRemote);
        let http = reqwest::Client::new();
        let parsed = Fragment::parse("<p>sin imágenes</p>");
        let (out, report) = ImageMaterializer::new(&http, &CopyRasterizer, &config)
            .process(parsed.clone())
            .await
            .unwrap();
        assert_eq!(out, parsed);
        assert!(report.assets.is_empty());
        assert!(!dir.path().join("imagenes").exists());
    }
}

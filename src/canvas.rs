//! Host-platform collaborators: courses, modules, pages and anchor targets.
//!
//! The pipeline only ever talks to Canvas through the four traits below, so
//! tests (and other LMS back-ends) can swap in their own implementation.
//! [`CanvasClient`] is the production implementation over the Canvas REST
//! API with bearer-token authentication. The token is only ever sent to the
//! configured `base_url` origin.

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderValue, AUTHORIZATION, LINK};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Module-item titles containing one of these mark a week's landing page.
pub const WEEK_MARKERS: &[&str] = &["semana", "week"];

/// A course as reported by the host platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sis_course_id: Option<String>,
}

impl Course {
    /// Stem used to name the course's output document: SIS id when present, else the numeric id.
    pub fn output_stem(&self) -> String {
        match self.sis_course_id.as_deref().map(str::trim) {
            Some(sis) if !sis.is_empty() => sis.replace(['/', '\\'], "_"),
            _ => self.id.to_string(),
        }
    }
}

/// A wiki page with its HTML body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl Page {
    pub fn body(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }
}

/// One entry of a course module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub page_url: Option<String>,
}

impl ModuleItem {
    /// True for `Page` items whose title names a week (`semana` / `week`, any case).
    pub fn is_week_page(&self) -> bool {
        let title = self.title.to_lowercase();
        self.kind == "Page" && WEEK_MARKERS.iter().any(|m| title.contains(m))
    }
}

/// Page urls of the week pages, in the order modules and items were reported.
pub fn select_week_pages(items: &[ModuleItem]) -> Vec<String> {
    items
        .iter()
        .filter(|i| i.is_week_page())
        .filter_map(|i| i.page_url.clone())
        .collect()
}

// ── Collaborator traits ──────────────────────────────────────────────────

#[async_trait]
pub trait CourseSource: Send + Sync {
    /// Look up a course; unknown ids yield [`HarvestError::CourseNotFound`].
    async fn course(&self, course_id: u64) -> Result<Course, HarvestError>;
}

#[async_trait]
pub trait ModuleSource: Send + Sync {
    /// Every module item of the course, modules in order, items in order.
    async fn module_items(&self, course_id: u64) -> Result<Vec<ModuleItem>, HarvestError>;
}

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch a page body; unknown pages yield [`HarvestError::PageNotFound`].
    async fn fetch_page(&self, course_id: u64, page_url: &str) -> Result<Page, HarvestError>;
}

#[async_trait]
pub trait AnchorResolver: Send + Sync {
    /// Resolve an anchor's `data-api-endpoint` to the target page url.
    async fn resolve_anchor(&self, endpoint: &str) -> Result<String, HarvestError>;
}

/// Everything the harvester needs from the host platform.
pub trait CanvasApi: CourseSource + ModuleSource + PageSource + AnchorResolver {}

impl<T: CourseSource + ModuleSource + PageSource + AnchorResolver + ?Sized> CanvasApi for T {}

// ── REST client ──────────────────────────────────────────────────────────

static RE_NEXT_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).unwrap());

#[derive(Deserialize)]
struct Module {
    #[serde(default)]
    items: Option<Vec<ModuleItem>>,
    #[serde(default)]
    items_url: Option<String>,
}

#[derive(Deserialize)]
struct AnchorTarget {
    #[serde(default)]
    url: Option<String>,
}

/// Canvas REST API client.
pub struct CanvasClient {
    http: reqwest::Client,
    auth: Option<HeaderValue>,
    base: Url,
    base_url: String,
    api_root: String,
    timeout_secs: u64,
}

impl CanvasClient {
    pub fn new(config: &HarvestConfig) -> Result<Self, HarvestError> {
        let auth = if config.auth_token.is_empty() {
            None
        } else {
            let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.auth_token))
                .map_err(|e| HarvestError::InvalidConfig(format!("auth token: {e}")))?;
            auth.set_sensitive(true);
            Some(auth)
        };
        let base = Url::parse(&config.base_url)
            .map_err(|e| HarvestError::InvalidConfig(format!("base_url: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| HarvestError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            auth,
            base,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_root: config.api_root(),
            timeout_secs: config.fetch_timeout_secs,
        })
    }

    /// True when `url` has the scheme, host and port of `base_url`.
    fn same_origin(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|u| u.origin() == self.base.origin())
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, HarvestError> {
        debug!("GET {}", url);
        let mut request = self.http.get(url);
        match &self.auth {
            Some(auth) if self.same_origin(url) => {
                request = request.header(AUTHORIZATION, auth.clone());
            }
            Some(_) => warn!("Sending no credentials to foreign origin: {}", url),
            None => {}
        }
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                HarvestError::Timeout {
                    url: url.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                HarvestError::Http {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }

    /// Follow `Link: <…>; rel="next"` headers until every page is collected.
    async fn get_paginated<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, HarvestError> {
        let mut out = Vec::new();
        let mut next = Some(url.to_string());
        while let Some(url) = next.take() {
            if !self.same_origin(&url) {
                return Err(HarvestError::InvalidResponse {
                    url,
                    detail: format!("listing points outside {}", self.base_url),
                });
            }
            let response = self.send(&url).await?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);
            let batch: Vec<T> = read_json(&url, response).await?;
            out.extend(batch);
        }
        Ok(out)
    }

    fn absolute(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            endpoint.to_string()
        }
    }
}

#[async_trait]
impl CourseSource for CanvasClient {
    async fn course(&self, course_id: u64) -> Result<Course, HarvestError> {
        let url = format!("{}/courses/{}", self.api_root, course_id);
        let response = self.send(&url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(HarvestError::CourseNotFound { course_id });
        }
        read_json(&url, response).await
    }
}

#[async_trait]
impl ModuleSource for CanvasClient {
    async fn module_items(&self, course_id: u64) -> Result<Vec<ModuleItem>, HarvestError> {
        let url = format!(
            "{}/courses/{}/modules?include[]=items&per_page=100",
            self.api_root, course_id
        );
        let modules: Vec<Module> = self.get_paginated(&url).await?;

        let mut items = Vec::new();
        for module in modules {
            match (module.items, module.items_url) {
                (Some(inline), _) => items.extend(inline),
                // Canvas omits `items` for large modules; fetch them separately.
                (None, Some(items_url)) => {
                    let url = format!("{}?per_page=100", self.absolute(&items_url));
                    items.extend(self.get_paginated::<ModuleItem>(&url).await?);
                }
                (None, None) => {}
            }
        }
        debug!("Course {}: {} module items", course_id, items.len());
        Ok(items)
    }
}

#[async_trait]
impl PageSource for CanvasClient {
    async fn fetch_page(&self, course_id: u64, page_url: &str) -> Result<Page, HarvestError> {
        let url = format!("{}/courses/{}/pages/{}", self.api_root, course_id, page_url);
        let response = self.send(&url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(HarvestError::PageNotFound {
                course_id,
                page_url: page_url.to_string(),
            });
        }
        read_json(&url, response).await
    }
}

#[async_trait]
impl AnchorResolver for CanvasClient {
    async fn resolve_anchor(&self, endpoint: &str) -> Result<String, HarvestError> {
        let url = self.absolute(endpoint);
        if !self.same_origin(&url) {
            return Err(HarvestError::Resolution {
                target: endpoint.to_string(),
                reason: format!("endpoint is not on {}", self.base_url),
            });
        }
        let response = self.send(&url).await?;
        let target: AnchorTarget = read_json(&url, response).await?;
        target.url.ok_or_else(|| HarvestError::InvalidResponse {
            url,
            detail: "missing 'url' field".into(),
        })
    }
}

async fn read_json<T: DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<T, HarvestError> {
    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::Http {
            url: url.to_string(),
            reason: format!("HTTP {status}"),
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| HarvestError::InvalidResponse {
            url: url.to_string(),
            detail: e.to_string(),
        })
}

/// Extract the `rel="next"` target from a `Link` header value.
fn next_link(header: &str) -> Option<String> {
    RE_NEXT_LINK.captures(header).map(|c| c[1].to_string())
}

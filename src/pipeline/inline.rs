//! Link inlining: splice "continue" pages into the page that links to them.
//!
//! Long week pages are often split by editors into a landing page plus one or
//! more continuation pages, joined by an anchor the Canvas editor tags with
//! `data-api-returntype="Page"`. Tables near the split would lose their notes
//! if the pages were processed separately, so the nearest block around each such
//! anchor is replaced by the sanitised body of the page it points to.
//!
//! Anchors whose text mentions a week (`semana`, `week`) are navigation
//! between week landing pages and stay plain links.
//!
//! ## Three phases
//!
//! 1. scan a snapshot of the tree for qualifying anchors (no mutation)
//! 2. resolve and fetch every target, in document order
//! 3. rebuild a new tree with the replacements applied
//!
//! Any failure in phase 2 aborts before phase 3, so no partial substitution
//! is ever committed.

use crate::canvas::{AnchorResolver, PageSource, WEEK_MARKERS};
use crate::error::HarvestError;
use crate::markup::{Element, Fragment, Node};
use crate::pipeline::sanitize::sanitize_html;
use std::collections::HashMap;
use tracing::{debug, info};

/// Attribute Canvas puts on links to other course resources.
const RETURN_TYPE_ATTR: &str = "data-api-returntype";
/// Attribute holding the API URL of the linked resource.
const ENDPOINT_ATTR: &str = "data-api-endpoint";

/// Inlines continuation pages for one course.
pub struct LinkInliner<'a, C: ?Sized> {
    course_id: u64,
    canvas: &'a C,
}

/// A qualifying anchor found during the scan.
struct Candidate {
    /// Child-index path of the node that will be replaced.
    target: Vec<usize>,
    endpoint: Option<String>,
    text: String,
}

impl<'a, C> LinkInliner<'a, C>
where
    C: AnchorResolver + PageSource + ?Sized,
{
    pub fn new(course_id: u64, canvas: &'a C) -> Self {
        Self { course_id, canvas }
    }

    /// Replace every qualifying anchor's enclosing block with the linked page's body.
    pub async fn inline(&self, fragment: Fragment) -> Result<Fragment, HarvestError> {
        let candidates = collect_candidates(fragment.nodes());
        if candidates.is_empty() {
            return Ok(fragment);
        }
        info!(
            "Course {}: inlining {} linked page(s)",
            self.course_id,
            candidates.len()
        );

        let mut replacements: HashMap<Vec<usize>, Fragment> = HashMap::new();
        for candidate in candidates {
            let body = self.fetch_linked(&candidate).await?;
            replacements
                .entry(candidate.target)
                .or_default()
                .append(body);
        }

        let mut path = Vec::new();
        let nodes = rebuild(fragment.into_nodes(), &mut path, &mut replacements);
        Ok(Fragment::from_nodes(nodes))
    }

    async fn fetch_linked(&self, candidate: &Candidate) -> Result<Fragment, HarvestError> {
        let endpoint = candidate
            .endpoint
            .as_deref()
            .ok_or_else(|| HarvestError::Resolution {
                target: candidate.text.clone(),
                reason: format!("anchor has no {ENDPOINT_ATTR}"),
            })?;

        let page_url = self
            .canvas
            .resolve_anchor(endpoint)
            .await
            .map_err(|e| match e {
                e @ HarvestError::Resolution { .. } => e,
                other => HarvestError::Resolution {
                    target: endpoint.to_string(),
                    reason: other.to_string(),
                },
            })?;

        let page = self
            .canvas
            .fetch_page(self.course_id, &page_url)
            .await
            .map_err(|e| HarvestError::LinkedPageFetch {
                page_url: page_url.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            "Inlined '{}' ({} bytes) for anchor '{}'",
            page_url,
            page.body().len(),
            candidate.text
        );
        Ok(sanitize_html(page.body()))
    }
}

/// True for a Canvas page link that is not week navigation.
pub fn is_continue_anchor(el: &Element) -> bool {
    if !el.is("a") {
        return false;
    }
    let is_page = el
        .attr(RETURN_TYPE_ATTR)
        .is_some_and(|v| v.eq_ignore_ascii_case("page"));
    if !is_page {
        return false;
    }
    let text = el.text().trim().to_lowercase();
    !WEEK_MARKERS.iter().any(|m| text.contains(m))
}

/// Elements an inlined page may replace.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "details", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "li", "main", "nav", "ol", "p", "section", "td", "th", "ul",
];

fn is_block(el: &Element) -> bool {
    BLOCK_ELEMENTS.iter().any(|b| el.is(b))
}

fn collect_candidates(nodes: &[Node]) -> Vec<Candidate> {
    /// `blocks` holds, for each level of `path`, whether that ancestor is a block.
    fn walk(
        nodes: &[Node],
        path: &mut Vec<usize>,
        blocks: &mut Vec<bool>,
        out: &mut Vec<Candidate>,
    ) {
        for (i, node) in nodes.iter().enumerate() {
            let Node::Element(el) = node else { continue };
            path.push(i);
            if is_continue_anchor(el) {
                // Nearest block ancestor; without one, the top-level node holding the anchor.
                let depth = blocks.iter().rposition(|b| *b).map_or(1, |d| d + 1);
                out.push(Candidate {
                    target: path[..depth].to_vec(),
                    endpoint: el.attr(ENDPOINT_ATTR).map(String::from),
                    text: el.text().trim().to_string(),
                });
            } else {
                blocks.push(is_block(el));
                walk(&el.children, path, blocks, out);
                blocks.pop();
            }
            path.pop();
        }
    }

    let mut found = Vec::new();
    walk(nodes, &mut Vec::new(), &mut Vec::new(), &mut found);

    // A target nested inside another target would be discarded by the outer
    // replacement; skip it instead of fetching a page we would throw away.
    let targets: Vec<Vec<usize>> = found.iter().map(|c| c.target.clone()).collect();
    found
        .into_iter()
        .filter(|c| {
            !targets
                .iter()
                .any(|t| t.len() < c.target.len() && c.target.starts_with(t))
        })
        .collect()
}

fn rebuild(
    nodes: Vec<Node>,
    path: &mut Vec<usize>,
    replacements: &mut HashMap<Vec<usize>, Fragment>,
) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.into_iter().enumerate() {
        path.push(i);
        if let Some(replacement) = replacements.remove(path.as_slice()) {
            out.extend(replacement.into_nodes());
        } else {
            match node {
                Node::Element(mut el) => {
                    let children = std::mem::take(&mut el.children);
                    el.children = rebuild(children, path, replacements);
                    out.push(Node::Element(el));
                }
                other => out.push(other),
            }
        }
        path.pop();
    }
    out
}

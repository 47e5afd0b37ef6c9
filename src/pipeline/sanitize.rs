//! Markup sanitising: drop stylesheet links and scripts from a page body.
//!
//! Canvas page bodies embed theme `<link>`s and tracking `<script>`s that
//! mean nothing once the markup leaves the browser. Everything else is kept
//! verbatim and in order.

use crate::markup::{Fragment, Node};

/// Tags removed from every page body, at any depth.
const STRIPPED_TAGS: &[&str] = &["link", "script"];

/// Remove every `link` and `script` element from `fragment`.
pub fn sanitize(fragment: Fragment) -> Fragment {
    fragment
        .into_nodes()
        .into_iter()
        .filter_map(sanitize_node)
        .collect()
}

/// Parse a raw page body and sanitise it.
pub fn sanitize_html(html: &str) -> Fragment {
    sanitize(Fragment::parse(html))
}

fn sanitize_node(node: Node) -> Option<Node> {
    match node {
        Node::Element(el) if STRIPPED_TAGS.iter().any(|t| el.is(t)) => None,
        Node::Element(mut el) => {
            el.children = std::mem::take(&mut el.children)
                .into_iter()
                .filter_map(sanitize_node)
                .collect();
            Some(Node::Element(el))
        }
        other => Some(other),
    }
}

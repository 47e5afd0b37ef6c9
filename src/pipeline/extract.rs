//! Table extraction: every table, plus the note that trails it.
//!
//! Course editors write a table's source or footnote as a `pre` block right
//! below it. For each `table` (at any depth) we look at its next element
//! siblings, up to `note_search_limit` of them:
//!
//! ```text
//! table ─▶ sibling 1 ─▶ sibling 2 ─▶ … ─▶ sibling N
//!            │ table?  stop, no note
//!            │ pre?    strip style, rename to p, attach, stop
//!            └ other   keep looking
//! ```
//!
//! Stopping at the next table keeps a table from stealing the note of the
//! one after it. Text and comment nodes between elements are not siblings for
//! this purpose, so whitespace never eats into the lookahead.

use crate::markup::{Element, Fragment, Node};
use tracing::debug;

/// A table and its optional trailing note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedItem {
    pub table: Element,
    /// A `p` converted from the table's trailing `pre`, if one was found.
    pub note: Option<Element>,
}

/// Extract every table of `fragment`, in document order.
///
/// Tables nested inside another table travel with their outer table and do
/// not produce items of their own.
pub fn extract_tables(fragment: &Fragment, note_search_limit: usize) -> Vec<ExtractedItem> {
    let mut items = Vec::new();
    walk_siblings(fragment.nodes(), note_search_limit, &mut items);
    debug!(
        "Extracted {} table(s), {} with notes",
        items.len(),
        items.iter().filter(|i| i.note.is_some()).count()
    );
    items
}

/// Lay items out as `table, note?, table, note?, …`.
pub fn render_items(items: Vec<ExtractedItem>) -> Fragment {
    let mut out = Fragment::new();
    for item in items {
        out.push(item.table);
        if let Some(note) = item.note {
            out.push(note);
        }
    }
    out
}

fn walk_siblings(siblings: &[Node], limit: usize, items: &mut Vec<ExtractedItem>) {
    for (i, node) in siblings.iter().enumerate() {
        let Node::Element(el) = node else { continue };
        if el.is("table") {
            items.push(ExtractedItem {
                table: el.clone(),
                note: find_note(&siblings[i + 1..], limit),
            });
        } else {
            walk_siblings(&el.children, limit, items);
        }
    }
}

fn find_note(following: &[Node], limit: usize) -> Option<Element> {
    for sibling in following.iter().filter_map(Node::as_element).take(limit) {
        if sibling.is("table") {
            return None;
        }
        if sibling.is("pre") {
            return Some(pre_to_paragraph(sibling));
        }
    }
    None
}

/// Copy a `pre` block as a `p`, dropping its inline style.
fn pre_to_paragraph(pre: &Element) -> Element {
    let mut p = pre.clone();
    p.name = "p".to_string();
    p.remove_attr("style");
    p
}

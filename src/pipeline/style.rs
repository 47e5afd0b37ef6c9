//! Presentational normalisation so tables print legibly after conversion.
//!
//! pandoc drops CSS classes, so the Canvas theme's table borders and header
//! colours disappear in the DOCX. We inline the few styles that matter:
//!
//! - every `table`: `border: 1px solid black; border-collapse: collapse;` plus `border="1"`
//! - every header cell (`th`/`td` under `thead`): contents wrapped in `strong`
//! - every `thead`: `background-color: blue; color: white;`
//!
//! All three are idempotent: attributes are overwritten, not appended, and a
//! cell whose contents are already a single `strong` is left alone.

use crate::markup::{Element, Fragment, Node};

pub const TABLE_STYLE: &str = "border: 1px solid black; border-collapse: collapse;";
pub const TABLE_BORDER: &str = "1";
pub const THEAD_STYLE: &str = "background-color: blue; color: white;";

/// Apply table and header styling to the whole fragment.
pub fn apply_presentation(fragment: Fragment) -> Fragment {
    fragment
        .into_nodes()
        .into_iter()
        .map(|mut node| {
            style_node(&mut node, false);
            node
        })
        .collect()
}

fn style_node(node: &mut Node, in_thead: bool) {
    let Node::Element(el) = node else { return };

    if el.is("table") {
        el.set_attr("style", TABLE_STYLE);
        el.set_attr("border", TABLE_BORDER);
    }

    let is_thead = el.is("thead");
    if is_thead {
        el.set_attr("style", THEAD_STYLE);
    }

    if in_thead && (el.is("th") || el.is("td")) {
        embolden_cell(el);
        return;
    }

    let in_thead = in_thead || is_thead;
    for child in &mut el.children {
        style_node(child, in_thead);
    }
}

fn embolden_cell(cell: &mut Element) {
    let already_bold = matches!(
        cell.children.as_slice(),
        [Node::Element(only)] if only.is("strong")
    );
    if already_bold || cell.children.is_empty() {
        return;
    }
    let contents = std::mem::take(&mut cell.children);
    cell.children
        .push(Node::Element(Element::new("strong").with_children(contents)));
}

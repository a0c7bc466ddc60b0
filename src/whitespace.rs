//! Whitespace normalization for text nodes.
//!
//! Indentation between elements is collapsed to a single newline or space.
//! Text at the edge of a fragment wrapper, a skipped node or a non-element
//! neighbour is trimmed completely. Text inside `pre`, `code` or `textarea`
//! is left alone.

use crate::tags::{preserves_whitespace, FRAGMENT_TAG};
use crate::tree::{NodeId, NodeTree};

fn is_space(c: char) -> bool {
    c.is_ascii_whitespace()
}

/// Whether whitespace next to `neighbour` can be dropped entirely.
fn is_hard_boundary(tree: &NodeTree, skipped: &dyn Fn(NodeId) -> bool, neighbour: Option<NodeId>) -> bool {
    match neighbour {
        None => true,
        Some(id) => match tree.tag(id) {
            None => true,
            Some(tag) => tag == FRAGMENT_TAG || skipped(id),
        },
    }
}

fn collapse(run: &str) -> &'static str {
    if run.is_empty() {
        ""
    } else if run.contains('\n') {
        "\n"
    } else {
        " "
    }
}

pub fn normalize(tree: &NodeTree, id: NodeId, text: &str, skipped: &dyn Fn(NodeId) -> bool) -> String {
    let in_preformatted = tree
        .closest(id, |n| tree.tag(n).map(preserves_whitespace).unwrap_or(false))
        .is_some();
    if in_preformatted {
        return text.to_string();
    }

    let after = tree.next_sibling(id).or_else(|| tree.parent(id));
    let before = tree.previous_sibling(id).or_else(|| tree.parent(id));
    let hard_after = is_hard_boundary(tree, skipped, after);
    let hard_before = is_hard_boundary(tree, skipped, before);

    let body = text.trim_end_matches(is_space);
    let content = body.trim_start_matches(is_space);
    if content.is_empty() {
        // A whitespace-only node collapses once, and only between elements.
        return if hard_after || hard_before {
            String::new()
        } else {
            collapse(text).to_string()
        };
    }

    let trailing = if hard_after { "" } else { collapse(&text[body.len()..]) };
    let leading = if hard_before {
        ""
    } else {
        collapse(&body[..body.len() - content.len()])
    };

    format!("{}{}{}", leading, content, trailing)
}

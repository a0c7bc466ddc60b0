//! Parse Module for xtpl templates
//!
//! Adapts html5ever into the compiler's read-only [`NodeTree`]. Fragments are
//! wrapped in an `<x>` element so the parser always sees a full document; the
//! wrapper then becomes the effective root.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use serde::Serialize;

use crate::error::{CompileErrorKind, Result, TemplateSource};
use crate::tags::{correct_svg_attribute_name, is_void, FRAGMENT_TAG};
use crate::tree::{Attribute, Element, NodeId, NodeKind, NodeTree};

/// Characters of a text node used to find it in the source.
const TEXT_PROBE_LEN: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTemplate {
    pub tree: NodeTree,
    /// True when the source had no `<html>` and was wrapped.
    pub fragment: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE PREPARATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert self-closing non-void tags to explicit open/close pairs.
/// HTML5/html5ever treats `<card />` as an opening tag, which would nest
/// every following sibling inside it.
fn convert_self_closing_tags(html: &str) -> String {
    lazy_static! {
        static ref SELF_CLOSING_RE: Regex =
            Regex::new(r"<([A-Za-z][A-Za-z0-9._:-]*)(\s[^<>]*?)?\s*/>").unwrap();
    }

    SELF_CLOSING_RE
        .replace_all(html, |caps: &regex::Captures| {
            let name = &caps[1];
            if is_void(&name.to_ascii_lowercase()) {
                return caps[0].to_string();
            }
            let attrs = caps.get(2).map(|m| m.as_str().trim_end()).unwrap_or("");
            format!("<{}{}></{}>", name, attrs, name)
        })
        .to_string()
}

fn is_document(source: &str) -> bool {
    source.to_ascii_lowercase().contains("<html")
}

// ═══════════════════════════════════════════════════════════════════════════════
// LINE MAPPING
// ═══════════════════════════════════════════════════════════════════════════════

/// Finds where parsed nodes came from by scanning the original source in
/// document order.
struct LineLocator<'s> {
    source: &'s str,
    lowered: String,
    line_starts: Vec<usize>,
    cursor: usize,
    last_line: usize,
}

impl<'s> LineLocator<'s> {
    fn new(source: &'s str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            lowered: source.to_ascii_lowercase(),
            line_starts,
            cursor: 0,
            last_line: 1,
        }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }

    fn element(&mut self, tag: &str) -> usize {
        let needle = format!("<{}", tag.to_ascii_lowercase());
        let mut from = self.cursor;
        while let Some(found) = self.lowered[from..].find(&needle) {
            let start = from + found;
            let end = start + needle.len();
            let bounded = self.lowered[end..]
                .chars()
                .next()
                .map_or(true, |c| c.is_ascii_whitespace() || c == '>' || c == '/');
            if bounded {
                self.cursor = end;
                self.last_line = self.line_of(start);
                return self.last_line;
            }
            from = end;
        }
        self.last_line
    }

    fn text(&mut self, text: &str) -> usize {
        let probe: String = text
            .trim_start_matches(|c: char| c.is_ascii_whitespace())
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(TEXT_PROBE_LEN)
            .collect();
        if probe.is_empty() {
            return self.last_line;
        }
        if let Some(found) = self.source[self.cursor..].find(&probe) {
            let start = self.cursor + found;
            self.cursor = start;
            self.last_line = self.line_of(start);
        }
        self.last_line
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOM CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

struct TreeBuilder<'s> {
    tree: NodeTree,
    lines: LineLocator<'s>,
}

impl<'s> TreeBuilder<'s> {
    fn convert(&mut self, handle: &Handle, parent: Option<NodeId>) -> NodeId {
        let (kind, children) = match &handle.data {
            NodeData::Document => (NodeKind::Document, child_handles(handle)),
            NodeData::Doctype {
                name,
                public_id,
                system_id,
            } => (
                NodeKind::Doctype {
                    name: name.to_string(),
                    public_id: public_id.to_string(),
                    system_id: system_id.to_string(),
                },
                Vec::new(),
            ),
            NodeData::Text { contents } => (NodeKind::Text(contents.borrow().to_string()), Vec::new()),
            NodeData::Comment { contents } => (NodeKind::Comment(contents.to_string()), Vec::new()),
            NodeData::Element {
                name,
                attrs,
                template_contents,
                ..
            } => {
                let tag = name.local.to_string();
                let attributes = attrs
                    .borrow()
                    .iter()
                    .map(|attr| {
                        let local = correct_svg_attribute_name(&attr.name.local, &tag);
                        let name = match &attr.name.prefix {
                            Some(prefix) => format!("{}:{}", prefix, local),
                            None => local,
                        };
                        Attribute {
                            name,
                            value: attr.value.to_string(),
                        }
                    })
                    .collect();
                // <template> keeps its content in a separate fragment
                let children = match template_contents.borrow().as_ref() {
                    Some(contents) => child_handles(contents),
                    None => child_handles(handle),
                };
                (NodeKind::Element(Element { tag, attributes }), children)
            }
            NodeData::ProcessingInstruction { target, contents } => (
                NodeKind::Unknown(format!("<?{} {}?>", target, contents)),
                Vec::new(),
            ),
        };

        let line = match &kind {
            NodeKind::Element(element) => self.lines.element(&element.tag),
            NodeKind::Text(text) => self.lines.text(text),
            _ => self.lines.last_line,
        };
        let id = self.tree.push(kind, parent, line);
        for child in &children {
            self.convert(child, Some(id));
        }
        id
    }
}

fn child_handles(handle: &Handle) -> Vec<Handle> {
    handle.children.borrow().iter().cloned().collect()
}

fn find_child_element(handle: &Handle, tag: &str) -> Option<Handle> {
    handle
        .children
        .borrow()
        .iter()
        .find(|child| match &child.data {
            NodeData::Element { name, .. } => &*name.local == tag,
            _ => false,
        })
        .cloned()
}

/// Locate the synthetic `<x>` wrapper at `html > body > x`.
fn find_fragment_wrapper(document: &Handle) -> Option<Handle> {
    let html = find_child_element(document, "html")?;
    let body = find_child_element(&html, "body")?;
    find_child_element(&body, FRAGMENT_TAG)
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN PARSING FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a template into a node tree.
pub fn parse_template(source: &str, path: &str) -> Result<ParsedTemplate> {
    let fragment = !is_document(source);
    let prepared = convert_self_closing_tags(source);
    let markup = if fragment {
        format!("<{tag}>{}</{tag}>", prepared, tag = FRAGMENT_TAG)
    } else {
        prepared
    };

    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut markup.as_bytes())
        .map_err(|e| {
            TemplateSource::new(path, source).error(
                CompileErrorKind::Parse,
                format!("Failed to parse template: {}", e),
                1,
                "",
            )
        })?;

    let mut builder = TreeBuilder {
        tree: NodeTree::default(),
        lines: LineLocator::new(source),
    };

    match find_fragment_wrapper(&dom.document).filter(|_| fragment) {
        Some(wrapper) => {
            // The wrapper is synthetic: give it line 1 and map its children.
            let root = builder.tree.push(
                NodeKind::Element(Element {
                    tag: FRAGMENT_TAG.to_string(),
                    attributes: Vec::new(),
                }),
                None,
                1,
            );
            for child in &child_handles(&wrapper) {
                builder.convert(child, Some(root));
            }
            builder.tree.set_root(root);
        }
        None => {
            let root = builder.convert(&dom.document, None);
            builder.tree.set_root(root);
        }
    }

    log::trace!("parsed {} into {} nodes", path, builder.tree.len());

    Ok(ParsedTemplate {
        tree: builder.tree,
        fragment,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

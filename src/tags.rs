//! Static tag and attribute tables.
//!
//! Anything not listed in the HTML or SVG tables is treated as a component
//! invocation.

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

/// The wrapper element that renders only its children.
pub const FRAGMENT_TAG: &str = "x";

/// The element whose text content is a single inline expression.
pub const EXPRESSION_TAG: &str = "x-expr";

// ═══════════════════════════════════════════════════════════════════════════════
// HTML TAGS
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref HTML_TAGS: HashSet<&'static str> = [
        "a", "abbr", "acronym", "address", "area", "article", "aside", "audio",
        "b", "base", "bdi", "bdo", "blockquote", "body", "br", "button",
        "canvas", "caption", "cite", "code", "col", "colgroup", "content",
        "data", "datalist", "dd", "del", "details", "dfn", "dialog", "div", "dl", "dt",
        "em", "embed", "fieldset", "figcaption", "figure", "footer", "form",
        "frame", "frameset", "h1", "h2", "h3", "h4", "h5", "h6", "head", "header",
        "hgroup", "hr", "html", "i", "iframe", "image", "img", "input", "ins",
        "isindex", "kbd", "keygen", "label", "legend", "li", "link", "main", "map",
        "mark", "math", "menu", "menuitem", "meta", "meter", "multicol", "nav", "nobr",
        "noembed", "noframes", "noscript", "object", "ol", "optgroup", "option",
        "output", "p", "param", "picture", "pre", "progress", "q", "rp", "rt", "rtc",
        "ruby", "s", "samp", "script", "search", "section", "select", "slot", "small",
        "source", "span", "strong", "style", "sub", "summary", "sup", "table",
        "tbody", "td", "template", "textarea", "tfoot", "th", "thead", "time",
        "title", "tr", "track", "u", "ul", "var", "video", "wbr",
        FRAGMENT_TAG, EXPRESSION_TAG,
    ]
    .into_iter()
    .collect();

    /// SVG element names, lower-cased the way the HTML parser reports them
    /// outside foreign content.
    static ref SVG_TAGS: HashSet<&'static str> = [
        "svg", "path", "circle", "ellipse", "line", "polyline", "polygon", "rect", "g",
        "defs", "use", "symbol", "clippath", "mask", "pattern", "marker",
        "lineargradient", "radialgradient", "stop", "filter", "feblend",
        "fecolormatrix", "fecomponenttransfer", "fecomposite", "feconvolvematrix",
        "fediffuselighting", "fedisplacementmap", "fedropshadow", "feflood",
        "fefunca", "fefuncb", "fefuncg", "fefuncr", "fegaussianblur", "feimage",
        "femerge", "femergenode", "femorphology", "feoffset", "fespecularlighting",
        "fetile", "feturbulence", "foreignobject", "switch", "text", "tspan",
        "textpath", "desc", "metadata", "view", "animate", "animatemotion",
        "animatetransform", "set", "mpath",
    ]
    .into_iter()
    .collect();

    static ref VOID_ELEMENTS: HashSet<&'static str> = [
        "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link",
        "meta", "param", "source", "track", "wbr", "frame", "isindex",
    ]
    .into_iter()
    .collect();

    static ref BOOLEAN_ATTRIBUTES: HashSet<&'static str> = [
        "allowfullscreen", "async", "autofocus", "autoplay", "checked", "controls",
        "default", "defer", "disabled", "formnovalidate", "hidden", "inert", "ismap",
        "itemscope", "loop", "multiple", "muted", "nomodule", "novalidate", "open",
        "playsinline", "readonly", "required", "reversed", "selected",
    ]
    .into_iter()
    .collect();

    /// html5ever lowercases attribute names; SVG needs these back in camelCase.
    static ref SVG_ATTR_CASE_MAP: HashMap<&'static str, &'static str> = [
        ("viewbox", "viewBox"),
        ("preserveaspectratio", "preserveAspectRatio"),
        ("basefrequency", "baseFrequency"),
        ("clippathunits", "clipPathUnits"),
        ("gradienttransform", "gradientTransform"),
        ("gradientunits", "gradientUnits"),
        ("markerheight", "markerHeight"),
        ("markerunits", "markerUnits"),
        ("markerwidth", "markerWidth"),
        ("maskcontentunits", "maskContentUnits"),
        ("maskunits", "maskUnits"),
        ("numoctaves", "numOctaves"),
        ("pathlength", "pathLength"),
        ("patterncontentunits", "patternContentUnits"),
        ("patterntransform", "patternTransform"),
        ("patternunits", "patternUnits"),
        ("refx", "refX"),
        ("refy", "refY"),
        ("repeatcount", "repeatCount"),
        ("spreadmethod", "spreadMethod"),
        ("startoffset", "startOffset"),
        ("stddeviation", "stdDeviation"),
        ("textlength", "textLength"),
        ("attributename", "attributeName"),
        ("calcmode", "calcMode"),
    ]
    .into_iter()
    .collect();
}

pub fn is_html_tag(tag: &str) -> bool {
    HTML_TAGS.contains(tag) || SVG_TAGS.contains(tag)
}

/// Unknown tags invoke components.
pub fn is_component(tag: &str) -> bool {
    !is_html_tag(tag)
}

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(tag)
}

pub fn is_boolean_attribute(name: &str) -> bool {
    BOOLEAN_ATTRIBUTES.contains(name)
}

/// Elements whose text content is raw (never entity-escaped or interpolated).
pub fn is_raw_text(tag: &str) -> bool {
    matches!(tag, "script" | "style")
}

/// Elements whose text keeps its whitespace as written.
pub fn preserves_whitespace(tag: &str) -> bool {
    matches!(tag, "pre" | "code" | "textarea")
}

/// Restore camelCase for SVG attributes on SVG elements.
pub fn correct_svg_attribute_name(attr_name: &str, tag_name: &str) -> String {
    if SVG_TAGS.contains(tag_name) {
        if let Some(&corrected) = SVG_ATTR_CASE_MAP.get(attr_name) {
            return corrected.to_string();
        }
    }
    attr_name.to_string()
}

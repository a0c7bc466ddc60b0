//! Directive attributes and their priorities.
//!
//! An element may carry several directives; the one with the lowest priority
//! number governs how the element compiles and the rest stay attached for the
//! governing handler to consume.

use crate::tree::{Attribute, Element};

pub const DIRECTIVE_PREFIX: &str = "x-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    Component,
    If,
    Else,
    Each,
    As,
    Empty,
    Children,
    Include,
    With,
    Block,
    Literal,
    Tag,
    Unescape,
}

impl Directive {
    pub const ALL: [Directive; 13] = [
        Directive::Component,
        Directive::If,
        Directive::Else,
        Directive::Each,
        Directive::As,
        Directive::Empty,
        Directive::Children,
        Directive::Include,
        Directive::With,
        Directive::Block,
        Directive::Literal,
        Directive::Tag,
        Directive::Unescape,
    ];

    pub const fn priority(self) -> u8 {
        match self {
            Directive::Component => 1,
            Directive::If => 2,
            Directive::Else => 3,
            Directive::Each => 4,
            Directive::As => 5,
            Directive::Empty => 6,
            Directive::Children => 8,
            Directive::Include => 9,
            Directive::With => 10,
            Directive::Block => 11,
            Directive::Literal => 12,
            Directive::Tag => 13,
            Directive::Unescape => 14,
        }
    }

    pub const fn attribute_name(self) -> &'static str {
        match self {
            Directive::Component => "x-component",
            Directive::If => "x-if",
            Directive::Else => "x-else",
            Directive::Each => "x-each",
            Directive::As => "x-as",
            Directive::Empty => "x-empty",
            Directive::Children => "x-children",
            Directive::Include => "x-include",
            Directive::With => "x-with",
            Directive::Block => "x-block",
            Directive::Literal => "x-literal",
            Directive::Tag => "x-tag",
            Directive::Unescape => "x-unescape",
        }
    }

    pub fn from_attribute(name: &str) -> Option<Directive> {
        if !name.starts_with(DIRECTIVE_PREFIX) {
            return None;
        }
        Directive::ALL
            .into_iter()
            .find(|d| d.attribute_name() == name)
    }
}

/// The directive attributes of one element, ordered by priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveSet {
    entries: Vec<(Directive, String)>,
}

impl DirectiveSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The directive that decides how the element compiles.
    pub fn governing(&self) -> Option<Directive> {
        self.entries.first().map(|(d, _)| *d)
    }

    pub fn has(&self, directive: Directive) -> bool {
        self.entries.iter().any(|(d, _)| *d == directive)
    }

    pub fn get(&self, directive: Directive) -> Option<&str> {
        self.entries
            .iter()
            .find(|(d, _)| *d == directive)
            .map(|(_, v)| v.as_str())
    }

    /// Remove a directive, returning its value.
    pub fn take(&mut self, directive: Directive) -> Option<String> {
        let index = self.entries.iter().position(|(d, _)| *d == directive)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Directive, &str)> {
        self.entries.iter().map(|(d, v)| (*d, v.as_str()))
    }
}

/// Split an element's attributes into regular attributes and directives.
pub fn split_attributes(element: &Element) -> (Vec<Attribute>, DirectiveSet) {
    let mut attributes = Vec::new();
    let mut entries = Vec::new();
    for attr in &element.attributes {
        match Directive::from_attribute(&attr.name) {
            Some(directive) => entries.push((directive, attr.value.clone())),
            None => attributes.push(attr.clone()),
        }
    }
    entries.sort_by_key(|(d, _)| d.priority());
    (attributes, DirectiveSet { entries })
}

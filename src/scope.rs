//! Scope frames and collision-free variable names.
//!
//! Template names (`this`, loop aliases, `x-as` aliases) map to generated
//! JavaScript variables. Every construct that introduces variables raises the
//! depth counter, so nested loops or `x-with` blocks never reuse a name.

use lazy_static::lazy_static;
use regex::Regex;

/// The variable holding the component's own properties.
pub const ROOT_CONTEXT: &str = "props";

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFrame {
    bindings: Vec<(String, String)>,
}

impl ScopeFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        let name = name.into();
        let variable = variable.into();
        match self.bindings.iter_mut().find(|(n, _)| *n == name) {
            Some(binding) => binding.1 = variable,
            None => self.bindings.push((name, variable)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    frames: Vec<ScopeFrame>,
    depth: usize,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: ScopeFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<ScopeFrame> {
        self.frames.pop()
    }

    /// Number of frames on the stack.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Innermost binding for `name`.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// The variable `this` currently refers to.
    pub fn this_var(&self) -> &str {
        self.resolve("this").unwrap_or(ROOT_CONTEXT)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn enter(&mut self) {
        self.depth += 1;
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// `base` at depth zero, `base<depth>` below it.
    pub fn name_at(&self, base: &str, offset: usize) -> String {
        match self.depth + offset {
            0 => base.to_string(),
            depth => format!("{}{}", base, depth),
        }
    }

    /// Every generated variable in scope, outermost first, without duplicates.
    pub fn variables(&self) -> Vec<String> {
        let mut variables: Vec<String> = Vec::new();
        for frame in &self.frames {
            for (_, variable) in &frame.bindings {
                if !variables.contains(variable) {
                    variables.push(variable.clone());
                }
            }
        }
        variables
    }
}

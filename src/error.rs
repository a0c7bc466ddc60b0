//! Compile error reporting.
//!
//! Every failure surfaced by the compiler is a [`CompileError`]: the offending
//! fragment, the template line it came from, and a few lines of surrounding
//! source so a collaborator can render a useful diagnostic.

use serde::Serialize;
use thiserror::Error;

/// Lines of source shown on each side of the failing line.
const CONTEXT_RADIUS: usize = 2;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompileErrorKind {
    /// The markup parser could not read the template.
    Parse,
    /// An embedded expression failed to parse or uses a forbidden construct.
    Syntax,
    /// Directives were combined or placed in a way the compiler cannot honor.
    Structure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextLine {
    pub number: usize,
    pub text: String,
}

#[derive(Debug, Clone, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{message} in {path} on line {line}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub path: String,
    /// The fragment that failed (an expression or a directive tag).
    #[serde(rename = "source")]
    pub fragment: String,
    /// Character offset of the failure inside `fragment`, when known.
    pub source_position: Option<usize>,
    pub source_length: Option<usize>,
    pub line: usize,
    pub context_lines: Vec<ContextLine>,
}

/// The template being compiled, used to attach context to errors.
#[derive(Debug, Clone, Copy)]
pub struct TemplateSource<'a> {
    pub path: &'a str,
    pub text: &'a str,
}

impl<'a> TemplateSource<'a> {
    pub fn new(path: &'a str, text: &'a str) -> Self {
        Self { path, text }
    }

    pub fn error(
        &self,
        kind: CompileErrorKind,
        message: impl Into<String>,
        line: usize,
        fragment: impl Into<String>,
    ) -> CompileError {
        CompileError {
            kind,
            message: message.into(),
            path: self.path.to_string(),
            fragment: fragment.into(),
            source_position: None,
            source_length: None,
            line,
            context_lines: context_lines(self.text, line),
        }
    }

    pub fn structure(
        &self,
        message: impl Into<String>,
        line: usize,
        fragment: impl Into<String>,
    ) -> CompileError {
        self.error(CompileErrorKind::Structure, message, line, fragment)
    }
}

impl CompileError {
    pub fn at(mut self, position: Option<usize>, length: Option<usize>) -> Self {
        self.source_position = position;
        self.source_length = length;
        self
    }
}

fn context_lines(text: &str, line: usize) -> Vec<ContextLine> {
    if line == 0 {
        return Vec::new();
    }
    let first = line.saturating_sub(CONTEXT_RADIUS).max(1);
    let last = line + CONTEXT_RADIUS;
    text.lines()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .filter(|(number, _)| *number >= first && *number <= last)
        .map(|(number, text)| ContextLine {
            number,
            text: text.to_string(),
        })
        .collect()
}

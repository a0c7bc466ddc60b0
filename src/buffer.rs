//! Output buffering for generated JavaScript.
//!
//! A [`CodeBuffer`] collects the body of one callable. Literal markup and
//! computed values are coalesced into a single `$xtpl.echo(...)` statement
//! until a control-flow statement or an indent change closes it.
//!
//! A [`CompilerBuffer`] holds several named code buffers and switches between
//! them. It flushes either as component registrations (one callable per name)
//! or as a block map handed to a component include (names may repeat, in
//! which case the entry becomes an array of closures).

use crate::scope::{Scope, ScopeFrame};

/// The runtime object every generated artifact calls into.
pub const RUNTIME: &str = "$xtpl";

const INDENT: &str = "    ";

pub fn pad(level: usize) -> String {
    INDENT.repeat(level)
}

/// A JavaScript string literal. Line and paragraph separators are escaped
/// as well, since pre-ES2019 engines treat them as line terminators.
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callable {
    /// `function (props = {}, children = {}) { ... }`
    Component,
    /// A block closure that captures exactly these variables.
    Block { captures: Vec<String> },
}

// ═══════════════════════════════════════════════════════════════════════════════
// CODE BUFFER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct CodeBuffer {
    callable: Callable,
    code: String,
    literal: String,
    in_emit: bool,
    indent: usize,
    scope: Scope,
}

impl CodeBuffer {
    pub fn new(callable: Callable, scope: Scope) -> Self {
        Self {
            callable,
            code: String::new(),
            literal: String::new(),
            in_emit: false,
            indent: 0,
            scope,
        }
    }

    pub fn echo_literal(&mut self, text: &str) {
        self.literal.push_str(text);
    }

    pub fn echo_code(&mut self, expression: &str) {
        self.flush_literal();
        self.ensure_emit();
        self.code.push_str(expression);
    }

    /// Append a statement, closing any open emit statement first.
    pub fn append_code(&mut self, code: &str) {
        self.flush_emit();
        self.code.push_str(&pad(self.indent));
        self.code.push_str(code);
    }

    pub fn indent(&mut self, delta: isize) {
        self.flush_emit();
        self.indent = self.indent.saturating_add_signed(delta);
    }

    pub fn indent_level(&self) -> usize {
        self.indent
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    /// Opens an emit statement, or continues the open one with a separator.
    fn ensure_emit(&mut self) {
        if self.in_emit {
            self.code.push_str(",\n");
            self.code.push_str(&pad(self.indent + 1));
        } else {
            self.code.push_str(&pad(self.indent));
            self.code.push_str(RUNTIME);
            self.code.push_str(".echo(");
            self.in_emit = true;
        }
    }

    fn flush_literal(&mut self) {
        if self.literal.is_empty() {
            return;
        }
        self.ensure_emit();
        let literal = std::mem::take(&mut self.literal);
        self.code.push_str(&js_string(&literal));
    }

    fn flush_emit(&mut self) {
        self.flush_literal();
        if self.in_emit {
            self.code.push_str(");\n");
            self.in_emit = false;
        }
    }

    pub fn is_empty(&mut self) -> bool {
        self.flush_emit();
        self.code.trim().is_empty()
    }

    /// The body with every line shifted right by `level`.
    pub fn render(&mut self, level: usize) -> String {
        self.flush_emit();
        let prefix = pad(level);
        let mut out = String::with_capacity(self.code.len());
        for line in self.code.lines() {
            if !line.is_empty() {
                out.push_str(&prefix);
                out.push_str(line);
            }
            out.push('\n');
        }
        out
    }

    /// The buffer as a closure expression placed at `level`.
    fn closure(&mut self, level: usize) -> String {
        let captures = match &self.callable {
            Callable::Block { captures } => captures.join(", "),
            Callable::Component => "props, children".to_string(),
        };
        let body = self.render(level + 2);
        format!(
            "(function ({captures}) {{\n{inner}return function () {{\n{body}{inner}}};\n{outer}}})({captures})",
            captures = captures,
            inner = pad(level + 1),
            body = body,
            outer = pad(level),
        )
    }

    fn function(&mut self) -> String {
        format!(
            "function (props = {{}}, children = {{}}) {{\n{}}}",
            self.render(1)
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER BUFFER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Slot {
    Single(CodeBuffer),
    Many(Vec<CodeBuffer>),
}

impl Slot {
    fn get_mut(&mut self, index: usize) -> &mut CodeBuffer {
        match self {
            Slot::Single(buffer) => buffer,
            Slot::Many(buffers) => &mut buffers[index],
        }
    }

    fn get(&self, index: usize) -> &CodeBuffer {
        match self {
            Slot::Single(buffer) => buffer,
            Slot::Many(buffers) => &buffers[index],
        }
    }

    fn last_index(&self) -> usize {
        match self {
            Slot::Single(_) => 0,
            Slot::Many(buffers) => buffers.len().saturating_sub(1),
        }
    }

    fn push(&mut self, buffer: CodeBuffer) -> usize {
        let mut buffers = match std::mem::replace(self, Slot::Many(Vec::new())) {
            Slot::Single(first) => vec![first],
            Slot::Many(buffers) => buffers,
        };
        buffers.push(buffer);
        let index = buffers.len() - 1;
        *self = Slot::Many(buffers);
        index
    }
}

/// A handle to a previously selected buffer, used to switch back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    slot: usize,
    index: usize,
}

#[derive(Debug, Clone)]
pub struct CompilerBuffer {
    callable: Callable,
    scope: Scope,
    slots: Vec<(String, Slot)>,
    current: Selection,
}

impl CompilerBuffer {
    /// A buffer set whose default (unnamed) buffer starts out selected.
    /// New buffers start from `callable` and a copy of `scope`.
    pub fn new(callable: Callable, scope: Scope) -> Self {
        let default = CodeBuffer::new(callable.clone(), scope.clone());
        Self {
            callable,
            scope,
            slots: vec![(String::new(), Slot::Single(default))],
            current: Selection { slot: 0, index: 0 },
        }
    }

    /// Switch to the buffer called `name`, creating it when missing. With
    /// `append` an existing name gains another buffer instead of reusing it.
    pub fn select(&mut self, name: &str, append: bool) -> Selection {
        let previous = self.current;
        let fresh = CodeBuffer::new(self.callable.clone(), self.scope.clone());
        match self.slots.iter().position(|(n, _)| n == name) {
            None => {
                self.slots.push((name.to_string(), Slot::Single(fresh)));
                self.current = Selection {
                    slot: self.slots.len() - 1,
                    index: 0,
                };
            }
            Some(slot) => {
                let index = if append {
                    self.slots[slot].1.push(fresh)
                } else {
                    self.slots[slot].1.last_index()
                };
                self.current = Selection { slot, index };
            }
        }
        previous
    }

    pub fn restore(&mut self, selection: Selection) {
        self.current = selection;
    }

    fn buffer(&self) -> &CodeBuffer {
        self.slots[self.current.slot].1.get(self.current.index)
    }

    fn buffer_mut(&mut self) -> &mut CodeBuffer {
        let Selection { slot, index } = self.current;
        self.slots[slot].1.get_mut(index)
    }

    pub fn echo_literal(&mut self, text: &str) {
        self.buffer_mut().echo_literal(text);
    }

    pub fn echo_code(&mut self, expression: &str) {
        self.buffer_mut().echo_code(expression);
    }

    pub fn append_code(&mut self, code: &str) {
        self.buffer_mut().append_code(code);
    }

    pub fn indent(&mut self, delta: isize) {
        self.buffer_mut().indent(delta);
    }

    pub fn indent_level(&self) -> usize {
        self.buffer().indent_level()
    }

    pub fn scope(&self) -> &Scope {
        self.buffer().scope()
    }

    pub fn push_scope(&mut self, frame: ScopeFrame) {
        self.buffer_mut().scope_mut().push(frame);
    }

    pub fn pop_scope(&mut self) {
        self.buffer_mut().scope_mut().pop();
    }

    pub fn enter(&mut self) {
        self.buffer_mut().scope_mut().enter();
    }

    pub fn leave(&mut self) {
        self.buffer_mut().scope_mut().leave();
    }

    pub fn name_at(&self, base: &str, offset: usize) -> String {
        self.scope().name_at(base, offset)
    }

    /// Component registrations. The unnamed buffer is the template's own
    /// callable: registered under `basename`, or returned when `register` is
    /// off.
    pub fn flush_components(&mut self, basename: &str, register: bool) -> String {
        let mut parts = Vec::new();
        let mut root = None;
        for (name, slot) in &mut self.slots {
            let buffers: Vec<&mut CodeBuffer> = match slot {
                Slot::Single(buffer) => vec![buffer],
                Slot::Many(buffers) => buffers.iter_mut().collect(),
            };
            for buffer in buffers {
                let function = buffer.function();
                if name.is_empty() {
                    root = Some(function);
                } else {
                    parts.push(registration(name, &function));
                }
            }
        }
        let root = root.unwrap_or_else(|| "function (props = {}, children = {}) {\n}".to_string());
        if register {
            parts.insert(0, registration(basename, &root));
        } else {
            parts.push(format!("return {};", root));
        }
        let mut out = parts.join("\n\n");
        out.push('\n');
        out
    }

    /// A block map expression placed at `level`; empty buffers are skipped.
    pub fn flush_blocks(&mut self, level: usize) -> String {
        let mut entries = Vec::new();
        for (name, slot) in &mut self.slots {
            let key = if name.is_empty() {
                "0".to_string()
            } else {
                js_string(name)
            };
            match slot {
                Slot::Single(buffer) => {
                    if buffer.is_empty() {
                        continue;
                    }
                    entries.push(format!("{}{}: {}", pad(level + 1), key, buffer.closure(level + 1)));
                }
                Slot::Many(buffers) => {
                    let closures: Vec<String> = buffers
                        .iter_mut()
                        .filter_map(|buffer| {
                            if buffer.is_empty() {
                                None
                            } else {
                                Some(format!("{}{}", pad(level + 2), buffer.closure(level + 2)))
                            }
                        })
                        .collect();
                    if closures.is_empty() {
                        continue;
                    }
                    entries.push(format!(
                        "{}{}: [\n{}\n{}]",
                        pad(level + 1),
                        key,
                        closures.join(",\n"),
                        pad(level + 1)
                    ));
                }
            }
        }
        if entries.is_empty() {
            return "{}".to_string();
        }
        format!("{{\n{}\n{}}}", entries.join(",\n"), pad(level))
    }
}

fn registration(name: &str, function: &str) -> String {
    format!("{}.register({}, {});", RUNTIME, js_string(name), function)
}

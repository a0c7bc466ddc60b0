//! Directive compiler.
//!
//! Walks the node tree and turns every node into JavaScript that emits markup
//! through the `$xtpl` runtime. Elements are dispatched on their governing
//! directive (see [`crate::directive`]); unknown tags become component
//! includes; everything else is plain markup.
//!
//! Generated artifacts expect these runtime entry points:
//!
//! | call                               | purpose                                    |
//! |------------------------------------|--------------------------------------------|
//! | `$xtpl.echo(...parts)`             | append output                              |
//! | `$xtpl.escape(v)`                  | HTML-escape a value                        |
//! | `$xtpl.attribute(name, v)`         | render a boolean attribute (` name` or ``) |
//! | `$xtpl.write(name, props, blocks)` | render another component                   |
//! | `$xtpl.block(closureOrArray)`      | render child blocks                        |
//! | `$xtpl.call(name, ...args)`        | call an unregistered function              |
//! | `$xtpl.meta(name)`                 | read template metadata (`@name`)           |
//! | `$xtpl.register(name, fn)`         | register a component                       |
//! | `$xtpl.entries(v)`                 | `[key, value]` pairs of a list or map      |

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::buffer::{js_string, Callable, CompilerBuffer, RUNTIME};
use crate::directive::{split_attributes, Directive, DirectiveSet};
use crate::error::{CompileError, CompileErrorKind, Result, TemplateSource};
use crate::expression::ExpressionCompiler;
use crate::functions::FunctionRegistry;
use crate::parse::parse_template;
use crate::scope::{is_identifier, Scope, ScopeFrame, ROOT_CONTEXT};
use crate::tags::{
    is_boolean_attribute, is_component, is_raw_text, is_void, EXPRESSION_TAG, FRAGMENT_TAG,
};
use crate::tree::{
    doctype_markup, escape_attribute, escape_text, Attribute, NodeId, NodeKind, NodeTree,
};
use crate::whitespace;

lazy_static! {
    static ref TEXT_EXPRESSION_RE: Regex = Regex::new(r"\{\S[^}]*?\}").unwrap();
    static ref UNESCAPE_RE: Regex = Regex::new(r"(?s)^\{\s*unescape\((.+)\)\s*\}$").unwrap();
    static ref ATTRIBUTE_EXPRESSION_RE: Regex = Regex::new(r"(?s)^\{\S.*\}$").unwrap();
    static ref EACH_AS_RE: Regex =
        Regex::new(r"^(?:([A-Za-z_][A-Za-z0-9_]*)\s+)?([A-Za-z_][A-Za-z0-9_]*)$").unwrap();
    static ref LOOP_KEY_RE: Regex = Regex::new(r"^i(\d+)$").unwrap();
    static ref DEFAULT_COMPILER: Compiler = Compiler::default();
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    /// Name the template registers under.
    pub basename: String,
    /// Source path, used in error reports.
    pub path: String,
    /// Wrap the template in `$xtpl.register(...)` instead of returning it.
    pub emit_registration_wrapper: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            basename: String::new(),
            path: String::new(),
            emit_registration_wrapper: true,
        }
    }
}

impl CompileOptions {
    pub fn new(basename: impl Into<String>) -> Self {
        Self {
            basename: basename.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Return the callable instead of registering it.
    pub fn bare(mut self) -> Self {
        self.emit_registration_wrapper = false;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Compiler {
    functions: FunctionRegistry,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::with_functions(FunctionRegistry::with_builtins())
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_functions(functions: FunctionRegistry) -> Self {
        Self { functions }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    /// Compile a template into JavaScript source.
    pub fn compile(&self, source: &str, options: &CompileOptions) -> Result<String> {
        let source = source.trim();
        let parsed = parse_template(source, &options.path)?;

        let mut compilation = Compilation {
            tree: &parsed.tree,
            props: NodePropTable::new(parsed.tree.len()),
            functions: &self.functions,
            expressions: ExpressionCompiler::new(&self.functions),
            template: TemplateSource::new(&options.path, source),
        };

        let mut out = CompilerBuffer::new(Callable::Component, Scope::new());
        out.push_scope(ScopeFrame::new().bind("this", ROOT_CONTEXT));
        compilation.compile_children(parsed.tree.root(), &mut out)?;
        out.pop_scope();

        let code = out.flush_components(&options.basename, options.emit_registration_wrapper);
        log::debug!(
            "compiled {} ({} nodes, {} bytes)",
            if options.path.is_empty() { &options.basename } else { &options.path },
            parsed.tree.len(),
            code.len()
        );
        Ok(code)
    }
}

/// Compile with the built-in function registry.
pub fn compile(source: &str, options: &CompileOptions) -> Result<String> {
    DEFAULT_COMPILER.compile(source, options)
}

/// An artifact that renders the error instead of the template, for callers
/// that must always produce something.
pub fn fallback_artifact(error: &CompileError, options: &CompileOptions) -> String {
    let mut out = CompilerBuffer::new(Callable::Component, Scope::new());
    out.echo_literal(&format!(
        "<pre class=\"xtpl-error\">{}</pre>",
        escape_text(&error.to_string())
    ));
    out.flush_components(&options.basename, options.emit_registration_wrapper)
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeProps {
    /// Already compiled by a sibling's directive (`x-else`, `x-empty`).
    pub skip: bool,
    /// The node is a component include; its children are blocks.
    pub component_include: bool,
    /// Variable holding the dynamic tag name from `x-tag`.
    pub tag_variable: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NodePropTable {
    props: Vec<NodeProps>,
}

impl NodePropTable {
    pub fn new(len: usize) -> Self {
        Self {
            props: vec![NodeProps::default(); len],
        }
    }

    pub fn get(&self, id: NodeId) -> &NodeProps {
        &self.props[id]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut NodeProps {
        &mut self.props[id]
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILATION
// ═══════════════════════════════════════════════════════════════════════════════

fn escaped(expression: &str) -> String {
    format!("{}.escape({})", RUNTIME, expression)
}

/// Whether every `(` in `source` is closed in order, ignoring quoted text.
/// `unescape(a) + unescape(b)` captures `a) + unescape(b`, which is not.
fn balanced_parens(source: &str) -> bool {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaping = false;
    for c in source.chars() {
        match quote {
            Some(_) if escaping => escaping = false,
            Some(_) if c == '\\' => escaping = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '(' => depth += 1,
                ')' if depth == 0 => return false,
                ')' => depth -= 1,
                _ => {}
            },
        }
    }
    depth == 0
}

/// The inner source of a `{...}` attribute value.
fn attribute_expression(value: &str) -> Option<&str> {
    if ATTRIBUTE_EXPRESSION_RE.is_match(value) {
        Some(&value[1..value.len() - 1])
    } else {
        None
    }
}

/// `<tag x-if="...">` as written, used in comments and error reports.
fn directive_markup(tag: &str, directives: &DirectiveSet) -> String {
    let mut markup = format!("<{}", tag);
    for (directive, value) in directives.iter() {
        markup.push(' ');
        markup.push_str(directive.attribute_name());
        if !value.is_empty() {
            markup.push_str(&format!("=\"{}\"", escape_attribute(value)));
        }
    }
    markup.push('>');
    markup
}

fn comment_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.trim()
        .lines()
        .map(|line| line.trim_end().replace(['\u{2028}', '\u{2029}'], " "))
}

struct Compilation<'c> {
    tree: &'c NodeTree,
    props: NodePropTable,
    functions: &'c FunctionRegistry,
    expressions: ExpressionCompiler<'c>,
    template: TemplateSource<'c>,
}

impl<'c> Compilation<'c> {
    fn expression(&self, source: &str, id: NodeId, out: &CompilerBuffer) -> Result<String> {
        self.expressions.compile(source, out.scope()).map_err(|e| {
            self.template
                .error(CompileErrorKind::Syntax, e.message, self.tree.line(id), source)
                .at(e.offset, e.length)
        })
    }

    fn markup(&self, id: NodeId, directives: &DirectiveSet) -> String {
        directive_markup(self.tree.tag(id).unwrap_or(FRAGMENT_TAG), directives)
    }

    fn compile_node(&mut self, id: NodeId, out: &mut CompilerBuffer) -> Result<()> {
        if self.props.get(id).skip {
            return Ok(());
        }
        let tree = self.tree;
        match tree.kind(id) {
            NodeKind::Document => self.compile_children(id, out),
            NodeKind::Text(text) => self.compile_text(id, text, out),
            NodeKind::CData(text) => {
                out.echo_literal(text);
                Ok(())
            }
            NodeKind::Element(element) => {
                let (attrs, directives) = split_attributes(element);
                let inline = element.tag == EXPRESSION_TAG
                    && directives
                        .iter()
                        .all(|(d, _)| matches!(d, Directive::As | Directive::Unescape));
                if inline {
                    self.compile_expression_node(id, directives, true, out)
                } else {
                    self.compile_directives(id, &attrs, directives, out)
                }
            }
            NodeKind::Comment(text) => {
                for line in comment_lines(text) {
                    out.append_code(&format!("// {}\n", line));
                }
                Ok(())
            }
            kind @ NodeKind::Doctype { .. } => {
                out.echo_literal(&doctype_markup(kind));
                Ok(())
            }
            NodeKind::Unknown(markup) => {
                out.append_code("// Unknown node\n");
                for line in comment_lines(markup) {
                    out.append_code(&format!("// {}\n", line));
                }
                Ok(())
            }
        }
    }

    /// Compile children in order. `x-as` expressions open frames that stay
    /// visible to later siblings; they close once the last child is done.
    fn compile_children(&mut self, id: NodeId, out: &mut CompilerBuffer) -> Result<()> {
        let tree = self.tree;
        let frames = out.scope().len();
        for &child in tree.children(id) {
            self.compile_node(child, out)?;
        }
        while out.scope().len() > frames {
            out.pop_scope();
            out.leave();
            out.indent(-1);
            out.append_code("}\n");
        }
        Ok(())
    }

    fn compile_directives(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        directives: DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        let tree = self.tree;
        let tag = tree.tag(id).unwrap_or(FRAGMENT_TAG);
        match directives.governing() {
            Some(Directive::Component) => self.compile_component(id, attrs, directives, out),
            Some(Directive::If) => self.compile_if(id, attrs, directives, out),
            Some(Directive::Each) => self.compile_each(id, attrs, directives, out),
            Some(Directive::Children) => self.compile_children_slot(id, attrs, directives, out),
            Some(Directive::Include) => self.compile_include(id, attrs, directives, out),
            Some(Directive::With) if !is_component(tag) => {
                self.compile_with(id, attrs, directives, out)
            }
            Some(Directive::As) if directives.has(Directive::With) && !is_component(tag) => {
                self.compile_with(id, attrs, directives, out)
            }
            Some(Directive::Block) => self.compile_block(id, attrs, directives, out),
            Some(Directive::Literal) => self.compile_literal(id, attrs, directives, out),
            Some(orphan @ (Directive::Else | Directive::Empty)) => {
                let required = if orphan == Directive::Else {
                    Directive::If
                } else {
                    Directive::Each
                };
                Err(self.template.structure(
                    format!(
                        "{} must follow an element with {}",
                        orphan.attribute_name(),
                        required.attribute_name()
                    ),
                    tree.line(id),
                    self.markup(id, &directives),
                ))
            }
            Some(Directive::With | Directive::As | Directive::Tag | Directive::Unescape) | None => {
                if tag == EXPRESSION_TAG {
                    self.compile_expression_node(id, directives, false, out)
                } else if is_component(tag) {
                    self.compile_include(id, attrs, directives, out)
                } else {
                    self.compile_element(id, attrs, &directives, out)
                }
            }
        }
    }

    /// Emit the directive tag as a source comment, unless a template comment
    /// already sits right before it.
    fn compile_tag_comment(&self, id: NodeId, directives: &DirectiveSet, out: &mut CompilerBuffer) {
        let tree = self.tree;
        let mut previous = tree.previous_sibling(id);
        while let Some(sibling) = previous.filter(|&n| tree.is_empty_text(n)) {
            previous = tree.previous_sibling(sibling);
        }
        if previous.map_or(false, |n| tree.is_comment(n)) {
            return;
        }
        for line in comment_lines(&self.markup(id, directives)) {
            out.append_code(&format!("// {}\n", line));
        }
    }

    /// Find the `x-else`/`x-empty` partner of a node: first among following
    /// siblings separated only by whitespace, then among the node's own
    /// children. A child partner directly after a nested `parent` directive
    /// belongs to that nested element instead.
    fn find_special_node(&self, id: NodeId, directive: Directive, parent: Directive) -> Option<NodeId> {
        let tree = self.tree;
        let name = directive.attribute_name();

        let mut sibling = tree.next_sibling(id);
        while let Some(candidate) = sibling {
            if tree.has_attribute(candidate, name) {
                return Some(candidate);
            }
            if !tree.is_empty_text(candidate) {
                break;
            }
            sibling = tree.next_sibling(candidate);
        }

        let mut nested_parent = false;
        for &child in tree.children(id) {
            if tree.is_element(child) {
                if !nested_parent && tree.has_attribute(child, name) {
                    return Some(child);
                }
                nested_parent = tree.has_attribute(child, parent.attribute_name());
            } else if !tree.is_empty_text(child) {
                nested_parent = false;
            }
        }
        None
    }

    fn compile_partner(&mut self, id: NodeId, directive: Directive, out: &mut CompilerBuffer) -> Result<()> {
        let tree = self.tree;
        if let Some(element) = tree.element(id) {
            let (attrs, mut directives) = split_attributes(element);
            directives.take(directive);
            self.compile_directives(id, &attrs, directives, out)?;
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // x-if / x-else
    // ───────────────────────────────────────────────────────────────────────────

    fn compile_if(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        mut directives: DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        self.compile_tag_comment(id, &directives, out);
        let source = directives.take(Directive::If).unwrap_or_default();
        let condition = self.expression(&source, id, out)?;

        let partner = self.find_special_node(id, Directive::Else, Directive::If);
        if let Some(partner) = partner {
            self.props.get_mut(partner).skip = true;
        }

        out.append_code(&format!("if ({}) {{\n", condition));
        out.indent(1);
        self.compile_directives(id, attrs, directives, out)?;
        out.indent(-1);

        if let Some(partner) = partner {
            out.append_code("} else {\n");
            out.indent(1);
            self.compile_partner(partner, Directive::Else, out)?;
            out.indent(-1);
        }
        out.append_code("}\n");
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // x-each / x-as / x-empty
    // ───────────────────────────────────────────────────────────────────────────

    fn compile_each(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        mut directives: DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        self.compile_tag_comment(id, &directives, out);
        self.compile_open_tag(id, attrs, &directives, out, false)?;

        match self.find_special_node(id, Directive::Empty, Directive::Each) {
            None => self.compile_each_loop(id, &mut directives, out)?,
            Some(partner) => {
                self.props.get_mut(partner).skip = true;
                let source = directives.get(Directive::Each).unwrap_or_default().to_string();
                let iterable = self.expression(&source, id, out)?;
                let check = self.functions.compile_call("empty", &[iterable]);

                out.append_code(&format!("if ({}) {{\n", check));
                out.indent(1);
                self.compile_partner(partner, Directive::Empty, out)?;
                out.indent(-1);
                out.append_code("} else {\n");
                out.indent(1);
                self.compile_each_loop(id, &mut directives, out)?;
                out.indent(-1);
                out.append_code("}\n");
            }
        }

        self.compile_close_tag(id, out, false);
        Ok(())
    }

    fn compile_each_loop(
        &mut self,
        id: NodeId,
        directives: &mut DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        let source = directives.take(Directive::Each).unwrap_or_default();
        let iterable = self.expression(&source, id, out)?;
        let key = out.name_at("i", 1);
        let value = out.name_at("props", 1);

        let clause = directives
            .take(Directive::As)
            .map(|clause| clause.trim().to_string())
            .filter(|clause| !clause.is_empty());
        let (frame, indexed) = match clause {
            None => (ScopeFrame::new().bind("this", &value), false),
            Some(clause) => {
                let caps = EACH_AS_RE.captures(&clause).ok_or_else(|| {
                    self.template.structure(
                        format!("Invalid x-as clause \"{}\", expected \"[key] value\"", clause),
                        self.tree.line(id),
                        clause.clone(),
                    )
                })?;
                let frame = ScopeFrame::new().bind(&caps[2], &value);
                match caps.get(1) {
                    Some(alias) => (frame.bind(alias.as_str(), &key), true),
                    None => (frame, false),
                }
            }
        };

        if indexed {
            let entries = out.name_at("entries", 1);
            let count = out.name_at("count", 1);
            let index = out.name_at("index", 1);
            let first = out.name_at("first", 1);
            let last = out.name_at("last", 1);
            out.append_code("{\n");
            out.indent(1);
            out.append_code(&format!("const {} = {}.entries({});\n", entries, RUNTIME, iterable));
            out.append_code(&format!("const {} = {}.length;\n", count, entries));
            out.append_code(&format!(
                "for (let {index} = 0; {index} < {count}; {index}++) {{\n",
                index = index,
                count = count
            ));
            out.indent(1);
            out.append_code(&format!("const [{}, {}] = {}[{}];\n", key, value, entries, index));
            out.append_code(&format!("const {} = {} === 0;\n", first, index));
            out.append_code(&format!("const {} = {} === {} - 1;\n", last, index, count));
        } else {
            out.append_code(&format!(
                "for (const [{}, {}] of {}.entries({})) {{\n",
                key, value, RUNTIME, iterable
            ));
            out.indent(1);
        }

        out.enter();
        out.push_scope(frame);
        self.compile_children(id, out)?;
        out.pop_scope();
        out.leave();

        out.indent(-1);
        out.append_code("}\n");
        if indexed {
            out.indent(-1);
            out.append_code("}\n");
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // x-with
    // ───────────────────────────────────────────────────────────────────────────

    fn compile_with(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        mut directives: DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        self.compile_tag_comment(id, &directives, out);
        let source = directives.take(Directive::With).unwrap_or_default();
        let context = self.expression(&source, id, out)?;
        let name = match self.alias(id, &mut directives)? {
            Some(alias) => alias,
            None => "this".to_string(),
        };

        out.enter();
        let variable = out.name_at("props", 0);
        out.append_code("{\n");
        out.indent(1);
        out.append_code(&format!("const {} = {};\n", variable, context));
        out.push_scope(ScopeFrame::new().bind(name, &variable));
        self.compile_directives(id, attrs, directives, out)?;
        out.pop_scope();
        out.indent(-1);
        out.append_code("}\n");
        out.leave();
        Ok(())
    }

    /// A validated `x-as` alias, if present.
    fn alias(&self, id: NodeId, directives: &mut DirectiveSet) -> Result<Option<String>> {
        let alias = match directives.take(Directive::As) {
            Some(alias) if !alias.trim().is_empty() => alias.trim().to_string(),
            _ => return Ok(None),
        };
        if !is_identifier(&alias) {
            return Err(self.template.structure(
                format!("Invalid x-as alias \"{}\"", alias),
                self.tree.line(id),
                alias,
            ));
        }
        Ok(Some(alias))
    }

    // ───────────────────────────────────────────────────────────────────────────
    // x-component / x-block / component includes
    // ───────────────────────────────────────────────────────────────────────────

    fn compile_component(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        mut directives: DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        let name = directives
            .take(Directive::Component)
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if name.is_empty() {
            return Err(self.template.structure(
                "x-component needs a component name",
                self.tree.line(id),
                self.markup(id, &directives),
            ));
        }
        let props = &self.props;
        if self.tree.closest(id, |n| props.get(n).component_include).is_some() {
            return Err(self.template.structure(
                "x-component cannot be used inside component child blocks",
                self.tree.line(id),
                self.markup(id, &directives),
            ));
        }

        let previous = out.select(&name, false);
        out.push_scope(ScopeFrame::new().bind("this", ROOT_CONTEXT));
        let result = self.compile_directives(id, attrs, directives, out);
        out.pop_scope();
        out.restore(previous);
        result
    }

    fn compile_block(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        mut directives: DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        let tree = self.tree;
        let line = tree.line(id);
        let in_include = tree
            .parent(id)
            .map(|parent| self.props.get(parent).component_include)
            .unwrap_or(false);
        if !in_include {
            return Err(self.template.structure(
                "x-block elements must be direct children of a component include",
                line,
                self.markup(id, &directives),
            ));
        }

        let name = directives
            .take(Directive::Block)
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if !is_identifier(&name) {
            return Err(self.template.structure(
                format!("Invalid x-block name \"{}\"", name),
                line,
                name,
            ));
        }

        let previous = out.select(&name, true);
        let result = self.compile_directives(id, attrs, directives, out);
        out.restore(previous);
        result
    }

    fn compile_include(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        mut directives: DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        let tree = self.tree;
        let tag = tree.tag(id).unwrap_or(FRAGMENT_TAG);
        self.props.get_mut(id).component_include = true;

        let mut entries = Vec::with_capacity(attrs.len());
        for attr in attrs {
            let value = match attribute_expression(&attr.value) {
                Some(source) => {
                    let compiled = self.expression(source, id, out)?;
                    self.functions.apply_attribute_hook(tag, &attr.name, compiled)
                }
                None => js_string(&attr.value),
            };
            entries.push(format!("{}: {}", js_string(&attr.name), value));
        }

        let props = match directives.take(Directive::With) {
            Some(source) => {
                let context = self.expression(&source, id, out)?;
                if entries.is_empty() {
                    context
                } else {
                    format!("{{...{}, {}}}", context, entries.join(", "))
                }
            }
            None if entries.is_empty() => out.scope().this_var().to_string(),
            None => format!("{{{}}}", entries.join(", ")),
        };

        let blocks = self.compile_blocks(id, out)?;
        let name = match directives.take(Directive::Include) {
            Some(source) => self.expression(&source, id, out)?,
            None => js_string(tag),
        };

        out.append_code(&format!("{}.write({}, {}, {});\n", RUNTIME, name, props, blocks));
        Ok(())
    }

    /// The children of an include as a block map. Children outside an
    /// `x-block` form the default block, key `0`. Closures capture every
    /// loop variable in scope, including the metadata of indexed loops.
    fn compile_blocks(&mut self, id: NodeId, out: &CompilerBuffer) -> Result<String> {
        let tree = self.tree;
        let mut captures = Vec::new();
        for variable in out.scope().variables() {
            let depth = LOOP_KEY_RE
                .captures(&variable)
                .map(|caps| caps[1].to_string());
            captures.push(variable);
            if let Some(depth) = depth {
                for meta in ["index", "first", "last", "count"] {
                    captures.push(format!("{}{}", meta, depth));
                }
            }
        }
        captures.push("children".to_string());
        let mut blocks = CompilerBuffer::new(Callable::Block { captures }, out.scope().clone());

        if !tree.is_empty_node(id) {
            for &child in tree.children(id) {
                if tree.is_empty_text(child) {
                    continue;
                }
                self.compile_node(child, &mut blocks)?;
            }
        }

        Ok(blocks.flush_blocks(out.indent_level()))
    }

    // ───────────────────────────────────────────────────────────────────────────
    // x-children / x-literal
    // ───────────────────────────────────────────────────────────────────────────

    fn compile_children_slot(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        mut directives: DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        let name = directives
            .take(Directive::Children)
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let key = if name.is_empty() {
            "0".to_string()
        } else {
            js_string(&name)
        };

        self.compile_open_tag(id, attrs, &directives, out, true)?;
        out.append_code(&format!("if (children?.[{}] !== undefined) {{\n", key));
        out.indent(1);
        out.append_code(&format!("{}.block(children[{}]);\n", RUNTIME, key));
        out.indent(-1);
        out.append_code("}\n");
        self.compile_close_tag(id, out, true);
        Ok(())
    }

    fn compile_literal(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        mut directives: DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        let tree = self.tree;
        self.compile_tag_comment(id, &directives, out);
        directives.take(Directive::Literal);
        self.compile_open_tag(id, attrs, &directives, out, false)?;
        for &child in tree.children(id) {
            out.echo_literal(&tree.outer_html(child));
        }
        self.compile_close_tag(id, out, false);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Plain markup
    // ───────────────────────────────────────────────────────────────────────────

    fn compile_element(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        directives: &DirectiveSet,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        self.compile_open_tag(id, attrs, directives, out, false)?;
        self.compile_children(id, out)?;
        self.compile_close_tag(id, out, false);
        Ok(())
    }

    fn compile_open_tag(
        &mut self,
        id: NodeId,
        attrs: &[Attribute],
        directives: &DirectiveSet,
        out: &mut CompilerBuffer,
        force_close: bool,
    ) -> Result<()> {
        let tree = self.tree;
        let tag = tree.tag(id).unwrap_or(FRAGMENT_TAG);

        if let Some(source) = directives.get(Directive::Tag) {
            let name = self.expression(source, id, out)?;
            out.enter();
            let variable = out.name_at("tag", 0);
            out.append_code("{\n");
            out.indent(1);
            out.append_code(&format!("const {} = {};\n", variable, name));
            out.append_code(&format!("if ({}) {{\n", variable));
            out.indent(1);
            out.echo_literal("<");
            out.echo_code(&variable);
            self.compile_attributes(id, tag, attrs, out)?;
            out.echo_literal(">");
            out.indent(-1);
            out.append_code("}\n");
            self.props.get_mut(id).tag_variable = Some(variable);
            return Ok(());
        }

        if tag == FRAGMENT_TAG {
            return Ok(());
        }
        out.echo_literal(&format!("<{}", tag));
        self.compile_attributes(id, tag, attrs, out)?;
        let self_closing = !force_close && !tree.has_children(id) && is_void(tag);
        out.echo_literal(if self_closing { " />" } else { ">" });
        Ok(())
    }

    fn compile_close_tag(&mut self, id: NodeId, out: &mut CompilerBuffer, force_close: bool) {
        let tree = self.tree;
        let tag = tree.tag(id).unwrap_or(FRAGMENT_TAG);

        if let Some(variable) = self.props.get(id).tag_variable.clone() {
            out.append_code(&format!("if ({}) {{\n", variable));
            out.indent(1);
            out.echo_literal("</");
            out.echo_code(&variable);
            out.echo_literal(">");
            out.indent(-1);
            out.append_code("}\n");
            out.indent(-1);
            out.append_code("}\n");
            out.leave();
            return;
        }

        if tag == FRAGMENT_TAG {
            return;
        }
        if force_close || tree.has_children(id) || !is_void(tag) {
            out.echo_literal(&format!("</{}>", tag));
        }
    }

    fn compile_attributes(
        &mut self,
        id: NodeId,
        tag: &str,
        attrs: &[Attribute],
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        for attr in attrs {
            match attribute_expression(&attr.value) {
                Some(source) => {
                    let compiled = self.expression(source, id, out)?;
                    let compiled = self.functions.apply_attribute_hook(tag, &attr.name, compiled);
                    if is_boolean_attribute(&attr.name) {
                        out.echo_code(&format!(
                            "{}.attribute({}, {})",
                            RUNTIME,
                            js_string(&attr.name),
                            compiled
                        ));
                    } else {
                        out.echo_literal(&format!(" {}=\"", attr.name));
                        out.echo_code(&escaped(&compiled));
                        out.echo_literal("\"");
                    }
                }
                None if is_boolean_attribute(&attr.name)
                    && (attr.value.is_empty() || attr.value.eq_ignore_ascii_case(&attr.name)) =>
                {
                    out.echo_literal(&format!(" {}", attr.name));
                }
                None => {
                    out.echo_literal(&format!(" {}=\"{}\"", attr.name, escape_attribute(&attr.value)));
                }
            }
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Text and inline expressions
    // ───────────────────────────────────────────────────────────────────────────

    fn compile_text(&mut self, id: NodeId, text: &str, out: &mut CompilerBuffer) -> Result<()> {
        let tree = self.tree;
        let props = &self.props;
        let text = whitespace::normalize(tree, id, text, &|n| props.get(n).skip);

        let raw = tree
            .parent(id)
            .and_then(|p| tree.tag(p))
            .map(is_raw_text)
            .unwrap_or(false);
        if raw {
            out.echo_literal(&text);
            return Ok(());
        }

        let mut last = 0;
        for token in TEXT_EXPRESSION_RE.find_iter(&text) {
            out.echo_literal(&escape_text(&text[last..token.start()]));
            let unescaped = UNESCAPE_RE
                .captures(token.as_str())
                .and_then(|caps| caps.get(1))
                .filter(|argument| balanced_parens(argument.as_str()));
            let code = match unescaped {
                Some(argument) => self.expression(argument.as_str(), id, out)?,
                None => {
                    let source = token.as_str();
                    escaped(&self.expression(&source[1..source.len() - 1], id, out)?)
                }
            };
            out.echo_code(&code);
            last = token.end();
        }
        out.echo_literal(&escape_text(&text[last..]));
        Ok(())
    }

    /// `<x-expr>`: the element's text is one expression. With `x-as` the value
    /// is bound for the following siblings instead of being emitted.
    fn compile_expression_node(
        &mut self,
        id: NodeId,
        mut directives: DirectiveSet,
        direct_child: bool,
        out: &mut CompilerBuffer,
    ) -> Result<()> {
        let tree = self.tree;
        let line = tree.line(id);
        let content = tree.text_content(id);
        let compiled = self.expression(content.trim(), id, out)?;

        let markup = self.markup(id, &directives);
        match self.alias(id, &mut directives)? {
            Some(alias) => {
                if !direct_child {
                    return Err(self.template.structure(
                        "x-as on x-expr cannot be combined with other directives",
                        line,
                        markup,
                    ));
                }
                let props = &self.props;
                if tree.closest(id, |n| props.get(n).component_include).is_some() {
                    return Err(self.template.structure(
                        "x-expr with x-as cannot be used inside component child blocks",
                        line,
                        markup,
                    ));
                }
                out.enter();
                let variable = out.name_at("expr", 0);
                out.append_code("{\n");
                out.indent(1);
                out.append_code(&format!("const {} = {};\n", variable, compiled));
                out.push_scope(ScopeFrame::new().bind(alias, &variable));
            }
            None if directives.has(Directive::Unescape) => out.echo_code(&compiled),
            None => out.echo_code(&escaped(&compiled)),
        }
        Ok(())
    }
}

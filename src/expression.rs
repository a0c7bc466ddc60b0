//! Template expression compiler.
//!
//! Expressions are parsed with oxc and re-emitted as JavaScript with every
//! name resolved against the template scope:
//!
//! - names bound in scope become their generated variable,
//! - `@name` reads template metadata through `$xtpl.meta("name")`,
//! - any other bare name is a key of the current `this` context,
//! - calls go through the [`FunctionRegistry`] compile hooks.
//!
//! The language is restricted to literals, member access, calls, arrow
//! functions and operators. Anything that could mutate state is rejected.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    ArrowFunctionExpression, AssignmentExpression, AwaitExpression, BindingPattern,
    CallExpression, Class, Expression, Function, NewExpression, ObjectPropertyKind, PropertyKey,
    SequenceExpression, Statement, TaggedTemplateExpression, TemplateLiteral, UpdateExpression,
    YieldExpression,
};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use oxc_syntax::scope::ScopeFlags;
use regex::Regex;
use thiserror::Error;

use crate::buffer::{js_string, RUNTIME};
use crate::functions::FunctionRegistry;
use crate::scope::Scope;

/// `@name` is rewritten to `$name` before parsing; same width, so error
/// offsets still point into the original text.
const META_SIGIL: char = '$';

lazy_static! {
    static ref LABEL_SPAN_RE: Regex =
        Regex::new(r"offset: SourceOffset\((\d+)\),\s*length: (\d+)").unwrap();
    /// Loop key variables minted by `x-each`.
    static ref LOOP_INDEX_RE: Regex = Regex::new(r"^i(\d+)$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExpressionError {
    pub message: String,
    /// Offset into the expression text.
    pub offset: Option<usize>,
    pub length: Option<usize>,
}

impl ExpressionError {
    fn at(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            offset: Some(span.start as usize),
            length: Some((span.end - span.start) as usize),
        }
    }

    fn rejected(construct: &str, span: Span) -> Self {
        Self::at(
            format!("{} are not allowed in template expressions", construct),
            span,
        )
    }

    fn from_diagnostic<D: std::fmt::Display + std::fmt::Debug>(diagnostic: &D) -> Self {
        let debug = format!("{:?}", diagnostic);
        let span = LABEL_SPAN_RE.captures(&debug);
        let number = |i: usize| -> Option<usize> {
            span.as_ref()
                .and_then(|c| c.get(i))
                .and_then(|m| m.as_str().parse().ok())
        };
        Self {
            message: diagnostic.to_string(),
            offset: number(1),
            length: number(2),
        }
    }
}

/// Resolves template names to generated variables.
pub trait NameResolver {
    fn resolve(&self, name: &str) -> Option<&str>;

    /// The variable behind `this`.
    fn this_var(&self) -> &str;
}

impl NameResolver for Scope {
    fn resolve(&self, name: &str) -> Option<&str> {
        Scope::resolve(self, name)
    }

    fn this_var(&self) -> &str {
        Scope::this_var(self)
    }
}

pub struct ExpressionCompiler<'r> {
    functions: &'r FunctionRegistry,
}

impl<'r> ExpressionCompiler<'r> {
    pub fn new(functions: &'r FunctionRegistry) -> Self {
        Self { functions }
    }

    pub fn compile(&self, source: &str, names: &dyn NameResolver) -> Result<String, ExpressionError> {
        let prepared = mark_metadata(source);
        let allocator = Allocator::default();
        let source_type = SourceType::default();

        let expr = Parser::new(&allocator, &prepared, source_type)
            .parse_expression()
            .map_err(|errors| match errors.first() {
                Some(first) => ExpressionError::from_diagnostic(first),
                None => ExpressionError {
                    message: "Invalid expression".to_string(),
                    offset: None,
                    length: None,
                },
            })?;

        let consumed = expr.span().end as usize;
        let rest = source.get(consumed..).unwrap_or("");
        let trailing = rest.trim_start();
        if !trailing.trim_end().is_empty() {
            let offset = consumed + (rest.len() - trailing.len());
            let token = trailing.split_whitespace().next().unwrap_or(trailing);
            return Err(ExpressionError {
                message: format!("Unexpected \"{}\" after expression", token),
                offset: Some(offset),
                length: Some(token.len()),
            });
        }

        let mut guard = ConstructGuard::default();
        guard.visit_expression(&expr);
        if let Some(violation) = guard.violation {
            return Err(violation);
        }

        let mut emitter = Emitter {
            functions: self.functions,
            names,
            params: Vec::new(),
        };
        emitter.emit(&expr)
    }
}

fn mark_metadata(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '\'' || c == '"' || c == '`' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '@'
                && chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                out.push(META_SIGIL);
            }
            None => out.push(c),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// FORBIDDEN CONSTRUCTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct ConstructGuard {
    violation: Option<ExpressionError>,
}

impl ConstructGuard {
    fn reject(&mut self, construct: &str, span: Span) {
        if self.violation.is_none() {
            self.violation = Some(ExpressionError::rejected(construct, span));
        }
    }
}

impl<'a> Visit<'a> for ConstructGuard {
    fn visit_assignment_expression(&mut self, it: &AssignmentExpression<'a>) {
        self.reject("Assignments", it.span);
    }

    fn visit_update_expression(&mut self, it: &UpdateExpression<'a>) {
        self.reject("Increment and decrement operators", it.span);
    }

    fn visit_sequence_expression(&mut self, it: &SequenceExpression<'a>) {
        self.reject("Comma sequences", it.span);
    }

    fn visit_new_expression(&mut self, it: &NewExpression<'a>) {
        self.reject("Constructor calls", it.span);
    }

    fn visit_function(&mut self, it: &Function<'a>, _flags: ScopeFlags) {
        self.reject("Function expressions", it.span);
    }

    fn visit_class(&mut self, it: &Class<'a>) {
        self.reject("Classes", it.span);
    }

    fn visit_await_expression(&mut self, it: &AwaitExpression<'a>) {
        self.reject("Await expressions", it.span);
    }

    fn visit_yield_expression(&mut self, it: &YieldExpression<'a>) {
        self.reject("Yield expressions", it.span);
    }

    fn visit_template_literal(&mut self, it: &TemplateLiteral<'a>) {
        self.reject("Template literals", it.span);
    }

    fn visit_tagged_template_expression(&mut self, it: &TaggedTemplateExpression<'a>) {
        self.reject("Tagged templates", it.span);
    }

    fn visit_arrow_function_expression(&mut self, it: &ArrowFunctionExpression<'a>) {
        if it.r#async {
            self.reject("Async arrow functions", it.span);
        } else if !it.expression {
            self.reject("Arrow function bodies with statements", it.span);
        } else {
            oxc_ast_visit::walk::walk_arrow_function_expression(self, it);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EMISSION
// ═══════════════════════════════════════════════════════════════════════════════

struct Emitter<'c> {
    functions: &'c FunctionRegistry,
    names: &'c dyn NameResolver,
    /// Arrow parameters in scope, innermost last.
    params: Vec<String>,
}

impl<'c> Emitter<'c> {
    fn emit(&mut self, expr: &Expression) -> Result<String, ExpressionError> {
        let code = match expr {
            Expression::BooleanLiteral(lit) => lit.value.to_string(),
            Expression::NullLiteral(_) => "null".to_string(),
            Expression::NumericLiteral(lit) => lit.value.to_string(),
            Expression::StringLiteral(lit) => js_string(lit.value.as_str()),
            Expression::ThisExpression(_) => self.names.this_var().to_string(),
            Expression::Identifier(id) => self.resolve(id.name.as_str()),

            Expression::StaticMemberExpression(member) => {
                let property = member.property.name.as_str();
                if let Some(meta) = self.loop_meta(&member.object, property) {
                    return Ok(meta);
                }
                format!("{}?.[{}]", self.emit(&member.object)?, js_string(property))
            }
            Expression::ComputedMemberExpression(member) => format!(
                "{}?.[{}]",
                self.emit(&member.object)?,
                self.emit(&member.expression)?
            ),

            Expression::CallExpression(call) => self.emit_call(call)?,
            Expression::ArrowFunctionExpression(arrow) => self.emit_arrow(arrow)?,

            Expression::UnaryExpression(unary) => {
                let operator = unary.operator.as_str();
                if operator == "delete" {
                    return Err(ExpressionError::rejected("Delete operations", unary.span));
                }
                let argument = self.emit(&unary.argument)?;
                let sign_clash = matches!(operator, "-" | "+")
                    && (argument.starts_with('-') || argument.starts_with('+'));
                if sign_clash || operator.chars().all(|c| c.is_ascii_alphabetic()) {
                    format!("{} {}", operator, argument)
                } else {
                    format!("{}{}", operator, argument)
                }
            }
            Expression::BinaryExpression(binary) => format!(
                "{} {} {}",
                self.emit(&binary.left)?,
                binary.operator.as_str(),
                self.emit(&binary.right)?
            ),
            Expression::LogicalExpression(logical) => format!(
                "{} {} {}",
                self.emit(&logical.left)?,
                logical.operator.as_str(),
                self.emit(&logical.right)?
            ),
            Expression::ConditionalExpression(cond) => format!(
                "{} ? {} : {}",
                self.emit(&cond.test)?,
                self.emit(&cond.consequent)?,
                self.emit(&cond.alternate)?
            ),
            Expression::ParenthesizedExpression(paren) => {
                format!("({})", self.emit(&paren.expression)?)
            }

            Expression::ArrayExpression(array) => {
                let mut elements = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    match element.as_expression() {
                        Some(e) => elements.push(self.emit(e)?),
                        None => {
                            return Err(ExpressionError::rejected(
                                "Spreads and holes in arrays",
                                element.span(),
                            ))
                        }
                    }
                }
                format!("[{}]", elements.join(", "))
            }
            Expression::ObjectExpression(object) => {
                let mut properties = Vec::with_capacity(object.properties.len());
                for property in &object.properties {
                    match property {
                        ObjectPropertyKind::ObjectProperty(p) => {
                            let key = if p.computed {
                                match p.key.as_expression() {
                                    Some(e) => format!("[{}]", self.emit(e)?),
                                    None => {
                                        return Err(ExpressionError::at(
                                            "Unsupported object key",
                                            p.key.span(),
                                        ))
                                    }
                                }
                            } else {
                                match &p.key {
                                    PropertyKey::StaticIdentifier(id) => js_string(id.name.as_str()),
                                    PropertyKey::StringLiteral(s) => js_string(s.value.as_str()),
                                    PropertyKey::NumericLiteral(n) => n.value.to_string(),
                                    other => {
                                        return Err(ExpressionError::at(
                                            "Unsupported object key",
                                            other.span(),
                                        ))
                                    }
                                }
                            };
                            properties.push(format!("{}: {}", key, self.emit(&p.value)?));
                        }
                        ObjectPropertyKind::SpreadProperty(spread) => {
                            properties.push(format!("...{}", self.emit(&spread.argument)?));
                        }
                    }
                }
                format!("{{{}}}", properties.join(", "))
            }

            other => {
                return Err(ExpressionError::at(
                    "Unsupported expression in template",
                    other.span(),
                ))
            }
        };
        Ok(code)
    }

    fn is_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    fn resolve(&self, name: &str) -> String {
        if self.is_param(name) {
            return format!("{}$", name);
        }
        if let Some(meta) = name.strip_prefix(META_SIGIL).filter(|m| !m.is_empty()) {
            return format!("{}.meta({})", RUNTIME, js_string(meta));
        }
        match self.names.resolve(name) {
            Some(variable) => variable.to_string(),
            None => format!("{}?.[{}]", self.names.this_var(), js_string(name)),
        }
    }

    /// `i.index`, `i.first`, `i.last` and `i.count` on a loop key alias.
    fn loop_meta(&self, object: &Expression, property: &str) -> Option<String> {
        if !matches!(property, "index" | "first" | "last" | "count") {
            return None;
        }
        let Expression::Identifier(id) = object else {
            return None;
        };
        let name = id.name.as_str();
        if self.is_param(name) {
            return None;
        }
        let variable = self.names.resolve(name)?;
        let depth = LOOP_INDEX_RE.captures(variable)?.get(1)?.as_str();
        Some(format!("{}{}", property, depth))
    }

    fn emit_call(&mut self, call: &CallExpression) -> Result<String, ExpressionError> {
        let mut args = Vec::with_capacity(call.arguments.len());
        for arg in &call.arguments {
            match arg.as_expression() {
                Some(e) => args.push(self.emit(e)?),
                None => return Err(ExpressionError::rejected("Spread arguments", arg.span())),
            }
        }

        match &call.callee {
            Expression::Identifier(id) => {
                let name = id.name.as_str();
                if self.is_param(name) {
                    Ok(format!("{}$({})", name, args.join(", ")))
                } else if name.starts_with(META_SIGIL) {
                    Err(ExpressionError::at("Metadata values cannot be called", id.span))
                } else {
                    Ok(self.functions.compile_call(name, &args))
                }
            }
            Expression::StaticMemberExpression(member) => Ok(format!(
                "{}.{}({})",
                self.emit(&member.object)?,
                member.property.name.as_str(),
                args.join(", ")
            )),
            callee => Err(ExpressionError::at(
                "Only named functions and methods can be called",
                callee.span(),
            )),
        }
    }

    fn emit_arrow(&mut self, arrow: &ArrowFunctionExpression) -> Result<String, ExpressionError> {
        let mut params = Vec::with_capacity(arrow.params.items.len());
        for param in &arrow.params.items {
            match &param.pattern {
                BindingPattern::BindingIdentifier(id) => params.push(id.name.to_string()),
                _ => return Err(ExpressionError::rejected("Destructured parameters", param.span)),
            }
        }
        if let Some(rest) = &arrow.params.rest {
            return Err(ExpressionError::rejected("Rest parameters", rest.span()));
        }
        let body = match arrow.body.statements.first() {
            Some(Statement::ExpressionStatement(stmt)) if arrow.expression => &stmt.expression,
            _ => {
                return Err(ExpressionError::rejected(
                    "Arrow function bodies with statements",
                    arrow.span,
                ))
            }
        };

        let outer = self.params.len();
        self.params.extend(params.iter().cloned());
        let body = self.emit(body);
        self.params.truncate(outer);

        let list: Vec<String> = params.iter().map(|p| format!("{}$", p)).collect();
        Ok(format!("({}) => {}", list.join(", "), body?))
    }
}

//! # xtpl template compiler
//!
//! Compiles HTML templates annotated with `x-*` directives into JavaScript
//! component callables of the form `function (props = {}, children = {})`.
//!
//! ## Pipeline
//!
//! 1. **Parse**: html5ever reads the template into a read-only [`NodeTree`].
//! 2. **Compile**: each node is dispatched on its governing directive; embedded
//!    `{expressions}` are parsed with oxc and rewritten against the current
//!    scope (`name` → `props?.["name"]`, loop aliases → loop variables).
//! 3. **Flush**: buffered code becomes component registrations
//!    (`$xtpl.register(name, fn)`) or a bare `return function ...;`.
//!
//! ## Directive priority
//!
//! When an element carries several directives they apply outermost first:
//! `x-component`, `x-if`, `x-else`, `x-each`, `x-as`, `x-empty`, `x-children`,
//! `x-include`, `x-with`, `x-block`, `x-literal`, `x-tag`, `x-unescape`.
//!
//! A [`Compiler`] holds no per-compile state; one instance can serve many
//! threads at once.

#[cfg(feature = "napi")]
mod native;

mod buffer;
mod compiler;
mod directive;
mod discovery;
mod error;
mod expression;
mod functions;
mod parse;
mod scope;
mod tags;
mod tree;
mod whitespace;

#[cfg(test)]
mod compiler_tests;
#[cfg(test)]
mod expression_tests;

pub use buffer::{js_string, Callable, CodeBuffer, CompilerBuffer, Selection, RUNTIME};
pub use compiler::{compile, fallback_artifact, CompileOptions, Compiler};
pub use directive::{split_attributes, Directive, DirectiveSet, DIRECTIVE_PREFIX};
pub use discovery::{
    compile_component, compile_directory, component_name, compute_hash, discover_templates,
    CompiledTemplate, FilesystemLoader, TemplateError, TemplateLoader,
};
pub use error::{CompileError, CompileErrorKind, ContextLine, Result};
pub use expression::{ExpressionCompiler, ExpressionError, NameResolver};
pub use functions::{ClosureHook, FunctionError, FunctionHook, FunctionRegistry};
pub use parse::{parse_template, ParsedTemplate};
pub use scope::{Scope, ScopeFrame, ROOT_CONTEXT};
pub use tree::{Attribute, Element, Node, NodeId, NodeKind, NodeTree};

#[cfg(feature = "napi")]
pub use native::{compile_template_native, parse_template_native};

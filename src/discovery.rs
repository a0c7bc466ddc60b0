//! Template discovery and batch compilation.
//!
//! Templates live on disk as `.html` files. A component called `forms.input`
//! is read from `<base>/forms/input.html`; directories become dotted prefixes.

use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::compiler::{CompileOptions, Compiler};
use crate::error::CompileError;

const TEMPLATE_EXTENSION: &str = "html";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Component {0} was not found")]
    NotFound(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Where component sources come from.
pub trait TemplateLoader {
    /// A stable key for the component's compiled artifact, if it exists.
    fn cache_key(&self, component: &str) -> Option<String>;

    fn load(&self, component: &str) -> Result<String, TemplateError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILESYSTEM LOADER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct FilesystemLoader {
    base: PathBuf,
}

impl FilesystemLoader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The file for `component` and its dotted sub-path. When the full path is
    /// missing, shorter prefixes of the name are tried.
    pub fn component_path(&self, component: &str) -> Option<(PathBuf, String)> {
        let segments: Vec<&str> = component.split('.').filter(|s| !s.is_empty()).collect();
        (1..=segments.len()).rev().find_map(|n| {
            let prefix = &segments[..n];
            let mut path = self.base.join(prefix.join("/"));
            path.set_extension(TEMPLATE_EXTENSION);
            if path.is_file() {
                Some((path, prefix.join(".")))
            } else {
                None
            }
        })
    }
}

impl TemplateLoader for FilesystemLoader {
    fn cache_key(&self, component: &str) -> Option<String> {
        self.component_path(component).map(|(_, key)| key)
    }

    fn load(&self, component: &str) -> Result<String, TemplateError> {
        let (path, _) = self
            .component_path(component)
            .ok_or_else(|| TemplateError::NotFound(component.to_string()))?;
        fs::read_to_string(&path).map_err(|source| TemplateError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledTemplate {
    pub component: String,
    pub path: String,
    /// SHA-256 of the template source, hex encoded.
    pub source_hash: String,
    pub code: String,
}

pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recursively find all template files in a directory, sorted by path.
pub fn discover_templates(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.is_file() && path.extension().map_or(false, |ext| ext == TEMPLATE_EXTENSION)
        })
        .collect();
    files.sort();
    files
}

/// `forms/Input.html` under `root` is component `forms.input`.
pub fn component_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("."))
    }
}

/// Load and compile one component, registered under its own name.
pub fn compile_component(
    compiler: &Compiler,
    loader: &FilesystemLoader,
    component: &str,
) -> Result<CompiledTemplate, TemplateError> {
    let (path, _) = loader
        .component_path(component)
        .ok_or_else(|| TemplateError::NotFound(component.to_string()))?;
    let source = loader.load(component)?;
    compile_source(compiler, component, &path, &source)
}

fn compile_source(
    compiler: &Compiler,
    component: &str,
    path: &Path,
    source: &str,
) -> Result<CompiledTemplate, TemplateError> {
    let path = path.to_string_lossy().to_string();
    let options = CompileOptions::new(component).with_path(path.clone());
    let code = compiler.compile(source, &options)?;
    Ok(CompiledTemplate {
        component: component.to_string(),
        path,
        source_hash: compute_hash(source),
        code,
    })
}

fn compile_file(compiler: &Compiler, root: &Path, path: &Path) -> Result<CompiledTemplate, TemplateError> {
    let component = component_name(root, path)
        .ok_or_else(|| TemplateError::NotFound(path.to_string_lossy().to_string()))?;
    let source = fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    })?;
    compile_source(compiler, &component, path, &source)
}

/// Compile every template under `dir` in parallel. One failing template
/// does not stop the others; results keep discovery order.
pub fn compile_directory(compiler: &Compiler, dir: &Path) -> Vec<Result<CompiledTemplate, TemplateError>> {
    let files = discover_templates(dir);
    log::debug!("compiling {} templates under {}", files.len(), dir.display());

    files
        .par_iter()
        .map(|path| {
            let result = compile_file(compiler, dir, path);
            if let Err(e) = &result {
                log::warn!("failed to compile {}: {}", path.display(), e);
            }
            result
        })
        .collect()
}

//! Node bindings.

use napi_derive::napi;

use crate::compiler::{compile, CompileOptions};
use crate::parse::parse_template;

/// Compile a template. `options_json` is a serialized [`CompileOptions`];
/// errors are reported as their JSON form so callers can render context.
#[napi]
pub fn compile_template_native(source: String, options_json: Option<String>) -> napi::Result<String> {
    let options: CompileOptions = match options_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| napi::Error::from_reason(format!("Invalid compile options: {}", e)))?,
        None => CompileOptions::default(),
    };
    compile(&source, &options).map_err(|e| {
        let reason = serde_json::to_string(&e).unwrap_or_else(|_| e.to_string());
        napi::Error::from_reason(reason)
    })
}

#[napi]
pub fn parse_template_native(source: String, file_path: Option<String>) -> napi::Result<serde_json::Value> {
    let path = file_path.unwrap_or_default();
    let parsed = parse_template(&source, &path).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    serde_json::to_value(parsed).map_err(|e| napi::Error::from_reason(e.to_string()))
}

//! Named template functions.
//!
//! A function has two independent behaviors: a compile hook that turns the
//! compiled argument expressions into inline JavaScript, and an evaluate hook
//! used when a function is invoked indirectly at run time. Attribute hooks are
//! compile-only and wrap the value bound to a specific attribute.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::buffer::{js_string, RUNTIME};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FunctionError {
    #[error("Call to undefined function {0}()")]
    Undefined(String),
    #[error("{function}(): {message}")]
    InvalidArgument { function: String, message: String },
}

pub trait FunctionHook: Send + Sync {
    /// Inline JavaScript for a call with these compiled arguments.
    fn compile(&self, args: &[String]) -> String;

    fn evaluate(&self, args: &[Value]) -> Result<Value, FunctionError>;
}

/// A hook built from a pair of closures.
pub struct ClosureHook<C, E> {
    compile: C,
    evaluate: E,
}

impl<C, E> ClosureHook<C, E>
where
    C: Fn(&[String]) -> String + Send + Sync,
    E: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync,
{
    pub fn new(compile: C, evaluate: E) -> Self {
        Self { compile, evaluate }
    }
}

impl<C, E> FunctionHook for ClosureHook<C, E>
where
    C: Fn(&[String]) -> String + Send + Sync,
    E: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync,
{
    fn compile(&self, args: &[String]) -> String {
        (self.compile)(args)
    }

    fn evaluate(&self, args: &[Value]) -> Result<Value, FunctionError> {
        (self.evaluate)(args)
    }
}

type AttributeHook = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn FunctionHook>>,
    attributes: HashMap<String, AttributeHook>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        let mut attributes: Vec<&String> = self.attributes.keys().collect();
        attributes.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &functions)
            .field("attributes", &attributes)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    pub fn register_function(&mut self, name: impl Into<String>, hook: impl FunctionHook + 'static) {
        self.functions.insert(name.into(), Arc::new(hook));
    }

    /// Register a function from a compile closure and an evaluate closure.
    pub fn define<C, E>(&mut self, name: &str, compile: C, evaluate: E)
    where
        C: Fn(&[String]) -> String + Send + Sync + 'static,
        E: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.register_function(name, ClosureHook::new(compile, evaluate));
    }

    /// Register an attribute hook under `"@attr"` or `"@tag:attr"`.
    pub fn register_attribute_function(
        &mut self,
        key: impl Into<String>,
        hook: impl Fn(&str) -> String + Send + Sync + 'static,
    ) {
        self.attributes.insert(key.into(), Arc::new(hook));
    }

    pub fn lookup_compile_hook(&self, name: &str) -> Option<&dyn FunctionHook> {
        self.functions.get(name).map(|hook| hook.as_ref())
    }

    /// Wrap an attribute-bound expression with its hook, if any. The
    /// tag-specific hook takes precedence.
    pub fn apply_attribute_hook(&self, tag: &str, attribute: &str, expression: String) -> String {
        let hook = self
            .attributes
            .get(&format!("@{}:{}", tag, attribute))
            .or_else(|| self.attributes.get(&format!("@{}", attribute)));
        match hook {
            Some(hook) => hook(&expression),
            None => expression,
        }
    }

    /// Compile a call: the registered hook, or an indirect run-time call.
    pub fn compile_call(&self, name: &str, args: &[String]) -> String {
        match self.lookup_compile_hook(name) {
            Some(hook) => hook.compile(args),
            None => {
                let mut call = format!("{}.call({}", RUNTIME, js_string(name));
                for arg in args {
                    call.push_str(", ");
                    call.push_str(arg);
                }
                call.push(')');
                call
            }
        }
    }

    /// Evaluate a function by name.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, FunctionError> {
        let hook = self
            .functions
            .get(name)
            .ok_or_else(|| FunctionError::Undefined(name.to_string()))?;
        hook.evaluate(args)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILT-INS
// ═══════════════════════════════════════════════════════════════════════════════

fn arg(args: &[String], index: usize) -> &str {
    args.get(index).map(String::as_str).unwrap_or("undefined")
}

fn value(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

fn as_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => 0.0,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(as_text).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
        other => other.to_string(),
    }
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        _ => 1,
    }
}

fn map_first_char(text: &str, upper: bool) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if upper => first.to_uppercase().chain(chars).collect(),
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn text_expr(args: &[String]) -> String {
    format!("String({} ?? \"\")", arg(args, 0))
}

fn math(registry: &mut FunctionRegistry, name: &'static str, op: fn(f64) -> f64) {
    registry.define(
        name,
        move |args| format!("Math.{}({})", name, arg(args, 0)),
        move |args| Ok(number(op(as_number(value(args, 0))))),
    );
}

fn register_builtins(registry: &mut FunctionRegistry) {
    math(registry, "abs", f64::abs);
    math(registry, "ceil", f64::ceil);
    math(registry, "floor", f64::floor);
    // Halves round up, like Math.round.
    math(registry, "round", |x| (x + 0.5).floor());

    registry.define(
        "max",
        |args| format!("Math.max({})", args.join(", ")),
        |args| {
            let max = args.iter().map(as_number).fold(f64::NEG_INFINITY, f64::max);
            Ok(number(max))
        },
    );
    registry.define(
        "min",
        |args| format!("Math.min({})", args.join(", ")),
        |args| {
            let min = args.iter().map(as_number).fold(f64::INFINITY, f64::min);
            Ok(number(min))
        },
    );

    registry.define(
        "count",
        |args| format!("{}.count({})", RUNTIME, arg(args, 0)),
        |args| Ok(Value::from(count(value(args, 0)))),
    );
    registry.define(
        "empty",
        |args| format!("{}.empty({})", RUNTIME, arg(args, 0)),
        |args| Ok(Value::Bool(is_empty(value(args, 0)))),
    );

    registry.define(
        "join",
        |args| {
            let separator = args.get(1).map(String::as_str).unwrap_or("\"\"");
            format!("Object.values({} ?? {{}}).join({})", arg(args, 0), separator)
        },
        |args| {
            let separator = args.get(1).map(as_text).unwrap_or_default();
            let parts: Vec<String> = match value(args, 0) {
                Value::Array(items) => items.iter().map(as_text).collect(),
                Value::Object(map) => map.values().map(as_text).collect(),
                Value::Null => Vec::new(),
                other => vec![as_text(other)],
            };
            Ok(Value::String(parts.join(&separator)))
        },
    );

    registry.define(
        "lcase",
        |args| format!("{}.toLowerCase()", text_expr(args)),
        |args| Ok(Value::String(as_text(value(args, 0)).to_lowercase())),
    );
    registry.define(
        "ucase",
        |args| format!("{}.toUpperCase()", text_expr(args)),
        |args| Ok(Value::String(as_text(value(args, 0)).to_uppercase())),
    );
    registry.define(
        "lcfirst",
        |args| format!("((s) => s.charAt(0).toLowerCase() + s.slice(1))({})", text_expr(args)),
        |args| Ok(Value::String(map_first_char(&as_text(value(args, 0)), false))),
    );
    registry.define(
        "ucfirst",
        |args| format!("((s) => s.charAt(0).toUpperCase() + s.slice(1))({})", text_expr(args)),
        |args| Ok(Value::String(map_first_char(&as_text(value(args, 0)), true))),
    );

    registry.define(
        "ucwords",
        |args| format!("{}.replace(/(^|\\s)\\S/g, (c) => c.toUpperCase())", text_expr(args)),
        |args| Ok(Value::String(upper_words(&as_text(value(args, 0))))),
    );

    registry.define(
        "trim",
        |args| format!("{}.trim()", text_expr(args)),
        |args| Ok(Value::String(as_text(value(args, 0)).trim().to_string())),
    );
    registry.define(
        "ltrim",
        |args| format!("{}.trimStart()", text_expr(args)),
        |args| Ok(Value::String(as_text(value(args, 0)).trim_start().to_string())),
    );
    registry.define(
        "rtrim",
        |args| format!("{}.trimEnd()", text_expr(args)),
        |args| Ok(Value::String(as_text(value(args, 0)).trim_end().to_string())),
    );
    registry.define(
        "strlen",
        |args| format!("{}.length", text_expr(args)),
        |args| Ok(Value::from(as_text(value(args, 0)).encode_utf16().count())),
    );
    registry.define(
        "substr",
        |args| match args.get(2) {
            Some(length) => format!("{}.substr({}, {})", text_expr(args), arg(args, 1), length),
            None => format!("{}.substr({})", text_expr(args), arg(args, 1)),
        },
        |args| {
            let chars: Vec<char> = as_text(value(args, 0)).chars().collect();
            let len = chars.len() as i64;
            let start = as_number(value(args, 1));
            if start.is_nan() {
                return Err(FunctionError::InvalidArgument {
                    function: "substr".to_string(),
                    message: "start must be a number".to_string(),
                });
            }
            let start = start as i64;
            let start = if start < 0 { (len + start).max(0) } else { start.min(len) };
            let end = match args.get(2) {
                Some(length) => start
                    .saturating_add((as_number(length) as i64).max(0))
                    .clamp(start, len),
                None => len,
            };
            Ok(Value::String(chars[start as usize..end as usize].iter().collect()))
        },
    );
    registry.define(
        "sprintf",
        |args| format!("{}.sprintf({})", RUNTIME, args.join(", ")),
        |args| {
            let format = as_text(value(args, 0));
            Ok(Value::String(sprintf(&format, args.get(1..).unwrap_or(&[]))?))
        },
    );
    registry.define(
        "urlencode",
        |args| format!("encodeURIComponent({} ?? \"\")", arg(args, 0)),
        |args| Ok(Value::String(url_encode(&as_text(value(args, 0))))),
    );
    registry.define(
        "queryEncode",
        |args| format!("{}.queryEncode({})", RUNTIME, arg(args, 0)),
        |args| Ok(Value::String(query_encode(value(args, 0)))),
    );
    registry.define(
        "htmlEncode",
        |args| format!("{}.escape({})", RUNTIME, arg(args, 0)),
        |args| {
            Ok(Value::String(crate::tree::escape_attribute(&as_text(
                value(args, 0),
            ))))
        },
    );

    registry.define(
        "formatDate",
        |args| format!("{}.formatDate({})", RUNTIME, args.join(", ")),
        |args| {
            let format = match args.get(1) {
                Some(Value::String(format)) => format.clone(),
                _ => "c".to_string(),
            };
            Ok(Value::String(format_date(value(args, 0), &format)))
        },
    );

    registry.register_attribute_function("@class", |expression| {
        format!("{}.attributeClass({})", RUNTIME, expression)
    });
}

fn upper_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut boundary = true;
    for c in text.chars() {
        if boundary {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        boundary = c.is_whitespace();
    }
    out
}

/// printf-style formatting: `%s %d %f %x %%`, with optional `N$` argument
/// positions, a minimum width and a precision for `%f`.
fn sprintf(format: &str, args: &[Value]) -> Result<String, FunctionError> {
    let invalid = |message: String| FunctionError::InvalidArgument {
        function: "sprintf".to_string(),
        message,
    };
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    let mut next = 0;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut spec = String::new();
        while let Some(&d) = chars.peek() {
            if !(d.is_ascii_digit() || d == '.' || d == '$') {
                break;
            }
            spec.push(d);
            chars.next();
        }
        let (position, rest) = match spec.split_once('$') {
            Some((position, rest)) => (position.parse::<usize>().ok().filter(|&n| n > 0), rest),
            None => (None, spec.as_str()),
        };
        let (width, precision) = match rest.split_once('.') {
            Some((width, precision)) => (width, precision.parse::<usize>().ok()),
            None => (rest, None),
        };
        let width = width.parse::<usize>().unwrap_or(0);

        let argument = match position {
            Some(n) => args.get(n - 1),
            None => {
                next += 1;
                args.get(next - 1)
            }
        }
        .unwrap_or(&Value::Null);

        let text = match chars.next() {
            Some('s') => as_text(argument),
            Some('d') => (as_number(argument) as i64).to_string(),
            Some('f') | Some('F') => format!("{:.*}", precision.unwrap_or(6), as_number(argument)),
            Some('x') => format!("{:x}", as_number(argument) as i64),
            Some(other) => return Err(invalid(format!("unsupported conversion %{}", other))),
            None => return Err(invalid("format ends inside a conversion".to_string())),
        };
        out.push_str(&format!("{:>width$}", text, width = width));
    }
    Ok(out)
}

/// A form-encoded query string; nested maps and lists become `key[sub]`.
fn query_encode(value: &Value) -> String {
    let mut pairs = Vec::new();
    match value {
        Value::Object(map) => {
            for (key, item) in map {
                query_pairs(&form_encode(key), item, &mut pairs);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                query_pairs(&index.to_string(), item, &mut pairs);
            }
        }
        _ => {}
    }
    pairs.join("&")
}

fn query_pairs(key: &str, value: &Value, pairs: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (sub, item) in map {
                query_pairs(&format!("{}%5B{}%5D", key, form_encode(sub)), item, pairs);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                query_pairs(&format!("{}%5B{}%5D", key, index), item, pairs);
            }
        }
        Value::Bool(flag) => pairs.push(format!("{}={}", key, u8::from(*flag))),
        other => pairs.push(format!("{}={}", key, form_encode(&as_text(other)))),
    }
}

fn form_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(byte as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Percent-encoding with the `encodeURIComponent` unreserved set.
fn url_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// DATES
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref ISO_DATE_RE: Regex = Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2})(?::(\d{2})(?:\.\d+)?)?)?\s*(Z|[+-]\d{2}:?\d{2})?$"
    )
    .unwrap();
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Formats a Unix timestamp or ISO-8601 string in UTC. Empty values format
/// as `""`, anything unparseable as `#error#`.
fn format_date(date: &Value, format: &str) -> String {
    let timestamp = match date {
        Value::String(text) if text.trim().is_empty() => return String::new(),
        Value::String(text) => parse_date(text.trim()),
        other if is_empty(other) => return String::new(),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    };
    match timestamp {
        Some(timestamp) => render_date(timestamp, format),
        None => "#error#".to_string(),
    }
}

fn parse_date(text: &str) -> Option<i64> {
    if let Some(seconds) = text.strip_prefix('@') {
        return seconds.parse().ok();
    }
    let caps = ISO_DATE_RE.captures(text)?;
    let field = |i: usize| -> i64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    let (year, month, day) = (field(1), field(2), field(3));
    let (hour, minute, second) = (field(4), field(5), field(6));
    if !(1..=12).contains(&month) || hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    let days = days_from_civil(year, month, day);
    // Rejects days past the end of the month, e.g. 2023-02-30.
    if civil_from_days(days) != (year, month, day) {
        return None;
    }

    let offset = match caps.get(7).map(|m| m.as_str()) {
        None | Some("Z") => 0,
        Some(zone) => {
            let sign = if zone.starts_with('-') { -1 } else { 1 };
            let digits: String = zone[1..].chars().filter(char::is_ascii_digit).collect();
            let hours: i64 = digits[..2].parse().ok()?;
            let minutes: i64 = digits[2..].parse().ok()?;
            sign * (hours * 3600 + minutes * 60)
        }
    };
    Some(days * 86_400 + hour * 3600 + minute * 60 + second - offset)
}

/// PHP `date()` letters; `\` prints the next character literally.
fn render_date(timestamp: i64, format: &str) -> String {
    let days = timestamp.div_euclid(86_400);
    let seconds = timestamp.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    let (hour, minute, second) = (seconds / 3600, seconds % 3600 / 60, seconds % 60);
    let weekday = (days + 4).rem_euclid(7) as usize;

    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        match c {
            'Y' => out.push_str(&format!("{:04}", year)),
            'y' => out.push_str(&format!("{:02}", year.rem_euclid(100))),
            'm' => out.push_str(&format!("{:02}", month)),
            'n' => out.push_str(&month.to_string()),
            'd' => out.push_str(&format!("{:02}", day)),
            'j' => out.push_str(&day.to_string()),
            'H' => out.push_str(&format!("{:02}", hour)),
            'G' => out.push_str(&hour.to_string()),
            'i' => out.push_str(&format!("{:02}", minute)),
            's' => out.push_str(&format!("{:02}", second)),
            'D' => out.push_str(WEEKDAYS[weekday]),
            'M' => out.push_str(MONTHS[(month - 1) as usize]),
            'U' => out.push_str(&timestamp.to_string()),
            'c' => out.push_str(&format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}+00:00",
                year, month, day, hour, minute, second
            )),
            '\\' => out.extend(chars.next()),
            other => out.push(other),
        }
    }
    out
}

fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year.rem_euclid(400);
    let doy = (153 * ((month + 9) % 12) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registered_functions_compile_inline() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry.compile_call("count", &["props?.[\"items\"]".to_string()]),
            "$xtpl.count(props?.[\"items\"])"
        );
        assert_eq!(
            registry.compile_call("max", &["a".to_string(), "b".to_string()]),
            "Math.max(a, b)"
        );
    }

    #[test]
    fn unknown_functions_compile_to_indirect_calls() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry.compile_call("slugify", &["title".to_string()]),
            "$xtpl.call(\"slugify\", title)"
        );
        assert_eq!(registry.compile_call("now", &[]), "$xtpl.call(\"now\")");
    }

    #[test]
    fn evaluate_hooks() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.call("count", &[json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(registry.call("empty", &[json!("0")]).unwrap(), json!(true));
        assert_eq!(registry.call("empty", &[json!({"a": 1})]).unwrap(), json!(false));
        assert_eq!(registry.call("ucfirst", &[json!("hello")]).unwrap(), json!("Hello"));
        assert_eq!(registry.call("round", &[json!(2.5)]).unwrap(), json!(3));
        assert_eq!(
            registry.call("join", &[json!(["a", "b"]), json!(", ")]).unwrap(),
            json!("a, b")
        );
        assert_eq!(
            registry.call("substr", &[json!("template"), json!(-4), json!(2)]).unwrap(),
            json!("la")
        );
        assert_eq!(registry.call("urlencode", &[json!("a b&c")]).unwrap(), json!("a%20b%26c"));
    }

    #[test]
    fn round_matches_math_round_on_negative_halves() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.call("round", &[json!(-2.5)]).unwrap(), json!(-2));
        assert_eq!(registry.call("round", &[json!(-2.6)]).unwrap(), json!(-3));
        assert_eq!(registry.call("round", &[json!(0.5)]).unwrap(), json!(1));
    }

    #[test]
    fn substr_clamps_oversized_lengths() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry.call("substr", &[json!("abc"), json!(1), json!(1e300)]).unwrap(),
            json!("bc")
        );
        assert_eq!(
            registry.call("substr", &[json!("abc"), json!(1e300), json!(2)]).unwrap(),
            json!("")
        );
        assert_eq!(
            registry.call("substr", &[json!("abc"), json!(-1e300), json!(-5)]).unwrap(),
            json!("")
        );
    }

    #[test]
    fn ucwords() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry.call("ucwords", &[json!("hello big\tworld")]).unwrap(),
            json!("Hello Big\tWorld")
        );
        assert_eq!(
            registry.compile_call("ucwords", &["t".to_string()]),
            "String(t ?? \"\").replace(/(^|\\s)\\S/g, (c) => c.toUpperCase())"
        );
    }

    #[test]
    fn sprintf_conversions() {
        let registry = FunctionRegistry::with_builtins();
        let call = |args: &[Value]| registry.call("sprintf", args).unwrap();
        assert_eq!(call(&[json!("%s has %d items"), json!("cart"), json!(3.9)]), json!("cart has 3 items"));
        assert_eq!(call(&[json!("%.2f%%"), json!(12.5)]), json!("12.50%"));
        assert_eq!(call(&[json!("%2$s %1$s"), json!("a"), json!("b")]), json!("b a"));
        assert_eq!(call(&[json!("[%4d]"), json!(7)]), json!("[   7]"));
        assert_eq!(call(&[json!("%x"), json!(255)]), json!("ff"));
        assert_eq!(call(&[json!("%s!")]), json!("!"));
        assert!(matches!(
            registry.call("sprintf", &[json!("%q")]),
            Err(FunctionError::InvalidArgument { .. })
        ));
        assert_eq!(
            registry.compile_call("sprintf", &["f".to_string(), "a".to_string()]),
            "$xtpl.sprintf(f, a)"
        );
    }

    #[test]
    fn query_encode_nests_keys() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry
                .call("queryEncode", &[json!({"a": "x y", "b": null, "c": true, "d": {"e": [1, 2]}})])
                .unwrap(),
            json!("a=x+y&c=1&d%5Be%5D%5B0%5D=1&d%5Be%5D%5B1%5D=2")
        );
        assert_eq!(registry.call("queryEncode", &[json!("text")]).unwrap(), json!(""));
        assert_eq!(
            registry.compile_call("queryEncode", &["q".to_string()]),
            "$xtpl.queryEncode(q)"
        );
    }

    #[test]
    fn format_date_letters() {
        let registry = FunctionRegistry::with_builtins();
        let call = |args: &[Value]| registry.call("formatDate", args).unwrap();
        assert_eq!(call(&[json!(1709210096)]), json!("2024-02-29T12:34:56+00:00"));
        assert_eq!(
            call(&[json!("2024-02-29T12:34:56Z"), json!("D, j M Y H:i:s")]),
            json!("Thu, 29 Feb 2024 12:34:56")
        );
        assert_eq!(call(&[json!("2024-03-01 01:00:00+02:00"), json!("Y-m-d G:i")]), json!("2024-02-29 23:00"));
        assert_eq!(call(&[json!("@-86400"), json!("\\Y\\: Y, U")]), json!("Y: 1969, -86400"));
        assert_eq!(call(&[json!("2024-03-01"), json!("n/j/y")]), json!("3/1/24"));
        assert_eq!(call(&[json!(0)]), json!(""));
        assert_eq!(call(&[json!(null)]), json!(""));
        assert_eq!(call(&[json!("")]), json!(""));
        assert_eq!(call(&[json!("2023-02-30")]), json!("#error#"));
        assert_eq!(call(&[json!("yesterday")]), json!("#error#"));
        assert_eq!(call(&[json!(["2024"])]), json!("#error#"));
        assert_eq!(
            registry.compile_call("formatDate", &["d".to_string(), "\"Y\"".to_string()]),
            "$xtpl.formatDate(d, \"Y\")"
        );
    }

    #[test]
    fn calling_an_undefined_function_fails() {
        let registry = FunctionRegistry::new();
        assert_eq!(
            registry.call("missing", &[]),
            Err(FunctionError::Undefined("missing".to_string()))
        );
    }

    #[test]
    fn tag_specific_attribute_hook_wins() {
        let mut registry = FunctionRegistry::with_builtins();
        registry.register_attribute_function("@a:class", |e| format!("link({})", e));
        assert_eq!(registry.apply_attribute_hook("a", "class", "c".into()), "link(c)");
        assert_eq!(
            registry.apply_attribute_hook("div", "class", "c".into()),
            "$xtpl.attributeClass(c)"
        );
        assert_eq!(registry.apply_attribute_hook("div", "id", "c".into()), "c");
    }

    #[test]
    fn custom_function_definition() {
        let mut registry = FunctionRegistry::new();
        registry.define(
            "double",
            |args| format!("(({}) * 2)", arg(args, 0)),
            |args| Ok(number(as_number(value(args, 0)) * 2.0)),
        );
        assert_eq!(registry.compile_call("double", &["n".into()]), "((n) * 2)");
        assert_eq!(registry.call("double", &[json!(4)]).unwrap(), json!(8));
    }
}

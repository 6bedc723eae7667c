//! `{{path}}` template resolution against the execution context
//!
//! Roots: `variables`/`variable`, `trigger`, `loop` (innermost frame) and any
//! node id. A path that cannot be resolved leaves the template untouched; an
//! explicit `null` renders as `null`.

use crate::runtime::context::ExecutionContext;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid template regex"))
}

/// Replace every `{{path}}` in `template` with the string form of its value
pub fn resolve(template: &str, ctx: &ExecutionContext) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    template_pattern()
        .replace_all(template, |caps: &Captures| match lookup(&caps[1], ctx) {
            Some(value) => stringify(&value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Resolve templates throughout a JSON value
///
/// A string that consists of exactly one template resolves to the referenced
/// value itself, keeping its JSON type (`"{{http.total}}"` → `42`, not `"42"`).
/// Non-string scalars are returned unchanged.
pub fn resolve_deep(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(s) => resolve_string_value(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_deep(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_deep(v, ctx)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

fn resolve_string_value(s: &str, ctx: &ExecutionContext) -> Value {
    if let Some(caps) = template_pattern().captures(s) {
        let whole = caps.get(0).map(|m| m.as_str() == s.trim()).unwrap_or(false);
        if whole {
            if let Some(value) = lookup(&caps[1], ctx) {
                return value;
            }
            return Value::String(s.to_string());
        }
    }
    Value::String(resolve(s, ctx))
}

/// Resolve a bare path (no braces) to a value
///
/// Returns `None` when the path does not exist or crosses a `null`.
pub fn lookup(path: &str, ctx: &ExecutionContext) -> Option<Value> {
    let segments = split_path(path);
    let (root, rest) = segments.split_first()?;

    match root.as_str() {
        "variables" | "variable" => {
            let (name, rest) = rest.split_first()?;
            traverse(ctx.variables.get(name.as_str())?, rest)
        }
        "trigger" => traverse(&ctx.trigger, rest),
        "loop" => lookup_loop(rest, ctx),
        node_id => {
            let output = ctx.node_output(node_id)?;
            traverse(output, rest).or_else(|| match rest.split_first() {
                // `{{node.output.x}}` addresses the node's output itself
                Some((first, tail)) if first == "output" => traverse(output, tail),
                _ => None,
            })
        }
    }
}

fn lookup_loop(rest: &[String], ctx: &ExecutionContext) -> Option<Value> {
    let frame = ctx.current_loop()?;
    let (alias, tail) = rest.split_first()?;

    match alias.as_str() {
        "index" if tail.is_empty() => Some(Value::from(frame.current_index)),
        "count" if tail.is_empty() => Some(Value::from(frame.item_count())),
        "item" => traverse(&frame.current_item, tail),
        name if name == frame.loop_variable => traverse(&frame.current_item, tail),
        _ => None,
    }
}

/// Walk dotted segments through objects and arrays
fn traverse(value: &Value, segments: &[String]) -> Option<Value> {
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment.as_str())?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// `a.b[0].c` → `["a", "b", "0", "c"]`
fn split_path(path: &str) -> Vec<String> {
    path.trim()
        .replace('[', ".")
        .replace(']', "")
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// String form used when a value is spliced into a larger string
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

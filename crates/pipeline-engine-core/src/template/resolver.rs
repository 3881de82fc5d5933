//! Template resolution against a context mapping.
//!
//! [`TemplateResolver`] is constructed per node execution with the shared
//! state's root mapping as context. It accumulates unresolved variable paths
//! in permissive mode so the wrapper can record them under the workflow's
//! template-error map.

use serde_json::{Map, Value};

use super::parser::{parse, simple_template, Segment, VarRef};
use super::ResolveMode;
use crate::error::{FlowError, Result};
use crate::ir::ParamKind;

/// Longest value snippet embedded in a malformed-JSON error.
const ERROR_VALUE_SNIPPET_LEN: usize = 200;

/// Most context keys listed in an unresolved-variable error.
const SUGGESTED_KEYS_LIMIT: usize = 10;

/// True iff `value` is a string containing at least one template
/// syntactically. Non-string values never count, even when they contain
/// template-bearing strings.
pub fn has_templates(value: &Value) -> bool {
    match value {
        Value::String(s) => has_templates_str(s),
        _ => false,
    }
}

/// String-level variant of [`has_templates`].
pub fn has_templates_str(text: &str) -> bool {
    parse(text)
        .iter()
        .any(|s| matches!(s, Segment::Var(_)))
}

/// Extracts every variable path appearing in `text`, e.g.
/// `{"user.name", "config.port"}`.
pub fn extract_variables(text: &str) -> std::collections::BTreeSet<String> {
    parse(text)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Var(v) => Some(v.path),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// Walks the dotted `path` through `context`.
///
/// Mappings are traversed by key and sequences by decimal index. Returns
/// `None` at the first missing key or non-traversable value; a path whose
/// leaf is an explicit `null` returns `Some(&Value::Null)`, which is how
/// null-present is distinguished from absent.
pub fn resolve_value<'a>(path: &str, context: &'a Map<String, Value>) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let root = segments.next()?;
    let mut current = context.get(root)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Distinguishes "path resolves to null" from "path missing".
pub fn variable_exists(path: &str, context: &Map<String, Value>) -> bool {
    resolve_value(path, context).is_some()
}

/// String form used when a template is embedded in surrounding text.
///
/// Stays inside the JSON value domain: null becomes the empty string,
/// booleans and numbers their JSON text, and containers their compact JSON
/// encoding.
pub fn convert_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// Per-node template resolver.
pub struct TemplateResolver<'a> {
    context: &'a Map<String, Value>,
    mode: ResolveMode,
    node_id: String,
    unresolved: Vec<String>,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(context: &'a Map<String, Value>, mode: ResolveMode, node_id: &str) -> Self {
        Self {
            context,
            mode,
            node_id: node_id.to_string(),
            unresolved: Vec::new(),
        }
    }

    /// Variable paths that failed to resolve in permissive mode, in
    /// encounter order.
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    /// Replaces every template in `text` with the string form of its value.
    pub fn resolve_string(&mut self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        for segment in parse(text) {
            match segment {
                Segment::Literal(s) => out.push_str(&s),
                Segment::Var(var) => match resolve_value(&var.path, self.context) {
                    Some(value) => out.push_str(&convert_to_string(value)),
                    None => match self.mode {
                        ResolveMode::Strict => return Err(self.unresolved_error(&var)),
                        ResolveMode::Permissive => {
                            self.unresolved.push(var.path.clone());
                            out.push_str(&var.raw);
                        }
                    },
                },
            }
        }
        Ok(out)
    }

    /// Resolves a value that may be a template. A simple template (the whole
    /// value is exactly one `${...}`) yields the native value with its type
    /// preserved; anything else goes through [`Self::resolve_string`].
    pub fn resolve_template(&mut self, text: &str) -> Result<Value> {
        if let Some(var) = simple_template(text) {
            return match resolve_value(&var.path, self.context) {
                Some(value) => Ok(value.clone()),
                None => match self.mode {
                    ResolveMode::Strict => Err(self.unresolved_error(&var)),
                    ResolveMode::Permissive => {
                        self.unresolved.push(var.path.clone());
                        Ok(Value::String(var.raw))
                    }
                },
            };
        }
        self.resolve_string(text).map(Value::String)
    }

    /// Resolves one node parameter, recursing structurally through mappings
    /// and sequences. `kind` is the parameter's declared type from interface
    /// metadata; it drives JSON auto-parsing for simple templates bound to
    /// `object`/`array` parameters (the shell-pipe-to-structured-node escape
    /// hatch). Nested leaves resolve without type metadata.
    pub fn resolve_param(
        &mut self,
        param_name: &str,
        value: &Value,
        kind: Option<ParamKind>,
    ) -> Result<Value> {
        match value {
            Value::String(text) => self.resolve_string_param(param_name, text, kind),
            Value::Array(items) => {
                let resolved = items
                    .iter()
                    .map(|item| self.resolve_param(param_name, item, None))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(resolved))
            }
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_param(param_name, item, None)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string_param(
        &mut self,
        param_name: &str,
        text: &str,
        kind: Option<ParamKind>,
    ) -> Result<Value> {
        let Some(var) = simple_template(text) else {
            return self.resolve_template(text);
        };

        let value = match resolve_value(&var.path, self.context) {
            Some(value) => value.clone(),
            None => {
                return match self.mode {
                    ResolveMode::Strict => Err(self.unresolved_error(&var)),
                    ResolveMode::Permissive => {
                        self.unresolved.push(var.path.clone());
                        Ok(Value::String(text.to_string()))
                    }
                };
            }
        };

        if let (Some(kind), Value::String(raw)) = (kind, &value) {
            if kind.is_structured() {
                if let Some(parsed) = self.auto_parse_json(param_name, kind, raw)? {
                    return Ok(parsed);
                }
            }
        }
        Ok(value)
    }

    /// Parses JSON-looking text bound to a structured parameter.
    ///
    /// Only strings beginning (after stripping whitespace) with `{` or `[`
    /// are candidates; anything else passes through untouched so plain text
    /// still flows into string-ish uses of `any`-typed data. A candidate
    /// that fails to parse, or parses to the wrong container kind, is a
    /// malformed-JSON error — silent fall-through would hand garbage to the
    /// node.
    fn auto_parse_json(
        &self,
        param_name: &str,
        kind: ParamKind,
        raw: &str,
    ) -> Result<Option<Value>> {
        let trimmed = raw.trim();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return Ok(None);
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(parsed) if kind.matches(&parsed) => Ok(Some(parsed)),
            Ok(parsed) => Err(FlowError::MalformedJson {
                node_id: self.node_id.clone(),
                param: param_name.to_string(),
                message: format!(
                    "expected {} but parsed {}: {}",
                    kind_name(kind),
                    value_kind_name(&parsed),
                    snippet(raw)
                ),
            }),
            Err(parse_err) => Err(FlowError::MalformedJson {
                node_id: self.node_id.clone(),
                param: param_name.to_string(),
                message: format!("{}: {}", parse_err, snippet(raw)),
            }),
        }
    }

    fn unresolved_error(&self, var: &VarRef) -> FlowError {
        let (failed_at, available) = self.nearest_keys(&var.path);
        let mut message = format!(
            "variable '{}' could not be resolved (failed at '{}')",
            var.raw, failed_at
        );
        if !available.is_empty() {
            message.push_str(&format!(". Available keys: {}", available.join(", ")));
        }
        FlowError::TemplateResolution {
            node_id: self.node_id.clone(),
            message,
        }
    }

    // Walks the path as far as it goes and reports the keys of the deepest
    // mapping reached, so the error suggests what the author probably meant.
    fn nearest_keys(&self, path: &str) -> (String, Vec<String>) {
        let mut keys: Vec<String> = self.context.keys().cloned().collect();
        let mut current: Option<&Value> = None;
        let mut failed_at = path.to_string();

        for segment in path.split('.') {
            let next = match current {
                None => self.context.get(segment),
                Some(Value::Object(map)) => map.get(segment),
                Some(Value::Array(items)) => {
                    segment.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                Some(_) => None,
            };
            match next {
                Some(value) => {
                    if let Value::Object(map) = value {
                        keys = map.keys().cloned().collect();
                    }
                    current = Some(value);
                }
                None => {
                    failed_at = segment.to_string();
                    break;
                }
            }
        }

        keys.sort();
        keys.truncate(SUGGESTED_KEYS_LIMIT);
        (failed_at, keys)
    }
}

fn kind_name(kind: ParamKind) -> &'static str {
    match kind {
        ParamKind::Object => "a JSON object",
        ParamKind::Array => "a JSON array",
        ParamKind::String => "a string",
        ParamKind::Integer => "an integer",
        ParamKind::Number => "a number",
        ParamKind::Boolean => "a boolean",
        ParamKind::Any => "any value",
    }
}

fn value_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn snippet(raw: &str) -> String {
    if raw.len() <= ERROR_VALUE_SNIPPET_LEN {
        raw.to_string()
    } else {
        let mut cut = ERROR_VALUE_SNIPPET_LEN;
        while !raw.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &raw[..cut])
    }
}

//! # Template Expression Language
//!
//! A small expression language for wiring node parameters to the shared
//! state. A template variable is `${NAME(.SEGMENT)*}`; the bare form
//! `$NAME.SEG` is also accepted. Two adjacent `$$` are a literal, and a
//! `${` with no closing brace is ordinary text.
//!
//! Resolution walks the dotted path through the context mapping. A value
//! that is *exactly* one template (`"${some_map}"`) resolves to the native
//! value with its type preserved; templates embedded in surrounding text
//! resolve to their string form.
//!
//! Two failure modes exist, chosen by the caller:
//!
//! - [`ResolveMode::Strict`] — an unresolved variable is an error listing
//!   the attempted path and the nearest available keys.
//! - [`ResolveMode::Permissive`] — the literal text is left in place and the
//!   unresolved path is recorded for later reporting.
//!
//! ```rust
//! use pipeline_engine_core::template::{ResolveMode, TemplateResolver};
//! use serde_json::{json, Map, Value};
//!
//! let context: Map<String, Value> = serde_json::from_value(json!({
//!     "user": {"name": "Alice"},
//!     "count": 3
//! })).unwrap();
//!
//! let mut resolver = TemplateResolver::new(&context, ResolveMode::Strict, "greeter");
//! let text = resolver.resolve_string("${user.name} has ${count} items").unwrap();
//! assert_eq!(text, "Alice has 3 items");
//! ```

pub mod parser;
pub mod resolver;

pub use parser::{parse, simple_template, Segment, VarRef};
pub use resolver::{
    convert_to_string, extract_variables, has_templates, has_templates_str, resolve_value,
    variable_exists, TemplateResolver,
};

/// Failure mode for unresolved template variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    /// Unresolved variables raise an error naming the attempted path.
    #[default]
    Strict,
    /// Unresolved variables keep their literal text and are recorded under
    /// the workflow's template-error map.
    Permissive,
}

//! Patch template engine.
//!
//! Rendering happens in two independent stages:
//!
//! 1. **Render** - a template is executed against the ordered list of
//!    extracted source values and produces text. The dialect follows Go's
//!    `text/template`: field access (`.a.b`), variables (`$x := ..`, `$`),
//!    `if`/`else if`/`else`, `with`, `range` (lists, maps in key order and
//!    integers) with `break` and `continue`, `define`/`template`/`block`,
//!    `|` pipelines, comments and `{{-`/`-}}` trim markers. The functions are
//!    `and`, `or`, `not`, `eq`, `ne`, `lt`, `le`, `gt`, `ge`, `index`,
//!    `slice`, `len`, `print`, `printf`, `println` and `toJson`.
//! 2. **Convert** - the rendered YAML (or JSON) text is converted to the
//!    JSON bytes the store's patch endpoint expects.
//!
//! The render stage sits behind [`TemplateRenderer`] so another dialect can
//! be plugged in without touching conversion.
//!
//! # Example
//!
//! ```ignore
//! let template = PatchTemplate::parse("spec:\n  replicas: {{ index . 0 }}")?;
//! let rendered = template.render(&[json!("3")])?;
//! let body = to_patch_body(&rendered)?; // {"spec":{"replicas":3}}
//! ```

mod exec;
mod parse;

use serde_json::Value;

use crate::error::TemplateError;
use parse::Tree;

/// Name used in error messages for patch templates.
pub const DEFAULT_TEMPLATE_NAME: &str = "patch";

/// A parsed template.
#[derive(Debug, Clone)]
pub struct PatchTemplate {
    name: String,
    source: String,
    tree: Tree,
}

impl PatchTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        Self::parse_named(DEFAULT_TEMPLATE_NAME, source)
    }

    pub fn parse_named(name: &str, source: &str) -> Result<Self, TemplateError> {
        let tree = parse::parse(name, source)?;
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            tree,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Executes the template with `values` as the dot, a positional list.
    pub fn render(&self, values: &[Value]) -> Result<String, TemplateError> {
        self.render_data(&Value::Array(values.to_vec()))
    }

    /// Executes the template against an arbitrary dot value.
    pub fn render_data(&self, data: &Value) -> Result<String, TemplateError> {
        exec::render(&self.name, &self.tree, data)
    }
}

/// Converts rendered YAML or JSON text to a JSON patch body.
pub fn to_patch_body(rendered: &str) -> Result<Vec<u8>, TemplateError> {
    let document: Value = serde_yaml::from_str(rendered)
        .map_err(|e| TemplateError::Conversion(e.to_string()))?;
    serde_json::to_vec(&document).map_err(|e| TemplateError::Conversion(e.to_string()))
}

/// The render stage of the patch pipeline.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, values: &[Value]) -> Result<String, TemplateError>;
}

/// Renders with the built-in `text/template` dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextTemplateRenderer;

impl TemplateRenderer for TextTemplateRenderer {
    fn render(&self, template: &str, values: &[Value]) -> Result<String, TemplateError> {
        PatchTemplate::parse(template)?.render(values)
    }
}

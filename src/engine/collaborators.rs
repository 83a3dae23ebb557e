//! Interfaces to services outside the template engine

use indexmap::IndexMap;

use crate::error::TemplateError;
use crate::value::Value;

/// Renders named reusable UI fragments for `{% component %}`
pub trait ComponentManager: Send + Sync {
    fn render(&self, name: &str, props: &IndexMap<String, Value>) -> String;
}

/// Application-wide hook and filter pipeline
///
/// `invoke` backs `{% hook %}` tags; `filter` backs the `apply_filters`
/// function and the final `render_output` pass.
pub trait HookPipeline: Send + Sync {
    fn invoke(&self, name: &str, data: &IndexMap<String, Value>) -> String;

    fn filter(&self, name: &str, value: Value, args: &[Value]) -> Value;
}

/// Receives runtime errors swallowed outside debug mode
pub trait ErrorSink: Send + Sync {
    fn report(&self, template: &str, error: &TemplateError);
}

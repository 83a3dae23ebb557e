//! Vellum - A sandboxed template engine with inheritance and compiled caching
//!
//! Templates are parsed into a tree, compiled into a flat instruction
//! program and executed by a small interpreter against a [`Context`].
//! Compiled programs are cached and invalidated when their source changes.
//!
//! # Example
//!
//! ```rust
//! use vellum::{Context, Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! engine.set_string_template("base", "<h1>{% block title %}Untitled{% endblock %}</h1>");
//! engine.set_string_template(
//!     "page",
//!     r#"{% extends "base" %}{% block title %}{{ title | upper }}{% endblock %}"#,
//! );
//!
//! let ctx = Context::new().with("title", "hello <world>");
//! let html = engine.render("page", &ctx).unwrap();
//! assert_eq!(html, "<h1>HELLO &lt;WORLD&gt;</h1>");
//! ```

pub mod cache;
pub mod compiler;
pub mod context;
pub mod engine;
pub mod error;
pub mod loader;
pub mod parser;
pub mod runtime;
pub mod value;

pub use cache::{CacheEntry, CacheStore, MemoryCache};
pub use compiler::{compile, Artifact, Instruction};
pub use context::{Context, ContextError};
pub use engine::{
    ComponentManager, ConfigError, CoreExtension, Engine, EngineConfig, ErrorSink, Extension,
    Filter, Function, HookPipeline,
};
pub use error::{CompileError, RuntimeError, SyntaxError, TemplateError};
pub use loader::{Loader, RenderScope, Source};
pub use parser::parse;
pub use runtime::{Environment, Limits, Sandbox};
pub use value::{HostObject, Value};

/// Render template source once, surfacing every error
///
/// # Example
///
/// ```rust
/// use vellum::{render_str, Context};
///
/// let ctx = Context::new().with("items", vec!["a", "b"]);
/// let out = render_str("{% for i in items %}{{ loop.index }}={{ i }} {% endfor %}", &ctx).unwrap();
/// assert_eq!(out, "1=a 2=b ");
/// ```
pub fn render_str(source: &str, context: &Context) -> Result<String, TemplateError> {
    let config = EngineConfig::default().with_debug(true).with_cache(false);
    Engine::new(config).render_string(source, context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_str() {
        let ctx = Context::new().with("name", "Ada");
        assert_eq!(render_str("Hi {{ name }}", &ctx).unwrap(), "Hi Ada");
    }

    #[test]
    fn test_render_str_reports_syntax_errors() {
        let err = render_str("{% endif %}", &Context::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }
}

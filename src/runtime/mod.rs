//! Executes compiled templates

mod escape;
mod eval;
mod output;
mod sandbox;

pub use escape::escape_html;
pub use output::Output;
pub use sandbox::Sandbox;

use std::sync::Arc;

use crate::compiler::Artifact;
use crate::engine::{ComponentManager, Filter, Function, HookPipeline};
use crate::error::TemplateError;
use crate::loader::RenderScope;

/// Nesting limits enforced while rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of `extends` hops in one chain
    pub max_inheritance_depth: usize,
    /// Maximum nesting of `include`
    pub max_include_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_inheritance_depth: 20,
            max_include_depth: 32,
        }
    }
}

/// Everything a render can reach outside its own context
pub trait Environment: Sync {
    fn filter(&self, name: &str) -> Option<&Filter>;

    fn function(&self, name: &str) -> Option<&Function>;

    /// Resolve a template by name, compiling it if needed
    fn load(&self, name: &str) -> Result<Arc<Artifact>, TemplateError>;

    fn components(&self) -> Option<&dyn ComponentManager> {
        None
    }

    fn hooks(&self) -> Option<&dyn HookPipeline> {
        None
    }

    fn limits(&self) -> Limits {
        Limits::default()
    }

    /// Fresh inheritance state for one render
    fn render_scope(&self) -> RenderScope {
        RenderScope::default()
    }
}

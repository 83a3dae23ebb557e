//! The template engine
//!
//! [`Engine`] ties the pipeline together: it resolves a template through the
//! loader and the artifact cache, runs it in a [`Sandbox`] with globals
//! merged into the caller's context, and post-processes the output.

mod builtins;
mod collaborators;
mod config;
mod extension;
mod postprocess;

pub use builtins::CoreExtension;
pub use collaborators::{ComponentManager, ErrorSink, HookPipeline};
pub use config::{ConfigError, EngineConfig, SearchPath};
pub use extension::{Extension, Filter, Function};
pub use postprocess::collapse_whitespace;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::cache::{cache_key, CacheEntry, CacheStore, MemoryCache};
use crate::compiler::{compile, Artifact};
use crate::context::Context;
use crate::error::TemplateError;
use crate::loader::{Loader, RenderScope};
use crate::parser::parse;
use crate::runtime::{Environment, Limits, Sandbox};
use crate::value::Value;

/// Name given to templates rendered with [`Engine::render_string`]
const STRING_TEMPLATE_NAME: &str = "(string)";

/// Hook filter applied to the final output of every render
const RENDER_OUTPUT_HOOK: &str = "render_output";

/// Renders templates
///
/// Registries (filters, functions, globals, extensions) are populated with
/// `&mut self` before rendering; renders take `&self` and can run from many
/// threads at once.
pub struct Engine {
    config: EngineConfig,
    loader: Loader,
    cache: Arc<dyn CacheStore>,
    filters: HashMap<String, Filter>,
    functions: HashMap<String, Function>,
    globals: Context,
    extensions: Vec<String>,
    components: Option<Box<dyn ComponentManager>>,
    hooks: Option<Box<dyn HookPipeline>>,
    error_sink: Option<Box<dyn ErrorSink>>,
}

impl Engine {
    /// Create an engine with the core extension and the configured search paths
    pub fn new(config: EngineConfig) -> Self {
        let mut loader = Loader::new();
        for search in &config.paths {
            loader.add_path(&search.path, search.namespace.as_deref());
        }

        let mut engine = Self {
            config,
            loader,
            cache: Arc::new(MemoryCache::new()),
            filters: HashMap::new(),
            functions: HashMap::new(),
            globals: Context::new(),
            extensions: Vec::new(),
            components: None,
            hooks: None,
            error_sink: None,
        };
        engine.add_extension(CoreExtension);
        engine
    }

    /// Replace the artifact cache store
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn add_path(&mut self, path: impl Into<PathBuf>, namespace: Option<&str>) {
        self.loader.add_path(path, namespace);
    }

    /// Register an in-memory template, shadowing any file of the same name
    pub fn set_string_template(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.loader.set_string_template(name, source);
    }

    /// Add a variable visible to every render unless the context overrides it
    pub fn add_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name, value);
    }

    pub fn add_filter(&mut self, name: impl Into<String>, filter: Filter) {
        self.filters.insert(name.into(), filter);
    }

    pub fn add_function(&mut self, name: impl Into<String>, function: Function) {
        self.functions.insert(name.into(), function);
    }

    /// Register every filter, function and global of an extension
    ///
    /// Later registrations replace earlier ones of the same name.
    pub fn add_extension(&mut self, extension: impl Extension) {
        let filters = extension.filters();
        let functions = extension.functions();
        tracing::debug!(
            extension = extension.name(),
            filters = filters.len(),
            functions = functions.len(),
            "registering extension"
        );
        self.filters.extend(filters);
        self.functions.extend(functions);
        for (name, value) in extension.globals() {
            self.globals.insert(name, value);
        }
        self.extensions.push(extension.name().to_string());
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    pub fn set_component_manager(&mut self, components: impl ComponentManager + 'static) {
        self.components = Some(Box::new(components));
    }

    pub fn set_hook_pipeline(&mut self, hooks: impl HookPipeline + 'static) {
        self.hooks = Some(Box::new(hooks));
    }

    pub fn set_error_sink(&mut self, sink: impl ErrorSink + 'static) {
        self.error_sink = Some(Box::new(sink));
    }

    pub fn exists(&self, name: &str) -> bool {
        self.loader.exists(name)
    }

    /// Drop every cached artifact
    pub fn clear_cache(&self) {
        tracing::debug!("flushing template cache");
        self.cache.flush();
    }

    /// Resolve a template to its compiled artifact, using the cache when valid
    pub fn compile(&self, name: &str) -> Result<Arc<Artifact>, TemplateError> {
        self.resolve(name)
    }

    /// Render a named template
    pub fn render(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        let artifact = self.resolve(name)?;
        self.run(artifact, context)
    }

    /// Render template source that has no name
    ///
    /// The compiled artifact is cached under a hash of the source text, so
    /// every distinct source adds an entry. Without a cache TTL those entries
    /// stay until [`Engine::clear_cache`]. Callers rendering unbounded or
    /// user-supplied sources should set [`EngineConfig::with_cache_ttl`] or
    /// disable caching.
    pub fn render_string(&self, source: &str, context: &Context) -> Result<String, TemplateError> {
        let key = cache_key("string", source);
        let cached = if self.config.cache {
            self.cache.get(&key).map(|entry| entry.artifact)
        } else {
            None
        };

        let artifact = match cached {
            Some(artifact) => artifact,
            None => {
                let modified = SystemTime::now();
                let artifact = Arc::new(self.compile_source(STRING_TEMPLATE_NAME, source, modified)?);
                self.store(&key, &artifact, modified);
                artifact
            }
        };
        self.run(artifact, context)
    }

    fn resolve(&self, name: &str) -> Result<Arc<Artifact>, TemplateError> {
        let key = cache_key("template", name);

        if self.config.cache && self.cache.has(&key) {
            let fresh = !self.config.auto_reload
                || match self.cache.modified_time(&key) {
                    Some(compiled) => compiled >= self.loader.last_modified(name)?,
                    None => false,
                };
            if fresh {
                if let Some(entry) = self.cache.get(&key) {
                    tracing::trace!(template = name, "cache hit");
                    return Ok(entry.artifact);
                }
            } else {
                tracing::debug!(template = name, "source changed since compilation");
            }
        }

        let source = self.loader.get_source(name)?;
        let artifact = Arc::new(self.compile_source(name, &source.text, source.modified)?);
        self.store(&key, &artifact, source.modified);
        Ok(artifact)
    }

    fn store(&self, key: &str, artifact: &Arc<Artifact>, source_mtime: SystemTime) {
        if !self.config.cache {
            return;
        }
        let entry = CacheEntry {
            artifact: Arc::clone(artifact),
            source_mtime,
        };
        self.cache.set(key, entry, self.config.cache_ttl());
    }

    fn compile_source(&self, name: &str, text: &str, modified: SystemTime) -> Result<Artifact, TemplateError> {
        let ast = parse(text).map_err(|error| TemplateError::Syntax {
            template: name.to_string(),
            text: text.to_string(),
            error,
        })?;
        let artifact = compile(ast, name, modified)?;
        tracing::debug!(
            template = name,
            instructions = artifact.program.len(),
            "compiled template"
        );
        Ok(artifact)
    }

    /// Execute an artifact and apply the error policy and post-processing
    fn run(&self, artifact: Arc<Artifact>, context: &Context) -> Result<String, TemplateError> {
        let name = artifact.name.clone();
        let mut vars = self.globals.clone();
        vars.merge(context);

        match Sandbox::new(self).execute(artifact, vars) {
            Ok(output) => Ok(self.postprocess(output)),
            Err(error) if error.is_runtime() && !self.config.debug => {
                tracing::error!(template = %name, %error, "template render failed");
                if let Some(sink) = &self.error_sink {
                    sink.report(&name, &error);
                }
                Ok(self.config.placeholder.clone())
            }
            Err(error) => Err(error),
        }
    }

    fn postprocess(&self, output: String) -> String {
        let output = if self.config.collapse_whitespace && !self.config.debug {
            collapse_whitespace(&output)
        } else {
            output
        };
        match &self.hooks {
            Some(hooks) => hooks
                .filter(RENDER_OUTPUT_HOOK, Value::String(output), &[])
                .to_output(),
            None => output,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("loader", &self.loader)
            .field("extensions", &self.extensions)
            .field("filters", &self.filters.len())
            .field("functions", &self.functions.len())
            .field("globals", &self.globals.len())
            .finish_non_exhaustive()
    }
}

impl Environment for Engine {
    fn filter(&self, name: &str) -> Option<&Filter> {
        self.filters.get(name)
    }

    fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    fn load(&self, name: &str) -> Result<Arc<Artifact>, TemplateError> {
        self.resolve(name)
    }

    fn components(&self) -> Option<&dyn ComponentManager> {
        self.components.as_deref()
    }

    fn hooks(&self) -> Option<&dyn HookPipeline> {
        self.hooks.as_deref()
    }

    fn limits(&self) -> Limits {
        Limits {
            max_inheritance_depth: self.config.max_inheritance_depth,
            max_include_depth: self.config.max_include_depth,
        }
    }

    fn render_scope(&self) -> RenderScope {
        self.loader.scope()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use indexmap::IndexMap;
    use std::sync::Mutex;

    fn debug_engine() -> Engine {
        Engine::new(EngineConfig::default().with_debug(true))
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_render_named_string_template() {
        let mut engine = debug_engine();
        engine.set_string_template("hello", "Hello, {{ name | capitalize }}!");
        let ctx = Context::new().with("name", "ada");
        assert_eq!(engine.render("hello", &ctx).unwrap(), "Hello, Ada!");
        assert!(engine.exists("hello"));
        assert!(!engine.exists("missing"));
    }

    #[test]
    fn test_context_overrides_globals() {
        let mut engine = debug_engine();
        engine.add_global("site", "Vellum");
        engine.add_global("user", "guest");
        let ctx = Context::new().with("user", "ada");
        assert_eq!(
            engine.render_string("{{ site }}/{{ user }}", &ctx).unwrap(),
            "Vellum/ada"
        );
    }

    #[test]
    fn test_unknown_filter_in_debug_mode_is_an_error() {
        let engine = debug_engine();
        let err = engine.render_string("{{ x | nope }}", &Context::new()).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Runtime {
                error: RuntimeError::UnknownFilter { .. },
                ..
            }
        ));
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<String>>>);

    impl ErrorSink for RecordingSink {
        fn report(&self, template: &str, error: &TemplateError) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{}: {}", template, error));
        }
    }

    #[test]
    fn test_runtime_error_outside_debug_renders_placeholder() {
        let mut engine = Engine::new(EngineConfig::default().with_placeholder("[oops]"));
        let sink = RecordingSink::default();
        engine.set_error_sink(sink.clone());
        engine.set_string_template("page", "before {{ x | nope }} after");

        assert_eq!(engine.render("page", &Context::new()).unwrap(), "[oops]");
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("page: "), "{}", reports[0]);
        assert!(reports[0].contains("unknown filter"), "{}", reports[0]);
    }

    #[test]
    fn test_syntax_errors_propagate_outside_debug() {
        let engine = Engine::default();
        let err = engine
            .render_string("{% if x %}open", &Context::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_missing_template() {
        let engine = Engine::default();
        let err = engine.render("nowhere", &Context::new()).unwrap_err();
        assert!(matches!(err, TemplateError::NotFound { .. }));
    }

    #[test]
    fn test_cached_artifact_is_reused() {
        let cache = Arc::new(MemoryCache::new());
        let mut engine = debug_engine().with_cache(cache.clone());
        engine.set_string_template("t", "{{ 1 + 1 }}");

        let first = engine.compile("t").unwrap();
        let second = engine.compile("t").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        engine.clear_cache();
        assert!(cache.is_empty());
        assert!(!Arc::ptr_eq(&first, &engine.compile("t").unwrap()));
    }

    #[test]
    fn test_cache_disabled_compiles_every_time() {
        let cache = Arc::new(MemoryCache::new());
        let mut engine = Engine::new(EngineConfig::default().with_cache(false)).with_cache(cache.clone());
        engine.set_string_template("t", "x");
        let first = engine.compile("t").unwrap();
        let second = engine.compile("t").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reregistered_template_without_auto_reload_keeps_cached_output() {
        let mut engine = debug_engine();
        engine.set_string_template("t", "old");
        assert_eq!(engine.render("t", &Context::new()).unwrap(), "old");
        engine.set_string_template("t", "new");
        assert_eq!(engine.render("t", &Context::new()).unwrap(), "old");
    }

    #[test]
    fn test_reregistered_template_with_auto_reload_recompiles() {
        let mut engine = Engine::new(EngineConfig::default().with_debug(true).with_auto_reload(true));
        engine.set_string_template("t", "old");
        assert_eq!(engine.render("t", &Context::new()).unwrap(), "old");
        engine.set_string_template("t", "new");
        assert_eq!(engine.render("t", &Context::new()).unwrap(), "new");
    }

    #[test]
    fn test_render_string_reuses_artifact_per_source() {
        let cache = Arc::new(MemoryCache::new());
        let engine = debug_engine().with_cache(cache.clone());
        let ctx = Context::new().with("n", 2);
        assert_eq!(engine.render_string("{{ n * 2 }}", &ctx).unwrap(), "4");
        assert_eq!(engine.render_string("{{ n * 2 }}", &ctx).unwrap(), "4");
        assert_eq!(cache.len(), 1);
        assert_eq!(engine.render_string("{{ n * 3 }}", &ctx).unwrap(), "6");
        assert_eq!(cache.len(), 2);
    }

    struct Shout;

    impl Extension for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn filters(&self) -> Vec<(String, Filter)> {
            vec![(
                "shout".to_string(),
                Filter::new(|value, _| Ok(format!("{}!", value.to_output().to_uppercase()).into())),
            )]
        }

        fn functions(&self) -> Vec<(String, Function)> {
            vec![(
                "badge".to_string(),
                Function::safe(|args| {
                    let text = args.first().map(Value::to_output).unwrap_or_default();
                    Ok(format!("<span>{}</span>", text).into())
                }),
            )]
        }

        fn globals(&self) -> Vec<(String, Value)> {
            vec![("greeting".to_string(), "hi".into())]
        }
    }

    #[test]
    fn test_custom_extension() {
        let mut engine = debug_engine();
        engine.add_extension(Shout);
        assert!(engine.has_extension("core"));
        assert!(engine.has_extension("shout"));
        assert_eq!(
            engine
                .render_string("{{ greeting | shout }} {{ badge('new') }}", &Context::new())
                .unwrap(),
            "HI! <span>new</span>"
        );
    }

    #[test]
    fn test_whitespace_collapses_outside_debug_only() {
        let source = "<ul>\n\n   <li>a</li>\n</ul>";
        let ctx = Context::new();
        assert_eq!(
            Engine::default().render_string(source, &ctx).unwrap(),
            "<ul>\n<li>a</li>\n</ul>"
        );
        assert_eq!(debug_engine().render_string(source, &ctx).unwrap(), source);
    }

    struct Hooks;

    impl HookPipeline for Hooks {
        fn invoke(&self, name: &str, data: &IndexMap<String, Value>) -> String {
            format!("[{} {}]", name, data.len())
        }

        fn filter(&self, name: &str, value: Value, args: &[Value]) -> Value {
            match name {
                "render_output" => format!("{}<!-- done -->", value.to_output()).into(),
                "price" => Value::from(value.as_f64().unwrap_or(0.0) * args[0].as_f64().unwrap_or(1.0)),
                _ => value,
            }
        }
    }

    #[test]
    fn test_hook_pipeline() {
        let mut engine = debug_engine();
        engine.set_hook_pipeline(Hooks);
        let out = engine
            .render_string(
                "{% hook \"sidebar\" with {a: 1, b: 2} %} {{ apply_filters('price', 10, 1.5) }}",
                &Context::new(),
            )
            .unwrap();
        assert_eq!(out, "[sidebar 2] 15<!-- done -->");
    }

    struct Components;

    impl ComponentManager for Components {
        fn render(&self, name: &str, props: &IndexMap<String, Value>) -> String {
            format!("<{} title=\"{}\">", name, props.get("title").map(Value::to_output).unwrap_or_default())
        }
    }

    #[test]
    fn test_component_manager() {
        let mut engine = debug_engine();
        let ctx = Context::new().with("t", "Hi");
        assert_eq!(
            engine
                .render_string("{% component \"card\" with {title: t} %}", &ctx)
                .unwrap(),
            "<!-- component \"card\" unavailable -->"
        );
        engine.set_component_manager(Components);
        assert_eq!(
            engine
                .render_string("{% component \"card\" with {title: t} %}", &ctx)
                .unwrap(),
            "<card title=\"Hi\">"
        );
    }

    #[test]
    fn test_limits_follow_config() {
        let mut config = EngineConfig::default();
        config.max_include_depth = 3;
        let engine = Engine::new(config);
        assert_eq!(engine.limits().max_include_depth, 3);
        assert_eq!(engine.limits().max_inheritance_depth, 20);
    }
}

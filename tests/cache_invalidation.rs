//! Compiled artifact caching and invalidation on source changes

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use vellum::{CacheEntry, CacheStore, Context, Engine, EngineConfig, MemoryCache};

/// Cache store that counts how often artifacts are stored
#[derive(Default)]
struct CountingCache {
    inner: MemoryCache,
    stores: AtomicUsize,
}

impl CountingCache {
    fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

impl CacheStore for CountingCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, entry: CacheEntry, ttl: Option<Duration>) {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, entry, ttl);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn write_template(path: &Path, text: &str, modified: SystemTime) {
    fs::write(path, text).unwrap();
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(modified).unwrap();
}

fn setup(auto_reload: bool) -> (TempDir, Engine, Arc<CountingCache>) {
    let dir = TempDir::new().unwrap();
    let earlier = SystemTime::now() - Duration::from_secs(3600);
    write_template(&dir.path().join("page.html"), "v1 {{ n }}", earlier);

    let cache = Arc::new(CountingCache::default());
    let config = EngineConfig::default()
        .with_debug(true)
        .with_auto_reload(auto_reload)
        .with_path(dir.path(), None);
    let engine = Engine::new(config).with_cache(cache.clone());
    (dir, engine, cache)
}

#[test]
fn test_warm_cache_skips_compilation() {
    let (_dir, engine, cache) = setup(true);
    let ctx = Context::new().with("n", 1);
    assert_eq!(engine.render("page.html", &ctx).unwrap(), "v1 1");
    assert_eq!(engine.render("page.html", &ctx).unwrap(), "v1 1");
    assert_eq!(cache.stores(), 1);
}

#[test]
fn test_auto_reload_picks_up_newer_source() {
    let (dir, engine, cache) = setup(true);
    let ctx = Context::new().with("n", 2);
    assert_eq!(engine.render("page.html", &ctx).unwrap(), "v1 2");

    write_template(&dir.path().join("page.html"), "v2 {{ n }}", SystemTime::now());
    assert_eq!(engine.render("page.html", &ctx).unwrap(), "v2 2");
    assert_eq!(cache.stores(), 2);

    assert_eq!(engine.render("page.html", &ctx).unwrap(), "v2 2");
    assert_eq!(cache.stores(), 2);
}

#[test]
fn test_without_auto_reload_stale_artifact_is_reused() {
    let (dir, engine, cache) = setup(false);
    let ctx = Context::new().with("n", 3);
    assert_eq!(engine.render("page.html", &ctx).unwrap(), "v1 3");

    write_template(&dir.path().join("page.html"), "v2 {{ n }}", SystemTime::now());
    assert_eq!(engine.render("page.html", &ctx).unwrap(), "v1 3");
    assert_eq!(cache.stores(), 1);

    engine.clear_cache();
    assert_eq!(engine.render("page.html", &ctx).unwrap(), "v2 3");
}

#[test]
fn test_parent_templates_are_reloaded_too() {
    let (dir, engine, _cache) = setup(true);
    let earlier = SystemTime::now() - Duration::from_secs(3600);
    write_template(&dir.path().join("base.html"), "[{% block x %}{% endblock %}]", earlier);
    write_template(
        &dir.path().join("child.html"),
        r#"{% extends "base.html" %}{% block x %}child{% endblock %}"#,
        earlier,
    );
    assert_eq!(engine.render("child.html", &Context::new()).unwrap(), "[child]");

    write_template(&dir.path().join("base.html"), "({% block x %}{% endblock %})", SystemTime::now());
    assert_eq!(engine.render("child.html", &Context::new()).unwrap(), "(child)");
}

#[test]
fn test_deleted_source_with_auto_reload_is_not_found() {
    let (dir, engine, _cache) = setup(true);
    assert!(engine.render("page.html", &Context::new()).is_ok());
    fs::remove_file(dir.path().join("page.html")).unwrap();
    assert!(engine.render("page.html", &Context::new()).is_err());
}

#[test]
fn test_expired_entries_are_recompiled() {
    let dir = TempDir::new().unwrap();
    write_template(&dir.path().join("t.html"), "ttl", SystemTime::now());
    let cache = Arc::new(CountingCache::default());
    let config = EngineConfig::default()
        .with_cache_ttl(Duration::ZERO)
        .with_path(dir.path(), None);
    let engine = Engine::new(config).with_cache(cache.clone());

    engine.render("t.html", &Context::new()).unwrap();
    engine.render("t.html", &Context::new()).unwrap();
    assert_eq!(cache.stores(), 2);
}

#[test]
fn test_string_templates_are_cached_by_source() {
    let cache = Arc::new(CountingCache::default());
    let engine = Engine::new(EngineConfig::default().with_auto_reload(true)).with_cache(cache.clone());
    let ctx = Context::new().with("x", "y");
    for _ in 0..3 {
        assert_eq!(engine.render_string("{{ x }}", &ctx).unwrap(), "y");
    }
    assert_eq!(cache.stores(), 1);
    assert_eq!(engine.render_string("{{ x }}!", &ctx).unwrap(), "y!");
    assert_eq!(cache.stores(), 2);
}

#[test]
fn test_expired_string_templates_do_not_accumulate() {
    let cache = Arc::new(MemoryCache::new());
    let config = EngineConfig::default().with_cache_ttl(Duration::ZERO);
    let engine = Engine::new(config).with_cache(cache.clone());
    for n in 0..50 {
        let source = format!("{n}:{{{{ x }}}}");
        assert_eq!(
            engine.render_string(&source, &Context::new().with("x", "y")).unwrap(),
            format!("{n}:y")
        );
    }
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_sub_second_ttl_keeps_entries_briefly() {
    let cache = Arc::new(CountingCache::default());
    let config = EngineConfig::default().with_cache_ttl(Duration::from_millis(400));
    let engine = Engine::new(config).with_cache(cache.clone());

    engine.render_string("short lived", &Context::new()).unwrap();
    engine.render_string("short lived", &Context::new()).unwrap();
    assert_eq!(cache.stores(), 1);

    std::thread::sleep(Duration::from_millis(600));
    engine.render_string("short lived", &Context::new()).unwrap();
    assert_eq!(cache.stores(), 2);
}

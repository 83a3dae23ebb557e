//! Template source resolution
//!
//! Templates are looked up first among in-memory string templates, then in
//! the search paths of their namespace. A name of the form `@ns/rest`
//! resolves `rest` against the paths of namespace `ns`; other names use the
//! default namespace.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use indexmap::IndexMap;

use crate::error::TemplateError;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Where a template's text came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    String,
    File(PathBuf),
}

/// Template text with its modification time
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub text: String,
    pub modified: SystemTime,
    pub origin: Origin,
}

#[derive(Debug, Default)]
pub struct Loader {
    paths: IndexMap<String, Vec<PathBuf>>,
    strings: HashMap<String, (String, SystemTime)>,
    last_stamp: Option<SystemTime>,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a search path to a namespace; paths are searched in insertion order
    pub fn add_path(&mut self, path: impl Into<PathBuf>, namespace: Option<&str>) {
        self.paths
            .entry(namespace.unwrap_or(DEFAULT_NAMESPACE).to_string())
            .or_default()
            .push(path.into());
    }

    /// Register an in-memory template; it shadows any file of the same name
    ///
    /// Every registration gets a strictly newer modification time than the
    /// previous one.
    pub fn set_string_template(&mut self, name: impl Into<String>, text: impl Into<String>) {
        let stamp = self.next_stamp();
        self.strings.insert(name.into(), (text.into(), stamp));
    }

    fn next_stamp(&mut self) -> SystemTime {
        let now = SystemTime::now();
        let stamp = match self.last_stamp {
            Some(last) if last >= now => last + Duration::from_nanos(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    pub fn get_source(&self, name: &str) -> Result<Source, TemplateError> {
        if let Some((text, modified)) = self.strings.get(name) {
            return Ok(Source {
                name: name.to_string(),
                text: text.clone(),
                modified: *modified,
                origin: Origin::String,
            });
        }

        let path = self.find_file(name)?;
        let io_error = |error| TemplateError::Io {
            path: path.clone(),
            error,
        };
        let text = fs::read_to_string(&path).map_err(io_error)?;
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(io_error)?;

        Ok(Source {
            name: name.to_string(),
            text,
            modified,
            origin: Origin::File(path),
        })
    }

    pub fn last_modified(&self, name: &str) -> Result<SystemTime, TemplateError> {
        if let Some((_, modified)) = self.strings.get(name) {
            return Ok(*modified);
        }
        let path = self.find_file(name)?;
        fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|error| TemplateError::Io { path, error })
    }

    pub fn exists(&self, name: &str) -> bool {
        self.strings.contains_key(name) || self.find_file(name).is_ok()
    }

    /// Fresh per-render inheritance state
    pub fn scope(&self) -> RenderScope {
        RenderScope::default()
    }

    fn find_file(&self, name: &str) -> Result<PathBuf, TemplateError> {
        let (namespace, relative) = split_name(name);
        let mut searched = Vec::new();

        if !is_contained(Path::new(relative)) {
            return Err(TemplateError::NotFound {
                name: name.to_string(),
                searched,
            });
        }

        for dir in self.paths.get(namespace).into_iter().flatten() {
            let candidate = dir.join(relative);
            if candidate.is_file() {
                return Ok(candidate);
            }
            searched.push(candidate);
        }

        Err(TemplateError::NotFound {
            name: name.to_string(),
            searched,
        })
    }
}

/// Split `@ns/rest` into its namespace and relative name
fn split_name(name: &str) -> (&str, &str) {
    name.strip_prefix('@')
        .and_then(|rest| rest.split_once('/'))
        .unwrap_or((DEFAULT_NAMESPACE, name))
}

/// Relative path that cannot escape its search directory
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Inheritance state of a single render
///
/// Records the parent declared by the template being executed and the
/// block contents captured so far. Child definitions are stored first, so
/// a block that already exists is never overwritten by a parent.
#[derive(Debug, Default)]
pub struct RenderScope {
    parent: Option<String>,
    blocks: HashMap<String, String>,
}

impl RenderScope {
    pub fn set_parent_template(&mut self, name: impl Into<String>) {
        self.parent = Some(name.into());
    }

    pub fn parent_template(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Consume the recorded parent
    pub fn take_parent_template(&mut self) -> Option<String> {
        self.parent.take()
    }

    pub fn set_block(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.blocks.insert(name.into(), content.into());
    }

    pub fn get_block(&self, name: &str) -> Option<&str> {
        self.blocks.get(name).map(String::as_str)
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }
}

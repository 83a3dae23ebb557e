//! Render contexts and the per-render scope stack

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::value::Value;

/// Errors building a context from host data
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to serialize context: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("context must be a map, found {kind}")]
    NotAMap { kind: &'static str },
}

/// Named values available to a template
///
/// Insertion order is preserved. Later inserts replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    vars: IndexMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from any serializable map-like value
    pub fn from_serialize<T: Serialize>(data: &T) -> Result<Self, ContextError> {
        match Value::from_serialize(data)? {
            Value::Map(vars) => Ok(Self { vars }),
            other => Err(ContextError::NotAMap { kind: other.kind() }),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every entry of `other` into this context, overwriting collisions
    pub fn merge(&mut self, other: &Context) {
        for (name, value) in &other.vars {
            self.vars.insert(name.clone(), value.clone());
        }
    }

    pub fn into_map(self) -> IndexMap<String, Value> {
        self.vars
    }
}

impl From<IndexMap<String, Value>> for Context {
    fn from(vars: IndexMap<String, Value>) -> Self {
        Self { vars }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Variable frames of a single render
///
/// The bottom frame holds the render context; loops push a frame per
/// iteration. `set` writes to the innermost frame, lookups search from the
/// innermost frame outwards.
#[derive(Debug)]
pub(crate) struct Scopes {
    frames: Vec<IndexMap<String, Value>>,
}

impl Scopes {
    pub fn new(root: Context) -> Self {
        Self {
            frames: vec![root.into_map()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(IndexMap::new());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Every visible variable, inner frames shadowing outer ones
    pub fn flatten(&self) -> Context {
        let mut vars = IndexMap::new();
        for frame in &self.frames {
            for (name, value) in frame {
                vars.insert(name.clone(), value.clone());
            }
        }
        Context { vars }
    }
}

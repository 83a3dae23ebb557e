//! Filters, functions and the extensions that bundle them

use std::fmt;
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::value::Value;

type FilterFn = dyn Fn(&Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync;
type FunctionFn = dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync;

/// A named value transformation applied with `| name`
///
/// Safe filters produce markup; their output is not escaped again when
/// they end a print chain.
#[derive(Clone)]
pub struct Filter {
    func: Arc<FilterFn>,
    safe: bool,
}

impl Filter {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            safe: false,
        }
    }

    /// A filter whose output is already safe markup
    pub fn safe<F>(func: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            safe: true,
        }
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn call(&self, value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        (self.func)(value, args)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("safe", &self.safe).finish()
    }
}

/// A named function callable from expressions
#[derive(Clone)]
pub struct Function {
    func: Arc<FunctionFn>,
    safe: bool,
}

impl Function {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            safe: false,
        }
    }

    pub fn safe<F>(func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            safe: true,
        }
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        (self.func)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("safe", &self.safe).finish()
    }
}

/// A bundle of filters, functions and globals registered together
pub trait Extension {
    fn name(&self) -> &str;

    fn filters(&self) -> Vec<(String, Filter)> {
        Vec::new()
    }

    fn functions(&self) -> Vec<(String, Function)> {
        Vec::new()
    }

    fn globals(&self) -> Vec<(String, Value)> {
        Vec::new()
    }
}

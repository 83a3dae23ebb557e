//! Bytecode interpreter

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::compiler::{Artifact, Instruction};
use crate::context::{Context, Scopes};
use crate::error::{RuntimeError, TemplateError};
use crate::loader::RenderScope;
use crate::parser::ast::Expr;
use crate::runtime::escape::escape_html;
use crate::runtime::eval::Evaluator;
use crate::runtime::output::Output;
use crate::runtime::Environment;
use crate::value::Value;

/// Runs compiled templates against a context
///
/// A sandbox only reaches the outside world through its [`Environment`]:
/// registered filters and functions, template loading and the optional
/// collaborators.
pub struct Sandbox<'e> {
    env: &'e dyn Environment,
    include_depth: usize,
}

impl<'e> Sandbox<'e> {
    pub fn new(env: &'e dyn Environment) -> Self {
        Self {
            env,
            include_depth: 0,
        }
    }

    /// Render an artifact and every parent it extends
    ///
    /// Each template in the chain runs with the same variables and block
    /// registry; the output of the last one is the result.
    pub fn execute(&self, artifact: Arc<Artifact>, context: Context) -> Result<String, TemplateError> {
        let limits = self.env.limits();
        let mut scopes = Scopes::new(context);
        let mut scope = self.env.render_scope();
        let mut chain = vec![artifact.name.clone()];
        let mut current = artifact;

        loop {
            let output = Vm {
                sandbox: self,
                artifact: &current,
                scopes: &mut scopes,
                scope: &mut scope,
                output: Output::new(),
                loops: Vec::new(),
                defined: HashSet::new(),
            }
            .run()?;

            let Some(parent) = scope.take_parent_template() else {
                return Ok(output);
            };
            if chain.len() > limits.max_inheritance_depth {
                chain.push(parent);
                return Err(TemplateError::runtime(
                    &current.name,
                    RuntimeError::InheritanceDepth { chain },
                ));
            }
            tracing::trace!(template = %current.name, %parent, "rendering parent template");
            current = self.env.load(&parent)?;
            chain.push(parent);
        }
    }
}

/// State of one active `for` loop
#[derive(Debug)]
struct LoopState {
    key: Option<String>,
    item: String,
    entries: Vec<(Value, Value)>,
    index: usize,
    /// `loop` record of the enclosing loop
    parent: Value,
}

impl LoopState {
    fn record(&self) -> Value {
        let length = self.entries.len();
        let index = self.index + 1;
        let mut record = IndexMap::new();
        record.insert("index0".to_string(), Value::from(self.index));
        record.insert("index".to_string(), Value::from(index));
        record.insert("first".to_string(), Value::Bool(self.index == 0));
        record.insert("last".to_string(), Value::Bool(index == length));
        record.insert("length".to_string(), Value::from(length));
        record.insert("revindex0".to_string(), Value::from(length - index));
        record.insert("revindex".to_string(), Value::from(length - self.index));
        record.insert("parent".to_string(), self.parent.clone());
        Value::Map(record)
    }
}

struct Vm<'r, 'e> {
    sandbox: &'r Sandbox<'e>,
    artifact: &'r Artifact,
    scopes: &'r mut Scopes,
    scope: &'r mut RenderScope,
    output: Output,
    loops: Vec<LoopState>,
    /// Blocks this template has defined itself, as opposed to inherited overrides
    defined: HashSet<String>,
}

impl Vm<'_, '_> {
    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator {
            env: self.sandbox.env,
            scopes: self.scopes,
            scope: self.scope,
        }
    }

    fn eval(&self, expr: &Expr) -> Result<Value, RuntimeError> {
        self.evaluator().eval(expr)
    }

    /// Evaluate an optional `with` map; absent or null gives an empty map
    fn eval_map(&self, expr: Option<&Expr>, callee: &str) -> Result<IndexMap<String, Value>, RuntimeError> {
        match expr.map(|e| self.eval(e)).transpose()? {
            None | Some(Value::Null) => Ok(IndexMap::new()),
            Some(Value::Map(map)) => Ok(map),
            Some(other) => Err(RuntimeError::invalid_argument(
                callee,
                format!("expected a map, found {}", other.kind()),
            )),
        }
    }

    fn run(mut self) -> Result<String, TemplateError> {
        let artifact = self.artifact;
        let mut pc = 0;
        while let Some(instruction) = artifact.program.get(pc) {
            pc += 1;
            if let Some(target) = self.step(instruction)? {
                pc = target;
            }
        }
        self.output
            .finish()
            .map_err(|e| TemplateError::runtime(&artifact.name, e))
    }

    /// Execute one instruction, returning a jump target if control moves
    fn step(&mut self, instruction: &Instruction) -> Result<Option<usize>, TemplateError> {
        let artifact = self.artifact;
        let template = artifact.name.as_str();
        let fail = |error: RuntimeError| TemplateError::runtime(template, error);

        match instruction {
            Instruction::Text(text) => self.output.write(text),
            Instruction::Print { expr, filters, raw } => {
                let (text, safe) = {
                    let evaluator = self.evaluator();
                    let value = evaluator
                        .eval(expr)
                        .and_then(|v| evaluator.apply_filters(v, filters))
                        .map_err(fail)?;
                    (value.to_output(), evaluator.is_safe(expr, filters, *raw))
                };
                if safe {
                    self.output.write(&text);
                } else {
                    self.output.write(&escape_html(&text));
                }
            }
            Instruction::Set { name, value } => {
                let value = self.eval(value).map_err(fail)?;
                self.scopes.set(name, value);
            }
            Instruction::JumpUnless { cond, target } => {
                if !self.eval(cond).map_err(fail)?.is_truthy() {
                    return Ok(Some(*target));
                }
            }
            Instruction::Jump(target) => return Ok(Some(*target)),
            Instruction::IterStart {
                key,
                item,
                collection,
                otherwise,
            } => {
                let collection = self.eval(collection).map_err(fail)?;
                match collection.entries() {
                    Some(entries) if !entries.is_empty() => {
                        let parent = self.scopes.lookup("loop").cloned().unwrap_or_default();
                        self.loops.push(LoopState {
                            key: key.clone(),
                            item: item.clone(),
                            entries,
                            index: 0,
                            parent,
                        });
                        self.bind_iteration();
                    }
                    _ => return Ok(Some(*otherwise)),
                }
            }
            Instruction::IterNext { body } => {
                self.scopes.pop();
                let state = self.loops.last_mut().ok_or_else(|| {
                    fail(RuntimeError::InvalidOperation(
                        "loop advanced outside of a loop".to_string(),
                    ))
                })?;
                state.index += 1;
                if state.index < state.entries.len() {
                    self.bind_iteration();
                    return Ok(Some(*body));
                }
                self.loops.pop();
            }
            Instruction::BlockStart(name) => self.output.push_capture(name),
            Instruction::BlockEnd(name) => {
                let captured = self.output.pop_capture(name).map_err(fail)?;
                // Overrides from a child win; our own definition is refreshed on every pass.
                if self.defined.contains(name) || !self.scope.has_block(name) {
                    self.scope.set_block(name.as_str(), captured);
                    self.defined.insert(name.clone());
                }
                if let Some(content) = self.scope.get_block(name) {
                    self.output.write(content);
                }
            }
            Instruction::Extends(parent) => self.scope.set_parent_template(parent.as_str()),
            Instruction::Include { name, vars, only } => {
                let text = self.include(name, vars.as_ref(), *only)?;
                self.output.write(&text);
            }
            Instruction::Component { name, props } => {
                let props = self.eval_map(props.as_ref(), "component").map_err(fail)?;
                let text = match self.sandbox.env.components() {
                    Some(components) => components.render(name, &props),
                    None => format!("<!-- component \"{}\" unavailable -->", escape_html(name)),
                };
                self.output.write(&text);
            }
            Instruction::Hook { name, data } => {
                let data = self.eval_map(data.as_ref(), "hook").map_err(fail)?;
                let text = match self.sandbox.env.hooks() {
                    Some(hooks) => hooks.invoke(name, &data),
                    None => format!("<!-- hook \"{}\" unavailable -->", escape_html(name)),
                };
                self.output.write(&text);
            }
        }
        Ok(None)
    }

    /// Open a scope frame for the current iteration of the innermost loop
    fn bind_iteration(&mut self) {
        let Some(state) = self.loops.last() else {
            return;
        };
        self.scopes.push();
        let (key, item) = state.entries[state.index].clone();
        if let Some(key_name) = &state.key {
            self.scopes.set(key_name, key);
        }
        self.scopes.set(&state.item, item);
        self.scopes.set("loop", state.record());
    }

    fn include(&self, name: &str, vars: Option<&Expr>, only: bool) -> Result<String, TemplateError> {
        let artifact = self.artifact;
        let template = artifact.name.as_str();
        let limit = self.sandbox.env.limits().max_include_depth;
        if self.sandbox.include_depth >= limit {
            return Err(TemplateError::runtime(
                template,
                RuntimeError::IncludeDepth {
                    name: name.to_string(),
                    limit,
                },
            ));
        }

        let vars = self
            .eval_map(vars, "include")
            .map_err(|e| TemplateError::runtime(template, e))?;
        let mut context = if only {
            Context::new()
        } else {
            self.scopes.flatten()
        };
        context.merge(&Context::from(vars));

        let artifact = self.sandbox.env.load(name)?;
        let nested = Sandbox {
            env: self.sandbox.env,
            include_depth: self.sandbox.include_depth + 1,
        };
        nested.execute(artifact, context)
    }
}

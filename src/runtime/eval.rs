//! Expression evaluation

use std::cmp::Ordering;

use crate::context::Scopes;
use crate::error::RuntimeError;
use crate::loader::RenderScope;
use crate::parser::ast::{BinaryOp, Expr, FilterCall, PathSegment, UnaryOp};
use crate::runtime::Environment;
use crate::value::Value;

/// Evaluates expressions against the variables visible at one point of a render
pub(crate) struct Evaluator<'a> {
    pub env: &'a dyn Environment,
    pub scopes: &'a Scopes,
    pub scope: &'a RenderScope,
}

impl Evaluator<'_> {
    pub fn eval(&self, expr: &Expr) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable { name, path } => {
                let mut value = self.scopes.lookup(name.as_str()).cloned().unwrap_or_default();
                for segment in path {
                    value = match segment {
                        PathSegment::Attr(attr) => value.get_attr(attr),
                        PathSegment::Index(index) => value.get_item(&self.eval(index)?),
                    };
                }
                Ok(value)
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Object(entries) => entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), self.eval(value)?)))
                .collect::<Result<_, RuntimeError>>()
                .map(Value::Map),
            Expr::Filter { input, filter } => {
                let value = self.eval(input)?;
                self.filter(value, filter)
            }
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name.as_str(), args)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(RuntimeError::InvalidOperation(format!(
                            "cannot negate {}",
                            other.kind()
                        ))),
                    },
                }
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    Ok(Value::Bool(self.eval(left)?.is_truthy() && self.eval(right)?.is_truthy()))
                }
                BinaryOp::Or => {
                    Ok(Value::Bool(self.eval(left)?.is_truthy() || self.eval(right)?.is_truthy()))
                }
                op => binary(*op, self.eval(left)?, self.eval(right)?),
            },
        }
    }

    /// Apply a filter chain left to right
    pub fn apply_filters(&self, mut value: Value, filters: &[FilterCall]) -> Result<Value, RuntimeError> {
        for filter in filters {
            value = self.filter(value, filter)?;
        }
        Ok(value)
    }

    fn filter(&self, value: Value, call: &FilterCall) -> Result<Value, RuntimeError> {
        let filter = self
            .env
            .filter(call.name.as_str())
            .ok_or_else(|| RuntimeError::UnknownFilter {
                name: call.name.to_string(),
            })?;
        let args = call
            .args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;
        filter.call(&value, &args)
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match name {
            "block" => {
                let block = args.first().map(Value::to_output).unwrap_or_default();
                Ok(Value::String(
                    self.scope.get_block(&block).unwrap_or_default().to_string(),
                ))
            }
            "apply_filters" => {
                let mut args = args.into_iter();
                let hook = args
                    .next()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or_else(|| {
                        RuntimeError::invalid_argument("apply_filters", "expected a hook name")
                    })?;
                let value = args.next().unwrap_or_default();
                let rest: Vec<Value> = args.collect();
                Ok(match self.env.hooks() {
                    Some(hooks) => hooks.filter(&hook, value, &rest),
                    None => value,
                })
            }
            _ => match self.env.function(name) {
                Some(function) => function.call(&args),
                None => Err(RuntimeError::UnknownFunction {
                    name: name.to_string(),
                }),
            },
        }
    }

    /// Whether printed output of this expression skips escaping
    pub fn is_safe(&self, expr: &Expr, filters: &[FilterCall], raw: bool) -> bool {
        if raw {
            return true;
        }
        match filters.last() {
            Some(last) => self
                .env
                .filter(last.name.as_str())
                .is_some_and(|f| f.is_safe()),
            None => match expr {
                Expr::Call { name, .. } if name.as_str() == "block" => true,
                Expr::Call { name, .. } => self
                    .env
                    .function(name.as_str())
                    .is_some_and(|f| f.is_safe()),
                _ => false,
            },
        }
    }
}

fn overflow() -> RuntimeError {
    RuntimeError::InvalidOperation("integer overflow".to_string())
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::NotEq => Ok(Value::Bool(left != right)),
        BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
            let ordering = left.compare(&right).ok_or_else(|| {
                RuntimeError::InvalidOperation(format!(
                    "cannot compare {} with {}",
                    left.kind(),
                    right.kind()
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Less => ordering == Ordering::Less,
                BinaryOp::LessEq => ordering != Ordering::Greater,
                BinaryOp::Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => contains(&right, &left).map(Value::Bool),
        BinaryOp::NotIn => contains(&right, &left).map(|found| Value::Bool(!found)),
        BinaryOp::Concat => Ok(Value::String(left.to_output() + &right.to_output())),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &left, &right)
        }
        BinaryOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, RuntimeError> {
    match haystack {
        Value::Array(items) => Ok(items.contains(needle)),
        Value::Map(map) => Ok(map.contains_key(&needle.to_output())),
        Value::String(s) => Ok(s.contains(&needle.to_output())),
        Value::Null => Ok(false),
        other => Err(RuntimeError::InvalidOperation(format!(
            "`in` needs a sequence, map or string, found {}",
            other.kind()
        ))),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        return match op {
            BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div if b == 0 => Err(division_by_zero()),
            BinaryOp::Div if a.checked_rem(b) == Some(0) => {
                a.checked_div(b).map(Value::Int).ok_or_else(overflow)
            }
            BinaryOp::Div => Ok(Value::Float(a as f64 / b as f64)),
            BinaryOp::Rem if b == 0 => Err(division_by_zero()),
            _ => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
        };
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(RuntimeError::InvalidOperation(format!(
            "cannot apply `{}` to {} and {}",
            op.symbol(),
            left.kind(),
            right.kind()
        )));
    };
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div if b == 0.0 => Err(division_by_zero()),
        BinaryOp::Div => Ok(Value::Float(a / b)),
        BinaryOp::Rem if b == 0.0 => Err(division_by_zero()),
        _ => Ok(Value::Float(a % b)),
    }
}

fn division_by_zero() -> RuntimeError {
    RuntimeError::InvalidOperation("division by zero".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        assert_eq!(arithmetic(BinaryOp::Add, &int(2), &int(3)), Ok(int(5)));
        assert_eq!(arithmetic(BinaryOp::Div, &int(6), &int(3)), Ok(int(2)));
        assert_eq!(arithmetic(BinaryOp::Div, &int(7), &int(2)), Ok(Value::Float(3.5)));
        assert_eq!(arithmetic(BinaryOp::Rem, &int(7), &int(4)), Ok(int(3)));
    }

    #[test]
    fn test_mixed_arithmetic_is_float() {
        assert_eq!(
            arithmetic(BinaryOp::Mul, &int(2), &Value::Float(1.5)),
            Ok(Value::Float(3.0))
        );
    }

    #[test]
    fn test_arithmetic_errors() {
        assert_eq!(arithmetic(BinaryOp::Div, &int(1), &int(0)), Err(division_by_zero()));
        assert_eq!(arithmetic(BinaryOp::Add, &int(i64::MAX), &int(1)), Err(overflow()));
        assert!(arithmetic(BinaryOp::Sub, &Value::from("a"), &int(1)).is_err());
    }

    #[test]
    fn test_membership() {
        let items = Value::from(vec!["a", "b"]);
        assert_eq!(binary(BinaryOp::In, Value::from("a"), items.clone()), Ok(Value::Bool(true)));
        assert_eq!(binary(BinaryOp::NotIn, Value::from("z"), items), Ok(Value::Bool(true)));
        assert_eq!(
            binary(BinaryOp::In, Value::from("ell"), Value::from("hello")),
            Ok(Value::Bool(true))
        );
        assert_eq!(binary(BinaryOp::In, Value::from("x"), Value::Null), Ok(Value::Bool(false)));
        assert!(binary(BinaryOp::In, Value::from("x"), int(3)).is_err());
    }

    #[test]
    fn test_comparison() {
        assert_eq!(binary(BinaryOp::LessEq, int(2), Value::Float(2.0)), Ok(Value::Bool(true)));
        assert_eq!(
            binary(BinaryOp::Greater, Value::from("b"), Value::from("a")),
            Ok(Value::Bool(true))
        );
        assert!(binary(BinaryOp::Less, Value::from("b"), int(1)).is_err());
    }

    #[test]
    fn test_concat() {
        assert_eq!(
            binary(BinaryOp::Concat, Value::from("n="), int(4)),
            Ok(Value::from("n=4"))
        );
    }
}

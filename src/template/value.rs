//! Runtime values and the pure helper functions every template may use.

use super::TemplateError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
}

impl Value {
    pub fn empty() -> Self {
        Value::Str(String::new())
    }

    /// Empty string, zero, false and the empty list are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Int(n) => *n != 0,
            Value::Bool(b) => *b,
            Value::List(l) => !l.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
        }
    }

    /// Integer view of a value. Numeric strings are accepted.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(_) | Value::List(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Names of the helpers handled by [`call_helper`].
pub const HELPERS: &[&str] = &[
    "eq", "ne", "not", "and", "or", "len", "index", "lower", "upper", "print",
];

pub fn is_helper(name: &str) -> bool {
    HELPERS.contains(&name)
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), other) | (other, Value::Int(x)) => other.as_int() == Some(*x),
        _ => a == b,
    }
}

pub fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), TemplateError> {
    if args.len() != expected {
        return Err(TemplateError::Arity {
            name: name.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        });
    }
    Ok(())
}

pub fn at_least(name: &str, args: &[Value], min: usize) -> Result<(), TemplateError> {
    if args.len() < min {
        return Err(TemplateError::Arity {
            name: name.to_string(),
            expected: format!("at least {}", min),
            got: args.len(),
        });
    }
    Ok(())
}

/// Evaluate a pure helper. `name` must satisfy [`is_helper`].
pub fn call_helper(name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    match name {
        "eq" => {
            at_least(name, &args, 2)?;
            let first = &args[0];
            Ok(Value::Bool(args[1..].iter().any(|v| loosely_equal(first, v))))
        }
        "ne" => {
            arity(name, &args, 2)?;
            Ok(Value::Bool(!loosely_equal(&args[0], &args[1])))
        }
        "not" => {
            arity(name, &args, 1)?;
            Ok(Value::Bool(!args[0].truthy()))
        }
        // Both return the deciding operand, not a bool.
        "and" => {
            at_least(name, &args, 1)?;
            let pos = args.iter().position(|v| !v.truthy()).unwrap_or(args.len() - 1);
            Ok(args.into_iter().nth(pos).unwrap_or_else(Value::empty))
        }
        "or" => {
            at_least(name, &args, 1)?;
            let pos = args.iter().position(Value::truthy).unwrap_or(args.len() - 1);
            Ok(args.into_iter().nth(pos).unwrap_or_else(Value::empty))
        }
        "len" => {
            arity(name, &args, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(l) => l.len(),
                other => {
                    return Err(TemplateError::Type {
                        name: name.to_string(),
                        message: format!("cannot take length of {}", other.type_name()),
                    });
                }
            };
            Ok(Value::Int(n as i64))
        }
        "index" => {
            arity(name, &args, 2)?;
            let Some(i) = args[1].as_int() else {
                return Err(TemplateError::Type {
                    name: name.to_string(),
                    message: "index must be an integer".to_string(),
                });
            };
            let picked = match &args[0] {
                Value::List(l) => usize::try_from(i).ok().and_then(|i| l.get(i).cloned()),
                Value::Str(s) => usize::try_from(i)
                    .ok()
                    .and_then(|i| s.split_whitespace().nth(i))
                    .map(Value::from),
                other => {
                    return Err(TemplateError::Type {
                        name: name.to_string(),
                        message: format!("cannot index {}", other.type_name()),
                    });
                }
            };
            Ok(picked.unwrap_or_else(Value::empty))
        }
        "lower" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_lowercase()))
        }
        "upper" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_uppercase()))
        }
        "print" => Ok(Value::Str(
            args.iter().map(Value::to_string).collect::<Vec<_>>().join(" "),
        )),
        other => Err(TemplateError::UnknownFunction(other.to_string())),
    }
}

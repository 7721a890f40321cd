//! Restricted template language for dynamic commands.
//!
//! Templates are parsed once into a [`Template`] and rendered against a
//! [`FunctionEnv`]: the per-message context fields plus a closed set of
//! capability functions. Nothing outside that set is reachable.

mod eval;
mod parser;
mod value;

pub use eval::{FunctionEnv, MAX_CALLS, MAX_OUTPUT};
pub use parser::{Command, Node, Operand, Pipeline};
pub use value::{HELPERS, Value, arity, at_least, call_helper, is_helper};

use thiserror::Error;

/// Template parse and evaluation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("function \"{0}\" not defined")]
    UnknownFunction(String),
    #[error("can't evaluate field {0}")]
    UnknownField(String),
    #[error("{0} is not a function")]
    NotAFunction(String),
    #[error("wrong number of args for {name}: want {expected} got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("{name}: {message}")]
    Type { name: String, message: String },
    #[error("{name}: {message}")]
    Function { name: String, message: String },
    #[error("more than {0} function calls")]
    CallBudget(usize),
    #[error("output too large")]
    OutputTooLarge,
}

impl TemplateError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::UnknownFunction(_) => "unknown_function",
            Self::UnknownField(_) => "unknown_field",
            Self::NotAFunction(_) => "not_a_function",
            Self::Arity { .. } => "arity",
            Self::Type { .. } => "type",
            Self::Function { .. } => "function",
            Self::CallBudget(_) => "call_budget",
            Self::OutputTooLarge => "output_too_large",
        }
    }

    /// One-line chat diagnostic for a failed template.
    pub fn diagnostic(&self, template_name: &str) -> String {
        format!("template error in '{}': {}", template_name, self)
    }
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            name: name.into(),
            nodes: parser::parse(source)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Render against an environment.
    pub async fn render(&self, env: &dyn FunctionEnv) -> Result<String, TemplateError> {
        let _timer = crate::telemetry::TemplateTimer::new();
        eval::Evaluator::new(env).render(&self.nodes).await
    }
}

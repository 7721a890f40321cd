//! Async template evaluator.
//!
//! Capability functions can reach external services, so evaluation is async.
//! Recursion over sub-pipelines and nested `if` blocks goes through boxed
//! futures.

use super::parser::{Command, Node, Operand, Pipeline};
use super::value::{Value, call_helper, is_helper};
use super::TemplateError;
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Upper bound on capability calls in one evaluation.
pub const MAX_CALLS: usize = 32;

/// Upper bound on rendered output, in bytes.
pub const MAX_OUTPUT: usize = 8 * 1024;

/// The closed set of context fields and capability functions a template sees.
#[async_trait]
pub trait FunctionEnv: Send + Sync {
    /// Value of a context field (`.User` looks up `"User"`).
    fn field(&self, name: &str) -> Option<Value>;

    fn has_function(&self, name: &str) -> bool;

    /// Invoke a capability. Soft failures come back as values, not errors.
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TemplateError>;
}

pub(super) struct Evaluator<'e> {
    env: &'e dyn FunctionEnv,
    calls: AtomicUsize,
}

impl<'e> Evaluator<'e> {
    pub(super) fn new(env: &'e dyn FunctionEnv) -> Self {
        Self {
            env,
            calls: AtomicUsize::new(0),
        }
    }

    pub(super) fn render<'a>(&'a self, nodes: &'a [Node]) -> BoxFuture<'a, Result<String, TemplateError>> {
        async move {
            let mut out = String::new();
            for node in nodes {
                match node {
                    Node::Text(t) => out.push_str(t),
                    Node::Action(p) => {
                        let v = self.pipeline(p).await?;
                        out.push_str(&v.to_string());
                    }
                    Node::If {
                        cond,
                        then,
                        otherwise,
                    } => {
                        let branch = if self.pipeline(cond).await?.truthy() {
                            then
                        } else {
                            otherwise
                        };
                        out.push_str(&self.render(branch).await?);
                    }
                }
                if out.len() > MAX_OUTPUT {
                    return Err(TemplateError::OutputTooLarge);
                }
            }
            Ok(out)
        }
        .boxed()
    }

    fn pipeline<'a>(&'a self, pipeline: &'a Pipeline) -> BoxFuture<'a, Result<Value, TemplateError>> {
        async move {
            let mut carried: Option<Value> = None;
            for command in &pipeline.commands {
                carried = Some(self.command(command, carried.take()).await?);
            }
            Ok(carried.unwrap_or_else(Value::empty))
        }
        .boxed()
    }

    async fn command(&self, command: &Command, carried: Option<Value>) -> Result<Value, TemplateError> {
        let (head, rest) = match command.operands.split_first() {
            Some(split) => split,
            None => return Ok(Value::empty()),
        };

        let Operand::Ident(name) = head else {
            if !rest.is_empty() || carried.is_some() {
                return Err(TemplateError::NotAFunction(describe(head)));
            }
            return self.operand(head).await;
        };

        let mut args = Vec::with_capacity(rest.len() + 1);
        for op in rest {
            args.push(self.operand(op).await?);
        }
        args.extend(carried);

        if is_helper(name) {
            return call_helper(name, args);
        }
        if !self.env.has_function(name) {
            return Err(TemplateError::UnknownFunction(name.clone()));
        }
        if self.calls.fetch_add(1, Ordering::Relaxed) >= MAX_CALLS {
            return Err(TemplateError::CallBudget(MAX_CALLS));
        }
        self.env.call(name, args).await
    }

    async fn operand(&self, op: &Operand) -> Result<Value, TemplateError> {
        match op {
            Operand::Str(s) => Ok(Value::Str(s.clone())),
            Operand::Int(n) => Ok(Value::Int(*n)),
            Operand::Bool(b) => Ok(Value::Bool(*b)),
            Operand::Field(f) => self
                .env
                .field(f)
                .ok_or_else(|| TemplateError::UnknownField(f.clone())),
            Operand::Sub(p) => self.pipeline(p).await,
            // A bare identifier in argument position is a zero-argument call.
            Operand::Ident(name) => {
                let command = Command {
                    operands: vec![Operand::Ident(name.clone())],
                };
                let pipeline = Pipeline {
                    commands: vec![command],
                };
                self.pipeline(&pipeline).await
            }
        }
    }
}

fn describe(op: &Operand) -> String {
    match op {
        Operand::Str(s) => format!("{:?}", s),
        Operand::Int(n) => n.to_string(),
        Operand::Bool(b) => b.to_string(),
        Operand::Field(f) => format!(".{}", f),
        Operand::Sub(_) => "(...)".to_string(),
        Operand::Ident(i) => i.clone(),
    }
}

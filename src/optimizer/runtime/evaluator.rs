use std::collections::HashMap;

use thiserror::Error;

use crate::optimizer::ast::{AstNode, BinaryOperation, Literal, NodeKind};
use crate::optimizer::transform::folding;

/// A runtime value: a scalar literal or a (possibly sparse) vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(Literal),
    List(Vec<Option<Value>>),
}

impl Value {
    fn as_literal(&self) -> Result<&Literal, EvalError> {
        match self {
            Value::Literal(literal) => Ok(literal),
            Value::List(_) => Err(EvalError::Unsupported("scalar operation on a vector value".to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("variable '{0}' read before it was assigned")]
    Uninitialized(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("vector index {0} out of range or absent")]
    AbsentSlot(i64),

    #[error("iteration limit exceeded")]
    IterationLimit,

    #[error("function returned no value")]
    MissingReturn,

    #[error("unsupported at runtime: {0}")]
    Unsupported(String),
}

enum Flow {
    Normal,
    Returned(Option<Value>),
}

/// A small straight interpreter: lexical frames of named values, concrete
/// loop execution with an iteration guard, calls through embedded callee
/// definitions.
pub struct Evaluator {
    frames: Vec<HashMap<String, Option<Value>>>,
    iteration_limit: usize,
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator {
            frames: vec![HashMap::new()],
            iteration_limit: 1 << 20,
        }
    }

    /// Runs a function over literal arguments and yields its return value.
    pub fn evaluate_function(function: &AstNode, arguments: &[Value]) -> Result<Value, EvalError> {
        let (parameters, body) = match function.kind() {
            NodeKind::FUNCTION { parameters, body, .. } => (parameters, body),
            _ => return Err(EvalError::Unsupported("evaluation target is not a function".to_string())),
        };
        if parameters.len() != arguments.len() {
            return Err(EvalError::Unsupported("argument count mismatch".to_string()));
        }

        let mut evaluator = Evaluator::new();
        for (parameter, argument) in parameters.iter().zip(arguments) {
            if let NodeKind::PARAMETER { identifier, .. } = parameter.kind() {
                evaluator.bind(identifier, Some(argument.clone()));
            }
        }
        match evaluator.execute(body)? {
            Flow::Returned(Some(value)) => Ok(value),
            Flow::Returned(None) | Flow::Normal => Err(EvalError::MissingReturn),
        }
    }

    /// Evaluates a bare expression against named inputs; the oracle for
    /// circuit-equivalence testing.
    pub fn evaluate_expression(expression: &AstNode, inputs: &HashMap<String, Literal>) -> Result<Literal, EvalError> {
        let mut evaluator = Evaluator::new();
        for (name, literal) in inputs {
            evaluator.bind(name, Some(Value::Literal(literal.clone())));
        }
        let value = evaluator.expression(expression)?;
        value.as_literal().cloned()
    }

    fn bind(&mut self, name: &str, value: Option<Value>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> Result<&Option<Value>, EvalError> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Ok(value);
            }
        }
        Err(EvalError::UnknownVariable(name.to_string()))
    }

    fn assign(&mut self, name: &str, value: Option<Value>) -> Result<(), EvalError> {
        for frame in self.frames.iter_mut().rev() {
            if let Some(slot) = frame.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        Err(EvalError::UnknownVariable(name.to_string()))
    }

    fn execute(&mut self, statement: &AstNode) -> Result<Flow, EvalError> {
        match statement.kind() {
            NodeKind::VAR_DECLARATION { identifier, expression, .. } => {
                let value = match expression {
                    Some(expression) => Some(self.expression(expression)?),
                    None => None,
                };
                self.bind(identifier, value);
                Ok(Flow::Normal)
            }
            NodeKind::ASSIGNMENT { target, expression } => {
                let value = self.expression(expression)?;
                match target.kind() {
                    NodeKind::IDENTIFIER(name) => self.assign(name, Some(value))?,
                    NodeKind::INDEX_ACCESS { target: inner, index } => {
                        let name = match inner.kind() {
                            NodeKind::IDENTIFIER(name) => name.clone(),
                            _ => return Err(EvalError::Unsupported("indexed write through a non-variable".to_string())),
                        };
                        let slot = self.index_value(index)?;
                        let mut list = match self.lookup(&name)?.clone() {
                            Some(Value::List(items)) => items,
                            Some(Value::Literal(_)) => {
                                return Err(EvalError::Unsupported("indexed write into a scalar".to_string()));
                            }
                            None => vec![],
                        };
                        while list.len() <= slot {
                            list.push(None);
                        }
                        list[slot] = Some(value);
                        self.assign(&name, Some(Value::List(list)))?;
                    }
                    _ => return Err(EvalError::Unsupported("assignment target shape".to_string())),
                }
                Ok(Flow::Normal)
            }
            NodeKind::SCOPE_BLOCK(statements) => {
                self.frames.push(HashMap::new());
                for statement in statements {
                    if let Flow::Returned(value) = self.execute(statement)? {
                        self.frames.pop();
                        return Ok(Flow::Returned(value));
                    }
                }
                self.frames.pop();
                Ok(Flow::Normal)
            }
            NodeKind::BRANCH { condition, if_branch, else_branch } => {
                if self.condition(condition)? {
                    self.execute(if_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            NodeKind::FOR_LOOP { initializer, condition, update, body } => {
                self.frames.push(HashMap::new());
                if let NodeKind::SCOPE_BLOCK(statements) = initializer.kind() {
                    for statement in statements {
                        if let Flow::Returned(value) = self.execute(statement)? {
                            self.frames.pop();
                            return Ok(Flow::Returned(value));
                        }
                    }
                }
                let mut iterations = 0usize;
                while self.condition(condition)? {
                    if iterations >= self.iteration_limit {
                        self.frames.pop();
                        return Err(EvalError::IterationLimit);
                    }
                    if let Flow::Returned(value) = self.execute(body)? {
                        self.frames.pop();
                        return Ok(Flow::Returned(value));
                    }
                    if let NodeKind::SCOPE_BLOCK(statements) = update.kind() {
                        for statement in statements {
                            if let Flow::Returned(value) = self.execute(statement)? {
                                self.frames.pop();
                                return Ok(Flow::Returned(value));
                            }
                        }
                    }
                    iterations += 1;
                }
                self.frames.pop();
                Ok(Flow::Normal)
            }
            NodeKind::WHILE_LOOP { condition, body } => {
                let mut iterations = 0usize;
                while self.condition(condition)? {
                    if iterations >= self.iteration_limit {
                        return Err(EvalError::IterationLimit);
                    }
                    if let Flow::Returned(value) = self.execute(body)? {
                        return Ok(Flow::Returned(value));
                    }
                    iterations += 1;
                }
                Ok(Flow::Normal)
            }
            NodeKind::RETURN { expression } => {
                let value = match expression {
                    Some(expression) => Some(self.expression(expression)?),
                    None => None,
                };
                Ok(Flow::Returned(value))
            }
            _ => Err(EvalError::Unsupported("statement shape".to_string())),
        }
    }

    fn expression(&mut self, node: &AstNode) -> Result<Value, EvalError> {
        match node.kind() {
            NodeKind::LITERAL(literal) => Ok(Value::Literal(literal.clone())),
            NodeKind::IDENTIFIER(name) => match self.lookup(name)? {
                Some(value) => Ok(value.clone()),
                None => Err(EvalError::Uninitialized(name.clone())),
            },
            NodeKind::BINARY_OP { op, lhs, rhs } => {
                let lhs = self.expression(lhs)?;
                let rhs = self.expression(rhs)?;
                let lhs = lhs.as_literal()?;
                let rhs = rhs.as_literal()?;
                let division = matches!(
                    op.plaintext_equivalent(),
                    BinaryOperation::DIV | BinaryOperation::MOD
                );
                if division && rhs.is_zero() && matches!(rhs, Literal::INT(_)) {
                    return Err(EvalError::DivisionByZero);
                }
                match folding::fold_binary(*op, lhs, rhs) {
                    Ok(Some(result)) => Ok(Value::Literal(result)),
                    Ok(None) => Err(EvalError::Unsupported(format!(
                        "operator '{}' on {} and {}", op.symbol(), lhs.type_name(), rhs.type_name()
                    ))),
                    Err(_) => Err(EvalError::Unsupported(format!(
                        "operator '{}' on mismatched types", op.symbol()
                    ))),
                }
            }
            NodeKind::UNARY_OP { op, expression } => {
                let value = self.expression(expression)?;
                let literal = value.as_literal()?;
                match folding::fold_unary(*op, literal) {
                    Some(result) => Ok(Value::Literal(result)),
                    None => Err(EvalError::Unsupported(format!(
                        "operator '{}' on {}", op.symbol(), literal.type_name()
                    ))),
                }
            }
            NodeKind::INDEX_ACCESS { target, index } => {
                let slot = self.index_value(index)?;
                let target = self.expression(target)?;
                match target {
                    Value::List(items) => match items.get(slot) {
                        Some(Some(value)) => Ok(value.clone()),
                        _ => Err(EvalError::AbsentSlot(slot as i64)),
                    },
                    Value::Literal(_) => Err(EvalError::Unsupported("indexing into a scalar".to_string())),
                }
            }
            NodeKind::EXPRESSION_LIST(items) => {
                let mut values = vec![];
                for item in items {
                    values.push(match item {
                        Some(item) => Some(self.expression(item)?),
                        None => None,
                    });
                }
                Ok(Value::List(values))
            }
            NodeKind::FUNC_CALL { function, arguments } => {
                let mut values = vec![];
                for argument in arguments {
                    values.push(self.expression(argument)?);
                }
                Evaluator::evaluate_function(function, &values)
            }
            NodeKind::EXTERNAL_CALL { identifier, .. } => {
                Err(EvalError::Unsupported(format!("external call to '{}'", identifier)))
            }
            _ => Err(EvalError::Unsupported("expression shape".to_string())),
        }
    }

    fn condition(&mut self, node: &AstNode) -> Result<bool, EvalError> {
        let value = self.expression(node)?;
        let literal = value.as_literal()?;
        literal.truthiness()
            .ok_or_else(|| EvalError::Unsupported(format!("condition of type {}", literal.type_name())))
    }

    fn index_value(&mut self, node: &AstNode) -> Result<usize, EvalError> {
        let value = self.expression(node)?;
        match value.as_literal()? {
            Literal::INT(index) if *index >= 0 => Ok(*index as usize),
            Literal::INT(index) => Err(EvalError::AbsentSlot(*index)),
            other => Err(EvalError::Unsupported(format!("index of type {}", other.type_name()))),
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

//! A tree-walking interpreter for the source language.
//!
//! It accepts the program at every stage that still has the tree shape, from
//! the source program through to the output of allocation exposure, which
//! makes it the reference the lowering passes are tested against. The heap is
//! modelled as an unbounded space: `free_ptr` always sits far below
//! `fromspace_end`, so programs never take the collection branch.

use std::{cell::RefCell, rc::Rc};

use hashbrown::HashMap;
use itertools::Itertools;
use thiserror::Error;

use crate::frontend::{
    ast::{Constant, Expression, FunctionDefinition, PrimitiveOperator, Program, Statement},
    intern::InternedSymbol,
};

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Tuple(Rc<RefCell<Vec<Value>>>),
    Function(InternedSymbol),
}

impl Value {
    /// The machine word a value is printed as by `print_int`
    fn as_word(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Bool(value) => Some(*value as i64),
            Value::Tuple(_) | Value::Function(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Tuple(fields) => write!(f, "({})", fields.borrow().iter().join(", ")),
            Value::Function(name) => write!(f, "<function {name}>"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpreterError {
    #[error("`{0}` is not bound")]
    UnboundVariable(InternedSymbol),
    #[error("`{operation}` cannot be applied to `{value}`")]
    InvalidOperand { operation: String, value: String },
    #[error("index {index} is out of bounds for `{tuple}`")]
    IndexOutOfBounds { index: i64, tuple: String },
    #[error("the program did not finish within {0} steps")]
    OutOfFuel(usize),
}

/// Number of statements the interpreter executes before giving up
pub const DEFAULT_FUEL: usize = 1_000_000;

/// Runs a program and returns every value it printed, in order. Booleans are
/// printed as 0 and 1, like the runtime's `print_int` does.
pub fn interpret(program: &Program) -> Result<Vec<i64>, InterpreterError> {
    interpret_with_fuel(program, DEFAULT_FUEL)
}

pub fn interpret_with_fuel(program: &Program, fuel: usize) -> Result<Vec<i64>, InterpreterError> {
    let mut interpreter = Interpreter {
        functions: program.function_definitions().map(|f| (f.name, f)).collect(),
        output: Vec::new(),
        fuel,
        initial_fuel: fuel,
    };

    let mut locals = HashMap::new();
    interpreter.execute_block(&program.statements, &mut locals)?;

    Ok(interpreter.output)
}

enum Flow {
    Continue,
    Return(Value),
}

struct Interpreter<'a> {
    functions: HashMap<InternedSymbol, &'a FunctionDefinition>,
    output: Vec<i64>,
    fuel: usize,
    initial_fuel: usize,
}

type Locals = HashMap<InternedSymbol, Value>;

impl<'a> Interpreter<'a> {
    fn execute_block(&mut self, statements: &'a [Statement], locals: &mut Locals) -> Result<Flow, InterpreterError> {
        for statement in statements {
            if let Flow::Return(value) = self.execute(statement, locals)? {
                return Ok(Flow::Return(value));
            }
        }

        Ok(Flow::Continue)
    }

    fn execute(&mut self, statement: &'a Statement, locals: &mut Locals) -> Result<Flow, InterpreterError> {
        self.fuel = self
            .fuel
            .checked_sub(1)
            .ok_or(InterpreterError::OutOfFuel(self.initial_fuel))?;

        match statement {
            Statement::Assign { target, value } => {
                let value = self.evaluate(value, locals)?;
                locals.insert(*target, value);
            }
            Statement::Print(value) => {
                let value = self.evaluate(value, locals)?;
                let word = value.as_word().ok_or_else(|| invalid("print", &value))?;
                self.output.push(word);
            }
            Statement::If {
                condition,
                positive,
                negative,
            } => {
                let branch = match self.evaluate_bool(condition, locals)? {
                    true => positive,
                    false => negative,
                };

                return self.execute_block(branch, locals);
            }
            Statement::While { condition, body } => {
                while self.evaluate_bool(condition, locals)? {
                    if let Flow::Return(value) = self.execute_block(body, locals)? {
                        return Ok(Flow::Return(value));
                    }

                    self.fuel = self
                        .fuel
                        .checked_sub(1)
                        .ok_or(InterpreterError::OutOfFuel(self.initial_fuel))?;
                }
            }
            Statement::Return(value) => return Ok(Flow::Return(self.evaluate(value, locals)?)),
            // Definitions are collected up front
            Statement::FunctionDefinition(_) => {}
            Statement::Collect { .. } => {}
            Statement::TupleSet {
                tuple,
                index,
                value,
            } => {
                let value = self.evaluate(value, locals)?;
                let tuple_value = lookup(locals, *tuple)?;

                let Value::Tuple(fields) = &tuple_value else {
                    return Err(invalid("tuple_set", &tuple_value));
                };

                let mut fields = fields.borrow_mut();
                let length = fields.len();
                let slot = fields.get_mut(*index).ok_or_else(|| InterpreterError::IndexOutOfBounds {
                    index: *index as i64,
                    tuple: format!("tuple of length {length}"),
                })?;

                *slot = value;
            }
        }

        Ok(Flow::Continue)
    }

    fn evaluate_bool(&mut self, expression: &'a Expression, locals: &mut Locals) -> Result<bool, InterpreterError> {
        match self.evaluate(expression, locals)? {
            Value::Bool(value) => Ok(value),
            value => Err(invalid("condition", &value)),
        }
    }

    fn evaluate(&mut self, expression: &'a Expression, locals: &mut Locals) -> Result<Value, InterpreterError> {
        match expression {
            Expression::Variable(name) => {
                if let Some(value) = locals.get(name) {
                    return Ok(value.clone());
                }

                if self.functions.contains_key(name) {
                    return Ok(Value::Function(*name));
                }

                Err(InterpreterError::UnboundVariable(*name))
            }
            Expression::Constant(Constant::Int(value)) => Ok(Value::Int(*value)),
            Expression::Constant(Constant::Bool(value)) => Ok(Value::Bool(*value)),
            Expression::Primitive { operator, operands } => {
                self.evaluate_primitive(*operator, operands, locals)
            }
            Expression::Call { target, arguments } => {
                let target = self.evaluate(target, locals)?;
                let arguments = arguments
                    .iter()
                    .map(|argument| self.evaluate(argument, locals))
                    .collect::<Result<Vec<_>, _>>()?;

                let Value::Function(name) = target else {
                    return Err(invalid("call", &target));
                };

                let function = self
                    .functions
                    .get(&name)
                    .copied()
                    .ok_or(InterpreterError::UnboundVariable(name))?;
                let mut frame: Locals = function
                    .parameters
                    .iter()
                    .map(|(name, _)| *name)
                    .zip(arguments)
                    .collect();

                match self.execute_block(&function.body, &mut frame)? {
                    Flow::Return(value) => Ok(value),
                    Flow::Continue => Ok(Value::Int(0)),
                }
            }
            Expression::Tuple(fields) => {
                let fields = fields
                    .iter()
                    .map(|field| self.evaluate(field, locals))
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Value::Tuple(Rc::new(RefCell::new(fields))))
            }
            Expression::Begin { statements, value } => {
                if let Flow::Return(value) = self.execute_block(statements, locals)? {
                    return Ok(value);
                }

                self.evaluate(value, locals)
            }
            Expression::GlobalValue(name) => match name.value() {
                "free_ptr" => Ok(Value::Int(0)),
                _ => Ok(Value::Int(i64::MAX)),
            },
            Expression::Allocate { ty, .. } => {
                let crate::middle::ty::Type::Tuple(fields) = ty else {
                    return Err(InterpreterError::InvalidOperand {
                        operation: "allocate".into(),
                        value: ty.to_string(),
                    });
                };

                Ok(Value::Tuple(Rc::new(RefCell::new(vec![
                    Value::Int(0);
                    fields.len()
                ]))))
            }
        }
    }

    fn evaluate_primitive(
        &mut self,
        operator: PrimitiveOperator,
        operands: &'a [Expression],
        locals: &mut Locals,
    ) -> Result<Value, InterpreterError> {
        use PrimitiveOperator::*;

        // `and` and `or` only evaluate their right operand when they need to
        if let (And | Or, [lhs, rhs]) = (operator, operands) {
            let lhs = self.evaluate_bool(lhs, locals)?;

            return match (operator, lhs) {
                (And, false) => Ok(Value::Bool(false)),
                (Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(self.evaluate_bool(rhs, locals)?)),
            };
        }

        let values = operands
            .iter()
            .map(|operand| self.evaluate(operand, locals))
            .collect::<Result<Vec<_>, _>>()?;

        let result = match (operator, values.as_slice()) {
            (Add, [Value::Int(a), Value::Int(b)]) => Value::Int(a.wrapping_add(*b)),
            (Sub, [Value::Int(a), Value::Int(b)]) => Value::Int(a.wrapping_sub(*b)),
            (Mult, [Value::Int(a), Value::Int(b)]) => Value::Int(a.wrapping_mul(*b)),
            (Neg, [Value::Int(a)]) => Value::Int(a.wrapping_neg()),
            (Not, [Value::Bool(a)]) => Value::Bool(!a),
            (Eq, [a, b]) => Value::Bool(a == b),
            (Ne, [a, b]) => Value::Bool(a != b),
            (Lt, [Value::Int(a), Value::Int(b)]) => Value::Bool(a < b),
            (Lte, [Value::Int(a), Value::Int(b)]) => Value::Bool(a <= b),
            (Gt, [Value::Int(a), Value::Int(b)]) => Value::Bool(a > b),
            (Gte, [Value::Int(a), Value::Int(b)]) => Value::Bool(a >= b),
            (Subscript, [Value::Tuple(fields), Value::Int(index)]) => {
                let fields = fields.borrow();

                usize::try_from(*index)
                    .ok()
                    .and_then(|i| fields.get(i))
                    .cloned()
                    .ok_or_else(|| InterpreterError::IndexOutOfBounds {
                        index: *index,
                        tuple: format!("({})", fields.iter().join(", ")),
                    })?
            }
            (operator, values) => {
                return Err(InterpreterError::InvalidOperand {
                    operation: operator.to_string(),
                    value: values.iter().join(", "),
                });
            }
        };

        Ok(result)
    }
}

fn lookup(locals: &Locals, name: InternedSymbol) -> Result<Value, InterpreterError> {
    locals
        .get(&name)
        .cloned()
        .ok_or(InterpreterError::UnboundVariable(name))
}

fn invalid(operation: &str, value: &Value) -> InterpreterError {
    InterpreterError::InvalidOperand {
        operation: operation.into(),
        value: value.to_string(),
    }
}

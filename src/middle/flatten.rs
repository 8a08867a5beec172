//! Removes complex operands.
//!
//! After this pass the operands of every primitive, call and tuple are atoms,
//! and every condition is either an atom or a test over atoms. The values
//! computed along the way are bound to fresh temporaries in evaluation order.

use crate::{
    error::{CompileError, CompileResult},
    frontend::{
        ast::{Expression, FunctionDefinition, PrimitiveOperator, Program, Statement},
        intern::NameGenerator,
    },
};

pub fn flatten_program(program: &Program, names: &mut NameGenerator) -> CompileResult<Program> {
    let mut flattener = Flattener { names };

    Ok(Program::new(flattener.flatten_block(&program.statements)?))
}

struct Flattener<'a> {
    names: &'a mut NameGenerator,
}

/// Statements which must run before an expression, and the expression
/// itself
type Flattened = (Vec<Statement>, Expression);

impl Flattener<'_> {
    fn flatten_block(&mut self, statements: &[Statement]) -> CompileResult<Vec<Statement>> {
        let mut output = Vec::with_capacity(statements.len());

        for statement in statements {
            self.flatten_statement(statement, &mut output)?;
        }

        Ok(output)
    }

    fn flatten_statement(&mut self, statement: &Statement, output: &mut Vec<Statement>) -> CompileResult<()> {
        match statement {
            Statement::Assign { target, value } => {
                let (bindings, value) = self.flatten_expression(value, false)?;

                output.extend(bindings);
                output.push(Statement::Assign {
                    target: *target,
                    value,
                });
            }
            Statement::Print(value) => {
                let (bindings, value) = self.flatten_expression(value, true)?;

                output.extend(bindings);
                output.push(Statement::Print(value));
            }
            Statement::If {
                condition,
                positive,
                negative,
            } => {
                let (bindings, condition) = self.flatten_condition(condition)?;

                output.extend(bindings);
                output.push(Statement::If {
                    condition,
                    positive: self.flatten_block(positive)?,
                    negative: self.flatten_block(negative)?,
                });
            }
            Statement::While { condition, body } => {
                let (bindings, condition) = self.flatten_condition(condition)?;

                // the bindings belong to the condition so that they are
                // recomputed before every test
                let condition = match bindings.is_empty() {
                    true => condition,
                    false => Expression::Begin {
                        statements: bindings,
                        value: Box::new(condition),
                    },
                };

                output.push(Statement::While {
                    condition,
                    body: self.flatten_block(body)?,
                });
            }
            Statement::Return(Expression::Call { target, arguments }) => {
                // kept in place so it can become a tail call
                let (bindings, call) = self.flatten_call(target, arguments)?;

                output.extend(bindings);
                output.push(Statement::Return(call));
            }
            Statement::Return(value) => {
                let (bindings, value) = self.flatten_expression(value, true)?;

                output.extend(bindings);
                output.push(Statement::Return(value));
            }
            Statement::FunctionDefinition(function) => {
                output.push(Statement::FunctionDefinition(FunctionDefinition {
                    body: self.flatten_block(&function.body)?,
                    ..function.clone()
                }));
            }
            Statement::Collect { bytes } => output.push(Statement::Collect { bytes: *bytes }),
            Statement::TupleSet {
                tuple,
                index,
                value,
            } => {
                let (bindings, value) = self.flatten_expression(value, true)?;

                output.extend(bindings);
                output.push(Statement::TupleSet {
                    tuple: *tuple,
                    index: *index,
                    value,
                });
            }
        }

        Ok(())
    }

    /// Conditions may stay a test over atoms, since control explication turns
    /// those into branches directly
    fn flatten_condition(&mut self, condition: &Expression) -> CompileResult<Flattened> {
        let (mut bindings, condition) = self.flatten_expression(condition, false)?;

        let is_test = match &condition {
            Expression::Variable(_) | Expression::Constant(_) => true,
            Expression::Primitive { operator, .. } => {
                operator.is_comparison() || operator.is_short_circuiting() || *operator == PrimitiveOperator::Not
            }
            _ => false,
        };

        if is_test {
            return Ok((bindings, condition));
        }

        let temporary = self.bind(condition, &mut bindings);
        Ok((bindings, temporary))
    }

    fn flatten_expression(&mut self, expression: &Expression, atomic: bool) -> CompileResult<Flattened> {
        let (mut bindings, expression) = match expression {
            Expression::Variable(_) | Expression::Constant(_) => {
                return Ok((Vec::new(), expression.clone()));
            }
            Expression::Primitive {
                operator: operator @ (PrimitiveOperator::And | PrimitiveOperator::Or),
                operands,
            } => self.flatten_short_circuit(*operator, operands)?,
            Expression::Primitive { operator, operands } => {
                let (bindings, operands) = self.flatten_operands(operands)?;

                (
                    bindings,
                    Expression::Primitive {
                        operator: *operator,
                        operands,
                    },
                )
            }
            Expression::Call { target, arguments } => self.flatten_call(target, arguments)?,
            Expression::Tuple(fields) => {
                let (bindings, fields) = self.flatten_operands(fields)?;

                (bindings, Expression::Tuple(fields))
            }
            Expression::Begin { statements, value } => {
                let mut bindings = self.flatten_block(statements)?;
                let (value_bindings, value) = self.flatten_expression(value, atomic)?;
                bindings.extend(value_bindings);

                return Ok((bindings, value));
            }
            Expression::GlobalValue(_) | Expression::Allocate { .. } => (Vec::new(), expression.clone()),
        };

        if atomic && !expression.is_atomic() {
            let temporary = self.bind(expression, &mut bindings);
            return Ok((bindings, temporary));
        }

        Ok((bindings, expression))
    }

    fn flatten_operands(&mut self, operands: &[Expression]) -> CompileResult<(Vec<Statement>, Vec<Expression>)> {
        let mut bindings = Vec::new();
        let mut atoms = Vec::with_capacity(operands.len());

        for operand in operands {
            let (operand_bindings, atom) = self.flatten_expression(operand, true)?;
            bindings.extend(operand_bindings);
            atoms.push(atom);
        }

        Ok((bindings, atoms))
    }

    fn flatten_call(&mut self, target: &Expression, arguments: &[Expression]) -> CompileResult<Flattened> {
        let (mut bindings, target) = self.flatten_expression(target, true)?;
        let (argument_bindings, arguments) = self.flatten_operands(arguments)?;
        bindings.extend(argument_bindings);

        Ok((
            bindings,
            Expression::Call {
                target: Box::new(target),
                arguments,
            },
        ))
    }

    /// `and` and `or` over atoms are left alone. When the right operand needs
    /// work of its own, that work must only happen when the left operand does
    /// not already decide the result, so the operator becomes an `if` which
    /// assigns the result to a temporary.
    fn flatten_short_circuit(&mut self, operator: PrimitiveOperator, operands: &[Expression]) -> CompileResult<Flattened> {
        let [lhs, rhs] = operands else {
            return Err(CompileError::unsupported(
                "flatten",
                Expression::Primitive {
                    operator,
                    operands: operands.to_vec(),
                },
            ));
        };

        let (mut bindings, lhs) = self.flatten_expression(lhs, true)?;

        if rhs.is_atomic() {
            return Ok((
                bindings,
                Expression::Primitive {
                    operator,
                    operands: vec![lhs, rhs.clone()],
                },
            ));
        }

        let result = self.names.fresh("tmp");
        let (mut rhs_bindings, rhs) = self.flatten_expression(rhs, false)?;
        rhs_bindings.push(Statement::Assign {
            target: result,
            value: rhs,
        });

        let decided = vec![Statement::Assign {
            target: result,
            value: Expression::bool(operator == PrimitiveOperator::Or),
        }];

        let (positive, negative) = match operator {
            PrimitiveOperator::And => (rhs_bindings, decided),
            _ => (decided, rhs_bindings),
        };

        bindings.push(Statement::If {
            condition: lhs,
            positive,
            negative,
        });

        Ok((bindings, Expression::Variable(result)))
    }

    fn bind(&mut self, value: Expression, bindings: &mut Vec<Statement>) -> Expression {
        let temporary = self.names.fresh("tmp");

        bindings.push(Statement::Assign {
            target: temporary,
            value,
        });

        Expression::Variable(temporary)
    }
}

/// Whether an expression only has atoms as operands, which is what every
/// expression looks like once this pass has run
pub fn is_flat(expression: &Expression) -> bool {
    match expression {
        Expression::Variable(_)
        | Expression::Constant(_)
        | Expression::GlobalValue(_)
        | Expression::Allocate { .. } => true,
        Expression::Primitive { operands, .. } | Expression::Tuple(operands) => {
            operands.iter().all(Expression::is_atomic)
        }
        Expression::Call { target, arguments } => {
            target.is_atomic() && arguments.iter().all(Expression::is_atomic)
        }
        Expression::Begin { statements, value } => statements.is_empty() && is_flat(value),
    }
}

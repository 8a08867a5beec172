//! Lowers structured control flow to blocks and jumps.
//!
//! Statements are processed back to front. Each one receives the code that
//! runs after it (its continuation) and returns the code that runs it and
//! then the continuation. Whenever a continuation has to be reachable from
//! more than one place, it is put in a block of its own and referred to by
//! label.

use log::trace;

use crate::{
    error::{CompileError, CompileResult},
    frontend::{
        ast::{self, Constant, PrimitiveOperator},
        intern::{InternedSymbol, NameGenerator},
    },
    middle::{
        cir::{self, Atom, Block, Expression, Statement, start_label},
        type_check::{TypeEnvironment, main_symbol},
    },
};

const STAGE: &str = "explicate control";

/// Expects a program whose allocation has been exposed
pub fn explicate_control(
    program: &ast::Program,
    environment: &TypeEnvironment,
    names: &mut NameGenerator,
) -> CompileResult<cir::Program> {
    let mut functions = Vec::new();

    let mut main_body = Vec::new();
    for statement in &program.statements {
        match statement {
            ast::Statement::FunctionDefinition(function) => functions.push(explicate_function(
                function.name,
                function.parameters.iter().map(|(name, _)| *name).collect(),
                &function.body,
                environment,
                names,
            )?),
            statement => main_body.push(statement.clone()),
        }
    }

    functions.push(explicate_function(
        main_symbol(),
        vec![],
        &main_body,
        environment,
        names,
    )?);

    Ok(cir::Program {
        functions,
        function_names: environment.functions.keys().copied().collect(),
    })
}

fn explicate_function(
    name: InternedSymbol,
    parameters: Vec<InternedSymbol>,
    body: &[ast::Statement],
    environment: &TypeEnvironment,
    names: &mut NameGenerator,
) -> CompileResult<cir::FunctionDefinition> {
    let mut explicator = Explicator {
        names,
        blocks: Vec::new(),
    };

    let entry = explicator.explicate_block(body, vec![Statement::Return(Atom::Constant(Constant::Int(0)))])?;

    // blocks are created back to front, so reverse them to keep the output
    // close to source order
    let mut blocks = vec![Block {
        label: start_label(name),
        statements: entry,
    }];
    blocks.extend(explicator.blocks.into_iter().rev());

    trace!("explicated `{name}` into {} block(s)", blocks.len());

    Ok(cir::FunctionDefinition {
        name,
        parameters,
        blocks,
        variable_types: environment.variables_of(name).cloned().unwrap_or_default(),
    })
}

struct Explicator<'a> {
    names: &'a mut NameGenerator,
    blocks: Vec<Block>,
}

impl Explicator<'_> {
    /// Gives the continuation a label, reusing the target when it is already
    /// just a jump
    fn create_block(&mut self, statements: Vec<Statement>) -> InternedSymbol {
        if let [Statement::Goto(label)] = statements.as_slice() {
            return *label;
        }

        self.push_block(statements)
    }

    /// Always gives the statements a block of their own, even when they are
    /// only a jump
    fn push_block(&mut self, statements: Vec<Statement>) -> InternedSymbol {
        let label = self.names.fresh("block");
        self.blocks.push(Block { label, statements });

        label
    }

    fn explicate_block(
        &mut self,
        statements: &[ast::Statement],
        continuation: Vec<Statement>,
    ) -> CompileResult<Vec<Statement>> {
        statements
            .iter()
            .rev()
            .try_fold(continuation, |continuation, statement| {
                self.explicate_statement(statement, continuation)
            })
    }

    fn explicate_statement(
        &mut self,
        statement: &ast::Statement,
        continuation: Vec<Statement>,
    ) -> CompileResult<Vec<Statement>> {
        let simple = match statement {
            ast::Statement::Assign { target, value } => Statement::Assign {
                target: *target,
                value: to_expression(value)?,
            },
            ast::Statement::Print(value) => Statement::Print(to_atom(value)?),
            ast::Statement::Collect { bytes } => Statement::Collect { bytes: *bytes },
            ast::Statement::TupleSet {
                tuple,
                index,
                value,
            } => Statement::TupleSet {
                tuple: *tuple,
                index: *index,
                value: to_atom(value)?,
            },
            ast::Statement::If {
                condition,
                positive,
                negative,
            } => {
                let join = self.create_block(continuation);

                let positive = self.explicate_block(positive, vec![Statement::Goto(join)])?;
                let positive = self.push_block(positive);

                let negative = self.explicate_block(negative, vec![Statement::Goto(join)])?;
                let negative = self.push_block(negative);

                return self.explicate_predicate(condition, positive, negative);
            }
            ast::Statement::While { condition, body } => {
                let join = self.create_block(continuation);
                let test = self.names.fresh("loop");

                let body = self.explicate_block(body, vec![Statement::Goto(test)])?;
                let body = self.push_block(body);

                let statements = self.explicate_predicate(condition, body, join)?;
                self.blocks.push(Block {
                    label: test,
                    statements,
                });

                return Ok(vec![Statement::Goto(test)]);
            }
            // anything after a return is unreachable, so the continuation is
            // dropped
            ast::Statement::Return(ast::Expression::Call { target, arguments }) => {
                return Ok(vec![Statement::TailCall {
                    target: to_atom(target)?,
                    arguments: arguments.iter().map(to_atom).collect::<CompileResult<_>>()?,
                }]);
            }
            ast::Statement::Return(value) => return Ok(vec![Statement::Return(to_atom(value)?)]),
            ast::Statement::FunctionDefinition(function) => {
                return Err(CompileError::unsupported(STAGE, function.name));
            }
        };

        let mut statements = Vec::with_capacity(continuation.len() + 1);
        statements.push(simple);
        statements.extend(continuation);

        Ok(statements)
    }

    /// Produces code which jumps to `positive` when `condition` holds and to
    /// `negative` otherwise
    fn explicate_predicate(
        &mut self,
        condition: &ast::Expression,
        positive: InternedSymbol,
        negative: InternedSymbol,
    ) -> CompileResult<Vec<Statement>> {
        let statements = match condition {
            ast::Expression::Constant(Constant::Bool(value)) => {
                vec![Statement::Goto(if *value { positive } else { negative })]
            }
            ast::Expression::Variable(name) => vec![Statement::If {
                operator: PrimitiveOperator::Eq,
                lhs: Atom::Variable(*name),
                rhs: Atom::Constant(Constant::Bool(true)),
                positive,
                negative,
            }],
            ast::Expression::Primitive { operator, operands } => match (operator, operands.as_slice()) {
                (PrimitiveOperator::Not, [operand]) => {
                    return self.explicate_predicate(operand, negative, positive);
                }
                (PrimitiveOperator::And, [lhs, rhs]) => {
                    let rhs = self.explicate_predicate(rhs, positive, negative)?;
                    let rhs = self.create_block(rhs);

                    return self.explicate_predicate(lhs, rhs, negative);
                }
                (PrimitiveOperator::Or, [lhs, rhs]) => {
                    let rhs = self.explicate_predicate(rhs, positive, negative)?;
                    let rhs = self.create_block(rhs);

                    return self.explicate_predicate(lhs, positive, rhs);
                }
                (operator, [lhs, rhs]) if operator.is_comparison() => vec![Statement::If {
                    operator: *operator,
                    lhs: to_atom(lhs)?,
                    rhs: to_atom(rhs)?,
                    positive,
                    negative,
                }],
                _ => return Err(CompileError::unsupported(STAGE, condition)),
            },
            ast::Expression::Begin { statements, value } => {
                let test = self.explicate_predicate(value, positive, negative)?;

                return self.explicate_block(statements, test);
            }
            condition => return Err(CompileError::unsupported(STAGE, condition)),
        };

        Ok(statements)
    }
}

fn to_atom(expression: &ast::Expression) -> CompileResult<Atom> {
    match expression {
        ast::Expression::Variable(name) => Ok(Atom::Variable(*name)),
        ast::Expression::Constant(constant) => Ok(Atom::Constant(*constant)),
        expression => Err(CompileError::unsupported(STAGE, expression)),
    }
}

fn to_expression(expression: &ast::Expression) -> CompileResult<Expression> {
    Ok(match expression {
        ast::Expression::Variable(_) | ast::Expression::Constant(_) => {
            Expression::Atom(to_atom(expression)?)
        }
        ast::Expression::Primitive { operator, operands } => Expression::Primitive {
            operator: *operator,
            operands: operands.iter().map(to_atom).collect::<CompileResult<_>>()?,
        },
        ast::Expression::Call { target, arguments } => Expression::Call {
            target: to_atom(target)?,
            arguments: arguments.iter().map(to_atom).collect::<CompileResult<_>>()?,
        },
        ast::Expression::Allocate { bytes, ty } => Expression::Allocate {
            bytes: *bytes,
            ty: ty.clone(),
        },
        ast::Expression::GlobalValue(name) => Expression::GlobalValue(*name),
        ast::Expression::Tuple(_) | ast::Expression::Begin { .. } => {
            return Err(CompileError::unsupported(STAGE, expression));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::ast::{Expression as E, PrimitiveOperator as Op, Program, Statement as S},
        middle::{
            cir::validate,
            expose_allocation::expose_allocation,
            flatten::flatten_program,
            ty::Type,
            type_check::type_check_lowered_program,
        },
    };

    fn explicate(program: &Program) -> cir::Program {
        let mut names = NameGenerator::new();
        let flattened = flatten_program(program, &mut names).unwrap();
        let environment = type_check_lowered_program(&flattened).unwrap();
        let exposed = expose_allocation(&flattened, &environment, &mut names).unwrap();
        let environment = type_check_lowered_program(&exposed).unwrap();

        let program = explicate_control(&exposed, &environment, &mut names).unwrap();
        validate(&program).unwrap();
        program
    }

    fn main_of(program: &cir::Program) -> &cir::FunctionDefinition {
        program
            .functions
            .iter()
            .find(|f| f.name == main_symbol())
            .unwrap()
    }

    fn statements_of(function: &cir::FunctionDefinition, label: InternedSymbol) -> &[Statement] {
        &function
            .blocks
            .iter()
            .find(|b| b.label == label)
            .unwrap()
            .statements
    }

    #[test]
    fn straight_line_code_is_one_block() {
        let program = explicate(&Program::new(vec![
            S::assign("x", E::int(1)),
            S::print(E::var("x")),
        ]));

        let main = main_of(&program);

        assert_eq!(main.blocks.len(), 1);
        assert_eq!(main.blocks[0].label.value(), "main.start");
        assert_eq!(
            main.blocks[0].statements.last(),
            Some(&Statement::Return(Atom::Constant(Constant::Int(0))))
        );
    }

    #[test]
    fn if_shares_a_join_block() {
        let program = explicate(&Program::new(vec![
            S::assign("x", E::int(1)),
            S::if_else(
                E::prim(Op::Lt, [E::var("x"), E::int(2)]),
                vec![S::print(E::int(1))],
                vec![S::print(E::int(2))],
            ),
            S::print(E::int(3)),
        ]));

        let main = main_of(&program);

        // entry, then, else and join
        assert_eq!(main.blocks.len(), 4);
        assert!(matches!(
            main.blocks[0].statements.last(),
            Some(Statement::If {
                operator: PrimitiveOperator::Lt,
                ..
            })
        ));

        let join_targets = main.blocks[1..]
            .iter()
            .filter_map(|b| match b.statements.last() {
                Some(Statement::Goto(label)) => Some(*label),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(join_targets.len(), 2);
        assert_eq!(join_targets[0], join_targets[1]);
    }

    #[test]
    fn empty_branches_still_get_a_block() {
        let program = explicate(&Program::new(vec![
            S::assign("x", E::int(1)),
            S::if_else(
                E::prim(Op::Lt, [E::var("x"), E::int(2)]),
                vec![],
                vec![S::print(E::int(2))],
            ),
            S::print(E::int(3)),
        ]));

        let main = main_of(&program);

        let Some(Statement::If {
            positive, negative, ..
        }) = main.blocks[0].statements.last()
        else {
            panic!("expected a branch");
        };

        let Some(Statement::Goto(join)) = statements_of(main, *negative).last() else {
            panic!("expected the else branch to jump to the join");
        };

        assert_ne!(positive, join);
        assert_eq!(statements_of(main, *positive), [Statement::Goto(*join)]);
        assert_eq!(main.blocks.len(), 4);
    }

    #[test]
    fn empty_loop_bodies_still_get_a_block() {
        let program = explicate(&Program::new(vec![
            S::assign("x", E::int(1)),
            S::while_loop(E::prim(Op::Gt, [E::var("x"), E::int(2)]), vec![]),
        ]));

        let main = main_of(&program);

        let Some(Statement::Goto(test)) = main.blocks[0].statements.last() else {
            panic!("expected a jump to the loop test");
        };

        let body = main
            .blocks
            .iter()
            .find(|b| b.statements == [Statement::Goto(*test)] && b.label != main.blocks[0].label);

        assert!(body.is_some_and(|b| b.label.value().starts_with("block.")));
    }

    #[test]
    fn not_swaps_branches_and_constants_fold() {
        let program = explicate(&Program::new(vec![
            S::assign("b", E::bool(true)),
            S::if_else(
                E::prim(Op::Not, [E::var("b")]),
                vec![S::print(E::int(1))],
                vec![S::print(E::int(2))],
            ),
            S::if_else(E::bool(false), vec![S::print(E::int(3))], vec![]),
        ]));

        let main = main_of(&program);

        let Some(Statement::If {
            positive, negative, ..
        }) = main.blocks[0].statements.last()
        else {
            panic!("expected a branch");
        };

        let block = |label: &InternedSymbol| {
            main.blocks
                .iter()
                .find(|b| b.label == *label)
                .unwrap()
                .statements[0]
                .clone()
        };

        // `b == true` jumps to the else branch of `not b`
        assert_eq!(block(positive), Statement::Print(Atom::Constant(Constant::Int(2))));
        assert_eq!(block(negative), Statement::Print(Atom::Constant(Constant::Int(1))));

        // the constant condition needs no test of its own
        let tests = main
            .blocks
            .iter()
            .filter(|b| matches!(b.statements.last(), Some(Statement::If { .. })))
            .count();

        assert_eq!(tests, 1);
    }

    #[test]
    fn while_jumps_back_to_its_test() {
        let program = explicate(&Program::new(vec![
            S::assign("i", E::int(0)),
            S::while_loop(
                E::prim(Op::Lt, [E::var("i"), E::int(3)]),
                vec![S::assign("i", E::prim(Op::Add, [E::var("i"), E::int(1)]))],
            ),
        ]));

        let main = main_of(&program);

        let Some(Statement::Goto(test)) = main.blocks[0].statements.last() else {
            panic!("expected a jump to the loop test");
        };

        let back_edges = main
            .blocks
            .iter()
            .filter(|b| b.statements.last() == Some(&Statement::Goto(*test)))
            .count();

        assert_eq!(back_edges, 2);
        assert!(test.value().starts_with("loop."));
    }

    #[test]
    fn return_of_a_call_is_a_tail_call() {
        let program = explicate(&Program::new(vec![
            S::function(
                "f",
                [("n", Type::Int)],
                Type::Int,
                vec![S::ret(E::call(E::var("f"), [E::var("n")]))],
            ),
        ]));

        let f = &program.functions[0];

        assert_eq!(f.parameters, vec![InternedSymbol::new("n")]);
        assert!(matches!(
            f.blocks[0].statements.as_slice(),
            [Statement::TailCall { .. }]
        ));
    }

    #[test]
    fn short_circuit_conditions_become_nested_branches() {
        let program = explicate(&Program::new(vec![
            S::assign("x", E::int(1)),
            S::if_else(
                E::prim(
                    Op::And,
                    [E::prim(Op::Lt, [E::var("x"), E::int(2)]), E::prim(Op::Gt, [E::var("x"), E::int(0)])],
                ),
                vec![S::print(E::int(1))],
                vec![S::print(E::int(0))],
            ),
        ]));

        let main = main_of(&program);

        let branches = main
            .blocks
            .iter()
            .filter(|b| matches!(b.statements.last(), Some(Statement::If { .. })))
            .count();

        assert!(branches >= 2);
    }
}

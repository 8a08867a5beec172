//! Turns tuple literals into explicit heap allocation.
//!
//! Each `x = (a, b, ...)` becomes a bounds check against the end of the
//! current fromspace, a call to the collector when the new tuple would not
//! fit, a raw allocation and one `tuple_set` per field.

use crate::{
    error::{CompileError, CompileResult},
    frontend::{
        ast::{Constant, Expression, FunctionDefinition, PrimitiveOperator, Program, Statement},
        intern::{InternedSymbol, NameGenerator},
    },
    middle::{
        ty::Type,
        type_check::{TypeEnvironment, main_symbol},
    },
};

pub const FREE_POINTER: &str = "free_ptr";
pub const FROMSPACE_END: &str = "fromspace_end";
pub const ROOTSTACK_BEGIN: &str = "rootstack_begin";

/// Expects a flattened program along with the types the checker assigned to
/// its variables
pub fn expose_allocation(
    program: &Program,
    environment: &TypeEnvironment,
    names: &mut NameGenerator,
) -> CompileResult<Program> {
    let mut exposer = AllocationExposer {
        environment,
        names,
        function: main_symbol(),
    };

    let mut statements = Vec::with_capacity(program.statements.len());

    for statement in &program.statements {
        match statement {
            Statement::FunctionDefinition(function) => {
                exposer.function = function.name;
                let body = exposer.expose_block(&function.body)?;
                exposer.function = main_symbol();

                statements.push(Statement::FunctionDefinition(FunctionDefinition {
                    body,
                    ..function.clone()
                }));
            }
            statement => exposer.expose_statement(statement, &mut statements)?,
        }
    }

    Ok(Program::new(statements))
}

struct AllocationExposer<'a> {
    environment: &'a TypeEnvironment,
    names: &'a mut NameGenerator,
    /// The function whose body is being rewritten
    function: InternedSymbol,
}

impl AllocationExposer<'_> {
    fn expose_block(&mut self, statements: &[Statement]) -> CompileResult<Vec<Statement>> {
        let mut output = Vec::with_capacity(statements.len());

        for statement in statements {
            self.expose_statement(statement, &mut output)?;
        }

        Ok(output)
    }

    fn expose_statement(&mut self, statement: &Statement, output: &mut Vec<Statement>) -> CompileResult<()> {
        match statement {
            Statement::Assign {
                target,
                value: Expression::Tuple(fields),
            } => self.expose_tuple(*target, fields, output)?,
            Statement::If {
                condition,
                positive,
                negative,
            } => output.push(Statement::If {
                condition: condition.clone(),
                positive: self.expose_block(positive)?,
                negative: self.expose_block(negative)?,
            }),
            Statement::While { condition, body } => {
                let condition = match condition {
                    Expression::Begin { statements, value } => Expression::Begin {
                        statements: self.expose_block(statements)?,
                        value: value.clone(),
                    },
                    condition => condition.clone(),
                };

                output.push(Statement::While {
                    condition,
                    body: self.expose_block(body)?,
                });
            }
            Statement::FunctionDefinition(function) => {
                return Err(CompileError::unsupported("expose allocation", function.name));
            }
            statement => output.push(statement.clone()),
        }

        Ok(())
    }

    fn expose_tuple(
        &mut self,
        target: InternedSymbol,
        fields: &[Expression],
        output: &mut Vec<Statement>,
    ) -> CompileResult<()> {
        let field_types = fields
            .iter()
            .map(|field| self.type_of_atom(field))
            .collect::<CompileResult<Vec<_>>>()?;

        let bytes = Type::tuple_allocation_size(&field_types);

        let mut field_names = Vec::with_capacity(fields.len());
        for field in fields {
            let name = self.names.fresh("field");
            output.push(Statement::Assign {
                target: name,
                value: field.clone(),
            });
            field_names.push(name);
        }

        let end = self.names.fresh("end");
        let next = self.names.fresh("next");
        let limit = self.names.fresh("limit");

        output.extend([
            Statement::Assign {
                target: end,
                value: Expression::GlobalValue(FREE_POINTER.into()),
            },
            Statement::Assign {
                target: next,
                value: Expression::prim(
                    PrimitiveOperator::Add,
                    [Expression::Variable(end), Expression::int(bytes as i64)],
                ),
            },
            Statement::Assign {
                target: limit,
                value: Expression::GlobalValue(FROMSPACE_END.into()),
            },
            Statement::If {
                condition: Expression::prim(
                    PrimitiveOperator::Lt,
                    [Expression::Variable(next), Expression::Variable(limit)],
                ),
                positive: vec![],
                negative: vec![Statement::Collect { bytes }],
            },
            Statement::Assign {
                target,
                value: Expression::Allocate {
                    bytes,
                    ty: Type::Tuple(field_types),
                },
            },
        ]);

        output.extend(
            field_names
                .into_iter()
                .enumerate()
                .map(|(index, name)| Statement::TupleSet {
                    tuple: target,
                    index,
                    value: Expression::Variable(name),
                }),
        );

        Ok(())
    }

    fn type_of_atom(&self, atom: &Expression) -> CompileResult<Type> {
        match atom {
            Expression::Constant(Constant::Int(_)) => Ok(Type::Int),
            Expression::Constant(Constant::Bool(_)) => Ok(Type::Bool),
            Expression::Variable(name) => self
                .environment
                .variables_of(self.function)
                .and_then(|variables| variables.get(name))
                .or_else(|| self.environment.functions.get(name))
                .cloned()
                .ok_or_else(|| CompileError::unsupported("expose allocation", name)),
            atom => Err(CompileError::unsupported("expose allocation", atom)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::ast::{Expression as E, Statement as S},
        middle::{
            flatten::flatten_program, interpreter::interpret,
            type_check::type_check_lowered_program,
        },
    };

    fn expose(program: &Program) -> Program {
        let mut names = NameGenerator::new();
        let flattened = flatten_program(program, &mut names).unwrap();
        let environment = type_check_lowered_program(&flattened).unwrap();

        expose_allocation(&flattened, &environment, &mut names).unwrap()
    }

    #[test]
    fn tuple_literal_becomes_checked_allocation() {
        let program = Program::new(vec![
            S::assign("t", E::tuple([E::int(1), E::bool(true)])),
            S::print(E::subscript(E::var("t"), 0)),
        ]);

        let exposed = expose(&program);
        let statements = &exposed.statements;

        assert!(matches!(&statements[0], S::Assign { value: E::Constant(_), .. }));
        assert!(matches!(
            &statements[2],
            S::Assign { value: E::GlobalValue(name), .. } if name.value() == FREE_POINTER
        ));
        assert!(matches!(
            &statements[5],
            S::If { positive, negative, .. }
                if positive.is_empty() && negative == &vec![S::Collect { bytes: 24 }]
        ));
        assert!(matches!(
            &statements[6],
            S::Assign { value: E::Allocate { bytes: 24, ty }, .. }
                if ty == &Type::Tuple(vec![Type::Int, Type::Bool])
        ));
        assert!(matches!(&statements[8], S::TupleSet { index: 1, .. }));

        assert_eq!(interpret(&exposed).unwrap(), vec![1]);
        type_check_lowered_program(&exposed).unwrap();
    }

    #[test]
    fn nested_tuples_are_allocated_inner_first() {
        let program = Program::new(vec![
            S::assign("t", E::tuple([E::tuple([E::int(4)]), E::int(5)])),
            S::print(E::subscript(E::subscript(E::var("t"), 0), 0)),
        ]);

        let exposed = expose(&program);

        let allocations = exposed
            .statements
            .iter()
            .filter_map(|s| match s {
                S::Assign {
                    value: E::Allocate { ty, .. },
                    ..
                } => Some(ty.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(
            allocations,
            vec![
                Type::Tuple(vec![Type::Int]),
                Type::Tuple(vec![Type::Tuple(vec![Type::Int]), Type::Int])
            ]
        );
        assert_eq!(interpret(&exposed).unwrap(), vec![4]);
    }

    #[test]
    fn tuples_inside_functions_use_function_types() {
        let program = Program::new(vec![
            S::function(
                "pair",
                [("n", Type::Int)],
                Type::Tuple(vec![Type::Int, Type::Int]),
                vec![S::ret(E::tuple([E::var("n"), E::var("n")]))],
            ),
            S::print(E::subscript(E::call(E::var("pair"), [E::int(6)]), 1)),
        ]);

        assert_eq!(interpret(&expose(&program)).unwrap(), vec![6]);
    }
}

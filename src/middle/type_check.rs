//! Checks a program against the typing rules and records the type of every
//! variable it binds.
//!
//! The checker runs twice. It first runs on the source program, where every
//! name must be a plain identifier. It runs again on the program once
//! allocation has been exposed, where generated temporaries and the
//! allocation forms are expected. That second run gives the register
//! allocator the types of the temporaries, which it needs to tell tuple
//! pointers apart from everything else.

use hashbrown::HashMap;

use crate::{
    error::{CompileError, CompileResult, TypeErrorKind},
    frontend::{
        ast::{Constant, Expression, FunctionDefinition, PrimitiveOperator, Program, Statement},
        intern::InternedSymbol,
    },
    middle::ty::{MAX_TUPLE_FIELDS, Type},
};

/// Names which belong to the runtime or to the generated entry point
pub const RESERVED_NAMES: &[&str] = &[
    "main",
    "print_int",
    "initialize",
    "collect",
    "free_ptr",
    "fromspace_end",
    "rootstack_begin",
];

pub fn main_symbol() -> InternedSymbol {
    InternedSymbol::new("main")
}

/// Everything the checker learned about a well-typed program
#[derive(Debug, Clone, Default)]
pub struct TypeEnvironment {
    /// Signature of every user function
    pub functions: HashMap<InternedSymbol, Type>,
    /// Variables bound in each function (parameters included), keyed by the
    /// function's name. Top level statements belong to `main`.
    pub variables: HashMap<InternedSymbol, HashMap<InternedSymbol, Type>>,
}

impl TypeEnvironment {
    pub fn variables_of(&self, function: InternedSymbol) -> Option<&HashMap<InternedSymbol, Type>> {
        self.variables.get(&function)
    }

    pub fn is_function(&self, name: InternedSymbol) -> bool {
        self.functions.contains_key(&name)
    }
}

/// Checks a program as written by the user
pub fn type_check_program(program: &Program) -> CompileResult<TypeEnvironment> {
    TypeChecker::new(false).check(program)
}

/// Checks a program produced by the flattening and allocation passes, where
/// generated names are expected
pub fn type_check_lowered_program(program: &Program) -> CompileResult<TypeEnvironment> {
    TypeChecker::new(true).check(program)
}

struct TypeChecker {
    allow_generated_names: bool,
    environment: TypeEnvironment,
}

/// Per-function state: the bindings visible so far and the declared return
/// type, if we are inside a function
struct Scope {
    locals: HashMap<InternedSymbol, Type>,
    return_type: Option<Type>,
}

impl TypeChecker {
    fn new(allow_generated_names: bool) -> Self {
        Self {
            allow_generated_names,
            environment: TypeEnvironment::default(),
        }
    }

    fn check(mut self, program: &Program) -> CompileResult<TypeEnvironment> {
        // Signatures first, so that functions can call each other regardless
        // of the order they are defined in
        for function in program.function_definitions() {
            self.check_binding_name(function.name, &function.name)?;

            if self.environment.is_function(function.name) {
                return Err(CompileError::type_error(
                    TypeErrorKind::DuplicateDefinition {
                        name: function.name,
                    },
                    function.name,
                ));
            }

            self.check_type_is_representable(&function.ty(), &function.name)?;
            self.environment
                .functions
                .insert(function.name, function.ty());
        }

        let mut main_scope = Scope {
            locals: HashMap::new(),
            return_type: None,
        };

        for statement in &program.statements {
            match statement {
                Statement::FunctionDefinition(function) => self.check_function(function)?,
                statement => self.check_statement(statement, &mut main_scope)?,
            }
        }

        self.environment
            .variables
            .insert(main_symbol(), main_scope.locals);

        Ok(self.environment)
    }

    fn check_function(&mut self, function: &FunctionDefinition) -> CompileResult<()> {
        let mut scope = Scope {
            locals: HashMap::new(),
            return_type: Some(function.return_type.clone()),
        };

        for (name, ty) in &function.parameters {
            self.check_binding_name(*name, &function.name)?;

            if self.environment.is_function(*name) {
                return Err(CompileError::type_error(
                    TypeErrorKind::AssignToFunction { name: *name },
                    function.name,
                ));
            }

            if scope.locals.insert(*name, ty.clone()).is_some() {
                return Err(CompileError::type_error(
                    TypeErrorKind::DuplicateDefinition { name: *name },
                    function.name,
                ));
            }
        }

        for statement in &function.body {
            self.check_statement(statement, &mut scope)?;
        }

        self.environment
            .variables
            .insert(function.name, scope.locals);

        Ok(())
    }

    fn check_binding_name(
        &self,
        name: InternedSymbol,
        context: &impl core::fmt::Display,
    ) -> CompileResult<()> {
        let reserved = RESERVED_NAMES.contains(&name.value());

        if reserved || (!self.allow_generated_names && name.is_generated()) {
            return Err(CompileError::type_error(
                TypeErrorKind::ReservedName { name },
                context,
            ));
        }

        Ok(())
    }

    fn check_type_is_representable(
        &self,
        ty: &Type,
        context: &impl core::fmt::Display,
    ) -> CompileResult<()> {
        match ty {
            Type::Int | Type::Bool => Ok(()),
            Type::Tuple(fields) => {
                if fields.len() > MAX_TUPLE_FIELDS {
                    return Err(CompileError::type_error(
                        TypeErrorKind::TupleTooLarge {
                            max: MAX_TUPLE_FIELDS,
                            actual: fields.len(),
                        },
                        context,
                    ));
                }

                fields
                    .iter()
                    .try_for_each(|field| self.check_type_is_representable(field, context))
            }
            Type::Function { parameters, output } => {
                parameters
                    .iter()
                    .try_for_each(|p| self.check_type_is_representable(p, context))?;
                self.check_type_is_representable(output, context)
            }
        }
    }

    fn check_statement(&mut self, statement: &Statement, scope: &mut Scope) -> CompileResult<()> {
        let context = || render(statement);

        match statement {
            Statement::Assign { target, value } => {
                self.check_binding_name(*target, &context())?;

                if self.environment.is_function(*target) {
                    return Err(CompileError::type_error(
                        TypeErrorKind::AssignToFunction { name: *target },
                        context(),
                    ));
                }

                let ty = self.check_expression(value, scope)?;

                match scope.locals.get(target) {
                    Some(existing) => expect_type(existing, &ty, context)?,
                    None => {
                        scope.locals.insert(*target, ty);
                    }
                }
            }
            Statement::Print(value) => {
                let ty = self.check_expression(value, scope)?;

                if !ty.is_printable() {
                    return Err(CompileError::type_error(
                        TypeErrorKind::NotPrintable { actual: ty },
                        context(),
                    ));
                }
            }
            Statement::If {
                condition,
                positive,
                negative,
            } => {
                let ty = self.check_expression(condition, scope)?;
                expect_type(&Type::Bool, &ty, context)?;

                for statement in positive.iter().chain(negative) {
                    self.check_statement(statement, scope)?;
                }
            }
            Statement::While { condition, body } => {
                let ty = self.check_expression(condition, scope)?;
                expect_type(&Type::Bool, &ty, context)?;

                for statement in body {
                    self.check_statement(statement, scope)?;
                }
            }
            Statement::Return(value) => {
                let Some(return_type) = scope.return_type.clone() else {
                    return Err(CompileError::type_error(
                        TypeErrorKind::ReturnOutsideFunction,
                        context(),
                    ));
                };

                let ty = self.check_expression(value, scope)?;
                expect_type(&return_type, &ty, context)?;
            }
            Statement::FunctionDefinition(_) => {
                return Err(CompileError::type_error(
                    TypeErrorKind::NestedFunction,
                    context(),
                ));
            }
            Statement::Collect { .. } => {}
            Statement::TupleSet {
                tuple,
                index,
                value,
            } => {
                let tuple_type = self.check_expression(&Expression::Variable(*tuple), scope)?;
                let field_type = field_type(&tuple_type, *index as i64, context)?;
                let value_type = self.check_expression(value, scope)?;

                expect_type(&field_type, &value_type, context)?;
            }
        }

        Ok(())
    }

    fn check_expression(&mut self, expression: &Expression, scope: &mut Scope) -> CompileResult<Type> {
        let context = || render(expression);

        match expression {
            Expression::Variable(name) => scope
                .locals
                .get(name)
                .or_else(|| self.environment.functions.get(name))
                .cloned()
                .ok_or_else(|| {
                    CompileError::type_error(TypeErrorKind::UnboundVariable { name: *name }, context())
                }),
            Expression::Constant(Constant::Int(_)) => Ok(Type::Int),
            Expression::Constant(Constant::Bool(_)) => Ok(Type::Bool),
            Expression::Primitive { operator, operands } => {
                self.check_primitive(*operator, operands, scope, context)
            }
            Expression::Call { target, arguments } => {
                let target_type = self.check_expression(target, scope)?;

                let Type::Function { parameters, output } = target_type else {
                    return Err(CompileError::type_error(
                        TypeErrorKind::NotAFunction {
                            actual: target_type,
                        },
                        context(),
                    ));
                };

                if parameters.len() != arguments.len() {
                    return Err(CompileError::type_error(
                        TypeErrorKind::ArgumentCount {
                            expected: parameters.len(),
                            actual: arguments.len(),
                        },
                        context(),
                    ));
                }

                for (parameter, argument) in parameters.iter().zip(arguments) {
                    let ty = self.check_expression(argument, scope)?;
                    expect_type(parameter, &ty, context)?;
                }

                Ok(*output)
            }
            Expression::Tuple(fields) => {
                let ty = Type::Tuple(
                    fields
                        .iter()
                        .map(|field| self.check_expression(field, scope))
                        .collect::<CompileResult<_>>()?,
                );

                self.check_type_is_representable(&ty, &context())?;

                Ok(ty)
            }
            Expression::Begin { statements, value } => {
                for statement in statements {
                    self.check_statement(statement, scope)?;
                }

                self.check_expression(value, scope)
            }
            Expression::GlobalValue(_) => Ok(Type::Int),
            Expression::Allocate { ty, .. } => {
                if !ty.is_tuple() {
                    return Err(CompileError::type_error(
                        TypeErrorKind::NotATuple { actual: ty.clone() },
                        context(),
                    ));
                }

                Ok(ty.clone())
            }
        }
    }

    fn check_primitive(
        &mut self,
        operator: PrimitiveOperator,
        operands: &[Expression],
        scope: &mut Scope,
        context: impl Fn() -> String + Copy,
    ) -> CompileResult<Type> {
        if operands.len() != operator.arity() {
            return Err(CompileError::type_error(
                TypeErrorKind::OperandCount {
                    operator: operator.name(),
                    expected: operator.arity(),
                    actual: operands.len(),
                },
                context(),
            ));
        }

        if operator == PrimitiveOperator::Subscript {
            let tuple_type = self.check_expression(&operands[0], scope)?;

            let Expression::Constant(Constant::Int(index)) = operands[1] else {
                return Err(CompileError::type_error(
                    TypeErrorKind::NonConstantIndex,
                    context(),
                ));
            };

            return field_type(&tuple_type, index, context);
        }

        let types = operands
            .iter()
            .map(|operand| self.check_expression(operand, scope))
            .collect::<CompileResult<Vec<_>>>()?;

        use PrimitiveOperator::*;
        match operator {
            Add | Sub | Mult | Neg => {
                types
                    .iter()
                    .try_for_each(|ty| expect_type(&Type::Int, ty, context))?;
                Ok(Type::Int)
            }
            Not | And | Or => {
                types
                    .iter()
                    .try_for_each(|ty| expect_type(&Type::Bool, ty, context))?;
                Ok(Type::Bool)
            }
            Lt | Lte | Gt | Gte => {
                types
                    .iter()
                    .try_for_each(|ty| expect_type(&Type::Int, ty, context))?;
                Ok(Type::Bool)
            }
            Eq | Ne => {
                if !types[0].is_printable() {
                    return Err(CompileError::type_error(
                        TypeErrorKind::Mismatch {
                            expected: Type::Int,
                            actual: types[0].clone(),
                        },
                        context(),
                    ));
                }

                expect_type(&types[0], &types[1], context)?;
                Ok(Type::Bool)
            }
            Subscript => unreachable!("subscript is handled above"),
        }
    }
}

fn field_type(tuple_type: &Type, index: i64, context: impl Fn() -> String) -> CompileResult<Type> {
    let Type::Tuple(fields) = tuple_type else {
        return Err(CompileError::type_error(
            TypeErrorKind::NotATuple {
                actual: tuple_type.clone(),
            },
            context(),
        ));
    };

    usize::try_from(index)
        .ok()
        .and_then(|i| fields.get(i))
        .cloned()
        .ok_or_else(|| {
            CompileError::type_error(
                TypeErrorKind::IndexOutOfBounds {
                    index,
                    length: fields.len(),
                },
                context(),
            )
        })
}

fn expect_type(expected: &Type, actual: &Type, context: impl Fn() -> String) -> CompileResult<()> {
    if expected == actual {
        return Ok(());
    }

    Err(CompileError::type_error(
        TypeErrorKind::Mismatch {
            expected: expected.clone(),
            actual: actual.clone(),
        },
        context(),
    ))
}

fn render(node: &impl ToString) -> String {
    strip_ansi_escapes::strip_str(node.to_string()).trim_end().to_owned()
}

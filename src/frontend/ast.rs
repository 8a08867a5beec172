//! The source program, as handed to us by an external parser or built
//! directly with the constructor helpers below.
//!
//! Every pass consumes a tree by reference and builds a new one, so none of
//! these types carry any interior mutability. The `GlobalValue`, `Allocate`,
//! `Collect` and `TupleSet` forms only ever appear after allocation has been
//! exposed.

use colored::Colorize;
use itertools::Itertools;

use super::intern::InternedSymbol;
use crate::middle::ty::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveOperator {
    Add,
    Sub,
    Mult,
    Neg,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Subscript,
}

impl PrimitiveOperator {
    pub fn arity(self) -> usize {
        match self {
            Self::Neg | Self::Not => 1,
            _ => 2,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Lte | Self::Gt | Self::Gte
        )
    }

    pub fn is_short_circuiting(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Variable(InternedSymbol),
    Constant(Constant),
    Primitive {
        operator: PrimitiveOperator,
        operands: Vec<Expression>,
    },
    Call {
        target: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Tuple(Vec<Expression>),
    /// Runs `statements` and then evaluates to `value`
    Begin {
        statements: Vec<Statement>,
        value: Box<Expression>,
    },
    /// The current value of one of the runtime's global variables
    GlobalValue(InternedSymbol),
    /// Bumps the allocation pointer by `bytes` and writes the header for a
    /// tuple of type `ty`. Enough room must already be available.
    Allocate { bytes: usize, ty: Type },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign {
        target: InternedSymbol,
        value: Expression,
    },
    Print(Expression),
    If {
        condition: Expression,
        positive: Vec<Statement>,
        negative: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    Return(Expression),
    FunctionDefinition(FunctionDefinition),
    /// Asks the collector to make at least `bytes` bytes available
    Collect { bytes: usize },
    TupleSet {
        tuple: InternedSymbol,
        index: usize,
        value: Expression,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: InternedSymbol,
    pub parameters: Vec<(InternedSymbol, Type)>,
    pub return_type: Type,
    pub body: Vec<Statement>,
}

impl FunctionDefinition {
    pub fn ty(&self) -> Type {
        Type::function(
            self.parameters.iter().map(|(_, ty)| ty.clone()),
            self.return_type.clone(),
        )
    }
}

/// A whole program: function definitions and top level statements, which
/// together make up the body of `main`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    pub fn function_definitions(&self) -> impl Iterator<Item = &FunctionDefinition> {
        self.statements.iter().filter_map(|s| match s {
            Statement::FunctionDefinition(f) => Some(f),
            _ => None,
        })
    }
}

/* Constructor helpers */

impl Expression {
    pub fn var(name: &str) -> Self {
        Self::Variable(name.into())
    }

    pub fn int(value: i64) -> Self {
        Self::Constant(Constant::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Self::Constant(Constant::Bool(value))
    }

    pub fn prim(operator: PrimitiveOperator, operands: impl IntoIterator<Item = Expression>) -> Self {
        Self::Primitive {
            operator,
            operands: operands.into_iter().collect(),
        }
    }

    pub fn call(target: Expression, arguments: impl IntoIterator<Item = Expression>) -> Self {
        Self::Call {
            target: Box::new(target),
            arguments: arguments.into_iter().collect(),
        }
    }

    pub fn tuple(fields: impl IntoIterator<Item = Expression>) -> Self {
        Self::Tuple(fields.into_iter().collect())
    }

    pub fn subscript(tuple: Expression, index: i64) -> Self {
        Self::prim(PrimitiveOperator::Subscript, [tuple, Self::int(index)])
    }

    /// Atoms are variables and constants, the only operands left once
    /// operands have been flattened
    pub fn is_atomic(&self) -> bool {
        matches!(self, Self::Variable(_) | Self::Constant(_))
    }
}

impl Statement {
    pub fn assign(target: &str, value: Expression) -> Self {
        Self::Assign {
            target: target.into(),
            value,
        }
    }

    pub fn print(value: Expression) -> Self {
        Self::Print(value)
    }

    pub fn if_else(condition: Expression, positive: Vec<Statement>, negative: Vec<Statement>) -> Self {
        Self::If {
            condition,
            positive,
            negative,
        }
    }

    pub fn while_loop(condition: Expression, body: Vec<Statement>) -> Self {
        Self::While { condition, body }
    }

    pub fn ret(value: Expression) -> Self {
        Self::Return(value)
    }

    pub fn function(
        name: &str,
        parameters: impl IntoIterator<Item = (&'static str, Type)>,
        return_type: Type,
        body: Vec<Statement>,
    ) -> Self {
        Self::FunctionDefinition(FunctionDefinition {
            name: name.into(),
            parameters: parameters
                .into_iter()
                .map(|(name, ty)| (InternedSymbol::new(name), ty))
                .collect(),
            return_type,
            body,
        })
    }
}

/* Pretty printing */

impl core::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int(value) => write!(f, "{}", value.to_string().purple()),
            Constant::Bool(value) => write!(f, "{}", value.to_string().purple()),
        }
    }
}

impl core::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Variable(name) => write!(f, "{name}"),
            Expression::Constant(constant) => write!(f, "{constant}"),
            Expression::Primitive { operator, operands } => {
                write!(f, "{}({})", operator.name().cyan(), operands.iter().join(", "))
            }
            Expression::Call { target, arguments } => {
                write!(f, "{target}({})", arguments.iter().join(", "))
            }
            Expression::Tuple(fields) if fields.len() == 1 => write!(f, "({},)", fields[0]),
            Expression::Tuple(fields) => write!(f, "({})", fields.iter().join(", ")),
            Expression::Begin { statements, value } => {
                write!(f, "{}", "begin {".magenta())?;
                for statement in statements {
                    write!(f, " ")?;
                    write_statement(f, statement, 0, " ")?;
                }
                write!(f, " {value} {}", "}".magenta())
            }
            Expression::GlobalValue(name) => write!(f, "{}", format!("global({name})").blue()),
            Expression::Allocate { bytes, ty } => {
                write!(f, "{}({bytes}, {})", "allocate".cyan(), ty.to_string().yellow())
            }
        }
    }
}

fn write_statement(
    f: &mut std::fmt::Formatter<'_>,
    statement: &Statement,
    depth: usize,
    separator: &str,
) -> std::fmt::Result {
    let indent = "    ".repeat(depth);

    let write_block = |f: &mut std::fmt::Formatter<'_>, block: &[Statement]| {
        if block.is_empty() {
            return write!(f, "{indent}    {}{separator}", "pass".magenta());
        }

        block
            .iter()
            .try_for_each(|s| write_statement(f, s, depth + 1, separator))
    };

    match statement {
        Statement::Assign { target, value } => {
            write!(f, "{indent}{target} {} {value}{separator}", "=".white())
        }
        Statement::Print(value) => write!(f, "{indent}{}({value}){separator}", "print".cyan()),
        Statement::If {
            condition,
            positive,
            negative,
        } => {
            write!(f, "{indent}{} {condition}:{separator}", "if".magenta())?;
            write_block(f, positive)?;
            write!(f, "{indent}{}:{separator}", "else".magenta())?;
            write_block(f, negative)
        }
        Statement::While { condition, body } => {
            write!(f, "{indent}{} {condition}:{separator}", "while".magenta())?;
            write_block(f, body)
        }
        Statement::Return(value) => write!(f, "{indent}{} {value}{separator}", "return".magenta()),
        Statement::FunctionDefinition(function) => {
            write!(
                f,
                "{indent}{} {}({}) -> {}:{separator}",
                "def".magenta(),
                function.name.to_string().blue(),
                function
                    .parameters
                    .iter()
                    .map(|(name, ty)| format!("{name}: {}", ty.to_string().yellow()))
                    .join(", "),
                function.return_type.to_string().yellow()
            )?;
            write_block(f, &function.body)
        }
        Statement::Collect { bytes } => {
            write!(f, "{indent}{}({bytes}){separator}", "collect".cyan())
        }
        Statement::TupleSet {
            tuple,
            index,
            value,
        } => write!(
            f,
            "{indent}{}({tuple}, {index}, {value}){separator}",
            "tuple_set".cyan()
        ),
    }
}

impl core::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_statement(f, self, 0, "\n")
    }
}

impl core::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.statements.iter().try_for_each(|s| write!(f, "{s}"))
    }
}

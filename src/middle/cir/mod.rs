//! The control-flow form of a program (CIR). Every function is a list of
//! labelled blocks of straight-line statements, and each block ends in an
//! explicit transfer of control. Operands are atoms throughout.

use hashbrown::{HashMap, HashSet};

use crate::{
    error::{CompileError, CompileResult},
    frontend::{
        ast::{Constant, PrimitiveOperator},
        intern::InternedSymbol,
    },
    middle::ty::Type,
};

pub mod explicate;
pub mod pretty_print;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Atom {
    Variable(InternedSymbol),
    Constant(Constant),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Atom(Atom),
    Primitive {
        operator: PrimitiveOperator,
        operands: Vec<Atom>,
    },
    Call {
        target: Atom,
        arguments: Vec<Atom>,
    },
    Allocate {
        bytes: usize,
        ty: Type,
    },
    GlobalValue(InternedSymbol),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign {
        target: InternedSymbol,
        value: Expression,
    },
    Print(Atom),
    Collect {
        bytes: usize,
    },
    TupleSet {
        tuple: InternedSymbol,
        index: usize,
        value: Atom,
    },

    /* Terminators */
    Goto(InternedSymbol),
    /// Branches on a comparison between two atoms
    If {
        operator: PrimitiveOperator,
        lhs: Atom,
        rhs: Atom,
        positive: InternedSymbol,
        negative: InternedSymbol,
    },
    Return(Atom),
    TailCall {
        target: Atom,
        arguments: Vec<Atom>,
    },
}

impl Statement {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Statement::Goto(_)
                | Statement::If { .. }
                | Statement::Return(_)
                | Statement::TailCall { .. }
        )
    }

    /// Labels this statement may transfer control to
    pub fn successors(&self) -> Vec<InternedSymbol> {
        match self {
            Statement::Goto(label) => vec![*label],
            Statement::If {
                positive, negative, ..
            } => vec![*positive, *negative],
            _ => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: InternedSymbol,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: InternedSymbol,
    pub parameters: Vec<InternedSymbol>,
    /// The entry block comes first
    pub blocks: Vec<Block>,
    /// Type of every variable used in the function
    pub variable_types: HashMap<InternedSymbol, Type>,
}

impl FunctionDefinition {
    pub fn start_label(&self) -> InternedSymbol {
        start_label(self.name)
    }

    pub fn conclusion_label(&self) -> InternedSymbol {
        conclusion_label(self.name)
    }
}

pub fn start_label(function: InternedSymbol) -> InternedSymbol {
    InternedSymbol::new(&format!("{function}.start"))
}

pub fn conclusion_label(function: InternedSymbol) -> InternedSymbol {
    InternedSymbol::new(&format!("{function}.conclusion"))
}

#[derive(Debug, Clone)]
pub struct Program {
    pub functions: Vec<FunctionDefinition>,
    /// Names of all user functions, which are the only values a call may
    /// target directly
    pub function_names: HashSet<InternedSymbol>,
}

/// Ensures every block ends in exactly one terminator and that every jump
/// lands on a block of the same function
pub fn validate(program: &Program) -> CompileResult<()> {
    for function in &program.functions {
        let labels = function
            .blocks
            .iter()
            .map(|block| block.label)
            .collect::<HashSet<_>>();

        for block in &function.blocks {
            let Some((last, body)) = block.statements.split_last() else {
                return Err(CompileError::unsupported("cir validation", block.label));
            };

            if !last.is_terminator() || body.iter().any(Statement::is_terminator) {
                return Err(CompileError::unsupported("cir validation", &block.statements));
            }

            if let Some(label) = last.successors().into_iter().find(|l| !labels.contains(l)) {
                return Err(CompileError::UnboundLabel {
                    function: function.name,
                    label,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(blocks: Vec<Block>) -> Program {
        Program {
            functions: vec![FunctionDefinition {
                name: "main".into(),
                parameters: vec![],
                blocks,
                variable_types: HashMap::new(),
            }],
            function_names: HashSet::new(),
        }
    }

    #[test]
    fn rejects_jumps_to_missing_labels() {
        let program = function(vec![Block {
            label: start_label("main".into()),
            statements: vec![Statement::Goto("nowhere".into())],
        }]);

        assert!(matches!(
            validate(&program),
            Err(CompileError::UnboundLabel { label, .. }) if label.value() == "nowhere"
        ));
    }

    #[test]
    fn rejects_blocks_without_terminators() {
        let program = function(vec![Block {
            label: start_label("main".into()),
            statements: vec![Statement::Print(Atom::Constant(Constant::Int(1)))],
        }]);

        assert!(validate(&program).is_err());
    }

    #[test]
    fn accepts_well_formed_blocks() {
        let program = function(vec![Block {
            label: start_label("main".into()),
            statements: vec![
                Statement::Print(Atom::Constant(Constant::Int(1))),
                Statement::Return(Atom::Constant(Constant::Int(0))),
            ],
        }]);

        validate(&program).unwrap();
    }
}

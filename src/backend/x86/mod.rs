//! Pseudo x86-64. Until registers have been allocated, operands may still
//! name variables. Once the prelude has been added, every instruction maps
//! one to one onto a real AT&T instruction.

use hashbrown::HashMap;

use crate::{
    backend::assemblers::x86_64::{X86FullRegister, X86Register},
    frontend::{ast::PrimitiveOperator, intern::InternedSymbol},
    middle::ty::Type,
};

pub mod pretty_print;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Immediate(i64),
    Register(X86FullRegister),
    ByteRegister(X86Register),
    Variable(InternedSymbol),
    /// `offset(%register)`
    Deref(X86FullRegister, i64),
    /// `name(%rip)`, a global variable or, for `leaq`, a code label
    GlobalValue(InternedSymbol),
}

impl Operand {
    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Deref(..) | Operand::GlobalValue(_))
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Immediate(_))
    }

    /// Immediates wider than 32 bits may only be moved into a register
    pub fn is_wide_immediate(&self) -> bool {
        match self {
            Operand::Immediate(value) => i32::try_from(*value).is_err(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOperator {
    Addq,
    Subq,
    Imulq,
    Andq,
    Orq,
    Xorq,
    Cmpq,
    Movq,
    Movzbq,
    Leaq,
}

impl BinaryOperator {
    /// Whether the old value of the destination is an input
    pub fn reads_destination(self) -> bool {
        !matches!(self, Self::Movq | Self::Movzbq | Self::Leaq)
    }

    pub fn writes_destination(self) -> bool {
        self != Self::Cmpq
    }

    pub fn is_move(self) -> bool {
        matches!(self, Self::Movq | Self::Movzbq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConditionCode {
    E,
    Ne,
    L,
    Le,
    G,
    Ge,
}

impl ConditionCode {
    pub fn from_operator(operator: PrimitiveOperator) -> Option<Self> {
        Some(match operator {
            PrimitiveOperator::Eq => Self::E,
            PrimitiveOperator::Ne => Self::Ne,
            PrimitiveOperator::Lt => Self::L,
            PrimitiveOperator::Lte => Self::Le,
            PrimitiveOperator::Gt => Self::G,
            PrimitiveOperator::Gte => Self::Ge,
            _ => return None,
        })
    }

    /// Evaluates the condition after `cmpq source, destination`
    pub fn holds(self, destination: i64, source: i64) -> bool {
        match self {
            Self::E => destination == source,
            Self::Ne => destination != source,
            Self::L => destination < source,
            Self::Le => destination <= source,
            Self::G => destination > source,
            Self::Ge => destination >= source,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Binary {
        operator: BinaryOperator,
        source: Operand,
        destination: Operand,
    },
    Negq(Operand),
    Set {
        condition: ConditionCode,
        destination: Operand,
    },
    Pushq(Operand),
    Popq(Operand),
    /// A direct call. `arguments` lists the registers holding arguments.
    Callq {
        label: InternedSymbol,
        arguments: Vec<X86FullRegister>,
    },
    IndirectCallq {
        target: Operand,
        arguments: Vec<X86FullRegister>,
    },
    /// Leaves the current function and jumps to `target`, which reuses the
    /// frame of our caller. Expanded once the frame layout is known.
    TailJmp {
        target: Operand,
        arguments: Vec<X86FullRegister>,
    },
    Jmp(InternedSymbol),
    JmpIf {
        condition: ConditionCode,
        label: InternedSymbol,
    },
    IndirectJmp(Operand),
    Retq,
    Comment(String),
}

impl Instruction {
    pub fn binary(operator: BinaryOperator, source: Operand, destination: Operand) -> Self {
        Self::Binary {
            operator,
            source,
            destination,
        }
    }

    pub fn movq(source: Operand, destination: Operand) -> Self {
        Self::binary(BinaryOperator::Movq, source, destination)
    }

    pub fn addq(source: Operand, destination: Operand) -> Self {
        Self::binary(BinaryOperator::Addq, source, destination)
    }

    pub fn subq(source: Operand, destination: Operand) -> Self {
        Self::binary(BinaryOperator::Subq, source, destination)
    }

    pub fn cmpq(source: Operand, destination: Operand) -> Self {
        Self::binary(BinaryOperator::Cmpq, source, destination)
    }

    pub fn leaq(source: Operand, destination: Operand) -> Self {
        Self::binary(BinaryOperator::Leaq, source, destination)
    }

    /// Every operand the instruction mentions
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Instruction::Binary {
                source,
                destination,
                ..
            } => vec![*source, *destination],
            Instruction::Negq(operand)
            | Instruction::Set {
                destination: operand,
                ..
            }
            | Instruction::Pushq(operand)
            | Instruction::Popq(operand)
            | Instruction::IndirectCallq {
                target: operand, ..
            }
            | Instruction::TailJmp {
                target: operand, ..
            }
            | Instruction::IndirectJmp(operand) => vec![*operand],
            Instruction::Callq { .. }
            | Instruction::Jmp(_)
            | Instruction::JmpIf { .. }
            | Instruction::Retq
            | Instruction::Comment(_) => vec![],
        }
    }

    /// Rewrites every operand in place
    pub fn map_operands(&mut self, mut f: impl FnMut(Operand) -> Operand) {
        match self {
            Instruction::Binary {
                source,
                destination,
                ..
            } => {
                *source = f(*source);
                *destination = f(*destination);
            }
            Instruction::Negq(operand)
            | Instruction::Set {
                destination: operand,
                ..
            }
            | Instruction::Pushq(operand)
            | Instruction::Popq(operand)
            | Instruction::IndirectCallq {
                target: operand, ..
            }
            | Instruction::TailJmp {
                target: operand, ..
            }
            | Instruction::IndirectJmp(operand) => *operand = f(*operand),
            Instruction::Callq { .. }
            | Instruction::Jmp(_)
            | Instruction::JmpIf { .. }
            | Instruction::Retq
            | Instruction::Comment(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: InternedSymbol,
    pub instructions: Vec<Instruction>,
}

/// How a function's frame is laid out once its variables have homes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// 8-byte slots below the saved registers
    pub stack_slots: usize,
    /// 8-byte slots on the root stack, scanned by the collector
    pub root_slots: usize,
    /// Callee-saved registers the function writes, in push order
    pub callee_saved: Vec<X86FullRegister>,
}

impl Frame {
    /// Bytes to subtract from `%rsp` after the callee-saved registers have
    /// been pushed, keeping the stack 16-byte aligned
    pub fn stack_adjustment(&self) -> i64 {
        let slots = self.stack_slots + (self.callee_saved.len() + self.stack_slots) % 2;

        8 * slots as i64
    }

    pub fn root_stack_bytes(&self) -> i64 {
        8 * self.root_slots as i64
    }

    /// The home of stack slot `index`
    pub fn stack_slot(callee_saved: usize, index: usize) -> Operand {
        Operand::Deref(
            X86FullRegister::Rbp,
            -8 * (callee_saved as i64 + index as i64 + 1),
        )
    }

    /// The home of root stack slot `index`
    pub fn root_slot(index: usize) -> Operand {
        Operand::Deref(X86FullRegister::R15, -8 * (index as i64 + 1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: InternedSymbol,
    pub blocks: Vec<Block>,
    pub variable_types: HashMap<InternedSymbol, Type>,
    pub frame: Frame,
}

impl FunctionDefinition {
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|block| &block.instructions)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub functions: Vec<FunctionDefinition>,
}

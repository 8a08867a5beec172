//! Instruction selection: each CIR statement becomes a short, fixed sequence
//! of pseudo x86 instructions over variables.

use hashbrown::HashSet;
use log::trace;

use crate::{
    backend::{
        assemblers::x86_64::X86FullRegister,
        x86::{self, BinaryOperator, ConditionCode, Frame, Instruction, Operand},
    },
    config::Config,
    error::{CompileError, CompileResult},
    frontend::{
        ast::{Constant, PrimitiveOperator},
        intern::{InternedSymbol, NameGenerator},
    },
    middle::{
        cir::{self, Atom},
        ty::Type,
    },
};

const STAGE: &str = "select instructions";

pub const PRINT_INT: &str = "print_int";
pub const COLLECT: &str = "collect";
pub const INITIALIZE: &str = "initialize";

const RAX: Operand = Operand::Register(X86FullRegister::Rax);
const R11: Operand = Operand::Register(X86FullRegister::R11);
const R15: Operand = Operand::Register(X86FullRegister::R15);
const RSP: Operand = Operand::Register(X86FullRegister::Rsp);

pub fn select_instructions(
    program: &cir::Program,
    config: &Config,
    names: &mut NameGenerator,
) -> CompileResult<x86::Program> {
    let functions = program
        .functions
        .iter()
        .map(|function| {
            let mut selector = InstructionSelector {
                config,
                function_names: &program.function_names,
                function: function.name,
                conclusion: function.conclusion_label(),
                names: &mut *names,
                instructions: Vec::new(),
            };

            selector.select_function(function)
        })
        .collect::<CompileResult<_>>()?;

    Ok(x86::Program { functions })
}

struct InstructionSelector<'a> {
    config: &'a Config,
    function_names: &'a HashSet<InternedSymbol>,
    function: InternedSymbol,
    conclusion: InternedSymbol,
    names: &'a mut NameGenerator,
    /// Output for the block currently being selected
    instructions: Vec<Instruction>,
}

impl InstructionSelector<'_> {
    fn select_function(&mut self, function: &cir::FunctionDefinition) -> CompileResult<x86::FunctionDefinition> {
        let mut blocks = Vec::with_capacity(function.blocks.len());

        for (i, block) in function.blocks.iter().enumerate() {
            if i == 0 {
                self.copy_parameters(&function.parameters);
            }

            for statement in &block.statements {
                if self.config.emit_comments {
                    self.instructions.push(Instruction::Comment(
                        strip_ansi_escapes::strip_str(statement.to_string()),
                    ));
                }

                self.select_statement(statement)?;
            }

            blocks.push(x86::Block {
                label: block.label,
                instructions: std::mem::take(&mut self.instructions),
            });
        }

        trace!("selected instructions for `{}`", self.function);

        Ok(x86::FunctionDefinition {
            name: function.name,
            blocks,
            variable_types: function.variable_types.clone(),
            frame: Frame::default(),
        })
    }

    /// Moves the incoming arguments out of the parameter registers and the
    /// caller's frame into the parameter variables
    fn copy_parameters(&mut self, parameters: &[InternedSymbol]) {
        let registers = &self.config.parameter_registers;

        for (i, parameter) in parameters.iter().enumerate() {
            let source = match registers.get(i) {
                Some(register) => Operand::Register(*register),
                None => Operand::Deref(
                    X86FullRegister::Rbp,
                    16 + 8 * (i - registers.len()) as i64,
                ),
            };

            self.emit(Instruction::movq(source, Operand::Variable(*parameter)));
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn is_function(&self, name: InternedSymbol) -> bool {
        self.function_names.contains(&name)
    }

    /// Function names are labels, so using one as a value needs its address
    /// loaded into a temporary first
    fn select_atom(&mut self, atom: &Atom) -> Operand {
        match atom {
            Atom::Constant(Constant::Int(value)) => Operand::Immediate(*value),
            Atom::Constant(Constant::Bool(value)) => Operand::Immediate(*value as i64),
            Atom::Variable(name) if self.is_function(*name) => {
                let temporary = Operand::Variable(self.names.fresh("fn"));
                self.emit(Instruction::leaq(Operand::GlobalValue(*name), temporary));
                temporary
            }
            Atom::Variable(name) => Operand::Variable(*name),
        }
    }

    fn select_statement(&mut self, statement: &cir::Statement) -> CompileResult<()> {
        match statement {
            cir::Statement::Assign { target, value } => {
                self.select_assignment(Operand::Variable(*target), value)?
            }
            cir::Statement::Print(atom) => {
                let value = self.select_atom(atom);

                self.emit(Instruction::movq(value, Operand::Register(X86FullRegister::Rdi)));
                self.emit(Instruction::Callq {
                    label: PRINT_INT.into(),
                    arguments: vec![X86FullRegister::Rdi],
                });
            }
            cir::Statement::Collect { bytes } => {
                self.emit(Instruction::movq(R15, Operand::Register(X86FullRegister::Rdi)));
                self.emit(Instruction::movq(
                    Operand::Immediate(*bytes as i64),
                    Operand::Register(X86FullRegister::Rsi),
                ));
                self.emit(Instruction::Callq {
                    label: COLLECT.into(),
                    arguments: X86FullRegister::RUNTIME_ARGUMENTS.to_vec(),
                });
            }
            cir::Statement::TupleSet {
                tuple,
                index,
                value,
            } => {
                let value = self.select_atom(value);

                self.emit(Instruction::movq(Operand::Variable(*tuple), R11));
                self.emit(Instruction::movq(value, field(*index)));
            }
            cir::Statement::Goto(label) => self.emit(Instruction::Jmp(*label)),
            cir::Statement::If {
                operator,
                lhs,
                rhs,
                positive,
                negative,
            } => {
                let condition = ConditionCode::from_operator(*operator)
                    .ok_or_else(|| CompileError::unsupported(STAGE, statement))?;

                let lhs = self.select_atom(lhs);
                let rhs = self.select_atom(rhs);

                self.emit(Instruction::cmpq(rhs, lhs));
                self.emit(Instruction::JmpIf {
                    condition,
                    label: *positive,
                });
                self.emit(Instruction::Jmp(*negative));
            }
            cir::Statement::Return(atom) => {
                let value = self.select_atom(atom);

                self.emit(Instruction::movq(value, RAX));
                self.emit(Instruction::Jmp(self.conclusion));
            }
            cir::Statement::TailCall { target, arguments } => {
                if arguments.len() > self.config.parameter_registers.len() {
                    // stack arguments live in our own frame, which a tail call
                    // would tear down before the callee could read them
                    self.select_call(target, arguments)?;
                    self.emit(Instruction::Jmp(self.conclusion));
                    return Ok(());
                }

                let target = match target {
                    Atom::Variable(name) if self.is_function(*name) => Operand::GlobalValue(*name),
                    Atom::Variable(name) => Operand::Variable(*name),
                    Atom::Constant(_) => return Err(CompileError::unsupported(STAGE, statement)),
                };

                let arguments = self.pass_register_arguments(arguments);
                self.emit(Instruction::TailJmp { target, arguments });
            }
        }

        Ok(())
    }

    fn select_assignment(&mut self, destination: Operand, value: &cir::Expression) -> CompileResult<()> {
        match value {
            cir::Expression::Atom(Atom::Variable(name)) if self.is_function(*name) => {
                self.emit(Instruction::leaq(Operand::GlobalValue(*name), destination));
            }
            cir::Expression::Atom(atom) => {
                let source = self.select_atom(atom);
                self.emit(Instruction::movq(source, destination));
            }
            cir::Expression::Primitive { operator, operands } => {
                self.select_primitive(destination, *operator, operands)
                    .ok_or_else(|| CompileError::unsupported(STAGE, value))?;
            }
            cir::Expression::Call { target, arguments } => {
                self.select_call(target, arguments)?;
                self.emit(Instruction::movq(RAX, destination));
            }
            cir::Expression::Allocate { bytes, ty } => {
                let Type::Tuple(fields) = ty else {
                    return Err(CompileError::unsupported(STAGE, value));
                };

                let free_pointer = Operand::GlobalValue(crate::middle::expose_allocation::FREE_POINTER.into());

                self.emit(Instruction::movq(free_pointer, R11));
                self.emit(Instruction::addq(Operand::Immediate(*bytes as i64), free_pointer));
                self.emit(Instruction::movq(
                    Operand::Immediate(Type::tuple_tag(fields)),
                    Operand::Deref(X86FullRegister::R11, 0),
                ));
                self.emit(Instruction::movq(R11, destination));
            }
            cir::Expression::GlobalValue(name) => {
                self.emit(Instruction::movq(Operand::GlobalValue(*name), destination));
            }
        }

        Ok(())
    }

    /// Returns `None` when the operator does not accept these operands
    fn select_primitive(
        &mut self,
        destination: Operand,
        operator: PrimitiveOperator,
        operands: &[Atom],
    ) -> Option<()> {
        use PrimitiveOperator::*;

        if let (Subscript, [tuple, Atom::Constant(Constant::Int(index))]) = (operator, operands) {
            let tuple = self.select_atom(tuple);
            let index = usize::try_from(*index).ok()?;

            self.emit(Instruction::movq(tuple, R11));
            self.emit(Instruction::movq(field(index), destination));
            return Some(());
        }

        let operands = operands
            .iter()
            .map(|atom| self.select_atom(atom))
            .collect::<Vec<_>>();

        match (operator, operands.as_slice()) {
            (Neg, [operand]) => {
                self.move_unless_same(*operand, destination);
                self.emit(Instruction::Negq(destination));
            }
            (Not, [operand]) => {
                self.move_unless_same(*operand, destination);
                self.emit(Instruction::binary(
                    BinaryOperator::Xorq,
                    Operand::Immediate(1),
                    destination,
                ));
            }
            (Add | Mult | And | Or, [lhs, rhs]) => {
                let operator = match operator {
                    Add => BinaryOperator::Addq,
                    Mult => BinaryOperator::Imulq,
                    And => BinaryOperator::Andq,
                    _ => BinaryOperator::Orq,
                };

                // commutative, so whichever operand already lives in the
                // destination can be the one that stays
                let other = if *rhs == destination { *lhs } else { *rhs };
                if *rhs != destination {
                    self.move_unless_same(*lhs, destination);
                }

                self.emit(Instruction::binary(operator, other, destination));
            }
            (Sub, [lhs, rhs]) if *rhs == destination && *lhs != destination => {
                // d = l - d  is  d = -d + l
                self.emit(Instruction::Negq(destination));
                self.emit(Instruction::addq(*lhs, destination));
            }
            (Sub, [lhs, rhs]) => {
                self.move_unless_same(*lhs, destination);
                self.emit(Instruction::subq(*rhs, destination));
            }
            (operator, [lhs, rhs]) if operator.is_comparison() => {
                let condition = ConditionCode::from_operator(operator)?;
                let al = Operand::ByteRegister(X86FullRegister::Rax.as_8_bit());

                self.emit(Instruction::cmpq(*rhs, *lhs));
                self.emit(Instruction::Set {
                    condition,
                    destination: al,
                });
                self.emit(Instruction::binary(BinaryOperator::Movzbq, al, destination));
            }
            _ => return None,
        }

        Some(())
    }

    fn move_unless_same(&mut self, source: Operand, destination: Operand) {
        if source != destination {
            self.emit(Instruction::movq(source, destination));
        }
    }

    /// Moves the leading arguments into the parameter registers and returns
    /// the registers used. Any function addresses are loaded before the first
    /// register is written.
    fn pass_register_arguments(&mut self, arguments: &[Atom]) -> Vec<X86FullRegister> {
        let operands = arguments
            .iter()
            .map(|atom| self.select_atom(atom))
            .collect::<Vec<_>>();

        self.move_into_parameter_registers(&operands)
    }

    fn move_into_parameter_registers(&mut self, operands: &[Operand]) -> Vec<X86FullRegister> {
        let registers = self.config.parameter_registers.clone();

        operands
            .iter()
            .zip(registers)
            .map(|(operand, register)| {
                self.emit(Instruction::movq(*operand, Operand::Register(register)));
                register
            })
            .collect()
    }

    /// Emits a complete call, leaving the result in `%rax`
    fn select_call(&mut self, target: &Atom, arguments: &[Atom]) -> CompileResult<()> {
        let operands = arguments
            .iter()
            .map(|atom| self.select_atom(atom))
            .collect::<Vec<_>>();

        let split = operands.len().min(self.config.parameter_registers.len());
        let (register_operands, stack_operands) = operands.split_at(split);

        // an odd number of pushes gets one extra slot so the stack stays
        // 16-byte aligned at the call
        let padding = stack_operands.len() % 2;
        if padding == 1 {
            self.emit(Instruction::subq(Operand::Immediate(8), RSP));
        }

        for operand in stack_operands.iter().rev() {
            self.emit(Instruction::Pushq(*operand));
        }

        let registers = self.move_into_parameter_registers(register_operands);

        match target {
            Atom::Variable(name) if self.is_function(*name) => self.emit(Instruction::Callq {
                label: *name,
                arguments: registers,
            }),
            Atom::Variable(name) => {
                self.emit(Instruction::movq(Operand::Variable(*name), RAX));
                self.emit(Instruction::IndirectCallq {
                    target: RAX,
                    arguments: registers,
                });
            }
            Atom::Constant(_) => return Err(CompileError::unsupported(STAGE, target)),
        }

        let stack_bytes = 8 * (stack_operands.len() + padding) as i64;
        if stack_bytes > 0 {
            self.emit(Instruction::addq(Operand::Immediate(stack_bytes), RSP));
        }

        Ok(())
    }
}

/// Field `index` of the tuple whose address is in `%r11`. The header word
/// comes first.
fn field(index: usize) -> Operand {
    Operand::Deref(X86FullRegister::R11, 8 * (index as i64 + 1))
}

//! Rewrites instructions whose operands x86-64 cannot encode once variables
//! have been replaced by their homes. `%rax` is the scratch register. The
//! few cases which need `%rax` for the destination use `%r11` for the source.
//!
//! Patching a patched program changes nothing.

use crate::backend::{
    assemblers::x86_64::X86FullRegister,
    x86::{self, BinaryOperator, Instruction, Operand},
};

const RAX: Operand = Operand::Register(X86FullRegister::Rax);
const R11: Operand = Operand::Register(X86FullRegister::R11);

pub fn patch_instructions(program: &mut x86::Program) {
    for function in &mut program.functions {
        for block in &mut function.blocks {
            block.instructions = std::mem::take(&mut block.instructions)
                .into_iter()
                .flat_map(patch_instruction)
                .collect();
        }
    }
}

pub fn patch_instruction(instruction: Instruction) -> Vec<Instruction> {
    match instruction {
        Instruction::Binary {
            operator,
            source,
            destination,
        } => patch_binary(operator, source, destination),
        Instruction::Pushq(operand) if operand.is_wide_immediate() => {
            vec![Instruction::movq(operand, RAX), Instruction::Pushq(RAX)]
        }
        instruction => vec![instruction],
    }
}

fn patch_binary(operator: BinaryOperator, source: Operand, destination: Operand) -> Vec<Instruction> {
    use BinaryOperator::*;

    let binary = |source, destination| Instruction::binary(operator, source, destination);

    match operator {
        Movq if source == destination => vec![],
        Movq if destination.is_memory() && (source.is_memory() || source.is_wide_immediate()) => {
            vec![Instruction::movq(source, RAX), Instruction::movq(RAX, destination)]
        }
        Movq => vec![binary(source, destination)],

        // these can only write a register
        Leaq | Movzbq if destination.is_memory() => {
            vec![binary(source, RAX), Instruction::movq(RAX, destination)]
        }
        Imulq if destination.is_memory() => {
            let mut patched = Vec::new();
            let source = wide_source_into(source, R11, &mut patched);

            patched.push(Instruction::movq(destination, RAX));
            patched.push(binary(source, RAX));
            patched.push(Instruction::movq(RAX, destination));
            patched
        }
        Cmpq if destination.is_immediate() => {
            let mut patched = Vec::new();
            let source = wide_source_into(source, R11, &mut patched);

            patched.push(Instruction::movq(destination, RAX));
            patched.push(binary(source, RAX));
            patched
        }

        _ if source.is_wide_immediate() || (source.is_memory() && destination.is_memory()) => {
            vec![Instruction::movq(source, RAX), binary(RAX, destination)]
        }
        _ => vec![binary(source, destination)],
    }
}

/// Loads a 64-bit immediate into `scratch` first, since only `movq` can
/// encode it
fn wide_source_into(source: Operand, scratch: Operand, patched: &mut Vec<Instruction>) -> Operand {
    if source.is_wide_immediate() {
        patched.push(Instruction::movq(source, scratch));
        scratch
    } else {
        source
    }
}

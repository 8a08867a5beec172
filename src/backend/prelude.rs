//! Wraps every function body in its prelude and conclusion, and expands tail
//! jumps now that the frame layout is known.

use crate::{
    backend::{
        assemblers::x86_64::X86FullRegister,
        select::INITIALIZE,
        x86::{self, Frame, Instruction, Operand},
    },
    config::Config,
    frontend::intern::InternedSymbol,
    middle::{
        cir::{conclusion_label, start_label},
        expose_allocation::ROOTSTACK_BEGIN,
        type_check::main_symbol,
    },
};

const RAX: Operand = Operand::Register(X86FullRegister::Rax);
const RBP: Operand = Operand::Register(X86FullRegister::Rbp);
const RSP: Operand = Operand::Register(X86FullRegister::Rsp);
const R15: Operand = Operand::Register(X86FullRegister::R15);

pub fn add_prelude_and_conclusion(program: &mut x86::Program, config: &Config) {
    for function in &mut program.functions {
        let is_main = function.name == main_symbol();
        let frame = function.frame.clone();

        for block in &mut function.blocks {
            block.instructions = std::mem::take(&mut block.instructions)
                .into_iter()
                .flat_map(|instruction| match instruction {
                    Instruction::TailJmp { target, .. } => expand_tail_jump(target, &frame),
                    instruction => vec![instruction],
                })
                .collect();
        }

        let prelude = x86::Block {
            label: function.name,
            instructions: prelude(function.name, is_main, &frame, config),
        };

        let mut conclusion = teardown(&frame);
        conclusion.push(Instruction::Retq);

        function.blocks.insert(0, prelude);
        function.blocks.push(x86::Block {
            label: conclusion_label(function.name),
            instructions: conclusion,
        });
    }
}

fn prelude(name: InternedSymbol, is_main: bool, frame: &Frame, config: &Config) -> Vec<Instruction> {
    let mut instructions = vec![Instruction::Pushq(RBP), Instruction::movq(RSP, RBP)];

    instructions.extend(
        frame
            .callee_saved
            .iter()
            .map(|register| Instruction::Pushq(Operand::Register(*register))),
    );

    let adjustment = frame.stack_adjustment();
    if adjustment > 0 {
        instructions.push(Instruction::subq(Operand::Immediate(adjustment), RSP));
    }

    if is_main {
        instructions.extend([
            Instruction::movq(
                Operand::Immediate(config.root_stack_size as i64),
                Operand::Register(X86FullRegister::Rdi),
            ),
            Instruction::movq(
                Operand::Immediate(config.heap_size as i64),
                Operand::Register(X86FullRegister::Rsi),
            ),
            Instruction::Callq {
                label: INITIALIZE.into(),
                arguments: X86FullRegister::RUNTIME_ARGUMENTS.to_vec(),
            },
            Instruction::movq(Operand::GlobalValue(ROOTSTACK_BEGIN.into()), R15),
        ]);
    }

    // the collector scans every root slot, so they must never hold garbage
    for slot in 0..frame.root_slots {
        instructions.push(Instruction::movq(
            Operand::Immediate(0),
            Operand::Deref(X86FullRegister::R15, 8 * slot as i64),
        ));
    }

    if frame.root_slots > 0 {
        instructions.push(Instruction::addq(
            Operand::Immediate(frame.root_stack_bytes()),
            R15,
        ));
    }

    instructions.push(Instruction::Jmp(start_label(name)));
    instructions
}

/// Undoes the prelude, leaving the return address on top of the stack
fn teardown(frame: &Frame) -> Vec<Instruction> {
    let mut instructions = Vec::new();

    if frame.root_slots > 0 {
        instructions.push(Instruction::subq(
            Operand::Immediate(frame.root_stack_bytes()),
            R15,
        ));
    }

    let adjustment = frame.stack_adjustment();
    if adjustment > 0 {
        instructions.push(Instruction::addq(Operand::Immediate(adjustment), RSP));
    }

    instructions.extend(
        frame
            .callee_saved
            .iter()
            .rev()
            .map(|register| Instruction::Popq(Operand::Register(*register))),
    );

    instructions.push(Instruction::Popq(RBP));
    instructions
}

/// The target is loaded into `%rax` before the frame is torn down, since it
/// may live in that frame
fn expand_tail_jump(target: Operand, frame: &Frame) -> Vec<Instruction> {
    let load = match target {
        Operand::GlobalValue(_) => Instruction::leaq(target, RAX),
        _ => Instruction::movq(target, RAX),
    };

    let mut instructions = vec![load];
    instructions.extend(teardown(frame));
    instructions.push(Instruction::IndirectJmp(RAX));
    instructions
}

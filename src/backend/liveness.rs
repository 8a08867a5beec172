//! Backward liveness over the selected instructions of one function.
//!
//! Only variables and allocatable registers are tracked. Reserved registers
//! never compete for a color, so they would only add noise to the graph.

use hashbrown::{HashMap, HashSet};
use log::trace;

use crate::{
    backend::{
        assemblers::x86_64::X86FullRegister,
        x86::{self, Instruction, Operand},
    },
    config::Config,
    error::{CompileError, CompileResult},
    frontend::intern::InternedSymbol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Variable(InternedSymbol),
    Register(X86FullRegister),
}

impl core::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Variable(name) => write!(f, "{name}"),
            Location::Register(register) => write!(f, "%{register}"),
        }
    }
}

pub type LiveSet = HashSet<Location>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockLiveness {
    pub live_before: LiveSet,
    /// `live_after[i]` holds what is live right after instruction `i`
    pub live_after: Vec<LiveSet>,
}

/// Per block results, parallel to `FunctionDefinition::blocks`
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    pub blocks: Vec<BlockLiveness>,
}

impl Liveness {
    /// Every instruction paired with the set live after it
    pub fn instructions<'a>(
        &'a self,
        function: &'a x86::FunctionDefinition,
    ) -> impl Iterator<Item = (&'a Instruction, &'a LiveSet)> {
        function
            .blocks
            .iter()
            .zip(&self.blocks)
            .flat_map(|(block, liveness)| block.instructions.iter().zip(&liveness.live_after))
    }
}

/// The location an operand occupies, if it is one we track
pub fn location(operand: &Operand, config: &Config) -> Option<Location> {
    let register = match operand {
        Operand::Variable(name) => return Some(Location::Variable(*name)),
        Operand::Register(register) => *register,
        Operand::ByteRegister(register) => register.full(),
        Operand::Immediate(_) | Operand::Deref(..) | Operand::GlobalValue(_) => return None,
    };

    (config.is_caller_saved(register) || config.is_callee_saved(register))
        .then_some(Location::Register(register))
}

fn registers(registers: &[X86FullRegister], config: &Config) -> Vec<Location> {
    registers
        .iter()
        .filter_map(|register| location(&Operand::Register(*register), config))
        .collect()
}

/// Locations whose value the instruction reads
pub fn reads(instruction: &Instruction, config: &Config) -> Vec<Location> {
    let operands = match instruction {
        Instruction::Binary {
            operator,
            source,
            destination,
        } if operator.reads_destination() => vec![source, destination],
        Instruction::Binary { source, .. } => vec![source],
        Instruction::Negq(operand) | Instruction::Pushq(operand) => vec![operand],
        Instruction::Callq { arguments, .. } => return registers(arguments, config),
        Instruction::IndirectCallq { target, arguments }
        | Instruction::TailJmp { target, arguments } => {
            let mut read = registers(arguments, config);
            read.extend(location(target, config));
            return read;
        }
        Instruction::IndirectJmp(target) => vec![target],
        Instruction::Set { .. }
        | Instruction::Popq(_)
        | Instruction::Jmp(_)
        | Instruction::JmpIf { .. }
        | Instruction::Retq
        | Instruction::Comment(_) => vec![],
    };

    operands
        .into_iter()
        .filter_map(|operand| location(operand, config))
        .collect()
}

/// Locations the instruction overwrites
pub fn writes(instruction: &Instruction, config: &Config) -> Vec<Location> {
    match instruction {
        Instruction::Binary {
            operator,
            destination,
            ..
        } if operator.writes_destination() => location(destination, config).into_iter().collect(),
        Instruction::Negq(operand)
        | Instruction::Set {
            destination: operand,
            ..
        }
        | Instruction::Popq(operand) => location(operand, config).into_iter().collect(),
        Instruction::Callq { .. } | Instruction::IndirectCallq { .. } => {
            registers(&config.caller_saved_registers, config)
        }
        _ => vec![],
    }
}

pub fn analyze_liveness(function: &x86::FunctionDefinition, config: &Config) -> CompileResult<Liveness> {
    let conclusion = crate::middle::cir::conclusion_label(function.name);

    let block_indices = function
        .blocks
        .iter()
        .enumerate()
        .map(|(i, block)| (block.label, i))
        .collect::<HashMap<_, _>>();

    let mut liveness = Liveness {
        blocks: function
            .blocks
            .iter()
            .map(|block| BlockLiveness {
                live_before: LiveSet::new(),
                live_after: vec![LiveSet::new(); block.instructions.len()],
            })
            .collect(),
    };

    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut changed = false;

        for (i, block) in function.blocks.iter().enumerate().rev() {
            let live_before_of = |label: InternedSymbol| -> CompileResult<LiveSet> {
                if label == conclusion {
                    return Ok(LiveSet::new());
                }

                block_indices
                    .get(&label)
                    .map(|index| liveness.blocks[*index].live_before.clone())
                    .ok_or(CompileError::UnboundLabel {
                        function: function.name,
                        label,
                    })
            };

            let mut live = LiveSet::new();
            let mut live_after = vec![LiveSet::new(); block.instructions.len()];

            for (index, instruction) in block.instructions.iter().enumerate().rev() {
                match instruction {
                    Instruction::Jmp(label) => live = live_before_of(*label)?,
                    Instruction::JmpIf { label, .. } => live.extend(live_before_of(*label)?),
                    Instruction::Retq | Instruction::TailJmp { .. } | Instruction::IndirectJmp(_) => {
                        live.clear()
                    }
                    _ => {}
                }

                live_after[index] = live.clone();

                for written in writes(instruction, config) {
                    live.remove(&written);
                }
                live.extend(reads(instruction, config));
            }

            let result = &mut liveness.blocks[i];
            if result.live_before != live {
                changed = true;
            }
            result.live_before = live;
            result.live_after = live_after;
        }

        if !changed {
            break;
        }
    }

    trace!("liveness of `{}` converged after {rounds} rounds", function.name);

    Ok(liveness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::x86::{Block, ConditionCode, Frame};

    fn var(name: &str) -> Operand {
        Operand::Variable(name.into())
    }

    fn live(names: &[&str]) -> LiveSet {
        names
            .iter()
            .map(|name| Location::Variable((*name).into()))
            .collect()
    }

    fn function(blocks: Vec<(&str, Vec<Instruction>)>) -> x86::FunctionDefinition {
        x86::FunctionDefinition {
            name: "main".into(),
            blocks: blocks
                .into_iter()
                .map(|(label, instructions)| Block {
                    label: label.into(),
                    instructions,
                })
                .collect(),
            variable_types: HashMap::new(),
            frame: Frame::default(),
        }
    }

    #[test]
    fn straight_line() {
        let function = function(vec![(
            "main.start",
            vec![
                Instruction::movq(Operand::Immediate(1), var("a")),
                Instruction::movq(Operand::Immediate(2), var("b")),
                Instruction::addq(var("a"), var("b")),
                Instruction::movq(var("b"), Operand::Register(X86FullRegister::Rax)),
                Instruction::Jmp("main.conclusion".into()),
            ],
        )]);

        let liveness = analyze_liveness(&function, &Config::default()).unwrap();
        let block = &liveness.blocks[0];

        assert_eq!(block.live_after[0], live(&["a"]));
        assert_eq!(block.live_after[1], live(&["a", "b"]));
        assert_eq!(block.live_after[2], live(&["b"]));
        assert_eq!(block.live_after[3], live(&[]));
        assert!(block.live_before.is_empty());
    }

    #[test]
    fn loops_reach_a_fixpoint() {
        // x is read after the loop, so it must stay live around the back edge
        let function = function(vec![
            (
                "main.start",
                vec![
                    Instruction::movq(Operand::Immediate(0), var("x")),
                    Instruction::movq(Operand::Immediate(5), var("i")),
                    Instruction::Jmp("loop.1".into()),
                ],
            ),
            (
                "loop.1",
                vec![
                    Instruction::cmpq(Operand::Immediate(0), var("i")),
                    Instruction::JmpIf {
                        condition: ConditionCode::G,
                        label: "block.2".into(),
                    },
                    Instruction::Jmp("block.3".into()),
                ],
            ),
            (
                "block.2",
                vec![
                    Instruction::subq(Operand::Immediate(1), var("i")),
                    Instruction::Jmp("loop.1".into()),
                ],
            ),
            (
                "block.3",
                vec![
                    Instruction::movq(var("x"), Operand::Register(X86FullRegister::Rax)),
                    Instruction::Jmp("main.conclusion".into()),
                ],
            ),
        ]);

        let liveness = analyze_liveness(&function, &Config::default()).unwrap();

        assert_eq!(liveness.blocks[1].live_before, live(&["i", "x"]));
        assert_eq!(liveness.blocks[2].live_before, live(&["i", "x"]));
        assert_eq!(liveness.blocks[3].live_before, live(&["x"]));
    }

    #[test]
    fn calls_clobber_caller_saved_registers() {
        let config = Config::default();
        let call = Instruction::Callq {
            label: "print_int".into(),
            arguments: vec![X86FullRegister::Rdi],
        };

        assert_eq!(
            reads(&call, &config),
            [Location::Register(X86FullRegister::Rdi)]
        );
        assert_eq!(writes(&call, &config).len(), config.caller_saved_registers.len());
    }

    #[test]
    fn reserved_registers_are_not_tracked() {
        let config = Config::default();
        let instruction = Instruction::movq(Operand::Register(X86FullRegister::Rax), var("r"));

        assert!(reads(&instruction, &config).is_empty());
        assert_eq!(writes(&instruction, &config), [Location::Variable("r".into())]);
    }

    #[test]
    fn unknown_labels_are_reported() {
        let function = function(vec![("main.start", vec![Instruction::Jmp("nowhere".into())])]);

        assert!(matches!(
            analyze_liveness(&function, &Config::default()),
            Err(CompileError::UnboundLabel { .. })
        ));
    }
}

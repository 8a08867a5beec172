//! The interference graph: two locations conflict when one is written while
//! the other is still needed.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::trace;

use crate::{
    backend::{
        liveness::{self, Liveness, Location},
        select::PRINT_INT,
        x86::{self, Instruction},
    },
    config::Config,
    frontend::intern::InternedSymbol,
    index::{IndexVec, simple_index},
};

simple_index! {
    pub struct NodeId;
}

#[derive(Debug, Default, Clone)]
pub struct InterferenceGraph {
    locations: IndexVec<NodeId, Location>,
    nodes: HashMap<Location, NodeId>,
    adjacent: IndexVec<NodeId, HashSet<NodeId>>,
    /// Tuple variables live across a call which may collect. They may only
    /// ever live on the root stack.
    pub roots: HashSet<InternedSymbol>,
}

impl InterferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The node for `location`, created on first use
    pub fn node(&mut self, location: Location) -> NodeId {
        if let Some(node) = self.nodes.get(&location) {
            return *node;
        }

        let node = self.locations.push(location);
        self.adjacent.push(HashSet::new());
        self.nodes.insert(location, node);
        node
    }

    pub fn get(&self, location: &Location) -> Option<NodeId> {
        self.nodes.get(location).copied()
    }

    pub fn location(&self, node: NodeId) -> Location {
        self.locations[node]
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        self.locations.indices()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn add_edge(&mut self, a: Location, b: Location) {
        if a == b {
            return;
        }

        let (a, b) = (self.node(a), self.node(b));
        self.adjacent[a].insert(b);
        self.adjacent[b].insert(a);
    }

    pub fn neighbors(&self, node: NodeId) -> &HashSet<NodeId> {
        &self.adjacent[node]
    }

    pub fn edge_count(&self) -> usize {
        self.adjacent.iter().map(HashSet::len).sum::<usize>() / 2
    }
}

impl core::fmt::Display for InterferenceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (node, location) in self.locations.enumerate() {
            let neighbors = self.adjacent[node]
                .iter()
                .map(|neighbor| self.locations[*neighbor].to_string())
                .sorted()
                .join(", ");

            writeln!(f, "{location}: {neighbors}")?;
        }

        Ok(())
    }
}

/// Whether a collection may run during this instruction
fn may_collect(instruction: &Instruction) -> bool {
    match instruction {
        Instruction::Callq { label, .. } => label.value() != PRINT_INT,
        Instruction::IndirectCallq { .. } => true,
        _ => false,
    }
}

pub fn build_interference(
    function: &x86::FunctionDefinition,
    liveness: &Liveness,
    config: &Config,
) -> InterferenceGraph {
    let mut graph = InterferenceGraph::new();

    // registers take the lowest node ids, in color order
    for register in config.allocatable_registers() {
        graph.node(Location::Register(register));
    }

    for operand in function.instructions().flat_map(Instruction::operands) {
        if let Some(location @ Location::Variable(_)) = liveness::location(&operand, config) {
            graph.node(location);
        }
    }

    for (instruction, live_after) in liveness.instructions(function) {
        match instruction {
            Instruction::Binary {
                operator,
                source,
                destination,
            } if operator.is_move() => {
                if let Some(destination) = liveness::location(destination, config) {
                    let source = liveness::location(source, config);

                    for live in live_after {
                        if Some(*live) != source {
                            graph.add_edge(destination, *live);
                        }
                    }
                }
            }
            _ => {
                for written in liveness::writes(instruction, config) {
                    for live in live_after {
                        graph.add_edge(written, *live);
                    }
                }
            }
        }

        if may_collect(instruction) {
            for live in live_after {
                if let Location::Variable(name) = live
                    && function.variable_types.get(name).is_some_and(|ty| ty.is_tuple())
                {
                    graph.roots.insert(*name);
                }
            }
        }
    }

    let registers = config.allocatable_registers();
    for root in graph.roots.clone() {
        for register in &registers {
            graph.add_edge(Location::Variable(root), Location::Register(*register));
        }
    }

    trace!(
        "interference graph of `{}`: {} nodes, {} edges, {} roots",
        function.name,
        graph.len(),
        graph.edge_count(),
        graph.roots.len()
    );

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{
            assemblers::x86_64::X86FullRegister,
            liveness::analyze_liveness,
            x86::{Block, Frame, Operand},
        },
        middle::ty::Type,
    };

    fn var(name: &str) -> Operand {
        Operand::Variable(name.into())
    }

    fn loc(name: &str) -> Location {
        Location::Variable(name.into())
    }

    fn interferes(graph: &InterferenceGraph, a: &Location, b: &Location) -> bool {
        match (graph.get(a), graph.get(b)) {
            (Some(a), Some(b)) => graph.neighbors(a).contains(&b),
            _ => false,
        }
    }

    fn build(
        instructions: Vec<Instruction>,
        variable_types: HashMap<InternedSymbol, Type>,
    ) -> InterferenceGraph {
        let config = Config::default();
        let mut instructions = instructions;
        instructions.push(Instruction::Jmp("main.conclusion".into()));

        let function = x86::FunctionDefinition {
            name: "main".into(),
            blocks: vec![Block {
                label: "main.start".into(),
                instructions,
            }],
            variable_types,
            frame: Frame::default(),
        };

        let liveness = analyze_liveness(&function, &config).unwrap();
        build_interference(&function, &liveness, &config)
    }

    #[test]
    fn moves_do_not_conflict_with_their_source() {
        let graph = build(
            vec![
                Instruction::movq(Operand::Immediate(1), var("a")),
                Instruction::movq(var("a"), var("b")),
                Instruction::addq(var("a"), var("b")),
                Instruction::movq(var("b"), Operand::Register(X86FullRegister::Rax)),
            ],
            HashMap::new(),
        );

        // b is written by the add while a is dead, and by the move from a
        assert!(!interferes(&graph, &loc("a"), &loc("b")));
    }

    #[test]
    fn overlapping_variables_conflict_both_ways() {
        let graph = build(
            vec![
                Instruction::movq(Operand::Immediate(1), var("a")),
                Instruction::movq(Operand::Immediate(2), var("b")),
                Instruction::addq(var("a"), var("b")),
                Instruction::movq(var("b"), Operand::Register(X86FullRegister::Rax)),
            ],
            HashMap::new(),
        );

        assert!(interferes(&graph, &loc("a"), &loc("b")));
        assert!(interferes(&graph, &loc("b"), &loc("a")));
    }

    #[test]
    fn values_live_across_calls_avoid_caller_saved_registers() {
        let graph = build(
            vec![
                Instruction::movq(Operand::Immediate(1), var("a")),
                Instruction::Callq {
                    label: "print_int".into(),
                    arguments: vec![],
                },
                Instruction::movq(var("a"), Operand::Register(X86FullRegister::Rax)),
            ],
            HashMap::new(),
        );

        for register in Config::default().caller_saved_registers {
            assert!(interferes(&graph, &loc("a"), &Location::Register(register)));
        }
        assert!(!interferes(&graph, &loc("a"), &Location::Register(X86FullRegister::Rbx)));
        assert!(graph.roots.is_empty());
    }

    #[test]
    fn tuples_live_across_collection_become_roots() {
        let graph = build(
            vec![
                Instruction::movq(Operand::Immediate(0), var("t")),
                Instruction::Callq {
                    label: "collect".into(),
                    arguments: vec![],
                },
                Instruction::movq(var("t"), Operand::Register(X86FullRegister::Rax)),
            ],
            [("t".into(), Type::Tuple(vec![Type::Int]))].into_iter().collect(),
        );

        assert!(graph.roots.contains(&InternedSymbol::from("t")));
        for register in Config::default().allocatable_registers() {
            assert!(interferes(&graph, &loc("t"), &Location::Register(register)));
        }
    }

    #[test]
    fn registers_come_first_in_color_order() {
        let graph = build(vec![], HashMap::new());
        let table = Config::default().allocatable_registers();

        assert_eq!(graph.len(), table.len());
        for (node, register) in graph.nodes().zip(table) {
            assert_eq!(graph.location(node), Location::Register(register));
        }
    }
}

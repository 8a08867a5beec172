//! Graph coloring register allocation using DSatur.
//!
//! Color `c` below `R` (the size of the register table) is register
//! `allocatable_registers()[c]`. Higher colors are memory: a root stack slot
//! for GC roots and a stack slot below the saved registers for everything
//! else. Colors are never coalesced, so moves between variables survive
//! until the patcher drops the ones that became `movq a, a`.

use hashbrown::{HashMap, HashSet};
use log::trace;

use crate::{
    backend::{
        interference::{InterferenceGraph, NodeId},
        liveness::Location,
        x86::{self, Frame, Operand},
    },
    config::Config,
    error::{CompileError, CompileResult},
    frontend::intern::InternedSymbol,
    index::IndexVec,
};

pub type Color = usize;

/// Colors every node of the graph. Register nodes keep their own color, and
/// the remaining nodes are colored most saturated first.
pub fn color_graph(graph: &InterferenceGraph, config: &Config) -> IndexVec<NodeId, Color> {
    let table = config.allocatable_registers();

    let mut colors: IndexVec<NodeId, Option<Color>> = IndexVec::from_raw(vec![None; graph.len()]);
    let mut saturation: IndexVec<NodeId, HashSet<Color>> =
        IndexVec::from_raw(vec![HashSet::new(); graph.len()]);

    fn assign(
        graph: &InterferenceGraph,
        node: NodeId,
        color: Color,
        colors: &mut IndexVec<NodeId, Option<Color>>,
        saturation: &mut IndexVec<NodeId, HashSet<Color>>,
    ) {
        colors[node] = Some(color);
        for neighbor in graph.neighbors(node) {
            saturation[*neighbor].insert(color);
        }
    }

    for node in graph.nodes() {
        if let Location::Register(register) = graph.location(node)
            && let Some(color) = table.iter().position(|r| *r == register)
        {
            assign(graph, node, color, &mut colors, &mut saturation);
        }
    }

    loop {
        // the first node with the highest saturation wins, so ties go to the
        // smallest id
        let next = graph
            .nodes()
            .filter(|node| colors[*node].is_none())
            .fold(None::<NodeId>, |best, node| match best {
                Some(best) if saturation[best].len() >= saturation[node].len() => Some(best),
                _ => Some(node),
            });

        let Some(node) = next else {
            break;
        };

        let color = (0..).find(|c| !saturation[node].contains(c)).unwrap_or_default();
        assign(graph, node, color, &mut colors, &mut saturation);
    }

    IndexVec::from_raw(colors.raw.into_iter().map(Option::unwrap_or_default).collect())
}

#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub homes: HashMap<InternedSymbol, Operand>,
    pub frame: Frame,
}

/// Turns a coloring into concrete homes and a frame layout
pub fn assign_homes(
    graph: &InterferenceGraph,
    colors: &IndexVec<NodeId, Color>,
    config: &Config,
) -> Allocation {
    let table = config.allocatable_registers();

    let variables = graph
        .nodes()
        .filter_map(|node| match graph.location(node) {
            Location::Variable(name) => Some((name, colors[node])),
            Location::Register(_) => None,
        })
        .collect::<Vec<_>>();

    let callee_saved = table
        .iter()
        .enumerate()
        .filter(|(color, register)| {
            config.is_callee_saved(**register) && variables.iter().any(|(_, c)| c == color)
        })
        .map(|(_, register)| *register)
        .collect::<Vec<_>>();

    let mut frame = Frame {
        callee_saved,
        ..Frame::default()
    };

    let homes = variables
        .into_iter()
        .map(|(name, color)| {
            let home = match color.checked_sub(table.len()) {
                None => Operand::Register(table[color]),
                Some(slot) if graph.roots.contains(&name) => {
                    frame.root_slots = frame.root_slots.max(slot + 1);
                    Frame::root_slot(slot)
                }
                Some(slot) => {
                    frame.stack_slots = frame.stack_slots.max(slot + 1);
                    Frame::stack_slot(frame.callee_saved.len(), slot)
                }
            };

            (name, home)
        })
        .collect();

    Allocation { homes, frame }
}

/// Colors the function's interference graph and replaces every variable by
/// its home
pub fn allocate_registers(
    function: &mut x86::FunctionDefinition,
    graph: &InterferenceGraph,
    config: &Config,
) -> CompileResult<Allocation> {
    let colors = color_graph(graph, config);
    let allocation = assign_homes(graph, &colors, config);

    for (name, home) in &allocation.homes {
        trace!("`{}`: {name} -> {home}", function.name);
    }

    let mut unassigned = None;

    for block in &mut function.blocks {
        for instruction in &mut block.instructions {
            instruction.map_operands(|operand| match operand {
                Operand::Variable(name) => match allocation.homes.get(&name) {
                    Some(home) => *home,
                    None => {
                        unassigned = Some(name);
                        operand
                    }
                },
                operand => operand,
            });
        }
    }

    if let Some(name) = unassigned {
        return Err(CompileError::unsupported(
            "register allocation",
            format!("variable `{name}` has no home"),
        ));
    }

    function.frame = allocation.frame.clone();

    Ok(allocation)
}

/// Whether no two neighbors share a color
pub fn is_valid_coloring(graph: &InterferenceGraph, colors: &IndexVec<NodeId, Color>) -> bool {
    graph.nodes().all(|node| {
        graph
            .neighbors(node)
            .iter()
            .all(|neighbor| colors[*neighbor] != colors[node])
    })
}

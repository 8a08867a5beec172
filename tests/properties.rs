//! Property tests over randomly generated programs and instruction streams.

use proptest::prelude::*;
use tupc::{
    Config,
    backend::{
        assemblers::x86_64::X86FullRegister,
        emulator::emulate,
        interference::build_interference,
        liveness::{analyze_liveness, reads, writes},
        patch::patch_instruction,
        regalloc::{color_graph, is_valid_coloring},
        select::PRINT_INT,
        x86::{self, BinaryOperator, Frame, Instruction, Operand},
    },
    compile_to_x86,
    frontend::{
        ast::{Expression, PrimitiveOperator, Program, Statement},
        intern::NameGenerator,
    },
    middle::{cir::conclusion_label, flatten::flatten_program, interpreter::interpret},
};

const VARIABLES: &[&str] = &["a", "b", "c", "d", "e", "f"];

fn variable_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(&VARIABLES[..3])
}

fn int_expression() -> impl Strategy<Value = Expression> {
    let leaf = prop_oneof![
        (-1000i64..1000).prop_map(Expression::int),
        variable_name().prop_map(Expression::var),
    ];

    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| Expression::prim(PrimitiveOperator::Add, [l, r])),
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| Expression::prim(PrimitiveOperator::Sub, [l, r])),
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| Expression::prim(PrimitiveOperator::Mult, [l, r])),
            inner.prop_map(|e| Expression::prim(PrimitiveOperator::Neg, [e])),
        ]
    })
}

fn statement() -> impl Strategy<Value = Statement> {
    prop_oneof![
        (variable_name(), int_expression()).prop_map(|(target, value)| Statement::assign(target, value)),
        int_expression().prop_map(Statement::print),
        (int_expression(), int_expression(), int_expression()).prop_map(|(lhs, rhs, printed)| {
            Statement::if_else(
                Expression::prim(PrimitiveOperator::Lt, [lhs, rhs]),
                vec![Statement::print(printed)],
                vec![Statement::assign("a", Expression::int(0))],
            )
        }),
    ]
}

/// Straight-line integer programs over `a`, `b` and `c`, all defined up front
fn program() -> impl Strategy<Value = Program> {
    (
        prop::array::uniform3(-100i64..100),
        prop::collection::vec(statement(), 1..12),
    )
        .prop_map(|(initial, body)| {
            let mut statements = VARIABLES[..3]
                .iter()
                .zip(initial)
                .map(|(name, value)| Statement::assign(name, Expression::int(value)))
                .collect::<Vec<_>>();
            statements.extend(body);
            statements.push(Statement::print(Expression::prim(
                PrimitiveOperator::Add,
                [Expression::var("a"), Expression::var("b")],
            )));

            Program::new(statements)
        })
}

fn register() -> impl Strategy<Value = X86FullRegister> {
    prop::sample::select(Config::default().allocatable_registers())
}

fn operand() -> impl Strategy<Value = Operand> {
    prop_oneof![
        3 => prop::sample::select(VARIABLES).prop_map(|name| Operand::Variable(name.into())),
        1 => register().prop_map(Operand::Register),
        1 => prop_oneof![Just(0i64), Just(42), Just(i64::MAX), Just(-(1 << 40))]
            .prop_map(Operand::Immediate),
    ]
}

fn writable_operand() -> impl Strategy<Value = Operand> {
    prop_oneof![
        3 => prop::sample::select(VARIABLES).prop_map(|name| Operand::Variable(name.into())),
        1 => register().prop_map(Operand::Register),
    ]
}

fn home() -> impl Strategy<Value = Operand> {
    prop_oneof![
        register().prop_map(Operand::Register),
        (0usize..4).prop_map(|slot| Frame::stack_slot(1, slot)),
        (0usize..2).prop_map(Frame::root_slot),
        prop_oneof![Just(0i64), Just(-7), Just(i64::MIN), Just(1 << 35)].prop_map(Operand::Immediate),
    ]
}

fn binary_operator() -> impl Strategy<Value = BinaryOperator> {
    prop::sample::select(vec![
        BinaryOperator::Addq,
        BinaryOperator::Subq,
        BinaryOperator::Imulq,
        BinaryOperator::Andq,
        BinaryOperator::Orq,
        BinaryOperator::Xorq,
        BinaryOperator::Cmpq,
        BinaryOperator::Movq,
    ])
}

fn instruction() -> impl Strategy<Value = Instruction> {
    prop_oneof![
        6 => (binary_operator(), operand(), writable_operand())
            .prop_map(|(operator, source, destination)| Instruction::binary(operator, source, destination)),
        1 => writable_operand().prop_map(Instruction::Negq),
        1 => Just(Instruction::Callq {
            label: PRINT_INT.into(),
            arguments: vec![X86FullRegister::Rdi],
        }),
        1 => Just(Instruction::Callq {
            label: "g".into(),
            arguments: vec![X86FullRegister::Rdi, X86FullRegister::Rsi],
        }),
    ]
}

/// A single block function ending in a jump to its conclusion
fn function(instructions: Vec<Instruction>) -> x86::FunctionDefinition {
    let name = "f".into();
    let mut instructions = instructions;
    instructions.push(Instruction::Jmp(conclusion_label(name)));

    x86::FunctionDefinition {
        name,
        blocks: vec![x86::Block {
            label: "f.start".into(),
            instructions,
        }],
        variable_types: Default::default(),
        frame: Frame::default(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn flattening_preserves_output(program in program()) {
        let expected = interpret(&program).unwrap();
        let flattened = flatten_program(&program, &mut NameGenerator::new()).unwrap();

        prop_assert_eq!(interpret(&flattened).unwrap(), expected);
    }

    #[test]
    fn compiled_programs_print_what_the_interpreter_prints(program in program()) {
        let expected = interpret(&program).unwrap();
        let compiled = compile_to_x86(&program, &Config::default()).unwrap();

        prop_assert_eq!(emulate(&compiled).unwrap().output, expected);
    }

    #[test]
    fn spilling_preserves_output(program in program()) {
        let config = Config {
            caller_saved_registers: vec![X86FullRegister::Rcx],
            callee_saved_registers: vec![X86FullRegister::Rbx],
            parameter_registers: vec![X86FullRegister::Rcx],
            ..Config::default()
        };

        let expected = interpret(&program).unwrap();
        let compiled = compile_to_x86(&program, &config).unwrap();

        prop_assert_eq!(emulate(&compiled).unwrap().output, expected);
    }

    #[test]
    fn live_sets_cover_every_later_read(instructions in prop::collection::vec(instruction(), 0..40)) {
        let config = Config::default();
        let function = function(instructions);
        let liveness = analyze_liveness(&function, &config).unwrap();

        let block = &function.blocks[0];
        let live_after = &liveness.blocks[0].live_after;

        for i in 0..block.instructions.len() - 1 {
            let next = &block.instructions[i + 1];

            for read in reads(next, &config) {
                prop_assert!(live_after[i].contains(&read), "{read} is read by `{next}`");
            }

            for live in &live_after[i + 1] {
                if !writes(next, &config).contains(live) {
                    prop_assert!(live_after[i].contains(live), "{live} is live across `{next}`");
                }
            }
        }

        prop_assert!(live_after.last().is_some_and(|live| live.is_empty()));
    }

    #[test]
    fn interference_is_symmetric_and_colorable(instructions in prop::collection::vec(instruction(), 0..40)) {
        let config = Config::default();
        let function = function(instructions);
        let liveness = analyze_liveness(&function, &config).unwrap();
        let graph = build_interference(&function, &liveness, &config);

        for node in graph.nodes() {
            prop_assert!(!graph.neighbors(node).contains(&node));
            for neighbor in graph.neighbors(node) {
                prop_assert!(graph.neighbors(*neighbor).contains(&node));
            }
        }

        let colors = color_graph(&graph, &config);
        prop_assert!(is_valid_coloring(&graph, &colors));
    }

    #[test]
    fn patching_is_idempotent(
        operator in binary_operator(),
        source in home(),
        destination in home(),
    ) {
        // selection only ever compares against an immediate destination
        prop_assume!(operator == BinaryOperator::Cmpq || !destination.is_immediate());

        let once = patch_instruction(Instruction::binary(operator, source, destination));
        let twice = once.clone().into_iter().flat_map(patch_instruction).collect::<Vec<_>>();

        prop_assert_eq!(&once, &twice);

        for instruction in &once {
            if let Instruction::Binary { source, destination, .. } = instruction {
                prop_assert!(!(source.is_memory() && destination.is_memory()), "`{instruction}`");
                prop_assert!(!destination.is_immediate(), "`{instruction}`");
            }
        }
    }
}

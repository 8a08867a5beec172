//! Runs every pass in order. One call is one compilation: the name counter
//! is created here and dropped when the call returns.

use log::debug;

use crate::{
    backend::{
        interference::build_interference,
        liveness::analyze_liveness,
        patch::patch_instructions,
        prelude::add_prelude_and_conclusion,
        regalloc::allocate_registers,
        select::select_instructions,
        targets::{CodeGenerator, Target},
        x86::{self, pretty_print::pretty_print_x86},
    },
    config::Config,
    error::CompileResult,
    frontend::{ast::Program, intern::NameGenerator},
    middle::{
        cir::{self, explicate::explicate_control, pretty_print::pretty_print_cir},
        expose_allocation::expose_allocation,
        flatten::flatten_program,
        type_check::{type_check_lowered_program, type_check_program},
    },
};

/// Compiles a program to assembly text for the default target
pub fn compile(program: &Program, config: &Config) -> CompileResult<String> {
    let program = compile_to_x86(program, config)?;
    let assembly = Target::default().get_code_generator().translate_to_asm(&program);

    debug!("emitted {} lines of assembly", assembly.lines().count());

    Ok(assembly)
}

/// Runs every pass up to and including the prelude, returning the final
/// instructions before they are rendered as text
pub fn compile_to_x86(program: &Program, config: &Config) -> CompileResult<x86::Program> {
    config.validate()?;

    let mut names = NameGenerator::new();

    type_check_program(program)?;
    log_pass(config, "type check", || program.to_string());

    let flattened = flatten_program(program, &mut names)?;
    log_pass(config, "flatten", || flattened.to_string());

    let environment = type_check_lowered_program(&flattened)?;
    let exposed = expose_allocation(&flattened, &environment, &mut names)?;
    log_pass(config, "expose allocation", || exposed.to_string());

    // the exposer introduces temporaries, so their types are only known now
    let environment = type_check_lowered_program(&exposed)?;
    let explicated = explicate_control(&exposed, &environment, &mut names)?;
    cir::validate(&explicated)?;
    log_pass(config, "explicate control", || pretty_print_cir(&explicated));

    let mut selected = select_instructions(&explicated, config, &mut names)?;
    log_pass(config, "select instructions", || pretty_print_x86(&selected));

    for function in &mut selected.functions {
        let liveness = analyze_liveness(function, config)?;
        let graph = build_interference(function, &liveness, config);

        if config.log_passes {
            debug!("interference graph of `{}`:\n{graph}", function.name);
        }

        allocate_registers(function, &graph, config)?;
    }
    log_pass(config, "allocate registers", || pretty_print_x86(&selected));

    patch_instructions(&mut selected);
    log_pass(config, "patch instructions", || pretty_print_x86(&selected));

    add_prelude_and_conclusion(&mut selected, config);
    log_pass(config, "prelude and conclusion", || pretty_print_x86(&selected));

    Ok(selected)
}

fn log_pass(config: &Config, pass: &str, render: impl FnOnce() -> String) {
    if config.log_passes {
        debug!("after {pass}:\n{}", render());
    } else {
        debug!("finished {pass}");
    }
}

use colored::Colorize;
use itertools::Itertools;

use crate::middle::cir;

pub fn pretty_print_cir(program: &cir::Program) -> String {
    program.functions.iter().map(pretty_print_function).join("\n")
}

pub fn pretty_print_function(function: &cir::FunctionDefinition) -> String {
    let mut output = format!(
        "{} {}{}{}{}\n",
        "fn".magenta(),
        function.name.value().blue(),
        "(".white(),
        function.parameters.iter().join(", "),
        ") {".white()
    );

    for block in &function.blocks {
        output.push_str(&format!("{}\n", format!("{}:", block.label).bright_red()));

        for statement in &block.statements {
            output.push_str(&format!("    {statement}\n"));
        }
    }

    output.push_str(&format!("{}\n", "}".white()));
    output
}

impl core::fmt::Display for cir::Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            cir::Atom::Variable(name) => write!(f, "{name}"),
            cir::Atom::Constant(constant) => write!(f, "{constant}"),
        }
    }
}

impl core::fmt::Display for cir::Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            cir::Expression::Atom(atom) => write!(f, "{atom}"),
            cir::Expression::Primitive { operator, operands } => {
                write!(f, "{}({})", operator.name().cyan(), operands.iter().join(", "))
            }
            cir::Expression::Call { target, arguments } => {
                write!(f, "{} {target}({})", "call".cyan(), arguments.iter().join(", "))
            }
            cir::Expression::Allocate { bytes, ty } => {
                write!(f, "{}({bytes}, {})", "allocate".cyan(), ty.to_string().yellow())
            }
            cir::Expression::GlobalValue(name) => write!(f, "{}", format!("global({name})").blue()),
        }
    }
}

impl core::fmt::Display for cir::Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            cir::Statement::Assign { target, value } => {
                write!(f, "{target} {} {value}", "=".white())
            }
            cir::Statement::Print(atom) => write!(f, "{}({atom})", "print".cyan()),
            cir::Statement::Collect { bytes } => write!(f, "{}({bytes})", "collect".cyan()),
            cir::Statement::TupleSet {
                tuple,
                index,
                value,
            } => write!(f, "{}({tuple}, {index}, {value})", "tuple_set".cyan()),
            cir::Statement::Goto(label) => {
                write!(f, "{} {}", "goto".magenta(), label.to_string().bright_red())
            }
            cir::Statement::If {
                operator,
                lhs,
                rhs,
                positive,
                negative,
            } => write!(
                f,
                "{} {}({lhs}, {rhs}) {} {} {} {}",
                "if".magenta(),
                operator.name().cyan(),
                "goto".magenta(),
                positive.to_string().bright_red(),
                "else goto".magenta(),
                negative.to_string().bright_red()
            ),
            cir::Statement::Return(atom) => write!(f, "{} {atom}", "return".magenta()),
            cir::Statement::TailCall { target, arguments } => write!(
                f,
                "{} {target}({})",
                "tail call".magenta(),
                arguments.iter().join(", ")
            ),
        }
    }
}

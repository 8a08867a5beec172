use colored::Colorize;

use crate::backend::x86;

/// A colored listing for logs. The plain `Display` impls below produce the
/// real assembly syntax.
pub fn pretty_print_x86(program: &x86::Program) -> String {
    let mut output = String::new();

    for function in &program.functions {
        output.push_str(&format!(
            "{} {} {}\n",
            "fn".magenta(),
            function.name.value().blue(),
            "{".white()
        ));

        for block in &function.blocks {
            output.push_str(&format!("{}\n", format!("{}:", block.label).bright_red()));

            for instruction in &block.instructions {
                let line = match instruction {
                    x86::Instruction::Comment(_) => instruction.to_string().dimmed().to_string(),
                    _ => instruction.to_string(),
                };

                output.push_str(&format!("    {line}\n"));
            }
        }

        output.push_str(&format!("{}\n", "}".white()));
    }

    output
}

impl core::fmt::Display for x86::Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            x86::Operand::Immediate(value) => write!(f, "${value}"),
            x86::Operand::Register(register) => write!(f, "%{register}"),
            x86::Operand::ByteRegister(register) => write!(f, "%{register}"),
            x86::Operand::Variable(name) => write!(f, "{name}"),
            x86::Operand::Deref(register, offset) => write!(f, "{offset}(%{register})"),
            x86::Operand::GlobalValue(name) => write!(f, "{name}(%rip)"),
        }
    }
}

impl core::fmt::Display for x86::Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            x86::Instruction::Binary {
                operator,
                source,
                destination,
            } => write!(f, "{operator} {source}, {destination}"),
            x86::Instruction::Negq(operand) => write!(f, "negq {operand}"),
            x86::Instruction::Set {
                condition,
                destination,
            } => write!(f, "set{condition} {destination}"),
            x86::Instruction::Pushq(operand) => write!(f, "pushq {operand}"),
            x86::Instruction::Popq(operand) => write!(f, "popq {operand}"),
            x86::Instruction::Callq { label, .. } => write!(f, "callq {label}"),
            x86::Instruction::IndirectCallq { target, .. } => write!(f, "callq *{target}"),
            x86::Instruction::TailJmp { target, .. } => write!(f, "tailjmp {target}"),
            x86::Instruction::Jmp(label) => write!(f, "jmp {label}"),
            x86::Instruction::JmpIf { condition, label } => write!(f, "j{condition} {label}"),
            x86::Instruction::IndirectJmp(target) => write!(f, "jmp *{target}"),
            x86::Instruction::Retq => write!(f, "retq"),
            x86::Instruction::Comment(text) => write!(f, "# {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        assemblers::x86_64::X86FullRegister,
        x86::{ConditionCode, Instruction, Operand},
    };

    #[test]
    fn att_syntax() {
        let cases = [
            (
                Instruction::movq(
                    Operand::Immediate(42),
                    Operand::Deref(X86FullRegister::Rbp, -8),
                ),
                "movq $42, -8(%rbp)",
            ),
            (
                Instruction::leaq(
                    Operand::GlobalValue("f".into()),
                    Operand::Register(X86FullRegister::Rax),
                ),
                "leaq f(%rip), %rax",
            ),
            (
                Instruction::Set {
                    condition: ConditionCode::Le,
                    destination: Operand::ByteRegister(X86FullRegister::Rax.as_8_bit()),
                },
                "setle %al",
            ),
            (
                Instruction::IndirectCallq {
                    target: Operand::Register(X86FullRegister::Rax),
                    arguments: vec![],
                },
                "callq *%rax",
            ),
            (
                Instruction::JmpIf {
                    condition: ConditionCode::Ne,
                    label: "block.4".into(),
                },
                "jne block.4",
            ),
            (
                Instruction::Binary {
                    operator: x86::BinaryOperator::Movzbq,
                    source: Operand::ByteRegister(X86FullRegister::Rax.as_8_bit()),
                    destination: Operand::Register(X86FullRegister::Rcx),
                },
                "movzbq %al, %rcx",
            ),
        ];

        for (instruction, expected) in cases {
            assert_eq!(instruction.to_string(), expected);
        }
    }
}

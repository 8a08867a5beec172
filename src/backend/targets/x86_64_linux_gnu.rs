use itertools::Itertools;

use crate::{
    backend::{assemblers::x86_64::Assembler, targets::CodeGenerator, x86},
    middle::type_check::main_symbol,
};

pub struct CodeGeneratorX86_64LinuxGnu;

impl CodeGenerator for CodeGeneratorX86_64LinuxGnu {
    fn translate_to_asm(&self, program: &x86::Program) -> String {
        let function_bodies = program.functions.iter().map(codegen_function).join("\n");

        format!(
            indoc::indoc! {r#"
                  .text
                {0}"#
            },
            function_bodies
        )
    }
}

fn codegen_function(function: &x86::FunctionDefinition) -> String {
    let mut assembler = Assembler::new();

    // only the entry point is visible to the runtime
    if function.name == main_symbol() {
        assembler.global_label(function.name.value());
    }

    for block in &function.blocks {
        assembler.block(block);
    }

    assembler.into_output()
}

#[cfg(test)]
mod tests {
    use hashbrown::HashMap;

    use super::*;
    use crate::backend::{
        assemblers::x86_64::X86FullRegister,
        targets::Target,
        x86::{Block, Frame, Instruction, Operand},
    };

    fn function(name: &str, instructions: Vec<Instruction>) -> x86::FunctionDefinition {
        x86::FunctionDefinition {
            name: name.into(),
            blocks: vec![Block {
                label: name.into(),
                instructions,
            }],
            variable_types: HashMap::new(),
            frame: Frame::default(),
        }
    }

    #[test]
    fn emits_att_text_with_a_global_main() {
        let program = x86::Program {
            functions: vec![
                function("f", vec![Instruction::Retq]),
                function(
                    "main",
                    vec![
                        Instruction::Comment("entry".into()),
                        Instruction::movq(
                            Operand::Immediate(0),
                            Operand::Register(X86FullRegister::Rax),
                        ),
                        Instruction::Retq,
                    ],
                ),
            ],
        };

        let asm = Target::x86_64LinuxGnu
            .get_code_generator()
            .translate_to_asm(&program);

        assert_eq!(
            asm,
            indoc::indoc! {"
                  .text
                f:
                  retq

                  .globl main
                main:
                  # entry
                  movq $0, %rax
                  retq
            "}
        );
    }
}

use crate::backend::x86;

mod x86_64_linux_gnu;

pub trait CodeGenerator {
    /// Renders a fully lowered program as assembly text
    fn translate_to_asm(&self, program: &x86::Program) -> String;
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    x86_64LinuxGnu,
}

impl Target {
    pub fn get_code_generator(self) -> impl CodeGenerator {
        match self {
            Target::x86_64LinuxGnu => x86_64_linux_gnu::CodeGeneratorX86_64LinuxGnu,
        }
    }
}

use crate::backend::x86;

/// Writes AT&T syntax assembly one line at a time
#[derive(Debug, Default)]
pub struct Assembler {
    output: String,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_output(self) -> String {
        self.output
    }

    fn push_line(&mut self, string: impl AsRef<str>) {
        self.output.push_str(string.as_ref());
        self.output.push('\n');
    }

    pub fn emit(&mut self, string: impl AsRef<str>) {
        self.output.push_str("  ");
        self.push_line(string);
    }

    pub fn global_label(&mut self, name: &str) {
        self.emit(format!(".globl {name}"));
    }

    pub fn label(&mut self, name: impl AsRef<str>) {
        self.push_line(format!("{}:", name.as_ref()));
    }

    pub fn comment(&mut self, comment: impl AsRef<str>) {
        self.emit(format!("# {}", comment.as_ref()));
    }

    pub fn instruction(&mut self, instruction: &x86::Instruction) {
        match instruction {
            x86::Instruction::Comment(text) => self.comment(text),
            instruction => self.emit(instruction.to_string()),
        }
    }

    pub fn block(&mut self, block: &x86::Block) {
        self.label(block.label.value());

        for instruction in &block.instructions {
            self.instruction(instruction);
        }
    }
}

/// General Purpose Register 64-bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum X86FullRegister {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl X86FullRegister {
    /// Registers the System V ABI lets a callee clobber
    pub const CALLER_SAVED: &[X86FullRegister] = &[
        Self::Rax,
        Self::Rcx,
        Self::Rdx,
        Self::Rsi,
        Self::Rdi,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
    ];

    /// Registers the System V ABI requires a callee to preserve
    pub const CALLEE_SAVED: &[X86FullRegister] = &[
        Self::Rbx,
        Self::Rbp,
        Self::R12,
        Self::R13,
        Self::R14,
        Self::R15,
    ];

    /// Registers the runtime functions take their arguments in
    pub const RUNTIME_ARGUMENTS: &[X86FullRegister] = &[Self::Rdi, Self::Rsi];

    /// Position in a register file laid out in declaration order
    pub fn number(self) -> usize {
        self as usize
    }

    pub fn as_8_bit(self) -> X86Register {
        match self {
            Self::Rax => X86Register::Al,
            Self::Rbx => X86Register::Bl,
            Self::Rcx => X86Register::Cl,
            Self::Rdx => X86Register::Dl,
            Self::Rsi => X86Register::Sil,
            Self::Rdi => X86Register::Dil,
            Self::Rbp => X86Register::Bpl,
            Self::Rsp => X86Register::Spl,
            Self::R8 => X86Register::R8b,
            Self::R9 => X86Register::R9b,
            Self::R10 => X86Register::R10b,
            Self::R11 => X86Register::R11b,
            Self::R12 => X86Register::R12b,
            Self::R13 => X86Register::R13b,
            Self::R14 => X86Register::R14b,
            Self::R15 => X86Register::R15b,
        }
    }
}

/// Low byte of a general purpose register, as written by `set<cc>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[rustfmt::skip]
pub enum X86Register {
    Al, Bl, Cl, Dl,
    Sil, Dil, Bpl, Spl,
    R8b, R9b, R10b, R11b, R12b, R13b, R14b, R15b,
}

impl X86Register {
    /// The 64-bit register this one is a part of
    pub fn full(self) -> X86FullRegister {
        use X86FullRegister as F;

        match self {
            Self::Al => F::Rax,
            Self::Bl => F::Rbx,
            Self::Cl => F::Rcx,
            Self::Dl => F::Rdx,
            Self::Sil => F::Rsi,
            Self::Dil => F::Rdi,
            Self::Bpl => F::Rbp,
            Self::Spl => F::Rsp,
            Self::R8b => F::R8,
            Self::R9b => F::R9,
            Self::R10b => F::R10,
            Self::R11b => F::R11,
            Self::R12b => F::R12,
            Self::R13b => F::R13,
            Self::R14b => F::R14,
            Self::R15b => F::R15,
        }
    }
}

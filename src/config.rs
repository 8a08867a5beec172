//! Knobs which every pass reads but none of them modify.

use hashbrown::HashSet;
use itertools::Itertools;

use crate::{
    backend::assemblers::x86_64::X86FullRegister,
    error::{CompileError, CompileResult},
};

/// Registers the backend uses for its own purposes. None of them may ever be
/// handed out by the register allocator.
///
/// - `rax` is the patcher's scratch register and holds return values
/// - `r11` is used to address tuple fields
/// - `r15` points at the top of the root stack
/// - `rsp` and `rbp` manage the call stack
pub const RESERVED_REGISTERS: &[X86FullRegister] = &[
    X86FullRegister::Rax,
    X86FullRegister::R11,
    X86FullRegister::R15,
    X86FullRegister::Rsp,
    X86FullRegister::Rbp,
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Allocatable registers which a callee may clobber, in allocation order
    pub caller_saved_registers: Vec<X86FullRegister>,
    /// Allocatable registers which a callee must restore, in allocation order
    pub callee_saved_registers: Vec<X86FullRegister>,
    /// Registers used to pass the leading arguments of a call
    pub parameter_registers: Vec<X86FullRegister>,
    /// Bytes requested for the root stack when `main` calls `initialize`
    pub root_stack_size: usize,
    /// Bytes requested for the heap when `main` calls `initialize`
    pub heap_size: usize,
    /// Interleave every selected statement with a comment holding its source
    pub emit_comments: bool,
    /// Log the program after every pass at debug level
    pub log_passes: bool,
}

impl Default for Config {
    fn default() -> Self {
        use X86FullRegister::*;

        Self {
            caller_saved_registers: vec![Rdx, Rcx, Rsi, Rdi, R8, R9, R10],
            callee_saved_registers: vec![Rbx, R12, R13, R14],
            parameter_registers: vec![Rdi, Rsi, Rdx, Rcx, R8, R9],
            root_stack_size: 1 << 14,
            heap_size: 1 << 4,
            emit_comments: false,
            log_passes: false,
        }
    }
}

impl Config {
    /// The full register table in color order: caller-saved first, then
    /// callee-saved. Color `i < R` means `allocatable_registers()[i]`.
    pub fn allocatable_registers(&self) -> Vec<X86FullRegister> {
        self.caller_saved_registers
            .iter()
            .chain(&self.callee_saved_registers)
            .copied()
            .collect()
    }

    pub fn is_caller_saved(&self, register: X86FullRegister) -> bool {
        self.caller_saved_registers.contains(&register)
    }

    pub fn is_callee_saved(&self, register: X86FullRegister) -> bool {
        self.callee_saved_registers.contains(&register)
    }

    pub fn validate(&self) -> CompileResult<()> {
        let invalid = |reason: String| Err(CompileError::InvalidConfiguration { reason });

        let allocatable = self.allocatable_registers();

        if allocatable.is_empty() {
            return invalid("at least one allocatable register is required".into());
        }

        if let Some(reserved) = allocatable.iter().find(|r| RESERVED_REGISTERS.contains(r)) {
            return invalid(format!("`{reserved}` is reserved and cannot be allocated"));
        }

        if let Some(register) = self
            .caller_saved_registers
            .iter()
            .find(|r| !X86FullRegister::CALLER_SAVED.contains(r))
        {
            return invalid(format!("`{register}` is not caller-saved in the System V ABI"));
        }

        if let Some(register) = self
            .callee_saved_registers
            .iter()
            .find(|r| !X86FullRegister::CALLEE_SAVED.contains(r))
        {
            return invalid(format!("`{register}` is not callee-saved in the System V ABI"));
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = allocatable.iter().find(|r| !seen.insert(**r)) {
            return invalid(format!("`{duplicate}` is listed more than once"));
        }

        if self.parameter_registers.is_empty() {
            return invalid("at least one parameter register is required".into());
        }

        if !self.parameter_registers.iter().all_unique() {
            return invalid("parameter registers must be distinct".into());
        }

        if let Some(register) = self
            .parameter_registers
            .iter()
            .find(|r| !self.is_caller_saved(**r))
        {
            return invalid(format!(
                "parameter register `{register}` must also be caller-saved"
            ));
        }

        if self.root_stack_size == 0 || self.root_stack_size % 8 != 0 {
            return invalid("the root stack size must be a positive multiple of 8".into());
        }

        if self.heap_size == 0 || self.heap_size % 8 != 0 {
            return invalid("the heap size must be a positive multiple of 8".into());
        }

        Ok(())
    }
}

//! Executes a fully lowered program on a model of the x86-64 machine and the
//! runtime it links against.
//!
//! Memory is a sparse map of 8-byte words split into regions. Touching an
//! address outside every region, or reading a stack word nothing wrote, is an
//! error rather than undefined behavior. The runtime collector is a Cheney
//! copy into a freshly mapped to-space, so a stale pointer into the old heap
//! fails loudly the next time it is used.

use hashbrown::HashMap;
use log::{debug, trace};
use thiserror::Error;

use crate::{
    backend::{
        assemblers::x86_64::{X86FullRegister, X86Register},
        select::{COLLECT, INITIALIZE, PRINT_INT},
        x86::{self, BinaryOperator, Instruction, Operand},
    },
    frontend::intern::InternedSymbol,
    middle::{
        expose_allocation::{FREE_POINTER, FROMSPACE_END, ROOTSTACK_BEGIN},
        type_check::main_symbol,
    },
};

pub const DEFAULT_STEP_LIMIT: usize = 10_000_000;

const CODE_BASE: i64 = 0x0040_0000;
const STACK_TOP: i64 = 0x7fff_0000_0000;
const STACK_SIZE: i64 = 8 << 20;
const ROOT_STACK_BASE: i64 = 0x1000_0000;
const HEAP_BASE: i64 = 0x1_0000_0000;
/// Distance between successive heaps, so running off the end of one never
/// lands in another
const HEAP_SPACING: i64 = 0x1_0000_0000;

/// Return address pushed before entering `main`. Returning to it halts.
const HALT_ADDRESS: i64 = CODE_BASE - 8;
/// Written into every caller-saved register after a runtime call
const CLOBBER: i64 = 0x5a5a_5a5a_5a5a_5a5a;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmulatorError {
    #[error("there is no `main` function")]
    MissingMain,
    #[error("jump to unknown label `{0}`")]
    UnknownLabel(InternedSymbol),
    #[error("access to unknown global `{0}`")]
    UnknownGlobal(InternedSymbol),
    #[error("address {0:#x} is not mapped")]
    UnmappedAddress(i64),
    #[error("address {0:#x} is not 8-byte aligned")]
    MisalignedAddress(i64),
    #[error("read of uninitialized stack word at {0:#x}")]
    UninitializedRead(i64),
    #[error("{0:#x} is not a code address")]
    InvalidCodeAddress(i64),
    #[error("stack pointer {rsp:#x} is not 16-byte aligned at a call to `{target}`")]
    MisalignedCall { target: String, rsp: i64 },
    #[error("`{0}` cannot be executed")]
    InvalidInstruction(String),
    #[error("`{0}` was called before `initialize`")]
    Uninitialized(&'static str),
    #[error("execution ran past the last instruction")]
    FellOffEnd,
    #[error("the program did not halt within {0} steps")]
    OutOfSteps(usize),
}

pub type EmulatorResult<T> = Result<T, EmulatorError>;

/// What a finished run observed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    /// Every value passed to `print_int`, in order
    pub output: Vec<i64>,
    /// `%rax` when `main` returned
    pub exit_code: i64,
    pub collections: usize,
    pub steps: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionKind {
    Stack,
    RootStack,
    Heap,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    start: i64,
    end: i64,
    kind: RegionKind,
}

impl Region {
    fn contains(&self, address: i64) -> bool {
        (self.start..self.end).contains(&address)
    }
}

#[derive(Debug, Default)]
struct Memory {
    words: HashMap<i64, i64>,
    regions: Vec<Region>,
}

impl Memory {
    fn map(&mut self, start: i64, end: i64, kind: RegionKind) {
        self.regions.push(Region { start, end, kind });
    }

    fn unmap(&mut self, start: i64) {
        if let Some(position) = self.regions.iter().position(|region| region.start == start) {
            let region = self.regions.remove(position);
            self.words.retain(|address, _| !region.contains(*address));
        }
    }

    fn region(&self, address: i64) -> EmulatorResult<Region> {
        if address % 8 != 0 {
            return Err(EmulatorError::MisalignedAddress(address));
        }

        self.regions
            .iter()
            .find(|region| region.contains(address))
            .copied()
            .ok_or(EmulatorError::UnmappedAddress(address))
    }

    fn load(&self, address: i64) -> EmulatorResult<i64> {
        let region = self.region(address)?;

        match self.words.get(&address) {
            Some(value) => Ok(*value),
            None if region.kind == RegionKind::Stack => Err(EmulatorError::UninitializedRead(address)),
            // the runtime hands out zeroed memory
            None => Ok(0),
        }
    }

    fn store(&mut self, address: i64, value: i64) -> EmulatorResult<()> {
        self.region(address)?;
        self.words.insert(address, value);
        Ok(())
    }
}

/// The runtime's view of the current heap
#[derive(Debug, Clone, Copy)]
struct Heap {
    start: i64,
    end: i64,
}

pub struct Emulator<'a> {
    code: Vec<&'a Instruction>,
    labels: HashMap<InternedSymbol, usize>,
    registers: [i64; 16],
    /// Operands of the last `cmpq`, as `(destination, source)`
    flags: (i64, i64),
    memory: Memory,
    globals: HashMap<InternedSymbol, i64>,
    heap: Option<Heap>,
    next_heap: i64,
    ip: usize,
    step_limit: usize,
    execution: Execution,
}

pub fn emulate(program: &x86::Program) -> EmulatorResult<Execution> {
    Emulator::new(program).run()
}

impl<'a> Emulator<'a> {
    pub fn new(program: &'a x86::Program) -> Self {
        let mut code = Vec::new();
        let mut labels = HashMap::new();

        for function in &program.functions {
            for block in &function.blocks {
                labels.insert(block.label, code.len());
                code.extend(&block.instructions);
            }
        }

        let mut memory = Memory::default();
        memory.map(STACK_TOP - STACK_SIZE, STACK_TOP, RegionKind::Stack);

        Self {
            code,
            labels,
            registers: [0; 16],
            flags: (0, 0),
            memory,
            globals: HashMap::new(),
            heap: None,
            next_heap: HEAP_BASE,
            ip: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            execution: Execution::default(),
        }
    }

    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    pub fn run(mut self) -> EmulatorResult<Execution> {
        self.ip = *self
            .labels
            .get(&main_symbol())
            .ok_or(EmulatorError::MissingMain)?;

        self.set_register(X86FullRegister::Rsp, STACK_TOP);
        self.push(HALT_ADDRESS)?;

        loop {
            if self.execution.steps >= self.step_limit {
                return Err(EmulatorError::OutOfSteps(self.step_limit));
            }
            self.execution.steps += 1;

            let instruction = *self.code.get(self.ip).ok_or(EmulatorError::FellOffEnd)?;
            self.ip += 1;

            if !self.execute(instruction)? {
                break;
            }
        }

        self.execution.exit_code = self.register(X86FullRegister::Rax);

        debug!(
            "program halted after {} steps and {} collections",
            self.execution.steps, self.execution.collections
        );

        Ok(self.execution)
    }

    fn register(&self, register: X86FullRegister) -> i64 {
        self.registers[register.number()]
    }

    fn set_register(&mut self, register: X86FullRegister, value: i64) {
        self.registers[register.number()] = value;
    }

    fn set_byte_register(&mut self, register: X86Register, value: i64) {
        let full = register.full();
        let old = self.register(full);
        self.set_register(full, (old & !0xff) | (value & 0xff));
    }

    fn push(&mut self, value: i64) -> EmulatorResult<()> {
        let rsp = self.register(X86FullRegister::Rsp) - 8;
        self.memory.store(rsp, value)?;
        self.set_register(X86FullRegister::Rsp, rsp);
        Ok(())
    }

    fn pop(&mut self) -> EmulatorResult<i64> {
        let rsp = self.register(X86FullRegister::Rsp);
        let value = self.memory.load(rsp)?;
        self.set_register(X86FullRegister::Rsp, rsp + 8);
        Ok(value)
    }

    fn global(&self, name: InternedSymbol) -> EmulatorResult<i64> {
        self.globals
            .get(&name)
            .copied()
            .ok_or(EmulatorError::UnknownGlobal(name))
    }

    fn label_address(&self, label: InternedSymbol) -> EmulatorResult<i64> {
        self.labels
            .get(&label)
            .map(|index| CODE_BASE + 8 * *index as i64)
            .ok_or(EmulatorError::UnknownLabel(label))
    }

    fn decode_address(&self, address: i64) -> EmulatorResult<usize> {
        let offset = address - CODE_BASE;

        if offset < 0 || offset % 8 != 0 || (offset / 8) as usize >= self.code.len() {
            return Err(EmulatorError::InvalidCodeAddress(address));
        }

        Ok((offset / 8) as usize)
    }

    fn jump(&mut self, label: InternedSymbol) -> EmulatorResult<()> {
        self.ip = *self
            .labels
            .get(&label)
            .ok_or(EmulatorError::UnknownLabel(label))?;
        Ok(())
    }

    fn read(&self, operand: &Operand) -> EmulatorResult<i64> {
        match operand {
            Operand::Immediate(value) => Ok(*value),
            Operand::Register(register) => Ok(self.register(*register)),
            Operand::ByteRegister(register) => Ok(self.register(register.full()) & 0xff),
            Operand::Deref(register, offset) => {
                self.memory.load(self.register(*register).wrapping_add(*offset))
            }
            Operand::GlobalValue(name) => self.global(*name),
            Operand::Variable(_) => Err(EmulatorError::InvalidInstruction(operand.to_string())),
        }
    }

    fn write(&mut self, operand: &Operand, value: i64) -> EmulatorResult<()> {
        match operand {
            Operand::Register(register) => self.set_register(*register, value),
            Operand::ByteRegister(register) => self.set_byte_register(*register, value),
            Operand::Deref(register, offset) => {
                let address = self.register(*register).wrapping_add(*offset);
                self.memory.store(address, value)?;
            }
            Operand::GlobalValue(name) => {
                self.global(*name)?;
                self.globals.insert(*name, value);
            }
            Operand::Immediate(_) | Operand::Variable(_) => {
                return Err(EmulatorError::InvalidInstruction(operand.to_string()));
            }
        }

        Ok(())
    }

    /// The address `leaq` computes
    fn effective_address(&self, operand: &Operand) -> EmulatorResult<i64> {
        match operand {
            Operand::GlobalValue(label) => self.label_address(*label),
            Operand::Deref(register, offset) => Ok(self.register(*register).wrapping_add(*offset)),
            _ => Err(EmulatorError::InvalidInstruction(format!("leaq {operand}"))),
        }
    }

    fn check_call_alignment(&self, target: impl ToString) -> EmulatorResult<()> {
        let rsp = self.register(X86FullRegister::Rsp);

        if rsp % 16 != 0 {
            return Err(EmulatorError::MisalignedCall {
                target: target.to_string(),
                rsp,
            });
        }

        Ok(())
    }

    /// Runs one instruction. Returns `false` once the program has halted.
    fn execute(&mut self, instruction: &Instruction) -> EmulatorResult<bool> {
        match instruction {
            Instruction::Binary {
                operator: BinaryOperator::Leaq,
                source,
                destination,
            } => {
                let address = self.effective_address(source)?;
                self.write(destination, address)?;
            }
            Instruction::Binary {
                operator,
                source,
                destination,
            } => {
                let value = self.read(source)?;

                let result = match operator {
                    BinaryOperator::Movq => value,
                    BinaryOperator::Movzbq => value & 0xff,
                    BinaryOperator::Cmpq => {
                        self.flags = (self.read(destination)?, value);
                        return Ok(true);
                    }
                    operator => {
                        let old = self.read(destination)?;

                        match operator {
                            BinaryOperator::Addq => old.wrapping_add(value),
                            BinaryOperator::Subq => old.wrapping_sub(value),
                            BinaryOperator::Imulq => old.wrapping_mul(value),
                            BinaryOperator::Andq => old & value,
                            BinaryOperator::Orq => old | value,
                            _ => old ^ value,
                        }
                    }
                };

                self.write(destination, result)?;
            }
            Instruction::Negq(operand) => {
                let value = self.read(operand)?;
                self.write(operand, value.wrapping_neg())?;
            }
            Instruction::Set {
                condition,
                destination,
            } => {
                let (lhs, rhs) = self.flags;
                self.write(destination, condition.holds(lhs, rhs) as i64)?;
            }
            Instruction::Pushq(operand) => {
                let value = self.read(operand)?;
                self.push(value)?;
            }
            Instruction::Popq(operand) => {
                let value = self.pop()?;
                self.write(operand, value)?;
            }
            Instruction::Callq { label, .. } => {
                self.check_call_alignment(label)?;

                match label.value() {
                    PRINT_INT | INITIALIZE | COLLECT => self.call_runtime(label.value())?,
                    _ => {
                        self.push(CODE_BASE + 8 * self.ip as i64)?;
                        self.jump(*label)?;
                    }
                }
            }
            Instruction::IndirectCallq { target, .. } => {
                self.check_call_alignment(target)?;

                let ip = self.decode_address(self.read(target)?)?;
                self.push(CODE_BASE + 8 * self.ip as i64)?;
                self.ip = ip;
            }
            Instruction::Jmp(label) => self.jump(*label)?,
            Instruction::JmpIf { condition, label } => {
                let (lhs, rhs) = self.flags;

                if condition.holds(lhs, rhs) {
                    self.jump(*label)?;
                }
            }
            Instruction::IndirectJmp(target) => {
                self.ip = self.decode_address(self.read(target)?)?;
            }
            Instruction::Retq => {
                let address = self.pop()?;

                if address == HALT_ADDRESS {
                    return Ok(false);
                }

                self.ip = self.decode_address(address)?;
            }
            Instruction::Comment(_) => {}
            Instruction::TailJmp { .. } => {
                return Err(EmulatorError::InvalidInstruction(instruction.to_string()));
            }
        }

        Ok(true)
    }

    fn call_runtime(&mut self, name: &'static str) -> EmulatorResult<()> {
        let rdi = self.register(X86FullRegister::Rdi);
        let rsi = self.register(X86FullRegister::Rsi);

        match name {
            PRINT_INT => {
                trace!("print_int({rdi})");
                self.execution.output.push(rdi);
            }
            INITIALIZE => self.initialize(rdi, rsi),
            _ => self.collect(rdi, rsi)?,
        }

        for register in X86FullRegister::CALLER_SAVED {
            self.set_register(*register, CLOBBER);
        }

        Ok(())
    }

    fn map_heap(&mut self, size: i64) -> Heap {
        let start = self.next_heap;
        self.next_heap += (size / HEAP_SPACING + 1) * HEAP_SPACING;

        self.memory.map(start, start + size, RegionKind::Heap);
        Heap {
            start,
            end: start + size,
        }
    }

    fn initialize(&mut self, root_stack_size: i64, heap_size: i64) {
        self.memory.map(
            ROOT_STACK_BASE,
            ROOT_STACK_BASE + root_stack_size,
            RegionKind::RootStack,
        );

        let heap = self.map_heap(heap_size);
        self.heap = Some(heap);

        self.globals.insert(ROOTSTACK_BEGIN.into(), ROOT_STACK_BASE);
        self.globals.insert(FREE_POINTER.into(), heap.start);
        self.globals.insert(FROMSPACE_END.into(), heap.end);
    }

    /// Copies everything reachable from the root stack below `root_stack_top`
    /// into a new heap with room for at least `bytes` more
    fn collect(&mut self, root_stack_top: i64, bytes: i64) -> EmulatorResult<()> {
        let from = self.heap.ok_or(EmulatorError::Uninitialized(COLLECT))?;
        let root_stack_begin = self.global(ROOTSTACK_BEGIN.into())?;
        let used = self.global(FREE_POINTER.into())? - from.start;

        let to = self.map_heap((from.end - from.start).max(used + bytes));
        let mut free = to.start;

        for slot in (root_stack_begin..root_stack_top).step_by(8) {
            let value = self.memory.load(slot)?;

            if from.contains(value) {
                let copied = self.copy(value, &mut free)?;
                self.memory.store(slot, copied)?;
            }
        }

        let mut scan = to.start;
        while scan < free {
            let tag = self.memory.load(scan)?;
            let (length, pointer_mask) = decode_tag(tag);

            for field in 0..length {
                if pointer_mask & (1 << field) == 0 {
                    continue;
                }

                let address = scan + 8 * (field + 1);
                let value = self.memory.load(address)?;

                if from.contains(value) {
                    let copied = self.copy(value, &mut free)?;
                    self.memory.store(address, copied)?;
                }
            }

            scan += 8 * (length + 1);
        }

        debug!(
            "collection {} kept {} of {used} bytes",
            self.execution.collections + 1,
            free - to.start
        );

        self.memory.unmap(from.start);
        self.heap = Some(to);
        self.globals.insert(FREE_POINTER.into(), free);
        self.globals.insert(FROMSPACE_END.into(), to.end);
        self.execution.collections += 1;

        Ok(())
    }

    /// Copies one tuple, leaving a forwarding pointer in place of its tag
    fn copy(&mut self, tuple: i64, free: &mut i64) -> EmulatorResult<i64> {
        let tag = self.memory.load(tuple)?;

        // tags always have bit 0 set while addresses never do
        if tag & 1 == 0 {
            return Ok(tag);
        }

        let (length, _) = decode_tag(tag);
        let copied = *free;

        for word in 0..=length {
            let value = self.memory.load(tuple + 8 * word)?;
            self.memory.store(copied + 8 * word, value)?;
        }

        *free += 8 * (length + 1);
        self.memory.store(tuple, copied)?;

        Ok(copied)
    }
}

impl Heap {
    fn contains(&self, address: i64) -> bool {
        (self.start..self.end).contains(&address)
    }
}

/// Splits a tuple tag into its length and pointer mask
fn decode_tag(tag: i64) -> (i64, i64) {
    ((tag >> 1) & 0b11_1111, tag >> 7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::x86::{Block, ConditionCode, Frame},
        middle::ty::Type,
    };

    const RAX: Operand = Operand::Register(X86FullRegister::Rax);
    const RDI: Operand = Operand::Register(X86FullRegister::Rdi);
    const RSP: Operand = Operand::Register(X86FullRegister::Rsp);

    fn program(blocks: Vec<(&str, Vec<Instruction>)>) -> x86::Program {
        x86::Program {
            functions: vec![x86::FunctionDefinition {
                name: "main".into(),
                blocks: blocks
                    .into_iter()
                    .map(|(label, instructions)| Block {
                        label: label.into(),
                        instructions,
                    })
                    .collect(),
                variable_types: HashMap::new(),
                frame: Frame::default(),
            }],
        }
    }

    fn print(value: Operand) -> [Instruction; 2] {
        [
            Instruction::movq(value, RDI),
            Instruction::Callq {
                label: PRINT_INT.into(),
                arguments: vec![X86FullRegister::Rdi],
            },
        ]
    }

    fn initialize(heap_size: i64) -> Vec<Instruction> {
        vec![
            Instruction::movq(Operand::Immediate(64), RDI),
            Instruction::movq(
                Operand::Immediate(heap_size),
                Operand::Register(X86FullRegister::Rsi),
            ),
            Instruction::Callq {
                label: INITIALIZE.into(),
                arguments: vec![],
            },
            Instruction::movq(
                Operand::GlobalValue(ROOTSTACK_BEGIN.into()),
                Operand::Register(X86FullRegister::R15),
            ),
        ]
    }

    #[test]
    fn arithmetic_and_printing() {
        let mut body = vec![
            Instruction::subq(Operand::Immediate(8), RSP),
            Instruction::movq(Operand::Immediate(40), RAX),
            Instruction::addq(Operand::Immediate(2), RAX),
        ];
        body.extend(print(RAX));
        body.push(Instruction::addq(Operand::Immediate(8), RSP));
        body.push(Instruction::movq(Operand::Immediate(0), RAX));
        body.push(Instruction::Retq);

        let execution = emulate(&program(vec![("main", body)])).unwrap();

        assert_eq!(execution.output, [42]);
        assert_eq!(execution.exit_code, 0);
    }

    #[test]
    fn runtime_calls_need_an_aligned_stack() {
        let mut body = print(Operand::Immediate(1)).to_vec();
        body.push(Instruction::Retq);

        assert!(matches!(
            emulate(&program(vec![("main", body)])),
            Err(EmulatorError::MisalignedCall { .. })
        ));
    }

    #[test]
    fn caller_saved_registers_are_clobbered() {
        let rcx = Operand::Register(X86FullRegister::Rcx);
        let rbx = Operand::Register(X86FullRegister::Rbx);

        let mut body = vec![
            Instruction::subq(Operand::Immediate(8), RSP),
            Instruction::movq(Operand::Immediate(7), rcx),
            Instruction::movq(Operand::Immediate(9), rbx),
        ];
        body.extend(print(Operand::Immediate(0)));
        body.extend(print(rbx));
        body.extend(print(rcx));
        body.push(Instruction::addq(Operand::Immediate(8), RSP));
        body.push(Instruction::Retq);

        let execution = emulate(&program(vec![("main", body)])).unwrap();

        assert_eq!(execution.output, [0, 9, CLOBBER]);
    }

    #[test]
    fn conditional_jumps_follow_the_last_comparison() {
        let mut less = vec![Instruction::subq(Operand::Immediate(8), RSP)];
        less.extend(print(Operand::Immediate(1)));
        less.push(Instruction::addq(Operand::Immediate(8), RSP));
        less.push(Instruction::Retq);

        let execution = emulate(&program(vec![
            (
                "main",
                vec![
                    Instruction::movq(Operand::Immediate(3), RAX),
                    Instruction::cmpq(Operand::Immediate(5), RAX),
                    Instruction::JmpIf {
                        condition: ConditionCode::L,
                        label: "less".into(),
                    },
                    Instruction::Retq,
                ],
            ),
            ("less", less),
        ]))
        .unwrap();

        assert_eq!(execution.output, [1]);
    }

    #[test]
    fn reading_unwritten_stack_is_an_error() {
        let body = vec![
            Instruction::movq(Operand::Deref(X86FullRegister::Rsp, -8), RAX),
            Instruction::Retq,
        ];

        assert!(matches!(
            emulate(&program(vec![("main", body)])),
            Err(EmulatorError::UninitializedRead(_))
        ));
    }

    #[test]
    fn infinite_loops_run_out_of_steps() {
        let program = program(vec![("main", vec![Instruction::Jmp("main".into())])]);

        assert_eq!(
            Emulator::new(&program).with_step_limit(100).run(),
            Err(EmulatorError::OutOfSteps(100))
        );
    }

    #[test]
    fn collection_moves_live_tuples_and_keeps_their_fields() {
        let r11 = Operand::Register(X86FullRegister::R11);
        let r15 = Operand::Register(X86FullRegister::R15);
        let free_pointer = Operand::GlobalValue(FREE_POINTER.into());

        // allocate an inner (int,) tuple, then an outer (int, (int,)) one
        // pointing at it, keep the outer on the root stack and collect
        let mut body = vec![Instruction::subq(Operand::Immediate(8), RSP)];
        body.extend(initialize(64));
        body.extend([
            Instruction::movq(free_pointer, r11),
            Instruction::addq(Operand::Immediate(16), free_pointer),
            Instruction::movq(
                Operand::Immediate(Type::tuple_tag(&[Type::Int])),
                Operand::Deref(X86FullRegister::R11, 0),
            ),
            Instruction::movq(Operand::Immediate(7), Operand::Deref(X86FullRegister::R11, 8)),
            Instruction::movq(r11, RAX),
            Instruction::movq(free_pointer, r11),
            Instruction::addq(Operand::Immediate(24), free_pointer),
            Instruction::movq(
                Operand::Immediate(Type::tuple_tag(&[Type::Int, Type::Tuple(vec![Type::Int])])),
                Operand::Deref(X86FullRegister::R11, 0),
            ),
            Instruction::movq(Operand::Immediate(5), Operand::Deref(X86FullRegister::R11, 8)),
            Instruction::movq(RAX, Operand::Deref(X86FullRegister::R11, 16)),
            Instruction::movq(r11, Operand::Deref(X86FullRegister::R15, 0)),
            Instruction::addq(Operand::Immediate(8), r15),
            Instruction::movq(r15, RDI),
            Instruction::movq(Operand::Immediate(64), Operand::Register(X86FullRegister::Rsi)),
            Instruction::Callq {
                label: COLLECT.into(),
                arguments: vec![],
            },
            Instruction::movq(Operand::Deref(X86FullRegister::R15, -8), r11),
            Instruction::movq(Operand::Deref(X86FullRegister::R11, 8), Operand::Register(X86FullRegister::Rbx)),
            Instruction::movq(Operand::Deref(X86FullRegister::R11, 16), r11),
            Instruction::movq(Operand::Deref(X86FullRegister::R11, 8), Operand::Register(X86FullRegister::R12)),
        ]);
        body.extend(print(Operand::Register(X86FullRegister::Rbx)));
        body.extend(print(Operand::Register(X86FullRegister::R12)));
        body.push(Instruction::addq(Operand::Immediate(8), RSP));
        body.push(Instruction::Retq);

        let execution = emulate(&program(vec![("main", body)])).unwrap();

        assert_eq!(execution.output, [5, 7]);
        assert_eq!(execution.collections, 1);
    }

    #[test]
    fn heap_overflow_is_detected() {
        let free_pointer = Operand::GlobalValue(FREE_POINTER.into());

        let mut body = vec![Instruction::subq(Operand::Immediate(8), RSP)];
        body.extend(initialize(16));
        body.extend([
            Instruction::movq(free_pointer, RAX),
            Instruction::movq(Operand::Immediate(1), Operand::Deref(X86FullRegister::Rax, 16)),
            Instruction::Retq,
        ]);

        assert!(matches!(
            emulate(&program(vec![("main", body)])),
            Err(EmulatorError::UnmappedAddress(_))
        ));
    }
}

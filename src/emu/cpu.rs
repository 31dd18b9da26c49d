//! The ANC16 CPU core.
//!
//! [`Cpu::step`] runs one full fetch-decode-execute cycle: fetch the
//! opcode byte at PC, look it up in the instruction table, resolve the
//! addressing mode (fetching any operand bytes), then execute. The core
//! owns the register bank and the memory bus; every memory access goes
//! through the bus, so the CPU never special-cases device addresses.

use std::fmt;

use crate::isa::{AddressingMode, InstructionDescriptor, InstructionTable, Mnemonic};

use super::bus::MemoryBus;
use super::registers::{
    ArithFlags, Register16, Register16HighLow, Register8, Status, StatusRegister,
};
use super::EmuError;

/// Where PC points after a reset, the first byte of the boot ROM.
pub const RESET_VECTOR: u16 = 0x0000;

/// Model identifier loaded into A by `cpuid`.
pub const CPU_MODEL_ID: u16 = 0xA016;

/// Execution state of the core.
///
/// `Halted` is terminal until the next [`Cpu::reset`]; `Faulted` marks an
/// unrecoverable decode error (an opcode with no table entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Halted,
    Faulted,
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Halted => "halted",
            Self::Faulted => "faulted",
        };
        write!(f, "{name}")
    }
}

/// A resolved addressing mode: either an operand value already in hand
/// (immediate or register modes) or the effective address the instruction
/// targets.
#[derive(Debug, Clone, Copy)]
enum Operand {
    None,
    Value(u16),
    Address(u16),
}

/// The CPU register file and fetch-decode-execute machinery.
pub struct Cpu {
    // General purpose
    a: Register16HighLow,
    b: Register16HighLow,
    i: Register16,
    j: Register8,

    // Special
    pc: Register16,
    sp: Register16,
    ir: Register8,
    dr: Register8,
    sr: StatusRegister,

    // Address-resolution latches
    imhi: Register16,
    imli: Register16,
    emhi: Register16,
    emli: Register16,
    ar: Register16,

    bus: MemoryBus,
    table: InstructionTable,
    state: CpuState,
    last: Option<Mnemonic>,
}

impl Cpu {
    /// Powers on a core wired to `bus`. The core comes up in the same
    /// state [`reset`][Cpu::reset] leaves it in.
    pub fn new(bus: MemoryBus) -> Self {
        let mut cpu = Self {
            a: Register16HighLow::default(),
            b: Register16HighLow::default(),
            i: Register16::default(),
            j: Register8::default(),
            pc: Register16::default(),
            sp: Register16::default(),
            ir: Register8::default(),
            dr: Register8::default(),
            sr: StatusRegister::new(),
            imhi: Register16::default(),
            imli: Register16::default(),
            emhi: Register16::default(),
            emli: Register16::default(),
            ar: Register16::default(),
            bus,
            table: InstructionTable::new(),
            state: CpuState::Running,
            last: None,
        };
        cpu.reset();
        cpu
    }

    /// Resets the CPU registers. Memory and the video framebuffer are
    /// untouched; only the register file comes back to its power-on
    /// values.
    pub fn reset(&mut self) {
        self.a.set(0);
        self.b.set(0);
        self.i.set(0);
        self.j.set(0);

        self.sp.set(0);
        self.ir.set(0);
        self.dr.set(0);
        // n o I D S 1 z c
        self.sr.set(
            (Status::INTERRUPT_DISABLE | Status::DEBUG | Status::SUPERVISOR | Status::RESERVED)
                .bits(),
        );

        self.imhi.set(0);
        self.imli.set(0);
        self.emhi.set(0);
        self.emli.set(0);
        self.ar.set(0);

        self.pc.set(RESET_VECTOR);
        self.state = CpuState::Running;
        self.last = None;
        log::debug!("cpu reset, pc={RESET_VECTOR:#06x}");
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut MemoryBus {
        &mut self.bus
    }

    /// Mnemonic decoded by the most recent step.
    pub fn current_instruction(&self) -> Option<Mnemonic> {
        self.last
    }

    /// Executes one instruction and returns its mnemonic. On a halted or
    /// faulted core this is a no-op returning `None`; callers driving a
    /// stepping loop check [`state`][Cpu::state].
    ///
    /// An unrecognized opcode faults the core with PC left past the
    /// opcode byte and no operand fetched. Other errors (privilege
    /// faults, bus and video errors) leave the core running; the
    /// offending instruction is abandoned where the error hit.
    pub fn step(&mut self) -> Result<Option<Mnemonic>, EmuError> {
        if self.state != CpuState::Running {
            return Ok(None);
        }

        let opcode_addr = self.pc.get();
        let opcode = self.bus.read(opcode_addr)?;
        self.ir.set(opcode);
        self.pc.set(opcode_addr.wrapping_add(1));

        let Some(descriptor) = self.table.lookup(opcode) else {
            self.state = CpuState::Faulted;
            return Err(EmuError::UnrecognizedOpcode {
                opcode,
                addr: opcode_addr,
            });
        };
        self.last = Some(descriptor.mnemonic);

        if descriptor.needs_privilege && !self.sr.contains(Status::SUPERVISOR) {
            return Err(EmuError::PrivilegeFault(descriptor.mnemonic));
        }

        let operand = self.resolve(descriptor.addressing)?;
        log::trace!(">>> {:#06x}: {}", opcode_addr, descriptor.mnemonic);
        self.execute(descriptor, operand)?;
        Ok(Some(descriptor.mnemonic))
    }

    /// Read-only snapshot of the register file, safe to hold across
    /// later steps.
    pub fn status(&self) -> CpuStatus {
        CpuStatus {
            a: self.a.get(),
            b: self.b.get(),
            i: self.i.get(),
            j: self.j.get(),
            pc: self.pc.get(),
            sp: self.sp.get(),
            ir: self.ir.get(),
            dr: self.dr.get(),
            sr: self.sr.get(),
            imhi: self.imhi.get(),
            imli: self.imli.get(),
            emhi: self.emhi.get(),
            emli: self.emli.get(),
            ar: self.ar.get(),
            state: self.state,
        }
    }

    fn fetch_byte(&mut self) -> Result<u8, EmuError> {
        let value = self.bus.read(self.pc.get())?;
        self.pc.set(self.pc.get().wrapping_add(1));
        Ok(value)
    }

    fn fetch_word(&mut self) -> Result<u16, EmuError> {
        let hi = self.fetch_byte()?;
        let lo = self.fetch_byte()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Latches an effective address into the resolution pair and AR.
    fn effective(&mut self, addr: u16) -> Operand {
        self.emhi.set(addr >> 8);
        self.emli.set(addr & 0x00FF);
        self.ar.set(addr);
        Operand::Address(addr)
    }

    fn resolve(&mut self, mode: AddressingMode) -> Result<Operand, EmuError> {
        match mode {
            AddressingMode::Implied => Ok(Operand::None),
            AddressingMode::Immediate => unreachable!("immediate is specialized at table build"),
            AddressingMode::Immediate1 => {
                let value = self.fetch_byte()?;
                self.imli.set(value as u16);
                Ok(Operand::Value(value as u16))
            }
            AddressingMode::Immediate2 => {
                let hi = self.fetch_byte()?;
                let lo = self.fetch_byte()?;
                self.imhi.set(hi as u16);
                self.imli.set(lo as u16);
                Ok(Operand::Value(u16::from_be_bytes([hi, lo])))
            }
            AddressingMode::Absolute => {
                let addr = self.fetch_word()?;
                Ok(self.effective(addr))
            }
            AddressingMode::AbsoluteIndexed => {
                let addr = self.fetch_word()?.wrapping_add(self.i.get());
                Ok(self.effective(addr))
            }
            AddressingMode::ZeroPage => {
                let addr = self.fetch_byte()? as u16;
                Ok(self.effective(addr))
            }
            AddressingMode::ZeroPageIndexed => {
                // Indexing wraps within the page.
                let addr = self.fetch_byte()?.wrapping_add(self.i.get() as u8) as u16;
                Ok(self.effective(addr))
            }
            AddressingMode::Indirect => {
                let pointer = self.fetch_word()?;
                let addr = self.bus.read_word(pointer)?;
                Ok(self.effective(addr))
            }
            AddressingMode::IndirectIndexed => {
                let pointer = self.fetch_word()?;
                let addr = self.bus.read_word(pointer)?.wrapping_add(self.i.get());
                Ok(self.effective(addr))
            }
            AddressingMode::Relative => {
                let offset = self.fetch_byte()? as i8;
                let addr = self.pc.get().wrapping_add_signed(offset as i16);
                Ok(self.effective(addr))
            }
            AddressingMode::RelativeUsingJ => {
                let offset = self.j.get() as i8;
                let addr = self.pc.get().wrapping_add_signed(offset as i16);
                Ok(self.effective(addr))
            }
            AddressingMode::AccumulatorRegister => Ok(Operand::Value(self.a.get())),
            AddressingMode::AccumulatorHighRegister => Ok(Operand::Value(self.a.high() as u16)),
            AddressingMode::AccumulatorLowRegister => Ok(Operand::Value(self.a.low() as u16)),
            AddressingMode::BaseRegister => Ok(Operand::Value(self.b.get())),
            AddressingMode::BaseHighRegister => Ok(Operand::Value(self.b.high() as u16)),
            AddressingMode::BaseLowRegister => Ok(Operand::Value(self.b.low() as u16)),
            AddressingMode::IndexRegister => Ok(Operand::Value(self.i.get())),
        }
    }

    /// The operand as a 16-bit value: immediates and register modes are
    /// already in hand, memory modes read a word at the effective address.
    fn operand_word(&self, operand: Operand) -> Result<u16, EmuError> {
        match operand {
            Operand::Value(value) => Ok(value),
            Operand::Address(addr) => self.bus.read_word(addr),
            Operand::None => unreachable!("instruction requires an operand"),
        }
    }

    fn operand_byte(&self, operand: Operand) -> Result<u8, EmuError> {
        match operand {
            Operand::Value(value) => Ok(value as u8),
            Operand::Address(addr) => self.bus.read(addr),
            Operand::None => unreachable!("instruction requires an operand"),
        }
    }

    /// The effective address of a store or jump target.
    fn target(&self, operand: Operand) -> u16 {
        match operand {
            Operand::Address(addr) => addr,
            _ => unreachable!("instruction requires an effective address"),
        }
    }

    fn record_arith<T>(&mut self, flags: &ArithFlags<T>) {
        self.sr
            .record_arith(flags.carry, flags.overflow, flags.zero, flags.negative);
    }

    fn branch(&mut self, operand: Operand, taken: bool) {
        let target = self.target(operand);
        if taken {
            self.pc.set(target);
        }
    }

    fn push_word(&mut self, value: u16) -> Result<(), EmuError> {
        let [hi, lo] = value.to_be_bytes();
        self.sp.set(self.sp.get().wrapping_sub(1));
        self.bus.write(self.sp.get(), hi)?;
        self.sp.set(self.sp.get().wrapping_sub(1));
        self.bus.write(self.sp.get(), lo)?;
        Ok(())
    }

    fn pop_word(&mut self) -> Result<u16, EmuError> {
        let lo = self.bus.read(self.sp.get())?;
        self.sp.set(self.sp.get().wrapping_add(1));
        let hi = self.bus.read(self.sp.get())?;
        self.sp.set(self.sp.get().wrapping_add(1));
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn execute(
        &mut self,
        descriptor: InstructionDescriptor,
        operand: Operand,
    ) -> Result<(), EmuError> {
        use Mnemonic::*;
        match descriptor.mnemonic {
            // Arithmetic: N, O, Z, C
            Ada => {
                let value = self.operand_word(operand)?;
                let flags = self.a.add(value);
                self.record_arith(&flags);
            }
            Adb => {
                let value = self.operand_word(operand)?;
                let flags = self.b.add(value);
                self.record_arith(&flags);
            }
            Sua => {
                let value = self.operand_word(operand)?;
                let flags = self.a.sub(value);
                self.record_arith(&flags);
            }
            Sub => {
                let value = self.operand_word(operand)?;
                let flags = self.b.sub(value);
                self.record_arith(&flags);
            }

            // Bitwise logic: N and Z only, C and O are left alone
            Ana => {
                let value = self.operand_word(operand)?;
                let flags = self.a.and(value);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Anb => {
                let value = self.operand_word(operand)?;
                let flags = self.b.and(value);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Ora => {
                let value = self.operand_word(operand)?;
                let flags = self.a.or(value);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Orb => {
                let value = self.operand_word(operand)?;
                let flags = self.b.or(value);
                self.sr.record_logic(flags.zero, flags.negative);
            }

            // Compares: subtraction flags without storing the result
            Cmpa => {
                let value = self.operand_word(operand)?;
                let mut scratch = self.a;
                let flags = scratch.sub(value);
                self.record_arith(&flags);
            }
            Cmpb => {
                let value = self.operand_word(operand)?;
                let mut scratch = self.b;
                let flags = scratch.sub(value);
                self.record_arith(&flags);
            }
            Cmpi => {
                let value = self.operand_word(operand)?;
                let mut scratch = self.i;
                let flags = scratch.sub(value);
                self.record_arith(&flags);
            }
            Cmah => {
                let value = self.operand_byte(operand)?;
                let mut scratch = self.a;
                let flags = scratch.sub_high(value);
                self.record_arith(&flags);
            }
            Cmbh => {
                let value = self.operand_byte(operand)?;
                let mut scratch = self.b;
                let flags = scratch.sub_high(value);
                self.record_arith(&flags);
            }

            // Increment / decrement: N and Z only
            Ina => {
                let flags = self.a.add(1);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Inb => {
                let flags = self.b.add(1);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Ini => {
                let flags = self.i.add(1);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Inj => {
                let flags = self.j.add(1);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Dea => {
                let flags = self.a.sub(1);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Deb => {
                let flags = self.b.sub(1);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Dei => {
                let flags = self.i.sub(1);
                self.sr.record_logic(flags.zero, flags.negative);
            }
            Dej => {
                let flags = self.j.sub(1);
                self.sr.record_logic(flags.zero, flags.negative);
            }

            // Loads; flags are untouched
            Lda => {
                let value = self.operand_word(operand)?;
                self.a.set(value);
            }
            Ldah => {
                let value = self.operand_byte(operand)?;
                self.a.set_high(value);
            }
            Ldal => {
                let value = self.operand_byte(operand)?;
                self.a.set_low(value);
            }
            Ldb => {
                let value = self.operand_word(operand)?;
                self.b.set(value);
            }
            Ldbh => {
                let value = self.operand_byte(operand)?;
                self.b.set_high(value);
            }
            Ldbl => {
                let value = self.operand_byte(operand)?;
                self.b.set_low(value);
            }
            Ldi => {
                let value = self.operand_word(operand)?;
                self.i.set(value);
            }
            Ldj => {
                let value = self.operand_byte(operand)?;
                self.j.set(value);
            }
            Ldsp => {
                let value = self.operand_word(operand)?;
                self.sp.set(value);
            }
            Lddr => {
                let value = self.operand_byte(operand)?;
                self.dr.set(value);
            }
            Ldsr => {
                let value = self.operand_byte(operand)?;
                self.sr.set(value);
            }

            // Stores
            Sta => {
                let addr = self.target(operand);
                self.bus.write_word(addr, self.a.get())?;
            }
            Stah => {
                let addr = self.target(operand);
                self.bus.write(addr, self.a.high())?;
            }
            Stb => {
                let addr = self.target(operand);
                self.bus.write_word(addr, self.b.get())?;
            }
            Stbh => {
                let addr = self.target(operand);
                self.bus.write(addr, self.b.high())?;
            }
            Sti => {
                let addr = self.target(operand);
                self.bus.write_word(addr, self.i.get())?;
            }
            Stj => {
                let addr = self.target(operand);
                self.bus.write(addr, self.j.get())?;
            }
            Stpc => {
                let addr = self.target(operand);
                self.bus.write_word(addr, self.pc.get())?;
            }
            Stsr => {
                let addr = self.target(operand);
                self.bus.write(addr, self.sr.get())?;
            }

            // Jumps
            Jmp => self.branch(operand, true),
            Jcc => self.branch(operand, !self.sr.contains(Status::CARRY)),
            Jcs => self.branch(operand, self.sr.contains(Status::CARRY)),
            Jeq => self.branch(operand, self.sr.contains(Status::ZERO)),
            Jne => self.branch(operand, !self.sr.contains(Status::ZERO)),
            Jnc => self.branch(operand, !self.sr.contains(Status::NEGATIVE)),
            Jns => self.branch(operand, self.sr.contains(Status::NEGATIVE)),
            Joc => self.branch(operand, !self.sr.contains(Status::OVERFLOW)),
            Jos => self.branch(operand, self.sr.contains(Status::OVERFLOW)),

            // Stack
            Psh => {
                let value = self.operand_word(operand)?;
                self.push_word(value)?;
            }
            Pop => {
                let value = self.pop_word()?;
                match descriptor.addressing {
                    AddressingMode::AccumulatorRegister => self.a.set(value),
                    AddressingMode::BaseRegister => self.b.set(value),
                    AddressingMode::IndexRegister => self.i.set(value),
                    _ => unreachable!("pop targets a register"),
                }
            }
            Ret => {
                let addr = self.pop_word()?;
                self.pc.set(addr);
            }

            // Register transfers
            Tab => self.b.set(self.a.get()),
            Tba => self.a.set(self.b.get()),
            Tai => self.i.set(self.a.get()),
            Tbi => self.i.set(self.b.get()),
            Tahj => self.j.set(self.a.high()),
            Tbhj => self.j.set(self.b.high()),
            Tisp => self.sp.set(self.i.get()),
            Tspb => self.b.set(self.sp.get()),
            Tadr => self.dr.set(self.a.low()),

            // Flag manipulation
            Clc => self.sr.assign(Status::CARRY, false),
            Clo => self.sr.assign(Status::OVERFLOW, false),
            Cld => self.sr.assign(Status::DEBUG, false),
            Cli => self.sr.assign(Status::INTERRUPT_DISABLE, false),
            Cls => self.sr.assign(Status::SUPERVISOR, false),
            Sed => self.sr.assign(Status::DEBUG, true),
            Sei => self.sr.assign(Status::INTERRUPT_DISABLE, true),
            Ses => self.sr.assign(Status::SUPERVISOR, true),

            // Address-resolution latches
            Limh => {
                let value = self.operand_word(operand)?;
                self.imhi.set(value);
            }
            Liml => {
                let value = self.operand_word(operand)?;
                self.imli.set(value);
            }
            Lemh => {
                let value = self.operand_word(operand)?;
                self.emhi.set(value);
            }
            Leml => {
                let value = self.operand_word(operand)?;
                self.emli.set(value);
            }
            Taimh => self.imhi.set(self.a.get()),
            Taiml => self.imli.set(self.a.get()),
            Taemh => self.emhi.set(self.a.get()),
            Taeml => self.emli.set(self.a.get()),

            // Misc
            Nop => {}
            Cpuid => self.a.set(CPU_MODEL_ID),
            Rest => self.reset(),
            Kill => {
                log::debug!("kill at {:#06x}, halting", self.pc.get());
                self.state = CpuState::Halted;
            }
        }
        Ok(())
    }
}

/// Point-in-time copy of the register file, rendered by its `Display`
/// impl as the status record shown in the debugger and watch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuStatus {
    pub a: u16,
    pub b: u16,
    pub i: u16,
    pub j: u8,
    pub pc: u16,
    pub sp: u16,
    pub ir: u8,
    pub dr: u8,
    pub sr: u8,
    pub imhi: u16,
    pub imli: u16,
    pub emhi: u16,
    pub emli: u16,
    pub ar: u16,
    pub state: CpuState,
}

impl CpuStatus {
    fn flag(&self, bit: u8, letter: char) -> char {
        if self.sr & (1 << bit) != 0 {
            letter.to_ascii_uppercase()
        } else {
            letter
        }
    }
}

impl fmt::Display for CpuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "a={:#06x}  b={:#06x}  i={:#06x}  j={:#04x}",
            self.a, self.b, self.i, self.j
        )?;
        writeln!(
            f,
            "pc={:#06x} sp={:#06x} ar={:#06x} ir={:#04x} dr={:#04x}",
            self.pc, self.sp, self.ar, self.ir, self.dr
        )?;
        writeln!(
            f,
            "imhi={:#06x} imli={:#06x} emhi={:#06x} emli={:#06x}",
            self.imhi, self.imli, self.emhi, self.emli
        )?;
        write!(
            f,
            "sr={:#010b} [{}{}{}{}{}1{}{}] state={}",
            self.sr,
            self.flag(7, 'n'),
            self.flag(6, 'o'),
            self.flag(5, 'i'),
            self.flag(4, 'd'),
            self.flag(3, 's'),
            self.flag(1, 'z'),
            self.flag(0, 'c'),
            self.state
        )
    }
}

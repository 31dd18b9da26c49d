//! Instruction-set data for the ANC16.
//!
//! The instruction set is described declaratively: every instruction owns
//! one or more opcode variants (same mnemonic, different addressing mode
//! and operand width). [`InstructionTable`] flattens that list into an
//! opcode-indexed map once at startup, so decoding a byte never rescans
//! the list.

use std::fmt;

use rustc_hash::FxHashMap;

/// All instruction mnemonics understood by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    /* Arithmetic */
    Ada,
    Adb,
    Sua,
    Sub,
    /* Bitwise logic */
    Ana,
    Anb,
    Ora,
    Orb,
    /* Compares */
    Cmpa,
    Cmpb,
    Cmpi,
    Cmah,
    Cmbh,
    /* Increment / decrement */
    Ina,
    Inb,
    Ini,
    Inj,
    Dea,
    Deb,
    Dei,
    Dej,
    /* Loads */
    Lda,
    Ldah,
    Ldal,
    Ldb,
    Ldbh,
    Ldbl,
    Ldi,
    Ldj,
    Ldsp,
    Lddr,
    Ldsr,
    /* Stores */
    Sta,
    Stah,
    Stb,
    Stbh,
    Sti,
    Stj,
    Stpc,
    Stsr,
    /* Jumps */
    Jmp,
    Jcc,
    Jcs,
    Jeq,
    Jne,
    Jnc,
    Jns,
    Joc,
    Jos,
    /* Stack */
    Psh,
    Pop,
    Ret,
    /* Register transfers */
    Tab,
    Tba,
    Tai,
    Tbi,
    Tahj,
    Tbhj,
    Tisp,
    Tspb,
    Tadr,
    /* Flag manipulation */
    Clc,
    Clo,
    Cld,
    Cli,
    Cls,
    Sed,
    Sei,
    Ses,
    /* Memory table latches */
    Limh,
    Liml,
    Lemh,
    Leml,
    Taimh,
    Taiml,
    Taemh,
    Taeml,
    /* Misc */
    Nop,
    Cpuid,
    Rest,
    Kill,
}

impl Mnemonic {
    /// True for the conditional and unconditional jump family (`j*`).
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jmp
                | Self::Jcc
                | Self::Jcs
                | Self::Jeq
                | Self::Jne
                | Self::Jnc
                | Self::Jns
                | Self::Joc
                | Self::Jos
        )
    }

    /// True for the subroutine return instruction.
    pub fn is_return(self) -> bool {
        self == Self::Ret
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{self:?}").to_ascii_lowercase())
    }
}

/// How an instruction locates its operand.
///
/// `Immediate` only ever appears in the declarative instruction list; table
/// construction rewrites it to [`Immediate1`][AddressingMode::Immediate1] or
/// [`Immediate2`][AddressingMode::Immediate2] from the variant's declared
/// operand byte count, so descriptors handed to the CPU always carry an
/// unambiguous operand length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    Implied,
    Immediate,
    Immediate1,
    Immediate2,
    Absolute,
    AbsoluteIndexed,
    ZeroPage,
    ZeroPageIndexed,
    Indirect,
    IndirectIndexed,
    Relative,
    RelativeUsingJ,
    AccumulatorRegister,
    AccumulatorHighRegister,
    AccumulatorLowRegister,
    BaseRegister,
    BaseHighRegister,
    BaseLowRegister,
    IndexRegister,
}

/// Everything the CPU needs to know about one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionDescriptor {
    pub mnemonic: Mnemonic,
    pub addressing: AddressingMode,
    pub operand_bytes: u8,
    pub needs_privilege: bool,
}

/// One instruction in the declarative list: a mnemonic, its privilege
/// requirement, and its `(opcode, addressing mode, operand bytes)` variants.
struct InstructionDef {
    mnemonic: Mnemonic,
    needs_privilege: bool,
    variants: &'static [(u8, AddressingMode, u8)],
}

use AddressingMode::*;
use Mnemonic::*;

macro_rules! def {
    ($mnemonic:ident, $priv:expr, $($variant:expr),+ $(,)?) => {
        InstructionDef {
            mnemonic: $mnemonic,
            needs_privilege: $priv,
            variants: &[$($variant),+],
        }
    };
}

/// The ANC16 instruction set. Opcodes are grouped by function; 0x00 is
/// deliberately unassigned and always decodes as an unrecognized opcode.
static INSTRUCTIONS: &[InstructionDef] = &[
    // Arithmetic
    def!(
        Ada,
        false,
        (0x01, Immediate, 2),
        (0x02, Absolute, 2),
        (0x03, AbsoluteIndexed, 2),
        (0x04, ZeroPage, 1),
        (0x05, BaseRegister, 0),
    ),
    def!(
        Adb,
        false,
        (0x06, Immediate, 2),
        (0x07, Absolute, 2),
        (0x08, ZeroPage, 1),
        (0x09, AccumulatorRegister, 0),
    ),
    def!(
        Sua,
        false,
        (0x0A, Immediate, 2),
        (0x0B, Absolute, 2),
        (0x0C, ZeroPage, 1),
        (0x0D, BaseRegister, 0),
    ),
    def!(
        Sub,
        false,
        (0x0E, Immediate, 2),
        (0x0F, Absolute, 2),
        (0x10, AccumulatorRegister, 0),
    ),
    // Bitwise logic
    def!(
        Ana,
        false,
        (0x11, Immediate, 2),
        (0x12, Absolute, 2),
        (0x13, BaseRegister, 0),
    ),
    def!(Anb, false, (0x14, Immediate, 2), (0x15, AccumulatorRegister, 0)),
    def!(
        Ora,
        false,
        (0x16, Immediate, 2),
        (0x17, Absolute, 2),
        (0x18, BaseRegister, 0),
    ),
    def!(Orb, false, (0x19, Immediate, 2), (0x1A, AccumulatorRegister, 0)),
    // Compares
    def!(Cmpa, false, (0x1B, Immediate, 2), (0x1C, Absolute, 2)),
    def!(Cmpb, false, (0x1D, Immediate, 2), (0x1E, Absolute, 2)),
    def!(Cmpi, false, (0x1F, Immediate, 2)),
    def!(Cmah, false, (0x20, Immediate, 1)),
    def!(Cmbh, false, (0x21, Immediate, 1)),
    // Increment / decrement
    def!(Ina, false, (0x22, Implied, 0)),
    def!(Inb, false, (0x23, Implied, 0)),
    def!(Ini, false, (0x24, Implied, 0)),
    def!(Inj, false, (0x25, Implied, 0)),
    def!(Dea, false, (0x26, Implied, 0)),
    def!(Deb, false, (0x27, Implied, 0)),
    def!(Dei, false, (0x28, Implied, 0)),
    def!(Dej, false, (0x29, Implied, 0)),
    // Loads
    def!(
        Lda,
        false,
        (0x30, Immediate, 2),
        (0x31, Absolute, 2),
        (0x32, AbsoluteIndexed, 2),
        (0x33, ZeroPage, 1),
        (0x34, Indirect, 2),
        (0x35, IndirectIndexed, 2),
    ),
    def!(Ldah, false, (0x36, Immediate, 1), (0x37, Absolute, 2)),
    def!(Ldal, false, (0x38, Immediate, 1), (0x39, Absolute, 2)),
    def!(Ldb, false, (0x3A, Immediate, 2), (0x3B, Absolute, 2)),
    def!(Ldbh, false, (0x3C, Immediate, 1)),
    def!(Ldbl, false, (0x3D, Immediate, 1)),
    def!(Ldi, false, (0x3E, Immediate, 2), (0x3F, Absolute, 2)),
    def!(Ldj, false, (0x40, Immediate, 1)),
    def!(Ldsp, false, (0x41, Immediate, 2), (0x42, Absolute, 2)),
    def!(Lddr, true, (0x43, Immediate, 1)),
    def!(Ldsr, false, (0x44, Immediate, 1)),
    // Stores
    def!(
        Sta,
        false,
        (0x45, Absolute, 2),
        (0x46, AbsoluteIndexed, 2),
        (0x47, ZeroPage, 1),
    ),
    def!(Stah, false, (0x48, Absolute, 2)),
    def!(Stb, false, (0x49, Absolute, 2)),
    def!(Stbh, false, (0x4A, Absolute, 2)),
    def!(Sti, false, (0x4B, Absolute, 2)),
    def!(Stj, false, (0x4C, Absolute, 2)),
    def!(Stpc, false, (0x4D, Absolute, 2)),
    def!(Stsr, false, (0x4E, Absolute, 2)),
    // Jumps
    def!(
        Jmp,
        false,
        (0x60, Absolute, 2),
        (0x61, Relative, 1),
        (0x62, Indirect, 2),
        (0x63, RelativeUsingJ, 0),
    ),
    def!(Jcc, false, (0x64, Absolute, 2), (0x65, Relative, 1)),
    def!(Jcs, false, (0x66, Absolute, 2), (0x67, Relative, 1)),
    def!(Jeq, false, (0x68, Absolute, 2), (0x69, Relative, 1)),
    def!(Jne, false, (0x6A, Absolute, 2), (0x6B, Relative, 1)),
    def!(Jns, false, (0x6C, Absolute, 2), (0x6D, Relative, 1)),
    def!(Jnc, false, (0x6E, Absolute, 2), (0x6F, Relative, 1)),
    def!(Joc, false, (0x70, Absolute, 2), (0x71, Relative, 1)),
    def!(Jos, false, (0x72, Absolute, 2), (0x73, Relative, 1)),
    // Stack
    def!(
        Psh,
        false,
        (0x80, AccumulatorRegister, 0),
        (0x81, BaseRegister, 0),
        (0x82, IndexRegister, 0),
        (0x83, Immediate, 2),
    ),
    def!(
        Pop,
        false,
        (0x84, AccumulatorRegister, 0),
        (0x85, BaseRegister, 0),
        (0x86, IndexRegister, 0),
    ),
    def!(Ret, false, (0x87, Implied, 0)),
    // Register transfers
    def!(Tab, false, (0x90, Implied, 0)),
    def!(Tba, false, (0x91, Implied, 0)),
    def!(Tai, false, (0x92, Implied, 0)),
    def!(Tbi, false, (0x93, Implied, 0)),
    def!(Tahj, false, (0x94, Implied, 0)),
    def!(Tbhj, false, (0x95, Implied, 0)),
    def!(Tisp, false, (0x96, Implied, 0)),
    def!(Tspb, false, (0x97, Implied, 0)),
    def!(Tadr, true, (0x98, Implied, 0)),
    // Flag manipulation
    def!(Clc, false, (0xA0, Implied, 0)),
    def!(Clo, false, (0xA1, Implied, 0)),
    def!(Cld, true, (0xA2, Implied, 0)),
    def!(Cli, true, (0xA3, Implied, 0)),
    def!(Cls, true, (0xA4, Implied, 0)),
    def!(Sed, true, (0xA5, Implied, 0)),
    def!(Sei, true, (0xA6, Implied, 0)),
    def!(Ses, true, (0xA7, Implied, 0)),
    // Memory table latches
    def!(Limh, true, (0xB0, Immediate, 2)),
    def!(Liml, true, (0xB1, Immediate, 2)),
    def!(Lemh, true, (0xB2, Immediate, 2)),
    def!(Leml, true, (0xB3, Immediate, 2)),
    def!(Taimh, true, (0xB4, Implied, 0)),
    def!(Taiml, true, (0xB5, Implied, 0)),
    def!(Taemh, true, (0xB6, Implied, 0)),
    def!(Taeml, true, (0xB7, Implied, 0)),
    // Misc
    def!(Nop, false, (0xEA, Implied, 0)),
    def!(Cpuid, false, (0xF1, Implied, 0)),
    def!(Rest, true, (0xF2, Implied, 0)),
    def!(Kill, true, (0xFF, Implied, 0)),
];

/// Opcode-indexed view of [`INSTRUCTIONS`], built once at startup.
pub struct InstructionTable {
    by_opcode: FxHashMap<u8, InstructionDescriptor>,
}

impl InstructionTable {
    pub fn new() -> Self {
        let mut by_opcode = FxHashMap::default();
        for def in INSTRUCTIONS {
            for &(opcode, addressing, operand_bytes) in def.variants {
                let addressing = specialize(addressing, operand_bytes);
                let prev = by_opcode.insert(
                    opcode,
                    InstructionDescriptor {
                        mnemonic: def.mnemonic,
                        addressing,
                        operand_bytes,
                        needs_privilege: def.needs_privilege,
                    },
                );
                debug_assert!(prev.is_none(), "duplicate opcode {opcode:#04x}");
            }
        }
        Self { by_opcode }
    }

    /// Looks up the descriptor for a raw opcode byte. `None` means the
    /// opcode has no ISA entry.
    pub fn lookup(&self, opcode: u8) -> Option<InstructionDescriptor> {
        self.by_opcode.get(&opcode).copied()
    }

    /// Number of assigned opcodes.
    pub fn len(&self) -> usize {
        self.by_opcode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_opcode.is_empty()
    }
}

impl Default for InstructionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrites the declarative `Immediate` mode into its width-tagged variant.
fn specialize(addressing: AddressingMode, operand_bytes: u8) -> AddressingMode {
    match (addressing, operand_bytes) {
        (Immediate, 1) => Immediate1,
        (Immediate, 2) => Immediate2,
        (Immediate, n) => unreachable!("immediate variant with {n} operand bytes"),
        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashSet;

    use super::*;

    #[test]
    fn test_opcodes_unique() {
        let mut seen = FxHashSet::default();
        for def in INSTRUCTIONS {
            for &(opcode, _, _) in def.variants {
                assert!(
                    seen.insert(opcode),
                    "opcode {opcode:#04x} assigned twice ({:?})",
                    def.mnemonic
                );
            }
        }
    }

    #[test]
    fn test_lookup_total_over_declared_set() {
        let table = InstructionTable::new();
        let mut declared = 0;
        for def in INSTRUCTIONS {
            for &(opcode, _, _) in def.variants {
                let descriptor = table.lookup(opcode).expect("declared opcode must decode");
                assert_eq!(descriptor.mnemonic, def.mnemonic);
                assert_eq!(descriptor.needs_privilege, def.needs_privilege);
                declared += 1;
            }
        }
        assert_eq!(table.len(), declared);
    }

    #[test]
    fn test_immediate_specialized_to_declared_width() {
        let table = InstructionTable::new();
        for def in INSTRUCTIONS {
            for &(opcode, _, _) in def.variants {
                let descriptor = table.lookup(opcode).unwrap();
                match descriptor.addressing {
                    AddressingMode::Immediate => {
                        panic!("unspecialized immediate for {}", descriptor.mnemonic)
                    }
                    AddressingMode::Immediate1 => assert_eq!(descriptor.operand_bytes, 1),
                    AddressingMode::Immediate2 => assert_eq!(descriptor.operand_bytes, 2),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_unassigned_opcodes_miss() {
        let table = InstructionTable::new();
        assert_eq!(table.lookup(0x00), None);
        assert_eq!(table.lookup(0xFE), None);
    }

    #[test]
    fn test_privileged_set() {
        let table = InstructionTable::new();
        // kill is privileged, nop is not
        assert!(table.lookup(0xFF).unwrap().needs_privilege);
        assert!(!table.lookup(0xEA).unwrap().needs_privilege);
    }

    #[test]
    fn test_mnemonic_display_and_families() {
        assert_eq!(Mnemonic::Jeq.to_string(), "jeq");
        assert_eq!(Mnemonic::Taimh.to_string(), "taimh");
        assert!(Mnemonic::Jmp.is_jump());
        assert!(Mnemonic::Jos.is_jump());
        assert!(!Mnemonic::Ret.is_jump());
        assert!(Mnemonic::Ret.is_return());
    }
}

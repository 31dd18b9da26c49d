//! The emulator module for the ANC16.

use thiserror::Error;

use crate::isa::Mnemonic;

pub mod bus;
pub mod cpu;
pub mod debugger;
pub mod emulator;
pub mod registers;
pub mod video;

use bus::Region;
use video::VideoMode;

/// Errors surfaced by the emulator core.
#[derive(Debug, Error)]
pub enum EmuError {
    #[error("unrecognized opcode {opcode:#04x} at {addr:#06x}")]
    UnrecognizedOpcode { opcode: u8, addr: u16 },
    #[error("privileged instruction {0} executed with supervisor flag clear")]
    PrivilegeFault(Mnemonic),
    #[error("video mode {0} is not implemented")]
    UnimplementedMode(VideoMode),
    #[error("video mode {0} is not readable")]
    UnreadableMode(VideoMode),
    #[error("coordinates ({x}, {y}) fall outside the raster")]
    OutOfBoundsCoordinate { x: u8, y: u8 },
    #[error("write to read-only region {region} at {addr:#06x}")]
    ReadOnlyRegionWrite { region: Region, addr: u16 },
    #[error("{region} image is {len} bytes, region holds {cap}")]
    ImageTooLarge {
        region: Region,
        len: usize,
        cap: usize,
    },
}

impl EmuError {
    /// Errors that end the current stepping run. Everything else is
    /// reported by the debugger and the prompt comes back.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnrecognizedOpcode { .. })
    }
}

/// How the emulator should run after power-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Free-run until halt.
    #[default]
    Run,
    /// Enter the interactive debugger.
    Debug,
    /// Free-run, printing the CPU status record every step.
    Watch,
}

/// Options handed down from the argument layer.
#[derive(Debug, Clone, Default)]
pub struct EmulatorOptions {
    pub mode: RunMode,
    pub video: bool,
    pub audio: bool,
    pub card: Option<Vec<u8>>,
}

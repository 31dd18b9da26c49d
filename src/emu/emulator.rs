//! The top-level emulation context: bus wiring, image loading, the
//! display refresh driver's lifecycle, and the stepping loops shared by
//! the run modes and the debugger.

use anyhow::Result;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;

use crate::isa::Mnemonic;

use super::bus::MemoryBus;
use super::cpu::{Cpu, CpuState};
use super::debugger::Debugger;
use super::video::{RefreshDriver, REFRESH_PERIOD};
use super::{EmuError, EmulatorOptions, RunMode};

/// Why a stepping loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The stop predicate matched this mnemonic.
    Stopped(Mnemonic),
    /// The core reached its terminal halt state (`kill`).
    Halted,
    /// The core faulted on an unrecognized opcode in an earlier step.
    Faulted,
    /// Ctrl-C interrupted the loop.
    Interrupted,
}

/// The main emulation context for the ANC16.
pub struct Emulator {
    cpu: Cpu,
    options: EmulatorOptions,
    refresh: Option<RefreshDriver>,
    frames: Option<watch::Receiver<Vec<u8>>>,
    rt: Runtime,
}

impl Emulator {
    /// Wires up the machine: loads the ROM images, inserts the cartridge
    /// when one was supplied, powers on the CPU, and starts the display
    /// refresh driver if video output is enabled.
    pub fn new(options: EmulatorOptions, os_rom: &[u8], char_map: &[u8]) -> Result<Self> {
        let mut bus = MemoryBus::new();
        bus.load_boot_rom(os_rom)?;
        bus.load_char_map(char_map)?;
        if let Some(card) = &options.card {
            bus.load_cartridge(card)?;
        }
        let cpu = Cpu::new(bus);

        let rt = Builder::new_current_thread().enable_all().build()?;

        let (refresh, frames) = if options.video {
            let (driver, frames) =
                RefreshDriver::spawn(cpu.bus().video().framebuffer(), REFRESH_PERIOD)?;
            (Some(driver), Some(frames))
        } else {
            (None, None)
        };
        if options.audio {
            log::debug!("audio output requested, but no backend is attached");
        }

        Ok(Self {
            cpu,
            options,
            refresh,
            frames,
            rt,
        })
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Framebuffer snapshot channel for an external rendering surface.
    /// `None` when video output is disabled.
    pub fn frames(&self) -> Option<watch::Receiver<Vec<u8>>> {
        self.frames.clone()
    }

    /// Runs the machine in the mode the options selected.
    pub fn run(&mut self) -> Result<()> {
        match self.options.mode {
            RunMode::Debug => Debugger::new(self).repl(),
            RunMode::Run => {
                let outcome = self.step_until(|_| false, |_, _| {})?;
                log::info!("run ended: {outcome:?}");
                Ok(())
            }
            RunMode::Watch => {
                let outcome = self.step_until(|_| false, |cpu, _| println!("{}\n", cpu.status()))?;
                log::info!("watch ended: {outcome:?}");
                Ok(())
            }
        }
    }

    /// One instruction, as the debugger's `ni` issues it.
    pub fn step_one(&mut self) -> Result<Option<Mnemonic>, EmuError> {
        self.cpu.step()
    }

    /// Steps the CPU until `stop` matches the decoded mnemonic, the core
    /// halts or faults, or Ctrl-C arrives. `on_step` observes every
    /// completed step.
    ///
    /// The loop yields to the runtime between steps so the Ctrl-C signal
    /// is a real cancellation point; it never free-runs unbounded with no
    /// way to interrupt it.
    pub fn step_until(
        &mut self,
        stop: impl Fn(Mnemonic) -> bool,
        mut on_step: impl FnMut(&Cpu, Mnemonic),
    ) -> Result<StepOutcome, EmuError> {
        let Self { cpu, rt, .. } = self;
        rt.block_on(async {
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            loop {
                match cpu.state() {
                    CpuState::Running => {}
                    CpuState::Halted => break Ok(StepOutcome::Halted),
                    CpuState::Faulted => break Ok(StepOutcome::Faulted),
                }
                let Some(mnemonic) = cpu.step()? else {
                    continue;
                };
                on_step(cpu, mnemonic);
                if stop(mnemonic) {
                    break Ok(StepOutcome::Stopped(mnemonic));
                }
                tokio::select! {
                    biased;
                    _ = &mut ctrl_c => break Ok(StepOutcome::Interrupted),
                    _ = tokio::task::yield_now() => {}
                }
            }
        })
    }

    /// Stops the display refresh driver. Also happens on drop.
    pub fn shutdown(&mut self) {
        if let Some(mut driver) = self.refresh.take() {
            driver.stop();
        }
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator_with_program(program: &[u8]) -> Emulator {
        let options = EmulatorOptions {
            mode: RunMode::Run,
            video: false,
            audio: false,
            card: None,
        };
        Emulator::new(options, program, &[]).unwrap()
    }

    #[test]
    fn test_step_until_jump_predicate() {
        // ldi, ada, jeq: the loop must step exactly three times and stop
        // right after the jump decodes
        let mut emu = emulator_with_program(&[
            0x3E, 0x00, 0x05, // ldi #5
            0x01, 0x00, 0x00, // ada #0 -> zero set
            0x68, 0x00, 0x00, // jeq 0x0000
        ]);
        let mut steps = 0;
        let outcome = emu
            .step_until(Mnemonic::is_jump, |_, _| steps += 1)
            .unwrap();
        assert_eq!(outcome, StepOutcome::Stopped(Mnemonic::Jeq));
        assert_eq!(steps, 3);
        assert_eq!(emu.cpu().status().pc, 0x0000, "jeq was taken");
    }

    #[test]
    fn test_step_until_return_predicate() {
        let mut emu = emulator_with_program(&[
            0x41, 0x80, 0x00, // ldsp #0x8000
            0x83, 0x12, 0x34, // psh #0x1234
            0x87, // ret
        ]);
        let outcome = emu.step_until(Mnemonic::is_return, |_, _| {}).unwrap();
        assert_eq!(outcome, StepOutcome::Stopped(Mnemonic::Ret));
        assert_eq!(emu.cpu().status().pc, 0x1234);
    }

    #[test]
    fn test_free_run_stops_on_halt() {
        let mut emu = emulator_with_program(&[
            0xEA, // nop
            0xEA, // nop
            0xFF, // kill
        ]);
        let mut steps = 0;
        let outcome = emu.step_until(|_| false, |_, _| steps += 1).unwrap();
        assert_eq!(outcome, StepOutcome::Halted);
        assert_eq!(steps, 3);
        // a second run reports the halt without stepping
        let outcome = emu.step_until(|_| false, |_, _| panic!("no step")).unwrap();
        assert_eq!(outcome, StepOutcome::Halted);
    }

    #[test]
    fn test_fatal_decode_error_surfaces() {
        let mut emu = emulator_with_program(&[0xEA, 0x00]); // nop, unassigned
        let err = emu.step_until(|_| false, |_, _| {}).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(emu.cpu().state(), CpuState::Faulted);
        let outcome = emu.step_until(|_| false, |_, _| {}).unwrap();
        assert_eq!(outcome, StepOutcome::Faulted);
    }

    #[test]
    fn test_cartridge_is_loaded_when_supplied() {
        let options = EmulatorOptions {
            mode: RunMode::Run,
            video: false,
            audio: false,
            card: Some(vec![0xCA, 0xFE]),
        };
        let emu = Emulator::new(options, &[0xEA], &[]).unwrap();
        let start = crate::emu::bus::CARD_SLOT_START;
        assert_eq!(emu.cpu().bus().read(start).unwrap(), 0xCA);
        assert_eq!(emu.cpu().bus().read(start + 1).unwrap(), 0xFE);
    }

    #[test]
    fn test_video_gate_controls_refresh_driver() {
        let mut options = EmulatorOptions {
            mode: RunMode::Run,
            video: true,
            audio: false,
            card: None,
        };
        let emu = Emulator::new(options.clone(), &[0xEA], &[]).unwrap();
        assert!(emu.frames().is_some());

        options.video = false;
        let emu = Emulator::new(options, &[0xEA], &[]).unwrap();
        assert!(emu.frames().is_none());
    }
}

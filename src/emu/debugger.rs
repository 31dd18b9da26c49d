//! The interactive debugger.
//!
//! A line-oriented REPL over the emulator: single-step, step-until
//! predicates on the decoded mnemonic, free-run, reset, and the CPU
//! status record. The stepping commands share the emulator's cancellable
//! loop, so Ctrl-C brings the prompt back instead of wedging the process.

use std::cell::RefCell;
use std::io::{self, Write};

use anyhow::Result;
use easy_repl::{command, repl::LoopStatus, CommandStatus, Repl};

use crate::isa::Mnemonic;

use super::emulator::{Emulator, StepOutcome};
use super::EmuError;

pub struct Debugger<'a> {
    emu: RefCell<&'a mut Emulator>,
}

impl<'a> Debugger<'a> {
    pub fn new(emu: &'a mut Emulator) -> Self {
        Self {
            emu: RefCell::new(emu),
        }
    }

    pub fn repl(&self) -> Result<()> {
        let mut repl = Repl::builder()
            .description("ANC16 debug REPL")
            .add(
                "ni",
                command! {
                    "Execute the next instruction",
                    () => || {
                        let mut emu = self.emu.borrow_mut();
                        match emu.step_one() {
                            Ok(Some(_)) => eprintln!("{}", emu.cpu().status()),
                            Ok(None) => eprintln!("cpu is {}", emu.cpu().state()),
                            Err(e) => report_error(&e),
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "nj",
                command! {
                    "Execute until a jump instruction",
                    () => || {
                        let mut emu = self.emu.borrow_mut();
                        match emu.step_until(Mnemonic::is_jump, |_, _| {}) {
                            Ok(outcome) => report_outcome(&emu, outcome),
                            Err(e) => report_error(&e),
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "nr",
                command! {
                    "Execute until a ret instruction",
                    () => || {
                        let mut emu = self.emu.borrow_mut();
                        match emu.step_until(Mnemonic::is_return, |_, _| {}) {
                            Ok(outcome) => report_outcome(&emu, outcome),
                            Err(e) => report_error(&e),
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "run",
                command! {
                    "Continue execution until halt or Ctrl-C",
                    () => || {
                        let mut emu = self.emu.borrow_mut();
                        let result = emu.step_until(|_| false, |cpu, mnemonic| {
                            eprintln!("[pc={:#06x}] {}", cpu.status().pc, mnemonic);
                        });
                        match result {
                            Ok(outcome) => report_outcome(&emu, outcome),
                            Err(e) => report_error(&e),
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "res",
                command! {
                    "Reset the CPU",
                    () => || {
                        self.emu.borrow_mut().cpu_mut().reset();
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "reset",
                command! {
                    "Reset the CPU",
                    () => || {
                        self.emu.borrow_mut().cpu_mut().reset();
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "status",
                command! {
                    "Print the CPU status record",
                    () => || {
                        eprintln!("{}", self.emu.borrow().cpu().status());
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "exit",
                command! {
                    "Exit from the emulator",
                    () => || {
                        if confirm("Exit the emulator?")? {
                            Ok(CommandStatus::Quit)
                        } else {
                            Ok(CommandStatus::Done)
                        }
                    }
                },
            )
            .build()?;

        eprintln!("Welcome to the ANC16 debugger");
        eprintln!("Type help for the command list; run starts execution, Ctrl-C stops it");
        'repl: loop {
            eprintln!();
            {
                let emu = self.emu.borrow();
                if let Some(mnemonic) = emu.cpu().current_instruction() {
                    eprintln!("[pc={:#06x}] last: {}", emu.cpu().status().pc, mnemonic);
                }
            }

            let status = repl.next()?;
            if let LoopStatus::Break = status {
                break 'repl;
            }
        }
        Ok(())
    }
}

fn report_outcome(emu: &Emulator, outcome: StepOutcome) {
    match outcome {
        StepOutcome::Stopped(mnemonic) => eprintln!("stopped after {mnemonic}"),
        StepOutcome::Halted => eprintln!("cpu halted"),
        StepOutcome::Faulted => eprintln!("cpu faulted; res to recover"),
        StepOutcome::Interrupted => eprintln!("interrupted"),
    }
    eprintln!("{}", emu.cpu().status());
}

fn report_error(e: &EmuError) {
    if e.is_fatal() {
        eprintln!("fatal: {e}");
        eprintln!("the core has faulted; res to recover");
    } else {
        eprintln!("error: {e}");
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

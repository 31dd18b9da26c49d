use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use anc16::emu::emulator::Emulator;
use anc16::emu::{EmulatorOptions, RunMode};

/// Emulator and debugger for the ANC16 16-bit computer.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Operating system ROM image
    os_rom: PathBuf,
    /// Character map image
    char_map: PathBuf,
    /// Insert a cartridge image into the card slot
    #[arg(short, long)]
    card: Option<PathBuf>,
    /// Start in the interactive debugger
    #[arg(short, long)]
    debug: bool,
    /// Free-run, printing the CPU status record every step
    #[arg(short, long, conflicts_with = "debug")]
    watch: bool,
    /// Disable video output
    #[arg(long)]
    no_video: bool,
    /// Disable audio output
    #[arg(long)]
    no_audio: bool,
    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let os_rom = fs::read(&args.os_rom)
        .with_context(|| format!("reading os rom {}", args.os_rom.display()))?;
    let char_map = fs::read(&args.char_map)
        .with_context(|| format!("reading char map {}", args.char_map.display()))?;
    let card = match &args.card {
        Some(path) => {
            Some(fs::read(path).with_context(|| format!("reading card {}", path.display()))?)
        }
        None => None,
    };

    let mode = if args.debug {
        RunMode::Debug
    } else if args.watch {
        RunMode::Watch
    } else {
        RunMode::Run
    };
    let options = EmulatorOptions {
        mode,
        video: !args.no_video,
        audio: !args.no_audio,
        card,
    };

    let mut emu = Emulator::new(options, &os_rom, &char_map)?;
    emu.run()
}

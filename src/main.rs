mod chip8;
mod driver;
mod emulator;
mod error;

use std::cell::RefCell;
use std::path::Path;
use std::process::ExitCode;

use chip8::{Chip8, Quirks};
use driver::{minifb::Minifb, rodio::Rodio, termion::Termion};
use driver::{AudioDevice, DisplayDevice, InputDevice};
use emulator::{Emulator, ExitStatus};
use error::LoadError;

// Command line arguments
struct Args {
    rom: String,
    gui: bool,
    native_audio: bool,
    emu_clock_hz: u32,
    quirks: Quirks,
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let help_msg = "\
USAGE:
    crisp8 [OPTIONS] [ROM]

ARGS:
    <ROM>    Filepath to the CHIP-8 ROM to be read by the emulator. A list of
             ROMs released to the public domain can be found at:
                 - https://zophar.net/pdroms/chip8/chip-8-games-pack.html
                 - https://johnearnest.github.io/chip8Archive/?sort=platform

OPTIONS:
    -h, --help          Print this help message.
    -g, --gui           GUI mode — run this program in a native window.
    -t, --tui           TUI mode — run this program in the terminal. (default)
    -a                  Use the native audio host API. You may want to enable
                          this if your terminal emulator does not support the
                          BEL control code. Enabled by default with --gui.
    -f, --freq=NUM      Set the clock rate of the emulator (Hz) to uint NUM
                          in the range 1–2000. (default: 700)
        --shift-vy      Legacy shift: 8XY6/8XYE read VY instead of VX.
        --index-step    Legacy register I/O: FX55/FX65 advance I past the
                          last register transferred.
        --loose-borrow  8XY5/8XY7 report no-borrow with >= instead of the
                          default strict >.
        --wrap          Sprites wrap around the display edges instead of
                          clipping.

KEYMAP:
    +---+---+---+---+
    | 1 | 2 | 3 | 4 |
    +---+---+---+---+
    | Q | W | E | R |
    +---+---+---+---+
    | A | S | D | F |
    +---+---+---+---+
    | Z | X | C | V |
    +---+---+---+---+    Press ESC to quit.";

    let mut rom = None;
    let mut gui = false;
    let mut native_audio = false;
    let mut emu_clock_hz = emulator::DEFAULT_CLOCK_FREQ as u32;
    let mut quirks = Quirks::default();

    let mut parser = lexopt::Parser::from_env();

    while let Some(arg) = parser.next()? {
        match arg {
            Short('g') | Long("gui") => {
                gui = true;
                native_audio = true;
            }
            Short('t') | Long("tui") => {
                gui = false;
            }
            Short('a') => {
                native_audio = true;
            }
            Short('f') | Long("freq") => {
                emu_clock_hz = parser.value()?.parse()?;
                if !(1..=2000).contains(&emu_clock_hz) {
                    return Err("out of bounds value for option '--freq'".into());
                }
            }
            Long("shift-vy") => {
                quirks.shift_reads_vy = true;
            }
            Long("index-step") => {
                quirks.index_advances = true;
            }
            Long("loose-borrow") => {
                quirks.strict_borrow = false;
            }
            Long("wrap") => {
                quirks.sprite_wrap = true;
            }
            Value(path) if rom.is_none() => {
                rom = Some(path.string()?);
            }

            Short('h') | Long("help") => {
                println!("{}", help_msg);
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    Ok(Args {
        rom: rom.ok_or(
            "missing argument <ROM>\n
  Refer to --help for more information",
        )?,
        gui,
        native_audio,
        emu_clock_hz,
        quirks,
    })
}

fn boot(
    args: &Args,
    input: &RefCell<dyn InputDevice>,
    display: &RefCell<dyn DisplayDevice>,
    speaker: &RefCell<dyn AudioDevice>,
) -> Result<ExitStatus, LoadError> {
    let system = Chip8::with_quirks(args.quirks);
    let mut emu = Emulator::with_peripherals(system, input, display, speaker);
    emu.set_clock_speed(args.emu_clock_hz as f32);
    emu.load_program(&args.rom)?;
    Ok(emu.run())
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("crisp8: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let program_name = Path::new(&args.rom)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("crisp8")
        .to_owned();

    // The TUI takes over the terminal for the duration of the run, so any
    // outcome is only reported once its device has been dropped
    let outcome = if args.gui {
        let gui = RefCell::new(Minifb::new(&program_name));
        let speaker = RefCell::new(Rodio::new());
        boot(&args, &gui, &gui, &speaker)
    } else {
        let tui = RefCell::new(Termion::new());
        if args.native_audio {
            let speaker = RefCell::new(Rodio::new());
            boot(&args, &tui, &tui, &speaker)
        } else {
            boot(&args, &tui, &tui, &tui)
        }
    };

    match outcome {
        Ok(ExitStatus::Stopped) => ExitCode::SUCCESS,
        Ok(ExitStatus::Faulted(fault)) => {
            eprintln!("crisp8: emulation halted: {}", fault);
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("crisp8: {}", err);
            ExitCode::FAILURE
        }
    }
}

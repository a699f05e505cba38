use std::cell::RefCell;
use std::thread;
use std::time::{Duration, Instant};

use crate::chip8::Chip8;
use crate::driver::{AudioDevice, DisplayDevice, InputDevice};
use crate::error::{Fault, LoadError};

/// CPU instruction rate. The CHIP-8 has no specified clock; ~700 Hz is the
/// commonly accepted speed for classic ROMs.
pub const DEFAULT_CLOCK_FREQ: f32 = 700.0;
// Timers and the display both run on the fixed 60 Hz frame clock
const TARGET_FPS: f32 = 60.0;
// Frames of accumulated lag before the tick baseline resnaps to now instead
// of replaying missed ticks
const RESYNC_FRAMES: u32 = 4;

/// I/O messages devices send back up the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    None,
    /// The key snapshot changed since the last poll
    NewInputs,
    /// Host stop request (ESC, ^C, window closed)
    ProgramExit,
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Host stop request; the machine is intact
    Stopped,
    /// A fatal execution fault halted the machine
    Faulted(Fault),
}

pub struct Emulator<'i, 'd, 'a> {
    // The system we're emulating -- CHIP-8
    system: Chip8,
    clock_hz: f32,

    input_device: &'i RefCell<dyn InputDevice>,
    display: &'d RefCell<dyn DisplayDevice>,
    speaker: &'a RefCell<dyn AudioDevice>,
}

impl<'i, 'd, 'a> Emulator<'i, 'd, 'a> {
    pub fn with_peripherals(
        system: Chip8,
        input: &'i RefCell<dyn InputDevice>,
        display: &'d RefCell<dyn DisplayDevice>,
        audio: &'a RefCell<dyn AudioDevice>,
    ) -> Emulator<'i, 'd, 'a> {
        Emulator {
            system,
            clock_hz: DEFAULT_CLOCK_FREQ,
            input_device: input,
            display,
            speaker: audio,
        }
    }

    pub fn set_clock_speed(&mut self, hz: f32) {
        self.clock_hz = hz.clamp(1.0, 2000.0);
    }

    /// Reads a ROM image from disk into the machine. The file handle lives
    /// only for the duration of the read.
    pub fn load_program(&mut self, path: &str) -> Result<(), LoadError> {
        let data = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_owned(),
            source,
        })?;
        self.system.load_rom(&data)
    }

    /// The emulation loop, interleaving two independent rate domains: CPU
    /// cycles at `clock_hz` and timer/display/audio ticks at 60 Hz. Returns
    /// once the machine stops running, either by host request or by fault.
    pub fn run(&mut self) -> ExitStatus {
        let frame_period = Duration::from_secs_f32(1.0 / TARGET_FPS);
        let cycles_per_frame = ((self.clock_hz / TARGET_FPS) as u32).max(1);

        let mut cycles_this_frame = 0;
        let mut tone = false;
        let mut last_tick = Instant::now();

        while self.system.running() {
            // Keypad snapshot for this frame slice
            let signal = self.input_device.borrow_mut().handle_inputs();
            match signal {
                Signal::ProgramExit => {
                    self.system.stop();
                    break;
                }
                Signal::NewInputs => {
                    let inputs = self.input_device.borrow().send_inputs();
                    self.system.receive_input(inputs);
                }
                Signal::None => (),
            }

            // Burn through the slice's remaining cycle budget; frame ticks
            // land strictly between cycles, never inside one
            while cycles_this_frame < cycles_per_frame && self.system.running() {
                self.system.step();
                cycles_this_frame += 1;
            }

            if last_tick.elapsed() >= frame_period {
                self.frame_tick(&mut tone);
                cycles_this_frame = 0;
                // Advance by exactly one period so the 60 Hz domain doesn't
                // drift; resnap only if we've fallen well behind
                last_tick += frame_period;
                if last_tick.elapsed() > frame_period * RESYNC_FRAMES {
                    last_tick = Instant::now();
                }
            } else {
                // Don't busy-spin between frame boundaries
                thread::sleep(Duration::from_millis(1));
            }
        }

        // Make sure the tone isn't left hanging on a mid-beep exit
        if tone {
            self.speaker.borrow_mut().receive_signal(false);
        }

        match self.system.fault() {
            Some(fault) => ExitStatus::Faulted(fault),
            None => ExitStatus::Stopped,
        }
    }

    // One 60 Hz tick: timers count down, a dirty framebuffer goes out to the
    // display, and sound on/off edges go out to the speaker
    fn frame_tick(&mut self, tone: &mut bool) {
        self.system.tick_timers();

        if self.system.frame_dirty() {
            self.display
                .borrow_mut()
                .receive_frame(self.system.transmit_frame())
                .drive_display();
            self.system.acknowledge_frame();
        }

        let active = self.system.sound_active();
        if active != *tone {
            self.speaker.borrow_mut().receive_signal(active);
            *tone = active;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{InputMsg, NullDevice};

    #[test]
    fn fatal_fault_ends_the_run() {
        let input = RefCell::new(NullDevice::Input);
        let display = RefCell::new(NullDevice::Display);
        let speaker = RefCell::new(NullDevice::Audio);

        let mut system = Chip8::new();
        // Lone RET with an empty call stack
        system.load_rom(&[0x00, 0xEE]).unwrap();

        let mut emu = Emulator::with_peripherals(system, &input, &display, &speaker);
        assert_eq!(
            emu.run(),
            ExitStatus::Faulted(Fault::StackUnderflow { pc: 0x200 })
        );
    }

    #[test]
    fn host_stop_ends_the_run_cleanly() {
        struct StopNow;
        impl InputDevice for StopNow {
            fn handle_inputs(&mut self) -> Signal {
                Signal::ProgramExit
            }
            fn send_inputs(&self) -> Option<InputMsg> {
                None
            }
        }

        let input = RefCell::new(StopNow);
        let display = RefCell::new(NullDevice::Display);
        let speaker = RefCell::new(NullDevice::Audio);

        let mut system = Chip8::new();
        // An infinite loop that would otherwise never exit
        system.load_rom(&[0x12, 0x00]).unwrap();

        let mut emu = Emulator::with_peripherals(system, &input, &display, &speaker);
        assert_eq!(emu.run(), ExitStatus::Stopped);
    }
}

pub mod minifb;
pub mod rodio;
pub mod termion;

use bitvec::{slice::BitSlice, BitArr};

use crate::chip8::NUM_KEYS;
use crate::emulator::Signal;

// A 16-bit CHIP-8 input message representing the incoming, updated key states
// where the nth bit corresponds to the (n as hex) key status
//
//   Example: 0b1000_0001_0000_1101
//         => keys 0, 2, 3, 8, and F are in the down state
//            and all other keys in the up state
//
pub type InputMsg = BitArr!(for NUM_KEYS);

pub const KEY_UP: bool = false;
pub const KEY_DOWN: bool = true;

pub const PX_OFF: bool = false;
pub const PX_ON: bool = true;

// Model input device (e.g. keypad, keyboard, touchscreen, etc.) interfacing with our CHIP-8 system
pub trait InputDevice {
    fn handle_inputs(&mut self) -> Signal;

    fn send_inputs(&self) -> Option<InputMsg>;
}

// Model display device (e.g. UI library window, physical screen, etc.) interfacing with our CHIP-8 system
pub trait DisplayDevice {
    fn receive_frame(&mut self, frame: &BitSlice<usize>) -> &mut dyn DisplayDevice;

    fn drive_display(&mut self);
}

// Model audio device (e.g. audio drivers, beeper, etc.) interfacing with our CHIP-8 system.
// `receive_signal` is edge-triggered: the driver only reports transitions.
pub trait AudioDevice {
    fn receive_signal(&mut self, active: bool);
}

// Model empty device -- puts `/dev/null` into perspective.
// The machine must be able to run with no peripherals hooked up.
#[derive(Clone, Copy)]
pub enum NullDevice {
    Input,
    Display,
    Audio,
}

impl InputDevice for NullDevice {
    fn handle_inputs(&mut self) -> Signal {
        Signal::None
    }
    fn send_inputs(&self) -> Option<InputMsg> {
        None
    }
}

impl DisplayDevice for NullDevice {
    fn receive_frame(&mut self, _frame: &BitSlice<usize>) -> &mut dyn DisplayDevice {
        self
    }
    fn drive_display(&mut self) {}
}

impl AudioDevice for NullDevice {
    fn receive_signal(&mut self, _active: bool) {}
}

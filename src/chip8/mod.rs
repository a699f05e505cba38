mod instruction;

#[cfg(test)]
mod tests;

use bitvec::{bitarr, order::Msb0, slice::BitSlice, view::BitView, BitArr};
use smallvec::SmallVec;

use crate::driver::InputMsg;
use crate::error::{Fault, LoadError};
use instruction::{Instruction, Word};

//    CHIP-8 Virtual Machine memory layout:
//    +-----------------------------------+= 0xFFF (4095) End of CHIP-8 RAM
//    |                                   |
//    |                                   |
//    |           0x200 to 0xFFF          |
//    |        CHIP-8 Program / Data      |
//    |                                   |
//    |                 .                 |
//    /                 .                 /
//    /                 .                 /
//    |                                   |
//    +-----------------------------------+= 0x200 (512) Start of CHIP-8 programs
//    |           0x000 to 0x1FF          |
//    |        Reserved for CHIP-8        |
//    |            interpreter            |
//    + - - - - - - - - - - - - - - - - - += 0x0A0 (160) End of conventional font set
//    |           0x050 to 0x09F          |
//    |          CHIP-8 Font Data         |
//    |             '0' - 'F'             |
//    +-----------------------------------+= 0x000 (0) Start of CHIP-8 RAM
//
//  NOTE:
//    The interpreter itself runs outside of CHIP-8's 4KiB memory space, so
//    the lower 512 bytes hold nothing but the hex-digit font sprites at the
//    conventional 0x050 offset.

const RAM_SIZE: usize = 4096;
const FONTSET_START: usize = 0x050; // Starting addr of the font sprites
const ROM_START: usize = 0x200; // Starting addr of CHIP-8 programs
const ROM_CAPACITY: usize = RAM_SIZE - ROM_START;
const STACK_SIZE: usize = 16;
const NUM_DATA_REGS: usize = 16;
const PC_STEP: u16 = 2; // mem::size_of::<Word>() / chip8_addressable_unit = 2

// Pre-defined "static" font data occupying memory reserved for the interpreter (<0x200)
const FONT_SPRITES: [[u8; FONT_PX_HEIGHT]; 16] = [
    [0xF0, 0x90, 0x90, 0x90, 0xF0], // 0
    [0x20, 0x60, 0x20, 0x20, 0x70], // 1
    [0xF0, 0x10, 0xF0, 0x80, 0xF0], // 2
    [0xF0, 0x10, 0xF0, 0x10, 0xF0], // 3
    [0x90, 0x90, 0xF0, 0x10, 0x10], // 4
    [0xF0, 0x80, 0xF0, 0x10, 0xF0], // 5
    [0xF0, 0x80, 0xF0, 0x90, 0xF0], // 6
    [0xF0, 0x10, 0x20, 0x40, 0x40], // 7
    [0xF0, 0x90, 0xF0, 0x90, 0xF0], // 8
    [0xF0, 0x90, 0xF0, 0x10, 0xF0], // 9
    [0xF0, 0x90, 0xF0, 0x90, 0x90], // A
    [0xE0, 0x90, 0xE0, 0x90, 0xE0], // B
    [0xF0, 0x80, 0x80, 0x80, 0xF0], // C
    [0xE0, 0x90, 0x90, 0x90, 0xE0], // D
    [0xF0, 0x80, 0xF0, 0x80, 0xF0], // E
    [0xF0, 0x80, 0xF0, 0x80, 0x80], // F
];
const FONT_PX_HEIGHT: usize = 5;

pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;
pub const NUM_KEYS: usize = 16;

/// Well-known interpreter variations, exposed as explicit switches instead
/// of being baked in. Defaults follow the "modern" interpretation except for
/// the borrow flag, which keeps the strict comparison for parity with ROMs
/// written against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quirks {
    // 8XY6/8XYE shift VY into VX instead of shifting VX in place
    pub shift_reads_vy: bool,
    // FX55/FX65 leave I pointing one past the last register transferred
    pub index_advances: bool,
    // 8XY5/8XY7 set the no-borrow flag with strict `>` rather than `>=`
    pub strict_borrow: bool,
    // DXYN wraps pixels around the display edges instead of clipping them
    pub sprite_wrap: bool,
}

impl Default for Quirks {
    fn default() -> Self {
        Quirks {
            shift_reads_vy: false,
            index_advances: false,
            strict_borrow: true,
            sprite_wrap: false,
        }
    }
}

pub struct Chip8 {
    // RAM of the CHIP-8 VM
    memory: [u8; RAM_SIZE],
    // Program Counter
    pc: u16,
    // CHIP-8 call stack; its only purpose is to push/pop any callers' return
    // address. Depth is capped at 16; breaching the cap is a fatal fault, so
    // the SmallVec never spills.
    stack: SmallVec<[u16; STACK_SIZE]>,
    // I - the address register
    i_reg: u16,
    // V - general purpose data registers; VF doubles as the flag register
    v_reg: [u8; NUM_DATA_REGS],

    //  Output device: 64x32-pixel monochrome display
    //    +--------------------+
    //    |(0, 0)       (63, 0)|
    //    |                    |
    //    |                    |
    //    |(0, 31)     (63, 31)|
    //    +--------------------+
    //  Modeled in 1-D as: 0, 1, 2, ... , w-1
    //                     w, w+1,  ... , 2w-1
    //                     ...      ... , nw-1
    //                     w(h-1),  ... , wh-1
    //          and stored as a 2048-bit array
    display_bus: BitArr!(for DISPLAY_WIDTH * DISPLAY_HEIGHT),

    //  Input device: 16-key keypad (0x0-0xF)
    //    +------------+
    //    | 1  2  3  C |
    //    | 4  5  6  D |
    //    | 7  8  9  E |
    //    | A  0  B  F |
    //    +------------+
    //  Stored as a 16-bit array with the (n as hex)th bit
    //  corresponding to the key state; KEY_UP = 0, KEY_DOWN = 1
    input_bus: BitArr!(for NUM_KEYS),
    // General timer used for game events
    delay_timer: u8,
    // Timer for sound effects; a beep is made while the value is nonzero
    sound_timer: u8,

    // One-shot signal that the display changed; cleared once the host has
    // consumed the frame
    draw_flag: bool,
    // Cleared by a fatal fault or a host stop request
    running: bool,
    // The fault that cleared `running`, if any
    fault: Option<Fault>,
    quirks: Quirks,
}

impl Chip8 {
    pub fn new() -> Self {
        Self::with_quirks(Quirks::default())
    }

    pub fn with_quirks(quirks: Quirks) -> Self {
        let mut sys = Chip8 {
            memory: [0; RAM_SIZE],
            pc: ROM_START as u16,
            stack: SmallVec::new(),
            i_reg: 0,
            v_reg: [0; NUM_DATA_REGS],
            display_bus: bitarr![0; DISPLAY_WIDTH * DISPLAY_HEIGHT],
            input_bus: bitarr![0; NUM_KEYS],
            delay_timer: 0,
            sound_timer: 0,
            // Present one (blank) frame before the first DRAW lands
            draw_flag: true,
            running: true,
            fault: None,
            quirks,
        };

        sys.load_fonts();
        sys
    }

    fn load_fonts(&mut self) {
        for (i, font) in FONT_SPRITES.iter().flatten().enumerate() {
            self.memory[FONTSET_START + i] = *font;
        }
    }

    /// Copies a ROM image verbatim to 0x200. All-or-nothing: an oversized
    /// image is rejected without touching memory.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), LoadError> {
        if data.len() > ROM_CAPACITY {
            return Err(LoadError::TooLarge {
                size: data.len(),
                max: ROM_CAPACITY,
            });
        }

        self.memory[ROM_START..ROM_START + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// One CPU cycle: fetch, decode, execute. Words that decode to nothing
    /// are soft faults; the PC has already moved past them.
    pub fn step(&mut self) {
        if !self.running {
            return;
        }

        let Some(word) = self.fetch() else { return };
        match Instruction::decode(word) {
            Some(instr) => {
                log::trace!("{:#05X}: {:?}", self.pc.wrapping_sub(PC_STEP), instr);
                self.execute(instr);
            }
            None => log::warn!(
                "unknown instruction {:#06X} at {:#05X}",
                u16::from(word),
                self.pc.wrapping_sub(PC_STEP)
            ),
        }
    }

    // CHIP-8 instructions are stored big-endian. A fetch that would straddle
    // the end of RAM is a fatal fault.
    fn fetch(&mut self) -> Option<Word> {
        if self.pc as usize + 1 >= RAM_SIZE {
            self.halt(Fault::PcOutOfBounds { pc: self.pc });
            return None;
        }

        let hb = self.memory[self.pc as usize];
        let lb = self.memory[self.pc as usize + 1];
        self.pc += PC_STEP;
        // `Word` (`modular_bitfield::bitfield`) is constructed lsb -> msb
        Some(Word::from_bytes([lb, hb]))
    }

    fn halt(&mut self, fault: Fault) {
        log::error!("fatal: {}", fault);
        self.fault = Some(fault);
        self.running = false;
    }

    fn execute(&mut self, instr: Instruction) {
        match instr {
            Instruction::ClearScreen => {
                self.display_bus.fill(false);
                self.draw_flag = true;
            }
            Instruction::Return => match self.stack.pop() {
                Some(ret_addr) => self.pc = ret_addr,
                None => self.halt(Fault::StackUnderflow {
                    pc: self.pc.wrapping_sub(PC_STEP),
                }),
            },
            // Machine-code routine on the original hardware; ignored here
            Instruction::MachineCall(addr) => {
                log::debug!("ignoring machine call to {:#05X}", addr);
            }
            Instruction::Jump(addr) => {
                self.pc = addr;
            }
            Instruction::Call(addr) => {
                if self.stack.len() == STACK_SIZE {
                    self.halt(Fault::StackOverflow {
                        pc: self.pc.wrapping_sub(PC_STEP),
                    });
                    return;
                }
                self.stack.push(self.pc);
                self.pc = addr;
            }
            Instruction::SkipEqImm(x, nn) => {
                if self.v_reg[x] == nn {
                    self.pc += PC_STEP;
                }
            }
            Instruction::SkipNeImm(x, nn) => {
                if self.v_reg[x] != nn {
                    self.pc += PC_STEP;
                }
            }
            Instruction::SkipEqReg(x, y) => {
                if self.v_reg[x] == self.v_reg[y] {
                    self.pc += PC_STEP;
                }
            }
            Instruction::SetImm(x, nn) => {
                self.v_reg[x] = nn;
            }
            // No carry flag for the immediate add
            Instruction::AddImm(x, nn) => {
                self.v_reg[x] = self.v_reg[x].wrapping_add(nn);
            }
            Instruction::Move(x, y) => {
                self.v_reg[x] = self.v_reg[y];
            }
            Instruction::Or(x, y) => {
                self.v_reg[x] |= self.v_reg[y];
            }
            Instruction::And(x, y) => {
                self.v_reg[x] &= self.v_reg[y];
            }
            Instruction::Xor(x, y) => {
                self.v_reg[x] ^= self.v_reg[y];
            }
            Instruction::Add(x, y) => {
                let (vx, carry) = self.v_reg[x].overflowing_add(self.v_reg[y]);
                self.v_reg[x] = vx;
                self.v_reg[0xF] = carry as u8;
            }
            Instruction::Sub(x, y) => {
                self.v_reg[0xF] = self.no_borrow(self.v_reg[x], self.v_reg[y]);
                self.v_reg[x] = self.v_reg[x].wrapping_sub(self.v_reg[y]);
            }
            Instruction::ShiftRight(x, y) => {
                let src = if self.quirks.shift_reads_vy { y } else { x };
                self.v_reg[0xF] = self.v_reg[src] & 0x1;
                self.v_reg[x] = self.v_reg[src] >> 1;
            }
            Instruction::SubFrom(x, y) => {
                self.v_reg[0xF] = self.no_borrow(self.v_reg[y], self.v_reg[x]);
                self.v_reg[x] = self.v_reg[y].wrapping_sub(self.v_reg[x]);
            }
            Instruction::ShiftLeft(x, y) => {
                let src = if self.quirks.shift_reads_vy { y } else { x };
                self.v_reg[0xF] = (self.v_reg[src] >> (u8::BITS - 1)) & 0x1;
                self.v_reg[x] = self.v_reg[src] << 1;
            }
            Instruction::SkipNeReg(x, y) => {
                if self.v_reg[x] != self.v_reg[y] {
                    self.pc += PC_STEP;
                }
            }
            Instruction::SetIndex(addr) => {
                self.i_reg = addr;
            }
            // An out-of-range target is only caught at the next fetch
            Instruction::JumpOffset(addr) => {
                self.pc = addr.wrapping_add(self.v_reg[0x0] as u16);
            }
            Instruction::Random(x, nn) => {
                self.v_reg[x] = fastrand::u8(..) & nn;
            }
            Instruction::Draw(x, y, height) => {
                self.draw_sprite(x, y, height);
            }
            Instruction::SkipKeyDown(x) => {
                if self.input_bus[(self.v_reg[x] & 0xF) as usize] {
                    self.pc += PC_STEP;
                }
            }
            Instruction::SkipKeyUp(x) => {
                if !self.input_bus[(self.v_reg[x] & 0xF) as usize] {
                    self.pc += PC_STEP;
                }
            }
            Instruction::ReadDelay(x) => {
                self.v_reg[x] = self.delay_timer;
            }
            // Block until a key is down: no-op and repeat the instruction
            // next cycle. Timers keep running while we spin here.
            Instruction::WaitKey(x) => match self.input_bus.first_one() {
                Some(key) => self.v_reg[x] = key as u8,
                None => self.pc -= PC_STEP,
            },
            Instruction::SetDelay(x) => {
                self.delay_timer = self.v_reg[x];
            }
            Instruction::SetSound(x) => {
                self.sound_timer = self.v_reg[x];
            }
            // Wraps at 16 bits; VF untouched
            Instruction::AddIndex(x) => {
                self.i_reg = self.i_reg.wrapping_add(self.v_reg[x] as u16);
            }
            Instruction::FontAddr(x) => {
                // Address of the font sprite for hex digit '{Vx}'
                //             = FONTSET_START + Vx * bytes_per_font_sprite
                self.i_reg =
                    (FONTSET_START + (self.v_reg[x] & 0xF) as usize * FONT_PX_HEIGHT) as u16;
            }
            Instruction::StoreBcd(x) => {
                let vx = self.v_reg[x];
                let i = self.i_reg as usize;
                self.write_mem(i, vx / 100);
                self.write_mem(i + 1, vx / 10 % 10);
                self.write_mem(i + 2, vx % 10);
            }
            Instruction::StoreRegs(x) => {
                for offset in 0..=x {
                    self.write_mem(self.i_reg as usize + offset, self.v_reg[offset]);
                }
                if self.quirks.index_advances {
                    self.i_reg = self.i_reg.wrapping_add(x as u16 + 1);
                }
            }
            Instruction::LoadRegs(x) => {
                for offset in 0..=x {
                    self.v_reg[offset] = self.read_mem(self.i_reg as usize + offset);
                }
                if self.quirks.index_advances {
                    self.i_reg = self.i_reg.wrapping_add(x as u16 + 1);
                }
            }
        }
    }

    fn no_borrow(&self, minuend: u8, subtrahend: u8) -> u8 {
        if self.quirks.strict_borrow {
            (minuend > subtrahend) as u8
        } else {
            (minuend >= subtrahend) as u8
        }
    }

    // Reads past the end of RAM come back as zero
    fn read_mem(&self, addr: usize) -> u8 {
        self.memory.get(addr).copied().unwrap_or(0)
    }

    // Writes past the end of RAM are dropped
    fn write_mem(&mut self, addr: usize, val: u8) {
        match self.memory.get_mut(addr) {
            Some(cell) => *cell = val,
            None => log::debug!("dropping write past end of RAM ({:#06X})", addr),
        }
    }

    //  DXYN - Read an n-byte sprite from memory starting at addr I and XOR it
    //  onto coordinates (Vx, Vy). The starting coordinates wrap around the
    //  display; individual pixels past the edges are clipped (or wrapped too,
    //  under the sprite_wrap quirk). VF reports whether any lit pixel was
    //  turned off.
    fn draw_sprite(&mut self, x: usize, y: usize, height: usize) {
        let x0 = self.v_reg[x] as usize % DISPLAY_WIDTH;
        let y0 = self.v_reg[y] as usize % DISPLAY_HEIGHT;
        self.v_reg[0xF] = 0;

        for row in 0..height {
            let byte = self.read_mem(self.i_reg as usize + row);
            let mut coord_y = y0 + row;
            if coord_y >= DISPLAY_HEIGHT {
                if !self.quirks.sprite_wrap {
                    continue;
                }
                coord_y %= DISPLAY_HEIGHT;
            }

            for (col, bit) in byte.view_bits::<Msb0>().iter().enumerate() {
                if !*bit {
                    continue;
                }
                let mut coord_x = x0 + col;
                if coord_x >= DISPLAY_WIDTH {
                    if !self.quirks.sprite_wrap {
                        continue;
                    }
                    coord_x %= DISPLAY_WIDTH;
                }

                let idx = coord_y * DISPLAY_WIDTH + coord_x;
                let lit = self.display_bus[idx];
                self.v_reg[0xF] |= lit as u8;
                self.display_bus.set(idx, !lit);
            }
        }

        self.draw_flag = true;
    }

    /// 60 Hz tick: both timers count down towards zero and stay there.
    pub fn tick_timers(&mut self) {
        if self.delay_timer > 0 {
            self.delay_timer -= 1;
        }
        if self.sound_timer > 0 {
            self.sound_timer -= 1;
        }
    }

    // Rx 16-bit input key state
    pub fn receive_input(&mut self, msg: Option<InputMsg>) {
        if let Some(input) = msg {
            self.input_bus = input;
        }
    }

    // Tx 1-bit sound channel
    pub fn sound_active(&self) -> bool {
        self.sound_timer > 0
    }

    // Tx 2048 (64x32) bit display out
    pub fn transmit_frame(&self) -> &BitSlice<usize> {
        self.display_bus.as_bitslice()
    }

    pub fn frame_dirty(&self) -> bool {
        self.draw_flag
    }

    pub fn acknowledge_frame(&mut self) {
        self.draw_flag = false;
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// Host stop request; takes effect before the next cycle.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }
}

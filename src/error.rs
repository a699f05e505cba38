use thiserror::Error;

/// Failure to bring a ROM image into memory. Loading is all-or-nothing;
/// on error the program area is left untouched.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("could not read ROM '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ROM is {size} bytes; at most {max} fit above 0x200")]
    TooLarge { size: usize, max: usize },
}

/// A fatal execution fault. The machine records the fault, clears its
/// `running` flag, and stops fetching; faults never unwind.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    #[error("call stack overflow at {pc:#05X}")]
    StackOverflow { pc: u16 },
    #[error("return with empty call stack at {pc:#05X}")]
    StackUnderflow { pc: u16 },
    #[error("program counter out of bounds ({pc:#05X})")]
    PcOutOfBounds { pc: u16 },
}

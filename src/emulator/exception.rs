//! Emulator exception taxonomy.
//!
//! Every fault an instruction can raise is collected here. A step either
//! completes with all of its register and memory effects applied, or it
//! raises exactly one `Exception` and applies none of the remaining ones:
//! bounds and permission checks run before any byte is mutated.

use thiserror::Error;

/// A fault raised while executing a single instruction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Exception {
    /// Instruction fetch failed or the word did not decode.
    #[error("bad instruction at {addr:#010X}")]
    BadInstr { addr: u32 },

    /// A register id outside x0..x31 reached the register file.
    #[error("bad register id {reg}")]
    BadReg { reg: u8 },

    /// A memory access fell outside its region's window.
    #[error("out-of-bounds access at {addr:#010X} ({bytes} bytes)")]
    OutOfBounds { addr: u32, value: u32, bytes: u8 },

    /// A write targeted read-only memory.
    #[error("write of {value:#X} to read-only memory at {addr:#010X}")]
    AccessDenied { addr: u32, value: u32, bytes: u8 },

    /// No mapped region claims the address.
    #[error("no region claims address {addr:#010X}")]
    NoRegion { addr: u32 },

    /// A halfword or word access at an unaligned address.
    #[error("misaligned {width}-byte access at {addr:#010X}")]
    Misaligned { addr: u32, width: u8 },

    /// An SWI was issued with an NR value nothing dispatches on.
    #[error("unknown syscall number {nr}")]
    UnknownSyscall { nr: u32 },

    /// Normal or assertion stop.
    #[error("halt")]
    Halt,
}

impl Exception {
    /// True for the HALT stop, which ends a run without being an error.
    pub fn is_halt(&self) -> bool {
        matches!(self, Exception::Halt)
    }
}

//! Bytecode definitions and the compiled program image.

mod opcode;
mod program;

pub use opcode::Opcode;
pub use program::{Program, ProgramError, MAX_NUMBERS, MAX_PROGRAM_BYTES, MAX_STRINGS};

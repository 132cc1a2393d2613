//! Bytecode compiler, virtual machine, and garbage collector for the
//! Lark scripting language.
//!
//! The embedding surface is two types: [`State`] owns a compiled program,
//! its symbol table, and the host's foreign-function and constant
//! bindings; [`Thread`] executes that program one instruction at a time
//! over its own value stack, call-frame stack, globals, and GC heap.
//! A state may back any number of threads; threads borrow their state,
//! so a thread can never outlive it, and recompilation requires that no
//! thread is live.
//!
//! ```no_run
//! use lark_engine::{State, Thread};
//!
//! let mut state = State::new();
//! state.compile_string("demo", "x := 1 + 2 * 3").unwrap();
//! let mut thread = Thread::new(&state);
//! thread.start();
//! thread.run().unwrap();
//! let idx = state.global_index("x").unwrap();
//! assert_eq!(thread.global(idx).unwrap().as_number(), Some(7.0));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bytecode;
pub mod compiler;
mod diagnostics;
pub mod ffi;
pub mod gc;
pub mod state;
pub mod vm;

pub use bytecode::{Opcode, Program, ProgramError};
pub use compiler::{CompileError, CompileErrorKind};
pub use ffi::{ForeignFn, NativeProps};
pub use gc::{GcStats, HeapId, Marker};
pub use state::State;
pub use vm::{Thread, Value};

use lark_parser::{LexError, ParseError};
use thiserror::Error;

/// VM execution errors.
#[derive(Debug, Error)]
pub enum VmError {
    /// The value stack is full.
    #[error("value stack overflow")]
    StackOverflow,

    /// A pop was attempted on an empty stack region.
    #[error("value stack underflow")]
    StackUnderflow,

    /// The indirection stack is full.
    #[error("call depth exceeded")]
    CallDepthExceeded,

    /// A return was executed with no call frame on the indirection stack.
    #[error("return without a call frame")]
    ReturnWithoutFrame,

    /// An operand had the wrong runtime type.
    #[error("type error: expected {expected}, found {found}")]
    TypeError {
        /// The type the instruction requires.
        expected: &'static str,
        /// The type actually on the stack.
        found: &'static str,
    },

    /// Integer division or remainder by zero.
    #[error("integer division by zero")]
    DivisionByZero,

    /// The program counter left the program image.
    #[error("program counter out of bounds: {0}")]
    PcOutOfBounds(i64),

    /// A byte that is not an opcode was fetched.
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),

    /// An instruction's operand bytes run past the end of the program.
    #[error("truncated operand at pc {0}")]
    TruncatedOperand(usize),

    /// An operand indexed outside its table.
    #[error("operand out of range at pc {pc}: {what} {index}")]
    OperandOutOfRange {
        /// What kind of table was indexed.
        what: &'static str,
        /// The out-of-range index.
        index: i64,
        /// Location of the instruction.
        pc: usize,
    },

    /// `call_function` was given an index with no compiled function.
    #[error("no function with index {0}")]
    UndefinedFunction(usize),

    /// A global index outside the thread's global array.
    #[error("no global with index {0}")]
    UndefinedGlobal(usize),

    /// A read or write on the thread's standard streams failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A foreign function reported a failure.
    #[error("foreign function error: {0}")]
    Foreign(String),
}

/// VM execution result.
pub type VmResult<T> = Result<T, VmError>;

/// Any error the engine can produce, compile-time or runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Tokenization failed.
    #[error(transparent)]
    Lex(#[from] LexError),

    /// Parsing failed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Code generation or post-compilation checking failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The produced program image failed validation.
    #[error(transparent)]
    Program(#[from] ProgramError),

    /// Execution failed.
    #[error(transparent)]
    Runtime(#[from] VmError),

    /// A host binding clashed with an existing name.
    #[error("`{name}` is already bound")]
    DuplicateBinding {
        /// The clashing name.
        name: String,
    },

    /// A source file could not be read.
    #[error("cannot read `{path}`: {source}")]
    Io {
        /// The path that failed.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

//! The compiled program image.
//!
//! A program is a flat byte buffer of instructions plus the literal
//! pools its operands index: interned numbers, interned strings, and the
//! function-PC table. The pools belong to the program (and therefore to
//! the owning state), so tearing a state down reclaims its literals and
//! distinct states can be compiled concurrently.

use super::opcode::Opcode;
use rustc_hash::FxHashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

/// Upper bound on the size of a compiled program.
pub const MAX_PROGRAM_BYTES: usize = 1 << 20;
/// Upper bound on distinct numeric literals.
pub const MAX_NUMBERS: usize = 4096;
/// Upper bound on distinct string literals.
pub const MAX_STRINGS: usize = 4096;

/// Errors in the construction or validation of a program image.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgramError {
    /// The instruction buffer grew past [`MAX_PROGRAM_BYTES`].
    #[error("program exceeds {MAX_PROGRAM_BYTES} bytes")]
    ProgramTooLarge,

    /// The number pool grew past [`MAX_NUMBERS`].
    #[error("too many numeric literals (limit {MAX_NUMBERS})")]
    TooManyNumbers,

    /// The string pool grew past [`MAX_STRINGS`].
    #[error("too many string literals (limit {MAX_STRINGS})")]
    TooManyStrings,

    /// A byte that is not an opcode at an instruction boundary.
    #[error("invalid opcode {byte:#04x} at pc {pc}")]
    InvalidOpcode {
        /// The offending byte.
        byte: u8,
        /// Its offset.
        pc: usize,
    },

    /// Operand bytes run past the end of the program.
    #[error("truncated operand at pc {pc}")]
    TruncatedOperand {
        /// Offset of the instruction.
        pc: usize,
    },

    /// An operand indexed outside its pool or table.
    #[error("{what} index {index} out of range at pc {pc}")]
    OperandOutOfRange {
        /// Which table the operand indexes.
        what: &'static str,
        /// The out-of-range value.
        index: i64,
        /// Offset of the instruction.
        pc: usize,
    },

    /// A jump landed outside the program or between instructions.
    #[error("jump target {target} at pc {pc} is not an instruction boundary")]
    BadJumpTarget {
        /// The target byte offset.
        target: i64,
        /// Offset of the jump instruction.
        pc: usize,
    },

    /// A function-PC entry does not point at an instruction boundary.
    #[error("entry point of function {function} is not an instruction boundary")]
    BadEntryPoint {
        /// The function index.
        function: usize,
    },
}

/// A compiled Lark program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// The instruction stream.
    pub code: Vec<u8>,
    /// Interned numeric literals, indexed by `PushNumber` operands.
    pub numbers: Vec<f64>,
    /// Interned string literals, indexed by `PushString` operands.
    /// Shared so threads can hold constant strings without copying.
    pub strings: Vec<Arc<str>>,
    /// Entry offsets per user function, indexed by `Call` operands.
    pub function_pcs: Vec<usize>,

    number_index: FxHashMap<u64, usize>,
    string_index: FxHashMap<String, usize>,
}

impl Program {
    /// Create an empty program.
    pub fn new() -> Self {
        Program::default()
    }

    /// Current length of the instruction stream in bytes.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether no code has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    // ========================================================================
    // Literal pools
    // ========================================================================

    /// Intern a numeric literal, returning its pool index.
    ///
    /// Idempotent: equal inputs (by bit pattern) return the same index.
    pub fn register_number(&mut self, value: f64) -> Result<usize, ProgramError> {
        let key = value.to_bits();
        if let Some(&idx) = self.number_index.get(&key) {
            return Ok(idx);
        }
        if self.numbers.len() >= MAX_NUMBERS {
            return Err(ProgramError::TooManyNumbers);
        }
        let idx = self.numbers.len();
        self.numbers.push(value);
        self.number_index.insert(key, idx);
        Ok(idx)
    }

    /// Intern a string literal, returning its pool index.
    ///
    /// Idempotent: equal inputs return the same index.
    pub fn register_string(&mut self, value: &str) -> Result<usize, ProgramError> {
        if let Some(&idx) = self.string_index.get(value) {
            return Ok(idx);
        }
        if self.strings.len() >= MAX_STRINGS {
            return Err(ProgramError::TooManyStrings);
        }
        let idx = self.strings.len();
        self.strings.push(Arc::from(value));
        self.string_index.insert(value.to_string(), idx);
        Ok(idx)
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Append an opcode byte.
    pub fn emit(&mut self, op: Opcode) -> Result<(), ProgramError> {
        if self.code.len() >= MAX_PROGRAM_BYTES {
            return Err(ProgramError::ProgramTooLarge);
        }
        self.code.push(op as u8);
        Ok(())
    }

    /// Append a 32-bit little-endian operand.
    pub fn emit_i32(&mut self, value: i32) -> Result<(), ProgramError> {
        if self.code.len() + 4 > MAX_PROGRAM_BYTES {
            return Err(ProgramError::ProgramTooLarge);
        }
        self.code.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Append an opcode with one operand.
    pub fn emit_op1(&mut self, op: Opcode, a: i32) -> Result<(), ProgramError> {
        self.emit(op)?;
        self.emit_i32(a)
    }

    /// Append an opcode with two operands.
    pub fn emit_op2(&mut self, op: Opcode, a: i32, b: i32) -> Result<(), ProgramError> {
        self.emit(op)?;
        self.emit_i32(a)?;
        self.emit_i32(b)
    }

    /// Emit a jump with a zero placeholder; returns the placeholder offset.
    pub fn emit_jump(&mut self, op: Opcode) -> Result<usize, ProgramError> {
        self.emit(op)?;
        let at = self.code.len();
        self.emit_i32(0)?;
        Ok(at)
    }

    /// Overwrite the placeholder at `at` with the current program length.
    pub fn patch_jump(&mut self, at: usize) {
        let target = self.code.len() as i32;
        self.code[at..at + 4].copy_from_slice(&target.to_le_bytes());
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    /// Read the `i32` operand at byte offset `at`.
    pub fn read_i32(&self, at: usize) -> Option<i32> {
        let bytes = self.code.get(at..at + 4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check the whole image for structural soundness.
    ///
    /// Decodes every instruction from offset zero, then verifies that all
    /// pool and table operands are in range (the host callee table size
    /// is supplied by the caller), every jump lands on an instruction
    /// boundary, and every function entry is a boundary.
    pub fn validate(&self, foreign_count: usize) -> Result<(), ProgramError> {
        let mut boundary = vec![false; self.code.len() + 1];
        let mut pc = 0usize;
        while pc < self.code.len() {
            boundary[pc] = true;
            let byte = self.code[pc];
            let op = Opcode::from_u8(byte).ok_or(ProgramError::InvalidOpcode { byte, pc })?;
            if pc + op.size() > self.code.len() {
                return Err(ProgramError::TruncatedOperand { pc });
            }
            pc += op.size();
        }
        boundary[self.code.len()] = true;

        let mut pc = 0usize;
        while pc < self.code.len() {
            let op = Opcode::from_u8(self.code[pc]).ok_or(ProgramError::InvalidOpcode {
                byte: self.code[pc],
                pc,
            })?;
            match op {
                Opcode::PushNumber => {
                    self.check_index(pc, "number", self.numbers.len())?;
                }
                Opcode::PushString => {
                    self.check_index(pc, "string", self.strings.len())?;
                }
                Opcode::Goto | Opcode::GotoZ => {
                    let target = self.read_i32(pc + 1).unwrap_or(-1) as i64;
                    let ok = target >= 0
                        && (target as usize) < self.code.len()
                        && boundary[target as usize];
                    if !ok {
                        return Err(ProgramError::BadJumpTarget { target, pc });
                    }
                }
                Opcode::Call => {
                    self.check_index_at(pc, pc + 5, "function", self.function_pcs.len())?;
                }
                Opcode::CallForeign => {
                    self.check_index_at(pc, pc + 5, "foreign function", foreign_count)?;
                }
                _ => {}
            }
            pc += op.size();
        }

        for (function, &entry) in self.function_pcs.iter().enumerate() {
            if entry >= self.code.len() || !boundary[entry] {
                return Err(ProgramError::BadEntryPoint { function });
            }
        }
        Ok(())
    }

    fn check_index(&self, pc: usize, what: &'static str, len: usize) -> Result<(), ProgramError> {
        self.check_index_at(pc, pc + 1, what, len)
    }

    fn check_index_at(
        &self,
        pc: usize,
        at: usize,
        what: &'static str,
        len: usize,
    ) -> Result<(), ProgramError> {
        let index = self.read_i32(at).unwrap_or(-1) as i64;
        if index < 0 || index as usize >= len {
            return Err(ProgramError::OperandOutOfRange { what, index, pc });
        }
        Ok(())
    }

    // ========================================================================
    // Disassembly
    // ========================================================================

    /// Render the instruction stream, one instruction per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut pc = 0usize;
        while pc < self.code.len() {
            let Some(op) = Opcode::from_u8(self.code[pc]) else {
                let _ = writeln!(out, "{pc:06}  ?? {:#04x}", self.code[pc]);
                pc += 1;
                continue;
            };
            let _ = write!(out, "{pc:06}  {}", op.mnemonic());
            match op.operand_count() {
                1 => {
                    let a = self.read_i32(pc + 1).unwrap_or(0);
                    let _ = write!(out, " {a}");
                    match op {
                        Opcode::PushNumber => {
                            if let Some(n) = self.numbers.get(a as usize) {
                                let _ = write!(out, " ; {n}");
                            }
                        }
                        Opcode::PushString => {
                            if let Some(s) = self.strings.get(a as usize) {
                                let _ = write!(out, " ; {s:?}");
                            }
                        }
                        _ => {}
                    }
                }
                2 => {
                    let a = self.read_i32(pc + 1).unwrap_or(0);
                    let b = self.read_i32(pc + 5).unwrap_or(0);
                    let _ = write!(out, " {a}, {b}");
                }
                _ => {}
            }
            let _ = writeln!(out);
            pc += op.size();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_number_is_idempotent() {
        let mut program = Program::new();
        let a = program.register_number(1.5).unwrap();
        let b = program.register_number(2.5).unwrap();
        let c = program.register_number(1.5).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(program.numbers.len(), 2);
    }

    #[test]
    fn test_register_string_is_idempotent() {
        let mut program = Program::new();
        let a = program.register_string("hi").unwrap();
        let b = program.register_string("there").unwrap();
        let c = program.register_string("hi").unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(program.strings.len(), 2);
    }

    #[test]
    fn test_emit_and_read_i32() {
        let mut program = Program::new();
        program.emit_op1(Opcode::PushNumber, -7).unwrap();
        assert_eq!(program.code[0], Opcode::PushNumber as u8);
        assert_eq!(program.read_i32(1), Some(-7));
    }

    #[test]
    fn test_patch_jump() {
        let mut program = Program::new();
        let at = program.emit_jump(Opcode::Goto).unwrap();
        program.emit(Opcode::PushNull).unwrap();
        program.emit(Opcode::Halt).unwrap();
        program.patch_jump(at);
        assert_eq!(program.read_i32(at), Some(7));
    }

    #[test]
    fn test_validate_accepts_well_formed_code() {
        let mut program = Program::new();
        let idx = program.register_number(42.0).unwrap() as i32;
        program.emit_op1(Opcode::PushNumber, idx).unwrap();
        program.emit(Opcode::Pop).unwrap();
        program.emit(Opcode::Halt).unwrap();
        program.validate(0).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_number_index() {
        let mut program = Program::new();
        program.emit_op1(Opcode::PushNumber, 3).unwrap();
        program.emit(Opcode::Halt).unwrap();
        assert!(matches!(
            program.validate(0),
            Err(ProgramError::OperandOutOfRange { what: "number", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_mid_instruction_jump() {
        let mut program = Program::new();
        let idx = program.register_number(1.0).unwrap() as i32;
        // Jump into the middle of the PushNumber operand.
        program.emit_op1(Opcode::Goto, 7).unwrap();
        program.emit_op1(Opcode::PushNumber, idx).unwrap();
        program.emit(Opcode::Halt).unwrap();
        assert!(matches!(
            program.validate(0),
            Err(ProgramError::BadJumpTarget { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_truncated_operand() {
        let mut program = Program::new();
        program.emit(Opcode::Goto).unwrap();
        program.code.extend_from_slice(&[0, 0]); // half an operand
        assert!(matches!(
            program.validate(0),
            Err(ProgramError::TruncatedOperand { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_foreign() {
        let mut program = Program::new();
        program.emit_op2(Opcode::CallForeign, 0, 0).unwrap();
        program.emit(Opcode::Halt).unwrap();
        assert!(matches!(
            program.validate(0),
            Err(ProgramError::OperandOutOfRange {
                what: "foreign function",
                ..
            })
        ));
    }

    #[test]
    fn test_disassemble_resolves_literals() {
        let mut program = Program::new();
        let n = program.register_number(6.5).unwrap() as i32;
        let s = program.register_string("hey").unwrap() as i32;
        program.emit_op1(Opcode::PushNumber, n).unwrap();
        program.emit_op1(Opcode::PushString, s).unwrap();
        program.emit(Opcode::Halt).unwrap();
        let listing = program.disassemble();
        assert!(listing.contains("push_number 0 ; 6.5"));
        assert!(listing.contains("push_string 0 ; \"hey\""));
        assert!(listing.contains("halt"));
    }
}

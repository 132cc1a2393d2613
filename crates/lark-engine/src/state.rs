//! The compilation state and host-binding surface.
//!
//! A [`State`] is one compilation unit: the program image, the symbol
//! table, the foreign-function callee table, and a database of every
//! compiled source for diagnostics. Hosts register foreign functions
//! and constants first, then compile one or more sources; each
//! compilation re-opens the trailing `halt` and appends, so programs
//! concatenate. Threads borrow the state read-only, which means all
//! binding and compiling must finish before execution starts.

use crate::bytecode::Program;
use crate::compiler::compile;
use crate::diagnostics::{self, FileDb};
use crate::ffi::ForeignFn;
use crate::Error;
use lark_parser::{ConstValue, Parser, Span, SymbolTable, Warning};
use std::path::Path;
use termcolor::WriteColor;

/// A compilation unit plus its host bindings.
pub struct State {
    program: Program,
    symbols: SymbolTable,
    foreign: Vec<ForeignFn>,
    files: FileDb,
    last_file: Option<usize>,
    warnings: Vec<(usize, Warning)>,
    compiled: bool,
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}

impl State {
    /// Create an empty state.
    pub fn new() -> Self {
        State {
            program: Program::new(),
            symbols: SymbolTable::new(),
            foreign: Vec::new(),
            files: FileDb::new(),
            last_file: None,
            warnings: Vec::new(),
            compiled: false,
        }
    }

    /// Wrap a hand-assembled program image, for opcode-level tests.
    #[cfg(test)]
    pub(crate) fn with_program(program: Program) -> Self {
        State {
            program,
            ..State::new()
        }
    }

    // ========================================================================
    // Host bindings
    // ========================================================================

    /// Register a foreign function under `name`.
    ///
    /// Duplicate names are an error, as are clashes with constants.
    pub fn bind_function(&mut self, name: &str, callee: ForeignFn) -> Result<(), Error> {
        self.symbols
            .declare_foreign(name, Span::new(0, 0, 0))
            .map_err(|_| Error::DuplicateBinding {
                name: name.to_string(),
            })?;
        self.foreign.push(callee);
        Ok(())
    }

    /// Register a host-owned numeric constant.
    pub fn bind_const_number(&mut self, name: &str, value: f64) -> Result<(), Error> {
        self.symbols
            .declare_const(name, ConstValue::Number(value), Span::new(0, 0, 0))
            .map_err(|_| Error::DuplicateBinding {
                name: name.to_string(),
            })?;
        Ok(())
    }

    /// Register a host-owned string constant.
    pub fn bind_const_string(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.symbols
            .declare_const(name, ConstValue::Str(value.to_string()), Span::new(0, 0, 0))
            .map_err(|_| Error::DuplicateBinding {
                name: name.to_string(),
            })?;
        Ok(())
    }

    // ========================================================================
    // Compilation
    // ========================================================================

    /// Parse and compile `source`, labeled `label` in diagnostics.
    ///
    /// May be called repeatedly; each call appends to the same program.
    /// On error the state should be considered poisoned for further
    /// compilation, though diagnostics remain available.
    pub fn compile_string(&mut self, label: &str, source: &str) -> Result<(), Error> {
        let file_id = self.files.add(label.to_string(), source.to_string());
        self.last_file = Some(file_id);

        if self.compiled {
            // Drop the trailing halt so the new unit concatenates.
            self.program.code.pop();
            self.compiled = false;
        }

        let parser = Parser::new(source, &mut self.symbols)?;
        let (exprs, warnings) = parser.parse()?;
        self.warnings
            .extend(warnings.into_iter().map(|w| (file_id, w)));

        compile(&exprs, &mut self.symbols, &mut self.program)?;
        self.program.validate(self.foreign.len())?;
        self.compiled = true;
        Ok(())
    }

    /// Read `path` and compile its contents.
    pub fn compile_file(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.compile_string(&path.display().to_string(), &source)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// The global-variable index of `name`, if it names a global.
    pub fn global_index(&self, name: &str) -> Option<usize> {
        self.symbols.global_index(name)
    }

    /// The function index of `name`, if it names a user function.
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.symbols.function_index(name)
    }

    /// The compiled program image.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Number of global variables a thread must allocate.
    pub fn global_count(&self) -> usize {
        self.symbols.global_count()
    }

    /// The foreign callee at `index`.
    pub fn foreign_fn(&self, index: usize) -> Option<ForeignFn> {
        self.foreign.get(index).copied()
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Render `error` against the most recently compiled source: a
    /// source-context window with a caret plus a `label(line): message`
    /// note.
    pub fn report(
        &self,
        error: &Error,
        writer: &mut dyn WriteColor,
    ) -> Result<(), codespan_reporting::files::Error> {
        diagnostics::emit_error(&self.files, self.last_file, error, writer)
    }

    /// Warnings accumulated across all compilations.
    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().map(|(_, w)| w)
    }

    /// Render every accumulated warning.
    pub fn report_warnings(
        &self,
        writer: &mut dyn WriteColor,
    ) -> Result<(), codespan_reporting::files::Error> {
        for (file_id, warning) in &self.warnings {
            diagnostics::emit_warning(&self.files, *file_id, warning, writer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Thread, Value};
    use crate::VmResult;

    fn const_seven(_thread: &mut Thread<'_>, _args: &[Value]) -> VmResult<Value> {
        Ok(Value::Number(7.0))
    }

    #[test]
    fn test_compile_and_lookup() {
        let mut state = State::new();
        state.compile_string("test", "x := 1 func f() { return 2 }").unwrap();
        assert_eq!(state.global_index("x"), Some(0));
        assert_eq!(state.function_index("f"), Some(0));
        assert_eq!(state.global_index("f"), None);
        assert_eq!(state.function_index("missing"), None);
    }

    #[test]
    fn test_duplicate_function_binding_is_fatal() {
        let mut state = State::new();
        state.bind_function("host", const_seven).unwrap();
        assert!(matches!(
            state.bind_function("host", const_seven),
            Err(Error::DuplicateBinding { .. })
        ));
    }

    #[test]
    fn test_bound_constants_are_visible_to_scripts() {
        let mut state = State::new();
        state.bind_const_number("LIMIT", 10.0).unwrap();
        state.bind_const_string("NAME", "lark").unwrap();
        state.compile_string("test", "a := LIMIT b := NAME").unwrap();
    }

    #[test]
    fn test_binding_clash_with_const() {
        let mut state = State::new();
        state.bind_const_number("K", 1.0).unwrap();
        assert!(matches!(
            state.bind_const_number("K", 2.0),
            Err(Error::DuplicateBinding { .. })
        ));
    }

    #[test]
    fn test_repeated_compilation_concatenates() {
        let mut state = State::new();
        state.compile_string("first", "x := 1").unwrap();
        state.compile_string("second", "y := x + 1").unwrap();
        // One trailing halt; the first unit's halt was re-opened.
        let code = &state.program().code;
        let halts = code
            .iter()
            .filter(|&&b| b == crate::Opcode::Halt as u8)
            .count();
        assert_eq!(halts, 1);
        assert_eq!(state.global_index("y"), Some(1));
    }

    #[test]
    fn test_compile_error_is_recoverable() {
        let mut state = State::new();
        let err = state.compile_string("bad", "x := ").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}

//! Tree-to-bytecode lowering.
//!
//! A single pass over the parsed expression list. Statement-position
//! nodes compile to stack-balanced code; expression-position nodes
//! leave exactly one value. Control flow uses forward-patched jumps:
//! emit the opcode with a zero placeholder, compile the branch, then
//! overwrite the placeholder with the current program length.
//!
//! Identifiers the parser could not resolve are retried here against
//! the global scope, which is what makes forward references work;
//! names that still do not resolve are fatal.

use crate::bytecode::{Opcode, Program, ProgramError};
use lark_parser::symbols::SymbolKind;
use lark_parser::{BinaryOp, ConstValue, Expr, Span, SymbolTable, UnaryOp, VarSlot};
use thiserror::Error;

/// The reason a compilation failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileErrorKind {
    /// A name that resolves to nothing.
    #[error("`{name}` is not declared")]
    Undeclared {
        /// The unresolved name.
        name: String,
    },

    /// A call to a name that is not a function.
    #[error("`{name}` is not a function")]
    UndeclaredFunction {
        /// The unresolved callee.
        name: String,
    },

    /// Assignment to a `::` constant.
    #[error("cannot assign to constant `{name}`")]
    AssignmentToConst {
        /// The constant's name.
        name: String,
    },

    /// Assignment to a function name.
    #[error("cannot assign to function `{name}`")]
    AssignmentToFunction {
        /// The function's name.
        name: String,
    },

    /// An assignment or declaration used where a value is required.
    #[error("assignment cannot be used as an expression")]
    AssignmentAsExpression,

    /// A function name used where a value is required.
    #[error("function `{name}` cannot be used as a value")]
    FunctionAsValue {
        /// The function's name.
        name: String,
    },

    /// A statement form used where a value is required.
    #[error("this form does not produce a value")]
    NotAValue,

    /// A call with the wrong number of arguments for a user function.
    #[error("`{name}` takes {expected} argument(s), {found} given")]
    ArityMismatch {
        /// The callee.
        name: String,
        /// Declared parameter count.
        expected: usize,
        /// Arguments at the call site.
        found: usize,
    },

    /// A global declared but never given an initializing assignment.
    #[error("global `{name}` is never initialized")]
    UninitializedGlobal {
        /// The global's name.
        name: String,
    },

    /// A local declared but never given an initializing assignment.
    #[error("local `{name}` in function `{function}` is never initialized")]
    UninitializedLocal {
        /// The local's name.
        name: String,
        /// The enclosing function.
        function: String,
    },

    /// The program image hit a structural limit.
    #[error(transparent)]
    Program(#[from] ProgramError),
}

/// A compile error with its source location.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct CompileError {
    /// What went wrong.
    pub kind: CompileErrorKind,
    /// Where it went wrong.
    pub span: Span,
}

impl CompileError {
    fn new(kind: CompileErrorKind, span: Span) -> Self {
        CompileError { kind, span }
    }
}

/// Compile a parsed program into `program`, appending to existing code.
///
/// The symbol table is the one the parser populated; the compiler marks
/// initialization on it and sweeps it afterwards: every declared global
/// and local must have seen an initializing store.
pub fn compile(
    exprs: &[Expr],
    symbols: &mut SymbolTable,
    program: &mut Program,
) -> Result<(), CompileError> {
    let function_count = symbols.function_count();
    if program.function_pcs.len() < function_count {
        // Placeholder entries; validation rejects any left unset.
        program.function_pcs.resize(function_count, usize::MAX);
    }

    let mut compiler = Compiler { symbols, program };
    for expr in exprs {
        compiler.compile_statement(expr)?;
    }
    compiler.emit(Opcode::Halt, Span::new(0, 0, 0))?;
    compiler.check_initialized()
}

struct Compiler<'a> {
    symbols: &'a mut SymbolTable,
    program: &'a mut Program,
}

impl Compiler<'_> {
    // ========================================================================
    // Emission helpers (attach spans to program-limit errors)
    // ========================================================================

    fn emit(&mut self, op: Opcode, span: Span) -> Result<(), CompileError> {
        self.program
            .emit(op)
            .map_err(|e| CompileError::new(e.into(), span))
    }

    fn emit_op1(&mut self, op: Opcode, a: i32, span: Span) -> Result<(), CompileError> {
        self.program
            .emit_op1(op, a)
            .map_err(|e| CompileError::new(e.into(), span))
    }

    fn emit_op2(&mut self, op: Opcode, a: i32, b: i32, span: Span) -> Result<(), CompileError> {
        self.program
            .emit_op2(op, a, b)
            .map_err(|e| CompileError::new(e.into(), span))
    }

    fn emit_jump(&mut self, op: Opcode, span: Span) -> Result<usize, CompileError> {
        self.program
            .emit_jump(op)
            .map_err(|e| CompileError::new(e.into(), span))
    }

    fn register_number(&mut self, value: f64, span: Span) -> Result<i32, CompileError> {
        self.program
            .register_number(value)
            .map(|idx| idx as i32)
            .map_err(|e| CompileError::new(e.into(), span))
    }

    fn register_string(&mut self, value: &str, span: Span) -> Result<i32, CompileError> {
        self.program
            .register_string(value)
            .map(|idx| idx as i32)
            .map_err(|e| CompileError::new(e.into(), span))
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn resolve(
        &self,
        name: &str,
        slot: &Option<VarSlot>,
        span: Span,
    ) -> Result<VarSlot, CompileError> {
        slot.or_else(|| self.symbols.lookup_global(name))
            .ok_or_else(|| {
                CompileError::new(
                    CompileErrorKind::Undeclared {
                        name: name.to_string(),
                    },
                    span,
                )
            })
    }

    fn global_operand(&self, sym: usize) -> i32 {
        match self.symbols.symbol(sym).kind {
            SymbolKind::Global { index, .. } => index as i32,
            _ => unreachable!("VarSlot::Global always points at a global symbol"),
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn compile_statement(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Binary { op, lhs, rhs, span } if op.is_assignment() => {
                self.compile_assignment(*op, lhs, rhs, *span)
            }
            Expr::Call { .. } => {
                // Call-as-statement: the return register is simply not read.
                self.compile_call(expr)
            }
            Expr::Block { body, .. } => {
                for stmt in body {
                    self.compile_statement(stmt)?;
                }
                Ok(())
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
                span,
            } => {
                self.compile_expr(cond)?;
                let to_else = self.emit_jump(Opcode::GotoZ, *span)?;
                self.compile_statement(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let to_end = self.emit_jump(Opcode::Goto, *span)?;
                        self.program.patch_jump(to_else);
                        self.compile_statement(else_branch)?;
                        self.program.patch_jump(to_end);
                    }
                    None => self.program.patch_jump(to_else),
                }
                Ok(())
            }
            Expr::While { cond, body, span } => {
                let top = self.program.len();
                self.compile_expr(cond)?;
                let to_end = self.emit_jump(Opcode::GotoZ, *span)?;
                self.compile_statement(body)?;
                self.emit_op1(Opcode::Goto, top as i32, *span)?;
                self.program.patch_jump(to_end);
                Ok(())
            }
            Expr::For {
                init,
                cond,
                step,
                body,
                span,
            } => {
                self.compile_statement(init)?;
                let top = self.program.len();
                self.compile_expr(cond)?;
                let to_end = self.emit_jump(Opcode::GotoZ, *span)?;
                self.compile_statement(body)?;
                self.compile_statement(step)?;
                self.emit_op1(Opcode::Goto, top as i32, *span)?;
                self.program.patch_jump(to_end);
                Ok(())
            }
            Expr::Func {
                name, body, span, ..
            } => self.compile_func(name, body, *span),
            Expr::Return { value, span } => match value {
                Some(value) => {
                    self.compile_expr(value)?;
                    self.emit(Opcode::ReturnValue, *span)
                }
                None => self.emit(Opcode::Return, *span),
            },
            // Any other expression in statement position: evaluate and
            // discard, keeping the stack balanced.
            _ => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop, expr.span())
            }
        }
    }

    fn compile_assignment(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        span: Span,
    ) -> Result<(), CompileError> {
        if op == BinaryOp::DeclareConst {
            // The constant was bound at parse time; no code is emitted.
            return Ok(());
        }

        let Expr::Ident {
            name,
            slot,
            span: name_span,
        } = lhs
        else {
            return Err(CompileError::new(
                CompileErrorKind::AssignmentAsExpression,
                span,
            ));
        };

        let slot = self.resolve(name, slot, *name_span)?;
        match slot {
            VarSlot::Const(_) => {
                return Err(CompileError::new(
                    CompileErrorKind::AssignmentToConst { name: name.clone() },
                    *name_span,
                ))
            }
            VarSlot::Function(_) | VarSlot::Foreign(_) => {
                return Err(CompileError::new(
                    CompileErrorKind::AssignmentToFunction { name: name.clone() },
                    *name_span,
                ))
            }
            VarSlot::Global(_) | VarSlot::Local { .. } => {}
        }

        if let Some(apply) = op.compound_op() {
            // load / op / store
            self.compile_load(slot, *name_span)?;
            self.compile_expr(rhs)?;
            self.emit(binary_opcode(apply), span)?;
        } else {
            self.compile_expr(rhs)?;
        }

        self.compile_store(slot, *name_span)?;
        self.symbols.mark_initialized(slot);
        Ok(())
    }

    fn compile_load(&mut self, slot: VarSlot, span: Span) -> Result<(), CompileError> {
        match slot {
            VarSlot::Global(sym) => {
                let index = self.global_operand(sym);
                self.emit_op1(Opcode::GetGlobal, index, span)
            }
            VarSlot::Local { offset, .. } => self.emit_op1(Opcode::GetLocal, offset, span),
            _ => unreachable!("loads are only emitted for variables"),
        }
    }

    fn compile_store(&mut self, slot: VarSlot, span: Span) -> Result<(), CompileError> {
        match slot {
            VarSlot::Global(sym) => {
                let index = self.global_operand(sym);
                self.emit_op1(Opcode::SetGlobal, index, span)
            }
            VarSlot::Local { offset, .. } => self.emit_op1(Opcode::SetLocal, offset, span),
            _ => unreachable!("stores are only emitted for variables"),
        }
    }

    fn compile_func(&mut self, name: &str, body: &Expr, span: Span) -> Result<(), CompileError> {
        let Some(VarSlot::Function(sym)) = self.symbols.lookup_global(name) else {
            unreachable!("the parser declared every function it parsed")
        };
        let (function_index, local_count) = {
            let info = self
                .symbols
                .function_info(sym)
                .expect("function symbols carry function info");
            (info.index, info.locals.len())
        };

        // Bypass the body at the definition site.
        let skip = self.emit_jump(Opcode::Goto, span)?;

        self.program.function_pcs[function_index] = self.program.len();

        // Prologue: reserve one slot per local.
        let zero = self.register_number(0.0, span)?;
        for _ in 0..local_count {
            self.emit_op1(Opcode::PushNumber, zero, span)?;
        }

        self.compile_statement(body)?;

        // Fallthrough returns null.
        self.emit(Opcode::Return, span)?;
        self.program.patch_jump(skip);
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Null { span } => self.emit(Opcode::PushNull, *span),
            Expr::Bool { value, span } => self.emit(
                if *value {
                    Opcode::PushTrue
                } else {
                    Opcode::PushFalse
                },
                *span,
            ),
            Expr::Number { value, span } => {
                let idx = self.register_number(*value, *span)?;
                self.emit_op1(Opcode::PushNumber, idx, *span)
            }
            Expr::Str { value, span } => {
                let idx = self.register_string(value, *span)?;
                self.emit_op1(Opcode::PushString, idx, *span)
            }
            Expr::Ident { name, slot, span } => {
                let slot = self.resolve(name, slot, *span)?;
                match slot {
                    VarSlot::Global(_) | VarSlot::Local { .. } => self.compile_load(slot, *span),
                    VarSlot::Const(sym) => {
                        let value = match &self.symbols.symbol(sym).kind {
                            SymbolKind::Const(value) => value.clone(),
                            _ => unreachable!("VarSlot::Const always points at a constant"),
                        };
                        match value {
                            ConstValue::Number(n) => {
                                let idx = self.register_number(n, *span)?;
                                self.emit_op1(Opcode::PushNumber, idx, *span)
                            }
                            ConstValue::Str(s) => {
                                let idx = self.register_string(&s, *span)?;
                                self.emit_op1(Opcode::PushString, idx, *span)
                            }
                        }
                    }
                    VarSlot::Function(_) | VarSlot::Foreign(_) => Err(CompileError::new(
                        CompileErrorKind::FunctionAsValue { name: name.clone() },
                        *span,
                    )),
                }
            }
            Expr::Call { span, .. } => {
                self.compile_call(expr)?;
                // Call-as-expression reads the return register.
                self.emit(Opcode::GetRetval, *span)
            }
            Expr::Unary { op, operand, span } => match op {
                UnaryOp::Neg => {
                    // Lowered as operand * -1.
                    self.compile_expr(operand)?;
                    let idx = self.register_number(-1.0, *span)?;
                    self.emit_op1(Opcode::PushNumber, idx, *span)?;
                    self.emit(Opcode::Mul, *span)
                }
                UnaryOp::Pos => self.compile_expr(operand),
                UnaryOp::Not => {
                    self.compile_expr(operand)?;
                    self.emit(Opcode::LogNot, *span)
                }
            },
            Expr::Binary { op, lhs, rhs, span } => {
                if op.is_assignment() {
                    return Err(CompileError::new(
                        CompileErrorKind::AssignmentAsExpression,
                        *span,
                    ));
                }
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.emit(binary_opcode(*op), *span)?;
                if *op == BinaryOp::Ne {
                    // `!=` is equality followed by logical not.
                    self.emit(Opcode::LogNot, *span)?;
                }
                Ok(())
            }
            Expr::Paren { inner, .. } => self.compile_expr(inner),
            Expr::Block { span, .. }
            | Expr::Func { span, .. }
            | Expr::If { span, .. }
            | Expr::While { span, .. }
            | Expr::For { span, .. }
            | Expr::Return { span, .. } => {
                Err(CompileError::new(CompileErrorKind::NotAValue, *span))
            }
        }
    }

    fn compile_call(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let Expr::Call { name, args, span } = expr else {
            unreachable!("compile_call is only used on call nodes")
        };

        let slot = self.symbols.reference_function(name).ok_or_else(|| {
            CompileError::new(
                CompileErrorKind::UndeclaredFunction { name: name.clone() },
                *span,
            )
        })?;

        for arg in args {
            self.compile_expr(arg)?;
        }

        match slot {
            VarSlot::Function(sym) => {
                let info = self
                    .symbols
                    .function_info(sym)
                    .expect("function symbols carry function info");
                let (index, expected) = (info.index, info.args.len());
                if args.len() != expected {
                    return Err(CompileError::new(
                        CompileErrorKind::ArityMismatch {
                            name: name.clone(),
                            expected,
                            found: args.len(),
                        },
                        *span,
                    ));
                }
                self.emit_op2(Opcode::Call, args.len() as i32, index as i32, *span)
            }
            VarSlot::Foreign(sym) => {
                let index = match self.symbols.symbol(sym).kind {
                    SymbolKind::Foreign { index } => index,
                    _ => unreachable!("VarSlot::Foreign always points at a foreign symbol"),
                };
                self.emit_op2(Opcode::CallForeign, args.len() as i32, index as i32, *span)
            }
            _ => unreachable!("reference_function only returns callables"),
        }
    }

    // ========================================================================
    // Post-compilation checks
    // ========================================================================

    /// Every declared global and local must have been initialized;
    /// arguments are implicitly initialized by the caller.
    fn check_initialized(&self) -> Result<(), CompileError> {
        for symbol in self.symbols.symbols() {
            match &symbol.kind {
                SymbolKind::Global { initialized, .. } if !initialized => {
                    return Err(CompileError::new(
                        CompileErrorKind::UninitializedGlobal {
                            name: symbol.name.clone(),
                        },
                        symbol.span,
                    ));
                }
                SymbolKind::Function(info) => {
                    if let Some(local) = info.locals.iter().find(|l| !l.initialized) {
                        return Err(CompileError::new(
                            CompileErrorKind::UninitializedLocal {
                                name: local.name.clone(),
                                function: symbol.name.clone(),
                            },
                            local.span,
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
        BinaryOp::Eq | BinaryOp::Ne => Opcode::Eq,
        BinaryOp::LogAnd => Opcode::LogAnd,
        BinaryOp::LogOr => Opcode::LogOr,
        _ => unreachable!("assignment operators never reach binary_opcode"),
    }
}

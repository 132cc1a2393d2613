//! Lexer, parser, and symbol table for the Lark scripting language.
//!
//! Lark is a small procedural, dynamically typed language meant to be
//! embedded in a host application. This crate turns source text into an
//! expression tree plus a populated symbol table; the companion engine
//! crate lowers that tree to bytecode and executes it.
//!
//! Parsing is deliberately effectful: `:=`, `::`, and `func` declare
//! symbols while the tree is being built, so scope visibility is decided
//! here and the compiler only has to resolve what parsing deferred
//! (forward references to globals and functions).

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod token;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use error::{ParseError, ParseErrorKind, Warning};
pub use lexer::{LexError, LexErrorKind, Lexer};
pub use parser::Parser;
pub use symbols::{ConstValue, Symbol, SymbolKind, SymbolTable, VarSlot};
pub use token::{Span, Token};

/// Upper bound on arguments in a single call expression.
pub const MAX_CALL_ARGS: usize = 32;

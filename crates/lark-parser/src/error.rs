//! Parse errors and warnings.

use crate::token::{Span, Token};
use thiserror::Error;

/// The reason a parse failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    /// The parser met a token it cannot use here.
    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken {
        /// Human description of what was acceptable.
        expected: String,
        /// The token actually present.
        found: Token,
    },

    /// A `(` without a matching `)`.
    #[error("unmatched `(`")]
    UnmatchedParen,

    /// A `{` without a matching `}`.
    #[error("unmatched `{{`")]
    UnmatchedBrace,

    /// The three clauses of a `for` head must be separated by `;`.
    #[error("expected `;` between `for` clauses")]
    MissingForSemicolon,

    /// The left side of an assignment or declaration is not a name.
    #[error("assignment target must be an identifier")]
    AssignmentTarget,

    /// `::` requires a numeric or string literal on its right side.
    #[error("constant `{name}` must be bound to a numeric or string literal")]
    ConstNotLiteral {
        /// Name of the constant being declared.
        name: String,
    },

    /// A name was declared twice in the same scope.
    #[error("`{name}` is already declared (first declared on line {original_line})")]
    Redeclaration {
        /// The clashing name.
        name: String,
        /// Line of the first declaration.
        original_line: u32,
    },

    /// Function definitions cannot nest.
    #[error("function definitions cannot appear inside a function")]
    NestedFunction,

    /// `return` appeared at the top level.
    #[error("`return` outside of a function")]
    ReturnOutsideFunction,

    /// A call expression listed more arguments than the VM supports.
    #[error("call has too many arguments (limit {limit})")]
    TooManyArguments {
        /// The configured argument limit.
        limit: usize,
    },
}

/// A parse error with its source location.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct ParseError {
    /// What went wrong.
    pub kind: ParseErrorKind,
    /// Where it went wrong.
    pub span: Span,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, span: Span) -> Self {
        ParseError { kind, span }
    }
}

/// A non-fatal condition noticed during parsing.
///
/// The only current producer is a `::` declaration inside a function,
/// which still registers a global-scoped constant.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    /// Human-readable description.
    pub message: String,
    /// Where the condition was noticed.
    pub span: Span,
}

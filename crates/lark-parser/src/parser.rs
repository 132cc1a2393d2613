//! Recursive descent parser with precedence climbing.
//!
//! The parser owns token management and drives the symbol table:
//! `:=` declares a local (inside a function) or a global, `::` declares
//! a constant bound to a literal, and `func` declares a function and its
//! parameters. Blocks, `while` bodies, `for` heads, and function bodies
//! open and close lexical scopes as they are parsed.
//!
//! Identifier uses are resolved against the table as they are seen;
//! unresolved names are left for the compiler, which is what makes
//! forward references to functions and globals work.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{ParseError, ParseErrorKind, Warning};
use crate::lexer::{LexError, Lexer};
use crate::symbols::{ConstValue, SymbolError, SymbolTable};
use crate::token::{Span, Token};
use crate::MAX_CALL_ARGS;

/// Operator precedence level (higher binds tighter).
///
/// Unary operators are not listed: they bind tighter than any binary
/// operator by construction of the prefix parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None = 0,
    Assignment = 1,     // = += -= *= /= %= &= |= := ::
    Logical = 2,        // and or
    Comparison = 3,     // < > <= >= == !=
    Additive = 4,       // + -
    Multiplicative = 5, // * / % & |
}

/// Lowest precedence that still parses a full expression.
const PREC_EXPR: u8 = Precedence::Assignment as u8;

fn get_precedence(token: &Token) -> Precedence {
    match token {
        Token::Declare
        | Token::DeclareConst
        | Token::Equal
        | Token::PlusEqual
        | Token::MinusEqual
        | Token::StarEqual
        | Token::SlashEqual
        | Token::PercentEqual
        | Token::AmpEqual
        | Token::PipeEqual => Precedence::Assignment,

        Token::And | Token::Or => Precedence::Logical,

        Token::Less
        | Token::Greater
        | Token::LessEqual
        | Token::GreaterEqual
        | Token::EqualEqual
        | Token::BangEqual => Precedence::Comparison,

        Token::Plus | Token::Minus => Precedence::Additive,

        Token::Star | Token::Slash | Token::Percent | Token::Amp | Token::Pipe => {
            Precedence::Multiplicative
        }

        _ => Precedence::None,
    }
}

/// The assignment family is right-associative; everything else leans left.
fn is_right_associative(token: &Token) -> bool {
    get_precedence(token) == Precedence::Assignment
}

fn to_binary_op(token: &Token) -> Option<BinaryOp> {
    Some(match token {
        Token::Declare => BinaryOp::Declare,
        Token::DeclareConst => BinaryOp::DeclareConst,
        Token::Equal => BinaryOp::Assign,
        Token::PlusEqual => BinaryOp::AddAssign,
        Token::MinusEqual => BinaryOp::SubAssign,
        Token::StarEqual => BinaryOp::MulAssign,
        Token::SlashEqual => BinaryOp::DivAssign,
        Token::PercentEqual => BinaryOp::ModAssign,
        Token::AmpEqual => BinaryOp::AndAssign,
        Token::PipeEqual => BinaryOp::OrAssign,
        Token::And => BinaryOp::LogAnd,
        Token::Or => BinaryOp::LogOr,
        Token::Less => BinaryOp::Lt,
        Token::Greater => BinaryOp::Gt,
        Token::LessEqual => BinaryOp::Le,
        Token::GreaterEqual => BinaryOp::Ge,
        Token::EqualEqual => BinaryOp::Eq,
        Token::BangEqual => BinaryOp::Ne,
        Token::Plus => BinaryOp::Add,
        Token::Minus => BinaryOp::Sub,
        Token::Star => BinaryOp::Mul,
        Token::Slash => BinaryOp::Div,
        Token::Percent => BinaryOp::Mod,
        Token::Amp => BinaryOp::BitAnd,
        Token::Pipe => BinaryOp::BitOr,
        _ => return None,
    })
}

/// Parser for one source buffer.
///
/// The symbol table is borrowed, not owned, so successive compilations
/// into the same state share declarations.
pub struct Parser<'t> {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    symbols: &'t mut SymbolTable,
    warnings: Vec<Warning>,
}

impl<'t> Parser<'t> {
    /// Tokenize `source` and prepare to parse it.
    pub fn new(source: &str, symbols: &'t mut SymbolTable) -> Result<Self, LexError> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Parser {
            tokens,
            pos: 0,
            symbols,
            warnings: Vec::new(),
        })
    }

    /// Parse the whole buffer into a top-level expression list.
    pub fn parse(mut self) -> Result<(Vec<Expr>, Vec<Warning>), ParseError> {
        let mut program = Vec::new();
        while !self.at_eof() {
            program.push(self.parse_expression(PREC_EXPR)?);
        }
        Ok((program, self.warnings))
    }

    // ========================================================================
    // Token management
    // ========================================================================

    fn current(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].1
    }

    fn at_eof(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(expected)
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<Span, ParseError> {
        if self.check(&expected) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedToken {
                expected: expected.to_string(),
                found: self.current().clone(),
            },
            self.current_span(),
        )
    }

    fn symbol_error(err: SymbolError, span: Span) -> ParseError {
        match err {
            SymbolError::Redeclaration {
                name,
                original_line,
            } => ParseError::new(
                ParseErrorKind::Redeclaration {
                    name,
                    original_line,
                },
                span,
            ),
        }
    }

    // ========================================================================
    // Precedence climbing
    // ========================================================================

    fn parse_expression(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let prec = get_precedence(self.current()) as u8;
            if prec == Precedence::None as u8 || prec < min_prec {
                break;
            }
            let op_token = self.current().clone();
            let op_span = self.current_span();
            self.advance();

            let Some(op) = to_binary_op(&op_token) else {
                unreachable!("tokens with a precedence are binary operators")
            };

            lhs = match op {
                BinaryOp::Declare => self.parse_declare(lhs, op_span, prec)?,
                BinaryOp::DeclareConst => self.parse_declare_const(lhs, op_span, prec)?,
                _ => {
                    if op.is_assignment() && !matches!(lhs, Expr::Ident { .. }) {
                        return Err(ParseError::new(ParseErrorKind::AssignmentTarget, op_span));
                    }
                    // `prec < next` in the climb makes assignments
                    // right-associative and everything else left.
                    let rhs_min = if is_right_associative(&op_token) {
                        prec
                    } else {
                        prec + 1
                    };
                    let rhs = self.parse_expression(rhs_min)?;
                    let span = lhs.span().to(rhs.span());
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        span,
                    }
                }
            };
        }

        Ok(lhs)
    }

    /// `name := expr` — declare, then parse the initializer.
    fn parse_declare(&mut self, lhs: Expr, op_span: Span, prec: u8) -> Result<Expr, ParseError> {
        let Expr::Ident {
            name,
            span: name_span,
            ..
        } = lhs
        else {
            return Err(ParseError::new(ParseErrorKind::AssignmentTarget, op_span));
        };

        let slot = self
            .symbols
            .declare_variable(&name, name_span)
            .map_err(|e| Self::symbol_error(e, name_span))?;

        let rhs = self.parse_expression(prec)?;
        let span = name_span.to(rhs.span());
        Ok(Expr::Binary {
            op: BinaryOp::Declare,
            lhs: Box::new(Expr::Ident {
                name,
                slot: Some(slot),
                span: name_span,
            }),
            rhs: Box::new(rhs),
            span,
        })
    }

    /// `name :: literal` — the right side must be a literal.
    fn parse_declare_const(
        &mut self,
        lhs: Expr,
        op_span: Span,
        prec: u8,
    ) -> Result<Expr, ParseError> {
        let Expr::Ident {
            name,
            span: name_span,
            ..
        } = lhs
        else {
            return Err(ParseError::new(ParseErrorKind::AssignmentTarget, op_span));
        };

        let rhs = self.parse_expression(prec)?;
        let value = match &rhs {
            Expr::Number { value, .. } => ConstValue::Number(*value),
            Expr::Str { value, .. } => ConstValue::Str(value.clone()),
            other => {
                return Err(ParseError::new(
                    ParseErrorKind::ConstNotLiteral { name },
                    other.span(),
                ))
            }
        };

        if self.symbols.in_function() {
            self.warnings.push(Warning {
                message: format!("constant `{name}` declared inside a function is global-scoped"),
                span: name_span,
            });
        }

        let slot = self
            .symbols
            .declare_const(&name, value, name_span)
            .map_err(|e| Self::symbol_error(e, name_span))?;

        let span = name_span.to(rhs.span());
        Ok(Expr::Binary {
            op: BinaryOp::DeclareConst,
            lhs: Box::new(Expr::Ident {
                name,
                slot: Some(slot),
                span: name_span,
            }),
            rhs: Box::new(rhs),
            span,
        })
    }

    // ========================================================================
    // Prefix forms
    // ========================================================================

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let span = self.current_span();
        match self.current().clone() {
            Token::Null => {
                self.advance();
                Ok(Expr::Null { span })
            }
            Token::True => {
                self.advance();
                Ok(Expr::Bool { value: true, span })
            }
            Token::False => {
                self.advance();
                Ok(Expr::Bool { value: false, span })
            }
            Token::Number(value) => {
                self.advance();
                Ok(Expr::Number { value, span })
            }
            Token::Str(value) => {
                self.advance();
                Ok(Expr::Str { value, span })
            }
            Token::Ident(name) => {
                self.advance();
                if self.check(&Token::LeftParen) {
                    self.parse_call(name, span)
                } else {
                    let slot = self.symbols.reference_variable(&name);
                    Ok(Expr::Ident { name, slot, span })
                }
            }
            Token::Minus => self.parse_unary(UnaryOp::Neg, span),
            Token::Plus => self.parse_unary(UnaryOp::Pos, span),
            Token::Not => self.parse_unary(UnaryOp::Not, span),
            Token::LeftParen => {
                self.advance();
                let inner = self.parse_expression(PREC_EXPR)?;
                if !self.check(&Token::RightParen) {
                    return Err(ParseError::new(ParseErrorKind::UnmatchedParen, span));
                }
                let close = self.current_span();
                self.advance();
                Ok(Expr::Paren {
                    inner: Box::new(inner),
                    span: span.to(close),
                })
            }
            Token::LeftBrace => self.parse_block(span),
            Token::If => self.parse_if(span),
            Token::While => self.parse_while(span),
            Token::For => self.parse_for(span),
            Token::Func => self.parse_func(span),
            Token::Return => self.parse_return(span),
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_unary(&mut self, op: UnaryOp, span: Span) -> Result<Expr, ParseError> {
        self.advance();
        // Unary operators bind tighter than any binary operator.
        let operand = self.parse_prefix()?;
        let span = span.to(operand.span());
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn parse_call(&mut self, name: String, name_span: Span) -> Result<Expr, ParseError> {
        self.advance(); // (
        let mut args = Vec::new();
        if !self.check(&Token::RightParen) {
            loop {
                args.push(self.parse_expression(PREC_EXPR)?);
                if args.len() > MAX_CALL_ARGS {
                    return Err(ParseError::new(
                        ParseErrorKind::TooManyArguments {
                            limit: MAX_CALL_ARGS,
                        },
                        self.current_span(),
                    ));
                }
                if self.check(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let close = self.expect(Token::RightParen, "`,` or `)` in argument list")?;
        Ok(Expr::Call {
            name,
            args,
            span: name_span.to(close),
        })
    }

    fn parse_block(&mut self, open: Span) -> Result<Expr, ParseError> {
        self.advance(); // {
        self.symbols.open_scope();
        let mut body = Vec::new();
        loop {
            if self.check(&Token::RightBrace) {
                break;
            }
            if self.at_eof() {
                self.symbols.close_scope();
                return Err(ParseError::new(ParseErrorKind::UnmatchedBrace, open));
            }
            body.push(self.parse_expression(PREC_EXPR)?);
        }
        let close = self.current_span();
        self.advance(); // }
        self.symbols.close_scope();
        Ok(Expr::Block {
            body,
            span: open.to(close),
        })
    }

    fn parse_if(&mut self, span: Span) -> Result<Expr, ParseError> {
        self.advance();
        let cond = self.parse_expression(PREC_EXPR)?;
        let then_branch = self.parse_expression(PREC_EXPR)?;
        let else_branch = if self.check(&Token::Else) {
            self.advance();
            Some(Box::new(self.parse_expression(PREC_EXPR)?))
        } else {
            None
        };
        let end = else_branch
            .as_deref()
            .map(Expr::span)
            .unwrap_or_else(|| then_branch.span());
        Ok(Expr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch,
            span: span.to(end),
        })
    }

    fn parse_while(&mut self, span: Span) -> Result<Expr, ParseError> {
        self.advance();
        let cond = self.parse_expression(PREC_EXPR)?;
        self.symbols.open_scope();
        let body = self.parse_expression(PREC_EXPR);
        self.symbols.close_scope();
        let body = body?;
        let span = span.to(body.span());
        Ok(Expr::While {
            cond: Box::new(cond),
            body: Box::new(body),
            span,
        })
    }

    fn parse_for(&mut self, span: Span) -> Result<Expr, ParseError> {
        self.advance();
        // The head and the body share one scope.
        self.symbols.open_scope();
        let result = self.parse_for_clauses(span);
        self.symbols.close_scope();
        result
    }

    fn parse_for_clauses(&mut self, span: Span) -> Result<Expr, ParseError> {
        let init = self.parse_expression(PREC_EXPR)?;
        self.expect_for_semicolon()?;
        let cond = self.parse_expression(PREC_EXPR)?;
        self.expect_for_semicolon()?;
        let step = self.parse_expression(PREC_EXPR)?;
        let body = self.parse_expression(PREC_EXPR)?;
        let full = span.to(body.span());
        Ok(Expr::For {
            init: Box::new(init),
            cond: Box::new(cond),
            step: Box::new(step),
            body: Box::new(body),
            span: full,
        })
    }

    fn expect_for_semicolon(&mut self) -> Result<(), ParseError> {
        if self.check(&Token::Semicolon) {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::new(
                ParseErrorKind::MissingForSemicolon,
                self.current_span(),
            ))
        }
    }

    fn parse_func(&mut self, span: Span) -> Result<Expr, ParseError> {
        if self.symbols.in_function() {
            return Err(ParseError::new(ParseErrorKind::NestedFunction, span));
        }
        self.advance();

        let name_span = self.current_span();
        let Token::Ident(name) = self.current().clone() else {
            return Err(self.unexpected("function name"));
        };
        self.advance();

        self.symbols
            .declare_function(&name, name_span)
            .map_err(|e| Self::symbol_error(e, name_span))?;

        let result = self.parse_func_rest(&name, span);
        self.symbols.end_function();
        result
    }

    fn parse_func_rest(&mut self, name: &str, span: Span) -> Result<Expr, ParseError> {
        self.expect(Token::LeftParen, "`(` after function name")?;
        self.symbols.open_scope();

        let result = (|| {
            let mut params = Vec::new();
            if !self.check(&Token::RightParen) {
                loop {
                    let param_span = self.current_span();
                    let Token::Ident(param) = self.current().clone() else {
                        return Err(self.unexpected("parameter name"));
                    };
                    self.advance();
                    self.symbols
                        .add_param(&param, param_span)
                        .map_err(|e| Self::symbol_error(e, param_span))?;
                    params.push(param);
                    if self.check(&Token::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.expect(Token::RightParen, "`,` or `)` in parameter list")?;
            self.symbols.seal_params();

            let body = self.parse_expression(PREC_EXPR)?;
            let full = span.to(body.span());
            Ok(Expr::Func {
                name: name.to_string(),
                params,
                body: Box::new(body),
                span: full,
            })
        })();

        self.symbols.close_scope();
        result
    }

    fn parse_return(&mut self, span: Span) -> Result<Expr, ParseError> {
        if !self.symbols.in_function() {
            return Err(ParseError::new(
                ParseErrorKind::ReturnOutsideFunction,
                span,
            ));
        }
        self.advance();
        let value = if self.current().starts_expression() {
            Some(Box::new(self.parse_expression(PREC_EXPR)?))
        } else {
            None
        };
        let end = value.as_deref().map(Expr::span).unwrap_or(span);
        Ok(Expr::Return {
            value,
            span: span.to(end),
        })
    }
}

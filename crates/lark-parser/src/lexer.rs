//! Lexer for the Lark scripting language.
//!
//! Tokenization is done with a logos-generated machine over the raw byte
//! stream; a thin wrapper tracks line numbers and folds char literals
//! into number tokens. Escape processing happens in callbacks so that a
//! bad escape surfaces as a lex error with a precise span rather than a
//! mangled literal.

use crate::token::{Span, Token};
use logos::Logos;
use thiserror::Error;

/// What went wrong while scanning a single token.
#[derive(Debug, Clone, PartialEq, Default, Error)]
pub enum LexErrorKind {
    /// A byte that cannot begin any token.
    #[default]
    #[error("unexpected character")]
    UnexpectedCharacter,

    /// An escape sequence outside the supported set.
    #[error("unknown escape sequence `\\{0}`")]
    BadEscape(char),

    /// A string literal missing its closing quote on the same line.
    #[error("unterminated string literal")]
    UnterminatedString,

    /// A char literal that is empty, unclosed, or holds more than one
    /// character.
    #[error("malformed character literal")]
    MalformedChar,

    /// A numeric literal that does not scan as a double.
    #[error("malformed number `{0}`")]
    MalformedNumber(String),
}

/// A lex error with the span of the offending token.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct LexError {
    /// The error category.
    pub kind: LexErrorKind,
    /// Where the bad token sits in the source.
    pub span: Span,
}

/// Internal logos token set. Converted to [`Token`] by the wrapper.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexErrorKind)]
enum RawToken {
    #[regex(r"[ \t\r\n]+", logos::skip)]
    Whitespace,

    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    // Keywords (exact tokens outrank the identifier regex)
    #[token("func")]
    Func,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("return")]
    Return,
    #[token("not")]
    Not,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[regex(r"[A-Za-z][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9][0-9.]*", parse_number)]
    Number(f64),

    // Char literals carry their byte value as a number.
    #[regex(r"'([^'\\\n]|\\[^\n])'", parse_char)]
    #[regex(r"'([^'\\\n]|\\[^\n])?", malformed_char)]
    Char(f64),

    #[regex(r#""([^"\\\n]|\\[^\n])*""#, parse_string)]
    #[regex(r#""([^"\\\n]|\\[^\n])*"#, unterminated_string)]
    Str(String),

    // Two-character operators
    #[token(":=")]
    Declare,
    #[token("::")]
    DeclareConst,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    BangEqual,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("+=")]
    PlusEqual,
    #[token("-=")]
    MinusEqual,
    #[token("*=")]
    StarEqual,
    #[token("/=")]
    SlashEqual,
    #[token("%=")]
    PercentEqual,
    #[token("&=")]
    AmpEqual,
    #[token("|=")]
    PipeEqual,

    // Single-character operators
    #[token("=")]
    Equal,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
}

fn parse_number(lex: &mut logos::Lexer<'_, RawToken>) -> Result<f64, LexErrorKind> {
    lex.slice()
        .parse()
        .map_err(|_| LexErrorKind::MalformedNumber(lex.slice().to_string()))
}

fn parse_char(lex: &mut logos::Lexer<'_, RawToken>) -> Result<f64, LexErrorKind> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut chars = inner.chars();
    let value = match chars.next() {
        Some('\\') => {
            // Same escape set as strings, minus octal.
            let escape = chars.next().ok_or(LexErrorKind::MalformedChar)?;
            unescape_one(escape).ok_or(LexErrorKind::BadEscape(escape))?
        }
        Some(c) if c.is_ascii() => c as u8,
        _ => return Err(LexErrorKind::MalformedChar),
    };
    Ok(value as f64)
}

fn malformed_char(_lex: &mut logos::Lexer<'_, RawToken>) -> Result<f64, LexErrorKind> {
    Err(LexErrorKind::MalformedChar)
}

fn parse_string(lex: &mut logos::Lexer<'_, RawToken>) -> Result<String, LexErrorKind> {
    let slice = lex.slice();
    unescape_string(&slice[1..slice.len() - 1])
}

fn unterminated_string(_lex: &mut logos::Lexer<'_, RawToken>) -> Result<String, LexErrorKind> {
    Err(LexErrorKind::UnterminatedString)
}

/// Resolve a single-character escape to its byte value.
fn unescape_one(escape: char) -> Option<u8> {
    match escape {
        'n' => Some(b'\n'),
        'r' => Some(b'\r'),
        't' => Some(b'\t'),
        'b' => Some(0x08),
        'a' => Some(0x07),
        'v' => Some(0x0B),
        'f' => Some(0x0C),
        '\\' => Some(b'\\'),
        '"' => Some(b'"'),
        '\'' => Some(b'\''),
        _ => None,
    }
}

/// Process the body of a string literal, resolving escapes.
///
/// Strings additionally accept three-digit octal escapes (`\ddd`); char
/// literals do not.
fn unescape_string(body: &str) -> Result<String, LexErrorKind> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escape = chars.next().ok_or(LexErrorKind::UnterminatedString)?;
        if escape.is_ascii_digit() {
            // Exactly three octal digits, reduced mod 256. The value
            // denotes the scalar U+0000..U+00FF, so escapes in
            // 128..=255 occupy two bytes of the backing UTF-8.
            let mut value = escape.to_digit(8).ok_or(LexErrorKind::BadEscape(escape))?;
            for _ in 0..2 {
                let digit = chars
                    .next()
                    .and_then(|d| d.to_digit(8))
                    .ok_or(LexErrorKind::BadEscape(escape))?;
                value = value * 8 + digit;
            }
            out.push(char::from((value % 256) as u8));
        } else {
            let byte = unescape_one(escape).ok_or(LexErrorKind::BadEscape(escape))?;
            out.push(byte as char);
        }
    }
    Ok(out)
}

/// Tokenizes a source buffer into a `(Token, Span)` stream.
pub struct Lexer<'a> {
    source: &'a str,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `source`.
    pub fn new(source: &'a str) -> Self {
        Lexer { source }
    }

    /// Scan the whole buffer, stopping at the first error.
    ///
    /// The returned stream always ends with a [`Token::Eof`] sentinel.
    pub fn tokenize(self) -> Result<Vec<(Token, Span)>, LexError> {
        let mut raw = RawToken::lexer(self.source);
        let mut tokens = Vec::new();
        let mut line = 1u32;
        let mut scanned_to = 0usize;

        while let Some(result) = raw.next() {
            let range = raw.span();
            line += count_newlines(&self.source[scanned_to..range.start]);
            scanned_to = range.start;
            let span = Span::new(range.start, range.end, line);

            match result {
                Ok(token) => tokens.push((convert(token), span)),
                Err(kind) => return Err(LexError { kind, span }),
            }

            line += count_newlines(&self.source[range.start..range.end]);
            scanned_to = range.end;
        }

        line += count_newlines(&self.source[scanned_to..]);
        let end = self.source.len();
        tokens.push((Token::Eof, Span::new(end, end, line)));
        Ok(tokens)
    }
}

fn count_newlines(text: &str) -> u32 {
    text.bytes().filter(|&b| b == b'\n').count() as u32
}

fn convert(raw: RawToken) -> Token {
    match raw {
        RawToken::Func => Token::Func,
        RawToken::If => Token::If,
        RawToken::Else => Token::Else,
        RawToken::While => Token::While,
        RawToken::For => Token::For,
        RawToken::Return => Token::Return,
        RawToken::Not => Token::Not,
        RawToken::And => Token::And,
        RawToken::Or => Token::Or,
        RawToken::Null => Token::Null,
        RawToken::True => Token::True,
        RawToken::False => Token::False,
        RawToken::Ident(name) => Token::Ident(name),
        RawToken::Number(value) => Token::Number(value),
        RawToken::Char(value) => Token::Number(value),
        RawToken::Str(value) => Token::Str(value),
        RawToken::Declare => Token::Declare,
        RawToken::DeclareConst => Token::DeclareConst,
        RawToken::EqualEqual => Token::EqualEqual,
        RawToken::BangEqual => Token::BangEqual,
        RawToken::LessEqual => Token::LessEqual,
        RawToken::GreaterEqual => Token::GreaterEqual,
        RawToken::PlusEqual => Token::PlusEqual,
        RawToken::MinusEqual => Token::MinusEqual,
        RawToken::StarEqual => Token::StarEqual,
        RawToken::SlashEqual => Token::SlashEqual,
        RawToken::PercentEqual => Token::PercentEqual,
        RawToken::AmpEqual => Token::AmpEqual,
        RawToken::PipeEqual => Token::PipeEqual,
        RawToken::Equal => Token::Equal,
        RawToken::Less => Token::Less,
        RawToken::Greater => Token::Greater,
        RawToken::Plus => Token::Plus,
        RawToken::Minus => Token::Minus,
        RawToken::Star => Token::Star,
        RawToken::Slash => Token::Slash,
        RawToken::Percent => Token::Percent,
        RawToken::Amp => Token::Amp,
        RawToken::Pipe => Token::Pipe,
        RawToken::LeftParen => Token::LeftParen,
        RawToken::RightParen => Token::RightParen,
        RawToken::LeftBrace => Token::LeftBrace,
        RawToken::RightBrace => Token::RightBrace,
        RawToken::Comma => Token::Comma,
        RawToken::Semicolon => Token::Semicolon,
        RawToken::Whitespace | RawToken::LineComment => {
            unreachable!("whitespace and comments are skipped")
        }
    }
}

//! Whole-program parsing tests over realistic sources.

use lark_parser::{Expr, Parser, SymbolTable, Token, Lexer};

const SAMPLE: &str = r#"
// Day counter with a host-supplied clock.
SECONDS_PER_DAY :: 86400

func days(seconds) {
    whole := 0
    while seconds >= SECONDS_PER_DAY {
        seconds -= SECONDS_PER_DAY
        whole += 1
    }
    return whole
}

elapsed := 200000
d := days(elapsed)
"#;

#[test]
fn test_token_stream_of_realistic_program() {
    let tokens = Lexer::new(SAMPLE).tokenize().unwrap();
    assert!(tokens.len() > 30);
    assert_eq!(tokens.last().unwrap().0, Token::Eof);
    // Comments never reach the stream.
    assert!(!tokens
        .iter()
        .any(|(t, _)| matches!(t, Token::Ident(name) if name == "Day")));
}

#[test]
fn test_realistic_program_parses() {
    let mut symbols = SymbolTable::new();
    let parser = Parser::new(SAMPLE, &mut symbols).unwrap();
    let (program, warnings) = parser.parse().unwrap();

    assert!(warnings.is_empty());
    assert_eq!(program.len(), 4);
    assert!(matches!(&program[1], Expr::Func { name, .. } if name == "days"));

    assert_eq!(symbols.function_index("days"), Some(0));
    assert_eq!(symbols.global_index("elapsed"), Some(0));
    assert_eq!(symbols.global_index("d"), Some(1));
    // The constant has no global slot.
    assert_eq!(symbols.global_index("SECONDS_PER_DAY"), None);
}

#[test]
fn test_function_locals_and_params_recorded() {
    let mut symbols = SymbolTable::new();
    let parser = Parser::new(SAMPLE, &mut symbols).unwrap();
    parser.parse().unwrap();

    let info = symbols.function_info(1).unwrap_or_else(|| {
        // Symbol positions: 0 is the constant, 1 is the function.
        panic!("expected function info at symbol position 1")
    });
    assert_eq!(info.args.len(), 1);
    assert_eq!(info.args[0].offset, -1);
    assert_eq!(info.locals.len(), 1);
    assert_eq!(info.locals[0].name, "whole");
}

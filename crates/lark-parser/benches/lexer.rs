use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lark_parser::{Lexer, Parser, SymbolTable};

fn sample_source() -> String {
    let mut source = String::new();
    source.push_str("total :: 64\n");
    for i in 0..200 {
        source.push_str(&format!(
            "func step{i}(a, b) {{\n    v := a * 2 + b % 3\n    if v >= 10 {{ return v - 1 }}\n    return v\n}}\n"
        ));
    }
    source.push_str("acc := 0\nfor i := 0; i < 100; i += 1 { acc += i } // tail\n");
    source
}

fn bench_lexer(c: &mut Criterion) {
    let source = sample_source();
    c.bench_function("lex_200_functions", |b| {
        b.iter(|| {
            let tokens = Lexer::new(black_box(&source)).tokenize().unwrap();
            black_box(tokens)
        })
    });
}

fn bench_parser(c: &mut Criterion) {
    let source = sample_source();
    c.bench_function("parse_200_functions", |b| {
        b.iter(|| {
            let mut symbols = SymbolTable::new();
            let parser = Parser::new(black_box(&source), &mut symbols).unwrap();
            black_box(parser.parse().unwrap())
        })
    });
}

criterion_group!(benches, bench_lexer, bench_parser);
criterion_main!(benches);

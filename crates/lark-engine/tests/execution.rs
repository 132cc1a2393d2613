//! End-to-end tests: compile Lark source and run it on a thread.

use lark_engine::{State, Thread, Value, VmError, VmResult};
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

/// An output sink the test can read back after the thread ran.
#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn print_value(thread: &mut Thread<'_>, args: &[Value]) -> VmResult<Value> {
    thread.print(&args[0])?;
    Ok(Value::Null)
}

/// Compile `source`, run it to completion, and hand the state and
/// thread to the inspection closure.
fn eval<R>(source: &str, inspect: impl FnOnce(&State, &mut Thread<'_>) -> R) -> R {
    let mut state = State::new();
    state.compile_string("test", source).unwrap();
    let mut thread = Thread::new(&state);
    thread.start();
    thread.run().unwrap();
    inspect(&state, &mut thread)
}

fn global_value(source: &str, name: &str) -> Value {
    eval(source, |state, thread| {
        let idx = state
            .global_index(name)
            .unwrap_or_else(|| panic!("no global `{name}`"));
        thread.global(idx).unwrap()
    })
}

fn global_number(source: &str, name: &str) -> f64 {
    global_value(source, name)
        .as_number()
        .expect("expected a number")
}

fn global_bool(source: &str, name: &str) -> bool {
    global_value(source, name)
        .as_bool()
        .expect("expected a bool")
}

// ============================================================================
// Arithmetic and globals
// ============================================================================

#[test]
fn test_arithmetic_and_globals() {
    let mut state = State::new();
    state.bind_function("print", print_value).unwrap();
    state
        .compile_string("test", "x := 1 + 2 * 3 print(x)")
        .unwrap();

    let out = SharedBuffer::default();
    let mut thread = Thread::new(&state);
    thread.set_output(Box::new(out.clone()));
    thread.start();
    thread.run().unwrap();

    let idx = state.global_index("x").unwrap();
    assert_eq!(thread.global(idx).unwrap().as_number(), Some(7.0));
    assert_eq!(out.contents(), "7\n");
}

#[test]
fn test_precedence_with_parens() {
    assert_eq!(global_number("x := (1 + 2) * 3", "x"), 9.0);
}

#[test]
fn test_division_and_negation() {
    assert_eq!(global_number("x := -10 / 4", "x"), -2.5);
}

#[test]
fn test_integer_ops_truncate() {
    assert_eq!(global_number("x := 7.9 % 3", "x"), 1.0);
    assert_eq!(global_number("x := 6 & 3", "x"), 2.0);
    assert_eq!(global_number("x := 6 | 3", "x"), 7.0);
}

#[test]
fn test_char_literals_are_byte_values() {
    assert_eq!(global_number("x := 'A'", "x"), 65.0);
    assert_eq!(global_number(r"x := '\n'", "x"), 10.0);
}

// ============================================================================
// Conditional branching
// ============================================================================

#[test]
fn test_conditional_branching() {
    let source = "func abs(n) { if n < 0 { return -n } return n } y := abs(-5)";
    assert_eq!(global_number(source, "y"), 5.0);
}

#[test]
fn test_else_branch() {
    let source = "func sign(n) { if n < 0 { return -1 } else { return 1 } } a := sign(-9) b := sign(9)";
    eval(source, |state, thread| {
        assert_eq!(
            thread
                .global(state.global_index("a").unwrap())
                .unwrap()
                .as_number(),
            Some(-1.0)
        );
        assert_eq!(
            thread
                .global(state.global_index("b").unwrap())
                .unwrap()
                .as_number(),
            Some(1.0)
        );
    });
}

#[test]
fn test_logical_operators() {
    assert_eq!(global_bool("r := true and not false", "r"), true);
    assert_eq!(global_bool("r := false or false", "r"), false);
}

// ============================================================================
// Loops
// ============================================================================

#[test]
fn test_for_loop_accumulator() {
    let source = "s := 0 for i := 0; i < 10; i += 1 { s += i }";
    assert_eq!(global_number(source, "s"), 45.0);
}

#[test]
fn test_while_loop() {
    let source = "n := 32 steps := 0 while n > 1 { n /= 2 steps += 1 }";
    assert_eq!(global_number(source, "steps"), 5.0);
}

#[test]
fn test_nested_loops() {
    let source = "total := 0 for i := 0; i < 3; i += 1 { for j := 0; j < 4; j += 1 { total += 1 } }";
    assert_eq!(global_number(source, "total"), 12.0);
}

// ============================================================================
// Strings and constants
// ============================================================================

#[test]
fn test_string_equality_const_vs_owned() {
    let source = r#"a :: "hi" b := "hi" r := (a == b)"#;
    assert_eq!(global_bool(source, "r"), true);
}

#[test]
fn test_string_inequality() {
    let source = r#"r := ("left" != "right")"#;
    assert_eq!(global_bool(source, "r"), true);
}

#[test]
fn test_numeric_const() {
    let source = "limit :: 10 r := limit * 2";
    assert_eq!(global_number(source, "r"), 20.0);
}

#[test]
fn test_null_equality() {
    assert_eq!(global_bool("r := (null == null)", "r"), true);
    assert_eq!(global_bool("r := (null == false)", "r"), false);
}

// ============================================================================
// Functions and the call protocol
// ============================================================================

#[test]
fn test_recursion() {
    let source = "func fib(n) { if n < 2 { return n } return fib(n - 1) + fib(n - 2) } r := fib(10)";
    assert_eq!(global_number(source, "r"), 55.0);
}

#[test]
fn test_multiple_arguments_address_correctly() {
    let source = "func pick(a, b, c) { return b } r := pick(1, 2, 3)";
    assert_eq!(global_number(source, "r"), 2.0);
}

#[test]
fn test_bare_return_yields_null() {
    let source = "func nothing() { return } r := (nothing() == null)";
    assert_eq!(global_bool(source, "r"), true);
}

#[test]
fn test_fallthrough_return_yields_null() {
    let source = "func nothing() { x := 1 } r := (nothing() == null)";
    assert_eq!(global_bool(source, "r"), true);
}

#[test]
fn test_stack_balanced_after_calls() {
    let source = "func f(a, b) { return a + b } x := f(1, 2) y := f(f(3, 4), 5)";
    eval(source, |_, thread| {
        assert_eq!(thread.stack_depth(), 0);
    });
}

#[test]
fn test_locals_do_not_leak_between_calls() {
    let source = "func bump(n) { v := n + 1 return v } a := bump(1) b := bump(10)";
    eval(source, |state, thread| {
        assert_eq!(
            thread
                .global(state.global_index("a").unwrap())
                .unwrap()
                .as_number(),
            Some(2.0)
        );
        assert_eq!(
            thread
                .global(state.global_index("b").unwrap())
                .unwrap()
                .as_number(),
            Some(11.0)
        );
    });
}

#[test]
fn test_scope_shadowing_at_runtime() {
    // Inner block shadows, sibling block reuses the name independently.
    let source = "func f() { x := 1 { x := 10 } { x := 100 } return x } r := f()";
    assert_eq!(global_number(source, "r"), 1.0);
}

// ============================================================================
// Re-entrant calls
// ============================================================================

#[test]
fn test_call_function_matches_script_result() {
    let source = "func add(a, b) { return a + b } r := add(2, 3)";
    eval(source, |state, thread| {
        let script = thread
            .global(state.global_index("r").unwrap())
            .unwrap()
            .as_number()
            .unwrap();
        let direct = thread
            .call_function(
                state.function_index("add").unwrap(),
                &[Value::Number(2.0), Value::Number(3.0)],
            )
            .unwrap()
            .as_number()
            .unwrap();
        assert_eq!(script, direct);
    });
}

#[test]
fn test_call_function_restores_thread_exactly() {
    let source = "func id(x) { return x } r := id(1)";
    eval(source, |state, thread| {
        let depth = thread.stack_depth();
        let before_done = thread.is_done();
        let result = thread
            .call_function(state.function_index("id").unwrap(), &[Value::Number(9.0)])
            .unwrap();
        assert_eq!(result.as_number(), Some(9.0));
        assert_eq!(thread.stack_depth(), depth);
        assert_eq!(thread.is_done(), before_done);
    });
}

// ============================================================================
// Host control and globals access
// ============================================================================

#[test]
fn test_set_global_before_start() {
    let mut state = State::new();
    state.compile_string("test", "x := 1 y := x + 1").unwrap();
    let mut thread = Thread::new(&state);
    // Host-seeded value is overwritten by the program's own store.
    thread
        .set_global(state.global_index("x").unwrap(), Value::Number(50.0))
        .unwrap();
    thread.start();
    thread.run().unwrap();
    assert_eq!(
        thread
            .global(state.global_index("y").unwrap())
            .unwrap()
            .as_number(),
        Some(2.0)
    );
}

#[test]
fn test_stop_between_cycles() {
    let mut state = State::new();
    state
        .compile_string("test", "s := 0 while true { s += 1 }")
        .unwrap();
    let mut thread = Thread::new(&state);
    thread.start();
    for _ in 0..100 {
        thread.execute_cycle().unwrap();
    }
    assert!(!thread.is_done());
    thread.stop();
    assert!(thread.is_done());
    assert!(!thread.execute_cycle().unwrap());
}

#[test]
fn test_two_threads_do_not_share_globals() {
    let mut state = State::new();
    state.compile_string("test", "x := 1").unwrap();
    let idx = state.global_index("x").unwrap();

    let mut a = Thread::new(&state);
    let mut b = Thread::new(&state);
    a.start();
    a.run().unwrap();
    b.start();
    b.run().unwrap();

    a.set_global(idx, Value::Number(99.0)).unwrap();
    assert_eq!(b.global(idx).unwrap().as_number(), Some(1.0));
}

// ============================================================================
// Runtime errors
// ============================================================================

#[test]
fn test_logical_op_on_number_fails() {
    let mut state = State::new();
    state.compile_string("test", "r := 1 and 2").unwrap();
    let mut thread = Thread::new(&state);
    thread.start();
    assert!(matches!(
        thread.run().unwrap_err(),
        VmError::TypeError { expected: "bool", .. }
    ));
}

#[test]
fn test_arithmetic_on_string_fails() {
    let mut state = State::new();
    state.compile_string("test", r#"r := "a" + 1"#).unwrap();
    let mut thread = Thread::new(&state);
    thread.start();
    assert!(matches!(
        thread.run().unwrap_err(),
        VmError::TypeError {
            expected: "number",
            ..
        }
    ));
}

#[test]
fn test_modulo_by_zero_fails() {
    let mut state = State::new();
    state.compile_string("test", "r := 1 % 0").unwrap();
    let mut thread = Thread::new(&state);
    thread.start();
    assert!(matches!(
        thread.run().unwrap_err(),
        VmError::DivisionByZero
    ));
}

#[test]
fn test_runaway_recursion_exhausts_call_depth() {
    let mut state = State::new();
    state
        .compile_string("test", "func f() { return f() } r := f()")
        .unwrap();
    let mut thread = Thread::new(&state);
    thread.start();
    assert!(matches!(
        thread.run().unwrap_err(),
        VmError::CallDepthExceeded
    ));
}

#[test]
fn test_deep_expression_overflows_value_stack() {
    // Right-nested additions grow the operand stack one slot per depth.
    let mut source = String::from("x := ");
    for _ in 0..140 {
        source.push_str("1 + (");
    }
    source.push('1');
    for _ in 0..140 {
        source.push(')');
    }
    let mut state = State::new();
    state.compile_string("test", &source).unwrap();
    let mut thread = Thread::new(&state);
    thread.start();
    assert!(matches!(thread.run().unwrap_err(), VmError::StackOverflow));
}

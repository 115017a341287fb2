// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! End-to-end tests: compile real Wee source and run it on a real `Vm`.

#![allow(clippy::unwrap_used)]

use super::compile;
use wee_vm::Value;
use wee_vm::heap::Heap;
use wee_vm::vm::{InterpretResult, Vm};

fn run(source: &str) -> Value {
    let mut heap = Heap::new();
    let function = compile(source, &mut heap).expect("source is expected to compile cleanly");
    let mut vm = Vm::new(heap);
    match vm.interpret(function) {
        InterpretResult::Ok(value) => value,
        InterpretResult::RuntimeError(err) => panic!("unexpected runtime error: {err}"),
    }
}

fn run_topmost_expression(source_without_trailing_semicolon: &str) -> Value {
    run(&format!("return {source_without_trailing_semicolon};"))
}

fn compile_err(source: &str) -> Vec<crate::CompileError> {
    let mut heap = Heap::new();
    compile(source, &mut heap).expect_err("source is expected to fail to compile")
}

#[test]
fn arithmetic_follows_standard_precedence() {
    assert_eq!(run_topmost_expression("1 + 2 * 3"), Value::Number(7.0));
    assert_eq!(run_topmost_expression("(1 + 2) * 3"), Value::Number(9.0));
    assert_eq!(run_topmost_expression("10 - 2 - 3"), Value::Number(5.0));
}

#[test]
fn comparisons_and_equality() {
    assert_eq!(run_topmost_expression("1 < 2"), Value::Bool(true));
    assert_eq!(run_topmost_expression("\"a\" == \"a\""), Value::Bool(true));
    assert_eq!(run_topmost_expression("1 != 2"), Value::Bool(true));
    assert_eq!(run_topmost_expression("nil == false"), Value::Bool(false));
}

#[test]
fn string_concatenation_interns_the_result() {
    let value = run_topmost_expression(r#""foo" + "bar""#);
    assert_eq!(value.as_str(), Some("foobar"));
}

#[test]
fn and_or_short_circuit() {
    assert_eq!(run_topmost_expression("false and (1/0 == 1/0)"), Value::Bool(false));
    assert_eq!(run_topmost_expression("true or (1/0 == 1/0)"), Value::Bool(true));
    assert_eq!(run_topmost_expression("1 or 2"), Value::Number(1.0));
    assert_eq!(run_topmost_expression("nil and 2"), Value::Nil);
}

#[test]
fn block_scoped_locals_shadow_without_clobbering_outer() {
    let value = run(
        r"
        let x = 1;
        {
            let x = 2;
        }
        return x;
        ",
    );
    assert_eq!(value, Value::Number(1.0));
}

#[test]
fn if_else_picks_the_right_branch() {
    let value = run(
        r"
        fun pick(cond) {
            if (cond) {
                return 10;
            } else {
                return 20;
            }
        }
        return pick(true);
        ",
    );
    assert_eq!(value, Value::Number(10.0));
    let value = run(
        r"
        fun pick(cond) {
            if (cond) {
                return 10;
            } else {
                return 20;
            }
        }
        return pick(false);
        ",
    );
    assert_eq!(value, Value::Number(20.0));
}

#[test]
fn while_loop_accumulates() {
    let value = run(
        r"
        fun sum_to(n) {
            let total = 0;
            let i = 0;
            while (i < n) {
                total = total + i;
                i = i + 1;
            }
            return total;
        }
        return sum_to(5);
        ",
    );
    assert_eq!(value, Value::Number(10.0));
}

#[test]
fn for_loop_desugars_to_a_while() {
    let value = run(
        r"
        fun product(n) {
            let total = 1;
            for (let i = 1; i <= n; i = i + 1) {
                total = total * i;
            }
            return total;
        }
        return product(5);
        ",
    );
    assert_eq!(value, Value::Number(120.0));
}

#[test]
fn recursive_fibonacci() {
    let value = run(
        r"
        fun fib(n) {
            if (n < 2) {
                return n;
            }
            return fib(n - 1) + fib(n - 2);
        }
        return fib(10);
        ",
    );
    assert_eq!(value, Value::Number(55.0));
}

#[test]
fn closures_over_distinct_calls_keep_separate_state() {
    let value = run(
        r"
        fun make(n) {
            fun add(x) {
                n = n + x;
                return n;
            }
            return add;
        }
        let a = make(0);
        let b = make(10);
        a(1);
        b(1);
        return a(5);
        ",
    );
    assert_eq!(value, Value::Number(6.0));
}

#[test]
fn shared_upvalue_mutation_persists_across_calls() {
    let value = run(
        r"
        fun counter() {
            let count = 0;
            fun inc() {
                count = count + 1;
                return count;
            }
            return inc;
        }
        let tick = counter();
        tick();
        tick();
        return tick();
        ",
    );
    assert_eq!(value, Value::Number(3.0));
}

#[test]
fn classes_store_fields_and_dispatch_methods() {
    let value = run(
        r"
        class Counter {
            init(start) {
                self.value = start;
            }
            bump() {
                self.value = self.value + 1;
                return self.value;
            }
        }
        let c = Counter(9);
        c.bump();
        return c.bump();
        ",
    );
    assert_eq!(value, Value::Number(11.0));
}

#[test]
fn super_invoke_dispatches_to_the_parent_method() {
    let value = run(
        r"
        class A {
            speak() {
                return 10;
            }
        }
        class B < A {
            speak() {
                return super.speak() + 2;
            }
        }
        return B().speak();
        ",
    );
    assert_eq!(value, Value::Number(12.0));
}

#[test]
fn reading_an_undefined_global_is_a_runtime_error() {
    let mut heap = Heap::new();
    let function = compile("nope;", &mut heap).expect("parses fine, fails at runtime");
    let mut vm = Vm::new(heap);
    match vm.interpret(function) {
        InterpretResult::RuntimeError(err) => {
            assert!(err.to_string().contains("Undefined variable"));
        }
        InterpretResult::Ok(_) => panic!("expected a runtime error"),
    }
}

#[test]
fn self_read_in_its_own_initializer_is_a_compile_error() {
    let errors = compile_err("let x = x;");
    assert!(!errors.is_empty());
}

#[test]
fn using_self_outside_a_class_is_a_compile_error() {
    let errors = compile_err("fun f() { return self; }");
    assert!(!errors.is_empty());
}

#[test]
fn a_class_inheriting_from_itself_is_a_compile_error() {
    let errors = compile_err("class A < A {}");
    assert!(!errors.is_empty());
}

#[test]
fn missing_semicolon_is_a_compile_error_that_does_not_panic() {
    let errors = compile_err("let x = 1");
    assert!(!errors.is_empty());
}

#[test]
fn the_function_keyword_is_spelled_fun_not_function() {
    let errors = compile_err("function f() {}");
    assert!(!errors.is_empty());
}

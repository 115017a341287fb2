// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Driver binary for Wee: runs a source file, or starts a line-oriented
//! REPL when invoked with no arguments.

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::process::ExitCode;
use wee_core::WeeError;
use wee_vm::Vm;
use wee_vm::heap::Heap;
use wee_vm::vm::InterpretResult;

/// Wee language interpreter.
#[derive(Parser)]
#[command(name = "wee", version = env!("CARGO_PKG_VERSION"), about = "Wee language interpreter")]
struct Args {
    /// Script to run. Starts a REPL if omitted.
    file: Option<PathBuf>,

    /// Trace every instruction the VM executes.
    #[arg(long)]
    trace: bool,

    /// Run a full collection before every growth allocation.
    #[arg(long = "gc-stress")]
    gc_stress: bool,

    /// Raise the GC's collection logging to `info`.
    #[arg(long = "gc-log")]
    gc_log: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    install_tracing(args.gc_log);

    let trace_execution = args.trace || env_flag("WEE_TRACE");
    let gc_stress = args.gc_stress || env_flag("WEE_GC_STRESS");

    match args.file {
        Some(path) => run_file(&path, trace_execution, gc_stress),
        None => {
            run_repl(trace_execution, gc_stress);
            ExitCode::SUCCESS
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|value| value != "0")
}

fn install_tracing(gc_log: bool) {
    use tracing_subscriber::EnvFilter;

    let default_filter = if gc_log { "wee_vm::heap=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn run_file(path: &std::path::Path, trace_execution: bool, gc_stress: bool) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("wee: can't read '{}': {err}", path.display());
            return ExitCode::FAILURE;
        }
    };

    match interpret(&source, trace_execution, gc_stress) {
        InterpretOutcome::Ok(_) => ExitCode::SUCCESS,
        InterpretOutcome::CompileError | InterpretOutcome::RuntimeError => ExitCode::FAILURE,
    }
}

fn run_repl(trace_execution: bool, gc_stress: bool) {
    let mut editor = DefaultEditor::new().expect("failed to initialize line editor");

    loop {
        match editor.readline("wee> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "exit" || trimmed == "quit" || trimmed.starts_with("exit ") || trimmed.starts_with("quit ") {
                    break;
                }
                let _ = editor.add_history_entry(line.as_str());
                interpret(&line, trace_execution, gc_stress);
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("wee: {err}");
                break;
            }
        }
    }
}

enum InterpretOutcome {
    Ok(wee_vm::Value),
    CompileError,
    RuntimeError,
}

fn interpret(source: &str, trace_execution: bool, gc_stress: bool) -> InterpretOutcome {
    let mut heap = Heap::new();
    let function = match wee_compiler::compile(source, &mut heap) {
        Ok(function) => function,
        Err(errors) => {
            for err in &errors {
                eprintln!("[line {}] {err}", err.line());
            }
            return InterpretOutcome::CompileError;
        }
    };

    let mut vm = Vm::new(heap).gc_stress(gc_stress);
    vm.trace_execution = trace_execution;

    match vm.interpret(function) {
        InterpretResult::Ok(value) => InterpretOutcome::Ok(value),
        InterpretResult::RuntimeError(err) => {
            eprintln!("[line {}] {err}", err.line());
            for frame in err.trace() {
                eprintln!("[line {}] in {}", frame.line, frame.name);
            }
            InterpretOutcome::RuntimeError
        }
    }
}

//! The command-line driver: run a script, or serve a REPL.

use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process::exit;

use loxide::prelude::*;

/// Exit codes follow the sysexits convention.
const EXIT_USAGE: i32 = 64;
const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;
const EXIT_BAD_INPUT: i32 = 74;

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: loxide [script]");
            exit(EXIT_USAGE);
        }
    }
}

/// Read the script at `path` and interpret it.
fn run_file(path: &str) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read {path}: {error}");
            exit(EXIT_BAD_INPUT);
        }
    };

    let mut vm = VM::new();
    if let Err(error) = vm.interpret_source(path, &source) {
        exit(report(&error));
    }
}

/// Read one logical line at a time and interpret it. The VM is shared
/// across lines, so definitions persist. Exits on end-of-file or `quit`.
fn repl() {
    println!("loxide v{}", env!("CARGO_PKG_VERSION"));

    let stdin = io::stdin();
    let mut vm = VM::new();
    loop {
        print!("> ");
        io::stdout().flush().expect("failed to flush the prompt");

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // End-of-file.
            Ok(_) => (),
            Err(error) => {
                eprintln!("{error}");
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        if let Err(error) = vm.interpret_source("repl", line) {
            report(&error);
        }
    }
}

/// Print the error to stderr and return the exit code it maps to.
fn report(error: &InterpretationError) -> i32 {
    match error {
        InterpretationError::CompileError(diagnostics) => {
            for diagnostic in diagnostics {
                eprintln!("{diagnostic}");
            }
            EXIT_COMPILE_ERROR
        }
        InterpretationError::RuntimeError(error) => {
            eprintln!("{error}");
            EXIT_RUNTIME_ERROR
        }
    }
}

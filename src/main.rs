//! rush — a minimal POSIX-style interactive shell.
//!
//! REPL loop: print prompt, read a line, tokenize, assemble, execute,
//! repeat. No job control, no variable/command/arithmetic expansion,
//! no globbing — see `SPEC_FULL.md` for the exact boundary.

mod assembler;
mod ast;
mod builtins;
mod executor;
mod lexer;
mod resolver;
mod shell;
mod spawn;

use std::io::{self, BufRead, Write};

use shell::Shell;

fn main() {
    let mut shell = Shell::new();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdin = stdin.lock();
    let mut stdout = stdout.lock();
    let mut line = String::new();

    loop {
        let _ = write!(stdout, "$ ");
        let _ = stdout.flush();

        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                // EOF (Ctrl+D): exit cleanly with status 0.
                let _ = writeln!(stdout);
                std::process::exit(0);
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("rush: read error: {e}");
                std::process::exit(1);
            }
        }

        let trimmed = line.trim_end_matches('\n');
        let tokens = match lexer::tokenize(trimmed) {
            Ok(tokens) => tokens,
            Err(e) => {
                eprintln!("rush: {e}");
                continue;
            }
        };

        if tokens.is_empty() {
            continue;
        }

        let pipeline = match assembler::assemble(tokens) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                eprintln!("rush: {e}");
                continue;
            }
        };

        shell.last_status = executor::execute(&mut shell, &pipeline);

        if shell.should_exit {
            break;
        }
    }

    std::process::exit(shell.last_status);
}

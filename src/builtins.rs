//! Built-in command handlers: `echo`, `exit`, `type`, `pwd`, `cd`.
//!
//! Built-ins write through the process's real standard descriptors
//! (`println!`/`eprintln!`) rather than through an abstract `Write`
//! handle. That's what lets the executor's fd-dup2-then-restore scheme
//! (`executor::FdGuard`) apply to a built-in transparently, whether it
//! runs in the shell process itself or in a forked child stage of a
//! pipeline.

use std::env;
use std::path::Path;

use crate::resolver::{self, Resolution};
use crate::shell::Shell;

/// Whether `name` is one of the five built-ins this shell implements.
pub fn is_builtin(name: &str) -> bool {
    matches!(name, "echo" | "exit" | "type" | "pwd" | "cd")
}

/// Runs a built-in. `words[0]` must be a name for which `is_builtin`
/// returns true.
pub fn run(shell: &mut Shell, words: &[String]) -> i32 {
    match words[0].as_str() {
        "echo" => echo(words),
        "exit" => exit(shell, words),
        "type" => type_cmd(words),
        "pwd" => pwd(),
        "cd" => cd(words),
        other => unreachable!("run() called with non-builtin {other:?}"),
    }
}

/// `echo [words...]` — joins the remaining words with single spaces
/// and a trailing newline. Quoting was already resolved by the
/// tokenizer; no `-n`/`-e` flag handling is performed.
fn echo(words: &[String]) -> i32 {
    println!("{}", words[1..].join(" "));
    0
}

/// `exit [N]` — sets `should_exit`. `N` is parsed as a decimal `i32`;
/// a missing or unparseable argument falls back to `0` (the two cases
/// are treated identically, with no diagnostic printed either way).
fn exit(shell: &mut Shell, words: &[String]) -> i32 {
    shell.should_exit = true;
    words.get(1).and_then(|s| s.parse::<i32>().ok()).unwrap_or(0)
}

/// `type name...` — classifies each argument as a builtin, a resolved
/// external, or not found. Matches go to stdout, "not found" goes to
/// stderr. Returns 0 if every argument resolved, 1 if any did not.
fn type_cmd(words: &[String]) -> i32 {
    let mut status = 0;
    for name in &words[1..] {
        match resolver::resolve(name) {
            Resolution::Builtin => println!("{name} is a shell builtin"),
            Resolution::External(path) => println!("{name} is {}", path.display()),
            Resolution::NotFound => {
                eprintln!("{name}: not found");
                status = 1;
            }
        }
    }
    status
}

/// `pwd` — prints the current working directory. Failure is reported
/// on stderr but never terminates the shell.
fn pwd() -> i32 {
    match env::current_dir() {
        Ok(path) => {
            println!("{}", path.display());
            0
        }
        Err(e) => {
            eprintln!("pwd: {e}");
            1
        }
    }
}

/// `cd [dir]` — changes the process working directory. No argument,
/// `~`, or a leading `~/` expands against `HOME`; anything else is used
/// literally. Always prints the same fixed diagnostic on failure,
/// regardless of the underlying `io::Error`'s actual kind.
fn cd(words: &[String]) -> i32 {
    let target = match words.get(1).map(String::as_str) {
        None | Some("~") => match env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                eprintln!("cd: HOME not set");
                return 1;
            }
        },
        Some(arg) if arg.starts_with("~/") => match env::var("HOME") {
            Ok(home) => format!("{home}{}", &arg[1..]),
            Err(_) => {
                eprintln!("cd: HOME not set");
                return 1;
            }
        },
        Some(arg) => arg.to_string(),
    };

    match env::set_current_dir(Path::new(&target)) {
        Ok(()) => 0,
        Err(_) => {
            eprintln!("cd: {target}: No such file or directory");
            1
        }
    }
}

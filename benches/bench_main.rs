//! rush benchmarks: tokenizer, assembler, builtins, spawn, full
//! pipeline. Manual `std::time::Instant` measurement, no external
//! benchmarking crate.
//!
//! Run: `cargo bench`

use std::time::{Duration, Instant};

struct BenchResult {
    category: &'static str,
    name: &'static str,
    avg: Duration,
    iters: u64,
}

impl BenchResult {
    fn print(&self) {
        let avg_us = self.avg.as_nanos() as f64 / 1000.0;
        println!(
            "[{:<8}] {:<40}: avg {:>10.2}µs  ({} iters)",
            self.category, self.name, avg_us, self.iters,
        );
    }
}

fn bench<F: FnMut()>(category: &'static str, name: &'static str, iters: u64, mut f: F) -> BenchResult {
    for _ in 0..iters.min(100) {
        f();
    }

    let start = Instant::now();
    for _ in 0..iters {
        f();
    }
    let elapsed = start.elapsed();

    BenchResult { category, name, avg: elapsed / iters as u32, iters }
}

fn main() {
    println!("rush benchmark suite");
    println!("{}", "=".repeat(80));

    let mut results = Vec::new();

    println!("\n--- Lexer ---");

    results.push(bench("lexer", "echo hello", 10_000, || {
        let _ = rush::lexer::tokenize("echo hello");
    }));

    results.push(bench("lexer", "echo \"hello world\"", 10_000, || {
        let _ = rush::lexer::tokenize("echo \"hello world\"");
    }));

    results.push(bench("lexer", "ls | grep Cargo | head -1", 10_000, || {
        let _ = rush::lexer::tokenize("ls | grep Cargo | head -1");
    }));

    results.push(bench(
        "lexer",
        "cat < /dev/null > /dev/null 2> /dev/null",
        10_000,
        || {
            let _ = rush::lexer::tokenize("cat < /dev/null > /dev/null 2> /dev/null");
        },
    ));

    for r in &results {
        r.print();
    }
    results.clear();

    println!("\n--- Assembler ---");

    results.push(bench("assembler", "echo hello world", 10_000, || {
        if let Ok(tokens) = rush::lexer::tokenize("echo hello world") {
            let _ = rush::assembler::assemble(tokens);
        }
    }));

    results.push(bench("assembler", "ls | grep Cargo | head -1", 10_000, || {
        if let Ok(tokens) = rush::lexer::tokenize("ls | grep Cargo | head -1") {
            let _ = rush::assembler::assemble(tokens);
        }
    }));

    for r in &results {
        r.print();
    }
    results.clear();

    println!("\n--- Builtins ---");

    let mut shell = rush::shell::Shell::new();

    results.push(bench("builtin", "pwd", 10_000, || {
        rush::builtins::run(&mut shell, &["pwd".to_string()]);
    }));

    results.push(bench("builtin", "type echo", 10_000, || {
        rush::builtins::run(&mut shell, &["type".to_string(), "echo".to_string()]);
    }));

    for r in &results {
        r.print();
    }
    results.clear();

    println!("\n--- Spawn (posix_spawnp) ---");

    results.push(bench("spawn", "/bin/true (posix_spawnp)", 1_000, || {
        if let Ok(pid) = rush::spawn::spawn(&["/bin/true"], None, None, None, &[]) {
            let mut status = 0i32;
            unsafe {
                libc::waitpid(pid, &mut status, 0);
            }
        }
    }));

    for r in &results {
        r.print();
    }
    results.clear();

    println!("\n--- Full pipeline (tokenize + assemble + execute) ---");

    results.push(bench("full", "/bin/echo hello > /dev/null", 1_000, || {
        if let Ok(tokens) = rush::lexer::tokenize("/bin/echo hello > /dev/null") {
            if let Ok(pipeline) = rush::assembler::assemble(tokens) {
                rush::executor::execute(&mut shell, &pipeline);
            }
        }
    }));

    for r in &results {
        r.print();
    }

    println!("\n{}", "=".repeat(80));
    println!("done.");
}

//! Executes an assembled `Pipeline`: resolves every stage up front,
//! wires up redirections and pipe connections, and dispatches each
//! stage to either an in-process built-in or a spawned external
//! command.
//!
//! Builtins ordinarily run in the shell process itself (no fork, no
//! exec — the fast path). The one exception is a builtin stage that
//! isn't the pipeline's last stage and must keep feeding a pipe that
//! outlives this function call: `posix_spawn` can only load a new
//! program image, so a builtin occupying a non-terminal pipeline slot
//! is run after a manual `fork()` instead.

use std::ffi::CString;
use std::fmt;
use std::io;

use crate::ast::{Mode, Pipeline, Redirect, Stage};
use crate::builtins;
use crate::resolver::{self, Resolution};
use crate::shell::Shell;
use crate::spawn;

/// Resolves every stage's command up front; resolution is a pure
/// `PATH`/builtin-name lookup with no side effects, so doing it before
/// dispatch is just a classification step, not an early-abort point.
///
/// A single-stage pipeline whose command is unresolved aborts before
/// touching any redirect file: spec.md §7's command-not-found handling
/// is described at the top level, and Testable Properties scenario 7
/// requires the redirect target stay untouched in that case. A
/// multi-stage pipeline does NOT get this whole-pipeline abort: per
/// spec.md §4.5 step 5, each stage resolves inside its own forked
/// child, after that stage's own redirects are wired, and "early
/// failure in an intermediate stage does not cancel later stages" —
/// see `run_pipeline`/`fork_not_found_stage`.
pub fn execute(shell: &mut Shell, pipeline: &Pipeline) -> i32 {
    let resolutions: Vec<Resolution> =
        pipeline.stages.iter().map(|s| resolver::resolve(s.command())).collect();

    if pipeline.is_single_stage() {
        if matches!(resolutions[0], Resolution::NotFound) {
            eprintln!("{}: command not found", pipeline.stages[0].command());
            return 127;
        }
        run_single_stage(shell, &pipeline.stages[0], &resolutions[0])
    } else {
        run_pipeline(shell, &pipeline.stages, &resolutions)
    }
}

// ── Redirect handling ─────────────────────────────────────────────

#[derive(Debug)]
struct RedirectError(io::Error, String);

impl fmt::Display for RedirectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.1, self.0)
    }
}

/// Opens a redirect target, returning a raw fd the caller owns.
fn open_redirect(redirect: &Redirect, is_input: bool) -> Result<i32, RedirectError> {
    let path = CString::new(redirect.target.as_str())
        .map_err(|e| RedirectError(io::Error::new(io::ErrorKind::InvalidInput, e), redirect.target.clone()))?;

    let flags = if is_input {
        libc::O_RDONLY
    } else {
        match redirect.mode {
            Some(Mode::Append) => libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND,
            _ => libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
        }
    };

    let fd = unsafe { libc::open(path.as_ptr(), flags, 0o644) };
    if fd < 0 {
        return Err(RedirectError(io::Error::last_os_error(), redirect.target.clone()));
    }
    Ok(fd)
}

/// RAII guard that dup2()s a new fd onto a standard descriptor slot
/// and restores the slot's original target on drop, even if the
/// caller returns early. Used so an in-process builtin's redirects
/// never leak past the builtin's own execution.
struct FdGuard {
    slot: i32,
    saved: i32,
}

impl FdGuard {
    /// Redirects `slot` (one of `STDIN_FILENO`/`STDOUT_FILENO`/
    /// `STDERR_FILENO`) to `new_fd`, remembering the original so it
    /// can be restored. `new_fd` is closed here; the caller doesn't
    /// need to close it separately.
    fn redirect(slot: i32, new_fd: i32) -> io::Result<Self> {
        let saved = unsafe { libc::dup(slot) };
        if saved < 0 {
            return Err(io::Error::last_os_error());
        }
        let ret = unsafe { libc::dup2(new_fd, slot) };
        unsafe {
            libc::close(new_fd);
        }
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::dup2(saved, slot);
                libc::close(saved);
            }
            return Err(err);
        }
        Ok(Self { slot, saved })
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        unsafe {
            libc::dup2(self.saved, self.slot);
            libc::close(self.saved);
        }
    }
}

/// Opens a stage's redirects (if any) and sets up `FdGuard`s to
/// restore the shell's own fds once the builtin returns. Returns early
/// on the first failed open, restoring whatever had already been
/// redirected.
fn apply_redirects_in_process(stage: &Stage) -> Result<Vec<FdGuard>, RedirectError> {
    let mut guards = Vec::new();

    if let Some(r) = &stage.stdin_redirect {
        let fd = open_redirect(r, true)?;
        guards.push(
            FdGuard::redirect(libc::STDIN_FILENO, fd)
                .map_err(|e| RedirectError(e, r.target.clone()))?,
        );
    }
    if let Some(r) = &stage.stdout_redirect {
        let fd = open_redirect(r, false)?;
        guards.push(
            FdGuard::redirect(libc::STDOUT_FILENO, fd)
                .map_err(|e| RedirectError(e, r.target.clone()))?,
        );
    }
    if let Some(r) = &stage.stderr_redirect {
        let fd = open_redirect(r, false)?;
        guards.push(
            FdGuard::redirect(libc::STDERR_FILENO, fd)
                .map_err(|e| RedirectError(e, r.target.clone()))?,
        );
    }

    Ok(guards)
}

// ── Single-stage execution ───────────────────────────────────────

fn run_single_stage(shell: &mut Shell, stage: &Stage, resolution: &Resolution) -> i32 {
    match resolution {
        Resolution::Builtin => {
            let guards = match apply_redirects_in_process(stage) {
                Ok(guards) => guards,
                Err(e) => {
                    eprintln!("{e}");
                    return 1;
                }
            };
            let status = builtins::run(shell, &stage.words);
            drop(guards);
            status
        }
        Resolution::External(_) => run_external_single(stage),
        Resolution::NotFound => unreachable!("pre-resolution already rejected NotFound"),
    }
}

fn run_external_single(stage: &Stage) -> i32 {
    let mut opened = Vec::new();
    let stdin_fd = match open_stream(&stage.stdin_redirect, true, &mut opened) {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    let stdout_fd = match open_stream(&stage.stdout_redirect, false, &mut opened) {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("{e}");
            close_all(&opened);
            return 1;
        }
    };
    let stderr_fd = match open_stream(&stage.stderr_redirect, false, &mut opened) {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("{e}");
            close_all(&opened);
            return 1;
        }
    };

    let words: Vec<&str> = stage.words.iter().map(String::as_str).collect();
    let status = match spawn::spawn(&words, stdin_fd, stdout_fd, stderr_fd, &[]) {
        Ok(pid) => {
            close_all(&opened);
            wait_for(pid)
        }
        Err(e) => {
            close_all(&opened);
            eprintln!("{e}");
            e.exit_status()
        }
    };
    status
}

fn open_stream(
    redirect: &Option<Redirect>,
    is_input: bool,
    opened: &mut Vec<i32>,
) -> Result<Option<i32>, RedirectError> {
    match redirect {
        None => Ok(None),
        Some(r) => {
            let fd = open_redirect(r, is_input)?;
            opened.push(fd);
            Ok(Some(fd))
        }
    }
}

fn close_all(fds: &[i32]) {
    for &fd in fds {
        unsafe {
            libc::close(fd);
        }
    }
}

fn wait_for(pid: libc::pid_t) -> i32 {
    let mut status = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret >= 0 {
            break;
        }
        if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
            break;
        }
    }
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else {
        128
    }
}

// ── Multi-stage pipeline execution ───────────────────────────────

/// One child of a running pipeline: either a pid waitpid() can reap
/// directly, or a forked builtin/not-found stage whose exit status is
/// likewise reaped by waitpid() (it calls `process::exit` itself).
/// `stage_index` lets the wait loop find the *pipeline's* last stage
/// regardless of which stages actually managed to spawn a child.
struct Child {
    stage_index: usize,
    pid: libc::pid_t,
}

fn run_pipeline(_shell: &mut Shell, stages: &[Stage], resolutions: &[Resolution]) -> i32 {
    let n = stages.len();
    // One pipe per adjacent pair: pipes[i] connects stages[i] -> stages[i+1].
    let mut pipes: Vec<(i32, i32)> = Vec::with_capacity(n - 1);
    for _ in 0..n - 1 {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            eprintln!("pipe: {}", io::Error::last_os_error());
            for (r, w) in &pipes {
                unsafe {
                    libc::close(*r);
                    libc::close(*w);
                }
            }
            return 1;
        }
        pipes.push((fds[0], fds[1]));
    }

    let mut children: Vec<Child> = Vec::new();
    let mut last_status = 0;
    let is_last_stage = |i: usize| i == n - 1;

    for (i, stage) in stages.iter().enumerate() {
        let stdin_pipe = if i > 0 { Some(pipes[i - 1].0) } else { None };
        let stdout_pipe = if i < n - 1 { Some(pipes[i].1) } else { None };

        // All fds this stage must close in the child because they
        // belong to other stages' unused pipe ends.
        let fds_to_close: Vec<i32> = pipes
            .iter()
            .enumerate()
            .flat_map(|(j, &(r, w))| {
                let mut keep_closed = Vec::new();
                if Some(j) != i.checked_sub(1) {
                    keep_closed.push(r);
                }
                if j != i {
                    keep_closed.push(w);
                }
                keep_closed
            })
            .collect();

        match &resolutions[i] {
            Resolution::External(_) => {
                match spawn_external_stage(stage, stdin_pipe, stdout_pipe, &fds_to_close) {
                    Ok(pid) => children.push(Child { stage_index: i, pid }),
                    Err(e) => {
                        eprintln!("{e}");
                        if is_last_stage(i) {
                            last_status = e.exit_status();
                        }
                    }
                }
            }
            Resolution::Builtin => match fork_builtin_stage(stage, stdin_pipe, stdout_pipe, &fds_to_close) {
                Ok(pid) => children.push(Child { stage_index: i, pid }),
                Err(e) => {
                    eprintln!("fork: {e}");
                    if is_last_stage(i) {
                        last_status = 1;
                    }
                }
            },
            // Resolution is deferred here, not aborted: per spec.md
            // §4.5 step 5, an unresolved command fails only its own
            // stage's child, after that child's own redirects are
            // wired — earlier and later stages are unaffected.
            Resolution::NotFound => match fork_not_found_stage(stage, stdin_pipe, stdout_pipe, &fds_to_close) {
                Ok(pid) => children.push(Child { stage_index: i, pid }),
                Err(e) => {
                    eprintln!("fork: {e}");
                    if is_last_stage(i) {
                        last_status = 127;
                    }
                }
            },
        }
    }

    for (r, w) in &pipes {
        unsafe {
            libc::close(*r);
            libc::close(*w);
        }
    }

    for child in &children {
        let status = wait_for(child.pid);
        if is_last_stage(child.stage_index) {
            last_status = status;
        }
    }

    last_status
}

/// A stage's external-spawn path can fail for two distinct reasons: a
/// redirect target failed to open, or `posix_spawnp` itself failed.
/// Either way the stage's command never runs — this type keeps the
/// caller from having to distinguish further than "print, then this
/// stage's status is `exit_status()`".
enum StageSpawnError {
    Redirect(RedirectError),
    Spawn(spawn::SpawnError),
}

impl fmt::Display for StageSpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redirect(e) => write!(f, "{e}"),
            Self::Spawn(e) => write!(f, "{e}"),
        }
    }
}

impl StageSpawnError {
    fn exit_status(&self) -> i32 {
        match self {
            Self::Redirect(_) => 1,
            Self::Spawn(e) => e.exit_status(),
        }
    }
}

fn spawn_external_stage(
    stage: &Stage,
    stdin_pipe: Option<i32>,
    stdout_pipe: Option<i32>,
    fds_to_close: &[i32],
) -> Result<libc::pid_t, StageSpawnError> {
    let mut opened = Vec::new();
    // A stage's own redirect always wins over pipe wiring for that
    // stream. Any open failure here aborts the spawn entirely — the
    // stage must not run with a wrong/inherited fd standing in for a
    // redirect that failed to open.
    let stdin_fd = match redirect_or_pipe(&stage.stdin_redirect, true, stdin_pipe, &mut opened) {
        Ok(fd) => fd,
        Err(e) => {
            close_all(&opened);
            return Err(StageSpawnError::Redirect(e));
        }
    };
    let stdout_fd = match redirect_or_pipe(&stage.stdout_redirect, false, stdout_pipe, &mut opened) {
        Ok(fd) => fd,
        Err(e) => {
            close_all(&opened);
            return Err(StageSpawnError::Redirect(e));
        }
    };
    let stderr_fd = match redirect_or_pipe(&stage.stderr_redirect, false, None, &mut opened) {
        Ok(fd) => fd,
        Err(e) => {
            close_all(&opened);
            return Err(StageSpawnError::Redirect(e));
        }
    };

    let words: Vec<&str> = stage.words.iter().map(String::as_str).collect();
    let result = spawn::spawn(&words, stdin_fd, stdout_fd, stderr_fd, fds_to_close);
    close_all(&opened);
    result.map_err(StageSpawnError::Spawn)
}

fn redirect_or_pipe(
    redirect: &Option<Redirect>,
    is_input: bool,
    pipe_fd: Option<i32>,
    opened: &mut Vec<i32>,
) -> Result<Option<i32>, RedirectError> {
    match redirect {
        Some(r) => {
            let fd = open_redirect(r, is_input)?;
            opened.push(fd);
            Ok(Some(fd))
        }
        None => Ok(pipe_fd),
    }
}

/// Dups the adjacent pipe ends onto stdin/stdout in the current
/// (forked) child, then closes every fd belonging to pipes this stage
/// doesn't need. Shared by every kind of forked pipeline-stage child
/// (`fork_builtin_stage`, `fork_not_found_stage`).
fn wire_pipe_fds(stdin_pipe: Option<i32>, stdout_pipe: Option<i32>, fds_to_close: &[i32]) {
    if let Some(fd) = stdin_pipe {
        unsafe {
            libc::dup2(fd, libc::STDIN_FILENO);
            if fd != libc::STDIN_FILENO {
                libc::close(fd);
            }
        }
    }
    if let Some(fd) = stdout_pipe {
        unsafe {
            libc::dup2(fd, libc::STDOUT_FILENO);
            if fd != libc::STDOUT_FILENO {
                libc::close(fd);
            }
        }
    }
    for &fd in fds_to_close {
        unsafe {
            libc::close(fd);
        }
    }
}

/// Applies this stage's own redirects in the current (forked) child,
/// overriding whatever `wire_pipe_fds` just wired for the matching
/// stream (spec.md's "redirection supersedes the pipe connection").
/// On any open failure, prints a diagnostic and exits 1 immediately —
/// this child never gets to run its builtin/command with a wrong fd.
fn apply_redirects_in_child(stage: &Stage) {
    let mut opened = Vec::new();
    if let Some(r) = &stage.stdin_redirect {
        match open_redirect(r, true) {
            Ok(fd) => {
                unsafe {
                    libc::dup2(fd, libc::STDIN_FILENO);
                }
                opened.push(fd);
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
    if let Some(r) = &stage.stdout_redirect {
        match open_redirect(r, false) {
            Ok(fd) => {
                unsafe {
                    libc::dup2(fd, libc::STDOUT_FILENO);
                }
                opened.push(fd);
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
    if let Some(r) = &stage.stderr_redirect {
        match open_redirect(r, false) {
            Ok(fd) => {
                unsafe {
                    libc::dup2(fd, libc::STDERR_FILENO);
                }
                opened.push(fd);
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
    close_all(&opened);
}

/// Forks so a builtin can occupy a non-terminal pipeline slot: the
/// child wires its own fds exactly like an external stage would, runs
/// the builtin in-process, flushes stdout, and exits with its status.
fn fork_builtin_stage(
    stage: &Stage,
    stdin_pipe: Option<i32>,
    stdout_pipe: Option<i32>,
    fds_to_close: &[i32],
) -> io::Result<libc::pid_t> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(io::Error::last_os_error());
    }
    if pid > 0 {
        return Ok(pid);
    }

    wire_pipe_fds(stdin_pipe, stdout_pipe, fds_to_close);
    apply_redirects_in_child(stage);

    let mut shell = Shell::new();
    let status = builtins::run(&mut shell, &stage.words);
    use std::io::Write;
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    std::process::exit(status);
}

/// Forks a child for a pipeline stage whose command word never
/// resolved. Per spec.md §4.5 step 5, resolution is checked inside the
/// stage's own child, after its redirects are wired (step 4) — so a
/// redirect target this stage names is still created even though the
/// command itself doesn't exist, and only this one child fails; later
/// (and earlier) stages run unaffected, matching "early failure in an
/// intermediate stage does not cancel later stages".
fn fork_not_found_stage(
    stage: &Stage,
    stdin_pipe: Option<i32>,
    stdout_pipe: Option<i32>,
    fds_to_close: &[i32],
) -> io::Result<libc::pid_t> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(io::Error::last_os_error());
    }
    if pid > 0 {
        return Ok(pid);
    }

    wire_pipe_fds(stdin_pipe, stdout_pipe, fds_to_close);
    apply_redirects_in_child(stage);

    eprintln!("{}: command not found", stage.command());
    std::process::exit(127);
}

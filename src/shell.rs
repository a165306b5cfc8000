//! Shell-wide state, shared across REPL iterations.
//!
//! Everything else the shell depends on — cwd, `PATH`, `HOME` — is
//! read fresh from the process environment on every use (see
//! `resolver.rs`, `builtins.rs`); only the running exit status and the
//! exit flag actually need to persist here.

/// Running state of the shell. One instance lives for the REPL's whole
/// lifetime.
pub struct Shell {
    /// Exit status of the most recently executed pipeline. Used as the
    /// `exit` built-in's default when it's given no argument.
    pub last_status: i32,
    /// Set by the `exit` built-in; causes the REPL driver to stop after
    /// the current iteration's cleanup.
    pub should_exit: bool,
}

impl Shell {
    pub fn new() -> Self {
        Self {
            last_status: 0,
            should_exit: false,
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

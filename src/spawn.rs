//! A safe wrapper around `posix_spawnp()`.
//!
//! External commands are launched through `posix_spawnp` rather than a
//! manual `fork`+`exec`, avoiding the cost of duplicating the parent's
//! address space for a call that's about to be replaced anyway. Job
//! control and signal-disposition handling are out of scope for this
//! shell, so unlike a full-featured spawn wrapper this one passes a
//! null `posix_spawnattr_t` — the child inherits the parent's process
//! group and signal dispositions unchanged.
//!
//! | type | role |
//! |------|------|
//! | [`FileActions`] | RAII wrapper around `posix_spawn_file_actions_t` (fd wiring) |
//! | [`CStringVec`] | NUL-terminated pointer array for argv |
//! | [`spawn`] | combines the above into one `posix_spawnp` call |

use std::ffi::CString;
use std::fmt;

/// A failure from `posix_spawnp`.
pub struct SpawnError {
    pub errno: i32,
    pub command: String,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self.errno {
            libc::ENOENT => "command not found",
            libc::EACCES => "permission denied",
            _ => "spawn failed",
        };
        write!(f, "{}: {}", self.command, msg)
    }
}

impl SpawnError {
    /// 127 = command not found, 126 = permission denied, 1 = other.
    pub fn exit_status(&self) -> i32 {
        match self.errno {
            libc::ENOENT => 127,
            libc::EACCES => 126,
            _ => 1,
        }
    }
}

/// RAII wrapper around `posix_spawn_file_actions_t`. Destroyed on drop.
struct FileActions {
    inner: libc::posix_spawn_file_actions_t,
}

impl FileActions {
    fn new() -> Self {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            libc::posix_spawn_file_actions_init(&mut actions);
            Self { inner: actions }
        }
    }

    /// Queues `dup2(fd, newfd)` in the child before exec.
    fn add_dup2(&mut self, fd: i32, newfd: i32) {
        unsafe {
            libc::posix_spawn_file_actions_adddup2(&mut self.inner, fd, newfd);
        }
    }

    /// Queues `close(fd)` in the child before exec.
    fn add_close(&mut self, fd: i32) {
        unsafe {
            libc::posix_spawn_file_actions_addclose(&mut self.inner, fd);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.inner
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&mut self.inner);
        }
    }
}

/// NUL-terminated argv pointer array built from owned `CString`s.
struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*mut libc::c_char>,
}

impl CStringVec {
    fn from_args(args: &[&str]) -> Self {
        let strings: Vec<CString> = args
            .iter()
            .map(|s| CString::new(*s).unwrap_or_else(|_| CString::new("").unwrap()))
            .collect();
        let mut ptrs: Vec<*mut libc::c_char> =
            strings.iter().map(|s| s.as_ptr() as *mut libc::c_char).collect();
        ptrs.push(std::ptr::null_mut());
        Self { _strings: strings, ptrs }
    }

    fn as_ptr(&self) -> *const *mut libc::c_char {
        self.ptrs.as_ptr()
    }
}

/// Spawns an external command via `posix_spawnp`, returning the
/// child's pid on success.
///
/// - `args`: the command and its arguments (`args[0]` is searched
///   against `PATH` by `posix_spawnp` itself).
/// - `stdin_fd`/`stdout_fd`/`stderr_fd`: fd to dup2 onto the matching
///   standard descriptor in the child (`None` inherits the parent's).
/// - `fds_to_close`: descriptors the child must close before exec
///   (the unused ends of any pipes wired into this stage).
pub fn spawn(
    args: &[&str],
    stdin_fd: Option<i32>,
    stdout_fd: Option<i32>,
    stderr_fd: Option<i32>,
    fds_to_close: &[i32],
) -> Result<libc::pid_t, SpawnError> {
    let argv = CStringVec::from_args(args);
    let mut actions = FileActions::new();

    if let Some(fd) = stdin_fd {
        actions.add_dup2(fd, libc::STDIN_FILENO);
        if fd != libc::STDIN_FILENO {
            actions.add_close(fd);
        }
    }
    if let Some(fd) = stdout_fd {
        actions.add_dup2(fd, libc::STDOUT_FILENO);
        if fd != libc::STDOUT_FILENO {
            actions.add_close(fd);
        }
    }
    if let Some(fd) = stderr_fd {
        actions.add_dup2(fd, libc::STDERR_FILENO);
        if fd != libc::STDERR_FILENO {
            actions.add_close(fd);
        }
    }

    for &fd in fds_to_close {
        let already_closed =
            [stdin_fd, stdout_fd, stderr_fd].iter().any(|&redir_fd| redir_fd == Some(fd));
        if !already_closed {
            actions.add_close(fd);
        }
    }

    extern "C" {
        static environ: *const *mut libc::c_char;
    }

    let mut pid: libc::pid_t = 0;
    let ret = unsafe {
        libc::posix_spawnp(
            &mut pid,
            argv.as_ptr().read() as *const libc::c_char,
            actions.as_ptr(),
            std::ptr::null(),
            argv.as_ptr(),
            environ as *const *mut libc::c_char,
        )
    };

    if ret != 0 {
        return Err(SpawnError { errno: ret, command: args[0].to_string() });
    }

    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_true_succeeds() {
        let pid = spawn(&["true"], None, None, None, &[]).unwrap();
        let mut status = 0;
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 0);
    }

    #[test]
    fn spawn_unknown_command_reports_not_found() {
        let err = spawn(&["this-command-does-not-exist-xyz"], None, None, None, &[])
            .expect_err("should fail to spawn");
        assert_eq!(err.exit_status(), 127);
    }
}

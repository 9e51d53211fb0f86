//! Parent-side half of the Namespace Launcher: clone the child into its own
//! mount/uts/pid/net namespaces, hand it a readiness pipe, and wait for it.

use crate::error::{Result, SandboxError};
use nix::sched::{clone, CloneFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, pipe, Pid};
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

/// Default child stack size, used when a caller doesn't override it; `clone`'s
/// stack grows downward and the callback receives the top of this buffer.
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

pub struct LaunchConfig {
    pub id: String,
    pub image_dir: PathBuf,
    pub root: PathBuf,
    pub diff_dir: PathBuf,
    pub work_dir: PathBuf,
    pub old_root: PathBuf,
    pub command: CString,
    pub argv: Vec<CString>,
    pub stack_size: usize,
}

/// A cloned child that has not yet been signalled as ready to exec.
pub struct Child {
    pid: Pid,
    ready_write_fd: RawFd,
}

impl Child {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Tells the child it may now proceed to `execvp`. Called by the
    /// controller once network attach has finished, successfully or not —
    /// the child must never be left blocked forever on a parent that died
    /// or gave up without writing this byte.
    pub fn signal_ready(self) -> Result<()> {
        let write_fd = self.ready_write_fd;
        let result = nix::unistd::write(write_fd, &[1u8]).map(|_| ());
        let _ = close(write_fd);
        result.map_err(SandboxError::SignalReady)
    }

    /// Blocks until the child exits, returning an error if it exited
    /// non-zero or was killed by a signal.
    pub fn wait(self) -> Result<()> {
        match waitpid(self.pid, None) {
            Ok(WaitStatus::Exited(_, 0)) => Ok(()),
            Ok(WaitStatus::Exited(_, code)) => Err(SandboxError::NonZeroExit(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => Err(SandboxError::Signaled(signal as i32)),
            Ok(_other) => Ok(()),
            Err(source) => Err(SandboxError::Wait {
                pid: self.pid.as_raw(),
                source,
            }),
        }
    }
}

/// Clones a child into new mount, uts, pid and net namespaces and runs the
/// setup sequence in `child::run` there. Returns once `clone` has returned
/// in the parent; the child may still be mid-setup — callers must attach the
/// network and then call [`Child::signal_ready`] before relying on the
/// container's command actually having started.
pub fn launch(config: LaunchConfig) -> Result<Child> {
    let (ready_read_fd, ready_write_fd) = pipe().map_err(SandboxError::Pipe)?;

    let mut stack = vec![0u8; config.stack_size];

    let flags = CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNET;

    let callback = Box::new(move || -> isize {
        let _ = close(ready_write_fd);
        crate::child::run(&config, ready_read_fd)
    });

    // SAFETY: the callback touches only its own captured `config` (moved in,
    // not shared with the parent) and the inherited pipe read end; the stack
    // buffer outlives the child because `clone` blocks until it has copied
    // into the new process's address space before returning here.
    let pid = unsafe { clone(callback, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(SandboxError::Clone)?;

    let _ = close(ready_read_fd);

    Ok(Child {
        pid,
        ready_write_fd,
    })
}

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors observable by the parent around the `clone`/`waitpid` boundary.
/// Everything that can go wrong *inside* the child after `clone` returns
/// there is fatal to the child itself (see `launch::run_child`) and is never
/// represented as one of these — the parent only ever learns about it as a
/// non-zero exit status.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("allocating child stack: {0}")]
    Stack(#[source] std::io::Error),

    #[error("creating readiness pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("cloning child process: {0}")]
    Clone(#[source] nix::Error),

    #[error("signalling child readiness: {0}")]
    SignalReady(#[source] nix::Error),

    #[error("waiting for child {pid}: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("child exited with status {0}")]
    NonZeroExit(i32),

    #[error("child was terminated by signal {0}")]
    Signaled(i32),

    #[error("container root {0} is not valid UTF-8")]
    InvalidPath(PathBuf),
}

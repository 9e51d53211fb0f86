//! Running external helper binaries (`tar`, `rm`) and checking their exit status.
//!
//! Everything else in this runtime talks to the kernel directly through `nix`/`libc`;
//! these two are the only operations left as subprocess calls, since shelling out to
//! coreutils for recursive archive extraction and directory removal is simpler and
//! no less correct than reimplementing them.

use log::{debug, trace};
use std::ffi::OsStr;
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Runs `program` with `args`, failing if it exits non-zero.
pub fn run<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Result<(), ProcessError> {
    trace!("running {} {:?}", program, args.iter().map(AsRef::as_ref).collect::<Vec<_>>());
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProcessError::NonZeroExit {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!("{} finished: {}", program, output.status);
    Ok(())
}

/// Runs `program` with `args`, logging but not failing on a non-zero exit. Used for
/// teardown steps where the container record is being removed regardless.
pub fn run_best_effort<S: AsRef<OsStr>>(program: &str, args: &[S]) {
    if let Err(err) = run(program, args) {
        debug!("ignoring failure from best-effort command: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_succeeds_on_zero_exit() {
        let true_bin = which::which("true").expect("true(1) not found");
        run(true_bin.to_str().unwrap(), &[] as &[&str]).unwrap();
    }

    #[test]
    fn run_fails_on_nonzero_exit() {
        let false_bin = which::which("false").expect("false(1) not found");
        let err = run(false_bin.to_str().unwrap(), &[] as &[&str]).unwrap_err();
        assert!(matches!(err, ProcessError::NonZeroExit { .. }));
    }

    #[test]
    fn run_fails_on_missing_binary() {
        let err = run("no-such-binary-on-this-system", &[] as &[&str]).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn run_best_effort_does_not_panic_on_failure() {
        let false_bin = which::which("false").expect("false(1) not found");
        run_best_effort(false_bin.to_str().unwrap(), &[] as &[&str]);
    }
}

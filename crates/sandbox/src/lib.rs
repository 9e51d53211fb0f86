//! Namespace Launcher: clones a container's init process into its own
//! mount/uts/pid/net namespaces, assembles its root filesystem, and execs
//! the user command there.

pub mod child;
pub mod error;
pub mod launch;

pub use error::{Result, SandboxError};
pub use launch::{launch, Child, LaunchConfig, DEFAULT_STACK_SIZE};

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::path::PathBuf;

    // Building a `LaunchConfig` and constructing the CStrings it needs is
    // the only part of this crate exercisable without root and a mount
    // namespace; the rest is covered by `#[ignore]`-gated integration tests
    // in `container`.
    #[test]
    fn launch_config_accepts_command_and_args() {
        let config = LaunchConfig {
            id: "deadbeef01".into(),
            image_dir: PathBuf::from("/containers/__extracted/alpine"),
            root: PathBuf::from("/containers/deadbeef01/root"),
            diff_dir: PathBuf::from("/containers/deadbeef01/diff"),
            work_dir: PathBuf::from("/containers/deadbeef01/work"),
            old_root: PathBuf::from("/containers/deadbeef01/root/old-rootdeadbeef01"),
            command: CString::new("/bin/sh").unwrap(),
            argv: vec![CString::new("/bin/sh").unwrap(), CString::new("-c").unwrap()],
            stack_size: DEFAULT_STACK_SIZE,
        };
        assert_eq!(config.id, "deadbeef01");
        assert_eq!(config.argv.len(), 2);
    }
}

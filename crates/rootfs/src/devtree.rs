//! Minimal `/proc`, `/sys`, `/dev` tree created inside a freshly pivoted root.
//!
//! Order matters: `/dev` must be mounted as tmpfs before the device nodes and
//! `/dev/pts` are created under it, and all of this runs after the mount
//! namespace has been detached from the host (`MS_PRIVATE|MS_REC` remount in
//! `sandbox::launch`) so none of it is visible outside the container.

use nix::mount::{mount, MsFlags};
use nix::sys::stat::{mknod, Mode, SFlag};
use nix::unistd::mkdir;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DevTreeError {
    #[error("mounting {fstype} on {target}: {source}")]
    Mount {
        fstype: &'static str,
        target: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("creating directory {path}: {source}")]
    MkDir {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("creating device node {path}: {source}")]
    MkNod {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("creating symlink {path} -> {target}: {source}")]
    Symlink {
        path: PathBuf,
        target: &'static str,
        #[source]
        source: std::io::Error,
    },
}

struct DeviceNode {
    name: &'static str,
    mode: u32,
    major: u64,
    minor: u64,
}

const DEVICE_NODES: &[DeviceNode] = &[
    DeviceNode { name: "urandom", mode: 0o666, major: 1, minor: 9 },
    DeviceNode { name: "random", mode: 0o666, major: 1, minor: 8 },
    DeviceNode { name: "full", mode: 0o666, major: 1, minor: 7 },
    DeviceNode { name: "zero", mode: 0o666, major: 1, minor: 5 },
    DeviceNode { name: "null", mode: 0o666, major: 1, minor: 3 },
    DeviceNode { name: "tty", mode: 0o666, major: 5, minor: 0 },
    DeviceNode { name: "console", mode: 0o620, major: 5, minor: 1 },
    DeviceNode { name: "ptmx", mode: 0o620, major: 5, minor: 2 },
];

const SYMLINKS: &[(&str, &str)] = &[
    ("stdin", "/proc/self/fd/0"),
    ("stdout", "/proc/self/fd/1"),
    ("stderr", "/proc/self/fd/2"),
    ("kcore", "/proc/kcore"),
    ("fd", "/proc/fd"),
];

/// Mounts `proc`, `sysfs`, a tmpfs `/dev` and `devpts`, then populates `/dev`
/// with the standard character device nodes and stdio symlinks, all relative
/// to `root` (the container's new filesystem root after pivoting).
pub fn populate_devtree(root: &Path) -> Result<(), DevTreeError> {
    let proc_dir = root.join("proc");
    mount_fs("proc", &proc_dir, Mode::from_bits_truncate(0o555))?;

    let sys_dir = root.join("sys");
    mount_fs("sysfs", &sys_dir, Mode::from_bits_truncate(0o555))?;

    let dev_dir = root.join("dev");
    mount_fs("tmpfs", &dev_dir, Mode::from_bits_truncate(0o755))?;

    let pts_dir = dev_dir.join("pts");
    mkdir(&pts_dir, Mode::from_bits_truncate(0o755)).map_err(|source| DevTreeError::MkDir {
        path: pts_dir.clone(),
        source,
    })?;
    mount(
        Some("devpts"),
        &pts_dir,
        Some("devpts"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|source| DevTreeError::Mount {
        fstype: "devpts",
        target: pts_dir,
        source,
    })?;

    for node in DEVICE_NODES {
        let path = dev_dir.join(node.name);
        mknod(
            &path,
            SFlag::S_IFCHR,
            Mode::from_bits_truncate(node.mode),
            nix::sys::stat::makedev(node.major, node.minor),
        )
        .map_err(|source| DevTreeError::MkNod { path, source })?;
    }

    for (name, target) in SYMLINKS {
        let path = dev_dir.join(name);
        symlink(target, &path).map_err(|source| DevTreeError::Symlink {
            path,
            target,
            source,
        })?;
    }

    Ok(())
}

fn mount_fs(fstype: &'static str, target: &Path, mode: Mode) -> Result<(), DevTreeError> {
    mkdir(target, mode).or_else(|source| {
        if source == nix::errno::Errno::EEXIST {
            Ok(())
        } else {
            Err(DevTreeError::MkDir {
                path: target.to_path_buf(),
                source,
            })
        }
    })?;
    mount(
        Some(fstype),
        target,
        Some(fstype),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|source| DevTreeError::Mount {
        fstype,
        target: target.to_path_buf(),
        source,
    })
}

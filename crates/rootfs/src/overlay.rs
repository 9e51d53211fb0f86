//! Overlay mount assembly: `work/`, `diff/`, `root/` under the container
//! directory, with `root/` becoming an overlayfs mount of the cached image
//! (lowerdir), the container's private diff (upperdir) and scratch (workdir).

use nix::mount::{mount, MsFlags};
use std::fs::{create_dir, set_permissions, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DIR_MODE: u32 = 0o755;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("creating overlay directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mounting overlay on {target}: {source}")]
    Mount {
        target: PathBuf,
        #[source]
        source: nix::Error,
    },
}

/// Creates `root`, `diff` and `work_dir`, then mounts an overlayfs on `root` with
/// `image_dir` as its sole lowerdir. Every directory must not already exist;
/// presence of any of them indicates a stale or conflicting container directory
/// and is treated as fatal, leaving whatever was created for post-mortem.
pub fn mount_overlay(
    image_dir: &Path,
    root: &Path,
    diff_dir: &Path,
    work_dir: &Path,
) -> Result<(), OverlayError> {
    make_dir(root)?;
    make_dir(diff_dir)?;
    make_dir(work_dir)?;

    let options = format!(
        "lowerdir={},upperdir={},workdir={}",
        image_dir.display(),
        diff_dir.display(),
        work_dir.display()
    );

    mount(
        Some("overlay"),
        root,
        Some("overlay"),
        MsFlags::empty(),
        Some(options.as_str()),
    )
    .map_err(|source| OverlayError::Mount {
        target: root.to_path_buf(),
        source,
    })
}

fn make_dir(path: &Path) -> Result<(), OverlayError> {
    create_dir(path).map_err(|source| OverlayError::CreateDir {
        path: path.to_path_buf(),
        source,
    })?;
    set_permissions(path, Permissions::from_mode(DIR_MODE)).map_err(|source| {
        OverlayError::CreateDir {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mount_overlay_fails_fatally_if_root_already_exists() {
        let base = tempdir().unwrap();
        let image = base.path().join("image");
        std::fs::create_dir(&image).unwrap();
        let root = base.path().join("root");
        std::fs::create_dir(&root).unwrap();
        let diff = base.path().join("diff");
        let work = base.path().join("work");

        let err = mount_overlay(&image, &root, &diff, &work).unwrap_err();
        assert!(matches!(err, OverlayError::CreateDir { .. }));
    }
}

//! Typed path construction for everything derived from a container id.
//!
//! Joins are checked against `PATH_MAX` and rejected with an error rather than
//! silently truncating, so callers never hand-format a path themselves.

use getset::Getters;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("path for {what} exceeds PATH_MAX ({len} bytes)")]
    Overflow { what: &'static str, len: usize },
}

pub type Result<T> = std::result::Result<T, PathError>;

#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct Paths {
    containers_path: PathBuf,
    images_path: PathBuf,
}

impl Paths {
    pub fn new(containers_path: impl Into<PathBuf>, images_path: impl Into<PathBuf>) -> Self {
        Self {
            containers_path: containers_path.into(),
            images_path: images_path.into(),
        }
    }

    /// `containers_path/__extracted`, the parent of every cached image rootfs.
    pub fn extracted_root(&self) -> Result<PathBuf> {
        checked_join("extracted image cache root", &self.containers_path, "__extracted")
    }

    /// `containers_path/__extracted/<image_name>`, the shared, content-addressed lowerdir.
    pub fn extracted_image_dir(&self, image_name: &str) -> Result<PathBuf> {
        checked_join(
            "extracted image directory",
            &self.extracted_root()?,
            image_name,
        )
    }

    /// `images_path/<image_name>.tar.gz`.
    pub fn image_archive(&self, image_name: &str) -> Result<PathBuf> {
        checked_join(
            "image archive",
            &self.images_path,
            format!("{}.tar.gz", image_name),
        )
    }

    /// `containers_path/<id>`, the container's private scratch directory.
    pub fn container_dir(&self, id: &str) -> Result<PathBuf> {
        checked_join("container directory", &self.containers_path, id)
    }

    /// `container_dir/root`, the overlay mountpoint and later the new `/`.
    pub fn root(&self, id: &str) -> Result<PathBuf> {
        checked_join("container root", &self.container_dir(id)?, "root")
    }

    /// `container_dir/work`, the overlay workdir.
    pub fn work_dir(&self, id: &str) -> Result<PathBuf> {
        checked_join("overlay workdir", &self.container_dir(id)?, "work")
    }

    /// `container_dir/diff`, the overlay upperdir.
    pub fn diff_dir(&self, id: &str) -> Result<PathBuf> {
        checked_join("overlay diff dir", &self.container_dir(id)?, "diff")
    }

    /// `root/old-root<id>`, the pivot_root detach target.
    pub fn old_root(&self, id: &str) -> Result<PathBuf> {
        checked_join(
            "pivot_root old root",
            &self.root(id)?,
            format!("old-root{}", id),
        )
    }
}

fn checked_join(what: &'static str, base: &Path, part: impl AsRef<Path>) -> Result<PathBuf> {
    let joined = base.join(part);
    let len = joined.as_os_str().len();
    if len > libc::PATH_MAX as usize {
        return Err(PathError::Overflow { what, len });
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> Paths {
        Paths::new("containers", "images")
    }

    #[test]
    fn container_dir_joins_id() {
        let p = paths();
        assert_eq!(p.container_dir("deadbeef01").unwrap(), PathBuf::from("containers/deadbeef01"));
    }

    #[test]
    fn root_work_diff_are_siblings_under_container_dir() {
        let p = paths();
        let id = "deadbeef01";
        assert_eq!(p.root(id).unwrap(), PathBuf::from("containers/deadbeef01/root"));
        assert_eq!(p.work_dir(id).unwrap(), PathBuf::from("containers/deadbeef01/work"));
        assert_eq!(p.diff_dir(id).unwrap(), PathBuf::from("containers/deadbeef01/diff"));
    }

    #[test]
    fn extracted_image_dir_is_shared_and_not_per_container() {
        let p = paths();
        assert_eq!(
            p.extracted_image_dir("alpine").unwrap(),
            PathBuf::from("containers/__extracted/alpine")
        );
    }

    #[test]
    fn image_archive_appends_tar_gz() {
        let p = paths();
        assert_eq!(
            p.image_archive("alpine").unwrap(),
            PathBuf::from("images/alpine.tar.gz")
        );
    }

    #[test]
    fn old_root_is_suffixed_with_id_to_avoid_collisions() {
        let p = paths();
        assert_eq!(
            p.old_root("deadbeef01").unwrap(),
            PathBuf::from("containers/deadbeef01/root/old-rootdeadbeef01")
        );
    }

    #[test]
    fn overflow_is_rejected() {
        let p = Paths::new("x".repeat(libc::PATH_MAX as usize), "images");
        assert!(matches!(
            p.container_dir("id").unwrap_err(),
            PathError::Overflow { .. }
        ));
    }
}

//! Extracting cached image archives into the shared, content-addressed rootfs
//! directory overlay mounts read from as their lowerdir.
//!
//! Extraction is idempotent: if `<containers_path>/__extracted/<image_name>`
//! already exists it's reused as-is and nothing is re-extracted. Creating that
//! directory is also how two extractions of the same image racing within one
//! controller process are told apart from a cache hit — the loser sees
//! `std::io::ErrorKind::AlreadyExists` and reports [`ImageCacheError::Race`].

use common::{PathError, Paths};
use log::info;
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

const DIR_MODE: u32 = 0o755;

#[derive(Error, Debug)]
pub enum ImageCacheError {
    #[error("image archive not found for {image_name}")]
    NotFound { image_name: String },

    #[error("another extraction of {image_name} is already in progress")]
    Race { image_name: String },

    #[error(transparent)]
    Extract(#[from] common::ProcessError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("creating {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Serializes concurrent extraction attempts against the same image name within
/// one controller process.
#[derive(Default)]
struct InProgress(Mutex<HashSet<String>>);

impl InProgress {
    fn enter(&self, image_name: &str) -> Result<InProgressGuard<'_>, ImageCacheError> {
        let mut set = self.0.lock().expect("in-progress set poisoned");
        if !set.insert(image_name.to_string()) {
            return Err(ImageCacheError::Race {
                image_name: image_name.to_string(),
            });
        }
        Ok(InProgressGuard {
            set: &self.0,
            image_name: image_name.to_string(),
        })
    }
}

struct InProgressGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    image_name: String,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-progress set poisoned")
            .remove(&self.image_name);
    }
}

pub struct ImageCache {
    paths: Paths,
    in_progress: InProgress,
}

impl ImageCache {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            in_progress: InProgress::default(),
        }
    }

    /// Returns the path to the extracted rootfs for `image_name`, extracting the
    /// archive first if this is the first time it's been requested.
    pub fn ensure_extracted(&self, image_name: &str) -> Result<PathBuf, ImageCacheError> {
        let extracted_dir = self.paths.extracted_image_dir(image_name)?;

        if extracted_dir.exists() {
            info!("found existing image cache for {}, not extracting", image_name);
            return Ok(extracted_dir);
        }

        let _guard = self.in_progress.enter(image_name)?;

        let archive = self.paths.image_archive(image_name)?;
        if !archive.exists() {
            return Err(ImageCacheError::NotFound {
                image_name: image_name.to_string(),
            });
        }

        let extracted_root = self.paths.extracted_root()?;
        std::fs::create_dir_all(&extracted_root).map_err(|source| ImageCacheError::CreateDir {
            path: extracted_root.clone(),
            source,
        })?;
        std::fs::set_permissions(&extracted_root, std::fs::Permissions::from_mode(DIR_MODE))
            .map_err(|source| ImageCacheError::CreateDir {
                path: extracted_root,
                source,
            })?;

        match std::fs::create_dir(&extracted_dir) {
            Ok(()) => {}
            Err(source) if source.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ImageCacheError::Race {
                    image_name: image_name.to_string(),
                });
            }
            Err(source) => {
                return Err(ImageCacheError::CreateDir {
                    path: extracted_dir,
                    source,
                })
            }
        }
        std::fs::set_permissions(&extracted_dir, std::fs::Permissions::from_mode(DIR_MODE))
            .map_err(|source| ImageCacheError::CreateDir {
                path: extracted_dir.clone(),
                source,
            })?;

        info!("extracting image {}", image_name);
        common::run(
            "tar",
            &[
                "-xzf",
                archive.to_str().expect("archive path is not valid utf-8"),
                "-C",
                extracted_dir.to_str().expect("extracted dir is not valid utf-8"),
            ],
        )?;

        Ok(extracted_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_archive(images_dir: &std::path::Path, name: &str) -> PathBuf {
        let staging = tempdir().unwrap();
        std::fs::write(staging.path().join("hello.txt"), b"hi").unwrap();
        let archive = images_dir.join(format!("{}.tar.gz", name));
        let tar = which::which("tar").expect("tar(1) not found");
        std::process::Command::new(tar)
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(staging.path())
            .arg("hello.txt")
            .status()
            .unwrap();
        archive
    }

    #[test]
    fn ensure_extracted_populates_cache_on_first_call() {
        let containers = tempdir().unwrap();
        let images = tempdir().unwrap();
        make_archive(images.path(), "alpine");

        let cache = ImageCache::new(Paths::new(containers.path(), images.path()));
        let dir = cache.ensure_extracted("alpine").unwrap();

        assert!(dir.join("hello.txt").exists());
    }

    #[test]
    fn ensure_extracted_is_idempotent_on_second_call() {
        let containers = tempdir().unwrap();
        let images = tempdir().unwrap();
        make_archive(images.path(), "alpine");

        let cache = ImageCache::new(Paths::new(containers.path(), images.path()));
        let first = cache.ensure_extracted("alpine").unwrap();
        let second = cache.ensure_extracted("alpine").unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn ensure_extracted_reports_missing_archive() {
        let containers = tempdir().unwrap();
        let images = tempdir().unwrap();

        let cache = ImageCache::new(Paths::new(containers.path(), images.path()));
        let err = cache.ensure_extracted("does-not-exist").unwrap_err();

        assert!(matches!(err, ImageCacheError::NotFound { .. }));
    }

    #[test]
    fn ensure_extracted_reports_race_when_directory_already_claimed() {
        let containers = tempdir().unwrap();
        let images = tempdir().unwrap();
        make_archive(images.path(), "alpine");

        let cache = ImageCache::new(Paths::new(containers.path(), images.path()));
        let _guard = cache.in_progress.enter("alpine").unwrap();

        let err = cache.ensure_extracted("alpine").unwrap_err();
        assert!(matches!(err, ImageCacheError::Race { .. }));
    }
}

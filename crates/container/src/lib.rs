//! Lifecycle Controller: the one orchestration point that ties the
//! identifier/path service, image cache, namespace launcher and network
//! attacher together into a single `run`.

use common::{IdAllocator, Paths};
use image::ImageCache;
use ipnetwork::Ipv4Network;
use log::{info, warn};
use network::BridgeConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sandbox::LaunchConfig;
use std::ffi::CString;
use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use thiserror::Error;

pub use ipnetwork;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(transparent)]
    Path(#[from] common::PathError),

    #[error(transparent)]
    Image(#[from] image::ImageCacheError),

    #[error(transparent)]
    Sandbox(#[from] sandbox::SandboxError),

    #[error(transparent)]
    Network(#[from] network::NetworkError),

    #[error("command {0:?} is not a valid path")]
    InvalidCommand(String),

    #[error("creating container directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything `run` needs as process-wide constants; kept as plain fields
/// here (not the root binary's `Config`,
/// which also carries CLI/env plumbing) so this crate has no clap/serde
/// dependency of its own.
pub struct RunConfig {
    pub containers_path: PathBuf,
    pub images_path: PathBuf,
    pub id_length: usize,
    pub stack_size: usize,
    pub bridge_name: String,
    pub container_address: Ipv4Network,
    pub gateway: Ipv4Addr,
}

/// Runs one container to completion: allocate an id, extract the image,
/// launch the namespaced child, attach its network, wait for it to exit, and
/// tear everything down. Returns once the container has exited; teardown
/// failures are logged and swallowed, matching the invariant that a
/// container's resources never outlive a `run` call that reached this point.
pub async fn run(
    config: &RunConfig,
    image_name: &str,
    command: &str,
    args: &[String],
) -> Result<(), ContainerError> {
    let paths = Paths::new(&config.containers_path, &config.images_path);
    let allocator = IdAllocator::new(config.id_length);
    let mut rng = StdRng::from_entropy();

    let id = allocator.allocate(&mut rng, |candidate| {
        paths
            .container_dir(candidate)
            .map(|dir| dir.exists())
            .unwrap_or(false)
    });

    info!("creating container {}", id);

    // Image cache populated before the container directory exists: a
    // container directory must never be observable without a usable image
    // already backing it.
    let image_cache = ImageCache::new(paths.clone());
    let image_dir = image_cache.ensure_extracted(image_name)?;

    let container_dir = paths.container_dir(id.as_str())?;
    std::fs::create_dir_all(&container_dir).map_err(|source| ContainerError::CreateDir {
        path: container_dir.clone(),
        source,
    })?;
    std::fs::set_permissions(&container_dir, std::fs::Permissions::from_mode(0o755)).map_err(
        |source| ContainerError::CreateDir {
            path: container_dir.clone(),
            source,
        },
    )?;

    let root = paths.root(id.as_str())?;
    let diff_dir = paths.diff_dir(id.as_str())?;
    let work_dir = paths.work_dir(id.as_str())?;
    let old_root = paths.old_root(id.as_str())?;

    let command_cstring =
        CString::new(command).map_err(|_| ContainerError::InvalidCommand(command.to_string()))?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(command_cstring.clone());
    for arg in args {
        argv.push(CString::new(arg.as_str()).map_err(|_| ContainerError::InvalidCommand(arg.clone()))?);
    }

    let launch_config = LaunchConfig {
        id: id.as_str().to_string(),
        image_dir,
        root,
        diff_dir,
        work_dir,
        old_root,
        command: command_cstring,
        argv,
        stack_size: config.stack_size,
    };

    let child = sandbox::launch(launch_config)?;
    let pid = child.pid();

    let bridge_config = BridgeConfig {
        bridge_name: config.bridge_name.clone(),
        container_address: config.container_address,
        gateway: config.gateway,
    };
    let attach_result = network::attach(&bridge_config, id.as_str(), pid).await;

    // The child must never be left blocked on the readiness pipe, whether
    // network attach succeeded or not.
    if let Err(err) = child.signal_ready() {
        warn!("signalling child readiness: {}", err);
    }

    let wait_result = child.wait();

    // Unconditional: even a partial attach failure (veth created but bridge
    // attach or in-namespace addressing failed) can leave the pinned netns
    // and half-wired veth behind, and both are named purely from `id`.
    network::teardown(id.as_str()).await;
    common::run_best_effort(
        "rm",
        &[
            "-rf",
            container_dir.to_str().unwrap_or_default(),
        ],
    );

    attach_result?;
    wait_result.map_err(ContainerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(containers: &std::path::Path, images: &std::path::Path) -> RunConfig {
        RunConfig {
            containers_path: containers.to_path_buf(),
            images_path: images.to_path_buf(),
            id_length: 10,
            stack_size: 8 * 1024 * 1024,
            bridge_name: "docker0".into(),
            container_address: "172.17.0.8/16".parse().unwrap(),
            gateway: "172.17.0.1".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn run_reports_missing_image_before_touching_namespaces() {
        let containers = tempfile::tempdir().unwrap();
        let images = tempfile::tempdir().unwrap();
        let config = test_config(containers.path(), images.path());

        let err = run(&config, "does-not-exist", "/bin/true", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::Image(_)));
    }

    #[tokio::test]
    async fn run_reports_embedded_nul_in_command_as_invalid() {
        let containers = tempfile::tempdir().unwrap();
        let images = tempfile::tempdir().unwrap();

        let staging = tempfile::tempdir().unwrap();
        std::fs::write(staging.path().join("hello.txt"), b"hi").unwrap();
        let archive = images.path().join("alpine.tar.gz");
        let tar = which::which("tar").unwrap();
        std::process::Command::new(tar)
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(staging.path())
            .arg("hello.txt")
            .status()
            .unwrap();

        let config = test_config(containers.path(), images.path());
        let err = run(&config, "alpine", "bad\0command", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::InvalidCommand(_)));
    }

    // Requires CAP_SYS_ADMIN (namespaces), CAP_NET_ADMIN (veth/bridge) and a
    // prebuilt `<images>/alpine.tar.gz`; run explicitly with
    // `cargo test -- --ignored`.
    #[ignore]
    #[tokio::test]
    async fn run_executes_true_end_to_end() {
        let containers = tempfile::tempdir().unwrap();
        let images = tempfile::tempdir().unwrap();
        let config = test_config(containers.path(), images.path());

        run(&config, "alpine", "/bin/true", &[]).await.unwrap();
    }
}

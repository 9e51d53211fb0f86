//! Code that runs only inside the cloned child, between `clone` returning
//! there and `execvp` replacing it.
//!
//! Every step here is fatal: on error we write one line to stderr naming the
//! operation and the kernel's error string, then call `std::process::exit`.
//! There is no `Result` return path back to the parent — the parent only
//! ever learns about a child-side failure as a non-zero wait status. This
//! mirrors how container runtimes in this corpus structure their clone
//! callback (e.g. the `container-runtime` crate's namespace setup), and is
//! necessary here regardless: after `pivot_root` the child's view of the
//! filesystem no longer matches the parent's, so there is nothing meaningful
//! left for a shared logger to write to.

use crate::LaunchConfig;
use nix::unistd::{chdir, execvp, read, sethostname};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::RawFd;

const EXIT_SETUP_FAILURE: i32 = 2;
const EXIT_EXEC_FAILURE: i32 = 3;

/// Runs the child setup sequence and execs the user command. Never returns.
pub fn run(config: &LaunchConfig, ready_read_fd: RawFd) -> ! {
    if let Err(err) = sethostname(&config.id) {
        fatal("set hostname", &err.to_string());
    }

    if let Err(err) = remount_root_private() {
        fatal("remount / private", &err.to_string());
    }

    if let Err(err) = rootfs::mount_overlay(
        &config.image_dir,
        &config.root,
        &config.diff_dir,
        &config.work_dir,
    ) {
        fatal("mount overlay", &err.to_string());
    }

    if let Err(err) = rootfs::populate_devtree(&config.root) {
        fatal("populate device tree", &err.to_string());
    }

    if let Err(err) = std::fs::create_dir(&config.old_root) {
        fatal("create pivot_root target", &err.to_string());
    }
    if let Err(err) =
        std::fs::set_permissions(&config.old_root, std::fs::Permissions::from_mode(0o777))
    {
        fatal("chmod pivot_root target", &err.to_string());
    }

    if let Err(err) = nix::unistd::pivot_root(&config.root, &config.old_root) {
        fatal("pivot_root", &err.to_string());
    }

    if let Err(err) = chdir("/") {
        fatal("chdir to new root", &err.to_string());
    }

    let old_root_after_pivot = std::path::PathBuf::from("/").join(
        config
            .old_root
            .file_name()
            .expect("old_root has a file name"),
    );
    if let Err(err) = nix::mount::umount2(&old_root_after_pivot, nix::mount::MntFlags::MNT_DETACH)
    {
        fatal("detach old root", &err.to_string());
    }
    if let Err(err) = std::fs::remove_dir(&old_root_after_pivot) {
        fatal("remove old root", &err.to_string());
    }

    wait_for_readiness(ready_read_fd);

    let err = execvp(&config.command, &config.argv).expect_err("execvp only returns on failure");
    fatal_exec(&err.to_string());
}

fn remount_root_private() -> nix::Result<()> {
    nix::mount::mount(
        None::<&str>,
        "/",
        None::<&str>,
        nix::mount::MsFlags::MS_PRIVATE | nix::mount::MsFlags::MS_REC,
        None::<&str>,
    )
}

/// Blocks until the parent has finished (or given up on) network attach.
/// This is the mandatory readiness handshake: without it the child could
/// `execvp` into a user process before its network interface exists.
fn wait_for_readiness(ready_read_fd: RawFd) {
    let mut buf = [0u8; 1];
    match read(ready_read_fd, &mut buf) {
        Ok(1) => {}
        Ok(_) => fatal("wait for readiness signal", "parent closed pipe without signalling"),
        Err(err) => fatal("wait for readiness signal", &err.to_string()),
    }
}

fn fatal(step: &str, reason: &str) -> ! {
    eprintln!("boxrun: {}: {}", step, reason);
    std::process::exit(EXIT_SETUP_FAILURE);
}

fn fatal_exec(reason: &str) -> ! {
    eprintln!("boxrun: exec: {}", reason);
    std::process::exit(EXIT_EXEC_FAILURE);
}

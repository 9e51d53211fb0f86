//! boxrun: a minimal OCI-style container runtime.
//!
//! Usage: `boxrun help` or no arguments prints usage and exits 1; `boxrun run
//! <image_name> <cmd> [cmd-args...]` runs a container; any other token prints
//! an invalid-command notice and exits 0.

mod config;

use clap::Parser;
use common::chain;
use config::Config;
use container::{ContainerError, RunConfig};
use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

const USAGE: &str = "usage: boxrun run <image_name> <cmd> [cmd-args...]";

const EXIT_USAGE: i32 = 1;
const EXIT_ARGUMENT_FAILURE: i32 = 3;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = Config::parse();

    env_logger::Builder::new()
        .filter_level(config.log_level())
        .init();

    install_sigint_handler();

    let argv = config.argv();
    let code = match argv.split_first() {
        None => {
            print_usage();
            EXIT_USAGE
        }
        Some((first, rest)) if first == "help" => {
            print_usage();
            let _ = rest;
            EXIT_USAGE
        }
        Some((first, rest)) if first == "run" => run_command(&config, rest).await,
        Some((other, _)) => {
            println!("invalid command: {}", other);
            0
        }
    };

    std::process::exit(code);
}

fn print_usage() {
    println!("{}", USAGE);
}

/// Installs a no-op SIGINT handler so Ctrl-C during `boxrun run` doesn't kill
/// the controller with the default disposition. The controller keeps waiting
/// on the child as usual; the child runs in its own process group and is
/// unaffected, so it terminates naturally instead of being orphaned mid-setup
/// or mid-teardown.
fn install_sigint_handler() {
    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            warn!("installing SIGINT handler: {}", err);
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            interrupt.recv().await;
            info!("received SIGINT, ignoring it until the container exits");
        }
    });
}

async fn run_command(config: &Config, rest: &[String]) -> i32 {
    let (image_name, cmd_argv) = match rest.split_first() {
        Some(parts) => parts,
        None => {
            print_usage();
            return EXIT_USAGE;
        }
    };
    let (command, args) = match cmd_argv.split_first() {
        Some(parts) => parts,
        None => {
            print_usage();
            return EXIT_USAGE;
        }
    };

    let run_config = RunConfig {
        containers_path: config.containers_path().clone(),
        images_path: config.images_path().clone(),
        id_length: config.id_length(),
        stack_size: config.stack_size(),
        bridge_name: config.bridge_name().clone(),
        container_address: config.container_ip(),
        gateway: config.bridge_gateway(),
    };

    match container::run(&run_config, image_name, command, args).await {
        Ok(()) => 0,
        Err(err) => {
            let code = exit_code_for(&err);
            let err = anyhow::Error::new(err);
            eprintln!("boxrun: {}", chain(&err));
            code
        }
    }
}

fn exit_code_for(err: &ContainerError) -> i32 {
    match err {
        ContainerError::InvalidCommand(_) => EXIT_ARGUMENT_FAILURE,
        ContainerError::Path(_)
        | ContainerError::Image(_)
        | ContainerError::Sandbox(_)
        | ContainerError::Network(_)
        | ContainerError::CreateDir { .. } => EXIT_USAGE,
    }
}

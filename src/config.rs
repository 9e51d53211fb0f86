//! Configuration related structures.

use clap::Parser;
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use ipnetwork::Ipv4Network;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[derive(Builder, Parser, CopyGetters, Getters, Clone, Debug, Deserialize, Serialize)]
#[builder(default, pattern = "owned", setter(into))]
#[serde(rename_all = "kebab-case")]
#[command(
    name = "boxrun",
    about = "A minimal OCI-style container runtime",
    after_help = "More info at: https://github.com/containers/containrs"
)]
pub struct Config {
    #[get = "pub"]
    #[arg(
        default_value = "containers",
        env = "BOXRUN_CONTAINERS_PATH",
        long = "containers-path"
    )]
    /// Base directory under which per-container scratch directories live.
    containers_path: PathBuf,

    #[get = "pub"]
    #[arg(
        default_value = "images",
        env = "BOXRUN_IMAGES_PATH",
        long = "images-path"
    )]
    /// Base directory containing `<image_name>.tar.gz` archives.
    images_path: PathBuf,

    #[get_copy = "pub"]
    #[arg(
        default_value = "10",
        env = "BOXRUN_ID_LENGTH",
        long = "id-length"
    )]
    /// Length, in hex characters, of a generated container id.
    id_length: usize,

    #[get_copy = "pub"]
    #[arg(
        default_value = "8388608",
        env = "BOXRUN_STACK_SIZE",
        long = "stack-size"
    )]
    /// Size in bytes of the stack given to the cloned container init process.
    stack_size: usize,

    #[get = "pub"]
    #[arg(
        default_value = "docker0",
        env = "BOXRUN_BRIDGE_NAME",
        long = "bridge-name"
    )]
    /// Host bridge interface a container's veth is attached to.
    bridge_name: String,

    #[get_copy = "pub"]
    #[builder(default = "\"172.17.0.1\".parse().unwrap()")]
    #[arg(
        default_value = "172.17.0.1",
        env = "BOXRUN_BRIDGE_GATEWAY",
        long = "bridge-gateway"
    )]
    /// Gateway address installed as the container's default route.
    bridge_gateway: Ipv4Addr,

    #[get_copy = "pub"]
    #[builder(default = "\"172.17.0.8/16\".parse().unwrap()")]
    #[arg(
        default_value = "172.17.0.8/16",
        env = "BOXRUN_CONTAINER_IP",
        long = "container-ip"
    )]
    /// Address (with prefix) assigned to the container's network interface.
    container_ip: Ipv4Network,

    #[get_copy = "pub"]
    #[arg(
        default_value = "info",
        env = "BOXRUN_LOG_LEVEL",
        long = "log-level",
        short = 'l',
        value_name = "LEVEL"
    )]
    /// The logging level of the application.
    log_level: LevelFilter,

    #[get = "pub"]
    #[builder(default)]
    #[serde(skip)]
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    /// The literal `help` / `run <image> <cmd> [args...]` / invalid-token
    /// command line, parsed by hand in `main` rather than by clap, since the
    /// runtime's command surface is intentionally just that literal
    /// interface and not a general subcommand tree.
    argv: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn build_config() -> Result<()> {
        let c = ConfigBuilder::default()
            .log_level(LevelFilter::Warn)
            .containers_path("/some/path")
            .id_length(12usize)
            .build()?;

        assert_eq!(c.log_level(), LevelFilter::Warn);
        assert_eq!(&c.containers_path().display().to_string(), "/some/path");
        assert_eq!(c.id_length(), 12);

        Ok(())
    }

    #[test]
    fn parsed_defaults_match_the_documented_constants() -> Result<()> {
        let c = Config::parse_from(["boxrun"]);

        assert_eq!(c.containers_path(), &PathBuf::from("containers"));
        assert_eq!(c.images_path(), &PathBuf::from("images"));
        assert_eq!(c.id_length(), 10);
        assert_eq!(c.stack_size(), 8 * 1024 * 1024);
        assert_eq!(c.bridge_name(), "docker0");
        assert_eq!(c.bridge_gateway(), "172.17.0.1".parse::<Ipv4Addr>()?);
        assert_eq!(c.container_ip(), "172.17.0.8/16".parse::<Ipv4Network>()?);
        assert_eq!(c.log_level(), LevelFilter::Info);

        Ok(())
    }
}

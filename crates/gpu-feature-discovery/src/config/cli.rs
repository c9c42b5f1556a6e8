use std::path::PathBuf;

use clap::Parser;
use utils::version;

/// Generates labels for the NVIDIA accelerators and MIG devices of a node.
#[derive(Parser, Debug, Default)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        env = "MIG_STRATEGY",
        help = "Strategy for exposing MIG devices: none, single or mixed [default: none]"
    )]
    pub mig_strategy: Option<String>,

    #[arg(
        long,
        env = "FAIL_ON_INIT_ERROR",
        action = clap::ArgAction::Set,
        help = "Fail if NVML cannot be initialized [default: true]"
    )]
    pub fail_on_init_error: Option<bool>,

    #[arg(
        long,
        env = "GFD_ONESHOT",
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Label once and exit"
    )]
    pub oneshot: Option<bool>,

    #[arg(
        long,
        env = "GFD_NO_TIMESTAMP",
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Do not add the timestamp label"
    )]
    pub no_timestamp: Option<bool>,

    #[arg(
        long,
        env = "GFD_SLEEP_INTERVAL",
        help = "Seconds between labeling passes [default: 60]"
    )]
    pub sleep_interval: Option<u64>,

    #[arg(
        long,
        env = "GFD_OUTPUT_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Feature file the labels are written to"
    )]
    pub output_file: Option<PathBuf>,

    #[arg(
        long,
        env = "GFD_MACHINE_TYPE_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "File containing the machine type [default: /sys/class/dmi/id/product_name]"
    )]
    pub machine_type_file: Option<PathBuf>,

    #[arg(
        long,
        env = "CONFIG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to a YAML config file"
    )]
    pub config_file: Option<PathBuf>,

    #[arg(
        long,
        env = "NODE_NAME",
        help = "Also patch the labels onto this Kubernetes node"
    )]
    pub node_name: Option<String>,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,
}

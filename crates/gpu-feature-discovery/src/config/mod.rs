//! Labeler configuration.
//!
//! Values come from the command line (or its environment variables), then
//! the optional YAML config file, then built-in defaults.

use core::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;

pub mod cli;
pub mod file;
pub mod strategy;

pub use cli::Cli;
pub use file::ConfigFile;
pub use strategy::MigStrategy;

pub const DEFAULT_OUTPUT_FILE: &str = "/etc/kubernetes/node-feature-discovery/features.d/gfd";
pub const DEFAULT_MACHINE_TYPE_FILE: &str = "/sys/class/dmi/id/product_name";
pub const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, derive_more::Display)]
pub enum ConfigurationError {
    #[display("Unknown MIG strategy: {value}")]
    UnknownStrategy { value: String },
    #[display("Failed to read config file {}", path.display())]
    ReadFile { path: PathBuf },
    #[display("Invalid config file")]
    InvalidFile,
    #[display("Unsupported config version: {version}")]
    UnsupportedVersion { version: String },
    #[display("Sleep interval must be at least one second")]
    ZeroSleepInterval,
}

impl Error for ConfigurationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mig_strategy: MigStrategy,
    pub fail_on_init_error: bool,
    pub gfd: GfdConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GfdConfig {
    pub oneshot: bool,
    pub no_timestamp: bool,
    pub sleep_interval: Duration,
    pub output_file: PathBuf,
    pub machine_type_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mig_strategy: MigStrategy::None,
            fail_on_init_error: true,
            gfd: GfdConfig {
                oneshot: false,
                no_timestamp: false,
                sleep_interval: DEFAULT_SLEEP_INTERVAL,
                output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
                machine_type_file: PathBuf::from(DEFAULT_MACHINE_TYPE_FILE),
            },
        }
    }
}

impl Config {
    /// Loads the config file named on the command line, if any, and
    /// resolves the final configuration.
    pub fn load(cli: &Cli) -> Result<Self, Report<ConfigurationError>> {
        let file = match &cli.config_file {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        Self::resolve(cli, &file)
    }

    pub fn resolve(cli: &Cli, file: &ConfigFile) -> Result<Self, Report<ConfigurationError>> {
        let defaults = Config::default();
        let gfd = &file.flags.gfd;

        let mig_strategy = match cli
            .mig_strategy
            .as_deref()
            .or(file.flags.mig_strategy.as_deref())
        {
            Some(value) => value.parse()?,
            None => defaults.mig_strategy,
        };

        let sleep_interval = match cli.sleep_interval.or(gfd.sleep_interval) {
            Some(0) => return Err(Report::new(ConfigurationError::ZeroSleepInterval)),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.gfd.sleep_interval,
        };

        Ok(Self {
            mig_strategy,
            fail_on_init_error: cli
                .fail_on_init_error
                .or(file.flags.fail_on_init_error)
                .unwrap_or(defaults.fail_on_init_error),
            gfd: GfdConfig {
                oneshot: cli.oneshot.or(gfd.oneshot).unwrap_or(defaults.gfd.oneshot),
                no_timestamp: cli
                    .no_timestamp
                    .or(gfd.no_timestamp)
                    .unwrap_or(defaults.gfd.no_timestamp),
                sleep_interval,
                output_file: cli
                    .output_file
                    .clone()
                    .or_else(|| gfd.output_file.clone())
                    .unwrap_or(defaults.gfd.output_file),
                machine_type_file: cli
                    .machine_type_file
                    .clone()
                    .or_else(|| gfd.machine_type_file.clone())
                    .unwrap_or(defaults.gfd.machine_type_file),
            },
        })
    }
}

use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;

use super::ConfigurationError;

pub const SUPPORTED_VERSION: &str = "v1";

/// On-disk config file. Every field is optional; unset fields fall back to
/// the command line or built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub version: Option<String>,
    #[serde(default)]
    pub flags: FileFlags,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFlags {
    pub mig_strategy: Option<String>,
    pub fail_on_init_error: Option<bool>,
    #[serde(default)]
    pub gfd: FileGfdFlags,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGfdFlags {
    pub oneshot: Option<bool>,
    pub no_timestamp: Option<bool>,
    pub output_file: Option<PathBuf>,
    /// seconds
    pub sleep_interval: Option<u64>,
    pub machine_type_file: Option<PathBuf>,
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self, Report<ConfigurationError>> {
        let file: ConfigFile =
            serde_yaml::from_str(content).change_context(ConfigurationError::InvalidFile)?;

        match file.version.as_deref() {
            None | Some(SUPPORTED_VERSION) => Ok(file),
            Some(other) => Err(Report::new(ConfigurationError::UnsupportedVersion {
                version: other.to_string(),
            })),
        }
    }

    pub fn load(path: &Path) -> Result<Self, Report<ConfigurationError>> {
        tracing::info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).change_context_lazy(|| {
            ConfigurationError::ReadFile {
                path: path.to_path_buf(),
            }
        })?;

        Self::parse(&content).attach_printable_lazy(|| format!("config file: {}", path.display()))
    }
}

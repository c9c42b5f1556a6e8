use std::str::FromStr;

use error_stack::Report;

use super::ConfigurationError;

/// How MIG devices are advertised as schedulable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, derive_more::Display)]
pub enum MigStrategy {
    /// Only whole accelerators are labeled.
    #[default]
    #[display("none")]
    None,
    /// All MIG devices on the node share one profile and are advertised as
    /// `nvidia.com/gpu`.
    #[display("single")]
    Single,
    /// Each MIG profile is advertised as its own `nvidia.com/mig-<profile>`.
    #[display("mixed")]
    Mixed,
}

impl FromStr for MigStrategy {
    type Err = Report<ConfigurationError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MigStrategy::None),
            "single" => Ok(MigStrategy::Single),
            "mixed" => Ok(MigStrategy::Mixed),
            other => Err(Report::new(ConfigurationError::UnknownStrategy {
                value: other.to_string(),
            })),
        }
    }
}

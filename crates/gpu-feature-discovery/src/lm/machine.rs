use std::path::Path;

use error_stack::Report;

use crate::config::MigStrategy;
use crate::nvml::DeviceLib;
use crate::nvml::QueryError;
use crate::nvml::QueryResult;

use super::resource::sanitize;
use super::Labels;

pub const MIG_STRATEGY_LABEL: &str = "nvidia.com/mig.strategy";
pub const MACHINE_LABEL: &str = "nvidia.com/gpu.machine";
pub const TIMESTAMP_LABEL: &str = "nvidia.com/gfd.timestamp";

pub fn mig_strategy_labels(strategy: MigStrategy) -> Labels {
    [(MIG_STRATEGY_LABEL, strategy)].into_iter().collect()
}

/// `nvidia.com/cuda.driver.*` and `nvidia.com/cuda.runtime.*` labels.
pub fn version_labels<L: DeviceLib>(lib: &L) -> QueryResult<Labels> {
    let driver = lib.driver_version()?;
    let (major, minor, rev) = parse_driver_version(&driver).ok_or_else(|| {
        Report::new(QueryError::Driver {
            attribute: "driver version",
        })
        .attach_printable(format!("unexpected driver version format: {driver}"))
    })?;

    let cuda = lib.cuda_driver_version()?;

    Ok([
        ("nvidia.com/cuda.driver.major", major.to_string()),
        ("nvidia.com/cuda.driver.minor", minor.to_string()),
        ("nvidia.com/cuda.driver.rev", rev.to_string()),
        ("nvidia.com/cuda.runtime.major", (cuda / 1000).to_string()),
        ("nvidia.com/cuda.runtime.minor", (cuda % 1000 / 10).to_string()),
    ]
    .into_iter()
    .collect())
}

/// Splits `535.104.05` into its parts. The revision is optional.
fn parse_driver_version(version: &str) -> Option<(&str, &str, &str)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?;
    let minor = parts.next()?;
    let rev = parts.next().unwrap_or("");
    if parts.next().is_some() {
        return None;
    }

    let numeric = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if major.is_empty() || minor.is_empty() || !numeric(major) || !numeric(minor) || !numeric(rev)
    {
        return None;
    }
    Some((major, minor, rev))
}

/// `nvidia.com/gpu.machine` read from `path`; `unknown` when unreadable.
pub fn machine_type_labels(path: &Path) -> Labels {
    let machine = match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => sanitize(content.trim()),
        Ok(_) => "unknown".to_string(),
        Err(e) => {
            tracing::warn!("Failed to read machine type from {:?}: {e}", path);
            "unknown".to_string()
        }
    };
    [(MACHINE_LABEL, machine)].into_iter().collect()
}

pub fn timestamp_labels() -> Labels {
    [(TIMESTAMP_LABEL, chrono::Utc::now().timestamp())]
        .into_iter()
        .collect()
}

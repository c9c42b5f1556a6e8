//! Label generation.
//!
//! A labeling pass reads the node's accelerators once and produces one
//! [`Labels`] set. The pieces are merged in a fixed order, later pieces
//! replacing earlier values for the same key:
//! 1. full-GPU resource labels of the first accelerator
//! 2. the MIG strategy label and MIG resource labels (strategy != none)
//! 3. driver version labels
//! 4. machine type and timestamp labels

mod labels;
pub mod machine;
pub mod mig_strategy;
pub mod resource;

pub use labels::Labels;

use crate::config::Config;
use crate::config::MigStrategy;
use crate::nvml::DeviceLib;
use crate::nvml::QueryResult;

/// Full-GPU and MIG labels for the node's accelerators.
pub fn resource_labels<L: DeviceLib>(lib: &L, strategy: MigStrategy) -> QueryResult<Labels> {
    let count = lib.device_count()?;
    if count == 0 {
        return Ok(Labels::new());
    }

    let full_gpu = resource::gpu_resource_labels(&lib.device(0)?, count)?;
    if strategy == MigStrategy::None {
        return Ok(full_gpu);
    }

    Ok(full_gpu
        .merge(machine::mig_strategy_labels(strategy))
        .merge(mig_strategy::mig_labels(lib, strategy)?))
}

/// Runs one labeling pass. Without a device library (NVML unavailable) only
/// machine-level labels are produced.
pub fn node_labels<L: DeviceLib>(lib: Option<&L>, config: &Config) -> QueryResult<Labels> {
    let mut labels = Labels::new();

    if let Some(lib) = lib {
        labels = labels.merge(resource_labels(lib, config.mig_strategy)?);
        if lib.device_count()? > 0 {
            labels = labels.merge(machine::version_labels(lib)?);
        }
    }

    labels = labels.merge(machine::machine_type_labels(&config.gfd.machine_type_file));
    if !config.gfd.no_timestamp {
        labels = labels.merge(machine::timestamp_labels());
    }

    Ok(labels)
}

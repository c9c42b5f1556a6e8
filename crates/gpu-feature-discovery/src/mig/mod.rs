//! MIG device discovery.
//!
//! Classifies the node's accelerators by MIG mode and collects their MIG
//! devices in a single pass, and derives the canonical profile name of a
//! MIG device from its attributes.

use crate::nvml::GpuDevice;
use crate::nvml::MigAttributes;
use crate::nvml::MigDevice;
use crate::nvml::QueryResult;

/// Canonical profile name of a MIG device, e.g. `3g.20gb`.
pub fn mig_device_name<M: MigDevice>(mig: &M) -> QueryResult<String> {
    Ok(profile_name(&mig.attributes()?))
}

/// `<slices>g.<gb>gb`, with memory rounded up to the next whole GB.
pub fn profile_name(attributes: &MigAttributes) -> String {
    let gb = attributes.memory_size_mb.div_ceil(1024);
    format!("{}g.{}gb", attributes.gpu_instance_slice_count, gb)
}

/// Snapshot of the node's MIG state for one labeling pass.
///
/// Every device lands in exactly one of `mig_enabled` / `mig_disabled`.
pub struct DeviceInfo<D: GpuDevice> {
    pub mig_enabled: Vec<D>,
    pub mig_disabled: Vec<D>,
    /// At least one MIG-enabled device exposes no MIG devices.
    pub any_mig_enabled_empty: bool,
    /// MIG devices of all MIG-enabled devices, in discovery order.
    pub mig_devices: Vec<D::MigDevice>,
}

impl<D: GpuDevice> DeviceInfo<D> {
    /// Reads the MIG mode and MIG devices of every device. Visits the whole
    /// list even after an empty device is seen; any read failure aborts.
    pub fn build(devices: impl IntoIterator<Item = D>) -> QueryResult<Self> {
        let mut info = Self {
            mig_enabled: Vec::new(),
            mig_disabled: Vec::new(),
            any_mig_enabled_empty: false,
            mig_devices: Vec::new(),
        };

        for device in devices {
            if !device.is_mig_enabled()? {
                info.mig_disabled.push(device);
                continue;
            }

            let migs = device.mig_devices()?;
            if migs.is_empty() {
                info.any_mig_enabled_empty = true;
            }
            info.mig_devices.extend(migs);
            info.mig_enabled.push(device);
        }

        tracing::debug!(
            mig_enabled = info.mig_enabled.len(),
            mig_disabled = info.mig_disabled.len(),
            mig_devices = info.mig_devices.len(),
            any_mig_enabled_empty = info.any_mig_enabled_empty,
            "Collected MIG device info"
        );

        Ok(info)
    }
}

//! Accelerator query layer.
//!
//! Labeling never talks to NVML directly. It goes through the [`DeviceLib`],
//! [`GpuDevice`] and [`MigDevice`] traits so the decision logic can run
//! against mock devices in tests:
//! - [`NvmlLib`]: the NVML-backed implementation used by the daemon
//! - `mock::MockLib` (tests only): an in-memory device tree

use core::error::Error;

use error_stack::Report;

pub mod device;
#[cfg(test)]
pub mod mock;

pub use device::NvmlLib;

/// Errors raised while reading accelerator state.
#[derive(Debug, derive_more::Display)]
pub enum QueryError {
    #[display("Failed to initialize NVML")]
    Init,
    #[display("Failed to get device count")]
    DeviceCount,
    #[display("Failed to get device at index {index}")]
    Device { index: u32 },
    #[display("Failed to read {attribute} of device {device}")]
    Attribute {
        device: String,
        attribute: &'static str,
    },
    #[display("Failed to read {attribute} of the driver")]
    Driver { attribute: &'static str },
}

impl Error for QueryError {}

pub type QueryResult<T> = Result<T, Report<QueryError>>;

/// CUDA compute capability of a full accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeCapability {
    pub major: i32,
    pub minor: i32,
}

/// Hardware attributes of a single MIG device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MigAttributes {
    pub multiprocessor_count: u32,
    pub shared_copy_engine_count: u32,
    pub shared_decoder_count: u32,
    pub shared_encoder_count: u32,
    pub shared_jpeg_count: u32,
    pub shared_ofa_count: u32,
    pub gpu_instance_slice_count: u32,
    pub compute_instance_slice_count: u32,
    pub memory_size_mb: u64,
}

/// Entry point to the accelerators installed on the node.
pub trait DeviceLib {
    type Device: GpuDevice;

    fn device_count(&self) -> QueryResult<u32>;

    fn device(&self, index: u32) -> QueryResult<Self::Device>;

    /// Kernel driver version, e.g. `535.104.05`.
    fn driver_version(&self) -> QueryResult<String>;

    /// CUDA driver API version encoded as `major * 1000 + minor * 10`.
    fn cuda_driver_version(&self) -> QueryResult<i32>;

    /// All accelerators in index order. Fails on the first unreadable handle.
    fn devices(&self) -> QueryResult<Vec<Self::Device>> {
        let count = self.device_count()?;
        (0..count).map(|index| self.device(index)).collect()
    }
}

/// A full physical accelerator.
pub trait GpuDevice {
    type MigDevice: MigDevice;

    fn name(&self) -> QueryResult<String>;

    fn total_memory_mib(&self) -> QueryResult<u64>;

    fn compute_capability(&self) -> QueryResult<ComputeCapability>;

    /// Whether MIG mode is currently enabled. Devices without MIG support
    /// report `false`.
    fn is_mig_enabled(&self) -> QueryResult<bool>;

    /// Active MIG devices in discovery order. Empty when MIG is disabled.
    fn mig_devices(&self) -> QueryResult<Vec<Self::MigDevice>>;
}

/// One MIG partition of a [`GpuDevice`].
pub trait MigDevice {
    /// Model name of the accelerator hosting this partition.
    fn parent_name(&self) -> QueryResult<String>;

    fn attributes(&self) -> QueryResult<MigAttributes>;
}

//! In-memory device tree implementing the query traits.
//!
//! Used by the labeling tests to describe a node's accelerators without
//! NVML. Individual reads can be made to fail to exercise error paths.

use error_stack::Report;

use super::ComputeCapability;
use super::DeviceLib;
use super::GpuDevice;
use super::MigAttributes;
use super::MigDevice;
use super::QueryError;
use super::QueryResult;

#[derive(Debug, Clone)]
pub struct MockLib {
    devices: Vec<MockDevice>,
    driver_version: String,
    cuda_driver_version: i32,
    fail_device_count: bool,
    fail_device_lookup: bool,
}

impl Default for MockLib {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLib {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            driver_version: "535.104.05".to_string(),
            cuda_driver_version: 12020,
            fail_device_count: false,
            fail_device_lookup: false,
        }
    }

    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn with_driver_version(mut self, version: impl Into<String>, cuda: i32) -> Self {
        self.driver_version = version.into();
        self.cuda_driver_version = cuda;
        self
    }

    /// Make `device_count` fail.
    pub fn failing(mut self) -> Self {
        self.fail_device_count = true;
        self
    }

    /// Make `device` fail for every index. `devices` still lists them.
    pub fn failing_device_lookup(mut self) -> Self {
        self.fail_device_lookup = true;
        self
    }
}

impl DeviceLib for MockLib {
    type Device = MockDevice;

    fn device_count(&self) -> QueryResult<u32> {
        if self.fail_device_count {
            return Err(Report::new(QueryError::DeviceCount));
        }
        Ok(self.devices.len() as u32)
    }

    fn device(&self, index: u32) -> QueryResult<MockDevice> {
        if self.fail_device_lookup {
            return Err(Report::new(QueryError::Device { index }));
        }
        self.devices
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Report::new(QueryError::Device { index }))
    }

    fn devices(&self) -> QueryResult<Vec<MockDevice>> {
        self.device_count()?;
        Ok(self.devices.clone())
    }

    fn driver_version(&self) -> QueryResult<String> {
        Ok(self.driver_version.clone())
    }

    fn cuda_driver_version(&self) -> QueryResult<i32> {
        Ok(self.cuda_driver_version)
    }
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    name: String,
    memory_mib: u64,
    compute: ComputeCapability,
    mig_enabled: bool,
    migs: Vec<MockMigDevice>,
    fail_mig_mode: bool,
    fail_name: bool,
}

impl MockDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            memory_mib: 40960,
            compute: ComputeCapability { major: 8, minor: 0 },
            mig_enabled: false,
            migs: Vec::new(),
            fail_mig_mode: false,
            fail_name: false,
        }
    }

    /// An A100 40GB with MIG disabled.
    pub fn a100() -> Self {
        Self::new("NVIDIA A100-SXM4-40GB")
    }

    pub fn with_memory_mib(mut self, memory_mib: u64) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    pub fn with_compute_capability(mut self, major: i32, minor: i32) -> Self {
        self.compute = ComputeCapability { major, minor };
        self
    }

    /// Enable MIG mode and expose the given partitions.
    pub fn with_migs(mut self, migs: impl IntoIterator<Item = MockMigDevice>) -> Self {
        self.mig_enabled = true;
        self.migs = migs.into_iter().collect();
        self
    }

    /// Make the MIG mode read fail.
    pub fn failing_mig_mode(mut self) -> Self {
        self.fail_mig_mode = true;
        self
    }

    /// Make the model name read fail.
    pub fn failing_name(mut self) -> Self {
        self.fail_name = true;
        self
    }
}

impl GpuDevice for MockDevice {
    type MigDevice = MockMigDevice;

    fn name(&self) -> QueryResult<String> {
        if self.fail_name {
            return Err(Report::new(QueryError::Attribute {
                device: format!("device {}", self.name),
                attribute: "name",
            }));
        }
        Ok(self.name.clone())
    }

    fn total_memory_mib(&self) -> QueryResult<u64> {
        Ok(self.memory_mib)
    }

    fn compute_capability(&self) -> QueryResult<ComputeCapability> {
        Ok(self.compute)
    }

    fn is_mig_enabled(&self) -> QueryResult<bool> {
        if self.fail_mig_mode {
            return Err(Report::new(QueryError::Attribute {
                device: self.name.clone(),
                attribute: "MIG mode",
            }));
        }
        Ok(self.mig_enabled)
    }

    fn mig_devices(&self) -> QueryResult<Vec<MockMigDevice>> {
        if !self.is_mig_enabled()? {
            return Ok(Vec::new());
        }
        Ok(self
            .migs
            .iter()
            .cloned()
            .map(|mut mig| {
                mig.parent_name = self.name.clone();
                mig
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMigDevice {
    parent_name: String,
    attributes: Option<MigAttributes>,
}

impl MockMigDevice {
    /// A partition with `slices` GPU instance slices and `memory_mb` of memory.
    pub fn profile(slices: u32, memory_mb: u64) -> Self {
        Self {
            parent_name: String::new(),
            attributes: Some(MigAttributes {
                multiprocessor_count: slices * 14,
                shared_copy_engine_count: slices,
                shared_decoder_count: slices / 2,
                shared_encoder_count: 0,
                shared_jpeg_count: slices / 7,
                shared_ofa_count: slices / 7,
                gpu_instance_slice_count: slices,
                compute_instance_slice_count: slices,
                memory_size_mb: memory_mb,
            }),
        }
    }

    /// A partition whose attributes cannot be read.
    pub fn unreadable() -> Self {
        Self {
            parent_name: String::new(),
            attributes: None,
        }
    }
}

impl MigDevice for MockMigDevice {
    fn parent_name(&self) -> QueryResult<String> {
        Ok(self.parent_name.clone())
    }

    fn attributes(&self) -> QueryResult<MigAttributes> {
        self.attributes.ok_or_else(|| {
            Report::new(QueryError::Attribute {
                device: format!("MIG on {}", self.parent_name),
                attribute: "attributes",
            })
        })
    }
}

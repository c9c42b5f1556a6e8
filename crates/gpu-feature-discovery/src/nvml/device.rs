use std::ffi::OsStr;
use std::os::raw::c_uint;
use std::ptr;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use nvml_wrapper::error::nvml_sym;
use nvml_wrapper::error::nvml_try;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Device;
use nvml_wrapper::Nvml;
use nvml_wrapper_sys::bindings::nvmlDevice_t;
use nvml_wrapper_sys::bindings::NvmlLib as SysLib;

use super::ComputeCapability;
use super::DeviceLib;
use super::GpuDevice;
use super::MigAttributes;
use super::MigDevice;
use super::QueryError;
use super::QueryResult;

/// `nvmlDeviceGetMigMode` value for an enabled current mode.
const MIG_MODE_ENABLED: u32 = 1;

const PRIMARY_NVML_LIB: &str = "libnvidia-ml.so.1";
const NVML_FALLBACK_LIB: &str = "libnvidia-ml.so";

/// NVML-backed [`DeviceLib`].
///
/// Device handles are re-resolved by index on every call, so the wrappers
/// handed out are plain owned values that can outlive any single borrow of
/// the library. MIG enumeration is not covered by `nvml-wrapper` and goes
/// through the raw symbols in `sys`.
#[derive(Clone)]
pub struct NvmlLib {
    nvml: Arc<Nvml>,
    sys: Arc<SysLib>,
}

impl NvmlLib {
    pub fn init() -> QueryResult<Self> {
        let nvml = match Nvml::init() {
            Ok(nvml) => {
                tracing::info!("NVML initialized successfully");
                nvml
            }
            Err(e) => {
                tracing::warn!("Standard NVML init failed ({e}), trying with explicit library path");
                let nvml = Nvml::builder()
                    .lib_path(OsStr::new(PRIMARY_NVML_LIB))
                    .init()
                    .change_context(QueryError::Init)?;
                tracing::info!("NVML initialized with explicit library path");
                nvml
            }
        };

        Ok(Self {
            nvml: Arc::new(nvml),
            sys: Arc::new(load_sys_lib()?),
        })
    }
}

/// Loads the raw symbol table. NVML itself is already initialized by
/// [`Nvml`], which shares the same loaded library.
fn load_sys_lib() -> QueryResult<SysLib> {
    // SAFETY: loading libnvidia-ml runs no initializers beyond the ones
    // already run when `Nvml` loaded the same library.
    match unsafe { SysLib::new(PRIMARY_NVML_LIB) } {
        Ok(lib) => Ok(lib),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load {}", PRIMARY_NVML_LIB);
            unsafe { SysLib::new(NVML_FALLBACK_LIB) }
                .change_context(QueryError::Init)
                .attach_printable("raw NVML symbols")
        }
    }
}

/// `nvmlDeviceGetMaxMigDeviceCount` on a full device.
fn max_mig_device_count(sys: &SysLib, parent: &Device<'_>) -> Result<u32, NvmlError> {
    let sym = nvml_sym(sys.nvmlDeviceGetMaxMigDeviceCount.as_ref())?;
    let mut count: c_uint = 0;
    // SAFETY: `parent` holds a valid handle for the lifetime of the call.
    unsafe {
        nvml_try(sym(parent.handle(), &mut count))?;
    }
    Ok(count)
}

/// `nvmlDeviceGetMigDeviceHandleByIndex` on a full device.
fn mig_device_handle(
    sys: &SysLib,
    parent: &Device<'_>,
    index: u32,
) -> Result<nvmlDevice_t, NvmlError> {
    let sym = nvml_sym(sys.nvmlDeviceGetMigDeviceHandleByIndex.as_ref())?;
    let mut handle: nvmlDevice_t = ptr::null_mut();
    // SAFETY: `parent` holds a valid handle; `handle` is written on success.
    unsafe {
        nvml_try(sym(parent.handle(), index, &mut handle))?;
    }
    Ok(handle)
}

impl DeviceLib for NvmlLib {
    type Device = NvmlDevice;

    fn device_count(&self) -> QueryResult<u32> {
        self.nvml
            .device_count()
            .change_context(QueryError::DeviceCount)
    }

    fn device(&self, index: u32) -> QueryResult<NvmlDevice> {
        // resolve once so an out-of-range index fails here, not on first use
        self.nvml
            .device_by_index(index)
            .change_context(QueryError::Device { index })?;
        Ok(NvmlDevice {
            nvml: self.nvml.clone(),
            sys: self.sys.clone(),
            index,
        })
    }

    fn driver_version(&self) -> QueryResult<String> {
        self.nvml
            .sys_driver_version()
            .change_context(QueryError::Driver {
                attribute: "driver version",
            })
    }

    fn cuda_driver_version(&self) -> QueryResult<i32> {
        self.nvml
            .sys_cuda_driver_version()
            .change_context(QueryError::Driver {
                attribute: "CUDA driver version",
            })
    }
}

pub struct NvmlDevice {
    nvml: Arc<Nvml>,
    sys: Arc<SysLib>,
    index: u32,
}

impl NvmlDevice {
    fn handle(&self) -> QueryResult<Device<'_>> {
        self.nvml
            .device_by_index(self.index)
            .change_context(QueryError::Device { index: self.index })
    }

    fn attribute_error(&self, attribute: &'static str) -> QueryError {
        QueryError::Attribute {
            device: format!("GPU {}", self.index),
            attribute,
        }
    }
}

impl GpuDevice for NvmlDevice {
    type MigDevice = NvmlMigDevice;

    fn name(&self) -> QueryResult<String> {
        self.handle()?
            .name()
            .change_context_lazy(|| self.attribute_error("name"))
    }

    fn total_memory_mib(&self) -> QueryResult<u64> {
        let info = self
            .handle()?
            .memory_info()
            .change_context_lazy(|| self.attribute_error("memory info"))?;
        Ok(info.total / (1024 * 1024))
    }

    fn compute_capability(&self) -> QueryResult<ComputeCapability> {
        let cc = self
            .handle()?
            .cuda_compute_capability()
            .change_context_lazy(|| self.attribute_error("compute capability"))?;
        Ok(ComputeCapability {
            major: cc.major,
            minor: cc.minor,
        })
    }

    fn is_mig_enabled(&self) -> QueryResult<bool> {
        match self.handle()?.mig_mode() {
            Ok(mode) => Ok(mode.current == MIG_MODE_ENABLED),
            Err(NvmlError::NotSupported) => Ok(false),
            Err(e) => Err(Report::new(e).change_context(self.attribute_error("MIG mode"))),
        }
    }

    fn mig_devices(&self) -> QueryResult<Vec<NvmlMigDevice>> {
        if !self.is_mig_enabled()? {
            return Ok(Vec::new());
        }

        let device = self.handle()?;
        let max = max_mig_device_count(&self.sys, &device)
            .change_context_lazy(|| self.attribute_error("max MIG device count"))?;

        let mut migs = Vec::new();
        for mig_index in 0..max {
            match mig_device_handle(&self.sys, &device, mig_index) {
                Ok(_) => migs.push(NvmlMigDevice {
                    nvml: self.nvml.clone(),
                    sys: self.sys.clone(),
                    parent_index: self.index,
                    mig_index,
                }),
                // slots without a configured instance are simply skipped
                Err(NvmlError::NotFound) => continue,
                Err(e) => {
                    return Err(Report::new(e)
                        .change_context(self.attribute_error("MIG device handle"))
                        .attach_printable(format!("MIG index {mig_index}")));
                }
            }
        }
        Ok(migs)
    }
}

pub struct NvmlMigDevice {
    nvml: Arc<Nvml>,
    sys: Arc<SysLib>,
    parent_index: u32,
    mig_index: u32,
}

impl NvmlMigDevice {
    fn attribute_error(&self, attribute: &'static str) -> QueryError {
        QueryError::Attribute {
            device: format!("MIG {}:{}", self.parent_index, self.mig_index),
            attribute,
        }
    }
}

impl MigDevice for NvmlMigDevice {
    fn parent_name(&self) -> QueryResult<String> {
        self.nvml
            .device_by_index(self.parent_index)
            .change_context(QueryError::Device {
                index: self.parent_index,
            })?
            .name()
            .change_context_lazy(|| self.attribute_error("parent name"))
    }

    fn attributes(&self) -> QueryResult<MigAttributes> {
        let parent = self
            .nvml
            .device_by_index(self.parent_index)
            .change_context(QueryError::Device {
                index: self.parent_index,
            })?;
        let handle = mig_device_handle(&self.sys, &parent, self.mig_index)
            .change_context_lazy(|| self.attribute_error("handle"))?;
        // SAFETY: `handle` was just returned by NVML for a live parent and
        // belongs to the same `Nvml` instance.
        let mig = unsafe { Device::new(handle, &self.nvml) };
        let attrs = mig
            .attributes()
            .change_context_lazy(|| self.attribute_error("attributes"))?;

        Ok(MigAttributes {
            multiprocessor_count: attrs.multiprocessor_count,
            shared_copy_engine_count: attrs.shared_copy_engine_count,
            shared_decoder_count: attrs.shared_decoder_count,
            shared_encoder_count: attrs.shared_encoder_count,
            shared_jpeg_count: attrs.shared_jpeg_count,
            shared_ofa_count: attrs.shared_ofa_count,
            gpu_instance_slice_count: attrs.gpu_instance_slice_count,
            compute_instance_slice_count: attrs.compute_instance_slice_count,
            memory_size_mb: attrs.memory_size_mb,
        })
    }
}

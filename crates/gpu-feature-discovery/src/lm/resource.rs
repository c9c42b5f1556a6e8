use crate::mig;
use crate::nvml::ComputeCapability;
use crate::nvml::GpuDevice;
use crate::nvml::MigDevice;
use crate::nvml::QueryResult;

use super::Labels;

/// Resource name of whole accelerators, and of uniform MIG devices under
/// the `single` strategy.
pub const FULL_GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Prefix of per-profile MIG resources under the `mixed` strategy.
pub const MIG_RESOURCE_PREFIX: &str = "nvidia.com/mig-";

/// Builds label keys scoped to one resource name, e.g. `nvidia.com/gpu.count`.
struct ResourceLabeler<'a> {
    resource_name: &'a str,
}

impl<'a> ResourceLabeler<'a> {
    fn new(resource_name: &'a str) -> Self {
        Self { resource_name }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}.{}", self.resource_name, suffix)
    }

    fn update_label(&self, labels: &mut Labels, suffix: &str, value: impl ToString) {
        labels.insert(self.key(suffix), value);
    }

    /// `<resource>.product` built from `parts` joined by `-`, spaces removed.
    fn product_label(&self, parts: &[&str]) -> Labels {
        let product = parts
            .iter()
            .map(|part| sanitize(part))
            .collect::<Vec<_>>()
            .join("-");

        let mut labels = Labels::new();
        self.update_label(&mut labels, "product", product);
        labels
    }
}

/// Replaces each space with `-` so the value is a valid label value.
pub(crate) fn sanitize(value: &str) -> String {
    value.replace(' ', "-")
}

/// Labels describing whole accelerators, taken from `device`.
pub fn gpu_resource_labels<D: GpuDevice>(device: &D, count: u32) -> QueryResult<Labels> {
    if count == 0 {
        return Ok(Labels::new());
    }

    let model = device.name()?;
    let memory = device.total_memory_mib()?;
    let compute = device.compute_capability()?;

    let rl = ResourceLabeler::new(FULL_GPU_RESOURCE);
    let mut labels = rl.product_label(&[model.as_str()]);
    rl.update_label(&mut labels, "count", count);
    rl.update_label(&mut labels, "replicas", 1);
    rl.update_label(&mut labels, "memory", memory);
    rl.update_label(&mut labels, "family", arch_family(compute));
    rl.update_label(&mut labels, "compute.major", compute.major);
    rl.update_label(&mut labels, "compute.minor", compute.minor);

    Ok(labels)
}

/// Labels advertising `count` MIG devices of `device`'s profile under
/// `resource_name`.
pub fn mig_resource_labels<M: MigDevice>(
    resource_name: &str,
    device: &M,
    count: usize,
) -> QueryResult<Labels> {
    if count == 0 {
        return Ok(Labels::new());
    }

    let model = device.parent_name()?;
    let attributes = device.attributes()?;
    let profile = mig::profile_name(&attributes);

    let rl = ResourceLabeler::new(resource_name);
    let mut labels = rl.product_label(&[model.as_str(), "MIG", profile.as_str()]);
    rl.update_label(&mut labels, "count", count);
    rl.update_label(&mut labels, "replicas", 1);
    rl.update_label(&mut labels, "memory", attributes.memory_size_mb);
    rl.update_label(&mut labels, "multiprocessors", attributes.multiprocessor_count);
    rl.update_label(&mut labels, "slices.gi", attributes.gpu_instance_slice_count);
    rl.update_label(&mut labels, "slices.ci", attributes.compute_instance_slice_count);
    rl.update_label(&mut labels, "engines.copy", attributes.shared_copy_engine_count);
    rl.update_label(&mut labels, "engines.decoder", attributes.shared_decoder_count);
    rl.update_label(&mut labels, "engines.encoder", attributes.shared_encoder_count);
    rl.update_label(&mut labels, "engines.jpeg", attributes.shared_jpeg_count);
    rl.update_label(&mut labels, "engines.ofa", attributes.shared_ofa_count);

    Ok(labels)
}

/// Degenerate `nvidia.com/gpu` labels marking the node's MIG setup as
/// unusable: product `<model>-MIG-INVALID`, zero count and memory.
pub fn invalid_mig_labels<D: GpuDevice>(device: &D) -> QueryResult<Labels> {
    let model = device.name()?;

    let rl = ResourceLabeler::new(FULL_GPU_RESOURCE);
    let mut labels = rl.product_label(&[model.as_str(), "MIG", "INVALID"]);
    rl.update_label(&mut labels, "count", 0);
    rl.update_label(&mut labels, "memory", 0);

    Ok(labels)
}

fn arch_family(compute: ComputeCapability) -> &'static str {
    match (compute.major, compute.minor) {
        (1, _) => "tesla",
        (2, _) => "fermi",
        (3, _) => "kepler",
        (5, _) => "maxwell",
        (6, _) => "pascal",
        (7, minor) if minor < 5 => "volta",
        (7, _) => "turing",
        (8, minor) if minor < 9 => "ampere",
        (8, _) => "ada-lovelace",
        (9, _) => "hopper",
        (10, _) | (12, _) => "blackwell",
        _ => "undefined",
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::nvml::mock::MockDevice;
    use crate::nvml::mock::MockMigDevice;

    #[test]
    fn full_gpu_labels() {
        let device = MockDevice::new("Tesla V100-SXM2-16GB")
            .with_memory_mib(16384)
            .with_compute_capability(7, 0);

        let labels = gpu_resource_labels(&device, 4).expect("should build labels");

        let expected: Labels = [
            ("nvidia.com/gpu.product", "Tesla-V100-SXM2-16GB"),
            ("nvidia.com/gpu.count", "4"),
            ("nvidia.com/gpu.replicas", "1"),
            ("nvidia.com/gpu.memory", "16384"),
            ("nvidia.com/gpu.family", "volta"),
            ("nvidia.com/gpu.compute.major", "7"),
            ("nvidia.com/gpu.compute.minor", "0"),
        ]
        .into_iter()
        .collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn product_keeps_each_space() {
        let device = MockDevice::new("NVIDIA  A100  PCIe");

        let labels = gpu_resource_labels(&device, 1).expect("should build labels");

        assert_eq!(
            labels.get("nvidia.com/gpu.product"),
            Some("NVIDIA--A100--PCIe")
        );
    }

    #[test]
    fn no_devices_no_labels() {
        let labels = gpu_resource_labels(&MockDevice::a100(), 0).expect("should build labels");
        assert!(labels.is_empty());
    }

    #[test]
    fn mig_labels_use_parent_model_and_profile() {
        let parent = MockDevice::a100().with_migs([MockMigDevice::profile(3, 20096)]);
        let mig = parent
            .mig_devices()
            .expect("should list MIG devices")
            .remove(0);

        let labels =
            mig_resource_labels("nvidia.com/mig-3g.20gb", &mig, 2).expect("should build labels");

        assert_eq!(
            labels.get("nvidia.com/mig-3g.20gb.product"),
            Some("NVIDIA-A100-SXM4-40GB-MIG-3g.20gb")
        );
        assert_eq!(labels.get("nvidia.com/mig-3g.20gb.count"), Some("2"));
        assert_eq!(labels.get("nvidia.com/mig-3g.20gb.memory"), Some("20096"));
        assert_eq!(labels.get("nvidia.com/mig-3g.20gb.slices.gi"), Some("3"));
        assert_eq!(labels.get("nvidia.com/mig-3g.20gb.multiprocessors"), Some("42"));
        assert_eq!(labels.len(), 12);
    }

    #[test]
    fn invalid_labels() {
        let labels = invalid_mig_labels(&MockDevice::a100()).expect("should build labels");

        let expected: Labels = [
            ("nvidia.com/gpu.product", "NVIDIA-A100-SXM4-40GB-MIG-INVALID"),
            ("nvidia.com/gpu.count", "0"),
            ("nvidia.com/gpu.memory", "0"),
        ]
        .into_iter()
        .collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn family_from_compute_capability() {
        let family = |major, minor| arch_family(ComputeCapability { major, minor });
        assert_eq!(family(7, 5), "turing");
        assert_eq!(family(8, 0), "ampere");
        assert_eq!(family(8, 9), "ada-lovelace");
        assert_eq!(family(9, 0), "hopper");
        assert_eq!(family(4, 0), "undefined");
    }
}

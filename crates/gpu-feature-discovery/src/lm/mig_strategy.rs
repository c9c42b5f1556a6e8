//! MIG strategy resolution.
//!
//! Decides, for the configured [`MigStrategy`], which MIG resources the node
//! advertises or whether its MIG setup is invalid for that strategy.

use std::collections::BTreeMap;

use crate::config::MigStrategy;
use crate::mig;
use crate::mig::DeviceInfo;
use crate::nvml::DeviceLib;
use crate::nvml::GpuDevice;
use crate::nvml::MigDevice;
use crate::nvml::QueryResult;

use super::resource;
use super::resource::FULL_GPU_RESOURCE;
use super::resource::MIG_RESOURCE_PREFIX;
use super::Labels;

/// MIG devices of one profile, advertised under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigResource<M> {
    pub name: String,
    /// First discovered MIG device of this profile.
    pub device: M,
    pub count: usize,
}

/// Why a node's MIG setup cannot be labeled under `single`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum InvalidReason {
    #[display("at least one MIG device is enabled but empty")]
    EnabledButEmpty,
    #[display("devices with MIG enabled and disabled detected")]
    MixedEnablement,
    #[display("more than one MIG device type present on node")]
    MultipleProfiles,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome<M> {
    /// No MIG resources to advertise.
    Empty,
    /// MIG resources keyed by profile name.
    Resources(BTreeMap<String, MigResource<M>>),
    Invalid(InvalidReason),
}

/// Groups MIG devices by profile. `resource_name` maps a profile name to
/// the resource it is advertised under.
pub fn aggregate<M, F>(
    migs: impl IntoIterator<Item = M>,
    resource_name: F,
) -> QueryResult<BTreeMap<String, MigResource<M>>>
where
    M: MigDevice,
    F: Fn(&str) -> String,
{
    let mut resources = BTreeMap::new();
    for device in migs {
        let profile = mig::mig_device_name(&device)?;
        resources
            .entry(profile)
            .or_insert_with_key(|profile| MigResource {
                name: resource_name(profile),
                device,
                count: 0,
            })
            .count += 1;
    }
    Ok(resources)
}

/// Resolves the MIG resources of `devices` under `strategy`.
///
/// Under `single` the checks run in a fixed order and the first failing one
/// decides the reason: empty MIG-enabled device, then mixed MIG modes, then
/// more than one profile.
pub fn resolve<D: GpuDevice>(
    strategy: MigStrategy,
    devices: impl IntoIterator<Item = D>,
) -> QueryResult<StrategyOutcome<D::MigDevice>> {
    match strategy {
        MigStrategy::None => Ok(StrategyOutcome::Empty),
        MigStrategy::Single => resolve_single(DeviceInfo::build(devices)?),
        MigStrategy::Mixed => resolve_mixed(DeviceInfo::build(devices)?),
    }
}

fn resolve_single<D: GpuDevice>(info: DeviceInfo<D>) -> QueryResult<StrategyOutcome<D::MigDevice>> {
    // no MIG-enabled devices is equivalent to the `none` strategy
    if info.mig_enabled.is_empty() {
        return Ok(StrategyOutcome::Empty);
    }
    if info.any_mig_enabled_empty {
        return Ok(StrategyOutcome::Invalid(InvalidReason::EnabledButEmpty));
    }
    if !info.mig_disabled.is_empty() {
        return Ok(StrategyOutcome::Invalid(InvalidReason::MixedEnablement));
    }

    let resources = aggregate(info.mig_devices, |_| FULL_GPU_RESOURCE.to_string())?;
    if resources.len() > 1 {
        return Ok(StrategyOutcome::Invalid(InvalidReason::MultipleProfiles));
    }

    Ok(StrategyOutcome::Resources(resources))
}

fn resolve_mixed<D: GpuDevice>(info: DeviceInfo<D>) -> QueryResult<StrategyOutcome<D::MigDevice>> {
    // MIG-enabled devices without MIG devices contribute nothing here
    let resources = aggregate(info.mig_devices, |profile| {
        format!("{MIG_RESOURCE_PREFIX}{profile}")
    })?;
    Ok(StrategyOutcome::Resources(resources))
}

/// MIG labels of the node under `strategy`.
///
/// An invalid `single` setup yields the invalid labels of device 0 and a
/// warning; it is not an error.
pub fn mig_labels<L: DeviceLib>(lib: &L, strategy: MigStrategy) -> QueryResult<Labels> {
    let outcome = match strategy {
        MigStrategy::None => StrategyOutcome::Empty,
        _ => resolve(strategy, lib.devices()?)?,
    };

    match outcome {
        StrategyOutcome::Empty => Ok(Labels::new()),
        StrategyOutcome::Invalid(reason) => {
            tracing::warn!(
                mig_strategy = %strategy,
                %reason,
                "Invalid configuration detected for mig-strategy={strategy}: {reason}"
            );
            resource::invalid_mig_labels(&lib.device(0)?)
        }
        StrategyOutcome::Resources(resources) => resources
            .values()
            .map(|r| resource::mig_resource_labels(&r.name, &r.device, r.count))
            .collect(),
    }
}

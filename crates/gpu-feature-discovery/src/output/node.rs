use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Api;
use kube::Client;
use kube::Config;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;
use tokio::time::sleep;

use super::KubernetesError;
use crate::lm::machine::MACHINE_LABEL;
use crate::lm::machine::MIG_STRATEGY_LABEL;
use crate::lm::machine::TIMESTAMP_LABEL;
use crate::lm::resource::FULL_GPU_RESOURCE;
use crate::lm::resource::MIG_RESOURCE_PREFIX;
use crate::lm::Labels;

/// Suffixes of `nvidia.com/gpu.*` keys the labeler generates. Other keys in
/// that family (`gpu.present`, `gpu.deploy.*`, ...) belong to other
/// controllers.
const GPU_LABEL_SUFFIXES: &[&str] = &[
    "count",
    "replicas",
    "memory",
    "product",
    "family",
    "compute.major",
    "compute.minor",
    "multiprocessors",
    "slices.gi",
    "slices.ci",
    "engines.copy",
    "engines.decoder",
    "engines.encoder",
    "engines.jpeg",
    "engines.ofa",
];

const CUDA_LABEL_PREFIXES: &[&str] = &["nvidia.com/cuda.driver.", "nvidia.com/cuda.runtime."];

const MAX_RETRIES: u32 = 3;

/// Publishes labels straight onto a Node object.
pub struct NodeLabelPublisher {
    api: Api<Node>,
    node_name: String,
}

impl NodeLabelPublisher {
    pub async fn new(
        node_name: String,
        kubeconfig: Option<PathBuf>,
    ) -> Result<Self, Report<KubernetesError>> {
        let client = init_kube_client(kubeconfig).await?;
        Ok(Self {
            api: Api::all(client),
            node_name,
        })
    }

    /// Replaces the node's managed labels with `labels`, retrying with
    /// exponential backoff.
    #[tracing::instrument(skip(self, labels), fields(node = %self.node_name))]
    pub async fn publish(&self, labels: &Labels) -> Result<(), Report<KubernetesError>> {
        self.patch_with_retry(labels).await?;
        tracing::info!("Patched {} labels onto node", labels.len());
        Ok(())
    }

    /// Removes every managed label from the node.
    #[tracing::instrument(skip(self), fields(node = %self.node_name))]
    pub async fn remove(&self) -> Result<(), Report<KubernetesError>> {
        self.patch_with_retry(&Labels::new()).await?;
        tracing::info!("Removed managed labels from node");
        Ok(())
    }

    async fn patch_with_retry(&self, labels: &Labels) -> Result<(), Report<KubernetesError>> {
        let mut retry_count = 0;

        loop {
            match self.patch_labels(labels).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    retry_count += 1;
                    tracing::warn!(
                        "Failed to patch node labels (attempt {}/{}): {e:?}",
                        retry_count,
                        MAX_RETRIES
                    );

                    if retry_count >= MAX_RETRIES {
                        return Err(e.attach_printable(format!(
                            "gave up after {MAX_RETRIES} attempts"
                        )));
                    }
                    sleep(Duration::from_millis(200 * (1 << retry_count))).await;
                }
            }
        }
    }

    async fn patch_labels(&self, labels: &Labels) -> Result<(), Report<KubernetesError>> {
        let node = self
            .api
            .get(&self.node_name)
            .await
            .change_context_lazy(|| KubernetesError::NodeGetFailed {
                node: self.node_name.clone(),
            })?;

        let patch = label_patch(node.metadata.labels.as_ref(), labels);
        self.api
            .patch(
                &self.node_name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .change_context_lazy(|| KubernetesError::PatchFailed {
                node: self.node_name.clone(),
            })?;

        Ok(())
    }
}

/// Whether `key` is one of the labels this labeler generates.
pub fn is_managed_label(key: &str) -> bool {
    if key == MIG_STRATEGY_LABEL || key == MACHINE_LABEL || key == TIMESTAMP_LABEL {
        return true;
    }
    if key.starts_with(MIG_RESOURCE_PREFIX)
        || CUDA_LABEL_PREFIXES
            .iter()
            .any(|prefix| key.starts_with(prefix))
    {
        return true;
    }
    key.strip_prefix(FULL_GPU_RESOURCE)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|suffix| GPU_LABEL_SUFFIXES.contains(&suffix))
}

/// Merge patch setting `labels` and deleting managed labels on the node
/// that are no longer produced. An empty `labels` clears them all.
pub(crate) fn label_patch(existing: Option<&BTreeMap<String, String>>, labels: &Labels) -> Value {
    let mut patch_labels = Map::new();

    for key in existing.into_iter().flat_map(|existing| existing.keys()) {
        if is_managed_label(key) && !labels.contains_key(key) {
            patch_labels.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in labels {
        patch_labels.insert(key.clone(), Value::String(value.clone()));
    }

    json!({ "metadata": { "labels": patch_labels } })
}

async fn init_kube_client(kubeconfig: Option<PathBuf>) -> Result<Client, Report<KubernetesError>> {
    let Some(kubeconfig_path) = kubeconfig else {
        // in-cluster config or ~/.kube/config
        return Client::try_default()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "Failed to create Kubernetes client".to_string(),
            });
    };

    let kubeconfig = Kubeconfig::read_from(&kubeconfig_path).change_context_lazy(|| {
        KubernetesError::ConnectionFailed {
            message: format!("Failed to read kubeconfig {}", kubeconfig_path.display()),
        }
    })?;

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context_lazy(|| KubernetesError::ConnectionFailed {
            message: format!(
                "Failed to build config from kubeconfig {}",
                kubeconfig_path.display()
            ),
        })?;

    Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: "Failed to create Kubernetes client from kubeconfig".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn patch_sets_new_and_clears_stale_labels() {
        let existing: BTreeMap<String, String> = [
            ("kubernetes.io/hostname", "gpu-node-1"),
            ("nvidia.com/gpu.count", "8"),
            ("nvidia.com/mig-1g.5gb.count", "7"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let labels: Labels = [("nvidia.com/gpu.count", "8"), ("nvidia.com/mig.strategy", "mixed")]
            .into_iter()
            .collect();

        let patch = label_patch(Some(&existing), &labels);

        assert_eq!(
            patch,
            json!({
                "metadata": {
                    "labels": {
                        "nvidia.com/gpu.count": "8",
                        "nvidia.com/mig-1g.5gb.count": null,
                        "nvidia.com/mig.strategy": "mixed",
                    }
                }
            })
        );
    }

    fn node_labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn patch_keeps_labels_owned_by_other_controllers() {
        let existing = node_labels(&[
            ("nvidia.com/gpu.present", "true"),
            ("nvidia.com/gpu.deploy.driver", "true"),
            ("nvidia.com/gpu.product", "Tesla-T4"),
        ]);
        let labels: Labels = [("nvidia.com/gpu.count", "8")].into_iter().collect();

        let patch = label_patch(Some(&existing), &labels);

        assert_eq!(
            patch,
            json!({
                "metadata": {
                    "labels": {
                        "nvidia.com/gpu.count": "8",
                        "nvidia.com/gpu.product": null,
                    }
                }
            })
        );
    }

    #[test]
    fn removal_clears_only_managed_labels() {
        let existing = node_labels(&[
            ("kubernetes.io/hostname", "gpu-node-1"),
            ("nvidia.com/gpu.present", "true"),
            ("nvidia.com/gpu.count", "1"),
            ("nvidia.com/gpu.machine", "DGX-A100"),
            ("nvidia.com/mig.strategy", "mixed"),
            ("nvidia.com/mig.config", "all-1g.5gb"),
            ("nvidia.com/mig-1g.5gb.count", "7"),
            ("nvidia.com/cuda.driver.major", "535"),
            ("nvidia.com/gfd.timestamp", "1700000000"),
        ]);

        let patch = label_patch(Some(&existing), &Labels::new());

        assert_eq!(
            patch,
            json!({
                "metadata": {
                    "labels": {
                        "nvidia.com/cuda.driver.major": null,
                        "nvidia.com/gfd.timestamp": null,
                        "nvidia.com/gpu.count": null,
                        "nvidia.com/gpu.machine": null,
                        "nvidia.com/mig-1g.5gb.count": null,
                        "nvidia.com/mig.strategy": null,
                    }
                }
            })
        );
    }

    #[test]
    fn managed_label_families() {
        assert!(is_managed_label("nvidia.com/gpu.engines.ofa"));
        assert!(is_managed_label("nvidia.com/cuda.runtime.minor"));
        assert!(!is_managed_label("nvidia.com/gpu.deploy.device-plugin"));
        assert!(!is_managed_label("nvidia.com/gpu"));
        assert!(!is_managed_label("nvidia.com/gpu.countx"));
    }

    #[test]
    fn patch_without_existing_labels() {
        let labels: Labels = [("nvidia.com/gpu.machine", "DGX-A100")].into_iter().collect();

        let patch = label_patch(None, &labels);

        assert_eq!(
            patch,
            json!({ "metadata": { "labels": { "nvidia.com/gpu.machine": "DGX-A100" } } })
        );
    }
}

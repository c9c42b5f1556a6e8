//! Labeling loop.

use std::path::PathBuf;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::lm;
use crate::lm::Labels;
use crate::nvml::DeviceLib;
use crate::nvml::NvmlLib;
use crate::output::file;
use crate::output::NodeLabelPublisher;

/// Kubernetes node to patch in addition to the feature file.
#[derive(Debug, Clone)]
pub struct NodeTarget {
    pub node_name: String,
    pub kubeconfig: Option<PathBuf>,
}

/// Initializes NVML and labels the node until cancelled, or once with
/// `oneshot`.
pub async fn run(config: Config, node: Option<NodeTarget>) -> Result<()> {
    let lib = match NvmlLib::init() {
        Ok(lib) => Some(lib),
        Err(e) if config.fail_on_init_error => {
            return Err(anyhow::anyhow!("Failed to initialize NVML: {e:?}"));
        }
        Err(e) => {
            tracing::warn!("Failed to initialize NVML, only machine labels will be generated: {e:?}");
            None
        }
    };

    let publisher = match node {
        Some(target) => Some(
            NodeLabelPublisher::new(target.node_name, target.kubeconfig)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize node publisher: {e:?}"))?,
        ),
        None => None,
    };

    let cancellation_token = CancellationToken::new();
    if !config.gfd.oneshot {
        spawn_signal_handler(cancellation_token.clone());
    }

    let result = label_loop(lib.as_ref(), &config, publisher.as_ref(), &cancellation_token).await;

    if !config.gfd.oneshot {
        tracing::info!("Removing output file {:?}", config.gfd.output_file);
        if let Err(e) = file::remove_labels(&config.gfd.output_file) {
            tracing::error!("Failed to remove output file: {e:?}");
        }
        if let Some(publisher) = publisher.as_ref() {
            if let Err(e) = publisher.remove().await {
                tracing::error!("Failed to remove node labels: {e:?}");
            }
        }
    }

    result
}

async fn label_loop<L: DeviceLib>(
    lib: Option<&L>,
    config: &Config,
    publisher: Option<&NodeLabelPublisher>,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    loop {
        match run_pass(lib, config, publisher).await {
            Ok(labels) => tracing::info!(
                mig_strategy = %config.mig_strategy,
                "Published {} labels",
                labels.len()
            ),
            Err(e) if config.gfd.oneshot => return Err(e),
            Err(e) => tracing::error!("Labeling pass failed: {e:?}"),
        }

        if config.gfd.oneshot {
            return Ok(());
        }

        tracing::debug!("Sleeping for {:?}", config.gfd.sleep_interval);
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                tracing::info!("Shutdown requested, exiting");
                return Ok(());
            }
            _ = tokio::time::sleep(config.gfd.sleep_interval) => {}
        }
    }
}

/// Generates the node's labels and publishes them to every sink.
pub(crate) async fn run_pass<L: DeviceLib>(
    lib: Option<&L>,
    config: &Config,
    publisher: Option<&NodeLabelPublisher>,
) -> Result<Labels> {
    let labels = lm::node_labels(lib, config)
        .map_err(|e| anyhow::anyhow!("Failed to generate labels: {e:?}"))?;

    if labels.is_empty() {
        tracing::warn!("No labels generated");
    }

    file::write_labels(&config.gfd.output_file, &labels)
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;

    if let Some(publisher) = publisher {
        publisher
            .publish(&labels)
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    }

    Ok(labels)
}

fn spawn_signal_handler(cancellation_token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::error!("Failed to install signal handlers: {e}");
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {e}");
                return;
            }
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }

        cancellation_token.cancel();
    });
}

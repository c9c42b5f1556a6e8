use anyhow::Result;
use clap::Parser;
use gpu_feature_discovery::config::Cli;
use gpu_feature_discovery::config::Config;
use gpu_feature_discovery::daemon;
use gpu_feature_discovery::daemon::NodeTarget;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init();

    tracing::info!("Starting gpu-feature-discovery {}", &**version::VERSION);

    let config = Config::load(&cli).map_err(|e| anyhow::anyhow!("Invalid configuration: {e:?}"))?;
    tracing::info!(
        mig_strategy = %config.mig_strategy,
        fail_on_init_error = config.fail_on_init_error,
        oneshot = config.gfd.oneshot,
        output_file = ?config.gfd.output_file,
        "Loaded configuration"
    );

    let node = cli.node_name.map(|node_name| NodeTarget {
        node_name,
        kubeconfig: cli.kubeconfig,
    });

    daemon::run(config, node).await
}

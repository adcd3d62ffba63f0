use geoharvest::harvest::{HarvestConfig, Harvester, HarvestStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let Some(config_path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: geoharvest <config.json>");
        return ExitCode::from(1);
    };

    let config = match HarvestConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid config {}: {e}", config_path.display());
            return ExitCode::from(1);
        }
    };

    let harvester = match Harvester::new(config) {
        Ok(harvester) => harvester,
        Err(e) => {
            error!("setup failed: {e}");
            return ExitCode::from(1);
        }
    };

    // Ctrl-C triggers cooperative cancellation; the run unwinds without
    // leaving files at the destination.
    let cancel = harvester.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling harvest");
            cancel.cancel();
        }
    });

    match harvester.run().await {
        Ok(result) => {
            info!(
                "wrote {} and {}",
                result.path.display(),
                result.sidecar_path.display()
            );
            match result.status {
                HarvestStatus::Complete => ExitCode::SUCCESS,
                HarvestStatus::Partial => ExitCode::from(2),
            }
        }
        Err(e) => {
            error!("harvest failed: {e}");
            ExitCode::from(1)
        }
    }
}

//! `zihin run`: a long-running discovery node

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};
use zihin_discovery::{DiscoveryConfig, ServiceDiscoveryManager, ServiceInfo};

use crate::CliError;

/// Read a JSON array of service records.
pub fn load_manifest(path: &Path) -> Result<Vec<ServiceInfo>, CliError> {
    let content = fs::read_to_string(path).map_err(|source| CliError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CliError::ManifestParse {
        path: path.to_path_buf(),
        source,
    })
}

fn print_stats(manager: &ServiceDiscoveryManager) -> Result<(), CliError> {
    let stats = serde_json::to_string_pretty(&manager.get_comprehensive_stats())?;
    println!("{stats}");
    Ok(())
}

pub async fn run_node(
    services: Option<PathBuf>,
    duration_secs: Option<u64>,
    stats_interval_secs: u64,
) -> Result<(), CliError> {
    let config = DiscoveryConfig::from_env()?;
    let manager = ServiceDiscoveryManager::new(config);

    if let Some(path) = services {
        let entries = load_manifest(&path)?;
        let total = entries.len();
        let registered = entries
            .into_iter()
            .map(|entry| manager.registry().register_service(entry))
            .filter(|registered| *registered)
            .count();
        if registered < total {
            warn!(registered, total, "Some manifest services were not registered");
        }
        info!(registered, manifest = %path.display(), "Loaded service manifest");
    }

    manager.start()?;

    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let period = Duration::from_secs(stats_interval_secs.max(1));
    let mut stats_interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = stats_interval.tick() => print_stats(&manager)?,
            _ = &mut deadline => {
                info!("Run duration elapsed");
                break;
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl-C");
                break;
            }
        }
    }

    manager.stop().await;
    print_stats(&manager)
}

//! Launcher entry point: verify the virtual environment, reinstall Python
//! dependencies when requirements.txt changed, then serve the Streamlit UI.

use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tw_daytrade::adapters::persistence::JsonInstallStamp;
use tw_daytrade::adapters::process::{PipInstaller, StreamlitRunner};
use tw_daytrade::shared::config::AppConfig;
use tw_daytrade::usecases::{LauncherConfig, LauncherService};

fn launcher(cfg: &AppConfig) -> LauncherService {
    LauncherService::new(
        Arc::new(PipInstaller),
        Arc::new(StreamlitRunner::new(cfg.ui_entry_or_default())),
        Arc::new(JsonInstallStamp::new(cfg.stamp_path_or_default())),
        LauncherConfig {
            env_dir: cfg.env_dir_or_default(),
            manifest: cfg.manifest_path_or_default(),
            env_file: cfg.env_file_or_default(),
            port: cfg.ui_port_or_default(),
        },
    )
}

async fn run(cfg: &AppConfig) -> anyhow::Result<()> {
    launcher(cfg).run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    run(&AppConfig::load_or_default()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tw_daytrade::domain::DomainError;

    #[tokio::test]
    async fn test_missing_environment_keeps_domain_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig {
            env_dir: Some(dir.path().join("venv").to_string_lossy().into_owned()),
            ..Default::default()
        };

        let err = run(&cfg).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DomainError>(),
            Some(DomainError::EnvironmentMissing { .. })
        ));
    }
}

//! Launcher service. Check the environment, install dependencies when the
//! manifest changed, then run the UI in the foreground.
//!
//! Steps run strictly in order; each awaits completion before the next.

use crate::domain::DomainError;
use crate::ports::{InstallStampPort, InstallerPort, UiProcessPort};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    pub env_dir: PathBuf,
    pub manifest: PathBuf,
    pub env_file: PathBuf,
    pub port: u16,
}

/// What a launch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    pub env_file_found: bool,
    pub installed: bool,
    pub url: String,
}

pub struct LauncherService {
    installer: Arc<dyn InstallerPort>,
    ui: Arc<dyn UiProcessPort>,
    stamp: Arc<dyn InstallStampPort>,
    config: LauncherConfig,
}

impl LauncherService {
    pub fn new(
        installer: Arc<dyn InstallerPort>,
        ui: Arc<dyn UiProcessPort>,
        stamp: Arc<dyn InstallStampPort>,
        config: LauncherConfig,
    ) -> Self {
        Self {
            installer,
            ui,
            stamp,
            config,
        }
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.config.port)
    }

    async fn manifest_mtime(&self) -> Result<Option<SystemTime>, DomainError> {
        match tokio::fs::metadata(&self.config.manifest).await {
            Ok(meta) => meta
                .modified()
                .map(Some)
                .map_err(|e| DomainError::Install(format!("manifest mtime unavailable: {}", e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DomainError::Install(format!("cannot stat manifest: {}", e))),
        }
    }

    /// Install when the stamp is missing or differs from the manifest mtime.
    /// Returns whether an install ran. The stamp is written only after a
    /// successful install.
    async fn sync_dependencies(&self) -> Result<bool, DomainError> {
        let Some(mtime) = self.manifest_mtime().await? else {
            warn!(manifest = %self.config.manifest.display(), "manifest not found, skipping dependency install");
            return Ok(false);
        };

        let stamp = self.stamp.load().await?;
        if stamp == Some(mtime) {
            info!("dependencies up to date");
            return Ok(false);
        }

        if stamp.is_none() {
            info!("no install stamp, installing dependencies");
        } else {
            info!("manifest changed since last install, reinstalling dependencies");
        }
        self.installer
            .install(&self.config.env_dir, &self.config.manifest)
            .await?;
        self.stamp.store(mtime).await?;
        info!("dependencies installed");
        Ok(true)
    }

    pub async fn run(&self) -> Result<LaunchReport, DomainError> {
        if !tokio::fs::metadata(&self.config.env_dir)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(DomainError::EnvironmentMissing {
                path: self.config.env_dir.clone(),
            });
        }

        let env_file_found = tokio::fs::try_exists(&self.config.env_file)
            .await
            .unwrap_or(false);
        if !env_file_found {
            warn!(
                path = %self.config.env_file.display(),
                "secrets file not found; set FINMIND_TOKEN and PERPLEXITY_API_KEY in it"
            );
        }

        let installed = self.sync_dependencies().await?;

        let url = self.url();
        println!("Starting UI at {}", url);
        info!(url = %url, "launching UI");
        self.ui.run(&self.config.env_dir, self.config.port).await?;

        Ok(LaunchReport {
            env_file_found,
            installed,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::JsonInstallStamp;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::{Duration, UNIX_EPOCH};

    /// Ordered record of port calls.
    #[derive(Default)]
    struct Calls(Mutex<Vec<&'static str>>);

    impl Calls {
        fn push(&self, c: &'static str) {
            self.0.lock().unwrap().push(c);
        }
        fn list(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FakeInstaller {
        calls: Arc<Calls>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl InstallerPort for FakeInstaller {
        async fn install(&self, _env_dir: &Path, _manifest: &Path) -> Result<(), DomainError> {
            self.calls.push("install");
            if self.fail {
                return Err(DomainError::Install("pip exit code 1".into()));
            }
            Ok(())
        }
    }

    struct FakeUi {
        calls: Arc<Calls>,
    }

    #[async_trait::async_trait]
    impl UiProcessPort for FakeUi {
        async fn run(&self, _env_dir: &Path, port: u16) -> Result<(), DomainError> {
            assert_eq!(port, 8501);
            self.calls.push("launch");
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        calls: Arc<Calls>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir(dir.path().join("venv")).unwrap();
            std::fs::write(dir.path().join("requirements.txt"), "streamlit\n").unwrap();
            std::fs::write(dir.path().join(".env"), "FINMIND_TOKEN=x\n").unwrap();
            Self {
                dir,
                calls: Arc::new(Calls::default()),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn stamp(&self) -> JsonInstallStamp {
            JsonInstallStamp::new(self.path("venv/.deps-installed.json"))
        }

        fn set_manifest_mtime(&self, t: SystemTime) {
            let f = std::fs::File::options()
                .write(true)
                .open(self.path("requirements.txt"))
                .unwrap();
            f.set_modified(t).unwrap();
        }

        fn manifest_mtime(&self) -> SystemTime {
            std::fs::metadata(self.path("requirements.txt"))
                .unwrap()
                .modified()
                .unwrap()
        }

        fn service(&self, install_fails: bool) -> LauncherService {
            LauncherService::new(
                Arc::new(FakeInstaller {
                    calls: self.calls.clone(),
                    fail: install_fails,
                }),
                Arc::new(FakeUi {
                    calls: self.calls.clone(),
                }),
                Arc::new(self.stamp()),
                LauncherConfig {
                    env_dir: self.path("venv"),
                    manifest: self.path("requirements.txt"),
                    env_file: self.path(".env"),
                    port: 8501,
                },
            )
        }
    }

    #[tokio::test]
    async fn test_missing_environment_fails_before_anything() {
        let fx = Fixture::new();
        std::fs::remove_dir(fx.path("venv")).unwrap();

        let err = fx.service(false).run().await.unwrap_err();

        assert!(matches!(err, DomainError::EnvironmentMissing { .. }));
        assert!(err.to_string().contains("setup"));
        assert!(fx.calls.list().is_empty());
    }

    #[tokio::test]
    async fn test_missing_stamp_installs_and_creates_stamp() {
        let fx = Fixture::new();

        let report = fx.service(false).run().await.unwrap();

        assert!(report.installed);
        assert_eq!(fx.calls.list(), vec!["install", "launch"]);
        assert_eq!(fx.stamp().load().await.unwrap(), Some(fx.manifest_mtime()));
    }

    #[tokio::test]
    async fn test_unchanged_manifest_skips_install() {
        let fx = Fixture::new();
        fx.stamp().store(fx.manifest_mtime()).await.unwrap();

        let report = fx.service(false).run().await.unwrap();

        assert!(!report.installed);
        assert_eq!(fx.calls.list(), vec!["launch"]);
    }

    #[tokio::test]
    async fn test_changed_manifest_reinstalls_and_refreshes_stamp() {
        let fx = Fixture::new();
        fx.set_manifest_mtime(UNIX_EPOCH + Duration::from_secs(1_600_000_000));
        fx.stamp().store(fx.manifest_mtime()).await.unwrap();
        fx.set_manifest_mtime(UNIX_EPOCH + Duration::from_secs(1_700_000_000));

        let report = fx.service(false).run().await.unwrap();

        assert!(report.installed);
        assert_eq!(fx.calls.list(), vec!["install", "launch"]);
        assert_eq!(
            fx.stamp().load().await.unwrap(),
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
    }

    #[tokio::test]
    async fn test_launch_happens_with_or_without_env_file() {
        let fx = Fixture::new();
        let report = fx.service(false).run().await.unwrap();
        assert!(report.env_file_found);
        assert_eq!(report.url, "http://localhost:8501");

        std::fs::remove_file(fx.path(".env")).unwrap();
        let report = fx.service(false).run().await.unwrap();
        assert!(!report.env_file_found);
        assert_eq!(fx.calls.list().iter().filter(|c| **c == "launch").count(), 2);
    }

    #[tokio::test]
    async fn test_failed_install_is_fatal_and_keeps_stamp() {
        let fx = Fixture::new();
        let old = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        fx.stamp().store(old).await.unwrap();

        let err = fx.service(true).run().await.unwrap_err();

        assert!(matches!(err, DomainError::Install(_)));
        assert_eq!(fx.calls.list(), vec!["install"]);
        assert_eq!(fx.stamp().load().await.unwrap(), Some(old));
    }

    #[tokio::test]
    async fn test_missing_manifest_skips_install() {
        let fx = Fixture::new();
        std::fs::remove_file(fx.path("requirements.txt")).unwrap();

        let report = fx.service(false).run().await.unwrap();

        assert!(!report.installed);
        assert_eq!(fx.calls.list(), vec!["launch"]);
    }
}

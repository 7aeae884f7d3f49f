//! Runtime environment processes. Implements InstallerPort and UiProcessPort.
//!
//! Both run executables from the environment's script directory with the
//! environment activated: that directory first on `PATH`, `VIRTUAL_ENV` set.

use crate::domain::DomainError;
use crate::ports::{InstallerPort, UiProcessPort};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::info;

/// `bin` on Unix, `Scripts` on Windows.
pub fn scripts_dir(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts")
    } else {
        env_dir.join("bin")
    }
}

/// `PATH` with the environment's script directory prepended.
pub fn activated_path(env_dir: &Path, current: Option<OsString>) -> Result<OsString, DomainError> {
    let mut dirs = vec![scripts_dir(env_dir)];
    if let Some(current) = current {
        dirs.extend(std::env::split_paths(&current));
    }
    std::env::join_paths(dirs)
        .map_err(|e| DomainError::Launch(format!("cannot build PATH: {}", e)))
}

/// Command for `program` inside the environment, activated.
fn env_command(env_dir: &Path, program: &str) -> Result<Command, DomainError> {
    let env_abs = std::path::absolute(env_dir).unwrap_or_else(|_| env_dir.to_path_buf());
    let mut cmd = Command::new(scripts_dir(&env_abs).join(program));
    cmd.env("PATH", activated_path(&env_abs, std::env::var_os("PATH"))?)
        .env("VIRTUAL_ENV", &env_abs)
        .kill_on_drop(true);
    Ok(cmd)
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// `pip install -r <manifest>` inside the environment.
pub struct PipInstaller;

impl PipInstaller {
    pub fn args(manifest: &Path) -> Vec<OsString> {
        vec!["install".into(), "-r".into(), manifest.as_os_str().to_owned()]
    }
}

#[async_trait::async_trait]
impl InstallerPort for PipInstaller {
    async fn install(&self, env_dir: &Path, manifest: &Path) -> Result<(), DomainError> {
        info!(manifest = %manifest.display(), "installing dependencies");
        let status = env_command(env_dir, "pip")
            .map_err(|e| DomainError::Install(e.to_string()))?
            .args(Self::args(manifest))
            .status()
            .await
            .map_err(|e| DomainError::Install(format!("cannot start pip: {}", e)))?;
        if !status.success() {
            return Err(DomainError::Install(format!("pip {}", describe(status))));
        }
        Ok(())
    }
}

/// `streamlit run <entry>` on the given port, headless.
pub struct StreamlitRunner {
    entry: PathBuf,
}

impl StreamlitRunner {
    pub fn new(entry: impl AsRef<Path>) -> Self {
        Self {
            entry: entry.as_ref().to_path_buf(),
        }
    }

    pub fn args(&self, port: u16) -> Vec<OsString> {
        vec![
            "run".into(),
            self.entry.as_os_str().to_owned(),
            "--server.port".into(),
            port.to_string().into(),
            "--server.headless".into(),
            "true".into(),
        ]
    }
}

#[async_trait::async_trait]
impl UiProcessPort for StreamlitRunner {
    async fn run(&self, env_dir: &Path, port: u16) -> Result<(), DomainError> {
        info!(entry = %self.entry.display(), port, "starting UI process");
        let status = env_command(env_dir, "streamlit")?
            .args(self.args(port))
            .status()
            .await
            .map_err(|e| DomainError::Launch(format!("cannot start streamlit: {}", e)))?;
        if !status.success() {
            return Err(DomainError::Launch(format!("streamlit {}", describe(status))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activated_path_puts_env_first() {
        let env = Path::new("/srv/app/venv");
        let current = std::env::join_paths([Path::new("/usr/bin"), Path::new("/bin")]).unwrap();
        let path = activated_path(env, Some(current)).unwrap();
        let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
        assert_eq!(dirs[0], scripts_dir(env));
        assert_eq!(dirs.len(), 3);
    }

    #[test]
    fn test_activated_path_without_existing_path() {
        let env = Path::new("venv");
        let path = activated_path(env, None).unwrap();
        assert_eq!(PathBuf::from(path), scripts_dir(env));
    }

    #[test]
    fn test_pip_args() {
        let args = PipInstaller::args(Path::new("requirements.txt"));
        assert_eq!(args, vec!["install", "-r", "requirements.txt"]);
    }

    #[test]
    fn test_streamlit_args() {
        let runner = StreamlitRunner::new("main.py");
        let args = runner.args(8501);
        assert_eq!(
            args,
            vec!["run", "main.py", "--server.port", "8501", "--server.headless", "true"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_pip_is_install_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipInstaller
            .install(dir.path(), Path::new("requirements.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Install(_)));
    }
}

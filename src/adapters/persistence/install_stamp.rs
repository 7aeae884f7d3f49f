//! Implements InstallStampPort using a JSON file.
//!
//! Records the manifest modification time seen at the last successful install.

use crate::domain::DomainError;
use crate::ports::InstallStampPort;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Manifest mtime as seconds + nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StampData {
    manifest_mtime_secs: u64,
    manifest_mtime_nanos: u32,
}

impl StampData {
    fn from_time(t: SystemTime) -> Result<Self, DomainError> {
        let d = t
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DomainError::Stamp(format!("mtime before epoch: {}", e)))?;
        Ok(Self {
            manifest_mtime_secs: d.as_secs(),
            manifest_mtime_nanos: d.subsec_nanos(),
        })
    }

    fn to_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::new(self.manifest_mtime_secs, self.manifest_mtime_nanos)
    }
}

/// JSON file-based install stamp.
pub struct JsonInstallStamp {
    path: PathBuf,
}

impl JsonInstallStamp {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl InstallStampPort for JsonInstallStamp {
    /// Missing file means "never installed". An unreadable stamp is treated
    /// the same so a reinstall repairs it.
    async fn load(&self) -> Result<Option<SystemTime>, DomainError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DomainError::Stamp(format!("read stamp: {}", e))),
        };
        match serde_json::from_str::<StampData>(&text) {
            Ok(data) => Ok(Some(data.to_time())),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "install stamp unreadable, ignoring");
                Ok(None)
            }
        }
    }

    /// Atomic save: temp file, sync_all, rename over the target.
    async fn store(&self, manifest_mtime: SystemTime) -> Result<(), DomainError> {
        let data = StampData::from_time(manifest_mtime)?;
        let json =
            serde_json::to_string_pretty(&data).map_err(|e| DomainError::Stamp(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::Stamp(format!("create stamp dir: {}", e)))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| DomainError::Stamp(format!("create temp file: {}", e)))?;
        f.write_all(json.as_bytes())
            .await
            .map_err(|e| DomainError::Stamp(format!("write temp file: {}", e)))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::Stamp(format!("sync temp file: {}", e)))?;
        drop(f);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| DomainError::Stamp(format!("atomic rename failed: {}", e)))?;
        debug!(path = %self.path.display(), secs = data.manifest_mtime_secs, "install stamp written");
        Ok(())
    }
}

//! Implements ReportStorePort. Markdown reports and indicator CSVs in one
//! directory: `reports/analysis_<code>_<date>.md`, `reports/indicators_<code>_<date>.csv`.
//! Writes go through a temp file and a rename so readers never see half a file.

use crate::domain::{DomainError, TechnicalFrame};
use crate::ports::ReportStorePort;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Serialize bars plus every indicator column. Absent values are empty cells.
pub fn frame_to_csv(frame: &TechnicalFrame) -> Result<String, csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::new());

    let mut header = vec!["date", "open", "high", "low", "close", "volume"];
    if let Some(row) = frame.rows.first() {
        header.extend(row.columns().iter().map(|(name, _)| *name));
    }
    wtr.write_record(&header)?;

    for (bar, row) in frame.bars.iter().zip(&frame.rows) {
        let mut record = vec![
            bar.date.format("%Y-%m-%d").to_string(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
        ];
        record.extend(
            row.columns()
                .iter()
                .map(|(_, v)| v.map(|v| format!("{:.4}", v)).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| csv::Error::from(std::io::Error::other(e.to_string())))?;
    String::from_utf8(bytes).map_err(|e| {
        csv::Error::from(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        ))
    })
}

/// File-system report store rooted at one directory.
pub struct FsReportStore {
    base_dir: PathBuf,
}

impl FsReportStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    async fn write_atomic(&self, file_name: &str, content: &str) -> Result<PathBuf, DomainError> {
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| DomainError::Report(format!("create reports dir: {}", e)))?;

        let path = self.base_dir.join(file_name);
        let temp_path = self.base_dir.join(format!("{}.tmp", file_name));
        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| DomainError::Report(format!("create temp file: {}", e)))?;
        f.write_all(content.as_bytes())
            .await
            .map_err(|e| DomainError::Report(format!("write temp file: {}", e)))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::Report(format!("sync temp file: {}", e)))?;
        drop(f);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| DomainError::Report(format!("atomic rename failed: {}", e)))?;
        info!(path = %path.display(), bytes = content.len(), "report written");
        Ok(path)
    }
}

#[async_trait::async_trait]
impl ReportStorePort for FsReportStore {
    async fn save_markdown(&self, file_name: &str, content: &str) -> Result<PathBuf, DomainError> {
        self.write_atomic(file_name, content).await
    }

    async fn save_indicators(
        &self,
        file_name: &str,
        frame: &TechnicalFrame,
    ) -> Result<PathBuf, DomainError> {
        let csv = frame_to_csv(frame).map_err(|e| DomainError::Report(e.to_string()))?;
        self.write_atomic(file_name, &csv).await
    }
}

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{info, warn};

/// Local copies of raw provider output and rendered reports.
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write raw items to `{date}.json`.
    pub async fn save_raw(&self, report_date: NaiveDate, items: &[Value]) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.json", report_date.format("%Y-%m-%d")));
        let body = serde_json::to_vec_pretty(items)?;
        self.write(&path, &body).await?;
        info!(path = %path.display(), items = items.len(), "Raw backup saved");
        Ok(path)
    }

    /// Write report text to `report-{date}.txt`.
    pub async fn save_report(&self, report_date: NaiveDate, text: &str) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("report-{}.txt", report_date.format("%Y-%m-%d")));
        self.write(&path, text.as_bytes()).await?;
        info!(path = %path.display(), "Report file saved");
        Ok(path)
    }

    /// Delete files last modified more than `retention_days` ago. Returns how many were removed.
    pub async fn cleanup(&self, retention_days: u32) -> Result<u32> {
        let max_age = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("reading backup directory"),
        };

        let mut deleted = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Could not stat backup file");
                    continue;
                }
            };
            let modified = metadata.modified()?;
            if modified < cutoff {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "Could not delete old backup"
                    ),
                }
            }
        }

        if deleted > 0 {
            info!(deleted, retention_days, "Old backups removed");
        }
        Ok(deleted)
    }

    async fn write(&self, path: &Path, body: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        tokio::fs::write(path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    #[tokio::test]
    async fn saves_raw_and_report_files_by_date() {
        let tmp = tempfile::tempdir().unwrap();
        let backups = BackupManager::new(tmp.path().join("backups"));

        let raw = backups.save_raw(date(), &[json!({"id": "1"})]).await.unwrap();
        let report = backups.save_report(date(), "hello").await.unwrap();

        assert_eq!(raw.file_name().unwrap(), "2024-05-10.json");
        assert_eq!(report.file_name().unwrap(), "report-2024-05-10.txt");
        let parsed: Vec<Value> = serde_json::from_slice(&std::fs::read(raw).unwrap()).unwrap();
        assert_eq!(parsed[0]["id"], "1");
        assert_eq!(std::fs::read_to_string(report).unwrap(), "hello");
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_files() {
        let tmp = tempfile::tempdir().unwrap();
        let backups = BackupManager::new(tmp.path());

        let old = backups.save_report(date(), "old").await.unwrap();
        let fresh = backups.save_raw(date(), &[]).await.unwrap();
        let file = std::fs::File::options().write(true).open(&old).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(20 * 24 * 60 * 60))
            .unwrap();

        assert_eq!(backups.cleanup(14).await.unwrap(), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn cleanup_of_missing_dir_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let backups = BackupManager::new(tmp.path().join("never-created"));
        assert_eq!(backups.cleanup(14).await.unwrap(), 0);
    }
}

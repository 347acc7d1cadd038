//! Backup and restore job records.
//!
//! A cluster holds at most one active backup and one active restore. The
//! record here is the cluster-visible state machine: parameters, status,
//! progress, timestamps. The actual data movement happens behind the
//! [`TransferExecutor`] seam; the bundled [`CommandExecutor`] shells out to
//! configured command templates. Records are persisted to a JSON ledger with
//! write-temp-then-rename so a crash never leaves a torn file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ArgusError, ArgusResult};

/// Lifecycle of a backup or restore job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferStatus {
    InProgress,
    Ok,
    Failed,
    Aborted,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::InProgress => "in-progress",
            TransferStatus::Ok => "ok",
            TransferStatus::Failed => "failed",
            TransferStatus::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferKind {
    Backup,
    Restore,
}

/// Parameters for a backup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupParams {
    pub namespace: String,
    pub destination_address: String,
    pub destination_path: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub sets: String,
    pub metadata_only: bool,
    pub terminate_on_change: bool,
    pub scan_priority: i32,
}

/// Parameters for a restore job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreParams {
    pub namespace: String,
    pub destination_address: String,
    pub destination_path: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub threads: usize,
    pub missing_records_only: bool,
    pub ignore_generation_num: bool,
}

#[derive(Debug)]
struct JobState {
    status: TransferStatus,
    progress_pct: u8,
    finished_at: Option<DateTime<Utc>>,
}

macro_rules! transfer_handle {
    ($name:ident, $params:ty, $kind:expr) => {
        /// Live job handle; queryable until superseded by the next start.
        #[derive(Debug)]
        pub struct $name {
            pub id: String,
            pub cluster_id: String,
            pub params: $params,
            pub created_at: DateTime<Utc>,
            state: Mutex<JobState>,
        }

        impl $name {
            pub fn new(cluster_id: impl Into<String>, params: $params) -> Arc<Self> {
                Arc::new(Self {
                    id: Uuid::new_v4().to_string(),
                    cluster_id: cluster_id.into(),
                    params,
                    created_at: Utc::now(),
                    state: Mutex::new(JobState {
                        status: TransferStatus::InProgress,
                        progress_pct: 0,
                        finished_at: None,
                    }),
                })
            }

            pub fn kind(&self) -> TransferKind {
                $kind
            }

            pub fn status(&self) -> TransferStatus {
                self.state.lock().status
            }

            pub fn progress(&self) -> u8 {
                self.state.lock().progress_pct
            }

            pub fn set_progress(&self, pct: u8) {
                self.state.lock().progress_pct = pct.min(100);
            }

            /// Terminal transition; also pins progress to 100 on success.
            pub fn finish(&self, status: TransferStatus) {
                let mut state = self.state.lock();
                state.status = status;
                state.finished_at = Some(Utc::now());
                if status == TransferStatus::Ok {
                    state.progress_pct = 100;
                }
            }

            /// Snapshot for persistence and API responses.
            pub fn record(&self) -> TransferRecord {
                let state = self.state.lock();
                TransferRecord {
                    id: self.id.clone(),
                    kind: $kind,
                    cluster_id: self.cluster_id.clone(),
                    params: serde_json::to_value(&self.params).unwrap_or_default(),
                    status: state.status,
                    progress_pct: state.progress_pct,
                    created_at: self.created_at,
                    finished_at: state.finished_at,
                }
            }
        }
    };
}

transfer_handle!(Backup, BackupParams, TransferKind::Backup);
transfer_handle!(Restore, RestoreParams, TransferKind::Restore);

/// Persisted form of a job. Passwords never reach the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub kind: TransferKind,
    pub cluster_id: String,
    pub params: serde_json::Value,
    pub status: TransferStatus,
    pub progress_pct: u8,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// JSON ledger of transfer records with atomic saves.
#[derive(Debug, Clone)]
pub struct TransferStore {
    path: PathBuf,
}

impl TransferStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        TransferStore {
            path: data_dir.as_ref().join("transfers.json"),
        }
    }

    pub async fn load_all(&self) -> ArgusResult<Vec<TransferRecord>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ArgusError::io("read transfer ledger", err)),
        };
        serde_json::from_slice(&raw).map_err(|err| ArgusError::Serialization {
            operation: "parse transfer ledger".into(),
            source: err,
        })
    }

    /// Insert or replace one record, then atomically rewrite the ledger.
    pub async fn save(&self, record: &TransferRecord) -> ArgusResult<()> {
        let mut records = self.load_all().await?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }

        let encoded =
            serde_json::to_vec_pretty(&records).map_err(|err| ArgusError::Serialization {
                operation: "encode transfer ledger".into(),
                source: err,
            })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ArgusError::io("create data directory", err))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &encoded)
            .await
            .map_err(|err| ArgusError::io("write transfer ledger", err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| ArgusError::io("commit transfer ledger", err))
    }

    /// Completed backups for one cluster, newest first.
    pub async fn successful_backups(&self, cluster_id: &str) -> ArgusResult<Vec<TransferRecord>> {
        let mut records: Vec<TransferRecord> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| {
                r.kind == TransferKind::Backup
                    && r.cluster_id == cluster_id
                    && r.status == TransferStatus::Ok
            })
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

/// Performs the actual data movement for backup/restore jobs.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn backup(&self, job: Arc<Backup>) -> ArgusResult<()>;
    async fn restore(&self, job: Arc<Restore>) -> ArgusResult<()>;
}

/// Shells out to configured command templates. Placeholders
/// `{namespace}`, `{destination_address}`, `{destination_path}`, `{sets}`
/// are substituted; the job password is exported as `TRANSFER_PASSWORD`
/// rather than interpolated into the command line.
pub struct CommandExecutor {
    backup_command: String,
    restore_command: String,
}

impl CommandExecutor {
    pub fn new(backup_command: impl Into<String>, restore_command: impl Into<String>) -> Self {
        CommandExecutor {
            backup_command: backup_command.into(),
            restore_command: restore_command.into(),
        }
    }

    async fn run(command: String, password: &str) -> ArgusResult<()> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .env("TRANSFER_PASSWORD", password)
            .output()
            .await
            .map_err(|err| ArgusError::io("spawn transfer command", err))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ArgusError::Internal {
                message: format!(
                    "transfer command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

#[async_trait]
impl TransferExecutor for CommandExecutor {
    async fn backup(&self, job: Arc<Backup>) -> ArgusResult<()> {
        if self.backup_command.is_empty() {
            return Err(ArgusError::validation("no backup command configured"));
        }
        let command = self
            .backup_command
            .replace("{namespace}", &job.params.namespace)
            .replace("{destination_address}", &job.params.destination_address)
            .replace("{destination_path}", &job.params.destination_path)
            .replace("{sets}", &job.params.sets);
        Self::run(command, &job.params.password).await
    }

    async fn restore(&self, job: Arc<Restore>) -> ArgusResult<()> {
        if self.restore_command.is_empty() {
            return Err(ArgusError::validation("no restore command configured"));
        }
        let command = self
            .restore_command
            .replace("{namespace}", &job.params.namespace)
            .replace("{destination_address}", &job.params.destination_address)
            .replace("{destination_path}", &job.params.destination_path);
        Self::run(command, &job.params.password).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup_params() -> BackupParams {
        BackupParams {
            namespace: "test".into(),
            destination_address: "10.0.0.9:22".into(),
            destination_path: "/backups".into(),
            username: "op".into(),
            password: "secret".into(),
            sets: "".into(),
            metadata_only: false,
            terminate_on_change: false,
            scan_priority: 2,
        }
    }

    #[test]
    fn finish_pins_progress_on_success() {
        let job = Backup::new("cluster-1", backup_params());
        assert_eq!(job.status(), TransferStatus::InProgress);
        job.set_progress(40);
        job.finish(TransferStatus::Ok);
        assert_eq!(job.status(), TransferStatus::Ok);
        assert_eq!(job.progress(), 100);
        assert!(job.record().finished_at.is_some());
    }

    #[test]
    fn record_omits_password() {
        let job = Backup::new("cluster-1", backup_params());
        let encoded = serde_json::to_string(&job.record()).unwrap();
        assert!(!encoded.contains("secret"));
        assert!(encoded.contains("\"namespace\":\"test\""));
    }

    #[tokio::test]
    async fn ledger_save_is_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransferStore::new(dir.path());

        let job = Backup::new("cluster-1", backup_params());
        store.save(&job.record()).await.unwrap();
        job.finish(TransferStatus::Ok);
        store.save(&job.record()).await.unwrap();

        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransferStatus::Ok);

        let successful = store.successful_backups("cluster-1").await.unwrap();
        assert_eq!(successful.len(), 1);
        assert!(store.successful_backups("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn command_executor_reports_exit_status() {
        let executor = CommandExecutor::new("true", "false");
        let backup = Backup::new("c", backup_params());
        assert!(executor.backup(backup).await.is_ok());

        let restore = Restore::new(
            "c",
            RestoreParams {
                namespace: "test".into(),
                destination_address: "a".into(),
                destination_path: "p".into(),
                username: "u".into(),
                password: "".into(),
                threads: 4,
                missing_records_only: false,
                ignore_generation_num: false,
            },
        );
        assert!(executor.restore(restore).await.is_err());
    }
}

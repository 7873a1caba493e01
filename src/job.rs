//! Job Store: per-request job directories and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

/// Metadata persisted at `<jobs_root>/<job_id>/metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub job_id: String,
    pub server_type: String,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub error: Option<String>,
    pub client_ip: Option<String>,
}

/// Allocates job identifiers/directories and persists request/response state.
///
/// All operations are filesystem writes under `<jobs_root>/<job_id>/`, a
/// partition never contended by concurrent requests since each job_id is
/// unique.
#[derive(Debug, Clone)]
pub struct JobStore {
    jobs_root: PathBuf,
}

/// Creates `dir` (and any missing parents) with the leaf directory at mode
/// 0700, per spec.md §4.1. Parents are created with the ambient umask;
/// only the job directory itself needs to be private.
#[cfg(unix)]
fn create_dir_0700(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::DirBuilder::new().mode(0o700).create(dir).or_else(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            Ok(())
        } else {
            Err(e)
        }
    })
}

#[cfg(not(unix))]
fn create_dir_0700(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

impl JobStore {
    pub fn new(jobs_root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&jobs_root)?;
        Ok(Self { jobs_root })
    }

    pub fn jobs_root(&self) -> &Path {
        &self.jobs_root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_root.join(job_id)
    }

    /// Generates a fresh job id, creates its directory, and writes the
    /// initial `metadata.json` before any process is spawned for it.
    pub fn create(&self, server_type: &str, client_ip: Option<&str>) -> std::io::Result<(String, PathBuf)> {
        let job_id = Uuid::new_v4().to_string();
        let dir = self.job_dir(&job_id);
        create_dir_0700(&dir)?;

        let metadata = JobMetadata {
            job_id: job_id.clone(),
            server_type: server_type.to_string(),
            created_at: Utc::now(),
            status: JobStatus::Processing,
            request: None,
            response: None,
            error: None,
            client_ip: client_ip.map(str::to_string),
        };
        self.write_metadata(&job_id, &metadata)?;
        debug!(job_id = %job_id, server_type, "created job directory");
        Ok((job_id, dir))
    }

    fn write_metadata(&self, job_id: &str, metadata: &JobMetadata) -> std::io::Result<()> {
        let path = self.job_dir(job_id).join("metadata.json");
        let json = serde_json::to_vec_pretty(metadata)?;
        std::fs::write(path, json)
    }

    pub fn save_request(&self, job_id: &str, request: &Value) -> std::io::Result<()> {
        std::fs::write(
            self.job_dir(job_id).join("request.json"),
            serde_json::to_vec_pretty(request)?,
        )?;
        if let Some(mut metadata) = self.load_metadata(job_id) {
            metadata.request = Some(request.clone());
            self.write_metadata(job_id, &metadata)?;
        }
        Ok(())
    }

    pub fn save_response(&self, job_id: &str, response: &Value) -> std::io::Result<()> {
        std::fs::write(
            self.job_dir(job_id).join("response.json"),
            serde_json::to_vec_pretty(response)?,
        )?;
        if let Some(mut metadata) = self.load_metadata(job_id) {
            metadata.response = Some(response.clone());
            self.write_metadata(job_id, &metadata)?;
        }
        Ok(())
    }

    pub fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> std::io::Result<()> {
        if let Some(mut metadata) = self.load_metadata(job_id) {
            metadata.status = status;
            if let Some(err) = error {
                metadata.error = Some(err.to_string());
            }
            self.write_metadata(job_id, &metadata)?;
        }
        Ok(())
    }

    /// Tolerant reader: a missing file returns `None`; a malformed file is
    /// logged and returns `None` rather than propagating an error.
    pub fn load_metadata(&self, job_id: &str) -> Option<JobMetadata> {
        let path = self.job_dir(job_id).join("metadata.json");
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(job_id, "malformed metadata.json: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (JobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs")).unwrap();
        (store, dir)
    }

    #[test]
    fn create_writes_metadata_before_caller_does_anything_else() {
        let (store, _dir) = store();
        let (job_id, job_dir) = store.create("echo", Some("127.0.0.1")).unwrap();
        assert!(job_dir.join("metadata.json").exists());
        let metadata = store.load_metadata(&job_id).unwrap();
        assert_eq!(metadata.status, JobStatus::Processing);
        assert_eq!(metadata.server_type, "echo");
        assert_eq!(metadata.client_ip.as_deref(), Some("127.0.0.1"));
    }

    #[cfg(unix)]
    #[test]
    fn create_sets_job_dir_mode_to_0700() {
        use std::os::unix::fs::PermissionsExt;
        let (store, _dir) = store();
        let (_job_id, job_dir) = store.create("echo", None).unwrap();
        let mode = std::fs::metadata(&job_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn save_request_and_response_round_trip_through_metadata() {
        let (store, _dir) = store();
        let (job_id, _) = store.create("echo", None).unwrap();
        let req = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
        store.save_request(&job_id, &req).unwrap();
        let resp = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        store.save_response(&job_id, &resp).unwrap();

        let metadata = store.load_metadata(&job_id).unwrap();
        assert_eq!(metadata.request.unwrap(), req);
        assert_eq!(metadata.response.unwrap(), resp);
    }

    #[test]
    fn update_status_sets_error_message() {
        let (store, _dir) = store();
        let (job_id, _) = store.create("echo", None).unwrap();
        store
            .update_status(&job_id, JobStatus::Failed, Some("boom"))
            .unwrap();
        let metadata = store.load_metadata(&job_id).unwrap();
        assert_eq!(metadata.status, JobStatus::Failed);
        assert_eq!(metadata.error.as_deref(), Some("boom"));
    }

    #[test]
    fn load_metadata_for_missing_job_returns_none() {
        let (store, _dir) = store();
        assert!(store.load_metadata("nonexistent").is_none());
    }

    #[test]
    fn load_metadata_for_malformed_file_returns_none() {
        let (store, _dir) = store();
        let (job_id, dir) = store.create("echo", None).unwrap();
        std::fs::write(dir.join("metadata.json"), b"not json").unwrap();
        assert!(store.load_metadata(&job_id).is_none());
    }
}

//! Persistence of scheduler state into a mirror file.
//!
//! The mirror is a pretty-printed JSON document followed by a final `END`
//! line. The terminator guards against partially written files: a mirror
//! without it is never loaded. Writes go through a temporary file in the
//! same directory and are moved into place, so a crash mid-save leaves the
//! previous mirror intact.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::error::PoolError;
use crate::scheduler::state::{SchedulerConfig, SchedulerState, SubmissionRequest};
use crate::scheduler::task::Task;
use crate::JobId;

const END_MARKER: &str = "END";

/// Everything needed to resume a scheduler after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSnapshot {
    /// Identity of the scheduler instance that wrote this snapshot.
    pub owner: String,
    pub config: SchedulerConfig,
    /// Active jobs with their completion hooks.
    pub jobs: Vec<(JobId, Task)>,
    /// Pending submissions, front of the queue first.
    pub queue: Vec<SubmissionRequest>,
}

impl MirrorSnapshot {
    pub fn capture(owner: &str, state: &SchedulerState) -> Self {
        Self {
            owner: owner.to_string(),
            config: state.config().clone(),
            jobs: state
                .active_jobs()
                .iter()
                .map(|job| (job.job_id, job.after.clone()))
                .collect(),
            queue: state.queue().iter().cloned().collect(),
        }
    }
}

/// Storage backend for mirror snapshots.
pub trait MirrorStore: Send {
    fn load(&self, path: &Path) -> crate::Result<MirrorSnapshot>;
    fn save(&self, path: &Path, snapshot: &MirrorSnapshot) -> crate::Result<()>;
}

/// Mirror storage on the local filesystem.
pub struct FileMirror;

impl MirrorStore for FileMirror {
    fn load(&self, path: &Path) -> crate::Result<MirrorSnapshot> {
        let text = std::fs::read_to_string(path)?;
        let mut lines = text.lines().rev().filter(|line| !line.trim().is_empty());
        if lines.next().map(str::trim) != Some(END_MARKER) {
            return Err(PoolError::MirrorTruncated);
        }
        let body = match text.rfind(END_MARKER) {
            Some(idx) => &text[..idx],
            None => return Err(PoolError::MirrorTruncated),
        };
        serde_json::from_str(body).map_err(|e| PoolError::DeserializationError(e.to_string()))
    }

    fn save(&self, path: &Path, snapshot: &MirrorSnapshot) -> crate::Result<()> {
        let mut data = serde_json::to_string_pretty(snapshot)?;
        data.push('\n');
        data.push_str(END_MARKER);
        data.push('\n');

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let mut file = tempfile::NamedTempFile::new_in(parent)?;
        file.write_all(data.as_bytes())?;
        file.flush()?;
        file.persist(path).map_err(|e| PoolError::IoError(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::state::SubmitOpts;

    fn snapshot() -> MirrorSnapshot {
        let mut config = SchedulerConfig::new("alice", 10, 5);
        config.job_name = "job-abc".to_string();
        let mut state = SchedulerState::new(config);
        state.enqueue_system("hostname", 1, SubmitOpts::default());
        state.enqueue_bash("run.sh", 2, SubmitOpts::default());
        state.push_active(crate::scheduler::state::ActiveJob::new(
            42,
            Task::System("cleanup".to_string()),
        ));
        MirrorSnapshot::capture("owner-1", &state)
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pool.mirror");
        FileMirror.save(&path, &snapshot()).unwrap();

        let loaded = FileMirror.load(&path).unwrap();
        assert_eq!(loaded.owner, "owner-1");
        assert_eq!(loaded.queue.len(), 2);
        assert_eq!(loaded.jobs, vec![(42, Task::System("cleanup".to_string()))]);
        assert_eq!(loaded.config.user, "alice");
    }

    #[test]
    fn file_ends_with_marker() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pool.mirror");
        FileMirror.save(&path, &snapshot()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("\nEND\n"));
    }

    #[test]
    fn truncated_mirror_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pool.mirror");
        FileMirror.save(&path, &snapshot()).unwrap();

        // Drop the terminator as an interrupted write would.
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, &text[..text.len() - 5]).unwrap();
        assert!(matches!(
            FileMirror.load(&path),
            Err(PoolError::MirrorTruncated)
        ));
    }

    #[test]
    fn missing_mirror_is_an_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            FileMirror.load(&dir.path().join("nope.mirror")),
            Err(PoolError::IoError(_))
        ));
    }
}

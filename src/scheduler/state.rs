//! In-memory state of a scheduler: its configuration, the FIFO queue of
//! pending submissions and the table of active jobs.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::JobId;
use crate::scheduler::task::Task;
use crate::slurm::{
    DEFAULT_OUTPUT_PATH, build_bash_command, build_srun_command, build_system_command,
    srun_node_count,
};

/// Each active job may be missing from this many consecutive `squeue`
/// answers before it is considered finished.
pub const DEFAULT_MISSING_TOLERANCE: i32 = 3;

fn default_tick_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_tolerance() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Account used for `squeue`/`scancel` queries on the cluster.
    pub user: String,
    /// Job name tagged onto every submission of this scheduler.
    /// Left empty, it is derived from the scheduler identity at startup.
    #[serde(default)]
    pub job_name: String,
    /// Cap on jobs of `user` live on the cluster, counting jobs submitted
    /// by anyone.
    pub max_jobs: u32,
    /// Cap on jobs submitted by this scheduler instance.
    pub max_own_jobs: u32,
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,
    /// Consecutive remote failures absorbed before an operation is given
    /// up on.
    #[serde(default = "default_tolerance")]
    pub tolerance: u32,
    /// Where to persist the scheduler state, if anywhere.
    #[serde(default)]
    pub mirror_path: Option<PathBuf>,
}

impl SchedulerConfig {
    pub fn new(user: impl Into<String>, max_jobs: u32, max_own_jobs: u32) -> Self {
        Self {
            user: user.into(),
            job_name: String::new(),
            max_jobs,
            max_own_jobs,
            tick_interval: default_tick_interval(),
            tolerance: default_tolerance(),
            mirror_path: None,
        }
    }
}

/// A queued submission: the full `sbatch` command line plus the hooks to run
/// around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub command: String,
    /// Runs right before submission; its failure postpones the submission,
    /// and its failure budget running out discards it.
    pub before: Task,
    /// Runs once the job is observed to have left the cluster.
    pub after: Task,
}

/// A submission accepted by Slurm that the scheduler still tracks.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub job_id: JobId,
    pub after: Task,
    /// Remaining `squeue` answers the job may be absent from.
    /// Not persisted; a reloaded job starts with a fresh allowance.
    pub missing_tolerance: i32,
}

impl ActiveJob {
    pub fn new(job_id: JobId, after: Task) -> Self {
        Self {
            job_id,
            after,
            missing_tolerance: DEFAULT_MISSING_TOLERANCE,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SchedulerStatus {
    /// Accepting work and ticking.
    Active,
    /// Draining: exits once both the queue and the job table are empty.
    Dead,
    /// Exits at the next loop iteration, dropping all bookkeeping.
    Killed,
}

/// Optional knobs of a submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitOpts {
    pub before: Task,
    pub after: Task,
    pub partition: Option<String>,
    /// `--output` path; defaults to [`DEFAULT_OUTPUT_PATH`].
    pub output: Option<String>,
}

pub struct SchedulerState {
    config: SchedulerConfig,
    queue: VecDeque<SubmissionRequest>,
    active: Vec<ActiveJob>,
    status: SchedulerStatus,
    paused: bool,
    dirty: bool,
}

impl SchedulerState {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            active: Vec::new(),
            status: SchedulerStatus::Active,
            paused: false,
            dirty: false,
        }
    }

    /// Rebuild state from persisted data. The restored jobs get a fresh
    /// missing-answer allowance.
    pub fn restore(
        config: SchedulerConfig,
        queue: Vec<SubmissionRequest>,
        jobs: Vec<(JobId, Task)>,
    ) -> Self {
        let mut state = Self::new(config);
        state.queue = queue.into();
        state.active = jobs
            .into_iter()
            .map(|(job_id, after)| ActiveJob::new(job_id, after))
            .collect();
        state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn set_job_name(&mut self, job_name: String) {
        self.config.job_name = job_name;
    }

    pub fn set_mirror_path(&mut self, path: Option<PathBuf>) {
        self.config.mirror_path = path;
        self.dirty = true;
    }

    pub fn queue(&self) -> &VecDeque<SubmissionRequest> {
        &self.queue
    }

    pub fn active_jobs(&self) -> &[ActiveJob] {
        &self.active
    }

    pub fn active_jobs_mut(&mut self) -> &mut Vec<ActiveJob> {
        &mut self.active
    }

    pub fn job_count(&self) -> usize {
        self.active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.active.is_empty()
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SchedulerStatus) {
        self.status = status;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Whether unsaved changes exist; reading clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn enqueue(&mut self, request: SubmissionRequest) {
        self.queue.push_back(request);
        self.dirty = true;
    }

    /// Drop the most recently queued submission.
    pub fn undo(&mut self) -> Option<SubmissionRequest> {
        let dropped = self.queue.pop_back();
        if dropped.is_some() {
            self.dirty = true;
        }
        dropped
    }

    pub fn front_mut(&mut self) -> Option<&mut SubmissionRequest> {
        self.queue.front_mut()
    }

    pub fn pop_front(&mut self) -> Option<SubmissionRequest> {
        let popped = self.queue.pop_front();
        if popped.is_some() {
            self.dirty = true;
        }
        popped
    }

    pub fn push_active(&mut self, job: ActiveJob) {
        self.active.push(job);
        self.dirty = true;
    }

    pub fn remove_active(&mut self, job_id: JobId) -> Option<ActiveJob> {
        let idx = self.active.iter().position(|job| job.job_id == job_id)?;
        self.dirty = true;
        Some(self.active.remove(idx))
    }

    /// Forget everything queued and tracked, without touching the cluster.
    pub fn clear(&mut self) {
        if !self.queue.is_empty() || !self.active.is_empty() {
            self.dirty = true;
        }
        self.queue.clear();
        self.active.clear();
    }

    /// Queue an inline shell command as a generated batch script.
    pub fn enqueue_system(&mut self, command: &str, nodes: u32, opts: SubmitOpts) {
        let nodes = nodes.max(1);
        let output = opts
            .output
            .unwrap_or_else(|| DEFAULT_OUTPUT_PATH.to_string());
        let mut before = opts.before;
        if let Some(idx) = output.rfind('/') {
            before = Task::merge(before, Task::MakeDir(output[..=idx].to_string()));
        }
        let command = build_system_command(
            command,
            opts.partition.as_deref(),
            nodes,
            &output,
            &self.config.job_name,
        );
        self.enqueue(SubmissionRequest {
            command,
            before,
            after: opts.after,
        });
    }

    /// Queue the submission of an existing batch script. The script is
    /// uploaded right before submission. A non-positive `nodes` leaves the
    /// node count to the script.
    pub fn enqueue_bash(&mut self, script: &str, nodes: i32, opts: SubmitOpts) {
        let output = opts
            .output
            .unwrap_or_else(|| DEFAULT_OUTPUT_PATH.to_string());
        let mut before = opts.before;
        if let Some(idx) = output.rfind('/') {
            before = Task::merge(before, Task::MakeDir(output[..=idx].to_string()));
        }
        before = Task::merge(before, Task::UploadFile(script.to_string()));
        let command = build_bash_command(
            script,
            opts.partition.as_deref(),
            nodes,
            &output,
            &self.config.job_name,
        );
        self.enqueue(SubmissionRequest {
            command,
            before,
            after: opts.after,
        });
    }

    /// Queue a parallel launch of an inline command. The node count is
    /// derived from the task placement.
    pub fn enqueue_srun(&mut self, command: &str, tasks: u32, tasks_per_node: u32, opts: SubmitOpts) {
        let tasks = tasks.max(1);
        let tasks_per_node = tasks_per_node.max(1);
        let wrapped = build_srun_command(command, tasks, tasks_per_node);
        self.enqueue_system(&wrapped, srun_node_count(tasks, tasks_per_node), opts);
    }

    /// Queue a parallel launch of a script, uploading it first.
    pub fn enqueue_srun_bash(
        &mut self,
        script: &str,
        tasks: u32,
        tasks_per_node: u32,
        mut opts: SubmitOpts,
    ) {
        opts.before = Task::merge(opts.before, Task::UploadFile(script.to_string()));
        self.enqueue_srun(&format!("bash {script}"), tasks, tasks_per_node, opts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SchedulerState {
        let mut config = SchedulerConfig::new("alice", 10, 5);
        config.job_name = "job-test".to_string();
        SchedulerState::new(config)
    }

    #[test]
    fn queue_is_fifo_and_undo_drops_the_tail() {
        let mut state = state();
        state.enqueue_system("first", 1, SubmitOpts::default());
        state.enqueue_system("second", 1, SubmitOpts::default());
        state.enqueue_system("third", 1, SubmitOpts::default());

        let dropped = state.undo().unwrap();
        assert!(dropped.command.contains("third"));
        assert!(state.pop_front().unwrap().command.contains("first"));
        assert!(state.pop_front().unwrap().command.contains("second"));
        assert!(state.pop_front().is_none());
        assert!(state.undo().is_none());
    }

    #[test]
    fn system_submission_defaults() {
        let mut state = state();
        state.enqueue_system("hostname", 0, SubmitOpts::default());
        let request = state.queue().front().unwrap();
        // Node count is clamped to one and the default output is used.
        assert!(request.command.contains("--nodes 1"));
        assert!(request.command.contains(DEFAULT_OUTPUT_PATH));
        // The output directory is created before submission.
        assert_eq!(request.before, Task::MakeDir(".temp/slurm/".to_string()));
        assert!(request.after.is_null());
    }

    #[test]
    fn bash_submission_uploads_the_script() {
        let mut state = state();
        state.enqueue_bash(
            "run.sh",
            -1,
            SubmitOpts {
                output: Some("results/out-%j".to_string()),
                ..Default::default()
            },
        );
        let request = state.queue().front().unwrap();
        assert!(!request.command.contains("--nodes"));
        assert_eq!(
            request.before,
            Task::merge(
                Task::MakeDir("results/".to_string()),
                Task::UploadFile("run.sh".to_string())
            )
        );
    }

    #[test]
    fn srun_submission_places_tasks() {
        let mut state = state();
        state.enqueue_srun("solver", 45, 20, SubmitOpts::default());
        let request = state.queue().front().unwrap();
        assert!(
            request
                .command
                .contains("srun --ntasks 45 --ntasks-per-node 20 --wait 1000000 solver")
        );
        assert!(request.command.contains("--nodes 3"));
    }

    #[test]
    fn srun_bash_uploads_and_wraps() {
        let mut state = state();
        state.enqueue_srun_bash("x.sh", 2, 1, SubmitOpts::default());
        let request = state.queue().front().unwrap();
        assert!(request.command.contains("bash x.sh"));
        assert!(request.command.contains("--nodes 2"));
        match &request.before {
            Task::Merge(first, _) => assert_eq!(**first, Task::UploadFile("x.sh".to_string())),
            other => panic!("unexpected before task {other:?}"),
        }
    }

    #[test]
    fn dirty_tracks_mutations() {
        let mut state = state();
        assert!(!state.take_dirty());
        state.enqueue_system("cmd", 1, SubmitOpts::default());
        assert!(state.take_dirty());
        assert!(!state.take_dirty());
        state.push_active(ActiveJob::new(7, Task::Null));
        assert!(state.take_dirty());
        state.remove_active(7).unwrap();
        assert!(state.take_dirty());
    }

    #[test]
    fn restore_rebuilds_tables() {
        let state = SchedulerState::restore(
            SchedulerConfig::new("alice", 10, 5),
            vec![SubmissionRequest {
                command: "sbatch x".to_string(),
                before: Task::Null,
                after: Task::Null,
            }],
            vec![(11, Task::CancelThis)],
        );
        assert_eq!(state.queued_count(), 1);
        assert_eq!(state.job_count(), 1);
        assert_eq!(state.active_jobs()[0].job_id, 11);
        assert_eq!(
            state.active_jobs()[0].missing_tolerance,
            DEFAULT_MISSING_TOLERANCE
        );
    }
}

//! Client interface of the scheduler: the message protocol of the control
//! loop and the [`SchedulerHandle`] wrapping it.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::RngCore;

use crate::JobId;
use crate::common::error::PoolError;
use crate::common::rpc::{ResponseToken, RpcSender, make_rpc_queue, rpc};
use crate::scheduler::mirror::{MirrorSnapshot, MirrorStore};
use crate::scheduler::process::{
    MirrorBinding, SchedulerCore, execute_task, query_live_jobs, scheduler_process,
};
use crate::scheduler::state::{
    SchedulerConfig, SchedulerState, SchedulerStatus, SubmissionRequest, SubmitOpts,
};
use crate::scheduler::task::Task;
use crate::transport::RemoteExecutor;

#[derive(Debug)]
pub enum SubmitSpec {
    System {
        command: String,
        nodes: u32,
        opts: SubmitOpts,
    },
    Bash {
        script: String,
        nodes: i32,
        opts: SubmitOpts,
    },
    Srun {
        command: String,
        tasks: u32,
        tasks_per_node: u32,
        opts: SubmitOpts,
    },
    SrunBash {
        script: String,
        tasks: u32,
        tasks_per_node: u32,
        opts: SubmitOpts,
    },
}

#[derive(Debug)]
pub enum SchedulerMessage {
    Submit(SubmitSpec, ResponseToken<crate::Result<()>>),
    Undo(ResponseToken<crate::Result<Option<SubmissionRequest>>>),
    CancelAll(ResponseToken<crate::Result<()>>),
    CancelThis(ResponseToken<crate::Result<()>>),
    Pause(ResponseToken<crate::Result<()>>),
    Unpause,
    Kill {
        warn_if_no_mirror: bool,
        token: ResponseToken<()>,
    },
    Shutdown {
        cancel_first: bool,
        token: ResponseToken<crate::Result<()>>,
    },
    QueryLiveJobs(ResponseToken<crate::Result<BTreeSet<JobId>>>),
    GetStats(ResponseToken<SchedulerStats>),
    Save(PathBuf, ResponseToken<crate::Result<()>>),
    SetMirror(Option<PathBuf>, ResponseToken<crate::Result<()>>),
}

/// Point-in-time view of the scheduler's bookkeeping.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    /// Pending submission command lines, front of the queue first.
    pub queue_commands: Vec<String>,
    /// Jobs submitted by this scheduler that it still tracks.
    pub active_job_ids: Vec<JobId>,
}

impl SchedulerStats {
    pub fn queue_size(&self) -> usize {
        self.queue_commands.len()
    }

    pub fn active_count(&self) -> usize {
        self.active_job_ids.len()
    }

    /// Everything the scheduler is still responsible for, queued and
    /// submitted alike.
    pub fn task_number(&self) -> usize {
        self.queue_commands.len() + self.active_job_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue_commands.is_empty() && self.active_job_ids.is_empty()
    }
}

/// Answer requests that mutate a scheduler which is no longer accepting
/// work. Read-only requests, `Kill` and `Shutdown` pass through; `Dead`
/// draining in particular still needs them.
fn reject_if_stopped(
    core: &SchedulerCore,
    message: SchedulerMessage,
) -> Option<SchedulerMessage> {
    if core.state.status() == SchedulerStatus::Active {
        return Some(message);
    }
    match message {
        SchedulerMessage::Submit(_, token) => token.respond(Err(PoolError::SchedulerStopped)),
        SchedulerMessage::Undo(token) => token.respond(Err(PoolError::SchedulerStopped)),
        SchedulerMessage::CancelAll(token)
        | SchedulerMessage::CancelThis(token)
        | SchedulerMessage::Pause(token)
        | SchedulerMessage::Save(_, token)
        | SchedulerMessage::SetMirror(_, token) => {
            token.respond(Err(PoolError::SchedulerStopped))
        }
        SchedulerMessage::Unpause => {}
        other => return Some(other),
    }
    None
}

pub(crate) async fn handle_message(core: &mut SchedulerCore, message: SchedulerMessage) {
    let Some(message) = reject_if_stopped(core, message) else {
        return;
    };
    match message {
        SchedulerMessage::Submit(spec, token) => {
            match spec {
                SubmitSpec::System {
                    command,
                    nodes,
                    opts,
                } => core.state.enqueue_system(&command, nodes, opts),
                SubmitSpec::Bash {
                    script,
                    nodes,
                    opts,
                } => core.state.enqueue_bash(&script, nodes, opts),
                SubmitSpec::Srun {
                    command,
                    tasks,
                    tasks_per_node,
                    opts,
                } => core.state.enqueue_srun(&command, tasks, tasks_per_node, opts),
                SubmitSpec::SrunBash {
                    script,
                    tasks,
                    tasks_per_node,
                    opts,
                } => core
                    .state
                    .enqueue_srun_bash(&script, tasks, tasks_per_node, opts),
            }
            token.respond(Ok(()));
        }
        SchedulerMessage::Undo(token) => token.respond(Ok(core.state.undo())),
        SchedulerMessage::CancelAll(token) => {
            let result = execute_task(&Task::CancelAll, core.executor.as_mut(), &mut core.state)
                .await
                .map(|_| ())
                .map_err(PoolError::from);
            token.respond(result);
        }
        SchedulerMessage::CancelThis(token) => {
            let result = execute_task(&Task::CancelThis, core.executor.as_mut(), &mut core.state)
                .await
                .map(|_| ())
                .map_err(PoolError::from);
            token.respond(result);
        }
        SchedulerMessage::Pause(token) => {
            core.state.set_paused(true);
            token.respond(Ok(()));
        }
        SchedulerMessage::Unpause => core.state.set_paused(false),
        SchedulerMessage::Kill {
            warn_if_no_mirror,
            token,
        } => {
            if warn_if_no_mirror && core.mirror.is_none() {
                log::warn!(
                    "Killing a scheduler without a mirror; its queued submissions are lost \
and its jobs are no longer managed"
                );
            }
            core.state.set_status(SchedulerStatus::Killed);
            token.respond(());
        }
        SchedulerMessage::Shutdown {
            cancel_first,
            token,
        } => {
            let result = if cancel_first {
                execute_task(&Task::CancelAll, core.executor.as_mut(), &mut core.state)
                    .await
                    .map(|_| ())
                    .map_err(PoolError::from)
            } else {
                Ok(())
            };
            core.state.set_status(SchedulerStatus::Dead);
            token.respond(result);
        }
        SchedulerMessage::QueryLiveJobs(token) => {
            let result = query_live_jobs(core.executor.as_mut(), &core.state.config().user)
                .await
                .map_err(PoolError::from);
            token.respond(result);
        }
        SchedulerMessage::GetStats(token) => token.respond(SchedulerStats {
            queue_commands: core
                .state
                .queue()
                .iter()
                .map(|request| request.command.clone())
                .collect(),
            active_job_ids: core
                .state
                .active_jobs()
                .iter()
                .map(|job| job.job_id)
                .collect(),
        }),
        SchedulerMessage::Save(path, token) => {
            let snapshot = MirrorSnapshot::capture(&core.owner_id, &core.state);
            token.respond(core.store.save(&path, &snapshot));
        }
        SchedulerMessage::SetMirror(path, token) => {
            core.state.set_mirror_path(path.clone());
            core.mirror = path.map(|path| MirrorBinding {
                path,
                expected_owner: None,
            });
            token.respond(Ok(()));
        }
    }
}

/// Interface to a running scheduler. Cheap to clone; all clones talk to the
/// same control loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: RpcSender<SchedulerMessage>,
}

impl SchedulerHandle {
    /// Queue an inline shell command for submission on `nodes` nodes.
    pub async fn submit_system(
        &self,
        command: &str,
        nodes: u32,
        opts: SubmitOpts,
    ) -> crate::Result<()> {
        let command = command.to_string();
        rpc(&self.sender, |token| {
            SchedulerMessage::Submit(
                SubmitSpec::System {
                    command,
                    nodes,
                    opts,
                },
                token,
            )
        })
        .await?
    }

    /// Queue the submission of a local batch script; it is uploaded right
    /// before submission. A non-positive `nodes` leaves the node count to
    /// the script itself.
    pub async fn submit_bash(
        &self,
        script: &str,
        nodes: i32,
        opts: SubmitOpts,
    ) -> crate::Result<()> {
        let script = script.to_string();
        rpc(&self.sender, |token| {
            SchedulerMessage::Submit(
                SubmitSpec::Bash {
                    script,
                    nodes,
                    opts,
                },
                token,
            )
        })
        .await?
    }

    /// Queue a parallel launch of an inline command with `tasks` tasks and
    /// at most `tasks_per_node` of them per node
    /// ([`DEFAULT_TASKS_PER_NODE`](crate::slurm::DEFAULT_TASKS_PER_NODE)
    /// is a reasonable limit).
    pub async fn submit_srun(
        &self,
        command: &str,
        tasks: u32,
        tasks_per_node: u32,
        opts: SubmitOpts,
    ) -> crate::Result<()> {
        let command = command.to_string();
        rpc(&self.sender, |token| {
            SchedulerMessage::Submit(
                SubmitSpec::Srun {
                    command,
                    tasks,
                    tasks_per_node,
                    opts,
                },
                token,
            )
        })
        .await?
    }

    /// Queue a parallel launch of a local script, uploading it first.
    pub async fn submit_srun_bash(
        &self,
        script: &str,
        tasks: u32,
        tasks_per_node: u32,
        opts: SubmitOpts,
    ) -> crate::Result<()> {
        let script = script.to_string();
        rpc(&self.sender, |token| {
            SchedulerMessage::Submit(
                SubmitSpec::SrunBash {
                    script,
                    tasks,
                    tasks_per_node,
                    opts,
                },
                token,
            )
        })
        .await?
    }

    /// Drop the most recently queued submission, returning it.
    pub async fn undo(&self) -> crate::Result<Option<SubmissionRequest>> {
        rpc(&self.sender, SchedulerMessage::Undo).await?
    }

    /// Cancel every job of the configured account and forget all queued and
    /// tracked work.
    pub async fn cancel_all(&self) -> crate::Result<()> {
        rpc(&self.sender, SchedulerMessage::CancelAll).await?
    }

    /// Cancel the jobs carrying this scheduler's job name and forget all
    /// queued and tracked work.
    pub async fn cancel_this(&self) -> crate::Result<()> {
        rpc(&self.sender, SchedulerMessage::CancelThis).await?
    }

    /// Stop submitting and reconciling until [`unpause`](Self::unpause).
    /// Returns once the control loop has acknowledged the pause, so no tick
    /// is in flight afterwards.
    pub async fn pause(&self) -> crate::Result<()> {
        rpc(&self.sender, SchedulerMessage::Pause).await?
    }

    pub fn unpause(&self) -> crate::Result<()> {
        self.sender
            .send(SchedulerMessage::Unpause)
            .map_err(|_| PoolError::SchedulerStopped)
    }

    /// Stop the scheduler immediately. Queued and active jobs are left
    /// as they are on the cluster; with `warn_if_no_mirror` set, killing an
    /// unmirrored scheduler logs a warning, since nothing can resume its
    /// bookkeeping afterwards.
    pub async fn kill(&self, warn_if_no_mirror: bool) -> crate::Result<()> {
        rpc(&self.sender, |token| SchedulerMessage::Kill {
            warn_if_no_mirror,
            token,
        })
        .await
    }

    /// Stop accepting work and exit once everything queued and tracked has
    /// run to completion.
    pub async fn shutdown(&self) -> crate::Result<()> {
        rpc(&self.sender, |token| SchedulerMessage::Shutdown {
            cancel_first: false,
            token,
        })
        .await?
    }

    /// Cancel everything and stop.
    pub async fn shutdown_now(&self) -> crate::Result<()> {
        rpc(&self.sender, |token| SchedulerMessage::Shutdown {
            cancel_first: true,
            token,
        })
        .await?
    }

    /// Ids of all live jobs of the configured account, straight from the
    /// cluster.
    pub async fn job_ids(&self) -> crate::Result<BTreeSet<JobId>> {
        rpc(&self.sender, SchedulerMessage::QueryLiveJobs).await?
    }

    /// Number of live jobs of the configured account.
    pub async fn job_number(&self) -> crate::Result<usize> {
        Ok(self.job_ids().await?.len())
    }

    pub async fn stats(&self) -> crate::Result<SchedulerStats> {
        rpc(&self.sender, SchedulerMessage::GetStats).await
    }

    /// Number of jobs submitted by this scheduler that are still tracked.
    pub async fn active_count(&self) -> crate::Result<usize> {
        Ok(self.stats().await?.active_count())
    }

    /// Number of submissions still waiting in the queue.
    pub async fn queue_size(&self) -> crate::Result<usize> {
        Ok(self.stats().await?.queue_size())
    }

    /// Total outstanding work: queued submissions plus tracked jobs.
    pub async fn task_number(&self) -> crate::Result<usize> {
        Ok(self.stats().await?.task_number())
    }

    /// Block until the queue and the job table are both empty. A scheduler
    /// that has already stopped counts as done.
    pub async fn wait_until_done(&self) -> crate::Result<()> {
        loop {
            match self.stats().await {
                Ok(stats) if stats.is_empty() => return Ok(()),
                Ok(_) => tokio::time::sleep(Duration::from_millis(200)).await,
                Err(PoolError::SchedulerStopped) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Write a one-off snapshot to `path`, independent of the configured
    /// mirror.
    pub async fn save(&self, path: impl Into<PathBuf>) -> crate::Result<()> {
        let path = path.into();
        rpc(&self.sender, |token| SchedulerMessage::Save(path, token)).await?
    }

    /// Change where the scheduler mirrors its state; `None` disables
    /// mirroring.
    pub async fn set_mirror(&self, path: Option<PathBuf>) -> crate::Result<()> {
        rpc(&self.sender, |token| SchedulerMessage::SetMirror(path, token)).await?
    }
}

fn generate_identity() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Create a fresh scheduler. The returned future is its control loop and
/// must be spawned (or otherwise driven) by the caller.
pub fn create_scheduler(
    mut config: SchedulerConfig,
    executor: Box<dyn RemoteExecutor>,
    store: Box<dyn MirrorStore>,
) -> (SchedulerHandle, impl Future<Output = ()>) {
    let owner_id = generate_identity();
    if config.job_name.is_empty() {
        config.job_name = format!("job-{}", &owner_id[..8]);
    }
    let mirror = config.mirror_path.clone().map(|path| MirrorBinding {
        path,
        expected_owner: None,
    });
    log::debug!("Creating scheduler {owner_id}");
    let core = SchedulerCore::new(
        SchedulerState::new(config),
        executor,
        store,
        mirror,
        owner_id,
    );
    let (sender, receiver) = make_rpc_queue();
    (SchedulerHandle { sender }, scheduler_process(core, receiver))
}

/// Resume a scheduler from a mirror file written by an earlier instance.
///
/// The new instance gets a fresh identity and claims the file with its first
/// save; the previous owner, if still running, notices the takeover and
/// stops without touching the cluster.
pub fn load_scheduler(
    path: &Path,
    executor: Box<dyn RemoteExecutor>,
    store: Box<dyn MirrorStore>,
) -> crate::Result<(SchedulerHandle, impl Future<Output = ()> + use<>)> {
    let snapshot = store.load(path)?;
    let owner_id = generate_identity();
    log::debug!(
        "Resuming scheduler {owner_id} from the mirror of {}",
        snapshot.owner
    );
    let mirror = Some(MirrorBinding {
        path: path.to_path_buf(),
        expected_owner: Some(snapshot.owner),
    });
    let mut config = snapshot.config;
    config.mirror_path = Some(path.to_path_buf());
    let mut state = SchedulerState::restore(config, snapshot.queue, snapshot.jobs);
    // Schedule an immediate save so that the file is claimed promptly.
    state.mark_dirty();
    let core = SchedulerCore::new(state, executor, store, mirror, owner_id);
    let (sender, receiver) = make_rpc_queue();
    Ok((SchedulerHandle { sender }, scheduler_process(core, receiver)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::scheduler::mirror::FileMirror;
    use crate::scheduler::process::testing::FakeExecutor;
    use crate::scheduler::state::SchedulerState;

    fn test_config() -> SchedulerConfig {
        let mut config = SchedulerConfig::new("alice", 10, 5);
        config.tick_interval = Duration::from_millis(10);
        config
    }

    fn spawn_scheduler(
        executor: FakeExecutor,
        config: SchedulerConfig,
    ) -> (SchedulerHandle, tokio::task::JoinHandle<()>) {
        crate::scheduler::process::testing::init_test_logging();
        let (handle, process) =
            create_scheduler(config, Box::new(executor), Box::new(FileMirror));
        (handle, tokio::spawn(process))
    }

    async fn wait_for(mut condition: impl AsyncFnMut() -> bool) {
        for _ in 0..500 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition was not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_job_becomes_active_and_finishes() {
        let executor = FakeExecutor::default();
        executor.lock().submit_ids.push(100);
        let (handle, process) = spawn_scheduler(executor.clone(), test_config());

        handle
            .submit_system("hostname", 1, SubmitOpts::default())
            .await
            .unwrap();
        let h = handle.clone();
        wait_for(async || h.stats().await.unwrap().active_job_ids == vec![100]).await;

        // The job never shows up in squeue, so it is soon considered done.
        handle.wait_until_done().await.unwrap();
        handle.shutdown().await.unwrap();
        process.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_blocks_submissions() {
        let executor = FakeExecutor::default();
        executor.lock().submit_ids.push(100);
        let (handle, process) = spawn_scheduler(executor.clone(), test_config());

        handle.pause().await.unwrap();
        handle
            .submit_system("hostname", 1, SubmitOpts::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.stats().await.unwrap().queue_size(), 1);
        assert!(executor.commands().is_empty());

        handle.unpause().unwrap();
        let h = handle.clone();
        wait_for(async || h.stats().await.unwrap().active_job_ids == vec![100]).await;

        handle.kill(false).await.unwrap();
        process.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn undo_drops_the_latest_submission() {
        let executor = FakeExecutor::default();
        let (handle, process) = spawn_scheduler(executor, test_config());

        handle.pause().await.unwrap();
        handle
            .submit_system("first", 1, SubmitOpts::default())
            .await
            .unwrap();
        handle
            .submit_system("second", 1, SubmitOpts::default())
            .await
            .unwrap();

        let dropped = handle.undo().await.unwrap().unwrap();
        assert!(dropped.command.contains("second"));
        assert_eq!(handle.queue_size().await.unwrap(), 1);

        handle.kill(false).await.unwrap();
        process.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn killed_scheduler_rejects_requests() {
        let executor = FakeExecutor::default();
        let (handle, process) = spawn_scheduler(executor, test_config());

        handle.kill(false).await.unwrap();
        process.await.unwrap();
        assert!(matches!(
            handle.submit_system("late", 1, SubmitOpts::default()).await,
            Err(PoolError::SchedulerStopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_now_cancels_everything() {
        let executor = FakeExecutor::default();
        let (handle, process) = spawn_scheduler(executor.clone(), test_config());

        handle.pause().await.unwrap();
        handle
            .submit_system("hostname", 1, SubmitOpts::default())
            .await
            .unwrap();
        handle.shutdown_now().await.unwrap();
        process.await.unwrap();
        assert_eq!(executor.count_matching("scancel --user alice --full"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn job_ids_queries_the_cluster() {
        let executor = FakeExecutor::default();
        executor.lock().live_jobs.extend([3, 11]);
        let (handle, process) = spawn_scheduler(executor, test_config());

        let ids = handle.job_ids().await.unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![3, 11]);
        assert_eq!(handle.job_number().await.unwrap(), 2);

        handle.kill(false).await.unwrap();
        process.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn loaded_scheduler_claims_the_mirror() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pool.mirror");

        // A previous instance left a snapshot with queued work behind.
        let mut config = test_config();
        config.job_name = "job-old".to_string();
        let mut state = SchedulerState::new(config);
        state.enqueue_system("resume-me", 1, SubmitOpts::default());
        FileMirror
            .save(&path, &MirrorSnapshot::capture("previous-owner", &state))
            .unwrap();

        let executor = FakeExecutor::default();
        executor.lock().submit_ids.push(200);
        let (handle, process) =
            load_scheduler(&path, Box::new(executor), Box::new(FileMirror)).unwrap();
        let process = tokio::spawn(process);

        let h = handle.clone();
        wait_for(async || h.stats().await.unwrap().active_job_ids == vec![200]).await;

        let snapshot = FileMirror.load(&path).unwrap();
        assert_ne!(snapshot.owner, "previous-owner");
        assert_eq!(snapshot.jobs.first().map(|(id, _)| *id), Some(200));

        handle.kill(false).await.unwrap();
        process.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn draining_scheduler_rejects_mutations() {
        let executor = FakeExecutor::default();
        let (handle, process) = spawn_scheduler(executor, test_config());

        // Pausing first keeps the queued submission from draining away.
        handle.pause().await.unwrap();
        handle
            .submit_system("hostname", 1, SubmitOpts::default())
            .await
            .unwrap();
        handle.shutdown().await.unwrap();

        assert!(matches!(
            handle.submit_system("late", 1, SubmitOpts::default()).await,
            Err(PoolError::SchedulerStopped)
        ));
        assert!(matches!(
            handle.undo().await,
            Err(PoolError::SchedulerStopped)
        ));
        assert!(matches!(
            handle.pause().await,
            Err(PoolError::SchedulerStopped)
        ));
        // Observation stays possible while the scheduler drains.
        assert_eq!(handle.queue_size().await.unwrap(), 1);

        handle.kill(false).await.unwrap();
        process.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn task_number_counts_queue_and_active() {
        let executor = FakeExecutor::default();
        executor.lock().submit_ids = vec![101, 100];
        let (handle, process) = spawn_scheduler(executor.clone(), test_config());

        handle.pause().await.unwrap();
        handle
            .submit_system("first", 1, SubmitOpts::default())
            .await
            .unwrap();
        handle
            .submit_system("second", 1, SubmitOpts::default())
            .await
            .unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.task_number(), 2);
        assert_eq!(stats.task_number(), stats.active_count() + stats.queue_size());

        executor.lock().live_jobs.extend([100, 101]);
        handle.unpause().unwrap();
        let h = handle.clone();
        wait_for(async || h.active_count().await.unwrap() == 2).await;
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.task_number(), 2);
        assert_eq!(stats.task_number(), stats.active_count() + stats.queue_size());
        assert_eq!(handle.task_number().await.unwrap(), 2);

        handle.kill(false).await.unwrap();
        process.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn kill_accepts_the_unmirrored_warning_flag() {
        let executor = FakeExecutor::default();
        let (handle, process) = spawn_scheduler(executor, test_config());

        handle.pause().await.unwrap();
        handle
            .submit_system("hostname", 1, SubmitOpts::default())
            .await
            .unwrap();
        // No mirror is configured, so this logs the unmanaged-jobs warning.
        handle.kill(true).await.unwrap();
        process.await.unwrap();
    }

    #[tokio::test]
    async fn loading_a_truncated_mirror_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pool.mirror");
        std::fs::write(&path, "{\"owner\": \"x\"").unwrap();

        let result = load_scheduler(
            &path,
            Box::new(FakeExecutor::default()),
            Box::new(FileMirror),
        );
        assert!(matches!(result, Err(PoolError::MirrorTruncated)));
    }
}

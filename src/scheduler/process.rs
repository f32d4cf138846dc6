//! The background control loop of a scheduler.
//!
//! A single task owns all state and alternates between periodic ticks and
//! requests coming from [`SchedulerHandle`](crate::SchedulerHandle)s. One
//! tick reconciles the job table against `squeue` and submits at most one
//! queued request.

use std::collections::BTreeSet;
use std::path::PathBuf;

use futures::future::BoxFuture;
use tokio::time::MissedTickBehavior;

use crate::JobId;
use crate::common::rpc::RpcReceiver;
use crate::scheduler::mirror::{MirrorSnapshot, MirrorStore};
use crate::scheduler::service::{SchedulerMessage, handle_message};
use crate::scheduler::state::{
    ActiveJob, DEFAULT_MISSING_TOLERANCE, SchedulerState, SchedulerStatus, SubmitOpts,
};
use crate::scheduler::task::Task;
use crate::scheduler::tolerance::{ToleranceCounter, ToleranceStatus};
use crate::slurm::{
    parse_submitted_job_id, parse_squeue_output, scancel_name_command, scancel_user_command,
    squeue_command,
};
use crate::transport::RemoteExecutor;

/// The mirror file this scheduler writes to, together with the identity it
/// expects to find recorded there. `None` until the first successful save
/// claims the file.
pub struct MirrorBinding {
    pub path: PathBuf,
    pub expected_owner: Option<String>,
}

pub struct SchedulerCore {
    pub(crate) state: SchedulerState,
    pub(crate) executor: Box<dyn RemoteExecutor>,
    pub(crate) store: Box<dyn MirrorStore>,
    pub(crate) mirror: Option<MirrorBinding>,
    pub(crate) tolerance: ToleranceCounter,
    pub(crate) owner_id: String,
}

impl SchedulerCore {
    pub fn new(
        state: SchedulerState,
        executor: Box<dyn RemoteExecutor>,
        store: Box<dyn MirrorStore>,
        mirror: Option<MirrorBinding>,
        owner_id: String,
    ) -> Self {
        let tolerance = ToleranceCounter::new(state.config().tolerance);
        Self {
            state,
            executor,
            store,
            mirror,
            tolerance,
            owner_id,
        }
    }
}

/// Runs until the scheduler is killed, drained after a shutdown, or all of
/// its handles are dropped.
pub async fn scheduler_process(
    mut core: SchedulerCore,
    mut receiver: RpcReceiver<SchedulerMessage>,
) {
    let mut tick = tokio::time::interval(core.state.config().tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        match core.state.status() {
            SchedulerStatus::Killed => break,
            SchedulerStatus::Dead if core.state.is_empty() => break,
            _ => {}
        }
        tokio::select! {
            _ = tick.tick() => {
                run_tick(&mut core).await;
                flush_mirror(&mut core);
            }
            message = receiver.recv() => {
                match message {
                    Some(message) => handle_message(&mut core, message).await,
                    None => break,
                }
            }
        }
    }
    flush_mirror(&mut core);
    log::debug!("Scheduler {} has ended", core.owner_id);
}

/// One reconciliation and submission round.
async fn run_tick(core: &mut SchedulerCore) {
    if core.state.is_paused() || core.state.is_empty() {
        return;
    }

    if let Err(e) = core.executor.ensure_connected().await {
        log::warn!("Cluster connection check failed: {e:?}");
        return;
    }

    if !check_mirror(core) {
        return;
    }

    let live = match query_live_jobs(core.executor.as_mut(), &core.state.config().user).await {
        Ok(live) => live,
        Err(e) => {
            log::warn!("Cannot query live jobs: {e:?}");
            return;
        }
    };

    if !reconcile_jobs(core, &live).await {
        return;
    }

    // Admission control; `live` counts every job of the account, not just
    // jobs of this scheduler.
    if core.state.queue().is_empty() {
        return;
    }
    if live.len() >= core.state.config().max_jobs as usize {
        log::debug!("Job limit of the account reached, delaying submissions");
        return;
    }
    if core.state.job_count() >= core.state.config().max_own_jobs as usize {
        log::debug!("Job limit of the scheduler reached, delaying submissions");
        return;
    }

    submit_head(core).await;
}

/// Compare the job table against the live set and finish jobs that stayed
/// missing for too long. Returns `false` when the tick should be aborted.
async fn reconcile_jobs(core: &mut SchedulerCore, live: &BTreeSet<JobId>) -> bool {
    let mut finished = Vec::new();
    for job in core.state.active_jobs_mut() {
        if live.contains(&job.job_id) {
            job.missing_tolerance = DEFAULT_MISSING_TOLERANCE;
        } else {
            job.missing_tolerance -= 1;
            if job.missing_tolerance < 0 {
                finished.push(job.job_id);
            }
        }
    }

    for job_id in finished {
        // The hook of an earlier job may have already dropped this one.
        let Some(after) = core
            .state
            .active_jobs()
            .iter()
            .find(|job| job.job_id == job_id)
            .map(|job| job.after.clone())
        else {
            continue;
        };
        let result = execute_task(&after, core.executor.as_mut(), &mut core.state).await;
        let success = matches!(result, Ok(true));
        if let Err(e) = result {
            log::warn!("Completion hook of job {job_id} failed: {e:?}");
        }
        match core.tolerance.record(success, "job completion hook") {
            ToleranceStatus::Succeeded => {
                core.state.remove_active(job_id);
                log::info!("Job {job_id} has finished");
            }
            ToleranceStatus::Exceeded => {
                core.state.remove_active(job_id);
                log::warn!("Dropping the completion hook of job {job_id}");
            }
            ToleranceStatus::Failed => return false,
        }
    }
    true
}

/// Try to submit the submission at the front of the queue.
async fn submit_head(core: &mut SchedulerCore) {
    let Some(head) = core.state.queue().front().cloned() else {
        return;
    };

    if !head.before.is_null() {
        let result = execute_task(&head.before, core.executor.as_mut(), &mut core.state).await;
        let success = matches!(result, Ok(true));
        if let Err(e) = result {
            log::warn!("Preparation of submission `{}` failed: {e:?}", head.command);
        }
        match core.tolerance.record(success, "submission preparation") {
            ToleranceStatus::Succeeded => {
                // The hook may have rewritten the queue; only strip it when
                // the same submission is still at the front.
                match core.state.front_mut() {
                    Some(front) if front.command == head.command => {
                        front.before = Task::Null;
                        core.state.mark_dirty();
                    }
                    _ => return,
                }
            }
            ToleranceStatus::Failed => return,
            ToleranceStatus::Exceeded => {
                log::warn!("Giving up on submission `{}`", head.command);
                core.state.pop_front();
                return;
            }
        }
    }

    let mut channel = match core.executor.open_channel(head.command.clone()).await {
        Ok(channel) => {
            core.tolerance.record(true, "submission");
            channel
        }
        Err(e) => {
            log::warn!("Cannot run submission `{}`: {e:?}", head.command);
            if let ToleranceStatus::Exceeded = core.tolerance.record(false, "submission") {
                log::warn!("Giving up on submission `{}`", head.command);
                core.state.pop_front();
            }
            return;
        }
    };

    let line = channel.read_line().await.ok().flatten();
    match line.as_deref().and_then(parse_submitted_job_id) {
        Some(job_id) => {
            core.tolerance.record(true, "submission response");
            if let Some(request) = core.state.pop_front() {
                core.state.push_active(ActiveJob::new(job_id, request.after));
            }
            log::info!("Job {job_id} was submitted");
        }
        None => {
            log::warn!(
                "Submission `{}` was not accepted, the response was {line:?}",
                head.command
            );
            if let ToleranceStatus::Exceeded = core.tolerance.record(false, "submission response") {
                log::warn!("Giving up on submission `{}`", head.command);
                core.state.pop_front();
            }
        }
    }
}

/// Verify that the mirror file still records this instance as its owner.
/// Returns `false` when the tick should be aborted; on a detected takeover
/// the scheduler is killed and detached from the mirror.
fn check_mirror(core: &mut SchedulerCore) -> bool {
    let Some(binding) = &core.mirror else {
        return true;
    };
    let Some(expected) = binding.expected_owner.clone() else {
        // Nothing written yet; the first save will claim the file.
        return true;
    };
    match core.store.load(&binding.path) {
        Ok(snapshot) => {
            core.tolerance.record(true, "mirror ownership check");
            if snapshot.owner == expected {
                return true;
            }
            log::warn!(
                "The mirror was taken over by scheduler {}, shutting down without \
touching the cluster",
                snapshot.owner
            );
            core.state.set_status(SchedulerStatus::Killed);
            core.mirror = None;
            false
        }
        Err(e) => match core.tolerance.record(false, "mirror ownership check") {
            ToleranceStatus::Exceeded => {
                log::error!("Lost access to the mirror file: {e}; shutting down");
                core.state.set_status(SchedulerStatus::Killed);
                core.mirror = None;
                false
            }
            _ => false,
        },
    }
}

/// Persist the state if it changed since the last save. A successful save
/// claims ownership of the mirror file.
pub(crate) fn flush_mirror(core: &mut SchedulerCore) {
    if !core.state.is_dirty() {
        return;
    }
    let Some(binding) = core.mirror.as_mut() else {
        return;
    };
    let snapshot = MirrorSnapshot::capture(&core.owner_id, &core.state);
    match core.store.save(&binding.path, &snapshot) {
        Ok(()) => {
            binding.expected_owner = Some(core.owner_id.clone());
            core.state.clear_dirty();
            log::debug!("Mirror saved to {}", binding.path.display());
        }
        Err(e) => {
            log::error!("Cannot write the mirror file {}: {e}", binding.path.display());
        }
    }
}

pub(crate) async fn query_live_jobs(
    executor: &mut dyn RemoteExecutor,
    user: &str,
) -> anyhow::Result<BTreeSet<JobId>> {
    let mut channel = executor.open_channel(squeue_command(user)).await?;
    let lines = channel.read_all().await?;
    parse_squeue_output(lines.iter().map(|line| line.as_str()))
}

/// Interpret a [`Task`]. `Ok(true)` is success, `Ok(false)` a clean failure
/// that is subject to the failure budget, `Err` an unexpected one.
pub(crate) fn execute_task<'a>(
    task: &'a Task,
    executor: &'a mut dyn RemoteExecutor,
    state: &'a mut SchedulerState,
) -> BoxFuture<'a, anyhow::Result<bool>> {
    Box::pin(async move {
        match task {
            Task::Null => Ok(true),
            Task::Merge(first, second) => {
                if !execute_task(first, executor, state).await? {
                    return Ok(false);
                }
                execute_task(second, executor, state).await
            }
            Task::System(command) => {
                let mut channel = executor.open_channel(command.clone()).await?;
                channel.read_all().await?;
                Ok(true)
            }
            Task::MakeDir(dir) => executor.ensure_directory(dir.clone()).await,
            Task::UploadFile(path) => {
                executor.upload_file(path.clone()).await?;
                Ok(true)
            }
            Task::CancelAll => {
                let command = scancel_user_command(&state.config().user);
                let mut channel = executor.open_channel(command).await?;
                channel.read_all().await?;
                state.clear();
                Ok(true)
            }
            Task::CancelThis => {
                let command = scancel_name_command(&state.config().job_name);
                let mut channel = executor.open_channel(command).await?;
                channel.read_all().await?;
                state.clear();
                Ok(true)
            }
            Task::SubmitSystem {
                before,
                after,
                command,
                partition,
                nodes,
                output,
            } => {
                state.enqueue_system(
                    command,
                    *nodes,
                    SubmitOpts {
                        before: (**before).clone(),
                        after: (**after).clone(),
                        partition: partition.clone(),
                        output: Some(output.clone()),
                    },
                );
                Ok(true)
            }
            Task::SubmitBash {
                before,
                after,
                script,
                partition,
                nodes,
                output,
            } => {
                state.enqueue_bash(
                    script,
                    *nodes,
                    SubmitOpts {
                        before: (**before).clone(),
                        after: (**after).clone(),
                        partition: partition.clone(),
                        output: Some(output.clone()),
                    },
                );
                Ok(true)
            }
            Task::SubmitSrun {
                before,
                after,
                command,
                partition,
                tasks,
                tasks_per_node,
                output,
            } => {
                state.enqueue_srun(
                    command,
                    *tasks,
                    *tasks_per_node,
                    SubmitOpts {
                        before: (**before).clone(),
                        after: (**after).clone(),
                        partition: partition.clone(),
                        output: Some(output.clone()),
                    },
                );
                Ok(true)
            }
            Task::SubmitSrunBash {
                before,
                after,
                script,
                partition,
                tasks,
                tasks_per_node,
                output,
            } => {
                state.enqueue_srun_bash(
                    script,
                    *tasks,
                    *tasks_per_node,
                    SubmitOpts {
                        before: (**before).clone(),
                        after: (**after).clone(),
                        partition: partition.clone(),
                        output: Some(output.clone()),
                    },
                );
                Ok(true)
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    use futures::FutureExt;
    use futures::future::BoxFuture;

    use crate::JobId;
    use crate::transport::{CommandChannel, RemoteExecutor};

    pub fn init_test_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[derive(Default)]
    pub struct FakeInner {
        pub live_jobs: BTreeSet<JobId>,
        pub submit_ids: Vec<JobId>,
        pub commands: Vec<String>,
        pub uploaded: Vec<String>,
        pub dirs: Vec<String>,
        pub fail_connect: bool,
        pub fail_matching: Option<String>,
    }

    /// Scripted in-memory executor: `squeue` answers with `live_jobs`,
    /// every `sbatch` pops the next id from `submit_ids` (or answers with
    /// an error line), commands containing `fail_matching` fail to start.
    #[derive(Clone, Default)]
    pub struct FakeExecutor(Arc<Mutex<FakeInner>>);

    impl FakeExecutor {
        pub fn lock(&self) -> std::sync::MutexGuard<'_, FakeInner> {
            self.0.lock().unwrap()
        }

        pub fn commands(&self) -> Vec<String> {
            self.lock().commands.clone()
        }

        pub fn count_matching(&self, needle: &str) -> usize {
            self.lock()
                .commands
                .iter()
                .filter(|c| c.contains(needle))
                .count()
        }
    }

    impl RemoteExecutor for FakeExecutor {
        fn ensure_connected(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
            let fail = self.lock().fail_connect;
            async move {
                if fail {
                    anyhow::bail!("no connection");
                }
                Ok(())
            }
            .boxed()
        }

        fn open_channel(&mut self, command: String) -> BoxFuture<'_, anyhow::Result<CommandChannel>> {
            let mut inner = self.lock();
            inner.commands.push(command.clone());
            if let Some(needle) = &inner.fail_matching {
                if command.contains(needle.as_str()) {
                    return async { anyhow::bail!("injected failure") }.boxed();
                }
            }
            let lines = if command.starts_with("squeue") {
                inner.live_jobs.iter().map(|id| id.to_string()).collect()
            } else if command.contains("sbatch") {
                match inner.submit_ids.pop() {
                    Some(id) => vec![format!("Submitted batch job {id}")],
                    None => vec!["sbatch: error: submission rejected".to_string()],
                }
            } else {
                Vec::new()
            };
            async move { Ok(CommandChannel::from_lines(lines)) }.boxed()
        }

        fn upload_file(&mut self, local_path: String) -> BoxFuture<'_, anyhow::Result<()>> {
            self.lock().uploaded.push(local_path);
            async { Ok(()) }.boxed()
        }

        fn ensure_directory(&mut self, remote_dir: String) -> BoxFuture<'_, anyhow::Result<bool>> {
            self.lock().dirs.push(remote_dir);
            async { Ok(true) }.boxed()
        }
    }
}

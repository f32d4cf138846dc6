//! Assembly and parsing of the Slurm commands issued through the remote
//! executor: `sbatch` submissions, `squeue` liveness queries and `scancel`.

use std::collections::BTreeSet;

use crate::JobId;

/// Default `--output` path passed to `sbatch` when the caller does not
/// provide one (`%j` expands to the job id on the Slurm side).
pub const DEFAULT_OUTPUT_PATH: &str = ".temp/slurm/out-%j";

/// Default task placement limit used when an `srun` submission does not
/// specify one.
pub const DEFAULT_TASKS_PER_NODE: u32 = 20;

/// Build the piped `sbatch` invocation for an inline shell command.
/// The command is wrapped into a generated `#!/bin/bash` script fed to
/// `sbatch` on stdin.
pub fn build_system_command(
    command: &str,
    partition: Option<&str>,
    nodes: u32,
    output: &str,
    job_name: &str,
) -> String {
    let mut cmd = format!(
        "echo -e '#!/bin/bash\\n{command}' | sbatch --nodes {nodes} --output {output} --job-name {job_name}"
    );
    if let Some(partition) = partition.filter(|p| !p.is_empty()) {
        cmd.push_str(&format!(" --partition {partition}"));
    }
    cmd
}

/// Build the `sbatch` invocation for an already uploaded script.
/// `--nodes` is only emitted for a positive node count so that the script
/// itself may declare it.
pub fn build_bash_command(
    script: &str,
    partition: Option<&str>,
    nodes: i32,
    output: &str,
    job_name: &str,
) -> String {
    let mut cmd = format!("sbatch --output {output} --job-name {job_name}");
    if let Some(partition) = partition.filter(|p| !p.is_empty()) {
        cmd.push_str(&format!(" --partition {partition}"));
    }
    if nodes > 0 {
        cmd.push_str(&format!(" --nodes {nodes}"));
    }
    cmd.push_str(&format!(" {script}"));
    cmd
}

/// Wrap a command into a parallel `srun` launch.
pub fn build_srun_command(command: &str, tasks: u32, tasks_per_node: u32) -> String {
    format!("srun --ntasks {tasks} --ntasks-per-node {tasks_per_node} --wait 1000000 {command}")
}

/// Number of nodes needed to place `tasks` tasks with at most
/// `tasks_per_node` of them per node.
pub fn srun_node_count(tasks: u32, tasks_per_node: u32) -> u32 {
    tasks.div_ceil(tasks_per_node)
}

pub fn squeue_command(user: &str) -> String {
    format!("squeue --noheader --user {user} --format %i")
}

pub fn scancel_user_command(user: &str) -> String {
    format!("scancel --user {user} --full")
}

pub fn scancel_name_command(job_name: &str) -> String {
    format!("scancel --name {job_name}")
}

/// Extract the job id from the first output line of `sbatch`.
/// Anything that does not look like `Submitted batch job <id>` with a
/// positive integer id is a submission failure, not a crash.
pub fn parse_submitted_job_id(line: &str) -> Option<JobId> {
    let line = line.trim();
    if !line.to_lowercase().starts_with("submitted batch job") {
        return None;
    }
    line.split_whitespace()
        .nth(3)
        .and_then(|id| id.parse::<JobId>().ok())
        .filter(|id| *id > 0)
}

/// Parse the output of the `squeue` liveness query into the set of live job
/// ids. A single unparsable line fails the whole query; a partial answer
/// must not be mistaken for a complete one.
pub fn parse_squeue_output<'a>(
    lines: impl IntoIterator<Item = &'a str>,
) -> anyhow::Result<BTreeSet<JobId>> {
    let mut ids = BTreeSet::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let id: JobId = line
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid squeue job id line {line:?}: {e}"))?;
        ids.insert(id);
    }
    Ok(ids)
}

//! An executor that runs the cluster commands directly on the current host,
//! for use when the client itself lives on a login node of the cluster.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::process::Command;

use super::{CommandChannel, RemoteExecutor};

pub struct LocalExecutor {
    workdir: PathBuf,
}

impl LocalExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl RemoteExecutor for LocalExecutor {
    fn ensure_connected(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        // There is no session to lose on the local host.
        async { Ok(()) }.boxed()
    }

    fn open_channel(&mut self, command: String) -> BoxFuture<'_, anyhow::Result<CommandChannel>> {
        let workdir = self.workdir.clone();
        async move {
            log::debug!("Running command `{command}`");
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .current_dir(&workdir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .with_context(|| format!("Cannot start command `{command}`"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow::anyhow!("Missing stdout of command `{command}`"))?;
            // The child is detached on purpose; the channel only observes
            // its output.
            Ok(CommandChannel::new(tokio::io::BufReader::new(stdout)))
        }
        .boxed()
    }

    fn upload_file(&mut self, local_path: String) -> BoxFuture<'_, anyhow::Result<()>> {
        let workdir = self.workdir.clone();
        async move {
            // Local and remote sides are the same filesystem; just verify
            // that the file is actually there.
            let path = workdir.join(&local_path);
            if !path.is_file() {
                anyhow::bail!("File {} does not exist", path.display());
            }
            Ok(())
        }
        .boxed()
    }

    fn ensure_directory(&mut self, remote_dir: String) -> BoxFuture<'_, anyhow::Result<bool>> {
        let workdir = self.workdir.clone();
        async move {
            let dir = workdir.join(&remote_dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Cannot create directory {}", dir.display()))?;
            Ok(true)
        }
        .boxed()
    }
}

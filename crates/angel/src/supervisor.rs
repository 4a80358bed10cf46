//! Core process supervision.
//!
//! Spawning registers a death observer. There is no restart policy: the
//! observer publishes the exit to every [`CoreProcess`] handle and then runs
//! the supervisor's exit hook, which in the binary terminates the angel.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("can't open core executable [{}] for reading: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn core process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Called once with a description of how the core exited.
pub type ExitHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProcessSupervisor {
    on_exit: Option<ExitHook>,
}

impl ProcessSupervisor {
    /// Observe deaths without acting on them beyond notifying handles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit the whole process with status 1 as soon as the core dies.
    pub fn exit_process_on_death() -> Self {
        Self::new().with_exit_hook(Arc::new(|status: &str| {
            tracing::error!(%status, "Core process died, exiting");
            std::process::exit(crate::error::EXIT_CORE_TERMINATED);
        }))
    }

    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.on_exit = Some(hook);
        self
    }

    /// Spawn `path` with `args` and start watching it.
    ///
    /// The path is opened for reading first so a missing or unreadable
    /// binary is reported as such rather than as a generic spawn failure.
    pub fn spawn<I, S>(&self, path: &Path, args: I) -> Result<CoreProcess, SpawnError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        std::fs::File::open(path).map_err(|source| SpawnError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        // stdout may be the client channel, so core output goes to stderr.
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()))
            .stderr(Stdio::inherit())
            .spawn()?;
        let pid = child.id();
        tracing::info!(path = %path.display(), ?pid, "Spawned core process");

        let (exit_tx, exit_rx) = watch::channel(None);
        let hook = self.on_exit.clone();
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {e}"),
            };
            tracing::warn!(?pid, %status, "Core process terminated");
            let _ = exit_tx.send(Some(status.clone()));
            if let Some(hook) = hook {
                hook(&status);
            }
        });

        Ok(CoreProcess {
            pid,
            exited: exit_rx,
        })
    }
}

/// Handle to a spawned core.
#[derive(Debug, Clone)]
pub struct CoreProcess {
    pid: Option<u32>,
    exited: watch::Receiver<Option<String>>,
}

impl CoreProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit description, if the core has already terminated.
    pub fn exit_status(&self) -> Option<String> {
        self.exited.borrow().clone()
    }

    /// Resolve once the core has terminated, with a description of how.
    pub async fn terminated(&mut self) -> String {
        loop {
            if let Some(status) = self.exited.borrow_and_update().clone() {
                return status;
            }
            if self.exited.changed().await.is_err() {
                return self
                    .exited
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| "death observer stopped".to_string());
            }
        }
    }
}

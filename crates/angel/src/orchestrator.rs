//! Orchestrator - runs the one-shot bootstrap handshake.
//!
//! Flow:
//! 1. Wait for the pre-configuration from the client
//! 2. Provision the core (spawn it, or use descriptors / a listening pipe)
//! 3. Send the whole configuration to the core, wait for its reply
//! 4. Relay the reply to the client verbatim
//! 5. Drop privileges if a user is configured
//! 6. Hand the core channel to oversight
//!
//! Any failure ends the handshake; there are no retries.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;

use crate::bridge::codec::MAX_FRAME_LEN;
use crate::bridge::interface::FramedInterface;
use crate::bridge::transport::{Endpoint, PipeListener};
use crate::config::{AdminConfig, CoreSource, PreConfig};
use crate::error::{AngelError, CLIENT_CHANNEL, CORE_CHANNEL};
use crate::pipe_name::generate_pipe_name;
use crate::privilege::{DropOutcome, OsPrivilegeDropper, PrivilegeDropper};
use crate::supervisor::{CoreProcess, ProcessSupervisor};

/// First argument of a spawned core; the pipe name follows it.
pub const CORE_ARG: &str = "core";

/// Handshake progress, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingClientConfig,
    CoreProvisioning,
    AwaitingCoreReply,
    RelayingToClient,
    PrivilegeDrop,
    HandedOff,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub pipe_dir: PathBuf,
    pub max_frame_len: usize,
    /// `None` waits on each peer indefinitely.
    pub handshake_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self {
            pipe_dir: std::env::temp_dir(),
            max_frame_len: MAX_FRAME_LEN,
            handshake_timeout: None,
        }
    }

    /// Defaults overridden by `ANGEL_PIPE_DIR` and `ANGEL_HANDSHAKE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();
        if let Some(dir) = lookup("ANGEL_PIPE_DIR").filter(|d| !d.is_empty()) {
            config = config.with_pipe_dir(dir);
        }
        if let Some(raw) = lookup("ANGEL_HANDSHAKE_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    config = config.with_handshake_timeout(Duration::from_secs(secs));
                }
                _ => tracing::warn!(value = %raw, "Ignoring invalid ANGEL_HANDSHAKE_TIMEOUT_SECS"),
            }
        }
        config
    }

    pub fn with_pipe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pipe_dir = dir.into();
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }
}

/// Everything oversight needs once the handshake is done.
pub struct Handoff {
    pub core: FramedInterface,
    /// Present when the angel spawned the core itself.
    pub process: Option<CoreProcess>,
    pub pipe_name: String,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    supervisor: ProcessSupervisor,
    dropper: Arc<dyn PrivilegeDropper>,
    state: HandshakeState,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            supervisor: ProcessSupervisor::new(),
            dropper: Arc::new(OsPrivilegeDropper),
            state: HandshakeState::AwaitingClientConfig,
        }
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_dropper(mut self, dropper: Arc<dyn PrivilegeDropper>) -> Self {
        self.dropper = dropper;
        self
    }

    /// Last state entered; after a failure, the step that failed.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the handshake over the client endpoint.
    pub async fn run(&mut self, client: Endpoint) -> Result<Handoff, AngelError> {
        let timeout = self.config.handshake_timeout;

        self.enter(HandshakeState::AwaitingClientConfig);
        let mut client = FramedInterface::new(CLIENT_CHANNEL, client, self.config.max_frame_len)
            .on_close(|| tracing::info!("Angel has started up in the background"));
        tracing::debug!("Getting pre-configuration from client");
        let raw = bounded(timeout, "client pre-configuration", client.wait_for_one()).await?;
        tracing::debug!(len = raw.len(), "Finished getting pre-configuration from client");
        let preconf = PreConfig::parse(&raw)?;

        self.enter(HandshakeState::CoreProvisioning);
        let pipe_name = resolve_pipe_name(preconf.admin());
        let (mut core, mut process) = self.provision(preconf.admin(), &pipe_name).await?;

        self.enter(HandshakeState::AwaitingCoreReply);
        let message = preconf.encode();
        tracing::debug!("Sending pre-configuration to core");
        tracing::trace!(len = message.len(), "Sent pre-configuration bytes to core");
        guarded(timeout, "core", process.as_mut(), core.send(message)).await?;
        let reply = guarded(timeout, "core reply", process.as_mut(), core.wait_for_one()).await?;

        self.enter(HandshakeState::RelayingToClient);
        tracing::trace!(len = reply.len(), "Relaying core reply to client");
        client.send(reply).await?;
        tokio::spawn(client.closed());

        self.enter(HandshakeState::PrivilegeDrop);
        if let Some(user) = &preconf.admin().user {
            self.drop_privileges(user)?;
        }

        self.enter(HandshakeState::HandedOff);
        drop(preconf);
        Ok(Handoff {
            core,
            process,
            pipe_name,
        })
    }

    fn enter(&mut self, state: HandshakeState) {
        tracing::trace!(from = ?self.state, to = ?state, "Handshake state");
        self.state = state;
    }

    async fn provision(
        &self,
        admin: &AdminConfig,
        pipe_name: &str,
    ) -> Result<(FramedInterface, Option<CoreProcess>), AngelError> {
        let max_frame_len = self.config.max_frame_len;
        let io = |source| AngelError::io(CORE_CHANNEL, source);

        match &admin.core {
            CoreSource::Descriptors { from_core, to_core } => {
                tracing::info!(from_core, to_core, "Using already running core on descriptors");
                let endpoint = Endpoint::from_fds(*from_core, *to_core).map_err(io)?;
                Ok((FramedInterface::new(CORE_CHANNEL, endpoint, max_frame_len), None))
            }
            CoreSource::ListeningPipe => {
                tracing::info!(pipe = pipe_name, "Connecting to already running core");
                let endpoint = Endpoint::connect_named(&self.config.pipe_dir, pipe_name)
                    .await
                    .map_err(io)?;
                Ok((FramedInterface::new(CORE_CHANNEL, endpoint, max_frame_len), None))
            }
            CoreSource::Binary(path) => {
                let listener = PipeListener::bind(&self.config.pipe_dir, pipe_name).map_err(io)?;
                tracing::info!(core = %path.display(), pipe = pipe_name, "Initializing core");
                let mut process = self.supervisor.spawn(path, [CORE_ARG, pipe_name])?;
                let endpoint = guarded(
                    self.config.handshake_timeout,
                    "core connection",
                    Some(&mut process),
                    async { listener.accept().await.map_err(io) },
                )
                .await?;
                Ok((
                    FramedInterface::new(CORE_CHANNEL, endpoint, max_frame_len),
                    Some(process),
                ))
            }
        }
    }

    fn drop_privileges(&self, user: &str) -> Result<(), AngelError> {
        match self.dropper.set_user(user) {
            DropOutcome::Success => Ok(()),
            DropOutcome::Permission => {
                tracing::warn!(user, "Not permitted to switch user, continuing as current user");
                Ok(())
            }
            DropOutcome::Failed(reason) => Err(AngelError::Privilege {
                user: user.to_string(),
                reason,
            }),
        }
    }
}

/// Supplied name if any, otherwise a fresh random one.
fn resolve_pipe_name(admin: &AdminConfig) -> String {
    match &admin.core_pipe_name {
        Some(name) => name.clone(),
        None => generate_pipe_name(&mut OsRng),
    }
}

async fn bounded<T>(
    timeout: Option<Duration>,
    what: &'static str,
    fut: impl Future<Output = Result<T, AngelError>>,
) -> Result<T, AngelError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| AngelError::Timeout(what))?,
        None => fut.await,
    }
}

/// Like [`bounded`], but fails as soon as the spawned core dies.
async fn guarded<T>(
    timeout: Option<Duration>,
    what: &'static str,
    process: Option<&mut CoreProcess>,
    fut: impl Future<Output = Result<T, AngelError>>,
) -> Result<T, AngelError> {
    let fut = bounded(timeout, what, fut);
    match process {
        Some(process) => tokio::select! {
            result = fut => result,
            status = process.terminated() => Err(AngelError::CoreTerminated(status)),
        },
        None => fut.await,
    }
}

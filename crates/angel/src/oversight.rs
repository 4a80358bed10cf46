//! What runs after the handshake.
//!
//! The orchestrator produces a [`Handoff`] and never runs again; an
//! [`Oversight`] implementation owns the core channel from then on.

use async_trait::async_trait;

use crate::error::AngelError;
use crate::orchestrator::Handoff;

#[async_trait]
pub trait Oversight: Send {
    /// Take over the core. Returns when oversight ends.
    async fn oversee(&mut self, handoff: Handoff) -> Result<(), AngelError>;
}

/// Keeps the core channel open and logs what the core sends until it goes away.
#[derive(Debug, Default)]
pub struct PassiveOversight {
    frames_seen: u64,
}

impl PassiveOversight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

#[async_trait]
impl Oversight for PassiveOversight {
    async fn oversee(&mut self, handoff: Handoff) -> Result<(), AngelError> {
        let Handoff {
            mut core,
            mut process,
            pipe_name,
        } = handoff;
        tracing::info!(pipe = %pipe_name, "Core handed off to oversight");

        loop {
            let frame = match process.as_mut() {
                Some(process) => tokio::select! {
                    frame = core.recv() => frame,
                    status = process.terminated() => {
                        return Err(AngelError::CoreTerminated(status));
                    }
                },
                None => core.recv().await,
            };
            match frame {
                Some(Ok(message)) => {
                    self.frames_seen += 1;
                    tracing::debug!(len = message.len(), "Frame from core");
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(AngelError::CoreTerminated(
                        "core channel closed".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use tokio::net::UnixStream;
    use tokio_util::bytes::Bytes;
    use tokio_util::codec::Framed;

    use crate::bridge::codec::{FrameCodec, MAX_FRAME_LEN};
    use crate::bridge::interface::FramedInterface;
    use crate::bridge::transport::Endpoint;
    use crate::error::CORE_CHANNEL;

    #[tokio::test]
    async fn drains_frames_until_core_goes_away() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let handoff = Handoff {
            core: FramedInterface::new(CORE_CHANNEL, Endpoint::from_stream(ours), MAX_FRAME_LEN),
            process: None,
            pipe_name: "test".to_string(),
        };

        let mut core = Framed::new(theirs, FrameCodec::new());
        core.send(Bytes::from_static(b"one")).await.unwrap();
        core.send(Bytes::from_static(b"two")).await.unwrap();
        drop(core);

        let mut oversight = PassiveOversight::new();
        let err = oversight.oversee(handoff).await.unwrap_err();

        assert!(matches!(err, AngelError::CoreTerminated(_)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(oversight.frames_seen(), 2);
    }
}

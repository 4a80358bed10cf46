//! Framed message interface over an [`Endpoint`].
//!
//! Owns the endpoint and its read buffer, so partially received frames never
//! cross from one interface into another. The close callback fires exactly
//! once, the first time the peer is seen to disconnect.

use futures::{SinkExt, StreamExt};
use tokio_util::bytes::Bytes;
use tokio_util::codec::Framed;

use crate::bridge::codec::{FrameCodec, is_frame_violation};
use crate::bridge::transport::Endpoint;
use crate::error::AngelError;

type CloseHook = Box<dyn FnOnce() + Send>;

pub struct FramedInterface {
    channel: &'static str,
    framed: Framed<Endpoint, FrameCodec>,
    on_close: Option<CloseHook>,
    closed: bool,
}

impl FramedInterface {
    pub fn new(channel: &'static str, endpoint: Endpoint, max_frame_len: usize) -> Self {
        Self {
            channel,
            framed: Framed::new(endpoint, FrameCodec::with_max_frame_len(max_frame_len)),
            on_close: None,
            closed: false,
        }
    }

    /// Register the disconnect callback.
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn channel(&self) -> &'static str {
        self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write one message and flush it.
    pub async fn send(&mut self, message: Bytes) -> Result<(), AngelError> {
        if self.closed {
            return Err(AngelError::Closed(self.channel));
        }
        tracing::trace!(channel = self.channel, len = message.len(), "Sending message");
        self.framed
            .send(message)
            .await
            .map_err(|e| self.classify(e))
    }

    /// Next complete message, or `None` once the peer has disconnected.
    pub async fn recv(&mut self) -> Option<Result<Bytes, AngelError>> {
        if self.closed {
            return None;
        }
        match self.framed.next().await {
            Some(Ok(message)) => Some(Ok(message)),
            Some(Err(e)) => Some(Err(self.classify(e))),
            None => {
                self.mark_closed();
                None
            }
        }
    }

    /// Drive I/O until exactly one message has been decoded.
    pub async fn wait_for_one(&mut self) -> Result<Bytes, AngelError> {
        if self.closed {
            return Err(AngelError::Closed(self.channel));
        }
        match self.recv().await {
            Some(result) => result,
            None => Err(AngelError::Disconnected(self.channel)),
        }
    }

    /// Discard anything the peer still sends until it disconnects.
    pub async fn closed(mut self) {
        while let Some(result) = self.recv().await {
            if let Err(e) = result {
                tracing::debug!(channel = self.channel, error = %e, "Channel failed while draining");
                self.mark_closed();
                break;
            }
        }
    }

    fn mark_closed(&mut self) {
        self.closed = true;
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }

    fn classify(&self, err: std::io::Error) -> AngelError {
        if is_frame_violation(&err) {
            AngelError::Framing {
                channel: self.channel,
                source: err,
            }
        } else {
            AngelError::io(self.channel, err)
        }
    }
}

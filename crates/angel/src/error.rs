//! Error taxonomy for the angel.
//!
//! Every handshake step returns `Result<_, AngelError>`; the binary has a
//! single handler that logs the error and exits with [`AngelError::exit_code`].

use std::io;

use crate::config::ConfigError;
use crate::supervisor::SpawnError;

pub const CLIENT_CHANNEL: &str = "client";
pub const CORE_CHANNEL: &str = "core";

pub const EXIT_CORE_TERMINATED: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_CONFIG: i32 = 3;
pub const EXIT_SPAWN: i32 = 4;
pub const EXIT_IO: i32 = 5;
pub const EXIT_PRIVILEGE: i32 = 6;

#[derive(Debug, thiserror::Error)]
pub enum AngelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("{channel} channel I/O failed: {source}")]
    Io {
        channel: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{channel} channel framing violation: {source}")]
    Framing {
        channel: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0} channel disconnected")]
    Disconnected(&'static str),

    #[error("{0} channel is already closed")]
    Closed(&'static str),

    #[error("setting user [{user}] returned unexpected result: {reason}")]
    Privilege { user: String, reason: String },

    #[error("core process terminated: {0}")]
    CoreTerminated(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl AngelError {
    pub fn io(channel: &'static str, source: io::Error) -> Self {
        Self::Io { channel, source }
    }

    /// Process exit status for this failure class.
    ///
    /// Losing the core channel counts as core termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CoreTerminated(_) => EXIT_CORE_TERMINATED,
            Self::Disconnected(channel) if *channel == CORE_CHANNEL => EXIT_CORE_TERMINATED,
            Self::Config(_) => EXIT_CONFIG,
            Self::Spawn(_) => EXIT_SPAWN,
            Self::Privilege { .. } => EXIT_PRIVILEGE,
            Self::Io { .. }
            | Self::Framing { .. }
            | Self::Disconnected(_)
            | Self::Closed(_)
            | Self::Timeout(_) => EXIT_IO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_loss_exits_with_one() {
        assert_eq!(AngelError::CoreTerminated("exit status: 0".into()).exit_code(), 1);
        assert_eq!(AngelError::Disconnected(CORE_CHANNEL).exit_code(), 1);
    }

    #[test]
    fn other_failures_exit_non_zero_and_distinct() {
        let codes = [
            AngelError::Config(ConfigError::NotADict).exit_code(),
            AngelError::Disconnected(CLIENT_CHANNEL).exit_code(),
            AngelError::Privilege {
                user: "nobody".into(),
                reason: "boom".into(),
            }
            .exit_code(),
        ];
        assert_eq!(codes, [EXIT_CONFIG, EXIT_IO, EXIT_PRIVILEGE]);
    }

    #[test]
    fn messages_name_the_channel() {
        let err = AngelError::io(
            CLIENT_CHANNEL,
            io::Error::new(io::ErrorKind::BrokenPipe, "gone"),
        );
        assert_eq!(err.to_string(), "client channel I/O failed: gone");
    }
}

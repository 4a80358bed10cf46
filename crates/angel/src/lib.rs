//! angel: bootstrap supervisor for a core process.
//!
//! Receives a pre-configuration from an admin client, provisions the core,
//! relays the core's answer back and then hands the core channel to oversight.

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod oversight;
pub mod pipe_name;
pub mod privilege;
pub mod supervisor;

pub use client::ClientChannel;
pub use config::{AdminConfig, ConfigError, CoreSource, PreConfig};
pub use error::AngelError;
pub use orchestrator::{Handoff, HandshakeState, Orchestrator, OrchestratorConfig};
pub use oversight::{Oversight, PassiveOversight};
pub use privilege::{DropOutcome, OsPrivilegeDropper, PrivilegeDropper};
pub use supervisor::{CoreProcess, ProcessSupervisor, SpawnError};

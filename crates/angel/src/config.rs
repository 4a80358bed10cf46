//! Admin pre-configuration received from the client.
//!
//! ```text
//! d5:admind4:bind15:127.0.0.1:123454:core30:./build/admin/angel/cjdns-core4:pass4:abcdee
//! ```
//!
//! `admin.core` is either the path of the core binary to spawn or a
//! `{fromCore, toCore}` descriptor pair for a core that is already running.
//! `admin.corePipeName` on its own names the pipe of a core already listening.

use std::fmt;
use std::os::fd::RawFd;
use std::path::PathBuf;

use tokio_util::bytes::Bytes;

use crate::bridge::bencode::{self, CodecError, Value};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed pre-configuration: {0}")]
    Decode(#[from] CodecError),

    #[error("pre-configuration is not a dictionary with an admin dictionary")]
    NotADict,

    #[error("missing configuration params in preconfig: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("admin.{field} must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("admin.corePipeName [{0}] must be a non-empty name without path separators")]
    BadPipeName(String),

    #[error("admin.core.{field} = {value} is not a valid descriptor")]
    BadDescriptor { field: &'static str, value: i64 },
}

/// How the core is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreSource {
    /// Spawn this binary and let it connect back over a fresh named pipe.
    Binary(PathBuf),
    /// The core is already running on these inherited descriptors.
    Descriptors { from_core: RawFd, to_core: RawFd },
    /// The core is already running and listening on `corePipeName`.
    ListeningPipe,
}

/// Fields of the `admin` dictionary the angel acts on.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminConfig {
    pub core: CoreSource,
    pub bind: String,
    pub pass: String,
    pub user: Option<String>,
    pub core_pipe_name: Option<String>,
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("core", &self.core)
            .field("bind", &self.bind)
            .field("pass", &"<redacted>")
            .field("user", &self.user)
            .field("core_pipe_name", &self.core_pipe_name)
            .finish()
    }
}

/// The full decoded tree plus the validated admin view of it.
///
/// The tree is kept whole because the core gets all of it, not just the
/// fields the angel understands.
#[derive(Clone)]
pub struct PreConfig {
    tree: Value,
    admin: AdminConfig,
}

impl fmt::Debug for PreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreConfig")
            .field("admin", &self.admin)
            .finish_non_exhaustive()
    }
}

impl PreConfig {
    pub fn parse(bytes: &[u8]) -> Result<Self, ConfigError> {
        let tree = bencode::decode(bytes)?;
        let admin = AdminConfig::from_tree(&tree)?;
        Ok(Self { tree, admin })
    }

    pub fn admin(&self) -> &AdminConfig {
        &self.admin
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Re-encode the entire tree for the core.
    pub fn encode(&self) -> Bytes {
        bencode::encode(&self.tree)
    }
}

impl AdminConfig {
    fn from_tree(tree: &Value) -> Result<Self, ConfigError> {
        let admin = tree.get("admin").ok_or(ConfigError::NotADict)?;
        if admin.as_dict().is_none() {
            return Err(ConfigError::NotADict);
        }

        let bind = optional_string(admin, "bind")?;
        let pass = optional_string(admin, "pass")?;
        let user = optional_string(admin, "user")?;
        let core_pipe_name = optional_string(admin, "corePipeName")?
            .map(checked_pipe_name)
            .transpose()?;
        let core = match admin.get("core") {
            None => None,
            Some(Value::Bytes(_)) => {
                optional_string(admin, "core")?.map(|path| CoreSource::Binary(path.into()))
            }
            Some(Value::Dict(_)) => Some(descriptors(admin)?),
            Some(_) => {
                return Err(ConfigError::WrongType {
                    field: "core",
                    expected: "a path or a {fromCore, toCore} dictionary",
                });
            }
        };
        let core = core.or_else(|| core_pipe_name.as_ref().map(|_| CoreSource::ListeningPipe));

        let mut missing = Vec::new();
        if bind.is_none() {
            missing.push("bind");
        }
        if pass.is_none() {
            missing.push("pass");
        }
        if core.is_none() {
            missing.push("core");
        }
        match (core, bind, pass) {
            (Some(core), Some(bind), Some(pass)) => Ok(Self {
                core,
                bind,
                pass,
                user,
                core_pipe_name,
            }),
            _ => Err(ConfigError::Missing(missing)),
        }
    }
}

fn optional_string(admin: &Value, field: &'static str) -> Result<Option<String>, ConfigError> {
    match admin.get(field) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or(ConfigError::WrongType {
                field,
                expected: "a UTF-8 string",
            }),
    }
}

/// Pipe names become a file name under the pipe directory.
fn checked_pipe_name(name: String) -> Result<String, ConfigError> {
    if name.is_empty() || name.contains(['/', '\0']) {
        return Err(ConfigError::BadPipeName(name));
    }
    Ok(name)
}

fn descriptors(admin: &Value) -> Result<CoreSource, ConfigError> {
    let fd = |field: &'static str| -> Result<RawFd, ConfigError> {
        let value = admin
            .get("core")
            .and_then(|core| core.get(field))
            .ok_or(ConfigError::Missing(vec![field]))?
            .as_int()
            .ok_or(ConfigError::WrongType {
                field,
                expected: "an integer descriptor",
            })?;
        RawFd::try_from(value)
            .ok()
            .filter(|fd| *fd >= 0)
            .ok_or(ConfigError::BadDescriptor { field, value })
    };
    Ok(CoreSource::Descriptors {
        from_core: fd("fromCore")?,
        to_core: fd("toCore")?,
    })
}

//! Choosing the client channel from the startup arguments.
//!
//! `angel <inFd> <outFd>` uses inherited descriptors, `angel <pipeName>`
//! connects to a named pipe the client created, and no arguments means
//! stdin/stdout.

use std::io;
use std::os::fd::RawFd;
use std::path::Path;

use crate::bridge::transport::Endpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientChannel {
    Descriptors { input: RawFd, output: RawFd },
    NamedPipe(String),
    Stdio,
}

impl ClientChannel {
    /// Select the channel from the arguments after the program name.
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        match args {
            [] => Ok(Self::Stdio),
            [flag, ..] if flag.starts_with('-') => Err(format!("unknown flag: {flag}")),
            [input, output] => match (parse_fd(input), parse_fd(output)) {
                (Some(input), Some(output)) => Ok(Self::Descriptors { input, output }),
                _ => Err(format!("expected two descriptor numbers, got [{input}] [{output}]")),
            },
            [name] if name.is_empty() => Err("pipe name must not be empty".to_string()),
            [name] => Ok(Self::NamedPipe(name.clone())),
            [_, _, extra, ..] => Err(format!("unexpected argument: {extra}")),
        }
    }

    pub async fn open(&self, pipe_dir: &Path) -> io::Result<Endpoint> {
        match self {
            Self::Descriptors { input, output } => Endpoint::from_fds(*input, *output),
            Self::NamedPipe(name) => Endpoint::connect_named(pipe_dir, name).await,
            Self::Stdio => Ok(Endpoint::stdio()),
        }
    }
}

fn parse_fd(arg: &str) -> Option<RawFd> {
    arg.parse::<RawFd>().ok().filter(|fd| *fd >= 0)
}

//! Byte-stream endpoints for the client and core channels.
//!
//! An [`Endpoint`] is one peer connection, built from:
//! - an inherited descriptor pair (`from_fds`)
//! - a named pipe, either created and accepted on ([`PipeListener`]) or connected to
//! - the process's own stdin/stdout
//!
//! Named pipes are Unix domain sockets at `{pipe_dir}/angel_pipe_{name}`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{UnixListener, UnixStream};

const PIPE_PREFIX: &str = "angel_pipe_";

/// Filesystem location of the named pipe called `name`.
pub fn pipe_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{PIPE_PREFIX}{name}"))
}

/// One peer connection. Owns its descriptors; dropping it closes them.
pub struct Endpoint {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    _pipe: Option<PipeFile>,
}

impl Endpoint {
    /// Take ownership of already-open descriptors handed to this process.
    ///
    /// `input` and `output` may be the same descriptor (a socket); it is
    /// duplicated so each half owns one.
    pub fn from_fds(input: RawFd, output: RawFd) -> io::Result<Self> {
        tracing::debug!(input, output, "Opening endpoint on inherited descriptors");
        let input_fd = claim_fd(input)?;
        let output_fd = if output == input {
            input_fd.try_clone()?
        } else {
            claim_fd(output)?
        };
        Ok(Self {
            reader: Box::new(FdStream::new(input_fd)?),
            writer: Box::new(FdStream::new(output_fd)?),
            _pipe: None,
        })
    }

    pub fn stdio() -> Self {
        tracing::debug!("Opening endpoint on stdin/stdout");
        Self {
            reader: Box::new(tokio::io::stdin()),
            writer: Box::new(tokio::io::stdout()),
            _pipe: None,
        }
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: Box::new(read_half),
            writer: Box::new(write_half),
            _pipe: None,
        }
    }

    /// Connect to a named pipe someone else created.
    pub async fn connect_named(dir: &Path, name: &str) -> io::Result<Self> {
        let path = pipe_path(dir, name);
        tracing::debug!(path = %path.display(), "Connecting to named pipe");
        let stream = UnixStream::connect(&path).await?;
        Ok(Self::from_stream(stream))
    }
}

impl AsyncRead for Endpoint {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for Endpoint {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

/// Named pipe created by this process, waiting for its single peer.
pub struct PipeListener {
    listener: UnixListener,
    file: PipeFile,
}

impl PipeListener {
    /// Bind `{dir}/angel_pipe_{name}`, replacing a stale socket file if present.
    pub fn bind(dir: &Path, name: &str) -> io::Result<Self> {
        let path = pipe_path(dir, name);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Removing stale pipe");
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        tracing::debug!(path = %path.display(), "Bound named pipe");
        Ok(Self {
            listener,
            file: PipeFile { path },
        })
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// Accept the one peer. The socket file lives as long as the endpoint.
    pub async fn accept(self) -> io::Result<Endpoint> {
        let (stream, _) = self.listener.accept().await?;
        tracing::trace!(path = %self.file.path.display(), "Peer connected");
        let mut endpoint = Endpoint::from_stream(stream);
        endpoint._pipe = Some(self.file);
        Ok(endpoint)
    }
}

/// Removes the socket file on drop.
struct PipeFile {
    path: PathBuf,
}

impl Drop for PipeFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pipe");
        }
    }
}

fn claim_fd(fd: RawFd) -> io::Result<OwnedFd> {
    if fd < 0 {
        return Err(Errno::EBADF.into());
    }
    // SAFETY: the borrow ends before ownership is taken below, and F_GETFD
    // only inspects the descriptor table entry.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    fcntl(borrowed, FcntlArg::F_GETFD)?;
    // SAFETY: the descriptor is open and was handed to this process to own;
    // nothing else in the process refers to it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Nonblocking stream over a raw pipe, socket or tty descriptor.
struct FdStream {
    inner: AsyncFd<File>,
}

impl FdStream {
    fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(&fd)?;
        Ok(Self {
            inner: AsyncFd::new(File::from(fd))?,
        })
    }
}

impl AsyncRead for FdStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for FdStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

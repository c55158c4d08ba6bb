//! Successor launch with listener hand-off.
//!
//! # Responsibilities
//! - Duplicate both listening descriptors for the successor
//! - Rebuild the argument vector so the successor starts warm
//! - Spawn the successor with the hand-off manifest in its environment
//!
//! # Design Decisions
//! - Spawn, not exec: the predecessor keeps running to drain its connections
//! - Descriptors are staged above fd 100 with close-on-exec, then `dup2`'d
//!   into slots 3.. in the child only; the parent's fd table is never touched
//! - The manifest is passed on the child's `Command`, never via `set_var`
//! - No readiness handshake: success means the successor was spawned
//!
//! # Data Flow
//! ```text
//! ListenerHandle[http, rpc]
//!     → ReloadSession (dup ≥ 100, args, uuid)
//!     → Command (envs, pre_exec dup2 → 3, 4)
//!     → Successor { pid }
//! ```

use std::ffi::{OsStr, OsString};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use uuid::Uuid;

use crate::net::handoff::{self, FIRST_INHERITED_FD};
use crate::net::listener::{ListenerHandle, Protocol};
use crate::observability::metrics;

/// Flag marking a warm start.
pub const GRACEFUL_FLAG: &str = "--graceful";

/// Error type for reload attempts.
///
/// None of these touch the running servers; the caller decides whether the
/// process keeps serving or exits.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("{protocol} listener cannot be handed off: {source}")]
    NotInheritable {
        protocol: Protocol,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot resolve successor environment: {0}")]
    Environment(#[source] std::io::Error),
    #[error("failed to spawn successor {}: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A successor that was spawned and now owns copies of both listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Successor {
    pub pid: u32,
}

/// Launches successors.
pub trait Reloader {
    /// Hand `listeners` to a new process. Returns once it has been spawned.
    fn reload(&self, listeners: &[ListenerHandle]) -> Result<Successor, ReloadError>;
}

impl<R: Reloader + ?Sized> Reloader for &R {
    fn reload(&self, listeners: &[ListenerHandle]) -> Result<Successor, ReloadError> {
        (**self).reload(listeners)
    }
}

/// Argument vector for the next generation.
///
/// Every existing graceful flag (`--graceful`, `-graceful`, `--graceful=…`)
/// is removed and exactly one `--graceful` appended, so repeated reloads
/// never accumulate flags.
pub fn successor_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut next: Vec<OsString> = args
        .into_iter()
        .map(Into::into)
        .filter(|arg| !is_graceful_flag(arg))
        .collect();
    next.push(OsString::from(GRACEFUL_FLAG));
    next
}

fn is_graceful_flag(arg: &OsStr) -> bool {
    match arg.to_str() {
        Some(arg) => {
            let name = arg.split('=').next().unwrap_or(arg);
            name == "--graceful" || name == "-graceful"
        }
        None => false,
    }
}

/// State of a single reload attempt.
///
/// The staged descriptors close when the session is dropped.
#[derive(Debug)]
pub struct ReloadSession {
    id: Uuid,
    descriptors: Vec<(Protocol, OwnedFd)>,
    args: Vec<OsString>,
}

impl ReloadSession {
    /// Stage inheritable copies of both listeners, in hand-off order.
    pub fn prepare(listeners: &[ListenerHandle], current_args: &[OsString]) -> Result<Self, ReloadError> {
        let mut descriptors = Vec::with_capacity(Protocol::HANDOFF_ORDER.len());

        for protocol in Protocol::HANDOFF_ORDER {
            let handle = listeners
                .iter()
                .find(|handle| handle.protocol() == protocol)
                .ok_or_else(|| ReloadError::NotInheritable {
                    protocol,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no listener handle supplied"),
                })?;
            let fd = handle
                .inheritable_fd()
                .map_err(|source| ReloadError::NotInheritable { protocol, source })?;
            descriptors.push((protocol, fd));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            descriptors,
            args: successor_args(current_args.iter().cloned()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn raw_fds(&self) -> Vec<RawFd> {
        self.descriptors.iter().map(|(_, fd)| fd.as_raw_fd()).collect()
    }
}

/// Spawns a copy of an executable (by default this one) as the successor.
#[derive(Debug, Clone)]
pub struct ReloadCoordinator {
    executable: Option<PathBuf>,
    args: Vec<OsString>,
}

impl ReloadCoordinator {
    /// Relaunch the running executable with this process's arguments.
    pub fn new() -> Self {
        Self {
            executable: None,
            args: std::env::args_os().skip(1).collect(),
        }
    }

    /// Launch a different executable instead of `current_exe()`.
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Replace the arguments the successor is derived from.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn executable(&self) -> Result<PathBuf, ReloadError> {
        match &self.executable {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(ReloadError::Environment),
        }
    }

    fn launch(&self, listeners: &[ListenerHandle]) -> Result<Successor, ReloadError> {
        let session = ReloadSession::prepare(listeners, &self.args)?;
        let executable = self.executable()?;
        let cwd = std::env::current_dir().map_err(ReloadError::Environment)?;

        tracing::info!(
            session = %session.id(),
            executable = %executable.display(),
            args = ?session.args(),
            "Launching successor"
        );

        let mut command = Command::new(&executable);
        command
            .args(session.args())
            .current_dir(&cwd)
            .envs(handoff::manifest_env())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let staged = session.raw_fds();
        // SAFETY: the hook runs between fork and exec and only calls dup2,
        // which is async-signal-safe. `staged` is allocated before fork.
        unsafe {
            command.pre_exec(move || {
                for (slot, fd) in staged.iter().enumerate() {
                    // dup2 leaves close-on-exec cleared on the target.
                    if libc::dup2(*fd, FIRST_INHERITED_FD + slot as RawFd) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        // The successor outlives this process and is never waited on.
        let successor = command
            .spawn()
            .map(|child| Successor { pid: child.id() })
            .map_err(|source| ReloadError::Spawn {
                executable: executable.clone(),
                source,
            })?;

        tracing::info!(
            session = %session.id(),
            successor_pid = successor.pid,
            "Successor spawned, listeners handed off"
        );
        Ok(successor)
    }
}

impl Default for ReloadCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Reloader for ReloadCoordinator {
    fn reload(&self, listeners: &[ListenerHandle]) -> Result<Successor, ReloadError> {
        let result = self.launch(listeners);
        match &result {
            Ok(_) => metrics::record_reload("spawned"),
            Err(e) => {
                tracing::error!(error = %e, "Reload failed");
                metrics::record_reload("failed");
            }
        }
        result
    }
}

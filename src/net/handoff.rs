//! Listener hand-off between a process and its successor.
//!
//! # Responsibilities
//! - Describe which inherited descriptor carries which protocol (the manifest)
//! - Validate the manifest and the descriptors at warm start
//! - Duplicate live listeners into descriptors a child can inherit
//!
//! # Wire Format
//! ```text
//! GRACEFUL_HANDOFF_VERSION=1
//! LISTEN_FDS=2
//! LISTEN_FD_NAMES=http:rpc
//! fd 3 → http listener, fd 4 → rpc listener
//! ```
//!
//! # Design Decisions
//! - Variables are set on the child's `Command`, never via `set_var`
//! - A warm start without variables falls back to the fixed slots 3 and 4
//! - A malformed manifest is fatal: a half-inherited state is a bug in the parent

use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use crate::net::listener::Protocol;

/// Manifest format understood by this build.
pub const HANDOFF_VERSION: &str = "1";

pub const HANDOFF_VERSION_ENV: &str = "GRACEFUL_HANDOFF_VERSION";
pub const LISTEN_FDS_ENV: &str = "LISTEN_FDS";
pub const LISTEN_FD_NAMES_ENV: &str = "LISTEN_FD_NAMES";

/// First descriptor after stdin, stdout and stderr.
pub const FIRST_INHERITED_FD: RawFd = 3;

/// Hand-off duplicates are placed at or above this number so they can never
/// collide with the target slots while being moved into place.
pub const HANDOFF_FD_FLOOR: RawFd = 100;

/// Error raised when the inherited descriptor set is unusable.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("unsupported hand-off version {found:?} (expected {})", HANDOFF_VERSION)]
    UnsupportedVersion { found: String },

    #[error("{} is {found:?}, expected {expected}", LISTEN_FDS_ENV)]
    CountMismatch { expected: usize, found: String },

    #[error("{} is {found:?}, expected {expected:?}", LISTEN_FD_NAMES_ENV)]
    RoleMismatch { expected: String, found: String },

    #[error("{missing} is missing while {present} is set")]
    Incomplete {
        missing: &'static str,
        present: &'static str,
    },

    #[error("inherited fd {fd} for {protocol} is not an open socket")]
    NotASocket { protocol: Protocol, fd: RawFd },
}

/// Environment variables describing the hand-off, in the order they are set.
pub fn manifest_env() -> Vec<(&'static str, String)> {
    vec![
        (HANDOFF_VERSION_ENV, HANDOFF_VERSION.to_string()),
        (LISTEN_FDS_ENV, Protocol::HANDOFF_ORDER.len().to_string()),
        (LISTEN_FD_NAMES_ENV, manifest_names()),
    ]
}

fn manifest_names() -> String {
    Protocol::HANDOFF_ORDER
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(":")
}

/// Check manifest variables against what this build expects.
///
/// Returns `Ok(false)` when none of the variables are present (legacy fixed
/// slots), `Ok(true)` when a complete, matching manifest is present.
pub fn validate_manifest(
    version: Option<&str>,
    count: Option<&str>,
    names: Option<&str>,
) -> Result<bool, HandoffError> {
    let (version, count, names) = match (version, count, names) {
        (None, None, None) => return Ok(false),
        (Some(v), Some(c), Some(n)) => (v, c, n),
        (v, c, n) => {
            let present = [
                (HANDOFF_VERSION_ENV, v.is_some()),
                (LISTEN_FDS_ENV, c.is_some()),
                (LISTEN_FD_NAMES_ENV, n.is_some()),
            ];
            let missing = present.iter().find(|(_, set)| !set).map(|(k, _)| *k);
            let found = present.iter().find(|(_, set)| *set).map(|(k, _)| *k);
            return Err(HandoffError::Incomplete {
                missing: missing.unwrap_or(HANDOFF_VERSION_ENV),
                present: found.unwrap_or(LISTEN_FDS_ENV),
            });
        }
    };

    if version != HANDOFF_VERSION {
        return Err(HandoffError::UnsupportedVersion {
            found: version.to_string(),
        });
    }

    let expected = Protocol::HANDOFF_ORDER.len();
    if count.trim().parse::<usize>().ok() != Some(expected) {
        return Err(HandoffError::CountMismatch {
            expected,
            found: count.to_string(),
        });
    }

    let expected_names = manifest_names();
    if names != expected_names {
        return Err(HandoffError::RoleMismatch {
            expected: expected_names,
            found: names.to_string(),
        });
    }

    Ok(true)
}

/// Descriptors inherited from a predecessor, tagged with their protocol.
#[derive(Debug)]
pub struct InheritedListeners {
    descriptors: Vec<(Protocol, OwnedFd)>,
}

impl InheritedListeners {
    /// Collect inherited listeners for this process.
    ///
    /// Returns `Ok(None)` on cold start. On warm start the manifest (if any)
    /// is validated and every slot must hold an open socket.
    pub fn from_env(warm: bool) -> Result<Option<Self>, HandoffError> {
        if !warm {
            return Ok(None);
        }

        let version = std::env::var(HANDOFF_VERSION_ENV).ok();
        let count = std::env::var(LISTEN_FDS_ENV).ok();
        let names = std::env::var(LISTEN_FD_NAMES_ENV).ok();
        let has_manifest = validate_manifest(version.as_deref(), count.as_deref(), names.as_deref())?;

        if !has_manifest {
            tracing::warn!("Warm start without hand-off manifest, assuming fixed slots http=3 rpc=4");
        }

        let mut descriptors = Vec::with_capacity(Protocol::HANDOFF_ORDER.len());
        for (i, protocol) in Protocol::HANDOFF_ORDER.iter().copied().enumerate() {
            let fd = FIRST_INHERITED_FD + i as RawFd;
            if !is_socket(fd) {
                return Err(HandoffError::NotASocket { protocol, fd });
            }
            // SAFETY: the predecessor placed this socket at `fd` for us and
            // nothing else in this process has claimed it; fstat confirmed
            // it is open.
            let owned = unsafe { OwnedFd::from_raw_fd(fd) };
            tracing::info!(fd, protocol = %protocol, "Inherited listener descriptor");
            descriptors.push((protocol, owned));
        }

        Ok(Some(Self { descriptors }))
    }

    /// Build from already-owned descriptors given in hand-off order.
    pub fn from_fds(fds: Vec<OwnedFd>) -> Result<Self, HandoffError> {
        let expected = Protocol::HANDOFF_ORDER.len();
        if fds.len() != expected {
            return Err(HandoffError::CountMismatch {
                expected,
                found: fds.len().to_string(),
            });
        }

        let mut descriptors = Vec::with_capacity(expected);
        for (protocol, fd) in Protocol::HANDOFF_ORDER.iter().copied().zip(fds) {
            if !is_socket(fd.as_raw_fd()) {
                return Err(HandoffError::NotASocket {
                    protocol,
                    fd: fd.as_raw_fd(),
                });
            }
            descriptors.push((protocol, fd));
        }

        Ok(Self { descriptors })
    }

    /// Remove and return the descriptor carrying `protocol`.
    pub fn take(&mut self, protocol: Protocol) -> Option<OwnedFd> {
        let pos = self.descriptors.iter().position(|(p, _)| *p == protocol)?;
        Some(self.descriptors.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Duplicate `fd` to a number at or above [`HANDOFF_FD_FLOOR`], close-on-exec set.
///
/// The successor receives the descriptor only through the pre-exec `dup2`
/// into its target slot, which clears close-on-exec on the copy.
pub fn dup_for_handoff(fd: BorrowedFd<'_>) -> std::io::Result<OwnedFd> {
    let dup = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, HANDOFF_FD_FLOOR) };
    if dup < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: fcntl just returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}

/// Whether `fd` refers to an open socket.
pub fn is_socket(fd: RawFd) -> bool {
    if fd < 0 {
        return false;
    }
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::fstat(fd, &mut stat) };
    if result != 0 {
        return false;
    }
    (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK
}

/// Whether `fd` is a stream socket in the listening state.
pub fn is_listening(fd: RawFd) -> bool {
    let mut accepting: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ACCEPTCONN,
            &mut accepting as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    result == 0 && accepting != 0
}

//! Listener acquisition for both protocols.
//!
//! # Responsibilities
//! - Bind fresh listeners on cold start
//! - Adopt inherited descriptors on warm start (fixed order: http, rpc)
//! - Hand out non-owning handles the reload path can duplicate
//!
//! # Design Decisions
//! - The serving task is the sole owner; dropping it closes the socket
//! - Handles observe the listener weakly and never keep it open
//! - Any acquisition failure is fatal: there is no partial-service mode

use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Weak};

use tokio::net::{TcpListener, TcpStream};

use crate::config::ListenerConfig;
use crate::net::handoff::{self, InheritedListeners};

/// Which protocol a listener serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Rpc,
}

impl Protocol {
    /// Order in which listeners are passed to a successor.
    pub const HANDOFF_ORDER: [Protocol; 2] = [Protocol::Http, Protocol::Rpc];

    /// Role tag used in the hand-off manifest, logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Rpc => "rpc",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for listener acquisition.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind {
        protocol: Protocol,
        address: String,
        source: std::io::Error,
    },
    /// An inherited descriptor could not be used as a listener.
    Descriptor {
        protocol: Protocol,
        fd: RawFd,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind {
                protocol,
                address,
                source,
            } => write!(f, "Failed to bind {} listener to {}: {}", protocol, address, source),
            ListenerError::Descriptor { protocol, fd, source } => {
                write!(f, "Inherited fd {} is not a usable {} listener: {}", fd, protocol, source)
            }
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind { source, .. } | ListenerError::Descriptor { source, .. } => Some(source),
        }
    }
}

/// A listening socket owned by the task serving `protocol`.
#[derive(Debug)]
pub struct Listener {
    protocol: Protocol,
    local_addr: SocketAddr,
    inner: Arc<TcpListener>,
}

impl Listener {
    /// Bind a fresh listener.
    pub async fn bind(protocol: Protocol, address: &str) -> Result<Self, ListenerError> {
        let bind_err = |source| ListenerError::Bind {
            protocol,
            address: address.to_string(),
            source,
        };

        let addr: SocketAddr = address
            .parse()
            .map_err(|e| bind_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::info!(protocol = %protocol, address = %local_addr, "Listener bound");

        Ok(Self {
            protocol,
            local_addr,
            inner: Arc::new(listener),
        })
    }

    /// Wrap a descriptor inherited from a predecessor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_inherited(protocol: Protocol, fd: OwnedFd) -> Result<Self, ListenerError> {
        let raw = fd.as_raw_fd();
        let descriptor_err = |source| ListenerError::Descriptor {
            protocol,
            fd: raw,
            source,
        };

        if !handoff::is_listening(raw) {
            return Err(descriptor_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "descriptor is not a listening stream socket",
            )));
        }

        let std_listener = std::net::TcpListener::from(fd);
        let listener = Self::from_std(protocol, std_listener).map_err(descriptor_err)?;

        tracing::info!(
            protocol = %protocol,
            fd = raw,
            address = %listener.local_addr,
            "Listener adopted from predecessor"
        );
        Ok(listener)
    }

    /// Wrap an already-bound std listener.
    pub fn from_std(protocol: Protocol, listener: std::net::TcpListener) -> std::io::Result<Self> {
        listener.set_nonblocking(true)?;
        // Fails with ENOTSOCK/EINVAL style errors if this is not a bound TCP socket.
        let local_addr = listener.local_addr()?;
        let inner = TcpListener::from_std(listener)?;

        Ok(Self {
            protocol,
            local_addr,
            inner: Arc::new(inner),
        })
    }

    /// Accept the next connection.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A non-owning handle to this listener.
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            protocol: self.protocol,
            local_addr: self.local_addr,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning view of a [`Listener`].
///
/// Reports whether the socket is still open in this process and can produce
/// an inheritable duplicate of it for a successor.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    protocol: Protocol,
    local_addr: SocketAddr,
    inner: Weak<TcpListener>,
}

impl ListenerHandle {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the owning task still holds the listener.
    pub fn is_open(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Duplicate the listening descriptor for hand-off.
    ///
    /// Fails with `NotConnected` once the listener has been closed.
    pub fn inheritable_fd(&self) -> std::io::Result<OwnedFd> {
        let listener = self.inner.upgrade().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("{} listener is already closed", self.protocol),
            )
        })?;
        handoff::dup_for_handoff(listener.as_fd())
    }
}

/// Addresses to bind on cold start.
#[derive(Debug, Clone)]
pub struct ListenerAddrs {
    pub http: String,
    pub rpc: String,
}

impl From<&ListenerConfig> for ListenerAddrs {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            http: config.http_address.clone(),
            rpc: config.rpc_address.clone(),
        }
    }
}

/// The two listeners this process serves.
#[derive(Debug)]
pub struct Listeners {
    pub http: Listener,
    pub rpc: Listener,
}

/// Obtain both listeners, by binding or by adopting inherited descriptors.
pub async fn acquire(
    addrs: &ListenerAddrs,
    inherited: Option<InheritedListeners>,
) -> Result<Listeners, ListenerError> {
    match inherited {
        None => {
            tracing::info!("Cold start, binding listeners");
            let http = Listener::bind(Protocol::Http, &addrs.http).await?;
            let rpc = Listener::bind(Protocol::Rpc, &addrs.rpc).await?;
            Ok(Listeners { http, rpc })
        }
        Some(mut inherited) => {
            tracing::info!(descriptors = inherited.len(), "Warm start, adopting inherited listeners");
            let http = adopt(&mut inherited, Protocol::Http)?;
            let rpc = adopt(&mut inherited, Protocol::Rpc)?;
            Ok(Listeners { http, rpc })
        }
    }
}

fn adopt(inherited: &mut InheritedListeners, protocol: Protocol) -> Result<Listener, ListenerError> {
    let position = Protocol::HANDOFF_ORDER
        .iter()
        .position(|p| *p == protocol)
        .unwrap_or_default();
    let fd = inherited.take(protocol).ok_or_else(|| ListenerError::Descriptor {
        protocol,
        fd: handoff::FIRST_INHERITED_FD + position as RawFd,
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "descriptor missing from hand-off"),
    })?;
    Listener::from_inherited(protocol, fd)
}

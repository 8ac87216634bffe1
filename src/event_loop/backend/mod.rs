//! Readiness-multiplexing backends.
//!
//! The event loop talks to the kernel only through the [`Reactor`] trait.
//! Exactly one implementation is compiled in, selected by target OS; there
//! is no runtime switching between backends.
//!
//! ```text
//!  EventLoop ──▶ Reactor (trait) ──▶ Backend (epoll on Linux)
//!                                     ├── readiness registration
//!                                     ├── periodic timers
//!                                     └── software wake sources
//! ```

use std::io;
use std::os::fd::{BorrowedFd, OwnedFd, RawFd};

use heapless::Vec;

use super::EventClass;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) use epoll::Epoll as Backend;

#[cfg(not(target_os = "linux"))]
compile_error!("woodpeckers only ships an epoll reactor backend (Linux)");

/// Maximum number of ready events retrieved per wait.  Excess readiness is
/// picked up by the next call.
pub const EVENTS_TO_PROCESS: usize = 5;

/// Fixed-capacity batch of readiness notifications from one wait.
pub(crate) type ReadyBatch = Vec<Readiness, EVENTS_TO_PROCESS>;

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Opaque value handed to the kernel with every registration.
///
/// Encodes the record's class in the upper 32 bits and its slot index in
/// the lower 32 bits.  Slot indices never move while a record is alive, so
/// a token stays valid even if the slot array grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token(pub u64);

impl Token {
    pub fn new(class: EventClass, index: usize) -> Self {
        Self(((class as u64) << 32) | (index as u64 & 0xFFFF_FFFF))
    }

    pub fn class(self) -> Option<EventClass> {
        EventClass::from_tag((self.0 >> 32) as u8)
    }

    pub fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }
}

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub token: Token,
    pub readable: bool,
    /// Remote hang-up, half-close, or error condition.
    pub hangup: bool,
}

// ---------------------------------------------------------------------------
// Reactor interface
// ---------------------------------------------------------------------------

/// The abstract readiness interface every backend implements.
pub(crate) trait Reactor: Sized {
    /// Allocate the kernel multiplexer handle.
    fn new() -> io::Result<Self>;

    /// Register `fd` for read readiness, tagged with `token`.
    fn register(&self, fd: RawFd, token: Token) -> io::Result<()>;

    /// Remove `fd` from the interest list.
    fn deregister(&self, fd: RawFd) -> io::Result<()>;

    /// Block for up to `timeout_ms` (forever if negative) and fill `ready`
    /// with at most [`EVENTS_TO_PROCESS`] notifications, in kernel order.
    fn wait(&self, ready: &mut ReadyBatch, timeout_ms: i64) -> io::Result<()>;

    /// Create a periodic timer source firing every `period_ms`.
    fn create_timer(period_ms: u32) -> io::Result<OwnedFd>;

    /// Clear a fired timer; returns the number of expirations since the
    /// last acknowledgement.
    fn acknowledge_timer(fd: BorrowedFd<'_>) -> io::Result<u64>;

    /// Create a software-triggerable wake source.
    fn create_wake() -> io::Result<OwnedFd>;

    /// Trigger a wake source.  Safe from any thread.
    fn signal_wake(fd: BorrowedFd<'_>) -> io::Result<()>;

    /// Clear a wake source; any number of signals since the last
    /// acknowledgement collapse into this one.
    fn acknowledge_wake(fd: BorrowedFd<'_>) -> io::Result<u64>;
}

/// A shareable wake source.  Cloned (through `Arc`) into cross-thread
/// handles so they can trigger it without touching the loop.
#[derive(Debug)]
pub struct WakeFd(OwnedFd);

impl WakeFd {
    pub(crate) fn new(fd: OwnedFd) -> Self {
        Self(fd)
    }

    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        use std::os::fd::AsFd;
        self.0.as_fd()
    }

    /// Trigger the wake source.
    pub fn signal(&self) -> io::Result<()> {
        Backend::signal_wake(self.fd())
    }
}

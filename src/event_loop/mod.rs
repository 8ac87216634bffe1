//! Single-threaded readiness reactor.
//!
//! Multiplexes periodic timers, software wake sources ("user events") and
//! TCP servers with their peers on the calling thread.
//!
//! ```text
//!  run_once(timeout)
//!    │
//!    ├── wait ──▶ up to EVENTS_TO_PROCESS readiness tokens (kernel order)
//!    │
//!    ├── dispatch each token ──▶ class handler ──▶ application callback
//!    │      (callbacks may add / remove records of any class, including
//!    │       the one being dispatched)
//!    │
//!    └── sweep every record flagged PendingDeactivation during this pass
//! ```
//!
//! Removal is two-phase.  `remove_*` deregisters and closes the OS handle
//! immediately and flags the record; the slot itself is only freed after
//! the whole batch has been dispatched, so a token still sitting in the
//! current batch never resolves to a recycled slot.
//!
//! Callbacks are plain `fn` pointers receiving the loop, the application
//! context `C` and the record id.  The context is lent to the loop for the
//! duration of [`EventLoop::run`] / [`EventLoop::run_once`].
//!
//! All mutation goes through `&mut self` and is therefore loop-thread only.
//! The cross-thread entry points are [`StopHandle`] and
//! [`UserEventHandle`].

mod backend;
mod server;
mod slots;

use core::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::sync::Arc;

use log::{debug, error, info, trace, warn};

use crate::error::EventLoopError;
use backend::{Backend, ReadyBatch, Readiness, Reactor, Token, WakeFd};
use slots::{PeerSource, ServerSource, SlotArray, TimerSource, WakeSource};

pub use backend::EVENTS_TO_PROCESS;
pub use server::{
    DidAcceptFn, DidReceiveDataFn, PeerDidDisconnectFn, ServerDescriptor, ShouldAcceptFn,
};
pub use slots::EVENTS_STEP;

/// Application-assigned identifier, unique per class among active records.
pub type EventId = u16;

/// Id of the loop's internal stop source.  Rejected by every caller-facing
/// operation.
pub const RESERVED_EVENT_ID: EventId = u16::MAX;

/// Size of the buffer peer data is read into before being handed to
/// `did_receive_data`.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

/// Called on every expiry of a timer.
pub type TimerFiredFn<C> = fn(&mut EventLoop<C>, &mut C, EventId);

/// Called once per dispatch pass in which a user event was triggered.
pub type UserEventFn<C> = fn(&mut EventLoop<C>, &mut C, EventId);

// ---------------------------------------------------------------------------
// Event classes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventClass {
    Timer = 1,
    UserEvent = 2,
    Server = 3,
    ServerPeer = 4,
}

impl EventClass {
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Timer),
            2 => Some(Self::UserEvent),
            3 => Some(Self::Server),
            4 => Some(Self::ServerPeer),
            _ => None,
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timer => "timer",
            Self::UserEvent => "user event",
            Self::Server => "server",
            Self::ServerPeer => "server peer",
        })
    }
}

// ---------------------------------------------------------------------------
// Cross-thread handles
// ---------------------------------------------------------------------------

/// Stops a running loop from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<WakeFd>);

impl StopHandle {
    pub fn stop(&self) {
        if let Err(e) = self.0.signal() {
            error!("EventLoop: failed to signal stop: {e}");
        }
    }
}

/// Triggers one user event from any thread.
///
/// Keeps working for as long as the user event stays registered; after
/// `remove_user_event` its triggers are never observed.
#[derive(Debug, Clone)]
pub struct UserEventHandle {
    id: EventId,
    wake: Arc<WakeFd>,
}

impl UserEventHandle {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn trigger(&self) {
        if let Err(e) = self.wake.signal() {
            error!("EventLoop: failed to trigger user event {}: {e}", self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

pub struct EventLoop<C> {
    reactor: Backend,
    timers: SlotArray<TimerSource<C>>,
    user_events: SlotArray<WakeSource<C>>,
    servers: SlotArray<ServerSource<C>>,
    peers: SlotArray<PeerSource<C>>,
    /// Internal stop source, also registered in `user_events` under
    /// [`RESERVED_EVENT_ID`].
    stop: Arc<WakeFd>,
    running: bool,
    next_peer_id: EventId,
    receive_buffer: Vec<u8>,
}

impl<C> EventLoop<C> {
    /// Allocate the multiplexer and register the internal stop source.
    pub fn new() -> io::Result<Self> {
        let reactor = Backend::new()?;
        let stop = Arc::new(WakeFd::new(Backend::create_wake()?));

        let mut user_events = SlotArray::new();
        let index = user_events.insert(
            RESERVED_EVENT_ID,
            WakeSource {
                wake: Some(Arc::clone(&stop)),
                callback: None,
            },
        );
        reactor.register(
            stop.fd().as_raw_fd(),
            Token::new(EventClass::UserEvent, index),
        )?;

        debug!("EventLoop: created");

        Ok(Self {
            reactor,
            timers: SlotArray::new(),
            user_events,
            servers: SlotArray::new(),
            peers: SlotArray::new(),
            stop,
            running: false,
            next_peer_id: 0,
            receive_buffer: vec![0; RECEIVE_BUFFER_SIZE],
        })
    }

    // -----------------------------------------------------------------------
    // Run control
    // -----------------------------------------------------------------------

    /// Dispatch until [`stop`](Self::stop) is observed.
    pub fn run(&mut self, ctx: &mut C) {
        info!("EventLoop: running");
        self.running = true;
        while self.running {
            self.run_once(-1, ctx);
        }
        info!("EventLoop: stopped");
    }

    /// Wait up to `timeout_ms` (forever if negative), dispatch one batch of
    /// at most [`EVENTS_TO_PROCESS`] ready events, then reclaim everything
    /// removed during the batch.  Returns the number of events retrieved.
    pub fn run_once(&mut self, timeout_ms: i64, ctx: &mut C) -> usize {
        let mut ready = ReadyBatch::new();
        if let Err(e) = self.reactor.wait(&mut ready, timeout_ms) {
            error!("EventLoop: wait failed: {e}");
            return 0;
        }

        for readiness in &ready {
            self.dispatch(*readiness, ctx);
        }

        self.reclaim();
        ready.len()
    }

    /// Ask a running loop to return after its current pass.
    pub fn stop(&self) {
        if let Err(e) = self.stop.signal() {
            error!("EventLoop: failed to signal stop: {e}");
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn dispatch(&mut self, readiness: Readiness, ctx: &mut C) {
        let Readiness {
            token,
            readable,
            hangup,
        } = readiness;
        trace!("EventLoop: token {:#x} readable={readable} hangup={hangup}", token.0);
        match token.class() {
            Some(EventClass::Timer) => self.timer_ready(token.index(), ctx),
            Some(EventClass::UserEvent) => self.user_event_ready(token.index(), ctx),
            Some(EventClass::Server) => self.server_ready(token.index(), ctx),
            Some(EventClass::ServerPeer) => self.peer_ready(token.index(), ctx),
            None => warn!("EventLoop: readiness with unknown token {:#x}", token.0),
        }
    }

    fn reclaim(&mut self) {
        let freed = self.timers.sweep()
            + self.user_events.sweep()
            + self.servers.sweep()
            + self.peers.sweep();
        if freed > 0 {
            trace!("EventLoop: reclaimed {freed} records");
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Arm a periodic timer firing every `period_ms` until removed.
    pub fn add_timer(
        &mut self,
        id: EventId,
        period_ms: u32,
        callback: Option<TimerFiredFn<C>>,
    ) -> Result<(), EventLoopError> {
        self.check_new_id(EventClass::Timer, id, self.timers.contains_active(id))?;

        let fd = Backend::create_timer(period_ms).map_err(|e| {
            error!("EventLoop: failed to create timer {id}: {e}");
            EventLoopError::Io(e)
        })?;
        let raw = fd.as_raw_fd();

        let index = self.timers.insert(
            id,
            TimerSource {
                fd: Some(fd),
                period_ms,
                callback,
            },
        );
        if let Err(e) = self.reactor.register(raw, Token::new(EventClass::Timer, index)) {
            error!("EventLoop: failed to register timer {id}: {e}");
            self.timers.vacate(index);
            return Err(EventLoopError::Io(e));
        }

        debug!("EventLoop: added timer {id} ({period_ms} ms)");
        Ok(())
    }

    pub fn remove_timer(&mut self, id: EventId) {
        if id == RESERVED_EVENT_ID {
            warn!("EventLoop: refusing to remove reserved timer id");
            return;
        }
        match self.timers.find_active(id) {
            Some(index) => {
                self.timers.deactivate(index, &self.reactor);
                debug!("EventLoop: removed timer {id}");
            }
            None => warn!("EventLoop: no timer {id} to remove"),
        }
    }

    pub fn has_timer(&self, id: EventId) -> bool {
        id != RESERVED_EVENT_ID && self.timers.contains_active(id)
    }

    /// Period of an active timer.
    pub fn timer_period(&self, id: EventId) -> Option<u32> {
        let index = self.timers.find_active(id)?;
        self.timers.active(index).map(|r| r.source.period_ms)
    }

    fn timer_ready(&mut self, index: usize, ctx: &mut C) {
        let Some(record) = self.timers.active(index) else {
            return;
        };
        let id = record.id;
        let callback = record.source.callback;

        if let Some(fd) = &record.source.fd {
            match Backend::acknowledge_timer(fd.as_fd()) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!("EventLoop: failed to read timer {id}: {e}");
                    return;
                }
            }
        }

        trace!("EventLoop: timer {id} fired");
        if let Some(callback) = callback {
            callback(self, ctx, id);
        }
    }

    // -----------------------------------------------------------------------
    // User events
    // -----------------------------------------------------------------------

    /// Register a software wake source.  Triggers arriving between two
    /// passes coalesce into a single callback.
    pub fn add_user_event(
        &mut self,
        id: EventId,
        callback: Option<UserEventFn<C>>,
    ) -> Result<(), EventLoopError> {
        self.check_new_id(
            EventClass::UserEvent,
            id,
            self.user_events.contains_active(id),
        )?;

        let wake = Backend::create_wake().map_err(|e| {
            error!("EventLoop: failed to create user event {id}: {e}");
            EventLoopError::Io(e)
        })?;
        let wake = Arc::new(WakeFd::new(wake));
        let raw = wake.fd().as_raw_fd();

        let index = self.user_events.insert(
            id,
            WakeSource {
                wake: Some(wake),
                callback,
            },
        );
        if let Err(e) = self
            .reactor
            .register(raw, Token::new(EventClass::UserEvent, index))
        {
            error!("EventLoop: failed to register user event {id}: {e}");
            self.user_events.vacate(index);
            return Err(EventLoopError::Io(e));
        }

        debug!("EventLoop: added user event {id}");
        Ok(())
    }

    pub fn remove_user_event(&mut self, id: EventId) {
        if id == RESERVED_EVENT_ID {
            warn!("EventLoop: refusing to remove reserved user event id");
            return;
        }
        match self.user_events.find_active(id) {
            Some(index) => {
                self.user_events.deactivate(index, &self.reactor);
                debug!("EventLoop: removed user event {id}");
            }
            None => warn!("EventLoop: no user event {id} to remove"),
        }
    }

    pub fn has_user_event(&self, id: EventId) -> bool {
        id != RESERVED_EVENT_ID && self.user_events.contains_active(id)
    }

    /// Signal a user event.  Callable from inside callbacks; other threads
    /// use a [`UserEventHandle`].
    pub fn trigger_user_event(&self, id: EventId) {
        match self.user_event_wake(id) {
            Some(wake) => {
                if let Err(e) = wake.signal() {
                    error!("EventLoop: failed to trigger user event {id}: {e}");
                }
            }
            None => warn!("EventLoop: no user event {id} to trigger"),
        }
    }

    /// A `Send + Sync` handle triggering user event `id`.
    pub fn user_event_handle(&self, id: EventId) -> Option<UserEventHandle> {
        self.user_event_wake(id).map(|wake| UserEventHandle {
            id,
            wake: Arc::clone(wake),
        })
    }

    fn user_event_wake(&self, id: EventId) -> Option<&Arc<WakeFd>> {
        if id == RESERVED_EVENT_ID {
            return None;
        }
        let index = self.user_events.find_active(id)?;
        self.user_events.active(index)?.source.wake.as_ref()
    }

    fn user_event_ready(&mut self, index: usize, ctx: &mut C) {
        let Some(record) = self.user_events.active(index) else {
            return;
        };
        let id = record.id;
        let callback = record.source.callback;

        if let Some(wake) = &record.source.wake {
            match Backend::acknowledge_wake(wake.fd()) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!("EventLoop: failed to read user event {id}: {e}");
                    return;
                }
            }
        }

        if id == RESERVED_EVENT_ID {
            debug!("EventLoop: stop requested");
            self.running = false;
            return;
        }

        trace!("EventLoop: user event {id} fired");
        if let Some(callback) = callback {
            callback(self, ctx, id);
        }
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Reject the reserved id and ids already active in `class`.
    fn check_new_id(
        &self,
        class: EventClass,
        id: EventId,
        already_active: bool,
    ) -> Result<(), EventLoopError> {
        if id == RESERVED_EVENT_ID {
            error!("EventLoop: {class} id {id} is reserved");
            return Err(EventLoopError::ReservedId);
        }
        if already_active {
            error!("EventLoop: {class} {id} already exists");
            return Err(EventLoopError::Conflict { class, id });
        }
        Ok(())
    }
}

impl<C> Drop for EventLoop<C> {
    fn drop(&mut self) {
        let released = self.peers.release_all(&self.reactor)
            + self.servers.release_all(&self.reactor)
            + self.timers.release_all(&self.reactor)
            + self.user_events.release_all(&self.reactor);
        debug!("EventLoop: destroyed, released {released} handles");
    }
}

//! Per-class slot arrays and the records they hold.
//!
//! A record is addressed by its index in the array.  That index is what the
//! kernel carries around inside a [`Token`](super::backend::Token), so it
//! must stay put for as long as the record can still be reported as ready:
//!
//! ```text
//!   Vacant ──insert──▶ Active ──deactivate──▶ PendingDeactivation ──sweep──▶ Vacant
//!                        │                         │
//!                        │ OS handle registered    │ OS handle already closed,
//!                        │                         │ slot still occupied
//! ```
//!
//! Slots are never compacted.  Growth appends [`EVENTS_STEP`] vacant slots;
//! existing indices are untouched, so tokens already handed to the kernel
//! stay valid across growth.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use log::warn;

use super::backend::{Backend, Reactor, WakeFd};
use super::server::ServerCallbacks;
use super::{EventId, TimerFiredFn, UserEventFn};

/// Number of slots appended each time an array runs out of vacant ones.
pub const EVENTS_STEP: usize = 5;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Active,
    PendingDeactivation,
}

pub(crate) struct EventRecord<T> {
    pub id: EventId,
    pub lifecycle: Lifecycle,
    pub source: T,
}

impl<T> EventRecord<T> {
    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }
}

/// Class-specific payload owning one OS handle.
pub(crate) trait Source {
    /// Descriptor currently registered with the reactor, if any.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Close the OS handle.  Called exactly once, right after deregistration.
    fn release(&mut self);
}

pub(crate) struct TimerSource<C> {
    pub fd: Option<OwnedFd>,
    pub period_ms: u32,
    pub callback: Option<TimerFiredFn<C>>,
}

pub(crate) struct WakeSource<C> {
    pub wake: Option<Arc<WakeFd>>,
    pub callback: Option<UserEventFn<C>>,
}

pub(crate) struct ServerSource<C> {
    pub listener: Option<TcpListener>,
    pub callbacks: ServerCallbacks<C>,
}

pub(crate) struct PeerSource<C> {
    pub stream: Option<TcpStream>,
    pub server_id: EventId,
    pub address: SocketAddr,
    pub callbacks: ServerCallbacks<C>,
}

impl<C> Source for TimerSource<C> {
    fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn release(&mut self) {
        self.fd = None;
    }
}

impl<C> Source for WakeSource<C> {
    fn raw_fd(&self) -> Option<RawFd> {
        self.wake.as_ref().map(|w| w.fd().as_raw_fd())
    }

    // Cross-thread handles may keep the eventfd itself alive; once
    // deregistered their triggers are simply never observed.
    fn release(&mut self) {
        self.wake = None;
    }
}

impl<C> Source for ServerSource<C> {
    fn raw_fd(&self) -> Option<RawFd> {
        self.listener.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn release(&mut self) {
        self.listener = None;
    }
}

impl<C> Source for PeerSource<C> {
    fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Already-reset peers make this fail; nothing left to do then.
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

// ---------------------------------------------------------------------------
// Slot array
// ---------------------------------------------------------------------------

pub(crate) struct SlotArray<T> {
    slots: Vec<Option<EventRecord<T>>>,
    /// Occupied slots (active or pending).
    count: usize,
}

impl<T: Source> SlotArray<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.count
    }

    /// Index of the active record carrying `id`.  Pending records are
    /// invisible here so an id can be re-added before the sweep.
    pub fn find_active(&self, id: EventId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|record| record.is_active() && record.id == id)
        })
    }

    pub fn contains_active(&self, id: EventId) -> bool {
        self.find_active(id).is_some()
    }

    /// Store a new active record and return its index.
    pub fn insert(&mut self, id: EventId, source: T) -> usize {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                let index = self.slots.len();
                self.slots.resize_with(index + EVENTS_STEP, || None);
                index
            }
        };

        self.slots[index] = Some(EventRecord {
            id,
            lifecycle: Lifecycle::Active,
            source,
        });
        self.count += 1;
        index
    }

    /// Drop a record that never reached the reactor (registration failed).
    pub fn vacate(&mut self, index: usize) -> Option<T> {
        let record = self.slots.get_mut(index)?.take()?;
        self.count -= 1;
        Some(record.source)
    }

    /// The record at `index` if it is still active.
    pub fn active(&self, index: usize) -> Option<&EventRecord<T>> {
        self.slots
            .get(index)?
            .as_ref()
            .filter(|record| record.is_active())
    }

    pub fn active_mut(&mut self, index: usize) -> Option<&mut EventRecord<T>> {
        self.slots
            .get_mut(index)?
            .as_mut()
            .filter(|record| record.is_active())
    }

    /// Indices of every active record matching `pred`.
    pub fn active_indices(&self, mut pred: impl FnMut(&EventRecord<T>) -> bool) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .filter(|record| record.is_active() && pred(*record))
                    .map(|_| index)
            })
            .collect()
    }

    /// Phase one of reclamation: pull the OS handle out of the reactor,
    /// close it, and flag the record.  The slot stays occupied until
    /// [`sweep`](Self::sweep).
    pub fn deactivate(&mut self, index: usize, reactor: &Backend) -> Option<EventId> {
        let record = self.active_mut(index)?;

        if let Some(fd) = record.source.raw_fd() {
            if let Err(e) = reactor.deregister(fd) {
                warn!("EventLoop: failed to deregister fd {fd}: {e}");
            }
        }
        record.source.release();
        record.lifecycle = Lifecycle::PendingDeactivation;
        Some(record.id)
    }

    /// Phase two: free every flagged slot.  Returns how many were freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for slot in &mut self.slots {
            if slot
                .as_ref()
                .is_some_and(|record| record.lifecycle == Lifecycle::PendingDeactivation)
            {
                *slot = None;
                freed += 1;
            }
        }
        self.count -= freed;
        freed
    }

    /// Deactivate and free everything, for teardown.
    pub fn release_all(&mut self, reactor: &Backend) -> usize {
        let mut released = 0;
        for index in 0..self.slots.len() {
            if self.deactivate(index, reactor).is_some() {
                released += 1;
            }
        }
        self.sweep();
        released
    }
}

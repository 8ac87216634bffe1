//! Woodpecker decoy sequencer library.
//!
//! Exposes the reactor, the sequencer and their collaborators for the
//! binary and for integration testing.
//!
//! ```text
//!  Configuration ──apply──▶ Controller ──set_value──▶ Output (memory / file / pin)
//!                              ▲
//!                  timer callbacks
//!                              │
//!  admin TCP peer ──▶ EventLoop (epoll: timers, user events, servers, peers)
//! ```

#![deny(unused_must_use)]

pub mod admin;
pub mod config;
pub mod controller;
pub mod error;
pub mod event_loop;
pub mod logging;
pub mod output;

pub use controller::{Controller, ControllerLoop, StateId};
pub use error::{Error, Result};
pub use event_loop::{EventId, EventLoop};

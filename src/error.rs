//! Unified error types for the woodpecker sequencer.
//!
//! A single `Error` enum that every subsystem can convert into, keeping
//! startup error handling uniform.  Nothing here crosses the EventLoop /
//! Controller boundary at run time: once the loop is running, failures are
//! logged where they happen and never propagated.

use core::fmt;
use std::io;

use crate::event_loop::{EventClass, EventId};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible startup operation funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// Controller topology was rejected (duplicate name, dangling reference).
    Setup(SetupError),
    /// An output backend failed.
    Output(OutputError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// The event loop could not acquire an OS resource.
    EventLoop(EventLoopError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(e) => write!(f, "setup: {e}"),
            Self::Output(e) => write!(f, "output: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::EventLoop(e) => write!(f, "event loop: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Setup(e) => Some(e),
            Self::Output(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::EventLoop(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Setup errors
// ---------------------------------------------------------------------------

/// Fail-fast validation errors raised while building the Controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    /// An output with this name already exists.
    DuplicateOutput(String),
    /// A bird with this name already exists.
    DuplicateBird(String),
    /// A bird references an output that was never added.
    UnknownOutput { bird: String, output: String },
    /// An output's backend refused to set up.
    OutputSetUpFailed(String),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateOutput(name) => write!(f, "output '{name}' already exists"),
            Self::DuplicateBird(name) => write!(f, "bird '{name}' already exists"),
            Self::UnknownOutput { bird, output } => {
                write!(f, "bird '{bird}' references unknown output '{output}'")
            }
            Self::OutputSetUpFailed(name) => write!(f, "output '{name}' failed to set up"),
        }
    }
}

impl std::error::Error for SetupError {}

impl From<SetupError> for Error {
    fn from(e: SetupError) -> Self {
        Self::Setup(e)
    }
}

// ---------------------------------------------------------------------------
// Output errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum OutputError {
    /// The backing file could not be opened, read, or written.
    Io(io::Error),
    /// The backend has no implementation on this target.
    Unsupported(&'static str),
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Unsupported(_) => None,
        }
    }
}

impl From<io::Error> for OutputError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<OutputError> for Error {
    fn from(e: OutputError) -> Self {
        Self::Output(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    Io(io::Error),
    /// The document is not valid YAML or has unknown / mistyped keys.
    Parse(serde_yaml::Error),
    /// A field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Parse(e) => write!(f, "parse error: {e}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::ValidationFailed(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Event loop errors
// ---------------------------------------------------------------------------

/// Why an `add_*` call on the event loop was rejected.
#[derive(Debug)]
pub enum EventLoopError {
    /// An active record of the same class already uses this id.
    Conflict { class: EventClass, id: EventId },
    /// The id is the loop's internal stop sentinel.
    ReservedId,
    /// An OS call (socket, bind, listen, timer, wake, register) failed.
    Io(io::Error),
}

impl fmt::Display for EventLoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { class, id } => write!(f, "{class} {id} already exists"),
            Self::ReservedId => write!(f, "id {} is reserved", crate::event_loop::RESERVED_EVENT_ID),
            Self::Io(e) => write!(f, "OS error: {e}"),
        }
    }
}

impl std::error::Error for EventLoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EventLoopError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<EventLoopError> for Error {
    fn from(e: EventLoopError) -> Self {
        Self::EventLoop(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

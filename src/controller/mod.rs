//! Peck sequencer.
//!
//! A four-state machine driven entirely by event loop timers:
//!
//! ```text
//!  INITIAL ──▶ STARTUP ──[all outputs swept]──▶ WAITING ◀──────────┐
//!  (outputs     (pulse each output                │                 │
//!   forced low)  once, in order)            [dwell elapsed]  [pecks done]
//!                                                 ▼                 │
//!                                              PECKING ─────────────┘
//! ```
//!
//! Every state except Initial owns exactly one timer.  A transition runs
//! the old state's `on_exit` (cancel its timer) and then the new state's
//! `on_enter` (arm the next one); the stored state only changes after both
//! have run.  The Controller is the event loop's context, so timer
//! callbacks receive it directly.
//!
//! Topology (outputs and birds) is built and validated before the loop
//! runs.  Once running, nothing here can fail: the only effect of the
//! sequencer is `set_value` on its outputs.

mod bird;
mod random;
pub mod states;

pub use bird::Bird;
pub use random::random_in_range;

use core::fmt;
use std::path::PathBuf;

use log::{error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::admin::AdminSessions;
use crate::error::SetupError;
use crate::event_loop::{EventId, EventLoop};
use crate::output::{FileOutput, GpioOutput, MemoryOutput, Output};

/// The event loop flavour the Controller runs on.
pub type ControllerLoop = EventLoop<Controller>;

pub const DEFAULT_MIN_WAIT: u32 = 1000;
pub const DEFAULT_MAX_WAIT: u32 = 5000;
pub const DEFAULT_MIN_PECKS: u32 = 2;
pub const DEFAULT_MAX_PECKS: u32 = 4;
pub const DEFAULT_PECK_WAIT: u32 = 500;

/// Interval between pulses of the startup sweep.
pub const STARTUP_WAIT_MS: u32 = 250;

/// Timer ids, one per timed state.
pub const STARTUP_TIMER: EventId = 1;
pub const WAITING_TIMER: EventId = 2;
pub const PECKING_TIMER: EventId = 3;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Initial = 0,
    Startup = 1,
    Waiting = 2,
    Pecking = 3,
}

impl StateId {
    pub const COUNT: usize = 4;

    pub fn name(self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Startup => "Startup",
            Self::Waiting => "Waiting",
            Self::Pecking => "Pecking",
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature for `on_enter` / `on_exit` actions.
pub type StateActionFn = fn(&mut Controller, &mut ControllerLoop);

/// One row of the state table.
pub struct StateDescriptor {
    pub id: StateId,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Sequencer timing, all in milliseconds except the peck counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub min_wait: u32,
    pub max_wait: u32,
    pub min_pecks: u32,
    pub max_pecks: u32,
    pub peck_wait: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            min_wait: DEFAULT_MIN_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
            min_pecks: DEFAULT_MIN_PECKS,
            max_pecks: DEFAULT_MAX_PECKS,
            peck_wait: DEFAULT_PECK_WAIT,
        }
    }
}

/// Progress of the startup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Sweep {
    pub index: usize,
    pub pulse: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller {
    table: [StateDescriptor; StateId::COUNT],
    state: StateId,
    timing: Timing,
    outputs: Vec<Box<dyn Output>>,
    birds: Vec<Bird>,

    // Per-state scratch
    sweep: Sweep,
    current_bird: usize,
    pecks_remaining: u32,
    peck_polarity: bool,

    rng: StdRng,

    /// Partial lines from admin peers, when the admin channel is installed.
    pub(crate) admin_sessions: AdminSessions,
}

impl Controller {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic dwell and peck counts, for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            table: states::build_state_table(),
            state: StateId::Initial,
            timing: Timing::default(),
            outputs: Vec::new(),
            birds: Vec::new(),
            sweep: Sweep::default(),
            current_bird: 0,
            pecks_remaining: 0,
            peck_polarity: false,
            rng,
            admin_sessions: AdminSessions::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    pub fn set_min_wait(&mut self, value: u32) {
        self.timing.min_wait = value;
    }

    pub fn set_max_wait(&mut self, value: u32) {
        self.timing.max_wait = value;
    }

    pub fn set_min_pecks(&mut self, value: u32) {
        self.timing.min_pecks = value;
    }

    pub fn set_max_pecks(&mut self, value: u32) {
        self.timing.max_pecks = value;
    }

    pub fn set_peck_wait(&mut self, value: u32) {
        self.timing.peck_wait = value;
    }

    // -----------------------------------------------------------------------
    // Topology
    // -----------------------------------------------------------------------

    /// Add an output.  Names are unique across the whole Controller.
    pub fn add_output(&mut self, output: Box<dyn Output>) -> Result<(), SetupError> {
        if self.output_index(output.name()).is_some() {
            error!("Controller: output '{}' already exists", output.name());
            return Err(SetupError::DuplicateOutput(output.name().to_owned()));
        }
        info!("Controller: added output '{}'", output.name());
        self.outputs.push(output);
        Ok(())
    }

    pub fn add_memory_output(&mut self, name: &str) -> Result<(), SetupError> {
        self.add_output(Box::new(MemoryOutput::new(name)))
    }

    pub fn add_file_output(&mut self, name: &str, path: impl Into<PathBuf>) -> Result<(), SetupError> {
        self.add_output(Box::new(FileOutput::new(name, path)))
    }

    pub fn add_gpio_output(&mut self, name: &str, pin: u32) -> Result<(), SetupError> {
        self.add_output(Box::new(GpioOutput::new(name, pin)))
    }

    /// Add a bird whose roles reference existing outputs by name.  Nothing
    /// is added if the name is taken or any reference is unknown.
    pub fn add_bird(
        &mut self,
        name: &str,
        statics: &[&str],
        backs: &[&str],
        forwards: &[&str],
    ) -> Result<(), SetupError> {
        if self.birds.iter().any(|b| b.name() == name) {
            error!("Controller: bird '{name}' already exists");
            return Err(SetupError::DuplicateBird(name.to_owned()));
        }

        let statics = self.resolve(name, statics)?;
        let backs = self.resolve(name, backs)?;
        let forwards = self.resolve(name, forwards)?;

        info!(
            "Controller: added bird '{name}' ({} static, {} back, {} forward)",
            statics.len(),
            backs.len(),
            forwards.len()
        );
        self.birds
            .push(Bird::new(name.to_owned(), statics, backs, forwards));
        Ok(())
    }

    fn resolve(&self, bird: &str, names: &[&str]) -> Result<Vec<usize>, SetupError> {
        names
            .iter()
            .map(|&output| {
                self.output_index(output).ok_or_else(|| {
                    error!("Controller: bird '{bird}' references unknown output '{output}'");
                    SetupError::UnknownOutput {
                        bird: bird.to_owned(),
                        output: output.to_owned(),
                    }
                })
            })
            .collect()
    }

    fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.name() == name)
    }

    /// Set up every output in order, stopping at the first failure.
    pub fn set_up(&mut self) -> Result<(), SetupError> {
        for output in &mut self.outputs {
            if let Err(e) = output.set_up() {
                error!("Controller: output '{}' failed to set up: {e}", output.name());
                return Err(SetupError::OutputSetUpFailed(output.name().to_owned()));
            }
        }
        info!("Controller: {} outputs set up", self.outputs.len());
        Ok(())
    }

    pub fn tear_down(&mut self) {
        for output in &mut self.outputs {
            output.tear_down();
        }
        info!("Controller: outputs torn down");
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Enter Initial, then move on to Startup.  The first timer fires once
    /// the loop runs.
    pub fn start(&mut self, event_loop: &mut ControllerLoop) {
        info!("Controller: starting in state {}", self.state);
        self.state = StateId::Initial;
        if let Some(enter) = self.table[StateId::Initial as usize].on_enter {
            enter(self, event_loop);
        }
        self.change_state(event_loop, StateId::Startup);
    }

    /// Start the sequence and block until the loop is stopped.
    pub fn run(&mut self, event_loop: &mut ControllerLoop) {
        self.start(event_loop);
        event_loop.run(self);
    }

    pub(crate) fn change_state(&mut self, event_loop: &mut ControllerLoop, next: StateId) {
        info!("Controller: changing state from {} to {}", self.state, next);

        if let Some(exit) = self.table[self.state as usize].on_exit {
            exit(self, event_loop);
        }
        if let Some(enter) = self.table[next as usize].on_enter {
            enter(self, event_loop);
        }

        self.state = next;
    }

    pub(crate) fn set_output(&mut self, index: usize, value: bool) {
        if let Some(output) = self.outputs.get_mut(index) {
            output.set_value(value);
        }
    }

    pub(crate) fn set_all_outputs(&mut self, value: bool) {
        for output in &mut self.outputs {
            output.set_value(value);
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn output(&self, name: &str) -> Option<&dyn Output> {
        self.outputs
            .iter()
            .find(|o| o.name() == name)
            .map(|o| &**o)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &dyn Output> {
        self.outputs.iter().map(|o| &**o)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn bird(&self, name: &str) -> Option<&Bird> {
        self.birds.iter().find(|b| b.name() == name)
    }

    pub fn bird_count(&self) -> usize {
        self.birds.len()
    }

    /// Index of the bird that pecks next (or is pecking now).
    pub fn current_bird(&self) -> usize {
        self.current_bird
    }

    pub fn pecks_remaining(&self) -> u32 {
        self.pecks_remaining
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("timing", &self.timing)
            .field("outputs", &self.outputs.len())
            .field("birds", &self.birds.len())
            .field("current_bird", &self.current_bird)
            .field("pecks_remaining", &self.pecks_remaining)
            .finish_non_exhaustive()
    }
}

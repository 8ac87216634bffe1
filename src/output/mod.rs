//! Boolean output sinks driven by the Controller.
//!
//! ```text
//!   Controller ──▶ Output (trait) ──▶ MemoryOutput   (in-process cell)
//!                                  ├─▶ FileOutput     ('0' / '1' byte at offset 0)
//!                                  ├─▶ GpioOutput     (unimplemented pin stub)
//!                                  └─▶ PinOutput<P>   (any embedded-hal output pin)
//! ```
//!
//! The Controller never touches a device directly; every behavioural
//! effect of the sequencer is a `set_value` through this trait.

mod file;
mod gpio;
mod memory;

pub use file::FileOutput;
pub use gpio::{GpioOutput, PinOutput};
pub use memory::MemoryOutput;

use crate::error::OutputError;

/// A named boolean sink.
pub trait Output {
    fn name(&self) -> &str;

    /// Acquire the backing resource.  Called once before the loop runs.
    fn set_up(&mut self) -> Result<(), OutputError>;

    /// Release the backing resource.  Safe to call when never set up.
    fn tear_down(&mut self);

    /// Last value written, as the backend reports it.
    fn value(&self) -> bool;

    /// Write a new value.  Failures are logged, never returned: the
    /// sequencer has nowhere to propagate them once running.
    fn set_value(&mut self, value: bool);
}

impl core::fmt::Debug for dyn Output {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Output")
            .field("name", &self.name())
            .field("value", &self.value())
            .finish()
    }
}

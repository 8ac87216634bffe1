//! In-process boolean cell.  Used for dry runs and tests.

use log::trace;

use super::Output;
use crate::error::OutputError;

#[derive(Debug, Clone)]
pub struct MemoryOutput {
    name: String,
    value: bool,
}

impl MemoryOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: false,
        }
    }
}

impl Output for MemoryOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_up(&mut self) -> Result<(), OutputError> {
        self.value = false;
        Ok(())
    }

    fn tear_down(&mut self) {}

    fn value(&self) -> bool {
        self.value
    }

    fn set_value(&mut self, value: bool) {
        trace!("Output {}: {}", self.name, value);
        self.value = value;
    }
}

//! Recording output for integration tests.
//!
//! Every write lands in a shared journal so tests can assert on the full
//! write history after the output has been boxed into a Controller.

use std::cell::RefCell;
use std::rc::Rc;

use woodpeckers::error::OutputError;
use woodpeckers::output::Output;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub output: String,
    pub value: bool,
}

pub type Journal = Rc<RefCell<Vec<Write>>>;

pub struct RecordingOutput {
    name: String,
    value: bool,
    journal: Journal,
}

impl RecordingOutput {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_owned(),
            value: false,
            journal: Rc::clone(journal),
        }
    }
}

impl Output for RecordingOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_up(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn tear_down(&mut self) {}

    fn value(&self) -> bool {
        self.value
    }

    fn set_value(&mut self, value: bool) {
        self.value = value;
        self.journal.borrow_mut().push(Write {
            output: self.name.clone(),
            value,
        });
    }
}

pub fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

/// Values written to `output`, in order, from journal position `from`.
pub fn writes_to(journal: &Journal, output: &str, from: usize) -> Vec<bool> {
    journal.borrow()[from..]
        .iter()
        .filter(|w| w.output == output)
        .map(|w| w.value)
        .collect()
}

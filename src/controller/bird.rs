//! Birds: named groups of outputs split by role.
//!
//! - **static**: held high while at rest (body, perch lights).
//! - **back**: high at rest, low while the beak is forward.
//! - **forward**: low at rest, high on each peck.
//!
//! Outputs are referenced by their index in the Controller's output list,
//! resolved from names once when the bird is added.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bird {
    name: String,
    statics: Vec<usize>,
    backs: Vec<usize>,
    forwards: Vec<usize>,
}

impl Bird {
    pub(crate) fn new(
        name: String,
        statics: Vec<usize>,
        backs: Vec<usize>,
        forwards: Vec<usize>,
    ) -> Self {
        Self {
            name,
            statics,
            backs,
            forwards,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statics(&self) -> &[usize] {
        &self.statics
    }

    pub fn backs(&self) -> &[usize] {
        &self.backs
    }

    pub fn forwards(&self) -> &[usize] {
        &self.forwards
    }
}

// src/stepper.rs
// Host-side stepper handle. Steppers are bound to endstops so that a homing
// move knows which motors to stop when the endstop triggers.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stepper {
    name: String,
}

impl Stepper {
    pub fn new(name: &str) -> Self {
        Stepper { name: name.to_string() }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Stepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

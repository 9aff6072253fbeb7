// src/core_traits.rs
// Capabilities printer objects receive from their collaborators.

use std::sync::Arc;

use crate::configfile::ConfigError;
use crate::mcu::McuEndstop;
use crate::pins::{PinChip, PinParams};

// --- PinController Trait ---
/// Trait for managing and looking up pins.
pub trait PinController {
    fn register_chip(&mut self, chip_name: &str, chip: Arc<dyn PinChip>) -> Result<(), ConfigError>;

    /// Lets more than one config section claim the same pin.
    /// `pin_desc` must not carry `^`, `~` or `!` modifiers.
    fn allow_multi_use_pin(&mut self, pin_desc: &str) -> Result<(), ConfigError>;

    /// Looks up pin details. `can_invert` and `can_pullup` indicate if the pin syntax supports `!` and `^`.
    fn lookup_pin(
        &mut self,
        pin_desc: &str,
        can_invert: bool,
        can_pullup: bool,
        share_type: Option<&str>,
    ) -> Result<PinParams, ConfigError>;

    fn lookup_chip(&self, chip_name: &str) -> Result<Arc<dyn PinChip>, ConfigError>;

    fn setup_pin(&mut self, pin_type: &str, pin_desc: &str) -> Result<Arc<dyn McuEndstop>, ConfigError>;
}

// --- PrintTimeSource Trait ---
/// Supplies the print time endstop queries are stamped with.
pub trait PrintTimeSource: Send + Sync {
    fn get_last_move_time(&self) -> f64;
}

// --- PrintKObject Trait ---
/// Trait for objects that can provide status information.
pub trait PrintKObject: Send + Sync {
    fn get_status(&self, eventtime: f64) -> serde_json::Value;
}

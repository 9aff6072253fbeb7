// src/lib.rs
// Klipper host objects for toolchanger endstops.

pub mod configfile;
pub mod core_traits;
pub mod gcode;
pub mod klippy;
pub mod mcu;
pub mod pins;
pub mod reactor;
pub mod stepper;
pub mod toolhead;

pub mod extras;

pub use klippy::Printer;

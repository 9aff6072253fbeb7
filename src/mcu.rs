// src/mcu.rs
// Host-side MCU handles and the endstop interface the homing code talks to.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;

use crate::configfile::ConfigError;
use crate::pins::{PinChip, PinParams};
use crate::stepper::Stepper;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EndstopError {
    #[error("Cannot interact with {0} - no active tool {0}")]
    NoActiveEndstop(String),
    #[error("{0}")]
    Mcu(String),
}

/// Represents a connection to a microcontroller.
pub trait Mcu: Send + Sync {
    fn get_name(&self) -> String;
    fn estimated_print_time(&self, curtime: f64) -> f64;
}

/// An endstop pin as seen by the homing code.
///
/// Implemented by real MCU endstops and by virtual endstops that route to one
/// of several physical ones.
pub trait McuEndstop: Send + Sync {
    fn get_mcu(&self) -> Result<Arc<dyn Mcu>, EndstopError>;
    fn add_stepper(&self, stepper: Arc<Stepper>);
    fn get_steppers(&self) -> Vec<Arc<Stepper>>;
    fn home_start(
        &self,
        print_time: f64,
        sample_time: f64,
        sample_count: u32,
        rest_time: f64,
        triggered: bool,
    ) -> Result<(), EndstopError>;
    /// Returns the print time the endstop triggered at, or 0.0 if it never did.
    fn home_wait(&self, home_end_time: f64) -> Result<f64, EndstopError>;
    fn query_endstop(&self, print_time: f64) -> Result<bool, EndstopError>;
    fn get_position_endstop(&self) -> f64;
}

// --- Simulated MCU ---

/// An MCU without hardware behind it. Pin levels are set by the caller and
/// read back by the endstops created on it.
pub struct SimulatedMcu {
    name: String,
    me: Weak<SimulatedMcu>,
    // pin name -> raw level; true reads as triggered on a non-inverted pin
    pin_levels: Mutex<HashMap<String, bool>>,
    shutdown: Mutex<Option<String>>,
}

impl SimulatedMcu {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new_cyclic(|me| SimulatedMcu {
            name: name.to_string(),
            me: me.clone(),
            pin_levels: Mutex::new(HashMap::new()),
            shutdown: Mutex::new(None),
        })
    }

    pub fn set_pin_level(&self, pin: &str, level: bool) {
        log::debug!("SimulatedMcu '{}': pin {} -> {}", self.name, pin, level);
        self.pin_levels.lock().insert(pin.to_string(), level);
    }

    pub fn get_pin_level(&self, pin: &str) -> bool {
        self.pin_levels.lock().get(pin).copied().unwrap_or(false)
    }

    /// Puts the MCU in shutdown; every endstop operation on it fails afterwards.
    pub fn invoke_shutdown(&self, msg: &str) {
        log::warn!("SimulatedMcu '{}': shutdown: {}", self.name, msg);
        *self.shutdown.lock() = Some(msg.to_string());
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    fn check_active(&self) -> Result<(), EndstopError> {
        match self.shutdown.lock().as_ref() {
            Some(msg) => Err(EndstopError::Mcu(format!("MCU '{}' shutdown: {}", self.name, msg))),
            None => Ok(()),
        }
    }

    /// Creates an endstop on `pin` with the given polarity.
    pub fn create_endstop(&self, pin: &str, invert: bool) -> Result<Arc<SimulatedEndstop>, ConfigError> {
        let mcu = self
            .me
            .upgrade()
            .ok_or_else(|| ConfigError::Error(format!("MCU '{}' is no longer available", self.name)))?;
        Ok(Arc::new(SimulatedEndstop {
            mcu,
            pin: pin.to_string(),
            invert,
            state: Mutex::new(EndstopState::default()),
        }))
    }
}

impl Mcu for SimulatedMcu {
    fn get_name(&self) -> String {
        self.name.clone()
    }

    fn estimated_print_time(&self, curtime: f64) -> f64 {
        curtime
    }
}

impl PinChip for SimulatedMcu {
    fn setup_pin(&self, pin_type: &str, pin_params: &PinParams) -> Result<Arc<dyn McuEndstop>, ConfigError> {
        if pin_type != "endstop" {
            return Err(ConfigError::Error(format!(
                "pin type '{}' is not supported on simulated mcu '{}'",
                pin_type, self.name
            )));
        }
        let endstop: Arc<dyn McuEndstop> = self.create_endstop(&pin_params.pin, pin_params.invert)?;
        Ok(endstop)
    }
}

#[derive(Default)]
struct EndstopState {
    steppers: Vec<Arc<Stepper>>,
    position_endstop: f64,
    // print_time and wanted trigger polarity of the pending homing request
    homing: Option<(f64, bool)>,
    query_count: usize,
}

/// Endstop on a [`SimulatedMcu`] pin.
pub struct SimulatedEndstop {
    mcu: Arc<SimulatedMcu>,
    pin: String,
    invert: bool,
    state: Mutex<EndstopState>,
}

impl SimulatedEndstop {
    pub fn pin(&self) -> &str {
        &self.pin
    }

    pub fn set_position_endstop(&self, position: f64) {
        self.state.lock().position_endstop = position;
    }

    /// Number of `query_endstop` calls served so far.
    pub fn query_count(&self) -> usize {
        self.state.lock().query_count
    }

    pub fn is_homing(&self) -> bool {
        self.state.lock().homing.is_some()
    }

    fn is_triggered(&self) -> bool {
        self.mcu.get_pin_level(&self.pin) != self.invert
    }
}

impl McuEndstop for SimulatedEndstop {
    fn get_mcu(&self) -> Result<Arc<dyn Mcu>, EndstopError> {
        let mcu: Arc<dyn Mcu> = self.mcu.clone();
        Ok(mcu)
    }

    fn add_stepper(&self, stepper: Arc<Stepper>) {
        log::debug!("endstop {}:{}: bound stepper {}", self.mcu.name, self.pin, stepper);
        self.state.lock().steppers.push(stepper);
    }

    fn get_steppers(&self) -> Vec<Arc<Stepper>> {
        self.state.lock().steppers.clone()
    }

    fn home_start(
        &self,
        print_time: f64,
        _sample_time: f64,
        _sample_count: u32,
        _rest_time: f64,
        triggered: bool,
    ) -> Result<(), EndstopError> {
        self.mcu.check_active()?;
        self.state.lock().homing = Some((print_time, triggered));
        Ok(())
    }

    fn home_wait(&self, home_end_time: f64) -> Result<f64, EndstopError> {
        self.mcu.check_active()?;
        let (start_time, want_triggered) = self.state.lock().homing.take().ok_or_else(|| {
            EndstopError::Mcu(format!("endstop {}:{} home_wait without home_start", self.mcu.name, self.pin))
        })?;
        if self.is_triggered() == want_triggered {
            Ok(start_time.min(home_end_time))
        } else {
            Ok(0.0)
        }
    }

    fn query_endstop(&self, _print_time: f64) -> Result<bool, EndstopError> {
        self.mcu.check_active()?;
        self.state.lock().query_count += 1;
        Ok(self.is_triggered())
    }

    fn get_position_endstop(&self) -> f64 {
        self.state.lock().position_endstop
    }
}

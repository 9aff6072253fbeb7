// src/pins.rs
// Pin description parsing, chip registry and pin sharing rules.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::configfile::ConfigError;
use crate::core_traits::PinController;
use crate::mcu::McuEndstop;

/// Something that owns pins: an MCU, or a virtual chip such as a tool endstop group.
pub trait PinChip: Send + Sync {
    fn setup_pin(&self, pin_type: &str, pin_params: &PinParams) -> Result<Arc<dyn McuEndstop>, ConfigError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PinParams {
    pub chip_name: String,
    pub pin: String,
    pub invert: bool,
    pub pullup: i32, // 0 none, 1 pullup, -1 pulldown
    pub share_type: Option<String>,
}

impl PinParams {
    pub fn share_name(&self) -> String {
        format!("{}:{}", self.chip_name, self.pin)
    }
}

#[derive(Default)]
pub struct PrinterPins {
    chips: HashMap<String, Arc<dyn PinChip>>,
    active_pins: HashMap<String, PinParams>,
    allow_multi_use_pins: HashSet<String>,
}

impl PrinterPins {
    pub fn new() -> Self {
        PrinterPins::default()
    }

    pub fn parse_pin(&self, pin_desc: &str, can_invert: bool, can_pullup: bool) -> Result<PinParams, ConfigError> {
        let mut desc = pin_desc.trim();
        let mut pullup = 0;
        let mut invert = false;
        if can_pullup && (desc.starts_with('^') || desc.starts_with('~')) {
            pullup = if desc.starts_with('~') { -1 } else { 1 };
            desc = desc[1..].trim();
        }
        if can_invert && desc.starts_with('!') {
            invert = true;
            desc = desc[1..].trim();
        }
        let (chip_name, pin) = match desc.split_once(':') {
            Some((chip, pin)) => (chip.trim(), pin.trim()),
            None => ("mcu", desc),
        };
        if !self.chips.contains_key(chip_name) {
            return Err(ConfigError::Error(format!("Unknown pin chip name '{}'", chip_name)));
        }
        if pin.is_empty() || pin.contains(['^', '~', '!', ':', ' ']) {
            let mut format = String::new();
            if can_pullup {
                format.push_str("[^~] ");
            }
            if can_invert {
                format.push_str("[!] ");
            }
            return Err(ConfigError::Error(format!(
                "Invalid pin description '{}'\nFormat is: {}[chip_name:] pin_name",
                pin_desc, format
            )));
        }
        Ok(PinParams {
            chip_name: chip_name.to_string(),
            pin: pin.to_string(),
            invert,
            pullup,
            share_type: None,
        })
    }
}

impl PinController for PrinterPins {
    fn register_chip(&mut self, chip_name: &str, chip: Arc<dyn PinChip>) -> Result<(), ConfigError> {
        let chip_name = chip_name.trim();
        if self.chips.contains_key(chip_name) {
            return Err(ConfigError::Error(format!("Duplicate chip name '{}'", chip_name)));
        }
        log::debug!("pins: registered chip '{}'", chip_name);
        self.chips.insert(chip_name.to_string(), chip);
        Ok(())
    }

    fn allow_multi_use_pin(&mut self, pin_desc: &str) -> Result<(), ConfigError> {
        let pin_params = self.parse_pin(pin_desc, false, false)?;
        self.allow_multi_use_pins.insert(pin_params.share_name());
        Ok(())
    }

    fn lookup_pin(
        &mut self,
        pin_desc: &str,
        can_invert: bool,
        can_pullup: bool,
        share_type: Option<&str>,
    ) -> Result<PinParams, ConfigError> {
        let mut pin_params = self.parse_pin(pin_desc, can_invert, can_pullup)?;
        let share_name = pin_params.share_name();
        if let Some(active) = self.active_pins.get(&share_name) {
            if self.allow_multi_use_pins.contains(&share_name) {
                return Ok(active.clone());
            }
            if share_type.is_none() || share_type != active.share_type.as_deref() {
                return Err(ConfigError::Error(format!("pin {} used multiple times in config", pin_params.pin)));
            }
            if pin_params.invert != active.invert || pin_params.pullup != active.pullup {
                return Err(ConfigError::Error(format!("Shared pin {} must have same polarity", pin_params.pin)));
            }
            return Ok(active.clone());
        }
        pin_params.share_type = share_type.map(str::to_string);
        self.active_pins.insert(share_name, pin_params.clone());
        Ok(pin_params)
    }

    fn lookup_chip(&self, chip_name: &str) -> Result<Arc<dyn PinChip>, ConfigError> {
        self.chips
            .get(chip_name)
            .cloned()
            .ok_or_else(|| ConfigError::Error(format!("Unknown pin chip name '{}'", chip_name)))
    }

    fn setup_pin(&mut self, pin_type: &str, pin_desc: &str) -> Result<Arc<dyn McuEndstop>, ConfigError> {
        let can_invert = matches!(pin_type, "endstop" | "digital_out" | "pwm");
        let can_pullup = pin_type == "endstop";
        let pin_params = self.lookup_pin(pin_desc, can_invert, can_pullup, None)?;
        self.lookup_chip(&pin_params.chip_name)?.setup_pin(pin_type, &pin_params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcu::SimulatedMcu;

    fn pins_with_mcus() -> PrinterPins {
        let mut pins = PrinterPins::new();
        pins.register_chip("mcu", SimulatedMcu::new("mcu")).unwrap();
        pins.register_chip("toolboard", SimulatedMcu::new("toolboard")).unwrap();
        pins
    }

    #[test]
    fn test_parse_pin_modifiers() {
        let pins = pins_with_mcus();
        let p = pins.parse_pin("^!PA1", true, true).unwrap();
        assert_eq!((p.chip_name.as_str(), p.pin.as_str(), p.invert, p.pullup), ("mcu", "PA1", true, 1));

        let p = pins.parse_pin("~toolboard:PB3", true, true).unwrap();
        assert_eq!((p.chip_name.as_str(), p.pin.as_str(), p.invert, p.pullup), ("toolboard", "PB3", false, -1));
    }

    #[test]
    fn test_parse_pin_rejects_modifiers_when_not_allowed() {
        let pins = pins_with_mcus();
        let err = pins.parse_pin("!PA1", false, false).unwrap_err();
        assert!(err.to_string().contains("Invalid pin description '!PA1'"));
        assert!(pins.parse_pin("other:PA1", true, true).unwrap_err().to_string().contains("Unknown pin chip name 'other'"));
    }

    #[test]
    fn test_duplicate_chip_rejected() {
        let mut pins = pins_with_mcus();
        assert!(pins.register_chip("mcu", SimulatedMcu::new("mcu")).is_err());
    }

    #[test]
    fn test_pin_reuse_requires_multi_use() {
        let mut pins = pins_with_mcus();
        pins.lookup_pin("^PA1", true, true, None).unwrap();
        let err = pins.lookup_pin("^PA1", true, true, None).unwrap_err();
        assert_eq!(err.to_string(), "pin PA1 used multiple times in config");

        pins.allow_multi_use_pin("PA2").unwrap();
        let first = pins.lookup_pin("^!PA2", true, true, None).unwrap();
        let second = pins.lookup_pin("PA2", true, true, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_shared_pin_polarity_must_match() {
        let mut pins = pins_with_mcus();
        pins.lookup_pin("PA3", true, true, Some("sensor")).unwrap();
        assert!(pins.lookup_pin("PA3", true, true, Some("sensor")).is_ok());
        let err = pins.lookup_pin("!PA3", true, true, Some("sensor")).unwrap_err();
        assert_eq!(err.to_string(), "Shared pin PA3 must have same polarity");
    }

    #[test]
    fn test_setup_pin_builds_endstop_on_chip() {
        let mut pins = pins_with_mcus();
        let endstop = pins.setup_pin("endstop", "toolboard:PC0").unwrap();
        assert_eq!(endstop.get_mcu().unwrap().get_name(), "toolboard");
        assert!(pins.setup_pin("pwm", "PC1").is_err());
    }
}

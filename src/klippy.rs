// src/klippy.rs
// Printer host: builds every object from the config file and routes commands.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::configfile::{ConfigError, Configfile};
use crate::core_traits::{PinController, PrintKObject, PrintTimeSource};
use crate::extras::tool_endstop::{load_tool_endstops, ToolEndstopError, ToolEndstopGlobal, ToolEndstopKind};
use crate::gcode::{CommandError, GCode};
use crate::mcu::SimulatedMcu;
use crate::pins::PrinterPins;
use crate::reactor::Reactor;
use crate::stepper::Stepper;
use crate::toolhead::ToolHead;

pub struct Printer {
    reactor: Arc<dyn Reactor>,
    gcode: GCode,
    toolhead: Arc<ToolHead>,
    mcus: BTreeMap<String, Arc<SimulatedMcu>>,
    tool_endstops: Vec<Arc<Mutex<ToolEndstopGlobal>>>,
    steppers: Vec<Arc<Stepper>>,
    state_message: String,
}

impl Printer {
    pub fn from_config(config: &Configfile, reactor: Arc<dyn Reactor>) -> Result<Self, ConfigError> {
        let mut pins = PrinterPins::new();
        let mut gcode = GCode::new();

        // --- MCUs ---
        if !config.has_section("mcu") {
            return Err(ConfigError::SectionNotFound("mcu".to_string()));
        }
        let mut mcus = BTreeMap::new();
        for section in config.get_prefix_sections("mcu") {
            let name = if section.eq_ignore_ascii_case("mcu") {
                "mcu"
            } else if section.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("mcu ")) {
                section[4..].trim()
            } else {
                continue;
            };
            let mcu = SimulatedMcu::new(name);
            for pin in config.getlist(&section, "simulated_triggered_pins", Some(&[]))? {
                mcu.set_pin_level(&pin, true);
            }
            pins.register_chip(name, mcu.clone())?;
            log::info!("Printer: loaded mcu '{}'", name);
            mcus.insert(name.to_string(), mcu);
        }

        let main_mcu = mcus
            .get("mcu")
            .cloned()
            .ok_or_else(|| ConfigError::SectionNotFound("mcu".to_string()))?;
        let toolhead = Arc::new(ToolHead::new(reactor.clone(), main_mcu));

        // --- Tool endstops ---
        let mut tool_endstops = Vec::new();
        for kind in ToolEndstopKind::ALL {
            let print_time: Arc<dyn PrintTimeSource> = toolhead.clone();
            if let Some(global) = load_tool_endstops(config, kind, &mut pins, &mut gcode, print_time)? {
                tool_endstops.push(global);
            }
        }

        // --- Steppers ---
        let mut steppers = Vec::new();
        for section in config.get_prefix_sections("stepper_") {
            let stepper = Arc::new(Stepper::new(&section));
            if let Ok(endstop_pin) = config.get(&section, "endstop_pin", None) {
                let endstop = pins.setup_pin("endstop", &endstop_pin)?;
                endstop.add_stepper(stepper.clone());
            }
            steppers.push(stepper);
        }

        Ok(Printer {
            reactor,
            gcode,
            toolhead,
            mcus,
            tool_endstops,
            steppers,
            state_message: "Printer is not ready".to_string(),
        })
    }

    /// Runs the connect-time handlers, including passive tool detection.
    pub fn connect(&mut self) -> Result<(), ToolEndstopError> {
        for global in &self.tool_endstops {
            global.lock().handle_connect()?;
        }
        self.state_message = "Printer is ready".to_string();
        log::info!("{}", self.state_message);
        Ok(())
    }

    pub fn get_state_message(&self) -> &str {
        &self.state_message
    }

    pub fn run_command(&mut self, line: &str) -> Result<Vec<String>, CommandError> {
        self.gcode.run_script_from_command(line)
    }

    pub fn lookup_mcu(&self, name: &str) -> Option<Arc<SimulatedMcu>> {
        self.mcus.get(name).cloned()
    }

    pub fn lookup_tool_endstop(&self, kind: ToolEndstopKind) -> Option<Arc<Mutex<ToolEndstopGlobal>>> {
        self.tool_endstops.iter().find(|g| g.lock().kind() == kind).cloned()
    }

    pub fn steppers(&self) -> &[Arc<Stepper>] {
        &self.steppers
    }

    pub fn get_last_move_time(&self) -> f64 {
        self.toolhead.get_last_move_time()
    }

    /// Status of every tool endstop group, keyed by its chip name.
    pub fn status(&self) -> serde_json::Value {
        let eventtime = self.reactor.monotonic();
        let groups: serde_json::Map<String, serde_json::Value> = self
            .tool_endstops
            .iter()
            .map(|g| {
                let global = g.lock();
                (global.kind().chip_name.to_string(), global.get_status(eventtime))
            })
            .collect();
        serde_json::Value::Object(groups)
    }
}

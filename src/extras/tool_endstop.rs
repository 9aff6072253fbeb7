// src/extras/tool_endstop.rs
// Virtual endstop for toolchangers, backed by the endstop of the mounted tool.
//
// The active tool endstop is chosen with SET_ACTIVE_TOOL_ENDSTOP T=<n>, or
// detected with DETECT_ACTIVE_TOOL_ENDSTOP: the single endstop that is NOT
// triggered belongs to the mounted tool. The X variant works the same way
// with its own commands and state.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::configfile::{ConfigError, Configfile};
use crate::core_traits::{PinController, PrintKObject, PrintTimeSource};
use crate::gcode::{CommandError, GCode, GCodeCommand};
use crate::mcu::{EndstopError, Mcu, McuEndstop};
use crate::pins::{PinChip, PinParams};
use crate::stepper::Stepper;

/// Names and wording for one tool endstop group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolEndstopKind {
    /// Chip exposing the virtual pin, e.g. `tool_endstop:z_virtual_endstop`.
    pub chip_name: &'static str,
    /// Config section prefix of the per-tool entries.
    pub section_prefix: &'static str,
    pub set_command: &'static str,
    pub detect_command: &'static str,
    /// "endstop" or "X endstop", used in every user facing message.
    pub label: &'static str,
    pub status_key: &'static str,
}

impl ToolEndstopKind {
    pub const GENERIC: ToolEndstopKind = ToolEndstopKind {
        chip_name: "tool_endstop",
        section_prefix: "tool_endstop ",
        set_command: "SET_ACTIVE_TOOL_ENDSTOP",
        detect_command: "DETECT_ACTIVE_TOOL_ENDSTOP",
        label: "endstop",
        status_key: "active_tool_endstop",
    };

    pub const X: ToolEndstopKind = ToolEndstopKind {
        chip_name: "tool_x_endstop",
        section_prefix: "tool_x_endstop ",
        set_command: "SET_ACTIVE_TOOL_X_ENDSTOP",
        detect_command: "DETECT_ACTIVE_TOOL_X_ENDSTOP",
        label: "X endstop",
        status_key: "active_tool_x_endstop",
    };

    pub const ALL: [ToolEndstopKind; 2] = [ToolEndstopKind::GENERIC, ToolEndstopKind::X];

    fn set_help(&self) -> String {
        format!("Set the tool {0} that will act as the {0}.", self.label)
    }

    fn detect_help(&self) -> String {
        format!(
            "Detect which tool is active by identifying an {} that is NOT triggered",
            self.label
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolEndstopError {
    #[error("Duplicate tool {label} nr: {tool}")]
    DuplicateTool { label: &'static str, tool: i64 },
    #[error("no tool {label} for tool {tool}")]
    UnknownTool { label: &'static str, tool: i64 },
    #[error(transparent)]
    Endstop(#[from] EndstopError),
}

impl From<ToolEndstopError> for CommandError {
    fn from(e: ToolEndstopError) -> Self {
        CommandError::GCodeError(e.to_string())
    }
}

impl From<ToolEndstopError> for ConfigError {
    fn from(e: ToolEndstopError) -> Self {
        ConfigError::Error(e.to_string())
    }
}

impl From<EndstopError> for CommandError {
    fn from(e: EndstopError) -> Self {
        CommandError::GCodeError(e.to_string())
    }
}

fn same_endstop(a: &Arc<dyn McuEndstop>, b: &Arc<dyn McuEndstop>) -> bool {
    // Compare data pointers only; vtable pointers are not unique per type.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

// --- Per-tool endstop ---

/// One tool's physical endstop.
pub struct ToolEndstop {
    tool: i64,
    name: String,
    mcu_endstop: Arc<dyn McuEndstop>,
}

impl ToolEndstop {
    pub fn new(tool: i64, name: &str, mcu_endstop: Arc<dyn McuEndstop>) -> Self {
        ToolEndstop {
            tool,
            name: name.to_string(),
            mcu_endstop,
        }
    }

    /// Builds the entry for config `section`, resolving its `pin` option.
    pub fn from_config(
        config: &Configfile,
        section: &str,
        pins: &mut dyn PinController,
    ) -> Result<Self, ConfigError> {
        let tool = config.getint(section, "tool", None, None, None)?;
        let pin = config.get(section, "pin", None)?;

        // Several tools may sit on the same wire.
        pins.allow_multi_use_pin(&pin.replace(['^', '~', '!'], ""))?;
        let pin_params = pins.lookup_pin(&pin, true, true, None)?;
        let mcu_endstop = pins
            .lookup_chip(&pin_params.chip_name)?
            .setup_pin("endstop", &pin_params)?;
        Ok(ToolEndstop::new(tool, section, mcu_endstop))
    }

    /// Builds the entry and registers it with its group.
    pub fn load_config(
        config: &Configfile,
        section: &str,
        pins: &mut dyn PinController,
        global: &Mutex<ToolEndstopGlobal>,
    ) -> Result<Arc<ToolEndstop>, ConfigError> {
        let tool_endstop = Arc::new(ToolEndstop::from_config(config, section, pins)?);
        global.lock().add_endstop(tool_endstop.clone())?;
        Ok(tool_endstop)
    }

    pub fn tool(&self) -> i64 {
        self.tool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mcu_endstop(&self) -> &Arc<dyn McuEndstop> {
        &self.mcu_endstop
    }
}

impl std::fmt::Debug for ToolEndstop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEndstop")
            .field("tool", &self.tool)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// --- Endstop router ---

#[derive(Default)]
struct RouterState {
    mcus: Vec<Arc<dyn McuEndstop>>,
    steppers: Vec<Arc<Stepper>>,
    active_mcu: Option<Arc<dyn McuEndstop>>,
    activations: u64,
}

/// Routes endstop calls to the selected tool endstop.
///
/// This is the object the homing code holds on to for the life of the
/// process; only the endstop behind it changes.
pub struct EndstopRouter {
    label: &'static str,
    state: Mutex<RouterState>,
}

impl EndstopRouter {
    pub fn new(label: &'static str) -> Self {
        EndstopRouter {
            label,
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Adds a physical endstop and binds every known stepper to it.
    pub fn add_mcu(&self, mcu_endstop: Arc<dyn McuEndstop>) {
        let steppers = {
            let mut state = self.state.lock();
            state.mcus.push(mcu_endstop.clone());
            state.steppers.clone()
        };
        for stepper in steppers {
            mcu_endstop.add_stepper(stepper);
        }
    }

    pub fn set_active_mcu(&self, mcu_endstop: Option<Arc<dyn McuEndstop>>) {
        let mut state = self.state.lock();
        let unchanged = match (&state.active_mcu, &mcu_endstop) {
            (Some(current), Some(new)) => same_endstop(current, new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        state.active_mcu = mcu_endstop;
        state.activations += 1;
    }

    pub fn has_active_mcu(&self) -> bool {
        self.state.lock().active_mcu.is_some()
    }

    /// Number of times the active endstop actually changed.
    pub fn activation_count(&self) -> u64 {
        self.state.lock().activations
    }

    pub fn mcu_count(&self) -> usize {
        self.state.lock().mcus.len()
    }

    fn active(&self) -> Result<Arc<dyn McuEndstop>, EndstopError> {
        self.state
            .lock()
            .active_mcu
            .clone()
            .ok_or_else(|| EndstopError::NoActiveEndstop(self.label.to_string()))
    }
}

impl McuEndstop for EndstopRouter {
    fn get_mcu(&self) -> Result<Arc<dyn Mcu>, EndstopError> {
        self.active()?.get_mcu()
    }

    fn add_stepper(&self, stepper: Arc<Stepper>) {
        let mcus = {
            let mut state = self.state.lock();
            state.steppers.push(stepper.clone());
            state.mcus.clone()
        };
        for mcu_endstop in mcus {
            mcu_endstop.add_stepper(stepper.clone());
        }
    }

    fn get_steppers(&self) -> Vec<Arc<Stepper>> {
        self.state.lock().steppers.clone()
    }

    fn home_start(
        &self,
        print_time: f64,
        sample_time: f64,
        sample_count: u32,
        rest_time: f64,
        triggered: bool,
    ) -> Result<(), EndstopError> {
        self.active()?
            .home_start(print_time, sample_time, sample_count, rest_time, triggered)
    }

    fn home_wait(&self, home_end_time: f64) -> Result<f64, EndstopError> {
        self.active()?.home_wait(home_end_time)
    }

    fn query_endstop(&self, print_time: f64) -> Result<bool, EndstopError> {
        self.active()?.query_endstop(print_time)
    }

    fn get_position_endstop(&self) -> f64 {
        // The homing code reads this before it finds out nothing is active;
        // report 0 and let the homing move itself fail.
        let active_mcu = self.state.lock().active_mcu.clone();
        match active_mcu {
            Some(active) => active.get_position_endstop(),
            None => 0.0,
        }
    }
}

/// Exposes `<chip_name>:<anything>` as the group's virtual endstop pin.
struct ToolEndstopChip {
    label: &'static str,
    router: Arc<EndstopRouter>,
}

impl PinChip for ToolEndstopChip {
    fn setup_pin(&self, pin_type: &str, _pin_params: &PinParams) -> Result<Arc<dyn McuEndstop>, ConfigError> {
        if pin_type != "endstop" {
            return Err(ConfigError::Error(format!(
                "Tool {} virtual pin only useful as endstop pin",
                self.label
            )));
        }
        let router: Arc<dyn McuEndstop> = self.router.clone();
        Ok(router)
    }
}

// --- Tool endstop group ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolEndstopStatus {
    pub last_query: BTreeMap<i64, bool>,
    pub active_tool_number: i64,
    pub active_tool_endstop: Option<String>,
}

pub struct ToolEndstopGlobal {
    kind: ToolEndstopKind,
    tool_endstops: BTreeMap<i64, Arc<ToolEndstop>>,
    last_query: BTreeMap<i64, bool>,
    active_endstop: Option<Arc<ToolEndstop>>,
    active_tool_number: i64,
    mcu_endstop: Arc<EndstopRouter>,
    toolhead: Arc<dyn PrintTimeSource>,
}

impl ToolEndstopGlobal {
    pub fn new(kind: ToolEndstopKind, toolhead: Arc<dyn PrintTimeSource>) -> Self {
        ToolEndstopGlobal {
            kind,
            tool_endstops: BTreeMap::new(),
            last_query: BTreeMap::new(),
            active_endstop: None,
            active_tool_number: -1,
            mcu_endstop: Arc::new(EndstopRouter::new(kind.label)),
            toolhead,
        }
    }

    /// Creates the group, exposes its virtual pin chip and registers its commands.
    pub fn load_config(
        kind: ToolEndstopKind,
        pins: &mut dyn PinController,
        gcode: &mut GCode,
        toolhead: Arc<dyn PrintTimeSource>,
    ) -> Result<Arc<Mutex<Self>>, ConfigError> {
        let global = ToolEndstopGlobal::new(kind, toolhead);
        log::info!("ToolEndstopGlobal: registering chip '{}'", kind.chip_name);
        pins.register_chip(
            kind.chip_name,
            Arc::new(ToolEndstopChip {
                label: kind.label,
                router: global.mcu_endstop.clone(),
            }),
        )?;

        let global = Arc::new(Mutex::new(global));
        Self::register_commands(kind, gcode, Arc::downgrade(&global))?;
        Ok(global)
    }

    fn register_commands(
        kind: ToolEndstopKind,
        gcode: &mut GCode,
        global: Weak<Mutex<ToolEndstopGlobal>>,
    ) -> Result<(), ConfigError> {
        let set_global = global.clone();
        gcode.register_command(
            kind.set_command,
            Box::new(move |gcmd| {
                let Some(global) = set_global.upgrade() else {
                    return Err(CommandError::Shutdown(gcmd.get_commandline().to_string()));
                };
                let mut locked = global.lock();
                locked.cmd_set_active_tool_endstop(gcmd)
            }),
            Some(&kind.set_help()),
        )?;
        gcode.register_command(
            kind.detect_command,
            Box::new(move |gcmd| {
                let Some(global) = global.upgrade() else {
                    return Err(CommandError::Shutdown(gcmd.get_commandline().to_string()));
                };
                let mut locked = global.lock();
                locked.cmd_detect_active_tool_endstop(gcmd)
            }),
            Some(&kind.detect_help()),
        )?;
        Ok(())
    }

    pub fn kind(&self) -> ToolEndstopKind {
        self.kind
    }

    /// The virtual endstop handed to the homing code.
    pub fn mcu_endstop(&self) -> Arc<EndstopRouter> {
        self.mcu_endstop.clone()
    }

    pub fn tool_endstops(&self) -> impl Iterator<Item = &Arc<ToolEndstop>> {
        self.tool_endstops.values()
    }

    pub fn get_tool_endstop(&self, tool: i64) -> Option<&Arc<ToolEndstop>> {
        self.tool_endstops.get(&tool)
    }

    pub fn active_tool_number(&self) -> i64 {
        self.active_tool_number
    }

    pub fn active_endstop(&self) -> Option<&Arc<ToolEndstop>> {
        self.active_endstop.as_ref()
    }

    pub fn last_query(&self) -> &BTreeMap<i64, bool> {
        &self.last_query
    }

    pub fn add_endstop(&mut self, tool_endstop: Arc<ToolEndstop>) -> Result<(), ToolEndstopError> {
        if self.tool_endstops.contains_key(&tool_endstop.tool) {
            return Err(ToolEndstopError::DuplicateTool {
                label: self.kind.label,
                tool: tool_endstop.tool,
            });
        }
        log::info!(
            "tool {}: registered '{}' for tool {}",
            self.kind.label,
            tool_endstop.name,
            tool_endstop.tool
        );
        self.mcu_endstop.add_mcu(tool_endstop.mcu_endstop.clone());
        self.tool_endstops.insert(tool_endstop.tool, tool_endstop);
        Ok(())
    }

    pub fn set_active_endstop(&mut self, tool_endstop: Option<Arc<ToolEndstop>>) {
        let unchanged = match (&self.active_endstop, &tool_endstop) {
            (Some(current), Some(new)) => Arc::ptr_eq(current, new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        match &tool_endstop {
            Some(active) => {
                log::info!("tool {}: activating '{}' (tool {})", self.kind.label, active.name, active.tool);
                self.mcu_endstop.set_active_mcu(Some(active.mcu_endstop.clone()));
                self.active_tool_number = active.tool;
            }
            None => {
                log::info!("tool {}: no active tool endstop", self.kind.label);
                self.mcu_endstop.set_active_mcu(None);
                self.active_tool_number = -1;
            }
        }
        self.active_endstop = tool_endstop;
    }

    pub fn select_tool(&mut self, tool: i64) -> Result<(), ToolEndstopError> {
        let tool_endstop = self
            .tool_endstops
            .get(&tool)
            .cloned()
            .ok_or(ToolEndstopError::UnknownTool {
                label: self.kind.label,
                tool,
            })?;
        self.set_active_endstop(Some(tool_endstop));
        Ok(())
    }

    /// Queries every tool endstop and returns the ones that are not triggered.
    pub fn query_open_tools(&mut self, print_time: f64) -> Result<Vec<Arc<ToolEndstop>>, ToolEndstopError> {
        self.last_query.clear();
        let mut candidates = Vec::new();
        for tool_endstop in self.tool_endstops.values() {
            let triggered = tool_endstop.mcu_endstop.query_endstop(print_time)?;
            log::debug!(
                "tool {}: '{}' (tool {}) triggered={}",
                self.kind.label,
                tool_endstop.name,
                tool_endstop.tool,
                triggered
            );
            self.last_query.insert(tool_endstop.tool, triggered);
            if !triggered {
                candidates.push(tool_endstop.clone());
            }
        }
        Ok(candidates)
    }

    pub fn describe_tool_detection_issue(&self, candidates: &[Arc<ToolEndstop>]) -> String {
        match candidates.len() {
            1 => "OK".to_string(),
            0 => format!("all {}s triggered", self.kind.label),
            _ => {
                let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
                format!("multiple {}s not triggered: {}", self.kind.label, names.join(", "))
            }
        }
    }

    /// Passive detection: activates the single open tool, otherwise leaves the
    /// current selection alone.
    pub fn detect_active_tool(&mut self, print_time: f64) -> Result<(), ToolEndstopError> {
        let mut active_tools = self.query_open_tools(print_time)?;
        if active_tools.len() == 1 {
            self.set_active_endstop(active_tools.pop());
        } else {
            log::info!(
                "tool {}: detection inconclusive: {}",
                self.kind.label,
                self.describe_tool_detection_issue(&active_tools)
            );
        }
        Ok(())
    }

    /// Runs passive detection once the printer is connected.
    pub fn handle_connect(&mut self) -> Result<(), ToolEndstopError> {
        let print_time = self.toolhead.get_last_move_time();
        self.detect_active_tool(print_time)
    }

    pub fn cmd_set_active_tool_endstop(&mut self, gcmd: &mut GCodeCommand) -> Result<(), CommandError> {
        let tool_nr = gcmd.get_int("T", None, None, None)?;
        self.select_tool(tool_nr)?;
        Ok(())
    }

    /// Explicit detection: unlike the passive path, an inconclusive result
    /// clears the current selection.
    pub fn cmd_detect_active_tool_endstop(&mut self, gcmd: &mut GCodeCommand) -> Result<(), CommandError> {
        let print_time = self.toolhead.get_last_move_time();
        let mut active_tools = self.query_open_tools(print_time)?;
        if active_tools.len() == 1 {
            let active = active_tools.pop();
            if let Some(active) = &active {
                gcmd.respond_info(&format!("Found active tool {}: {}", self.kind.label, active.name));
            }
            self.set_active_endstop(active);
        } else {
            self.set_active_endstop(None);
            gcmd.respond_info(&self.describe_tool_detection_issue(&active_tools));
        }
        Ok(())
    }

    pub fn get_tool_status(&self) -> ToolEndstopStatus {
        ToolEndstopStatus {
            last_query: self.last_query.clone(),
            active_tool_number: self.active_tool_number,
            active_tool_endstop: self.active_endstop.as_ref().map(|e| e.name.clone()),
        }
    }
}

impl PrintKObject for ToolEndstopGlobal {
    fn get_status(&self, _eventtime: f64) -> serde_json::Value {
        let mut status = serde_json::to_value(self.get_tool_status()).unwrap_or_default();
        if let Some(map) = status.as_object_mut() {
            if let Some(active) = map.remove("active_tool_endstop") {
                map.insert(self.kind.status_key.to_string(), active);
            }
        }
        status
    }
}

/// Loads the group for `kind` and its per-tool sections.
///
/// Returns `None` when the config has no entry for this group.
pub fn load_tool_endstops(
    config: &Configfile,
    kind: ToolEndstopKind,
    pins: &mut dyn PinController,
    gcode: &mut GCode,
    toolhead: Arc<dyn PrintTimeSource>,
) -> Result<Option<Arc<Mutex<ToolEndstopGlobal>>>, ConfigError> {
    let sections = config.get_prefix_sections(kind.section_prefix);
    if sections.is_empty() {
        return Ok(None);
    }
    let global = ToolEndstopGlobal::load_config(kind, pins, gcode, toolhead)?;
    for section in &sections {
        ToolEndstop::load_config(config, section, pins, &global)?;
    }
    Ok(Some(global))
}

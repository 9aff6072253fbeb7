use std::sync::Arc;

use klipper_tool_endstop::configfile::{ConfigError, Configfile};
use klipper_tool_endstop::extras::tool_endstop::ToolEndstopKind;
use klipper_tool_endstop::reactor::ManualReactor;
use klipper_tool_endstop::Printer;

fn printer(content: &str) -> Result<Printer, ConfigError> {
    let mut config = Configfile::new(None);
    config.parse(content)?;
    Printer::from_config(&config, Arc::new(ManualReactor::new(0.0)))
}

#[test]
fn test_both_groups_are_independent() {
    let mut printer = printer(
        "
[mcu]
simulated_triggered_pins: PA1, PC1

[stepper_x]
endstop_pin: tool_x_endstop:x_virtual_endstop

[stepper_z]
endstop_pin: tool_endstop:z_virtual_endstop

[tool_endstop T0]
tool: 0
pin: PA0

[tool_endstop T1]
tool: 1
pin: PA1

[tool_x_endstop T0]
tool: 0
pin: PC0

[tool_x_endstop T1]
tool: 1
pin: PC1
",
    )
    .unwrap();
    printer.connect().unwrap();

    let status = printer.status();
    assert_eq!(status["tool_endstop"]["active_tool_number"], 0);
    assert_eq!(status["tool_x_endstop"]["active_tool_x_endstop"], "tool_x_endstop T0");

    printer.run_command("SET_ACTIVE_TOOL_X_ENDSTOP T=1").unwrap();
    let x = printer.lookup_tool_endstop(ToolEndstopKind::X).unwrap();
    let generic = printer.lookup_tool_endstop(ToolEndstopKind::GENERIC).unwrap();
    assert_eq!(x.lock().active_tool_number(), 1);
    assert_eq!(generic.lock().active_tool_number(), 0);

    let err = printer.run_command("SET_ACTIVE_TOOL_X_ENDSTOP T=4").unwrap_err();
    assert_eq!(err.to_string(), "no tool X endstop for tool 4");
}

#[test]
fn test_tools_sharing_one_pin() {
    let mut printer = printer(
        "
[mcu]
[tool_endstop a]
tool: 0
pin: ^!PA5
[tool_endstop b]
tool: 1
pin: ^!PA5
",
    )
    .unwrap();
    // both read the same inverted pin, which idles triggered
    let responses = printer.run_command("DETECT_ACTIVE_TOOL_ENDSTOP").unwrap();
    assert_eq!(responses, vec!["all endstops triggered".to_string()]);
}

#[test]
fn test_virtual_pin_needs_tool_endstops() {
    let err = printer("[mcu]\n[stepper_z]\nendstop_pin: tool_endstop:z_virtual_endstop\n").err().unwrap();
    assert_eq!(err.to_string(), "Unknown pin chip name 'tool_endstop'");
}

#[test]
fn test_unknown_chip_in_tool_pin() {
    let err = printer("[mcu]\n[tool_endstop a]\ntool: 0\npin: nope:PA5\n").err().unwrap();
    assert_eq!(err.to_string(), "Unknown pin chip name 'nope'");
}

#[test]
fn test_help_lists_tool_endstop_commands() {
    let mut printer = printer("[mcu]\n[tool_endstop a]\ntool: 0\npin: PA5\n").unwrap();
    let help = printer.run_command("HELP").unwrap().join("\n");
    assert!(help.contains("SET_ACTIVE_TOOL_ENDSTOP: Set the tool endstop that will act as the endstop."));
    assert!(help.contains("DETECT_ACTIVE_TOOL_ENDSTOP: Detect which tool is active"));
    assert!(!help.contains("SET_ACTIVE_TOOL_X_ENDSTOP"));
}

#[test]
fn test_tool_names_keep_config_case() {
    let mut printer = printer("[MCU]\nsimulated_triggered_pins: PA6\n[Tool_Endstop T0]\ntool: 0\npin: PA5\n[tool_endstop T1]\ntool: 1\npin: PA6\n")
        .unwrap();
    let responses = printer.run_command("DETECT_ACTIVE_TOOL_ENDSTOP").unwrap();
    assert_eq!(responses, vec!["Found active tool endstop: Tool_Endstop T0".to_string()]);
    assert_eq!(printer.status()["tool_endstop"]["active_tool_endstop"], "Tool_Endstop T0");
}

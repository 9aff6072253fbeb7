// src/gcode.rs
// Extended G-code command parsing and dispatch.

use std::collections::HashMap;

use thiserror::Error;

use crate::configfile::ConfigError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("{0}")]
    GCodeError(String),
    #[error("Unknown command:\"{0}\"")]
    UnknownCommand(String),
    #[error("Internal error on command:\"{0}\"")]
    Shutdown(String),
}

impl From<&str> for CommandError {
    fn from(s: &str) -> Self {
        CommandError::GCodeError(s.to_string())
    }
}

impl From<String> for CommandError {
    fn from(s: String) -> Self {
        CommandError::GCodeError(s)
    }
}

pub type GCodeHandler = Box<dyn FnMut(&mut GCodeCommand) -> Result<(), CommandError> + Send>;

struct RegisteredCommand {
    handler: GCodeHandler,
    description: Option<String>,
}

/// A parsed extended command, e.g. `SET_ACTIVE_TOOL_ENDSTOP T=2`.
#[derive(Debug, Clone, PartialEq)]
pub struct GCodeCommand {
    command: String,
    commandline: String,
    params: HashMap<String, String>,
    responses: Vec<String>,
}

impl GCodeCommand {
    pub fn new(command: &str, commandline: &str, params: HashMap<String, String>) -> Self {
        GCodeCommand {
            command: command.to_uppercase(),
            commandline: commandline.to_string(),
            params,
            responses: Vec::new(),
        }
    }

    pub fn get_command(&self) -> &str {
        &self.command
    }

    pub fn get_commandline(&self) -> &str {
        &self.commandline
    }

    pub fn get(&self, name: &str, default: Option<&str>) -> Result<String, CommandError> {
        match self.params.get(&name.to_uppercase()) {
            Some(value) => Ok(value.clone()),
            None => default
                .map(str::to_string)
                .ok_or_else(|| CommandError::GCodeError(format!("Error on '{}': missing {}", self.commandline, name))),
        }
    }

    pub fn get_int(
        &self,
        name: &str,
        default: Option<i64>,
        minval: Option<i64>,
        maxval: Option<i64>,
    ) -> Result<i64, CommandError> {
        let value = match self.params.get(&name.to_uppercase()) {
            Some(raw) => raw.trim().parse::<i64>().map_err(|_| {
                CommandError::GCodeError(format!("Error on '{}': unable to parse {}", self.commandline, raw))
            })?,
            None => default.ok_or_else(|| {
                CommandError::GCodeError(format!("Error on '{}': missing {}", self.commandline, name))
            })?,
        };
        if minval.is_some_and(|min| value < min) {
            return Err(CommandError::GCodeError(format!(
                "Error on '{}': {} must have minimum of {}",
                self.commandline,
                name,
                minval.unwrap_or_default()
            )));
        }
        if maxval.is_some_and(|max| value > max) {
            return Err(CommandError::GCodeError(format!(
                "Error on '{}': {} must have maximum of {}",
                self.commandline,
                name,
                maxval.unwrap_or_default()
            )));
        }
        Ok(value)
    }

    pub fn respond_info(&mut self, msg: &str) {
        log::info!("{}", msg);
        self.responses.push(msg.to_string());
    }

    pub fn responses(&self) -> &[String] {
        &self.responses
    }
}

#[derive(Default)]
pub struct GCode {
    handlers: HashMap<String, RegisteredCommand>,
}

impl GCode {
    pub fn new() -> Self {
        GCode::default()
    }

    pub fn register_command(
        &mut self,
        command: &str,
        handler: GCodeHandler,
        description: Option<&str>,
    ) -> Result<(), ConfigError> {
        let command = command.to_uppercase();
        if command == "HELP" || self.handlers.contains_key(&command) {
            return Err(ConfigError::Error(format!("gcode command {} already registered", command)));
        }
        self.handlers.insert(
            command,
            RegisteredCommand {
                handler,
                description: description.map(str::to_string),
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, command: &str) -> bool {
        self.handlers.contains_key(&command.to_uppercase())
    }

    /// Parses one line. Blank and comment-only lines yield `None`.
    pub fn parse_line(&self, line: &str) -> Result<Option<GCodeCommand>, CommandError> {
        let clean_line = line.split(';').next().unwrap_or("").trim();
        let mut parts = clean_line.split_whitespace();
        let Some(command) = parts.next() else {
            return Ok(None);
        };
        let mut params = HashMap::new();
        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                return Err(CommandError::GCodeError(format!("Malformed command '{}'", clean_line)));
            };
            if key.is_empty() {
                return Err(CommandError::GCodeError(format!("Malformed command '{}'", clean_line)));
            }
            params.insert(key.to_uppercase(), value.to_string());
        }
        Ok(Some(GCodeCommand::new(command, clean_line, params)))
    }

    /// Runs one command line and returns the informational responses it produced.
    pub fn run_script_from_command(&mut self, line: &str) -> Result<Vec<String>, CommandError> {
        let Some(mut gcmd) = self.parse_line(line)? else {
            return Ok(Vec::new());
        };
        if gcmd.get_command() == "HELP" {
            return Ok(vec![self.help_text()]);
        }
        let registered = self
            .handlers
            .get_mut(gcmd.get_command())
            .ok_or_else(|| CommandError::UnknownCommand(gcmd.get_command().to_string()))?;
        log::debug!("gcode: running '{}'", gcmd.get_commandline());
        (registered.handler)(&mut gcmd)?;
        Ok(gcmd.responses)
    }

    fn help_text(&self) -> String {
        let mut lines: Vec<String> = self
            .handlers
            .iter()
            .filter_map(|(cmd, reg)| reg.description.as_ref().map(|desc| format!("{:<10}: {}", cmd, desc)))
            .collect();
        lines.sort();
        let mut out = vec!["Available extended commands:".to_string()];
        out.extend(lines);
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use parking_lot::Mutex;

    fn parse(line: &str) -> GCodeCommand {
        GCode::new().parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_extended_command() {
        let gcmd = parse("set_active_tool_endstop t=3 ; pick tool three");
        assert_eq!(gcmd.get_command(), "SET_ACTIVE_TOOL_ENDSTOP");
        assert_eq!(gcmd.get_commandline(), "set_active_tool_endstop t=3");
        assert_eq!(gcmd.get_int("T", None, None, None), Ok(3));
        assert_eq!(gcmd.get("t", None).unwrap(), "3");
    }

    #[test]
    fn test_blank_and_malformed_lines() {
        let gcode = GCode::new();
        assert_eq!(gcode.parse_line("   ; only a comment"), Ok(None));
        assert!(gcode.parse_line("SET_ACTIVE_TOOL_ENDSTOP 3").is_err());
        assert!(gcode.parse_line("SET_ACTIVE_TOOL_ENDSTOP =3").is_err());
    }

    #[test]
    fn test_get_int_errors() {
        let gcmd = parse("SELECT T=abc");
        assert_eq!(
            gcmd.get_int("T", None, None, None),
            Err(CommandError::GCodeError("Error on 'SELECT T=abc': unable to parse abc".to_string()))
        );
        let gcmd = parse("SELECT");
        assert_eq!(
            gcmd.get_int("T", None, None, None),
            Err(CommandError::GCodeError("Error on 'SELECT': missing T".to_string()))
        );
        assert_eq!(gcmd.get_int("T", Some(4), None, None), Ok(4));
        assert!(parse("SELECT T=-2").get_int("T", None, Some(0), None).is_err());
    }

    #[test]
    fn test_dispatch_and_responses() {
        let mut gcode = GCode::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();
        gcode
            .register_command(
                "ECHO_TOOL",
                Box::new(move |gcmd| {
                    let tool = gcmd.get_int("T", None, None, None)?;
                    seen_in_handler.lock().push(tool);
                    gcmd.respond_info(&format!("tool {}", tool));
                    Ok(())
                }),
                Some("Echo a tool number"),
            )
            .unwrap();

        assert_eq!(gcode.run_script_from_command("ECHO_TOOL T=5").unwrap(), vec!["tool 5".to_string()]);
        assert_eq!(*seen.lock(), vec![5]);
        assert_eq!(
            gcode.run_script_from_command("NOPE"),
            Err(CommandError::UnknownCommand("NOPE".to_string()))
        );
        let help = gcode.run_script_from_command("HELP").unwrap();
        assert!(help[0].contains("ECHO_TOOL : Echo a tool number"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut gcode = GCode::new();
        gcode.register_command("DETECT", Box::new(|_| Ok(())), None).unwrap();
        assert!(gcode.register_command("detect", Box::new(|_| Ok(())), None).is_err());
        assert!(gcode.is_registered("Detect"));
    }
}

// src/configfile.rs
// Reads and processes the printer configuration (Klipper-style INI).

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Section not found: [{0}]")]
    SectionNotFound(String),
    #[error("Option '{1}' not found in section '[{0}]'")]
    OptionNotFound(String, String),
    #[error("Failed to parse option '{0}' value '{1}' as {2}")]
    ParseError(String, String, String), // option, value, type_expected
    #[error("Validation error: {0}")]
    ValidationError(String), // General validation like min/max
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Unable to read config file '{0}': {1}")]
    Io(String, String),
    /// Errors raised by printer objects while they load their section.
    #[error("{0}")]
    Error(String),
}

#[derive(Debug, Default, Clone)]
pub struct Configfile {
    // section_name -> { option_name -> option_value_as_string }
    // Section and option names are stored as lowercase.
    data: HashMap<String, HashMap<String, String>>,
    // Section names as written, in the order they first appear in the file.
    order: Vec<String>,
    filename: Option<String>,
}

impl Configfile {
    pub fn new(filename: Option<String>) -> Self {
        Configfile {
            data: HashMap::new(),
            order: Vec::new(),
            filename,
        }
    }

    /// Reads and parses a config file from disk.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let filename = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(filename.clone(), e.to_string()))?;
        let mut cf = Configfile::new(Some(filename));
        cf.parse(&content)?;
        Ok(cf)
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Parses an INI-style configuration string.
    pub fn parse(&mut self, config_content: &str) -> Result<(), ConfigError> {
        self.data.clear();
        self.order.clear();
        let mut current_section_name: Option<String> = None;

        for line_raw in config_content.lines() {
            let line_no_comment = match line_raw.find(['#', ';']) {
                Some(index) => &line_raw[..index],
                None => line_raw,
            };
            let line = line_no_comment.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                // "[tool_endstop   T0]" keeps its inner whitespace normalised to one space
                let display_name = line[1..line.len() - 1]
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ");
                if display_name.is_empty() {
                    return Err(ConfigError::Syntax("Empty section name found".to_string()));
                }
                let section_name = display_name.to_lowercase();
                if !self.data.contains_key(&section_name) {
                    self.order.push(display_name);
                    self.data.insert(section_name.clone(), HashMap::new());
                }
                current_section_name = Some(section_name);
                continue;
            }

            let Some(section_name) = current_section_name.as_ref() else {
                return Err(ConfigError::Syntax(format!("Line outside of section: {}", line_raw)));
            };
            // Accept both "key = value" and "key: value", whichever separator comes first.
            let Some(sep) = line.find(['=', ':']) else {
                return Err(ConfigError::Syntax(format!(
                    "Malformed line in section [{}]: {}",
                    section_name, line_raw
                )));
            };
            let key = line[..sep].trim().to_lowercase();
            let value = line[sep + 1..].trim().to_string();
            if key.is_empty() {
                return Err(ConfigError::Syntax(format!("Empty key found in section [{}]", section_name)));
            }
            if let Some(options) = self.data.get_mut(section_name) {
                options.insert(key, value);
            }
        }
        Ok(())
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.data.contains_key(&section.to_lowercase())
    }

    /// All sections whose name starts with `prefix`, in file order and with
    /// their case as written. The prefix match ignores case.
    pub fn get_prefix_sections(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        self.order
            .iter()
            .filter(|name| name.to_lowercase().starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn get_str(&self, section: &str, option: &str) -> Result<&String, ConfigError> {
        self.data
            .get(&section.to_lowercase())
            .ok_or_else(|| ConfigError::SectionNotFound(section.to_string()))?
            .get(&option.to_lowercase())
            .ok_or_else(|| ConfigError::OptionNotFound(section.to_string(), option.to_string()))
    }

    fn lookup(&self, section: &str, option: &str) -> Result<Option<&String>, ConfigError> {
        match self.get_str(section, option) {
            Ok(s) => Ok(Some(s)),
            Err(ConfigError::OptionNotFound(_, _)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn missing<T>(section: &str, option: &str, default: Option<T>) -> Result<T, ConfigError> {
        default.ok_or_else(|| ConfigError::OptionNotFound(section.to_string(), option.to_string()))
    }

    pub fn get(&self, section: &str, option: &str, default: Option<&str>) -> Result<String, ConfigError> {
        match self.lookup(section, option)? {
            Some(s) => Ok(s.clone()),
            None => Self::missing(section, option, default.map(str::to_string)),
        }
    }

    pub fn getint(
        &self,
        section: &str,
        option: &str,
        default: Option<i64>,
        minval: Option<i64>,
        maxval: Option<i64>,
    ) -> Result<i64, ConfigError> {
        let Some(s_val) = self.lookup(section, option)? else {
            return Self::missing(section, option, default);
        };
        let parsed_val = s_val
            .parse::<i64>()
            .map_err(|_| ConfigError::ParseError(option.to_string(), s_val.clone(), "integer".to_string()))?;
        check_bounds(section, option, parsed_val, minval, maxval)?;
        Ok(parsed_val)
    }

    /// Comma separated list; empty items are dropped.
    pub fn getlist(&self, section: &str, option: &str, default: Option<&[&str]>) -> Result<Vec<String>, ConfigError> {
        let Some(s_val) = self.lookup(section, option)? else {
            let default = default.map(|d| d.iter().map(|s| s.to_string()).collect());
            return Self::missing(section, option, default);
        };
        Ok(s_val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    #[cfg(test)]
    pub fn add_section(&mut self, section_name: &str) {
        let name = section_name.to_lowercase();
        if !self.data.contains_key(&name) {
            self.order.push(section_name.to_string());
            self.data.insert(name, HashMap::new());
        }
    }

    #[cfg(test)]
    pub fn set(&mut self, section: &str, option: &str, value: &str) {
        self.add_section(section);
        if let Some(options) = self.data.get_mut(&section.to_lowercase()) {
            options.insert(option.to_lowercase(), value.to_string());
        }
    }
}

fn check_bounds<T: PartialOrd + std::fmt::Display>(
    section: &str,
    option: &str,
    value: T,
    minval: Option<T>,
    maxval: Option<T>,
) -> Result<(), ConfigError> {
    if let Some(min) = minval {
        if value < min {
            return Err(ConfigError::ValidationError(format!(
                "Option '{}' in section '[{}]' ({}) must be >= {}",
                option, section, value, min
            )));
        }
    }
    if let Some(max) = maxval {
        if value > max {
            return Err(ConfigError::ValidationError(format!(
                "Option '{}' in section '[{}]' ({}) must be <= {}",
                option, section, value, max
            )));
        }
    }
    Ok(())
}

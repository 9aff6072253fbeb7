// src/extras/mod.rs
// Optional printer objects loaded from config sections.

pub mod tool_endstop;

// LOMan - platform/mod.rs
//
// Platform abstraction layer: config files, filesystem, OS processes.
// Dependencies: standard library, directories, toml, glob.
// Must NOT depend on: app.

pub mod config;
pub mod fs;
pub mod process;

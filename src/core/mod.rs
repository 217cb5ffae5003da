// LOMan - core/mod.rs
//
// Core domain layer: tile model, stop signal, name lookup, worker seam,
// line filter, followed-log line assembly.
// Must NOT depend on: app, platform, or perform file/process I/O directly.

pub mod filter;
pub mod lines;
pub mod model;
pub mod naming;
pub mod signal;
pub mod worker;

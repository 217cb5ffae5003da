// LOMan - app/mod.rs
//
// Application layer: tile supervision, admin broadcasts, live tail, and the
// control plane that ties them to the config.
// Dependencies: core, platform, util.

pub mod broadcast;
pub mod console;
pub mod control;
pub mod supervisor;
pub mod tail;

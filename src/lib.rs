//! BLE link coordinator library
//! Brings a central and a peripheral controller up and links them.

pub mod config;
pub mod core;
pub mod logging;

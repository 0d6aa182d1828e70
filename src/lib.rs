//! Bluetooth LE remote control for the Ardubot R4 robot.

pub mod domain;
pub mod infrastructure;
pub mod presentation;

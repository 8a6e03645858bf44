// src/config.rs - Configuration is shared with the device side
pub use marlin_shared::config::*;

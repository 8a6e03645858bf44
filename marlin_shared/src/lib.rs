// marlin_shared: protocol pieces shared by the host side and the virtual device

pub mod config;
pub mod connection;
pub mod gcode_utils;
pub mod reply;

pub use connection::{Connection, ConnectionError, Connector, DataSink};
pub use reply::is_ok_reply;

pub mod virtual_connection;

pub use virtual_connection::{ConnectionStats, VirtualConnection, VirtualConnector};

//! Contract between an executor and the channel to a (simulated) device.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Receives raw reply text as the device produces it. Stands in for a data callback.
pub type DataSink = mpsc::UnboundedSender<String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection is not open")]
    NotOpen,
    #[error("Connection is already open")]
    AlreadyOpen,
    #[error("Connection has been closed")]
    Closed,
    #[error("Device task is no longer running")]
    DeviceGone,
}

/// An open channel to a device.
///
/// Lifecycle: created un-opened, opened once, closed once. A closed connection
/// cannot be reopened; ask the [`Connector`] for a fresh one instead.
#[async_trait]
pub trait Connection: Send {
    /// Completes only once the connection accepts `send`.
    async fn open(&mut self) -> Result<(), ConnectionError>;

    /// Replace the single data sink. The last registration wins.
    fn set_data_sink(&mut self, sink: DataSink);

    async fn send(&mut self, command: &str) -> Result<(), ConnectionError>;

    /// Release resources. No sink is invoked after this returns.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Creates connections within some application context.
pub trait Connector: Send + Sync {
    type Connection: Connection;

    fn connect(&self) -> Self::Connection;
}

//! Executors bridge a host command queue and a device connection.
//!
//! An executor forwards commands, counts them, and exposes the reply
//! validator the host uses to decide when a command has completed.

mod virtual_executor;

use async_trait::async_trait;
use marlin_shared::{ConnectionError, DataSink};
use thiserror::Error;
use tokio::sync::oneshot;

pub use virtual_executor::{ExecutorState, MarlinExecutor, OpenLink, VirtualExecutor};

/// Fired by executors that know a command produces no reply.
pub type DoneSignal = oneshot::Sender<bool>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor is not open")]
    NotOpen,
    #[error("Executor is already open; close it first")]
    AlreadyOpen,
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Reply to '{0}' ended before an ok was seen")]
    ReplyDropped(String),
}

#[async_trait]
pub trait Executor: Send {
    /// Resolves once the connection accepts commands.
    async fn open(&mut self) -> Result<(), ExecutorError>;

    async fn close(&mut self) -> Result<(), ExecutorError>;

    /// Register `on_data` as the reply sink and send `command`.
    ///
    /// Completion is not decided here; feed the accumulated reply to
    /// [`Executor::validator`]. `on_done` is for executors that can tell a
    /// command will never answer.
    async fn execute(
        &mut self,
        command: &str,
        on_data: DataSink,
        on_done: Option<DoneSignal>,
    ) -> Result<(), ExecutorError>;

    /// `Some(count)` while open, `None` while closed.
    fn commands_processed(&self) -> Option<u64>;

    fn validator(command: &str, reply: &str) -> bool
    where
        Self: Sized;
}

/// Marlin completion check; `command` does not influence the result.
pub fn validate_reply(_command: &str, reply: &str) -> bool {
    marlin_shared::is_ok_reply(reply)
}

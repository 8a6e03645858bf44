//! Virtual Marlin: a software stand-in for a Marlin-driven motion controller.
//!
//! The [`executor`] forwards host commands to a simulated connection and
//! classifies replies as complete once the last line carries `ok`.

pub mod command_queue;
pub mod communication;
pub mod config;
pub mod executor;
pub mod simulator;

pub use command_queue::{CommandQueue, CommandQueueError, RunSummary};
pub use communication::{VirtualConnection, VirtualConnector};
pub use executor::{Executor, ExecutorError, MarlinExecutor, VirtualExecutor, validate_reply};

use async_trait::async_trait;
use marlin_shared::config::DeviceConfig;
use marlin_shared::{Connection, Connector, DataSink};
use tokio::sync::mpsc;

use super::{DoneSignal, Executor, ExecutorError, validate_reply};
use crate::communication::VirtualConnector;

/// Executor wired to the in-process Marlin simulation.
pub type MarlinExecutor = VirtualExecutor<VirtualConnector>;

/// Lifecycle of an executor. The processed count only exists while open.
#[derive(Debug)]
pub enum ExecutorState<C> {
    Closed,
    Open(OpenLink<C>),
}

#[derive(Debug)]
pub struct OpenLink<C> {
    connection: C,
    commands_processed: u64,
    pending: Option<PendingRequest>,
}

impl<C> OpenLink<C> {
    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed
    }

    /// A request whose reply has not been fully read yet.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Single-slot correlation between one in-flight command and its reply.
#[derive(Debug)]
struct PendingRequest {
    command: String,
    replies: mpsc::UnboundedReceiver<String>,
    buffer: String,
}

impl PendingRequest {
    fn new(command: &str, replies: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            command: command.to_string(),
            replies,
            buffer: String::new(),
        }
    }

    /// Accumulate chunks until the reply validates. Safe to cancel and call again.
    async fn wait(&mut self) -> Result<String, ExecutorError> {
        while let Some(chunk) = self.replies.recv().await {
            self.buffer.push_str(&chunk);
            if reply_complete(&self.command, &self.buffer) {
                return Ok(std::mem::take(&mut self.buffer));
            }
        }
        Err(ExecutorError::ReplyDropped(self.command.clone()))
    }
}

/// The validator alone accepts a partial `ok T:` line, so also require a terminated last line.
fn reply_complete(command: &str, buffer: &str) -> bool {
    buffer.ends_with('\n') && validate_reply(command, buffer)
}

/// Executor for simulated devices. Each `open` asks the connector for a fresh connection.
pub struct VirtualExecutor<K: Connector> {
    connector: K,
    state: ExecutorState<K::Connection>,
}

impl MarlinExecutor {
    pub fn from_config(config: DeviceConfig) -> Self {
        Self::new(VirtualConnector::new(config))
    }
}

impl<K: Connector + 'static> VirtualExecutor<K> {
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            state: ExecutorState::Closed,
        }
    }

    pub fn state(&self) -> &ExecutorState<K::Connection> {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ExecutorState::Open(_))
    }

    pub fn connection(&self) -> Option<&K::Connection> {
        match &self.state {
            ExecutorState::Open(link) => Some(link.connection()),
            ExecutorState::Closed => None,
        }
    }

    /// Send `command` and wait for its complete reply.
    ///
    /// If an earlier request was abandoned before its reply finished, that
    /// reply is read and discarded first so it cannot be mistaken for this one.
    /// There is no timeout here; wrap the call if the device may never answer.
    pub async fn request(&mut self, command: &str) -> Result<String, ExecutorError> {
        self.settle_pending().await?;

        let link = self.link_mut()?;
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        link.connection.set_data_sink(reply_tx);
        // Track the request before sending so a cancelled call still leaves a record.
        let pending = link.pending.insert(PendingRequest::new(command, reply_rx));
        if let Err(e) = link.connection.send(command).await {
            link.pending = None;
            return Err(e.into());
        }
        link.commands_processed += 1;
        tracing::debug!("Requested '{}' (#{})", command.trim_end(), link.commands_processed);

        let result = pending.wait().await;
        link.pending = None;
        result
    }

    async fn settle_pending(&mut self) -> Result<(), ExecutorError> {
        let link = self.link_mut()?;
        if let Some(pending) = link.pending.as_mut() {
            tracing::warn!("Waiting out the reply to abandoned command '{}'", pending.command);
            match pending.wait().await {
                Ok(reply) => tracing::debug!("Discarded stale reply {:?}", reply),
                Err(e) => tracing::debug!("Stale reply never completed: {}", e),
            }
            link.pending = None;
        }
        Ok(())
    }

    fn link_mut(&mut self) -> Result<&mut OpenLink<K::Connection>, ExecutorError> {
        match &mut self.state {
            ExecutorState::Open(link) => Ok(link),
            ExecutorState::Closed => Err(ExecutorError::NotOpen),
        }
    }
}

#[async_trait]
impl<K: Connector + 'static> Executor for VirtualExecutor<K> {
    async fn open(&mut self) -> Result<(), ExecutorError> {
        if self.is_open() {
            return Err(ExecutorError::AlreadyOpen);
        }
        let mut connection = self.connector.connect();
        connection.open().await?;
        self.state = ExecutorState::Open(OpenLink {
            connection,
            commands_processed: 0,
            pending: None,
        });
        tracing::info!("Executor open");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        match std::mem::replace(&mut self.state, ExecutorState::Closed) {
            ExecutorState::Open(mut link) => {
                link.connection.close().await?;
                tracing::info!("Executor closed after {} commands", link.commands_processed);
                Ok(())
            }
            ExecutorState::Closed => Err(ExecutorError::NotOpen),
        }
    }

    /// `on_done` is dropped unfired: every simulated command answers with data.
    async fn execute(
        &mut self,
        command: &str,
        on_data: DataSink,
        _on_done: Option<DoneSignal>,
    ) -> Result<(), ExecutorError> {
        let link = self.link_mut()?;
        if let Some(stale) = link.pending.take() {
            tracing::debug!("Dropping unfinished reply to '{}'", stale.command);
        }
        link.connection.set_data_sink(on_data);
        link.connection.send(command).await?;
        link.commands_processed += 1;
        tracing::debug!("Executed '{}' (#{})", command.trim_end(), link.commands_processed);
        Ok(())
    }

    fn commands_processed(&self) -> Option<u64> {
        match &self.state {
            ExecutorState::Open(link) => Some(link.commands_processed),
            ExecutorState::Closed => None,
        }
    }

    fn validator(command: &str, reply: &str) -> bool {
        validate_reply(command, reply)
    }
}

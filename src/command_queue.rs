//! Host-side command queue.
//!
//! Feeds commands one at a time through an executor, waiting for each
//! reply to validate before sending the next. Timeouts and retries live
//! here, not in the executor.

use marlin_shared::Connector;
use marlin_shared::config::HostConfig;
use marlin_shared::gcode_utils::{parse_command_line, with_checksum};
use marlin_shared::reply::resend_request;
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::time::{Instant, timeout};

use crate::executor::{Executor, ExecutorError, VirtualExecutor};

#[derive(Debug, Error)]
pub enum CommandQueueError {
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
    #[error("Executor did not open within {0} ms")]
    OpenTimeout(u64),
    #[error("No complete reply to '{command}' after {attempts} attempt(s)")]
    Timeout { command: String, attempts: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    /// The line actually written, including any line number and checksum.
    pub sent: String,
    pub reply: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Line the device asked to have resent; the reply still ended in `ok`.
    pub resend: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<CommandOutcome>,
    pub commands_processed: u64,
}

#[derive(Debug)]
pub struct CommandQueue {
    commands: VecDeque<String>,
    config: HostConfig,
    next_line: u32,
}

impl CommandQueue {
    pub fn new(config: HostConfig) -> Self {
        Self {
            commands: VecDeque::new(),
            config,
            next_line: 1,
        }
    }

    pub fn enqueue(&mut self, command: impl Into<String>) {
        self.commands.push_back(command.into());
    }

    /// Queue every line of a G-code program that carries a command. Returns how many were queued.
    pub fn enqueue_program(&mut self, program: &str) -> usize {
        let before = self.commands.len();
        for line in program.lines() {
            let parsed = parse_command_line(line);
            if !parsed.is_blank() {
                self.commands.push_back(parsed.body.to_string());
            }
        }
        self.commands.len() - before
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Open the executor, send everything queued, and close it again.
    ///
    /// The executor is closed even when a command fails.
    pub async fn run<K: Connector + 'static>(
        &mut self,
        executor: &mut VirtualExecutor<K>,
    ) -> Result<RunSummary, CommandQueueError> {
        let opened = timeout(self.config.open_timeout(), executor.open()).await;
        match opened {
            Ok(result) => result?,
            Err(_) => return Err(CommandQueueError::OpenTimeout(self.config.open_timeout_ms)),
        }

        let drained = self.drain(executor).await;
        let processed = executor.commands_processed().unwrap_or(0);
        let closed = executor.close().await;

        let mut summary = drained?;
        closed?;
        summary.commands_processed = processed;
        tracing::info!("Run finished: {} commands processed", processed);
        Ok(summary)
    }

    async fn drain<K: Connector + 'static>(
        &mut self,
        executor: &mut VirtualExecutor<K>,
    ) -> Result<RunSummary, CommandQueueError> {
        let mut summary = RunSummary::default();
        if self.config.line_numbers {
            let reset = with_checksum(0, "M110");
            summary.outcomes.push(self.send_with_retries(executor, "M110", reset).await?);
            self.next_line = 1;
        }
        while let Some(command) = self.commands.pop_front() {
            let sent = self.frame(&command);
            summary.outcomes.push(self.send_with_retries(executor, &command, sent).await?);
        }
        Ok(summary)
    }

    fn frame(&mut self, command: &str) -> String {
        if !self.config.line_numbers {
            return command.to_string();
        }
        let framed = with_checksum(self.next_line, command);
        self.next_line += 1;
        framed
    }

    async fn send_with_retries<K: Connector + 'static>(
        &self,
        executor: &mut VirtualExecutor<K>,
        command: &str,
        sent: String,
    ) -> Result<CommandOutcome, CommandQueueError> {
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let attempt = timeout(self.config.command_timeout(), executor.request(&sent)).await;
            match attempt {
                Ok(reply) => {
                    let reply = reply?;
                    let resend = resend_request(&reply);
                    match resend {
                        Some(line) => tracing::warn!(
                            "'{}' was answered with a resend request for line {} after {} attempt(s)",
                            sent,
                            line,
                            attempts
                        ),
                        None => tracing::debug!("'{}' completed after {} attempt(s)", command, attempts),
                    }
                    return Ok(CommandOutcome {
                        command: command.to_string(),
                        sent,
                        reply,
                        attempts,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        resend,
                    });
                }
                Err(_) if attempts <= self.config.max_retries => {
                    tracing::warn!(
                        "No reply to '{}' within {} ms, retrying ({}/{})",
                        command,
                        self.config.command_timeout_ms,
                        attempts,
                        self.config.max_retries
                    );
                }
                Err(_) => {
                    tracing::error!("Giving up on '{}' after {} attempt(s)", command, attempts);
                    return Err(CommandQueueError::Timeout {
                        command: command.to_string(),
                        attempts,
                    });
                }
            }
        }
    }
}

// src/communication/virtual_connection.rs - In-process stand-in for a serial link to Marlin
use async_trait::async_trait;
use marlin_shared::config::DeviceConfig;
use marlin_shared::{Connection, ConnectionError, Connector, DataSink};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::simulator::MarlinDevice;

/// Connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub commands_sent: u64,
    pub bytes_sent: u64,
    pub chunks_emitted: u64,
    pub bytes_emitted: u64,
    /// Chunks produced while no data sink was registered, or whose sink was gone.
    pub chunks_dropped: u64,
}

/// Lock-free counters shared with the device task, so `send` never awaits after enqueueing.
#[derive(Debug, Default)]
struct StatsCounters {
    commands_sent: AtomicU64,
    bytes_sent: AtomicU64,
    chunks_emitted: AtomicU64,
    bytes_emitted: AtomicU64,
    chunks_dropped: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            bytes_emitted: self.bytes_emitted.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
        }
    }
}

enum LinkState {
    Idle,
    Open {
        command_tx: mpsc::UnboundedSender<String>,
        device_task: JoinHandle<()>,
    },
    Closed,
}

/// A simulated channel to a Marlin device running in a background tokio task.
pub struct VirtualConnection {
    config: DeviceConfig,
    state: LinkState,
    /// Single data-sink slot; the device task reads whatever is current when it emits.
    sink_tx: watch::Sender<Option<DataSink>>,
    stats: Arc<StatsCounters>,
}

impl VirtualConnection {
    pub fn new(config: DeviceConfig) -> Self {
        let (sink_tx, _) = watch::channel(None);
        Self {
            config,
            state: LinkState::Idle,
            sink_tx,
            stats: Arc::new(StatsCounters::default()),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, LinkState::Open { .. })
    }

    /// Get connection statistics
    pub fn stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }
}

#[async_trait]
impl Connection for VirtualConnection {
    async fn open(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            LinkState::Idle => {}
            LinkState::Open { .. } => return Err(ConnectionError::AlreadyOpen),
            LinkState::Closed => return Err(ConnectionError::Closed),
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel::<String>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = DeviceTask {
            device: MarlinDevice::new(self.config.clone()),
            timing: ReplyTiming::from_config(&self.config),
            sink_rx: self.sink_tx.subscribe(),
            stats: self.stats.clone(),
        };
        let device_task = tokio::spawn(task.run(command_rx, ready_tx));

        // The device only takes commands once it has reported ready.
        if ready_rx.await.is_err() {
            device_task.abort();
            self.state = LinkState::Closed;
            return Err(ConnectionError::DeviceGone);
        }
        tracing::info!("Virtual {} connection open", self.config.firmware_name);
        self.state = LinkState::Open { command_tx, device_task };
        Ok(())
    }

    fn set_data_sink(&mut self, sink: DataSink) {
        self.sink_tx.send_replace(Some(sink));
    }

    /// Completes without awaiting: once the command is queued for the device, this returns.
    async fn send(&mut self, command: &str) -> Result<(), ConnectionError> {
        let command_tx = match &self.state {
            LinkState::Open { command_tx, .. } => command_tx,
            LinkState::Idle => return Err(ConnectionError::NotOpen),
            LinkState::Closed => return Err(ConnectionError::Closed),
        };
        tracing::debug!("Virtual TX: {}", command.trim_end());
        command_tx
            .send(command.to_string())
            .map_err(|_| ConnectionError::DeviceGone)?;

        self.stats.commands_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_sent
            .fetch_add(command.len() as u64 + 1, Ordering::Relaxed); // +1 for newline
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        match std::mem::replace(&mut self.state, LinkState::Closed) {
            LinkState::Open { command_tx, device_task } => {
                // Clear the slot first so nothing reaches a sink once we return.
                self.sink_tx.send_replace(None);
                drop(command_tx);
                device_task.abort();
                let _ = device_task.await;
                tracing::info!("Virtual {} connection closed", self.config.firmware_name);
                Ok(())
            }
            LinkState::Idle => {
                self.state = LinkState::Idle;
                Err(ConnectionError::NotOpen)
            }
            LinkState::Closed => Err(ConnectionError::Closed),
        }
    }
}

impl std::fmt::Debug for VirtualConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualConnection")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Creates virtual connections that share one device configuration.
#[derive(Debug, Clone)]
pub struct VirtualConnector {
    config: Arc<DeviceConfig>,
}

impl VirtualConnector {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config: Arc::new(config) }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

impl Connector for VirtualConnector {
    type Connection = VirtualConnection;

    fn connect(&self) -> VirtualConnection {
        VirtualConnection::new(self.config.as_ref().clone())
    }
}

#[derive(Debug, Clone)]
struct ReplyTiming {
    open_delay: Duration,
    response_delay: Duration,
    jitter_ms: u64,
    chunk_size: usize,
    line_ending: &'static str,
}

impl ReplyTiming {
    fn from_config(config: &DeviceConfig) -> Self {
        Self {
            open_delay: config.open_delay(),
            response_delay: config.response_delay(),
            jitter_ms: config.response_jitter_ms,
            chunk_size: config.chunk_size,
            line_ending: config.line_ending.as_str(),
        }
    }

    fn next_delay(&self) -> Duration {
        if self.jitter_ms == 0 {
            return self.response_delay;
        }
        let extra = rand::rng().random_range(0..=self.jitter_ms);
        self.response_delay + Duration::from_millis(extra)
    }
}

struct DeviceTask {
    device: MarlinDevice,
    timing: ReplyTiming,
    sink_rx: watch::Receiver<Option<DataSink>>,
    stats: Arc<StatsCounters>,
}

impl DeviceTask {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<String>, ready_tx: oneshot::Sender<()>) {
        if !self.timing.open_delay.is_zero() {
            tokio::time::sleep(self.timing.open_delay).await;
        }
        if ready_tx.send(()).is_err() {
            return;
        }

        while let Some(command) = command_rx.recv().await {
            let lines = self.device.respond(&command);
            if lines.is_empty() {
                continue;
            }
            let delay = self.timing.next_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let payload = format_reply(&lines, self.timing.line_ending);
            for chunk in split_chunks(&payload, self.timing.chunk_size) {
                self.emit(chunk);
            }
        }
        tracing::debug!("Virtual device task terminated");
    }

    fn emit(&self, chunk: String) {
        tracing::debug!("Virtual RX: {:?}", chunk);
        let sink = self.sink_rx.borrow().clone();
        let len = chunk.len() as u64;
        let delivered = match sink {
            Some(sink) => sink.send(chunk).is_ok(),
            None => false,
        };
        if delivered {
            self.stats.chunks_emitted.fetch_add(1, Ordering::Relaxed);
            self.stats.bytes_emitted.fetch_add(len, Ordering::Relaxed);
        } else {
            self.stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn format_reply(lines: &[String], line_ending: &str) -> String {
    let mut payload = String::new();
    for line in lines {
        payload.push_str(line);
        payload.push_str(line_ending);
    }
    payload
}

/// Split on char boundaries into pieces of at most `size` bytes (0 = no split).
fn split_chunks(payload: &str, size: usize) -> Vec<String> {
    if size == 0 || payload.len() <= size {
        return vec![payload.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in payload.chars() {
        if !current.is_empty() && current.len() + ch.len_utf8() > size {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// Executor lifecycle, counting, and reply routing against the virtual device

use marlin_shared::config::DeviceConfig;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_test::{assert_err, assert_ok};
use virtual_marlin::MarlinExecutor;
use virtual_marlin::executor::{Executor, ExecutorError, ExecutorState};

fn executor_with_delay(response_delay_ms: u64) -> MarlinExecutor {
    let mut config = DeviceConfig::default();
    config.response_delay_ms = response_delay_ms;
    MarlinExecutor::from_config(config)
}

async fn read_reply(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    let mut reply = String::new();
    while let Some(chunk) = rx.recv().await {
        reply.push_str(&chunk);
        if MarlinExecutor::validator("", &reply) {
            break;
        }
    }
    reply
}

#[tokio::test]
async fn test_processed_count_follows_lifecycle() {
    let mut executor = MarlinExecutor::from_config(DeviceConfig::default());
    assert_eq!(executor.commands_processed(), None);

    assert_ok!(executor.open().await);
    assert_eq!(executor.commands_processed(), Some(0));

    for command in ["G28", "G1 X10", "M105"] {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_ok!(executor.execute(command, tx, None).await);
    }
    assert_eq!(executor.commands_processed(), Some(3));

    assert_ok!(executor.close().await);
    assert_eq!(executor.commands_processed(), None);
}

#[tokio::test]
async fn test_closed_executor_rejects_execute_and_close() {
    let mut executor = MarlinExecutor::from_config(DeviceConfig::default());
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = executor.execute("G28", tx, None).await.unwrap_err();
    assert!(matches!(err, ExecutorError::NotOpen));

    let err = executor.close().await.unwrap_err();
    assert!(matches!(err, ExecutorError::NotOpen));

    let err = executor.request("M105").await.unwrap_err();
    assert!(matches!(err, ExecutorError::NotOpen));
    assert_eq!(executor.commands_processed(), None);
}

#[tokio::test]
async fn test_open_twice_is_rejected() {
    let mut executor = MarlinExecutor::from_config(DeviceConfig::default());
    assert_ok!(executor.open().await);
    let (tx, _rx) = mpsc::unbounded_channel();
    assert_ok!(executor.execute("G28", tx, None).await);

    let err = executor.open().await.unwrap_err();
    assert!(matches!(err, ExecutorError::AlreadyOpen));
    assert_eq!(executor.commands_processed(), Some(1));
    assert_ok!(executor.close().await);
}

#[tokio::test]
async fn test_reopen_uses_a_fresh_connection() {
    let mut executor = MarlinExecutor::from_config(DeviceConfig::default());
    assert_ok!(executor.open().await);
    assert_ok!(executor.request("G28").await);
    assert_ok!(executor.close().await);

    assert_ok!(executor.open().await);
    assert_eq!(executor.commands_processed(), Some(0));
    let reply = executor.request("M105").await.unwrap();
    assert!(reply.starts_with("ok T:21.00"));
    assert_ok!(executor.close().await);
}

#[tokio::test(start_paused = true)]
async fn test_open_completes_only_when_device_is_ready() {
    let mut config = DeviceConfig::default();
    config.open_delay_ms = 500;
    let mut executor = MarlinExecutor::from_config(config);

    let started = tokio::time::Instant::now();
    assert_ok!(executor.open().await);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_ok!(executor.request("M400").await);
}

#[tokio::test]
async fn test_execute_routes_reply_to_sink() {
    let mut executor = MarlinExecutor::from_config(DeviceConfig::default());
    assert_ok!(executor.open().await);

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert_ok!(executor.execute("G28", tx, None).await);
    assert_eq!(read_reply(&mut rx).await, "echo:busy: processing\nok\n");
    assert_ok!(executor.close().await);
}

#[tokio::test(start_paused = true)]
async fn test_second_execute_receives_first_commands_late_reply() {
    let mut executor = executor_with_delay(50);
    assert_ok!(executor.open().await);

    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();
    assert_ok!(executor.execute("G28", first_tx, None).await);
    assert_ok!(executor.execute("M105", second_tx, None).await);

    // Both replies land on the latest registration, in send order.
    assert_eq!(read_reply(&mut second_rx).await, "echo:busy: processing\nok\n");
    assert!(read_reply(&mut second_rx).await.starts_with("ok T:"));
    assert!(first_rx.recv().await.is_none());
    assert_ok!(executor.close().await);
}

#[tokio::test]
async fn test_done_signal_is_never_fired() {
    let mut executor = MarlinExecutor::from_config(DeviceConfig::default());
    assert_ok!(executor.open().await);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    assert_ok!(executor.execute("G1 X5", tx, Some(done_tx)).await);
    assert_eq!(read_reply(&mut rx).await, "ok\n");
    assert_err!(done_rx.await);
    assert_ok!(executor.close().await);
}

#[tokio::test]
async fn test_request_collects_chunked_crlf_reply() {
    let mut config = DeviceConfig::default();
    config.chunk_size = 5;
    config.line_ending = marlin_shared::config::LineEnding::Crlf;
    let mut executor = MarlinExecutor::from_config(config);
    assert_ok!(executor.open().await);

    let reply = executor.request("M114").await.unwrap();
    assert_eq!(reply, "X:0.00 Y:0.00 Z:0.00 E:0.00 Count X:0 Y:0 Z:0\r\nok\r\n");
    assert_eq!(executor.commands_processed(), Some(1));
    assert_ok!(executor.close().await);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_request_reply_is_not_returned_to_next_request() {
    let mut executor = executor_with_delay(50);
    assert_ok!(executor.open().await);

    let abandoned = tokio::time::timeout(Duration::from_millis(10), executor.request("M114")).await;
    assert!(abandoned.is_err());
    match executor.state() {
        ExecutorState::Open(link) => assert!(link.has_pending()),
        ExecutorState::Closed => panic!("executor should still be open"),
    }

    let reply = executor.request("M105").await.unwrap();
    assert!(reply.starts_with("ok T:21.00"), "got {:?}", reply);
    assert_eq!(executor.commands_processed(), Some(2));
    match executor.state() {
        ExecutorState::Open(link) => assert!(!link.has_pending()),
        ExecutorState::Closed => panic!("executor should still be open"),
    }
    assert_ok!(executor.close().await);
}

#[tokio::test]
async fn test_connection_stats_track_sent_commands() {
    let mut executor = MarlinExecutor::from_config(DeviceConfig::default());
    assert_ok!(executor.open().await);
    assert_ok!(executor.request("G28").await);
    assert_ok!(executor.request("M105").await);

    let stats = executor.connection().unwrap().stats();
    assert_eq!(stats.commands_sent, 2);
    assert_eq!(stats.bytes_sent, ("G28".len() + 1 + "M105".len() + 1) as u64);
    assert!(stats.chunks_emitted >= 2);
    assert_ok!(executor.close().await);
}

fn chunked_executor(chunk_size: usize) -> MarlinExecutor {
    let mut config = DeviceConfig::default();
    config.chunk_size = chunk_size;
    MarlinExecutor::from_config(config)
}

#[tokio::test]
async fn test_chunked_temperature_reply_is_returned_whole() {
    let mut executor = chunked_executor(5);
    assert_ok!(executor.open().await);

    let reply = executor.request("M105").await.unwrap();
    assert_eq!(reply, "ok T:21.00 /0.00 B:21.00 /0.00 @:0 B@:0\n");
    let reply = executor.request("G1 X1").await.unwrap();
    assert_eq!(reply, "ok\n");
    assert_eq!(executor.commands_processed(), Some(2));
    assert_ok!(executor.close().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chunked_replies_never_reach_the_next_request() {
    let mut executor = chunked_executor(5);
    assert_ok!(executor.open().await);

    for _ in 0..200 {
        let reply = executor.request("M105").await.unwrap();
        assert_eq!(reply, "ok T:21.00 /0.00 B:21.00 /0.00 @:0 B@:0\n");
        let reply = executor.request("G1 X1").await.unwrap();
        assert_eq!(reply, "ok\n");
    }
    assert_eq!(executor.commands_processed(), Some(400));
    assert_ok!(executor.close().await);
}

#[tokio::test]
async fn test_request_cancelled_while_waiting_still_counts_the_command() {
    let mut executor = executor_with_delay(1_000);
    assert_ok!(executor.open().await);

    let cancelled = tokio::time::timeout(Duration::ZERO, executor.request("G28")).await;
    assert!(cancelled.is_err());
    assert_eq!(executor.commands_processed(), Some(1));
    assert_eq!(executor.connection().unwrap().stats().commands_sent, 1);
    assert_ok!(executor.close().await);
}

// Reply validation: Marlin "ok" framing

use virtual_marlin::executor::Executor;
use virtual_marlin::{MarlinExecutor, validate_reply};

fn validate(reply: &str) -> bool {
    MarlinExecutor::validator("G28", reply)
}

#[test]
fn test_last_line_with_ok_completes() {
    assert!(validate("ok"));
    assert!(validate("T:200 ok"));
    assert!(validate("echo:busy: processing\nok\n"));
    assert!(validate("X:0.00 Y:0.00 Z:0.00 E:0.00 Count X:0 Y:0 Z:0\nok"));
}

#[test]
fn test_last_line_without_ok_is_incomplete() {
    assert!(!validate("busy"));
    assert!(!validate("ok\necho:busy: processing\n"));
    assert!(!validate("OK"));
}

#[test]
fn test_empty_reply_is_incomplete() {
    assert!(!validate(""));
    assert!(!validate("\n"));
    assert!(!validate("\r\n\r\n"));
}

#[test]
fn test_crlf_line_endings_are_tolerated() {
    assert!(validate("ok\r\n"));
    assert!(validate("T:21.00 /0.00\r\nok\r\n"));
}

#[test]
fn test_partial_line_is_the_last_line() {
    assert!(!validate("T:21.0"));
    assert!(validate("T:21.0\nok"));
    assert!(!validate("ok\nT:21"));
    assert!(!validate("T:21.0\no"));
}

#[test]
fn test_substring_match_is_loose_on_purpose() {
    assert!(validate("not ok yet"));
    assert!(validate("okay"));
    assert!(validate("echo:Unknown command: \"Xok\""));
}

#[test]
fn test_command_does_not_influence_validation() {
    for command in ["G28", "M105", "", "garbage"] {
        assert!(validate_reply(command, "ok\n"));
        assert!(!validate_reply(command, "wait\n"));
    }
}

//! Scenario tests against a real Docker daemon
//!
//! Run with `cargo test -- --ignored` on a host where `docker` works.

use std::time::{Duration, Instant};

use gomoku_sandbox::fallback::{resolve_move, Move, MoveSource};
use gomoku_sandbox::{BrokerConfig, SandboxBroker, Verdict};

fn broker() -> SandboxBroker {
    SandboxBroker::from_config(BrokerConfig::default())
}

fn leftover_containers() -> usize {
    let output = std::process::Command::new("docker")
        .args(["ps", "-a", "--filter", "name=gomoku-sandbox-", "--format", "{{.Names}}"])
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).lines().count()
}

#[tokio::test]
#[ignore]
async fn test_hello_world() {
    let result = broker()
        .execute_untrusted(include_str!("../test-codes/01_hello.py"))
        .await;
    assert!(result.success, "{}", result.output);
    assert_eq!(result.output, "Hello, World!\n");
}

#[tokio::test]
#[ignore]
async fn test_zero_division() {
    let result = broker()
        .execute_untrusted(include_str!("../test-codes/02_zero_division.py"))
        .await;
    assert!(!result.success);
    assert!(result.output.contains("ZeroDivisionError"), "{}", result.output);
}

#[tokio::test]
#[ignore]
async fn test_infinite_loop_times_out() {
    let broker = broker();
    let started = Instant::now();
    let report = broker
        .execute_report(include_str!("../test-codes/03_infinite_loop.py"), broker.limits())
        .await;

    assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
    assert!(report.output.contains("timed out"));
    // Image already present: limit plus teardown overhead
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
#[ignore]
async fn test_network_is_blocked() {
    let result = broker()
        .execute_untrusted(include_str!("../test-codes/04_network_escape.py"))
        .await;
    assert!(result.success, "{}", result.output);
    assert!(result.output.contains("blocked"), "{}", result.output);
}

#[tokio::test]
#[ignore]
async fn test_memory_ceiling() {
    let result = broker()
        .execute_untrusted(include_str!("../test-codes/05_memory_hog.py"))
        .await;
    assert!(!result.success);
}

#[tokio::test]
#[ignore]
async fn test_filesystem_is_read_only() {
    let result = broker()
        .execute_untrusted(include_str!("../test-codes/06_filesystem_escape.py"))
        .await;
    assert!(result.success, "{}", result.output);
    assert!(result.output.contains("read-only"), "{}", result.output);
    assert!(!result.output.contains("uid 0\n"));
}

#[tokio::test]
#[ignore]
async fn test_move_round_trip_and_cleanup() {
    let broker = broker();
    for _ in 0..3 {
        let result = broker
            .execute_untrusted(include_str!("../test-codes/07_move.py"))
            .await;
        let (mv, source) = resolve_move(&result, || Move { row: 7, col: 7 });
        assert_eq!(source, MoveSource::Sandbox);
        assert_eq!(mv, Move { row: 7, col: 8 });
    }
    assert_eq!(leftover_containers(), 0);
}

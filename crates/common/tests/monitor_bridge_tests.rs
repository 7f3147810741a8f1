//! Monitor Bridge Integration Tests
//!
//! Tests for the async channel bridge between callers and the monitor thread.
//!
//! # Test Scenarios
//! - Channel creation and basic communication
//! - Find command flow with filters
//! - Shutdown ordering
//! - Blocking senders from plain threads
//! - Concurrent callers
//!
//! Run with: `cargo test -p common --test monitor_bridge_tests`

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, create_mock_descriptor, create_mock_descriptor_list, with_timeout,
};
use common::{MonitorCommand, create_monitor_bridge};
use descriptor::DeviceFilter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use tokio::sync::oneshot;

// ============================================================================
// Bridge Creation Tests
// ============================================================================

#[test]
fn test_create_monitor_bridge() {
    let (bridge, worker) = create_monitor_bridge();
    assert!(!bridge.is_closed());
    drop(worker);
    assert!(bridge.is_closed());
}

#[tokio::test]
async fn test_bridge_channels_are_connected() {
    let (bridge, worker) = create_monitor_bridge();

    let handle = thread::spawn(move || {
        if let Ok(MonitorCommand::Find { response, .. }) = worker.recv_command() {
            let _ = response.send(create_mock_descriptor_list(3));
        }
    });

    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(MonitorCommand::Find {
            filter: DeviceFilter::any(),
            response: tx,
        })
        .await
        .expect("Failed to send command");

    let devices = with_timeout(DEFAULT_TEST_TIMEOUT, rx)
        .await
        .expect("Timed out")
        .expect("Failed to receive response");
    assert_eq!(devices.len(), 3);

    handle.join().expect("Worker thread panicked");
}

// ============================================================================
// MonitorCommand Message Flow Tests
// ============================================================================

#[tokio::test]
async fn test_find_command_carries_filter() {
    let (bridge, worker) = create_monitor_bridge();

    let handle = thread::spawn(move || {
        let cmd = worker.recv_command().expect("Failed to receive command");
        if let MonitorCommand::Find { filter, response } = cmd {
            let matching: Vec<_> = create_mock_descriptor_list(5)
                .into_iter()
                .chain([create_mock_descriptor(9, 0x16c0, 0x0483)])
                .filter(|d| filter.matches(d))
                .collect();
            response.send(matching).expect("Failed to send response");
            true
        } else {
            false
        }
    });

    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(MonitorCommand::Find {
            filter: DeviceFilter::vendor(0x16c0),
            response: tx,
        })
        .await
        .expect("Failed to send command");

    let devices = rx.await.expect("Failed to receive devices");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].product_id, 0x0483);

    assert!(handle.join().unwrap());
}

#[tokio::test]
async fn test_shutdown_is_delivered_after_pending_commands() {
    let (bridge, worker) = create_monitor_bridge();

    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(MonitorCommand::Find {
            filter: DeviceFilter::any(),
            response: tx,
        })
        .await
        .unwrap();
    bridge.send_command(MonitorCommand::Shutdown).await.unwrap();

    let handle = thread::spawn(move || {
        let mut handled = 0;
        while let Some(cmd) = worker.try_recv_command() {
            match cmd {
                MonitorCommand::Find { response, .. } => {
                    let _ = response.send(Vec::new());
                    handled += 1;
                }
                MonitorCommand::Shutdown => break,
            }
        }
        handled
    });

    assert!(rx.await.unwrap().is_empty());
    assert_eq!(handle.join().unwrap(), 1);
}

#[test]
fn test_blocking_send_from_plain_thread() {
    let (bridge, worker) = create_monitor_bridge();

    let sender = thread::spawn(move || bridge.send_command_blocking(MonitorCommand::Shutdown));

    assert!(sender.join().unwrap().is_ok());
    assert!(matches!(
        worker.recv_command(),
        Ok(MonitorCommand::Shutdown)
    ));
}

#[test]
fn test_send_fails_once_worker_is_gone() {
    let (bridge, worker) = create_monitor_bridge();
    drop(worker);

    let result = bridge.send_command_blocking(MonitorCommand::Shutdown);
    assert!(matches!(result, Err(common::Error::Channel(_))));
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_callers_all_answered() {
    let (bridge, worker) = create_monitor_bridge();
    let served = Arc::new(AtomicU32::new(0));

    let worker_handle = {
        let served = served.clone();
        thread::spawn(move || {
            loop {
                match worker.recv_command() {
                    Ok(MonitorCommand::Find { response, .. }) => {
                        served.fetch_add(1, Ordering::SeqCst);
                        let _ = response.send(create_mock_descriptor_list(2));
                    }
                    Ok(MonitorCommand::Shutdown) | Err(_) => break,
                }
            }
        })
    };

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let bridge = bridge.clone();
        tasks.push(tokio::spawn(async move {
            let (tx, rx) = oneshot::channel();
            bridge
                .send_command(MonitorCommand::Find {
                    filter: DeviceFilter::any(),
                    response: tx,
                })
                .await
                .unwrap();
            rx.await.unwrap().len()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), 2);
    }

    bridge.send_command(MonitorCommand::Shutdown).await.unwrap();
    worker_handle.join().unwrap();
    assert_eq!(served.load(Ordering::SeqCst), 10);
}

//! Async channel bridge between callers and the USB monitor thread

use async_channel::{Receiver, Sender, bounded};
use descriptor::{DeviceFilter, UsbDeviceDescriptor};

/// Capacity of the command channel
pub const COMMAND_CAPACITY: usize = 256;

/// Commands from callers to the monitor thread
#[derive(Debug)]
pub enum MonitorCommand {
    /// List tracked devices matching a filter
    Find {
        /// Vendor/product restriction
        filter: DeviceFilter,
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Vec<UsbDeviceDescriptor>>,
    },

    /// Shutdown the monitor thread gracefully
    Shutdown,
}

/// Handle for callers (async or blocking)
#[derive(Clone)]
pub struct MonitorBridge {
    cmd_tx: Sender<MonitorCommand>,
}

impl MonitorBridge {
    /// Send a command to the monitor thread
    pub async fn send_command(&self, cmd: MonitorCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command from a non-async context
    pub fn send_command_blocking(&self, cmd: MonitorCommand) -> crate::Result<()> {
        self.cmd_tx
            .send_blocking(cmd)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Whether the monitor thread dropped its end
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Handle for the monitor thread (blocking)
pub struct MonitorWorker {
    cmd_rx: Receiver<MonitorCommand>,
}

impl MonitorWorker {
    /// Receive a command (blocking)
    pub fn recv_command(&self) -> crate::Result<MonitorCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<MonitorCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Whether every bridge handle has been dropped
    pub fn is_orphaned(&self) -> bool {
        self.cmd_rx.is_closed()
    }
}

/// Create the channel bridge between callers and the monitor thread
///
/// Returns (MonitorBridge for callers, MonitorWorker for the monitor thread)
pub fn create_monitor_bridge() -> (MonitorBridge, MonitorWorker) {
    let (cmd_tx, cmd_rx) = bounded(COMMAND_CAPACITY);

    (MonitorBridge { cmd_tx }, MonitorWorker { cmd_rx })
}

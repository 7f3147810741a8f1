//! usb-detect
//!
//! Lists attached USB devices or watches for hot-plug events.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use descriptor::parse_id;
use tokio::signal;
use tracing::{error, info};
use usb_detection::{DetectorConfig, DeviceFilter, UsbDetector, UsbDeviceDescriptor};

#[derive(Parser, Debug)]
#[command(name = "usb-detect")]
#[command(author, version, about = "List USB devices and watch for hot-plug events")]
#[command(long_about = "
Enumerates attached USB devices and reports devices being added and removed.

EXAMPLES:
    # List attached devices
    usb-detect

    # List devices from one vendor as JSON
    usb-detect --vendor-id 0x16c0 --json

    # Print add/remove/change events as JSON lines until Ctrl+C
    usb-detect --watch

    # Watch with debug logging
    usb-detect --watch --log-level debug

CONFIGURATION:
    The detector looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-detection/detector.toml
    3. /etc/usb-detection/detector.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Only report devices with this vendor id (decimal or 0x hex)
    #[arg(long, value_name = "ID")]
    vendor_id: Option<String>,

    /// Only report devices with this product id (decimal or 0x hex)
    #[arg(long, value_name = "ID")]
    product_id: Option<String>,

    /// Print hot-plug events as JSON lines until interrupted
    #[arg(short, long)]
    watch: bool,

    /// Print the device list as a JSON array
    #[arg(long)]
    json: bool,
}

impl Args {
    fn device_filter(&self) -> Result<DeviceFilter> {
        let vendor_id = self
            .vendor_id
            .as_deref()
            .map(|v| parse_id(v, "vendor id"))
            .transpose()?;
        let product_id = self
            .product_id
            .as_deref()
            .map(|p| parse_id(p, "product id"))
            .transpose()?;

        Ok(DeviceFilter {
            vendor_id,
            product_id,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = DetectorConfig::default();
        let path = DetectorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        DetectorConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DetectorConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.detector.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-detect v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let filter = args.device_filter().context("Invalid device filter")?;
    let detector = UsbDetector::new(config);

    if args.watch {
        let result = watch_mode(&detector, filter).await;
        info!("Shutting down USB monitoring...");
        detector.stop_monitoring();
        return result;
    }

    list_mode(&detector, filter, args.json).await
}

/// List matching devices once and exit
async fn list_mode(detector: &UsbDetector, filter: DeviceFilter, json: bool) -> Result<()> {
    info!("Listing USB devices...");

    let devices = detector
        .find(filter)
        .await
        .context("Failed to enumerate USB devices")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", devices.len());
        for device in &devices {
            print_device(device);
        }
    }

    Ok(())
}

fn print_device(device: &UsbDeviceDescriptor) {
    println!(
        "  [{:08x}] {:04x}:{:04x} - {} {}",
        device.location_id,
        device.vendor_id,
        device.product_id,
        non_empty(&device.manufacturer, "Unknown Manufacturer"),
        non_empty(&device.device_name, "Unknown Product")
    );
    println!(
        "      Bus {:03} Device {:03}",
        device.bus_number(),
        device.device_address
    );
    if !device.serial_number.is_empty() {
        println!("      Serial: {}", device.serial_number);
    }
    if !device.dev_node.is_empty() {
        println!("      Node: {}", device.dev_node);
    }
    if device.is_mounted() {
        println!("      Mounted at: {}", device.mount_path);
    }
    println!();
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

/// Print events as JSON lines until Ctrl+C
async fn watch_mode(detector: &UsbDetector, filter: DeviceFilter) -> Result<()> {
    detector
        .start_monitoring()
        .context("Failed to start USB monitoring")?;

    let mut events = detector.subscribe_all(filter);

    info!("Watching for USB events, press Ctrl+C to stop");

    loop {
        let event = tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                return Ok(());
            }
            event = events.next() => event,
        };

        let Some(event) = event else {
            error!("Event stream closed unexpectedly");
            return Ok(());
        };

        println!("{}", serde_json::to_string(&event)?);
    }
}

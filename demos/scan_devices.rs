//! Basic example: Discover nearby Blinky devices
//!
//! Run with: cargo run --example scan_devices
//!
//! Pass `--all` to list every advertising device, not only those
//! advertising the LED Button Service.

use nrf_blinky_ble::{DeviceManager, Result, ScanFilter};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nrf_blinky_ble=debug".parse().unwrap()),
        )
        .init();

    let show_all = std::env::args().any(|a| a == "--all");

    println!("Starting Blinky discovery...");
    println!("Make sure your development kit runs the Blinky sample!\n");

    let manager = DeviceManager::new().await?;

    if show_all {
        manager.set_filter(ScanFilter::new(false, false, false));
    }

    // Register callback for discovered devices
    let _handle = manager.on_device_found(|device| {
        println!("\nDiscovered device:");
        println!("  Address: {}", device.address());
        println!("  Name: {}", device.display_name().unwrap_or("<unnamed>"));
        println!("  RSSI: {} dBm", device.rssi());
        println!("  Services: {:?}", device.service_uuids());
    });

    manager.start_scanning().await?;

    println!("Scanning for 10 seconds...\n");
    tokio::time::sleep(Duration::from_secs(10)).await;

    manager.stop_scanning().await?;

    let devices = manager.devices();
    println!("\n=== Discovery Summary ===");
    println!("Found {} device(s)", devices.len());
    for device in &devices {
        println!(
            "  {} ({} dBm, best {} dBm)",
            device,
            device.rssi(),
            device.highest_rssi()
        );
    }

    manager.shutdown().await?;

    Ok(())
}

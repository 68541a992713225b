//! Example: Toggle the LED and watch the Button of a Blinky device
//!
//! Run with: cargo run --example blinky
//!
//! Or, to connect to a specific device:
//! cargo run --example blinky -- --address AA:BB:CC:DD:EE:FF

use nrf_blinky_ble::{Blinky, BlinkyState, DeviceManager, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nrf_blinky_ble=info".parse().unwrap()),
        )
        .init();

    // Parse optional address argument
    let args: Vec<String> = std::env::args().collect();
    let target_address = args
        .iter()
        .position(|a| a == "--address")
        .and_then(|i| args.get(i + 1))
        .cloned();

    println!("=== Blinky LED Button Example ===\n");

    let manager = DeviceManager::new().await?;
    manager.start_scanning().await?;

    println!("Scanning for devices...");
    tokio::time::sleep(Duration::from_secs(5)).await;
    manager.stop_scanning().await?;

    let device = match &target_address {
        Some(address) => manager.device(address),
        None => manager.devices().into_iter().next(),
    };

    let device = match device {
        Some(d) => d,
        None => {
            if let Some(address) = &target_address {
                println!("Device {} not found", address);
            } else {
                println!("No Blinky devices found");
            }
            manager.shutdown().await?;
            return Ok(());
        }
    };

    println!("Connecting to {}...", device);
    let blinky = match manager.connect(device.address()).await {
        Ok(blinky) => blinky,
        Err(e) => {
            println!("Connection failed: {}", e);
            manager.shutdown().await?;
            return Ok(());
        }
    };

    println!("State: {:?}", blinky.simplified_state());
    println!("LED: {}", *blinky.led_state().borrow());
    println!("Button: {}", *blinky.button_state().borrow());

    // Print button changes while the LED blinks
    let mut button = blinky.button_state();
    let watcher = tokio::spawn(async move {
        while button.changed().await.is_ok() {
            let pressed = *button.borrow_and_update();
            println!("Button {}", if pressed { "pressed" } else { "released" });
        }
    });

    println!("\nBlinking the LED (press the button on the kit meanwhile)...");
    for i in 0..10 {
        if blinky.simplified_state() != BlinkyState::Ready {
            println!("Device is no longer available");
            break;
        }
        let on = i % 2 == 0;
        blinky.turn_led(on).await?;
        println!("LED {}", if on { "on" } else { "off" });
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("\nWatching the button for 10 more seconds...");
    tokio::time::sleep(Duration::from_secs(10)).await;

    blinky.turn_led(false).await?;
    watcher.abort();

    println!("\nDisconnecting...");
    manager.shutdown().await?;

    println!("Done!");
    Ok(())
}

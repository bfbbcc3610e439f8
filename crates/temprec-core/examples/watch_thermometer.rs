//! Example: Streaming Temperature Readings
//!
//! This example scans for an ESP32 thermometer, connects to it,
//! enables notifications and prints every reading until the device
//! disconnects or Ctrl-C is pressed.
//!
//! Run with: `cargo run --example watch_thermometer -- [DEVICE_NAME]`

use std::env;
use std::sync::Arc;

use temprec_core::{
    AllowAll, BtleRadio, Client, ClientConfig, DEFAULT_DEVICE_NAME, TelemetryEvent,
    telemetry_channel,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let name = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());

    println!("Scanning for {}...", name);

    let radio = Arc::new(BtleRadio::new().await?);
    let (sink, mut events) = telemetry_channel();
    let config = ClientConfig::default().target_name(&name);
    let client = Client::new(radio, Arc::new(AllowAll), sink, config)?;

    let handle = client.start();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    TelemetryEvent::Reading { reading } => {
                        println!("  {}  {}", reading.received_at.time(), reading);
                    }
                    other => println!("{}", other),
                }
                if event.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Closing...");
                handle.close();
            }
        }
    }

    let outcome = handle.wait().await?;
    println!("Finished: {:?}", outcome);
    Ok(())
}

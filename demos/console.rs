//! Drives a gateway over the host's Bluetooth adapter from stdin, one text command per line,
//! and prints every event. `quit` shuts the gateway down.
//!
//! ```text
//! RUST_LOG=blegate=debug cargo run --example console --features platform
//! scan name=Polar
//! connect A0:9E:1A:00:11:22
//! subscribe A0:9E:1A:00:11:22 2a37
//! ```

use std::io::BufRead;
use std::sync::Arc;

use blegate::command::Command;
use blegate::config::GatewayConfig;
use blegate::gateway::Gateway;
use blegate::platform::BtleplugTransport;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let transport = BtleplugTransport::new().await?;
    let gateway = Arc::new(Gateway::start(transport, GatewayConfig::default()));

    let mut events = gateway.subscribe_events();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.address() {
                Some(address) => println!("{} {}: {:?}", event.name(), address, event),
                None => println!("{}: {:?}", event.name(), event),
            }
        }
    });

    // Stdin blocks, so it gets its own thread.
    let (lines_tx, mut lines) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if lines_tx.send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = lines.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }
        match line.parse::<Command>() {
            Ok(command) => {
                if let Err(e) = gateway.execute(command).await {
                    eprintln!("{}: {}", line, e);
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }

    gateway.shutdown().await;
    printer.await?;
    Ok(())
}

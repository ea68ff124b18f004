mod account;
mod apdu;
mod bytes;
mod config;
mod emulator;
mod emulator_service;
mod error;
mod ndef;
mod reader;
mod reader_service;
mod types;
mod ws;

use std::sync::Arc;

use crossbeam_channel::unbounded;
use log::{error, info};
use tokio::sync::broadcast;

use account::SharedAccount;
use apdu::Templates;
use config::Config;
use emulator_service::EmulatorService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    info!("Starting T4T NDEF emulator...");

    let config = Config::from_env()?;
    // Bad command constants are a build defect; refuse to start.
    let templates = Arc::new(Templates::load().map_err(|e| {
        error!("Invalid APDU templates: {}", e);
        e
    })?);
    ndef::build_text_message(&config.default_account)?;

    // Channel: WS -> emulator (Commands)
    // Crossbeam (Sync) because the emulator thread is blocking
    let (host_tx, host_rx) = unbounded::<types::HostCommand>();

    // Channel: emulator/reader threads -> WS (Events)
    let (event_tx, event_rx) = broadcast::channel::<types::OutgoingMessage>(100);
    let (bridge_tx, bridge_rx) = unbounded::<types::OutgoingMessage>();

    let account = SharedAccount::new(config.default_account.clone());
    let service = EmulatorService::new(templates, account, bridge_tx.clone());
    std::thread::spawn(move || service.run(host_rx));

    let reader_tx = if config.reader_enabled {
        let (reader_tx, reader_rx) = unbounded::<types::ReaderCommand>();
        let reader_events = bridge_tx.clone();
        std::thread::spawn(move || reader_service::run(reader_events, reader_rx));
        Some(reader_tx)
    } else {
        None
    };
    drop(bridge_tx);

    // Bridge sync sends from the worker threads into the async broadcast
    std::thread::spawn(move || {
        while let Ok(msg) = bridge_rx.recv() {
            let _ = event_tx.send(msg);
        }
    });

    let channels = ws::Channels { host_tx, reader_tx };
    ws::start_server(config.bind, channels, event_rx).await;
    Ok(())
}

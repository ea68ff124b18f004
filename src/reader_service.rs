// src/reader_service.rs
use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};
use pcsc::{Context, PNP_NOTIFICATION, Protocols, ReaderState, Scope, ShareMode, State};
use std::ffi::{CStr, CString};
use std::time::Duration;

use crate::reader;
use crate::types::{OutgoingMessage, ReaderCommand};

/// Watches PC/SC readers and runs the T4T read path on every tag presented.
pub fn run(tx: Sender<OutgoingMessage>, rx: Receiver<ReaderCommand>) {
    info!("Starting T4T reader watcher...");

    let ctx = match Context::establish(Scope::User) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("Failed to establish context: {}", err);
            let _ = tx.send(OutgoingMessage::READER_ERROR {
                error: err.to_string(),
            });
            return;
        }
    };

    let mut readers_buf = [0; 2048];
    let mut reader_names: Vec<CString> = Vec::new();
    let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];

    loop {
        // 1. Wait for State Change
        if let Err(err) = ctx.get_status_change(Duration::from_millis(500), &mut reader_states) {
            if err != pcsc::Error::Timeout {
                error!("PCSC Error: {}", err);
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        }

        // 2. Check for commands
        loop {
            match rx.try_recv() {
                Ok(ReaderCommand::CheckReaderStatus) => {
                    let success = refresh_readers(&ctx, &mut readers_buf, &mut reader_names);
                    let _ = tx.send(OutgoingMessage::READER_STATUS { success });
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    info!("Command channel closed, reader watcher stopping");
                    return;
                }
            }
        }

        // 3. Process events
        let mut readers_changed = false;

        if reader_states[0].event_state().intersects(State::CHANGED) {
            info!("Hardware change detected");
            readers_changed = true;
            reader_states[0].sync_current_state();
        }

        for rs in reader_states.iter_mut().skip(1) {
            if !rs.event_state().intersects(State::CHANGED) {
                continue;
            }
            let current = rs.event_state();
            let name = rs.name().to_owned();

            if current.intersects(State::PRESENT) && !rs.current_state().intersects(State::PRESENT)
            {
                info!("Tag presented on {:?}", name);
                handle_tag(&ctx, &name, &tx);
            }

            if current.intersects(State::EMPTY) && rs.current_state().intersects(State::PRESENT) {
                info!("Tag removed from {:?}", name);
            }

            rs.sync_current_state();
        }

        // 4. Refresh list
        if readers_changed {
            let success = refresh_readers(&ctx, &mut readers_buf, &mut reader_names);
            // Keep the PnP state (index 0) and rebuild the rest.
            reader_states.truncate(1);
            for name in &reader_names {
                reader_states.push(ReaderState::new(name.clone(), State::UNAWARE));
            }
            let _ = tx.send(OutgoingMessage::READER_STATUS { success });
        }
    }
}

fn refresh_readers(ctx: &Context, buf: &mut [u8], names: &mut Vec<CString>) -> bool {
    match ctx.list_readers(buf) {
        Ok(iter) => {
            *names = iter.map(CString::from).collect();
            !names.is_empty()
        }
        Err(e) => {
            warn!("Could not list readers: {}", e);
            names.clear();
            false
        }
    }
}

fn handle_tag(ctx: &Context, reader_name: &CStr, tx: &Sender<OutgoingMessage>) {
    let mut card = match ctx.connect(reader_name, ShareMode::Shared, Protocols::ANY) {
        Ok(card) => card,
        Err(e) => {
            error!("Failed to connect to tag: {}", e);
            return;
        }
    };

    let msg = match reader::read_ndef_text(&mut card) {
        Ok(data) => {
            info!("Read {} bytes of text from tag", data.len());
            OutgoingMessage::TAG_READ { data }
        }
        Err(e) => {
            warn!("Tag read failed: {}", e);
            OutgoingMessage::TAG_READ_ERROR {
                error: e.to_string(),
            }
        }
    };
    let _ = tx.send(msg);
}

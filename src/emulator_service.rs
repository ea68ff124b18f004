// src/emulator_service.rs
use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};

use crate::account::{AccountSource, DEFAULT_ACCOUNT};
use crate::apdu::Templates;
use crate::emulator::T4tSession;
use crate::error::Result;
use crate::ndef;
use crate::types::{HostCommand, OutgoingMessage};

/// Owns every emulation session. Commands arrive one at a time over `rx`,
/// so at most one APDU is ever in flight.
pub struct EmulatorService<A> {
    templates: Arc<Templates>,
    account: A,
    sessions: HashMap<String, T4tSession>,
    tx: Sender<OutgoingMessage>,
}

impl<A: AccountSource> EmulatorService<A> {
    pub fn new(templates: Arc<Templates>, account: A, tx: Sender<OutgoingMessage>) -> Self {
        Self {
            templates,
            account,
            sessions: HashMap::new(),
            tx,
        }
    }

    pub fn run(mut self, rx: Receiver<HostCommand>) {
        info!("Starting T4T emulator...");
        while let Ok(cmd) = rx.recv() {
            self.handle(cmd);
        }
        info!("Host channel closed, emulator stopping");
    }

    pub fn handle(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::Apdu {
                session,
                apdu,
                reply,
            } => {
                let response = self.process(&session, &apdu);
                if reply.send(response).is_err() {
                    warn!("Client for session {} went away before the reply", session);
                }
            }
            HostCommand::Deactivate { session, reason } => {
                if let Some(mut s) = self.sessions.remove(&session) {
                    s.deactivate(reason);
                    info!(
                        "Session {} ended, {} still active",
                        session,
                        self.session_count()
                    );
                    let _ = self
                        .tx
                        .send(OutgoingMessage::SESSION_ENDED { session, reason });
                }
            }
            HostCommand::SetAccount { text } => {
                let msg = match self.update_account(text) {
                    Ok(length) => OutgoingMessage::ACCOUNT_UPDATED { length },
                    Err(e) => {
                        warn!("Account update refused: {}", e);
                        OutgoingMessage::ACCOUNT_ERROR {
                            error: e.to_string(),
                        }
                    }
                };
                let _ = self.tx.send(msg);
            }
        }
    }

    fn update_account(&self, text: String) -> Result<usize> {
        // reject text the builder cannot encode
        ndef::build_text_message(&text)?;
        let length = text.len();
        self.account.set_text(text)?;
        Ok(length)
    }

    fn process(&mut self, session: &str, apdu: &[u8]) -> Vec<u8> {
        if !self.sessions.contains_key(session) {
            match self.start_session(session) {
                Ok(s) => {
                    self.sessions.insert(session.to_string(), s);
                    let _ = self.tx.send(OutgoingMessage::SESSION_STARTED {
                        session: session.to_string(),
                    });
                }
                Err(e) => {
                    error!("Session {} could not start: {}", session, e);
                    return self.templates.unknown_sw.clone();
                }
            }
        }
        match self.sessions.get_mut(session) {
            Some(s) => s.process(apdu),
            None => self.templates.unknown_sw.clone(),
        }
    }

    // The message is built once here, never per command.
    fn start_session(&self, session: &str) -> Result<T4tSession> {
        let text = self.account.account_text().unwrap_or_else(|e| {
            warn!("{}; serving default account", e);
            DEFAULT_ACCOUNT.to_string()
        });
        info!("Session {} started with {} byte account", session, text.len());

        let s = T4tSession::new(self.templates.clone(), &text)?;
        info!("NDEF file is {} bytes, state {:?}", s.ndef_message().len(), s.state());
        Ok(s)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::SharedAccount;
    use crate::bytes::hex_to_bytes;
    use crate::types::DeactivationReason;
    use crossbeam_channel::unbounded;
    use tokio::sync::oneshot;

    fn service(account: SharedAccount) -> (EmulatorService<SharedAccount>, Receiver<OutgoingMessage>) {
        let (tx, rx) = unbounded();
        let templates = Arc::new(Templates::load().unwrap());
        (EmulatorService::new(templates, account, tx), rx)
    }

    fn apdu<A: AccountSource>(svc: &mut EmulatorService<A>, session: &str, hex: &str) -> Vec<u8> {
        let (reply, mut rx) = oneshot::channel();
        svc.handle(HostCommand::Apdu {
            session: session.into(),
            apdu: hex_to_bytes(hex).unwrap(),
            reply,
        });
        rx.try_recv().unwrap()
    }

    #[test]
    fn first_apdu_starts_a_session() {
        let (mut svc, events) = service(SharedAccount::new("1234"));
        assert_eq!(apdu(&mut svc, "a", "00A4040007D2760000850101"), vec![0x90, 0x00]);
        assert_eq!(svc.session_count(), 1);
        assert_eq!(
            events.try_recv().unwrap(),
            OutgoingMessage::SESSION_STARTED { session: "a".into() }
        );
        apdu(&mut svc, "a", "00A4000C02E104");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn sessions_keep_separate_state() {
        let (mut svc, _events) = service(SharedAccount::default());
        apdu(&mut svc, "a", "00A4000C02E104");
        assert_eq!(apdu(&mut svc, "a", "00B0000002"), vec![0x00, 0x0F, 0x90, 0x00]);
        assert_eq!(apdu(&mut svc, "b", "00B0000002"), vec![0x00, 0x00]);
    }

    #[test]
    fn account_change_applies_to_new_sessions() {
        let account = SharedAccount::new("1");
        let (mut svc, events) = service(account);
        apdu(&mut svc, "a", "00A4000C02E104");

        svc.handle(HostCommand::SetAccount { text: "123".into() });
        apdu(&mut svc, "b", "00A4000C02E104");

        assert_eq!(apdu(&mut svc, "a", "00B0000002"), vec![0x00, 0x08, 0x90, 0x00]);
        assert_eq!(apdu(&mut svc, "b", "00B0000002"), vec![0x00, 0x0A, 0x90, 0x00]);
        assert!(events
            .try_iter()
            .any(|m| m == OutgoingMessage::ACCOUNT_UPDATED { length: 3 }));
    }

    #[test]
    fn oversized_account_is_refused() {
        let account = SharedAccount::new("1");
        let (mut svc, events) = service(account.clone());
        svc.handle(HostCommand::SetAccount {
            text: "x".repeat(300),
        });
        assert_eq!(account.account_text().unwrap(), "1");
        assert!(matches!(
            events.try_recv().unwrap(),
            OutgoingMessage::ACCOUNT_ERROR { .. }
        ));
    }

    #[test]
    fn deactivation_ends_session() {
        let (mut svc, events) = service(SharedAccount::default());
        apdu(&mut svc, "a", "00A4000C02E104");
        svc.handle(HostCommand::Deactivate {
            session: "a".into(),
            reason: DeactivationReason::Deselected,
        });
        assert_eq!(svc.session_count(), 0);
        let ended = events.try_iter().last().unwrap();
        assert_eq!(
            ended,
            OutgoingMessage::SESSION_ENDED {
                session: "a".into(),
                reason: DeactivationReason::Deselected
            }
        );
        // a fresh session starts in Ready
        assert_eq!(apdu(&mut svc, "a", "00B0000002"), vec![0x00, 0x00]);
    }

    struct BrokenAccount;

    impl AccountSource for BrokenAccount {
        fn account_text(&self) -> Result<String> {
            Err(crate::error::Error::Account("storage offline".into()))
        }

        fn set_text(&self, _text: String) -> Result<()> {
            Err(crate::error::Error::Account("storage offline".into()))
        }
    }

    // Bypasses SET_ACCOUNT validation, like a store edited behind our back.
    struct OversizedAccount;

    impl AccountSource for OversizedAccount {
        fn account_text(&self) -> Result<String> {
            Ok("x".repeat(300))
        }

        fn set_text(&self, _text: String) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unavailable_account_serves_default() {
        let (tx, _events) = unbounded();
        let templates = Arc::new(Templates::load().unwrap());
        let mut svc = EmulatorService::new(templates, BrokenAccount, tx);
        apdu(&mut svc, "a", "00A4000C02E104");
        assert_eq!(apdu(&mut svc, "a", "00B0000002"), vec![0x00, 0x0F, 0x90, 0x00]);
        assert_eq!(svc.session_count(), 1);
    }

    #[test]
    fn unencodable_account_answers_unknown() {
        let (tx, events) = unbounded();
        let templates = Arc::new(Templates::load().unwrap());
        let mut svc = EmulatorService::new(templates, OversizedAccount, tx);
        assert_eq!(apdu(&mut svc, "a", "00A4040007D2760000850101"), vec![0x00, 0x00]);
        assert_eq!(svc.session_count(), 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn unknown_session_deactivation_is_ignored() {
        let (mut svc, events) = service(SharedAccount::default());
        svc.handle(HostCommand::Deactivate {
            session: "ghost".into(),
            reason: DeactivationReason::LinkLoss,
        });
        assert!(events.try_recv().is_err());
    }
}

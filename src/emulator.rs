// src/emulator.rs
use std::sync::Arc;

use log::{debug, info, warn};

use crate::apdu::{Command, ReadBinary, Templates};
use crate::bytes::{bytes_to_hex, concat};
use crate::error::Result;
use crate::ndef;
use crate::types::{DeactivationReason, SelectionState};

/// One emulated Type 4 Tag exchange with a reader.
///
/// Holds the selection state and the NDEF file, which is built once when the
/// session starts. Every command yields a response APDU; unknown or
/// out-of-sequence commands answer `00 00`.
#[derive(Debug)]
pub struct T4tSession {
    templates: Arc<Templates>,
    state: SelectionState,
    ndef_message: Vec<u8>,
}

impl T4tSession {
    pub fn new(templates: Arc<Templates>, text: &str) -> Result<Self> {
        let ndef_message = ndef::build_text_message(text)?;
        info!("New NDEF Message {}", bytes_to_hex(&ndef_message));
        Ok(Self {
            templates,
            state: SelectionState::Ready,
            ndef_message,
        })
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn ndef_message(&self) -> &[u8] {
        &self.ndef_message
    }

    pub fn process(&mut self, command: &[u8]) -> Vec<u8> {
        info!("Received APDU: {}", bytes_to_hex(command));

        let answer = match self.templates.classify(command) {
            Some(cmd) => self.apply(cmd),
            None => self.unknown(),
        };

        info!("state = {:?}", self.state);
        info!("Returned APDU: {}", bytes_to_hex(&answer));
        answer
    }

    /// The link dropped or the reader selected another AID.
    pub fn deactivate(&mut self, reason: DeactivationReason) {
        info!("Deactivated ({:?}) in state {:?}", reason, self.state);
        self.state = SelectionState::Ready;
    }

    fn apply(&mut self, cmd: Command) -> Vec<u8> {
        match (cmd, self.state) {
            (Command::SelectApplication, _) => {
                self.state = SelectionState::ApplicationSelected;
                self.success()
            }
            (Command::SelectCc, SelectionState::ApplicationSelected) => {
                self.state = SelectionState::CcSelected;
                self.success()
            }
            (Command::SelectCc, _) => {
                self.state = SelectionState::Ready;
                self.unknown()
            }
            (Command::SelectNdef, _) => {
                self.state = SelectionState::NdefSelected;
                self.success()
            }
            (Command::ReadBinary(_), SelectionState::CcSelected) => {
                concat(&[&self.templates.cc_file[..], &self.templates.success_sw[..]])
            }
            (Command::ReadBinary(Some(read)), SelectionState::NdefSelected) => {
                self.read_ndef(read)
            }
            (Command::ReadBinary(None), SelectionState::NdefSelected) => {
                warn!("READ BINARY too short to carry offset/length");
                self.unknown()
            }
            (Command::ReadBinary(_), _) => {
                self.state = SelectionState::Ready;
                self.unknown()
            }
        }
    }

    fn read_ndef(&self, read: ReadBinary) -> Vec<u8> {
        info!(
            "Reading NDEF file offset = {} length = {}",
            read.offset, read.length
        );
        match read.slice(&self.ndef_message) {
            Ok(data) => concat(&[data, &self.templates.success_sw[..]]),
            Err(e) => {
                warn!("{}", e);
                self.unknown()
            }
        }
    }

    fn success(&self) -> Vec<u8> {
        self.templates.success_sw.clone()
    }

    fn unknown(&self) -> Vec<u8> {
        debug!("answering unknown status");
        self.templates.unknown_sw.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::{APP_SELECT_HEX, CC_SELECT_HEX, NDEF_SELECT_HEX};
    use crate::bytes::hex_to_bytes;
    use proptest::prelude::*;

    fn session(text: &str) -> T4tSession {
        T4tSession::new(Arc::new(Templates::load().unwrap()), text).unwrap()
    }

    fn send(s: &mut T4tSession, hex: &str) -> String {
        bytes_to_hex(&s.process(&hex_to_bytes(hex).unwrap()))
    }

    #[test]
    fn full_read_path() {
        let mut s = session("123456");
        assert_eq!(send(&mut s, "00A4040007D2760000850101"), "9000");
        assert_eq!(send(&mut s, "00A4000C02E103"), "9000");
        assert_eq!(
            send(&mut s, "00B000000F"),
            "000F2000FF00FF0406E10400FF00FF9000"
        );
        assert_eq!(send(&mut s, "00A4000C02E104"), "9000");
        assert_eq!(send(&mut s, "00B0000002"), "000D9000");
        assert_eq!(
            send(&mut s, "00B000000F"),
            "000DD101095402656E3132333435369000"
        );
        assert_eq!(s.state(), SelectionState::NdefSelected);
    }

    #[test]
    fn partial_reads_slice_by_offset() {
        let mut s = session("Test");
        let message = s.ndef_message().to_vec();
        send(&mut s, "00A4040007D2760000850101");
        send(&mut s, "00A4000C02E104");
        for len in 0..=message.len() {
            let resp = s.process(&[0x00, 0xB0, 0x00, 0x00, len as u8]);
            assert_eq!(resp, concat(&[&message[..len], &[0x90u8, 0x00][..]]));
        }
        assert_eq!(send(&mut s, "00B000020B"), "D101075402656E546573749000");
    }

    #[test]
    fn out_of_bounds_read_answers_unknown() {
        let mut s = session("Test");
        send(&mut s, "00A4040007D2760000850101");
        send(&mut s, "00A4000C02E104");
        assert_eq!(send(&mut s, "00B0000020"), "0000");
        assert_eq!(send(&mut s, "00B0FFFF01"), "0000");
        assert_eq!(send(&mut s, "00B000"), "0000");
        assert_eq!(s.state(), SelectionState::NdefSelected);
        assert_eq!(send(&mut s, "00B0000002"), "000B9000");
    }

    #[test]
    fn cc_select_requires_application() {
        let mut s = session("x");
        assert_eq!(send(&mut s, "00A4000C02E103"), "0000");
        assert_eq!(s.state(), SelectionState::Ready);

        send(&mut s, "00A4000C02E104");
        assert_eq!(send(&mut s, "00A4000C02E103"), "0000");
        assert_eq!(s.state(), SelectionState::Ready);
    }

    #[test]
    fn read_without_selection_resets() {
        let mut s = session("x");
        assert_eq!(send(&mut s, "00B000000F"), "0000");
        assert_eq!(s.state(), SelectionState::Ready);

        send(&mut s, "00A4040007D2760000850101");
        assert_eq!(send(&mut s, "00B000000F"), "0000");
        assert_eq!(s.state(), SelectionState::Ready);
    }

    #[test]
    fn ndef_select_needs_no_application() {
        let mut s = session("x");
        assert_eq!(send(&mut s, "00A4000C02E104"), "9000");
        assert_eq!(s.state(), SelectionState::NdefSelected);
    }

    #[test]
    fn unrecognised_command_keeps_state() {
        let mut s = session("x");
        send(&mut s, "00A4040007D2760000850101");
        assert_eq!(send(&mut s, "00D6000001AA"), "0000");
        assert_eq!(s.process(&[]), vec![0x00, 0x00]);
        assert_eq!(s.state(), SelectionState::ApplicationSelected);
    }

    #[test]
    fn cc_read_ignores_offset() {
        let mut s = session("x");
        send(&mut s, "00A4040007D2760000850101");
        send(&mut s, "00A4000C02E103");
        assert_eq!(
            send(&mut s, "00B0000502"),
            "000F2000FF00FF0406E10400FF00FF9000"
        );
    }

    #[test]
    fn deactivation_resets_state() {
        let mut s = session("x");
        send(&mut s, "00A4040007D2760000850101");
        send(&mut s, "00A4000C02E104");
        s.deactivate(DeactivationReason::LinkLoss);
        assert_eq!(s.state(), SelectionState::Ready);
        assert_eq!(send(&mut s, "00B0000002"), "0000");
    }

    #[test]
    fn sessions_are_independent() {
        let templates = Arc::new(Templates::load().unwrap());
        let mut a = T4tSession::new(templates.clone(), "a").unwrap();
        let b = T4tSession::new(templates, "b").unwrap();
        send(&mut a, "00A4000C02E104");
        assert_eq!(a.state(), SelectionState::NdefSelected);
        assert_eq!(b.state(), SelectionState::Ready);
    }

    #[test]
    fn oversized_text_fails_session_start() {
        let templates = Arc::new(Templates::load().unwrap());
        assert!(T4tSession::new(templates, &"a".repeat(300)).is_err());
    }

    fn any_command() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![
            Just(hex_to_bytes(APP_SELECT_HEX).unwrap()),
            Just(hex_to_bytes(CC_SELECT_HEX).unwrap()),
            Just(hex_to_bytes(NDEF_SELECT_HEX).unwrap()),
            prop::collection::vec(any::<u8>(), 0..=3).prop_map(|tail| {
                let mut read = vec![0x00, 0xB0];
                read.extend(tail);
                read
            }),
            prop::collection::vec(any::<u8>(), 0..16),
        ]
    }

    proptest! {
        #[test]
        fn every_command_gets_a_response(
            text in "[ -~]{0,246}",
            commands in prop::collection::vec(any_command(), 1..40),
        ) {
            let mut s = session(&text);
            for command in &commands {
                let resp = s.process(command);
                prop_assert!(
                    resp == [0x00, 0x00] || resp.ends_with(&[0x90, 0x00]),
                    "{} answered {}",
                    bytes_to_hex(command),
                    bytes_to_hex(&resp)
                );
            }
        }
    }
}

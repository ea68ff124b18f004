// src/types.rs
use serde::{Deserialize, Serialize};

/// Which file of the emulated tag the reader currently has selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionState {
    #[default]
    Ready,
    ApplicationSelected,
    CcSelected,
    NdefSelected,
}

/// Why the host ended an emulation session.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeactivationReason {
    LinkLoss,
    Deselected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8, // Type Name Format (How to interpret the type)
    pub record_type: Vec<u8>,
    pub payload: Vec<u8>,
}

// Messages sent TO the WebSocket client
#[allow(non_camel_case_types)]
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    RESPONSE_APDU {
        session: String,
        command: String,
        response: String,
    },
    APDU_ERROR { session: String, error: String },
    SESSION_STARTED { session: String },
    SESSION_ENDED {
        session: String,
        reason: DeactivationReason,
    },
    ACCOUNT_UPDATED { length: usize },
    ACCOUNT_ERROR { error: String },
    READER_STATUS { success: bool },
    TAG_READ { data: String },
    TAG_READ_ERROR { error: String },
    READER_ERROR { error: String },
}

// Messages received FROM the WebSocket client
#[allow(non_camel_case_types)]
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    APDU { session: String, apdu: String },
    DEACTIVATE {
        session: String,
        reason: DeactivationReason,
    },
    SET_ACCOUNT { text: String },
    GET_READER_STATUS,
}

// Internal commands sent from WS Server -> emulator thread
#[derive(Debug)]
pub enum HostCommand {
    Apdu {
        session: String,
        apdu: Vec<u8>,
        reply: tokio::sync::oneshot::Sender<Vec<u8>>,
    },
    Deactivate {
        session: String,
        reason: DeactivationReason,
    },
    SetAccount { text: String },
}

// Internal commands sent from WS Server -> reader thread
#[derive(Debug)]
pub enum ReaderCommand {
    CheckReaderStatus,
}

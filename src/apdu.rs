// src/apdu.rs
use crate::bytes::hex_to_bytes;
use crate::error::{Error, Result};

pub const APP_SELECT_HEX: &str = "00A4040007D2760000850101";
pub const CC_SELECT_HEX: &str = "00A4000C02E103";
pub const NDEF_SELECT_HEX: &str = "00A4000C02E104";
pub const READ_BINARY_HEX: &str = "00B0";
// CCLEN=000F, version 2.0, MLe=00FF, MLc=00FF, NDEF File Control TLV for E104
pub const CC_FILE_HEX: &str = "000F2000FF00FF0406E10400FF00FF";
pub const SUCCESS_SW_HEX: &str = "9000";
pub const UNKNOWN_SW_HEX: &str = "0000";

/// Fixed byte templates the emulated tag recognises.
/// Decoded once at startup; a bad constant is a programming defect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    pub app_select: Vec<u8>,
    pub cc_select: Vec<u8>,
    pub ndef_select: Vec<u8>,
    pub read_binary: Vec<u8>,
    pub cc_file: Vec<u8>,
    pub success_sw: Vec<u8>,
    pub unknown_sw: Vec<u8>,
}

impl Templates {
    pub fn load() -> Result<Self> {
        Ok(Self {
            app_select: hex_to_bytes(APP_SELECT_HEX)?,
            cc_select: hex_to_bytes(CC_SELECT_HEX)?,
            ndef_select: hex_to_bytes(NDEF_SELECT_HEX)?,
            read_binary: hex_to_bytes(READ_BINARY_HEX)?,
            cc_file: hex_to_bytes(CC_FILE_HEX)?,
            success_sw: hex_to_bytes(SUCCESS_SW_HEX)?,
            unknown_sw: hex_to_bytes(UNKNOWN_SW_HEX)?,
        })
    }

    /// First template that prefixes `apdu`, in priority order.
    pub fn classify(&self, apdu: &[u8]) -> Option<Command> {
        if apdu.starts_with(&self.app_select) {
            Some(Command::SelectApplication)
        } else if apdu.starts_with(&self.cc_select) {
            Some(Command::SelectCc)
        } else if apdu.starts_with(&self.ndef_select) {
            Some(Command::SelectNdef)
        } else if apdu.starts_with(&self.read_binary) {
            Some(Command::ReadBinary(ReadBinary::parse(apdu)))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SelectApplication,
    SelectCc,
    SelectNdef,
    /// `None` when the command is too short to carry P1/P2/Le.
    ReadBinary(Option<ReadBinary>),
}

// READ BINARY: 00 B0 [offset hi] [offset lo] [Le]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBinary {
    pub offset: u16,
    pub length: u8,
}

impl ReadBinary {
    pub fn parse(apdu: &[u8]) -> Option<Self> {
        match apdu {
            [_, _, hi, lo, le, ..] => Some(Self {
                offset: u16::from_be_bytes([*hi, *lo]),
                length: *le,
            }),
            _ => None,
        }
    }

    /// Bounds-checked `[offset, offset + length)` of `file`.
    pub fn slice<'a>(&self, file: &'a [u8]) -> Result<&'a [u8]> {
        let offset = self.offset as usize;
        let length = self.length as usize;
        file.get(offset..offset + length)
            .ok_or(Error::ReadOutOfBounds {
                offset,
                length,
                size: file.len(),
            })
    }

    pub fn to_apdu(&self) -> Vec<u8> {
        let [hi, lo] = self.offset.to_be_bytes();
        vec![0x00, 0xB0, hi, lo, self.length]
    }
}

// SELECT by file id: 00 A4 00 0C 02 [id hi] [id lo]
pub fn select_file(file_id: u16) -> Vec<u8> {
    let [hi, lo] = file_id.to_be_bytes();
    vec![0x00, 0xA4, 0x00, 0x0C, 0x02, hi, lo]
}

/// Splits a response into data and status word, failing unless it is 90 00.
pub fn check_status(resp: &[u8]) -> Result<&[u8]> {
    match resp {
        [data @ .., 0x90, 0x00] => Ok(data),
        [.., sw1, sw2] => Err(Error::Status([*sw1, *sw2])),
        _ => Err(Error::Transport(format!("short response: {:02X?}", resp))),
    }
}

/// Parsed Capability Container file (E103).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
    pub cc_len: u16,
    pub version: u8,
    pub max_le: u16,
    pub max_lc: u16,
    pub ndef_file_id: u16,
    pub ndef_max_size: u16,
    pub read_access: u8,
    pub write_access: u8,
}

impl CapabilityContainer {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let bad = |msg: &str| Error::MalformedCapabilityContainer(msg.to_string());
        let be = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);

        if data.len() < 15 {
            return Err(bad("shorter than 15 bytes"));
        }
        // NDEF File Control TLV: T=04, L=06
        if data[7] != 0x04 || data[8] != 0x06 {
            return Err(bad("missing NDEF file control TLV"));
        }
        let cc_len = be(0);
        if (cc_len as usize) < 15 {
            return Err(bad("CCLEN below 15"));
        }
        Ok(Self {
            cc_len,
            version: data[2],
            max_le: be(3),
            max_lc: be(5),
            ndef_file_id: be(9),
            ndef_max_size: be(11),
            read_access: data[13],
            write_access: data[14],
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.write_access == 0xFF
    }
}

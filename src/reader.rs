// src/reader.rs
use log::{debug, info, warn};
use pcsc::Card;

use crate::apdu::{self, CapabilityContainer, ReadBinary};
use crate::bytes::{bytes_to_hex, hex_to_bytes};
use crate::emulator::T4tSession;
use crate::error::{Error, Result};
use crate::ndef;

const CC_FILE_ID: u16 = 0xE103;
const CC_LEN: u8 = 15;

/// Anything a command APDU can be sent through.
pub trait ApduTransport {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>>;
}

impl ApduTransport for Card {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let mut recv_buffer = [0u8; pcsc::MAX_BUFFER_SIZE];
        let resp = Card::transmit(self, command, &mut recv_buffer)?;
        Ok(resp.to_vec())
    }
}

// Loopback, so a reader can be run straight against an emulated tag.
impl ApduTransport for T4tSession {
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        Ok(self.process(command))
    }
}

fn exchange<T: ApduTransport + ?Sized>(transport: &mut T, command: &[u8]) -> Result<Vec<u8>> {
    debug!("-> {}", bytes_to_hex(command));
    let resp = transport.transmit(command)?;
    debug!("<- {}", bytes_to_hex(&resp));
    Ok(apdu::check_status(&resp)?.to_vec())
}

pub fn read_capability_container<T: ApduTransport + ?Sized>(
    transport: &mut T,
) -> Result<CapabilityContainer> {
    exchange(transport, &hex_to_bytes(apdu::APP_SELECT_HEX)?)?;
    exchange(transport, &apdu::select_file(CC_FILE_ID))?;
    let raw = exchange(
        transport,
        &ReadBinary {
            offset: 0,
            length: CC_LEN,
        }
        .to_apdu(),
    )?;
    CapabilityContainer::parse(&raw)
}

/// Walks the T4T read path and returns the NDEF file, NLEN included.
pub fn read_ndef_file<T: ApduTransport + ?Sized>(transport: &mut T) -> Result<Vec<u8>> {
    let cc = read_capability_container(transport)?;
    info!(
        "CC: {} bytes, version {:02X}, MLe {}, MLc {}, NDEF file {:04X} (max {} bytes)",
        cc.cc_len, cc.version, cc.max_le, cc.max_lc, cc.ndef_file_id, cc.ndef_max_size
    );
    if cc.read_access != 0x00 {
        warn!("NDEF file read access is {:02X}, trying anyway", cc.read_access);
    }
    if !cc.is_read_only() {
        debug!("NDEF file is writable");
    }

    exchange(transport, &apdu::select_file(cc.ndef_file_id))?;

    let nlen_bytes = exchange(transport, &ReadBinary { offset: 0, length: 2 }.to_apdu())?;
    let &[hi, lo] = nlen_bytes.as_slice() else {
        return Err(Error::MalformedNdef(format!(
            "NLEN read returned {} bytes",
            nlen_bytes.len()
        )));
    };
    let nlen = u16::from_be_bytes([hi, lo]) as usize;
    if nlen + 2 > cc.ndef_max_size as usize {
        warn!("NLEN {} exceeds CC file size {}", nlen, cc.ndef_max_size);
    }

    let chunk = cc.max_le.clamp(1, u8::MAX as u16) as usize;
    let mut file = nlen_bytes;
    while file.len() < nlen + 2 {
        let length = chunk.min(nlen + 2 - file.len()) as u8;
        let read = ReadBinary {
            offset: file.len() as u16,
            length,
        };
        let data = exchange(transport, &read.to_apdu())?;
        if data.len() != length as usize {
            return Err(Error::Transport(format!(
                "asked for {} bytes at {}, got {}",
                length,
                read.offset,
                data.len()
            )));
        }
        file.extend_from_slice(&data);
    }
    Ok(file)
}

pub fn read_ndef_text<T: ApduTransport + ?Sized>(transport: &mut T) -> Result<String> {
    let file = read_ndef_file(transport)?;
    ndef::decode_text_message(&file)
}

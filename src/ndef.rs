// src/ndef.rs
use std::str;

use crate::error::{Error, Result};
use crate::types::NdefRecord;

const LANG: &[u8] = b"en";

// NDEF Header: MB=1, ME=1, CF=0, SR=1, IL=0, TNF=001 (NFC Forum Well Known Type)
// 0xD1 = 1101 0001
const TEXT_RECORD_HEADER: u8 = 0xD1;
const TEXT_TYPE: &[u8] = b"T";

// header + type length + payload length + type + status byte + "en"
const RECORD_OVERHEAD: usize = 7;
// status byte + "en"
const PAYLOAD_OVERHEAD: usize = 3;

// Maximum NDEF file size declared in the CC, NLEN included.
pub const MAX_FILE_SIZE: usize = 0xFF;

/// Longest text whose NDEF file still fits the size the CC declares.
pub const MAX_TEXT_LEN: usize = MAX_FILE_SIZE - 2 - RECORD_OVERHEAD;

// Text Record payload: [Status byte] + [Lang code] + [Text]
pub fn create_text_record_payload(text: &str) -> Vec<u8> {
    let lang_len = LANG.len() as u8;

    let mut payload = Vec::new();
    // Status byte: UTF-8 (bit 7=0) | Lang length (bits 0-5)
    payload.push(lang_len);
    payload.extend_from_slice(LANG);
    payload.extend_from_slice(text.as_bytes());
    payload
}

/// Builds the NDEF file served behind the NDEF-Select command:
/// a 2-byte big-endian NLEN followed by one short Text record.
///
/// Both length fields are single bytes and the whole file must fit the CC's
/// 255-byte limit, so text longer than [`MAX_TEXT_LEN`] bytes is rejected.
pub fn build_text_message(text: &str) -> Result<Vec<u8>> {
    let text_len = text.len();
    if text_len > MAX_TEXT_LEN {
        return Err(Error::TextTooLong {
            len: text_len,
            max: MAX_TEXT_LEN,
        });
    }

    let total_length = length_byte(text_len + RECORD_OVERHEAD)?;
    let payload_length = length_byte(text_len + PAYLOAD_OVERHEAD)?;
    log::debug!(
        "NDEF lengths: total={:02X} payload={:02X}",
        total_length,
        payload_length
    );

    let payload = create_text_record_payload(text);

    let mut message = Vec::with_capacity(2 + text_len + RECORD_OVERHEAD);
    message.push(0x00);
    message.push(total_length);
    message.push(TEXT_RECORD_HEADER);
    message.push(TEXT_TYPE.len() as u8); // Type Length
    message.push(payload_length);
    message.extend_from_slice(TEXT_TYPE);
    message.extend_from_slice(&payload);
    Ok(message)
}

// Two hex digits, zero padded below 0x10.
fn length_byte(value: usize) -> Result<u8> {
    u8::try_from(value).map_err(|_| Error::TextTooLong {
        len: value,
        max: u8::MAX as usize,
    })
}

/// Reverses [`build_text_message`]: reads NLEN, then the first Text record.
pub fn decode_text_message(message: &[u8]) -> Result<String> {
    if message.len() < 2 {
        return Err(Error::MalformedNdef("missing NLEN".into()));
    }
    let nlen = u16::from_be_bytes([message[0], message[1]]) as usize;
    let body = message
        .get(2..2 + nlen)
        .ok_or_else(|| Error::MalformedNdef("incomplete data".into()))?;

    let records = parse_records(body)?;
    let record = records
        .into_iter()
        .find(|r| r.tnf == 0x01 && r.record_type == TEXT_TYPE)
        .ok_or_else(|| Error::MalformedNdef("no Text record".into()))?;

    str::from_utf8(&record.payload)
        .map(|s| s.to_string())
        .map_err(|_| Error::MalformedNdef("UTF-8 decode error".into()))
}

fn take<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let slice = data
        .get(*cursor..*cursor + len)
        .ok_or_else(|| Error::MalformedNdef(format!("record truncated at byte {}", cursor)))?;
    *cursor += len;
    Ok(slice)
}

/// Parses a raw NDEF message. Text records have their status byte and
/// language code stripped from the payload.
pub fn parse_records(data: &[u8]) -> Result<Vec<NdefRecord>> {
    let mut records = Vec::new();
    let mut cursor = 0;

    while cursor < data.len() {
        let header = take(data, &mut cursor, 1)?[0];
        let tnf = header & 0x07; // Last 3 bits
        let is_short_record = (header & 0x10) != 0; // SR flag
        let has_id = (header & 0x08) != 0; // IL flag
        let is_me = (header & 0x40) != 0; // Message End flag

        let type_len = take(data, &mut cursor, 1)?[0] as usize;

        // 1 byte for Short Record, 4 bytes otherwise
        let payload_len = if is_short_record {
            take(data, &mut cursor, 1)?[0] as usize
        } else {
            let b = take(data, &mut cursor, 4)?;
            u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
        };

        let id_len = if has_id {
            take(data, &mut cursor, 1)?[0] as usize
        } else {
            0
        };

        let record_type = take(data, &mut cursor, type_len)?.to_vec();
        // record ids are skipped
        take(data, &mut cursor, id_len)?;
        let mut payload = take(data, &mut cursor, payload_len)?.to_vec();

        if tnf == 0x01 && record_type == TEXT_TYPE {
            let status_byte = *payload
                .first()
                .ok_or_else(|| Error::MalformedNdef("empty Text payload".into()))?;
            let header_size = 1 + (status_byte & 0x3F) as usize; // Bit 5-0 is length
            if header_size > payload.len() {
                return Err(Error::MalformedNdef("invalid Text payload".into()));
            }
            payload.drain(..header_size);
        }

        records.push(NdefRecord {
            tnf,
            record_type,
            payload,
        });

        if is_me {
            break;
        }
    }

    Ok(records)
}

//! Compact `B$` multi-part format (Coldcard-family interop).
//!
//! Header layout: `B$` + encoding char + file-type char + two base36 digits
//! for the part count + two base36 digits for the zero-based part index,
//! then the part payload. Only the hex encoding (`H`) is carried here; file
//! types are `P` (PSBT), `T` (transaction) and `U` (unicode text).

use std::collections::HashMap;

use crate::errors::{CoreError, Result};
use crate::qr::ScanPayload;

const HEADER_LEN: usize = 8;
const MAX_PARTS: u32 = 36 * 36 - 1;

fn to_base36(n: u32) -> Result<String> {
    if n > MAX_PARTS {
        return Err(CoreError::InvalidPayload(format!("{n} parts exceeds the two-digit header")));
    }
    let digits = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    Ok(format!("{}{}", digits[(n / 36) as usize] as char, digits[(n % 36) as usize] as char))
}

fn from_base36(s: &str) -> Result<u32> {
    u32::from_str_radix(s, 36)
        .map_err(|_| CoreError::InvalidPayload(format!("bad base36 field {s:?}")))
}

/// Split raw bytes into `B$H…` frames of roughly `capacity` payload bytes.
pub fn encode(raw: &[u8], file_type: char, capacity: usize) -> Result<Vec<String>> {
    let hex_payload = hex::encode(raw);
    let per_part = capacity.max(2) * 2; // hex doubles the length
    let chunks: Vec<&[u8]> = hex_payload.as_bytes().chunks(per_part).collect();
    let total = chunks.len() as u32;

    let mut frames = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        frames.push(format!(
            "B$H{}{}{}{}",
            file_type,
            to_base36(total)?,
            to_base36(i as u32)?,
            std::str::from_utf8(chunk).unwrap_or_default(),
        ));
    }
    Ok(frames)
}

fn header_of(frame: &str) -> Result<(char, char, u32, u32)> {
    if frame.len() < HEADER_LEN || !frame.starts_with("B$") || !frame.as_bytes()[..HEADER_LEN].is_ascii() {
        return Err(CoreError::UnsupportedQrFormat("fixed header not found, expected B$".to_string()));
    }
    let encoding = frame.as_bytes()[2] as char;
    let file_type = frame.as_bytes()[3] as char;
    let total = from_base36(&frame[4..6])?;
    let index = from_base36(&frame[6..8])?;
    if total == 0 || index >= total {
        return Err(CoreError::InvalidPayload(format!("part {index} of {total}")));
    }
    Ok((encoding, file_type, total, index))
}

#[derive(Debug, Default)]
pub struct BbqrDecoder {
    parts: HashMap<u32, String>,
    total: Option<u32>,
    file_type: Option<char>,
}

impl BbqrDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, frame: &str) -> Result<()> {
        let (encoding, file_type, total, index) = header_of(frame)?;
        if encoding != 'H' {
            return Err(CoreError::UnsupportedQrFormat(format!(
                "unsupported B$ encoding {encoding:?}"
            )));
        }
        if let Some(known) = self.total {
            if known != total {
                return Err(CoreError::InvalidPayload(format!(
                    "frame declares {total} parts, transfer started with {known}"
                )));
            }
        }
        self.total = Some(total);
        self.file_type = Some(file_type);
        self.parts.entry(index).or_insert_with(|| frame[HEADER_LEN..].to_string());
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(total) if self.parts.len() as u32 >= total)
    }

    pub fn progress(&self) -> f32 {
        match self.total {
            Some(total) if total > 0 => self.parts.len() as f32 / total as f32,
            _ => 0.0,
        }
    }

    pub fn extract(&self) -> Result<ScanPayload> {
        if !self.is_complete() {
            return Err(CoreError::InvalidPayload("transfer incomplete".to_string()));
        }
        let total = self.total.unwrap_or(0);
        let mut joined = String::new();
        for i in 0..total {
            match self.parts.get(&i) {
                Some(part) => joined.push_str(part),
                None => return Err(CoreError::InvalidPayload(format!("missing part {i}"))),
            }
        }
        let bytes = hex::decode(&joined)?;

        match self.file_type {
            Some('P') => Ok(ScanPayload::Psbt(bytes)),
            Some('T') => Ok(ScanPayload::RawTx(hex::encode(bytes))),
            _ => Ok(ScanPayload::Text(String::from_utf8_lossy(&bytes).into_owned())),
        }
    }
}

//! First-generation animated QR format: indexed `ur:bytes/<i>of<n>/<hex>`
//! parts with no fountain properties. Kept for older signer firmware.

use std::collections::HashMap;

use crate::errors::{CoreError, Result};
use crate::files::PSBT_MAGIC;
use crate::qr::ScanPayload;

/// Split a payload (as hex text) into indexed single-generation frames.
pub fn encode(payload_hex: &str, fragment_len: usize) -> Vec<String> {
    let fragment_len = fragment_len.max(2);
    let chunks: Vec<&str> = payload_hex
        .as_bytes()
        .chunks(fragment_len)
        // chunks of a str of hex digits are valid utf8
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
        .collect();
    let total = chunks.len();
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("ur:bytes/{}of{}/{}", i + 1, total, c))
        .collect()
}

/// Parse `<i>of<n>` out of a frame, the "single workload" of one scan.
pub fn extract_workload(frame: &str) -> Result<(u32, u32, String)> {
    let lower = frame.to_lowercase();
    let body = lower
        .strip_prefix("ur:bytes/")
        .or_else(|| lower.strip_prefix("ur:"))
        .ok_or_else(|| CoreError::UnsupportedQrFormat("missing ur prefix".to_string()))?;

    let pieces: Vec<&str> = body.split('/').collect();
    match pieces.as_slice() {
        [seq, fragment] | [seq, _, fragment] => {
            let (index, total) = seq
                .split_once("of")
                .ok_or_else(|| CoreError::InvalidPayload(format!("bad sequence {seq:?}")))?;
            let index: u32 = index
                .parse()
                .map_err(|_| CoreError::InvalidPayload(format!("bad index {index:?}")))?;
            let total: u32 = total
                .parse()
                .map_err(|_| CoreError::InvalidPayload(format!("bad total {total:?}")))?;
            if index == 0 || index > total {
                return Err(CoreError::InvalidPayload(format!("index {index} out of 1..={total}")));
            }
            Ok((index, total, fragment.to_string()))
        }
        [fragment] => Ok((1, 1, fragment.to_string())),
        _ => Err(CoreError::InvalidPayload("unrecognized ur:bytes layout".to_string())),
    }
}

/// Reassembles indexed frames. Feeding a frame twice is harmless; frames
/// arrive in any order.
#[derive(Debug, Default)]
pub struct LegacyDecoder {
    fragments: HashMap<u32, String>,
    total: Option<u32>,
}

impl LegacyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, frame: &str) -> Result<()> {
        let (index, total, fragment) = extract_workload(frame)?;
        if let Some(known) = self.total {
            if known != total {
                return Err(CoreError::InvalidPayload(format!(
                    "frame declares {total} parts, transfer started with {known}"
                )));
            }
        }
        self.total = Some(total);
        self.fragments.entry(index).or_insert(fragment);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => self.fragments.len() as u32 == total,
            None => false,
        }
    }

    pub fn progress(&self) -> f32 {
        match self.total {
            Some(total) if total > 0 => self.fragments.len() as f32 / total as f32,
            _ => 0.0,
        }
    }

    pub fn expected(&self) -> (u32, u32) {
        (self.fragments.len() as u32, self.total.unwrap_or(0))
    }

    /// Concatenate in index order and interpret the hex payload: a PSBT
    /// magic marker means callers get PSBT bytes (they expect base64 form),
    /// anything else is plain text.
    pub fn extract(&self) -> Result<ScanPayload> {
        if !self.is_complete() {
            return Err(CoreError::InvalidPayload("transfer incomplete".to_string()));
        }
        let total = self.total.unwrap_or(0);
        let mut joined = String::new();
        for i in 1..=total {
            match self.fragments.get(&i) {
                Some(fragment) => joined.push_str(fragment),
                None => return Err(CoreError::InvalidPayload(format!("missing part {i}"))),
            }
        }

        let bytes = hex::decode(&joined)?;
        if bytes.starts_with(PSBT_MAGIC) {
            Ok(ScanPayload::Psbt(bytes))
        } else {
            Ok(ScanPayload::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }
}

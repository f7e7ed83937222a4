//! Animated-QR transport for PSBTs and raw transactions.
//!
//! Outbound, [`start_encoding`] turns a payload into a [`FrameSource`] whose
//! frames are shown on a timer and cycle forever, so a scanner can join
//! mid-rotation. Inbound, a caller-owned [`ReassemblyState`] accepts raw
//! scan strings one at a time, recognizes the format from the frame itself,
//! and reports progress until the payload is whole. One `ReassemblyState`
//! per transfer; drop it when done or abandoned.
//!
//! Frame classification is an ordered list of prefix checks. The order is
//! load-bearing for interop with third-party signers (a `ur:bytes` frame
//! with a `seq-seqlen` segment is second generation, without one it is the
//! first-generation indexed format) and is pinned by tests.

pub mod base43;
pub mod bbqr;
pub mod legacy;
pub mod ur;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::psbt::PartiallySignedTransaction as Psbt;
use sha2::{Digest, Sha256};

use crate::errors::{CoreError, Result};
use crate::files::PSBT_MAGIC;

pub use ur::UrType;

/// What a completed transfer turned out to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPayload {
    /// Binary PSBT (magic verified where the format allows it).
    Psbt(Vec<u8>),
    /// Raw transaction hex ready for broadcast.
    RawTx(String),
    /// Anything else: descriptors, account exports, plain text.
    Text(String),
}

/// Status returned after every scanned frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResult {
    pub done: bool,
    /// 0..=1, non-decreasing across calls for one transfer.
    pub progress: f32,
    /// Present once `done` is true.
    pub payload: Option<ScanPayload>,
}

/// Outbound frame format, chosen by the caller per signer capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Second-generation fountain frames under a `ur:` registry type.
    Ur(UrType),
    /// First-generation indexed `<i>of<n>` frames.
    Legacy,
    /// Compact `B$` frames; the char is the file-type letter (`P` for
    /// PSBT, `T` for transaction, `U` for unknown).
    Bbqr(char),
}

/// Cycling iterator over the encoded frames of one transfer. Driven by a
/// display timer, independent of any scanning on the other side.
pub struct FrameSource {
    frames: Vec<String>,
    cursor: usize,
}

impl FrameSource {
    pub fn total(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// Next frame to display, wrapping back to the first after the last.
    pub fn next_frame(&mut self) -> &str {
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.frames.len();
        &self.frames[idx]
    }
}

/// Encode `payload` for display. `capacity` is the per-frame payload budget
/// in bytes (clamped to something sane by each format).
pub fn start_encoding(payload: &[u8], format: FrameFormat, capacity: usize) -> Result<FrameSource> {
    if payload.is_empty() {
        return Err(CoreError::InvalidPayload("nothing to encode".to_string()));
    }
    let frames = match format {
        FrameFormat::Ur(ur_type) => ur::encode_ur(ur_type, payload, capacity)?,
        FrameFormat::Legacy => legacy::encode(&hex::encode(payload), capacity.max(1) * 2),
        FrameFormat::Bbqr(file_type) => bbqr::encode(payload, file_type, capacity)?,
    };
    Ok(FrameSource { frames, cursor: 0 })
}

/// Multi-part decoder currently attached to the in-flight transfer.
enum ActiveDecoder {
    Idle,
    Fountain(ur::UrDecoder),
    Legacy(legacy::LegacyDecoder),
    Bbqr(bbqr::BbqrDecoder),
}

/// How a single scanned string is routed. Variants are tried in this exact
/// order; reordering breaks signers that emit ambiguous prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Fountain,
    Bbqr,
    Legacy,
    /// Single-frame formats resolved inline: base43, base64, raw hex.
    Inline,
}

fn has_seq_segment(frame: &str) -> bool {
    let mut segments = frame.split('/');
    let _type = segments.next();
    match segments.next().and_then(|s| s.split_once('-')) {
        Some((num, len)) => num.parse::<u32>().is_ok() && len.parse::<u32>().is_ok(),
        None => false,
    }
}

fn classify(frame: &str) -> FrameKind {
    let upper = frame.to_uppercase();
    if upper.starts_with("UR:CRYPTO-ACCOUNT")
        || upper.starts_with("UR:CRYPTO-PSBT")
        || upper.starts_with("UR:CRYPTO-OUTPUT")
    {
        FrameKind::Fountain
    } else if upper.starts_with("B$") {
        FrameKind::Bbqr
    } else if upper.starts_with("UR:BYTES") && has_seq_segment(frame) {
        FrameKind::Fountain
    } else if upper.starts_with("UR") {
        FrameKind::Legacy
    } else {
        FrameKind::Inline
    }
}

/// Reassembles one inbound transfer from live camera scans.
///
/// Duplicate frames (by content hash) are remembered in scan order and
/// ignored. Malformed frames are logged and skipped so a single bad read
/// never aborts an otherwise good transfer; only a fragment provably from a
/// different message resets the attached decoder.
pub struct ReassemblyState {
    seen: Vec<[u8; 32]>,
    decoder: ActiveDecoder,
    best_progress: f32,
    result: Option<ScanPayload>,
}

impl Default for ReassemblyState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReassemblyState {
    pub fn new() -> Self {
        ReassemblyState {
            seen: Vec::new(),
            decoder: ActiveDecoder::Idle,
            best_progress: 0.0,
            result: None,
        }
    }

    /// Number of distinct frames scanned so far.
    pub fn frames_seen(&self) -> usize {
        self.seen.len()
    }

    fn status(&mut self) -> DecodeResult {
        let current = match (&self.result, &mut self.decoder) {
            (Some(_), _) => 1.0,
            (None, ActiveDecoder::Fountain(d)) => d.estimated_percent_complete(),
            (None, ActiveDecoder::Legacy(d)) => d.progress(),
            (None, ActiveDecoder::Bbqr(d)) => d.progress(),
            (None, ActiveDecoder::Idle) => 0.0,
        };
        self.best_progress = self.best_progress.max(current);
        DecodeResult {
            done: self.result.is_some(),
            progress: self.best_progress,
            payload: self.result.clone(),
        }
    }

    fn finish(&mut self, payload: ScanPayload) -> DecodeResult {
        self.result = Some(payload);
        self.decoder = ActiveDecoder::Idle;
        self.status()
    }

    /// Feed one scanned string. Idempotent under duplicate scans.
    pub fn feed(&mut self, raw: &str) -> DecodeResult {
        let frame = raw.trim();
        if frame.is_empty() || self.result.is_some() {
            return self.status();
        }

        let digest: [u8; 32] = Sha256::digest(frame.as_bytes()).into();
        if self.seen.contains(&digest) {
            return self.status();
        }
        self.seen.push(digest);

        match classify(frame) {
            FrameKind::Fountain => self.feed_fountain(frame),
            FrameKind::Bbqr => self.feed_bbqr(frame),
            FrameKind::Legacy => self.feed_legacy(frame),
            FrameKind::Inline => self.feed_inline(frame),
        }
    }

    fn feed_fountain(&mut self, frame: &str) -> DecodeResult {
        if !matches!(self.decoder, ActiveDecoder::Fountain(_)) {
            if !matches!(self.decoder, ActiveDecoder::Idle) {
                log::warn!("fountain frame during a non-fountain transfer, ignoring");
                return self.status();
            }
            self.decoder = ActiveDecoder::Fountain(ur::UrDecoder::new());
        }

        let ActiveDecoder::Fountain(decoder) = &mut self.decoder else {
            return self.status();
        };
        if let Err(e) = decoder.receive_part(frame) {
            if matches!(&e, CoreError::InvalidPayload(msg) if msg == ur::MISMATCH_MSG) {
                // The frame belongs to a new transfer. Restart with it, and
                // keep going: a single-frame transfer is already complete at
                // this point, and the dedup cache means this exact frame
                // will never be offered again.
                log::warn!("stale fountain fragment, restarting transfer: {e}");
                let mut fresh = ur::UrDecoder::new();
                if let Err(e) = fresh.receive_part(frame) {
                    log::warn!("dropping bad fountain frame: {e}");
                }
                self.decoder = ActiveDecoder::Fountain(fresh);
            } else {
                log::warn!("dropping bad fountain frame: {e}");
                return self.status();
            }
        }

        let ActiveDecoder::Fountain(decoder) = &mut self.decoder else {
            return self.status();
        };
        if decoder.is_complete() {
            let ur_type = decoder.ur_type();
            match decoder.extract() {
                Ok(message) => {
                    let payload = match ur_type {
                        Some(UrType::CryptoPsbt) => ScanPayload::Psbt(message),
                        Some(UrType::Bytes) if message.starts_with(PSBT_MAGIC) => {
                            ScanPayload::Psbt(message)
                        }
                        _ => ScanPayload::Text(String::from_utf8_lossy(&message).into_owned()),
                    };
                    return self.finish(payload);
                }
                Err(e) => {
                    log::warn!("fountain transfer corrupt, restarting: {e}");
                    self.decoder = ActiveDecoder::Fountain(ur::UrDecoder::new());
                }
            }
        }
        self.status()
    }

    fn feed_legacy(&mut self, frame: &str) -> DecodeResult {
        if !matches!(self.decoder, ActiveDecoder::Legacy(_)) {
            if !matches!(self.decoder, ActiveDecoder::Idle) {
                log::warn!("legacy frame during a non-legacy transfer, ignoring");
                return self.status();
            }
            self.decoder = ActiveDecoder::Legacy(legacy::LegacyDecoder::new());
        }

        let ActiveDecoder::Legacy(decoder) = &mut self.decoder else {
            return self.status();
        };
        if let Err(e) = decoder.receive(frame) {
            log::warn!("dropping bad legacy frame: {e}");
            return self.status();
        }
        if decoder.is_complete() {
            match decoder.extract() {
                Ok(payload) => return self.finish(payload),
                Err(e) => {
                    log::warn!("legacy transfer corrupt, restarting: {e}");
                    self.decoder = ActiveDecoder::Legacy(legacy::LegacyDecoder::new());
                }
            }
        }
        self.status()
    }

    fn feed_bbqr(&mut self, frame: &str) -> DecodeResult {
        if !matches!(self.decoder, ActiveDecoder::Bbqr(_)) {
            if !matches!(self.decoder, ActiveDecoder::Idle) {
                log::warn!("bbqr frame during a non-bbqr transfer, ignoring");
                return self.status();
            }
            self.decoder = ActiveDecoder::Bbqr(bbqr::BbqrDecoder::new());
        }

        let ActiveDecoder::Bbqr(decoder) = &mut self.decoder else {
            return self.status();
        };
        if let Err(e) = decoder.receive(frame) {
            log::warn!("dropping bad bbqr frame: {e}");
            return self.status();
        }
        if decoder.is_complete() {
            match decoder.extract() {
                Ok(payload) => return self.finish(payload),
                Err(e) => {
                    log::warn!("bbqr transfer corrupt, restarting: {e}");
                    self.decoder = ActiveDecoder::Bbqr(bbqr::BbqrDecoder::new());
                }
            }
        }
        self.status()
    }

    /// Single-frame fallbacks, in fixed order: base43 (desktop tools),
    /// short non-base64 text as raw transaction hex, otherwise a base64
    /// PSBT candidate.
    fn feed_inline(&mut self, frame: &str) -> DecodeResult {
        if let Ok(bytes) = base43::decode(frame) {
            // Only a full parse proves this is a PSBT; the dense alphabet
            // happily decodes plenty of non-PSBT strings.
            if Psbt::deserialize(&bytes).is_ok() {
                return self.finish(ScanPayload::Psbt(bytes));
            }
        }

        if !frame.contains('+') && !frame.contains('=') && frame.len() < 300 {
            return self.finish(ScanPayload::RawTx(frame.to_string()));
        }

        match BASE64.decode(frame) {
            Ok(bytes) if bytes.starts_with(PSBT_MAGIC) => self.finish(ScanPayload::Psbt(bytes)),
            _ => self.finish(ScanPayload::Text(frame.to_string())),
        }
    }
}

//! Second-generation multi-part QR format (`ur:` prefixed).
//!
//! Payload bytes are wrapped in a CBOR frame, armored as bytewords in their
//! two-letter minimal style, and carried under a typed `ur:` path. Large
//! payloads are split into rotating fragments carrying a `seq-seqlen` path
//! segment; a scanner can join mid-rotation, frames arrive in any order,
//! and completeness is reported as a running estimate.

use std::collections::HashMap;
use std::sync::OnceLock;

use sha2::{Digest, Sha256};

use crate::errors::{CoreError, Result};

/// Bytewords list (one word per byte value); the minimal style keeps only
/// the first and last letter of each word.
#[rustfmt::skip]
const WORDS: [&str; 256] = [
    "able", "acid", "also", "apex", "aqua", "arch", "atom", "aunt",
    "away", "axis", "back", "bald", "barn", "belt", "beta", "bias",
    "blue", "body", "brag", "brew", "bulb", "buzz", "calm", "cash",
    "cats", "chef", "city", "claw", "code", "cola", "cook", "cost",
    "crux", "curl", "cusp", "cyan", "dark", "data", "days", "deli",
    "dice", "diet", "door", "down", "draw", "drop", "drum", "dull",
    "duty", "each", "easy", "echo", "edge", "epic", "even", "exam",
    "exit", "eyes", "fact", "fair", "fern", "figs", "film", "fish",
    "fizz", "flap", "flew", "flux", "foxy", "free", "frog", "fuel",
    "fund", "gala", "game", "gear", "gems", "gift", "girl", "glow",
    "good", "gray", "grim", "guru", "gush", "gyro", "half", "hang",
    "hard", "hawk", "heat", "help", "high", "hill", "holy", "hope",
    "horn", "huts", "iced", "idea", "idle", "inch", "inky", "into",
    "iris", "iron", "item", "jade", "jazz", "join", "jolt", "jowl",
    "judo", "jugs", "jump", "junk", "jury", "keep", "keno", "kept",
    "keys", "kick", "kiln", "king", "kite", "kiwi", "knob", "lamb",
    "lava", "lazy", "leaf", "legs", "liar", "limp", "lion", "list",
    "logo", "loud", "love", "luau", "luck", "lung", "main", "many",
    "math", "maze", "memo", "menu", "meow", "mild", "mint", "miss",
    "monk", "nail", "navy", "need", "news", "next", "noon", "note",
    "numb", "obey", "oboe", "omit", "onyx", "open", "oval", "owls",
    "paid", "part", "peck", "play", "plus", "poem", "pool", "pose",
    "puff", "puma", "purr", "quad", "quiz", "race", "ramp", "real",
    "redo", "rich", "road", "rock", "roof", "ruby", "ruin", "runs",
    "rust", "safe", "saga", "scar", "sets", "silk", "skew", "slot",
    "soap", "solo", "song", "stub", "surf", "swan", "taco", "task",
    "taxi", "tent", "tied", "time", "tiny", "toil", "tomb", "toys",
    "trip", "tuna", "twin", "ugly", "undo", "unit", "urge", "user",
    "vast", "very", "veto", "vial", "vibe", "view", "visa", "void",
    "vows", "wall", "wand", "warm", "wasp", "wave", "waxy", "webs",
    "what", "when", "whiz", "wolf", "work", "yank", "yawn", "yell",
    "yoga", "yurt", "zaps", "zero", "zest", "zinc", "zone", "zoom",
];

fn minimal_lookup() -> &'static HashMap<[u8; 2], u8> {
    static LOOKUP: OnceLock<HashMap<[u8; 2], u8>> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        let mut map = HashMap::with_capacity(256);
        for (value, word) in WORDS.iter().enumerate() {
            let bytes = word.as_bytes();
            map.insert([bytes[0], bytes[3]], value as u8);
        }
        map
    })
}

/// Error text marking a fragment that belongs to some other transfer; the
/// scan loop resets its decoder when it sees this instead of waiting forever.
pub(crate) const MISMATCH_MSG: &str = "fragment belongs to a different message";

/// Four-byte integrity tag over the full message.
fn checksum(data: &[u8]) -> u32 {
    let digest = Sha256::digest(data);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Armor bytes as minimal bytewords with a trailing checksum tag.
pub fn bytewords_encode(data: &[u8]) -> String {
    let tag = checksum(data).to_be_bytes();
    let mut out = String::with_capacity((data.len() + 4) * 2);
    for &b in data.iter().chain(tag.iter()) {
        let word = WORDS[b as usize].as_bytes();
        out.push(word[0] as char);
        out.push(word[3] as char);
    }
    out
}

/// Strip the bytewords armor, verifying the trailing checksum tag.
pub fn bytewords_decode(armored: &str) -> Result<Vec<u8>> {
    let lower = armored.to_lowercase();
    let chars = lower.as_bytes();
    if chars.len() % 2 != 0 || chars.len() < 8 {
        return Err(CoreError::InvalidPayload("truncated bytewords".to_string()));
    }

    let lookup = minimal_lookup();
    let mut bytes = Vec::with_capacity(chars.len() / 2);
    for pair in chars.chunks(2) {
        match lookup.get(&[pair[0], pair[1]]) {
            Some(&b) => bytes.push(b),
            None => {
                return Err(CoreError::InvalidPayload(format!(
                    "unknown byteword {:?}",
                    std::str::from_utf8(pair).unwrap_or("?")
                )))
            }
        }
    }

    let body_len = bytes.len() - 4;
    let (body, tag) = bytes.split_at(body_len);
    let expected = u32::from_be_bytes([tag[0], tag[1], tag[2], tag[3]]);
    if checksum(body) != expected {
        return Err(CoreError::InvalidPayload("bytewords checksum mismatch".to_string()));
    }
    Ok(body.to_vec())
}

/// Registry types this transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrType {
    CryptoPsbt,
    CryptoAccount,
    CryptoOutput,
    Bytes,
}

impl UrType {
    pub fn tag(&self) -> &'static str {
        match self {
            UrType::CryptoPsbt => "crypto-psbt",
            UrType::CryptoAccount => "crypto-account",
            UrType::CryptoOutput => "crypto-output",
            UrType::Bytes => "bytes",
        }
    }

    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "crypto-psbt" => Ok(UrType::CryptoPsbt),
            "crypto-account" => Ok(UrType::CryptoAccount),
            "crypto-output" => Ok(UrType::CryptoOutput),
            "bytes" => Ok(UrType::Bytes),
            other => Err(CoreError::UnsupportedQrFormat(format!("unknown ur type {other:?}"))),
        }
    }
}

fn cbor_wrap(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    minicbor::Encoder::new(&mut out)
        .bytes(payload)
        .map_err(|e| CoreError::Cbor(e.to_string()))?;
    Ok(out)
}

fn cbor_unwrap(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = minicbor::Decoder::new(data);
    Ok(decoder.bytes().map_err(|e| CoreError::Cbor(e.to_string()))?.to_vec())
}

struct Part {
    seq_num: u32,
    seq_len: u32,
    message_len: u32,
    checksum: u32,
    fragment: Vec<u8>,
}

fn encode_part(part: &Part) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(part.fragment.len() + 24);
    let mut enc = minicbor::Encoder::new(&mut out);
    enc.array(5)
        .and_then(|e| e.u32(part.seq_num))
        .and_then(|e| e.u32(part.seq_len))
        .and_then(|e| e.u32(part.message_len))
        .and_then(|e| e.u32(part.checksum))
        .and_then(|e| e.bytes(&part.fragment))
        .map_err(|e| CoreError::Cbor(e.to_string()))?;
    Ok(out)
}

fn decode_part(data: &[u8]) -> Result<Part> {
    let mut d = minicbor::Decoder::new(data);
    let parse = |e: minicbor::decode::Error| CoreError::Cbor(e.to_string());
    let len = d.array().map_err(parse)?;
    if len != Some(5) {
        return Err(CoreError::Cbor("part is not a 5-element array".to_string()));
    }
    Ok(Part {
        seq_num: d.u32().map_err(parse)?,
        seq_len: d.u32().map_err(parse)?,
        message_len: d.u32().map_err(parse)?,
        checksum: d.u32().map_err(parse)?,
        fragment: d.bytes().map_err(parse)?.to_vec(),
    })
}

/// Encode a payload as `ur:` frames with at most `capacity` payload bytes
/// per fragment. `bytes` transfers always carry a `seq-seqlen` segment
/// (including `1-1`) so receivers can tell them apart from the
/// first-generation format.
pub fn encode_ur(ur_type: UrType, payload: &[u8], capacity: usize) -> Result<Vec<String>> {
    let capacity = capacity.max(10);

    if payload.len() <= capacity && ur_type != UrType::Bytes {
        let armored = bytewords_encode(&cbor_wrap(payload)?);
        return Ok(vec![format!("ur:{}/{}", ur_type.tag(), armored)]);
    }

    let seq_len = payload.len().div_ceil(capacity) as u32;
    let message_len = payload.len() as u32;
    let message_checksum = checksum(payload);

    let mut frames = Vec::with_capacity(seq_len as usize);
    for (i, fragment) in payload.chunks(capacity).enumerate() {
        let part = Part {
            seq_num: i as u32 + 1,
            seq_len,
            message_len,
            checksum: message_checksum,
            fragment: fragment.to_vec(),
        };
        let armored = bytewords_encode(&encode_part(&part)?);
        frames.push(format!("ur:{}/{}-{}/{}", ur_type.tag(), i + 1, seq_len, armored));
    }
    Ok(frames)
}

/// Reassembles `ur:` frames of one transfer. One instance per transfer;
/// discard it after completion, never reuse it.
pub struct UrDecoder {
    ur_type: Option<UrType>,
    fragments: HashMap<u32, Vec<u8>>,
    seq_len: Option<u32>,
    message_len: u32,
    message_checksum: u32,
    single: Option<Vec<u8>>,
    best_progress: f32,
}

impl Default for UrDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl UrDecoder {
    pub fn new() -> Self {
        UrDecoder {
            ur_type: None,
            fragments: HashMap::new(),
            seq_len: None,
            message_len: 0,
            message_checksum: 0,
            single: None,
            best_progress: 0.0,
        }
    }

    pub fn ur_type(&self) -> Option<UrType> {
        self.ur_type
    }

    pub fn receive_part(&mut self, frame: &str) -> Result<()> {
        let lower = frame.to_lowercase();
        let body = lower
            .strip_prefix("ur:")
            .ok_or_else(|| CoreError::UnsupportedQrFormat("missing ur: prefix".to_string()))?;

        let mut segments = body.split('/');
        let type_tag = segments
            .next()
            .ok_or_else(|| CoreError::InvalidPayload("empty ur path".to_string()))?;
        let ur_type = UrType::parse(type_tag)?;
        if let Some(known) = self.ur_type {
            if known != ur_type {
                return Err(CoreError::InvalidPayload(format!(
                    "frame type {} does not match transfer type {}",
                    ur_type.tag(),
                    known.tag()
                )));
            }
        }
        self.ur_type = Some(ur_type);

        let rest: Vec<&str> = segments.collect();
        match rest.as_slice() {
            [armored] => {
                let message = cbor_unwrap(&bytewords_decode(armored)?)?;
                self.single = Some(message);
                Ok(())
            }
            [seq, armored] => {
                let (seq_num, seq_len) = parse_seq(seq)?;
                let part = decode_part(&bytewords_decode(armored)?)?;
                if part.seq_num != seq_num || part.seq_len != seq_len {
                    return Err(CoreError::InvalidPayload(
                        "part header disagrees with ur path".to_string(),
                    ));
                }
                if let Some(known) = self.seq_len {
                    if known != seq_len || self.message_checksum != part.checksum {
                        // A frame from a different transfer: total corruption
                        // for this reassembly.
                        return Err(CoreError::InvalidPayload(MISMATCH_MSG.to_string()));
                    }
                } else {
                    self.seq_len = Some(seq_len);
                    self.message_len = part.message_len;
                    self.message_checksum = part.checksum;
                }
                let index = (seq_num - 1) % seq_len;
                self.fragments.entry(index).or_insert(part.fragment);
                Ok(())
            }
            _ => Err(CoreError::InvalidPayload("unrecognized ur path".to_string())),
        }
    }

    pub fn is_complete(&self) -> bool {
        if self.single.is_some() {
            return true;
        }
        matches!(self.seq_len, Some(len) if self.fragments.len() as u32 >= len)
    }

    /// Running completeness estimate, non-decreasing across calls and 1.0
    /// exactly at completion.
    pub fn estimated_percent_complete(&mut self) -> f32 {
        let current = if self.single.is_some() {
            1.0
        } else {
            match self.seq_len {
                Some(len) if len > 0 => self.fragments.len() as f32 / len as f32,
                _ => 0.0,
            }
        };
        self.best_progress = self.best_progress.max(current);
        self.best_progress
    }

    pub fn extract(&self) -> Result<Vec<u8>> {
        if let Some(message) = &self.single {
            return Ok(message.clone());
        }
        let seq_len = self
            .seq_len
            .ok_or_else(|| CoreError::InvalidPayload("no frames received".to_string()))?;
        if !self.is_complete() {
            return Err(CoreError::InvalidPayload("transfer incomplete".to_string()));
        }

        let mut message = Vec::with_capacity(self.message_len as usize);
        for i in 0..seq_len {
            match self.fragments.get(&i) {
                Some(fragment) => message.extend_from_slice(fragment),
                None => return Err(CoreError::InvalidPayload(format!("missing fragment {i}"))),
            }
        }
        message.truncate(self.message_len as usize);

        if checksum(&message) != self.message_checksum {
            return Err(CoreError::InvalidPayload("message checksum mismatch".to_string()));
        }
        Ok(message)
    }
}

fn parse_seq(seq: &str) -> Result<(u32, u32)> {
    let (num, len) = seq
        .split_once('-')
        .ok_or_else(|| CoreError::InvalidPayload(format!("bad seq segment {seq:?}")))?;
    let num: u32 =
        num.parse().map_err(|_| CoreError::InvalidPayload(format!("bad seq number {num:?}")))?;
    let len: u32 =
        len.parse().map_err(|_| CoreError::InvalidPayload(format!("bad seq length {len:?}")))?;
    if num == 0 || len == 0 {
        return Err(CoreError::InvalidPayload("seq fields must be positive".to_string()));
    }
    Ok((num, len))
}

//! Dense-alphabet single-frame encoding used by Electrum desktop.
//!
//! 43 symbols were chosen by Electrum to hit the QR alphanumeric mode's
//! character set, which packs far denser than byte mode.

use crate::errors::{CoreError, Result};

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ$*+-./:";

fn digit_of(c: u8) -> Option<u32> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u32)
}

/// Decode a base43 string into bytes.
pub fn decode(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CoreError::UnsupportedQrFormat("empty base43 payload".to_string()));
    }

    let mut out: Vec<u8> = Vec::new();
    let mut leading_zeros = 0usize;
    let mut seen_nonzero = false;

    for &c in s.as_bytes() {
        let digit = digit_of(c).ok_or_else(|| {
            CoreError::UnsupportedQrFormat(format!("character {:?} outside base43 alphabet", c as char))
        })?;
        if !seen_nonzero {
            if digit == 0 {
                leading_zeros += 1;
                continue;
            }
            seen_nonzero = true;
        }

        let mut carry = digit;
        for byte in out.iter_mut().rev() {
            let v = (*byte as u32) * 43 + carry;
            *byte = (v & 0xFF) as u8;
            carry = v >> 8;
        }
        while carry > 0 {
            out.insert(0, (carry & 0xFF) as u8);
            carry >>= 8;
        }
        if out.is_empty() {
            out.push(0);
        }
    }

    let mut bytes = vec![0u8; leading_zeros];
    bytes.extend(out);
    Ok(bytes)
}

/// Encode bytes as base43 (the inverse of [`decode`], used for interop
/// fixtures and round-trip tests).
pub fn encode(bytes: &[u8]) -> String {
    let leading_zeros = bytes.iter().take_while(|&&b| b == 0).count();
    let mut digits: Vec<u32> = Vec::new();

    for &byte in &bytes[leading_zeros..] {
        let mut carry = byte as u32;
        for d in digits.iter_mut().rev() {
            let v = *d * 256 + carry;
            *d = v % 43;
            carry = v / 43;
        }
        while carry > 0 {
            digits.insert(0, carry % 43);
            carry /= 43;
        }
        if digits.is_empty() {
            digits.push(0);
        }
    }

    let mut s = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        s.push(ALPHABET[0] as char);
    }
    for d in digits {
        s.push(ALPHABET[d as usize] as char);
    }
    s
}

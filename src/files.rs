//! Plain-text import/export of PSBT and transaction payloads.
//!
//! `.psbt` files are base64 text; import also accepts hex (some desktop
//! tools export that) and normalizes to base64.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::psbt::PartiallySignedTransaction as Psbt;

use crate::errors::{CoreError, Result};

pub(crate) const PSBT_MAGIC: &[u8] = b"psbt\xff";

/// Normalize a textual PSBT (base64 or hex) to its binary form.
pub fn psbt_from_text(text: &str) -> Result<Psbt> {
    let trimmed = text.trim();

    let bytes = if trimmed.chars().all(|c| c.is_ascii_hexdigit()) && trimmed.len() % 2 == 0 {
        hex::decode(trimmed)?
    } else {
        BASE64
            .decode(trimmed)
            .map_err(|e| CoreError::InvalidPayload(format!("not base64 or hex: {e}")))?
    };

    if !bytes.starts_with(PSBT_MAGIC) {
        return Err(CoreError::InvalidPayload("missing PSBT magic".to_string()));
    }
    Ok(Psbt::deserialize(&bytes)?)
}

pub fn psbt_to_base64(psbt: &Psbt) -> String {
    BASE64.encode(psbt.serialize())
}

/// Timestamp-derived export filename, e.g. `1693555200000.psbt`.
pub fn export_filename() -> String {
    format!("{}.psbt", chrono::Utc::now().timestamp_millis())
}

/// Write the PSBT as base64 text into `dir`, returning the created path.
pub fn export_psbt(psbt: &Psbt, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(export_filename());
    std::fs::write(&path, psbt_to_base64(psbt))?;
    log::info!("exported psbt to {}", path.display());
    Ok(path)
}

/// Read a `.psbt` (or raw transaction) text file.
pub fn import_psbt(path: &Path) -> Result<Psbt> {
    let text = std::fs::read_to_string(path)?;
    psbt_from_text(&text)
}

//! Debounced persistence of per-UTXO metadata edits.
//!
//! Rapid freeze toggles and memo edits would otherwise hammer the storage
//! collaborator with one write per keystroke. Edits are staged and written
//! after a quiet period; `flush` writes immediately and is the teardown
//! path, so navigating away never drops the last edit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bitcoin::Txid;

use crate::errors::Result;
use crate::types::UtxoMetadata;
use crate::wallet::Wallet;

pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(500);

pub struct MetadataDebouncer {
    pending: HashMap<(Txid, u32), UtxoMetadata>,
    last_edit: Option<Instant>,
    interval: Duration,
}

impl Default for MetadataDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataDebouncer {
    pub fn new() -> Self {
        Self::with_interval(DEBOUNCE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        MetadataDebouncer { pending: HashMap::new(), last_edit: None, interval }
    }

    /// Stage an edit; a later edit for the same outpoint replaces it.
    pub fn record(&mut self, txid: Txid, vout: u32, meta: UtxoMetadata) {
        self.pending.insert((txid, vout), meta);
        self.last_edit = Some(Instant::now());
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Persist staged edits if the quiet period has elapsed. Call on a
    /// timer tick; returns how many edits were written.
    pub fn tick(&mut self, wallet: &dyn Wallet) -> Result<usize> {
        match self.last_edit {
            Some(at) if at.elapsed() >= self.interval => self.flush(wallet),
            _ => Ok(0),
        }
    }

    /// Persist everything staged right now. Invoked on session teardown.
    pub fn flush(&mut self, wallet: &dyn Wallet) -> Result<usize> {
        let count = self.pending.len();
        for ((txid, vout), meta) in self.pending.drain() {
            wallet.set_utxo_metadata(&txid, vout, meta)?;
        }
        self.last_edit = None;
        if count > 0 {
            log::debug!("flushed {count} metadata edits");
        }
        Ok(count)
    }

    /// Drop staged edits without writing (explicit cancel).
    pub fn cancel(&mut self) {
        self.pending.clear();
        self.last_edit = None;
    }
}

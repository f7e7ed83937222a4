//! The wallet collaborator as seen by the signing core.
//!
//! The core never derives keys or addresses itself; it asks the wallet for
//! spendable outputs, per-output metadata, and the signing policy.

use std::collections::HashSet;

use bitcoin::Txid;

use crate::errors::Result;
use crate::types::{CosignerThreshold, Utxo, UtxoMetadata};

/// What a wallet kind is able to do, checked once at the boundary instead of
/// probed ad hoc.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalletCapabilities {
    /// Wallet can attach signatures to a PSBT of its own (multisig member).
    pub can_cosign: bool,
    /// Wallet can produce an unsigned PSBT for external signing.
    pub can_export_unsigned: bool,
    /// Wallet tracks per-UTXO metadata (memo/freeze).
    pub has_coin_control: bool,
}

/// External wallet contract used by the core. Implementations own key
/// material and storage; this crate only reads policy and UTXO state, and
/// writes metadata through [`Wallet::set_utxo_metadata`].
pub trait Wallet: Send + Sync {
    /// All known UTXOs. With `include_frozen` set, frozen outputs are
    /// returned too (coin-control view); otherwise they are filtered out.
    fn list_utxos(&self, include_frozen: bool) -> Vec<Utxo>;

    fn utxo_metadata(&self, txid: &Txid, vout: u32) -> UtxoMetadata;

    fn set_utxo_metadata(&self, txid: &Txid, vout: u32, meta: UtxoMetadata) -> Result<()>;

    fn is_own_address(&self, address: &str) -> bool;

    fn threshold(&self) -> CosignerThreshold;

    fn capabilities(&self) -> WalletCapabilities;
}

/// Spendable UTXO set for an automatic selection: frozen outputs are
/// excluded unless the caller explicitly picked them (coin control's
/// "use selected coins").
pub fn spendable_utxos(wallet: &dyn Wallet, override_outpoints: &HashSet<String>) -> Vec<Utxo> {
    wallet
        .list_utxos(true)
        .into_iter()
        .filter(|u| {
            if override_outpoints.contains(&u.outpoint_key()) {
                return true;
            }
            if !override_outpoints.is_empty() {
                // Coin control narrows selection to exactly the chosen coins.
                return false;
            }
            !wallet.utxo_metadata(&u.txid, u.vout).frozen
        })
        .collect()
}

/// Sum of all frozen outputs, for the coin-control balance line.
pub fn frozen_balance(wallet: &dyn Wallet) -> u64 {
    wallet
        .list_utxos(true)
        .iter()
        .filter(|u| wallet.utxo_metadata(&u.txid, u.vout).frozen)
        .map(|u| u.value_sat)
        .sum()
}

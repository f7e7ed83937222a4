use bitcoin::Txid;
use serde::{Deserialize, Serialize};

/// An unspent transaction output as observed on chain. Immutable once
/// observed; a refresh replaces the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    /// Address the output pays to, in its textual form.
    pub address: String,
    pub value_sat: u64,
    pub confirmations: u32,
    pub block_height: Option<u32>,
}

impl Utxo {
    /// Stable identity used for metadata keys and tie-breaking.
    pub fn outpoint_key(&self) -> String {
        format!("{}:{}", self.txid, self.vout)
    }
}

/// User-editable per-UTXO metadata, keyed by `(txid, vout)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoMetadata {
    pub memo: Option<String>,
    #[serde(default)]
    pub frozen: bool,
}

/// Where coins are going. `Max` consumes the entire remaining balance and
/// must appear at most once per build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendTarget {
    pub address: String,
    pub amount: TargetAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAmount {
    Sats(u64),
    /// Send-max sentinel: value is determined by the builder as
    /// input sum minus fee.
    Max,
}

impl SpendTarget {
    pub fn new(address: impl Into<String>, value_sat: u64) -> Self {
        SpendTarget { address: address.into(), amount: TargetAmount::Sats(value_sat) }
    }

    pub fn send_max(address: impl Into<String>) -> Self {
        SpendTarget { address: address.into(), amount: TargetAmount::Max }
    }

    pub fn is_max(&self) -> bool {
        matches!(self.amount, TargetAmount::Max)
    }

    pub fn value_sat(&self) -> Option<u64> {
        match self.amount {
            TargetAmount::Sats(v) => Some(v),
            TargetAmount::Max => None,
        }
    }
}

/// The wallet's signing policy: M required signatures out of N cosigners.
/// Fixed for the lifetime of the wallet and read-only to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosignerThreshold {
    pub m: u32,
    pub n: u32,
}

impl CosignerThreshold {
    pub fn new(m: u32, n: u32) -> Self {
        debug_assert!(m >= 1 && m <= n, "invalid threshold {m}-of-{n}");
        CosignerThreshold { m, n }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_outpoint_key_format() {
        let utxo = Utxo {
            txid: Txid::from_str("0000000000000000000000000000000000000000000000000000000000000001")
                .unwrap(),
            vout: 3,
            address: "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu".to_string(),
            value_sat: 50_000,
            confirmations: 6,
            block_height: Some(800_000),
        };
        assert!(utxo.outpoint_key().ends_with(":3"));
        assert_eq!(utxo.outpoint_key().len(), 64 + 2);
    }

    #[test]
    fn test_utxo_serde_round_trip() {
        let utxo = Utxo {
            txid: Txid::from_str("0000000000000000000000000000000000000000000000000000000000000001")
                .unwrap(),
            vout: 0,
            address: "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu".to_string(),
            value_sat: 12_345,
            confirmations: 1,
            block_height: None,
        };
        let json = serde_json::to_string(&utxo).unwrap();
        let back: Utxo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, utxo);

        // frozen defaults when the stored metadata predates the field
        let meta: UtxoMetadata = serde_json::from_str(r#"{"memo":"kept"}"#).unwrap();
        assert!(!meta.frozen);
        assert_eq!(meta.memo.as_deref(), Some("kept"));
    }

    #[test]
    fn test_metadata_defaults_to_unfrozen() {
        let meta = UtxoMetadata::default();
        assert!(!meta.frozen);
        assert!(meta.memo.is_none());
    }

    #[test]
    fn test_send_max_target() {
        let t = SpendTarget::send_max("bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert!(t.is_max());
        assert_eq!(t.value_sat(), None);
        assert_eq!(SpendTarget::new("x", 42).value_sat(), Some(42));
    }
}

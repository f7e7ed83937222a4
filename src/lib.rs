//! Air-gapped multisig signing core.
//!
//! Everything needed to move a partially signed bitcoin transaction between
//! devices that share no network link: deterministic coin selection, PSBT
//! skeleton building, signature-threshold tracking, combining cosigner
//! copies, finalization, and the animated-QR transport formats used by
//! hardware signers and desktop tools.

pub mod builder;
pub mod chain;
pub mod coinselect;
pub mod combine;
pub mod errors;
pub mod files;
pub mod finalize;
pub mod metadata;
pub mod qr;
pub mod signatures;
pub mod types;
pub mod wallet;

// Re-export main types
pub use builder::build_psbt;
pub use chain::ChainClient;
pub use coinselect::{select_coins, Selection};
pub use combine::combine_psbts;
pub use errors::{CoreError, Result};
pub use finalize::{finalize_psbt, FinalizedTx};
pub use qr::{
    start_encoding, DecodeResult, FrameFormat, FrameSource, ReassemblyState, ScanPayload, UrType,
};
pub use signatures::count_signatures;
pub use types::{CosignerThreshold, SpendTarget, Utxo, UtxoMetadata};
pub use wallet::{Wallet, WalletCapabilities};

/// Outputs below this value are uneconomical to spend and are either folded
/// into the fee (as change) or used as the probe amount when testing the
/// maximum feasible send.
pub const DUST_THRESHOLD: u64 = 546;

/// Default sequence for new inputs: signals replaceability without enabling
/// a relative locktime.
pub const DEFAULT_RBF_SEQUENCE: u32 = 0xFFFF_FFFD;

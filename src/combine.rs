//! Merging signature material from cosigner copies of one PSBT.

use bitcoin::consensus::encode::serialize;
use bitcoin::psbt::PartiallySignedTransaction as Psbt;

use crate::errors::{CoreError, Result};

/// Merge `incoming`'s signature material into `base`.
///
/// Both sides must carry the byte-identical unsigned transaction (same
/// inputs, outputs and order); anything else is a hard `IncompatiblePsbt`
/// error, never a best-effort merge. Per input the union of partial
/// signatures, derivation records and script metadata is kept, so no
/// signature present on either side is ever dropped. Merging a copy of
/// itself returns an equivalent PSBT.
pub fn combine_psbts(base: &Psbt, incoming: &Psbt) -> Result<Psbt> {
    let base_tx = serialize(&base.unsigned_tx);
    let incoming_tx = serialize(&incoming.unsigned_tx);
    if base_tx != incoming_tx {
        return Err(CoreError::IncompatiblePsbt(
            "unsigned transactions differ".to_string(),
        ));
    }

    let mut merged = base.clone();

    for (mine, theirs) in merged.inputs.iter_mut().zip(incoming.inputs.iter()) {
        for (pk, sig) in &theirs.partial_sigs {
            mine.partial_sigs.entry(*pk).or_insert_with(|| sig.clone());
        }
        for (pk, source) in &theirs.bip32_derivation {
            mine.bip32_derivation.entry(*pk).or_insert_with(|| source.clone());
        }
        if mine.witness_utxo.is_none() {
            mine.witness_utxo = theirs.witness_utxo.clone();
        }
        if mine.non_witness_utxo.is_none() {
            mine.non_witness_utxo = theirs.non_witness_utxo.clone();
        }
        if mine.witness_script.is_none() {
            mine.witness_script = theirs.witness_script.clone();
        }
        if mine.redeem_script.is_none() {
            mine.redeem_script = theirs.redeem_script.clone();
        }
        if mine.final_script_sig.is_none() {
            mine.final_script_sig = theirs.final_script_sig.clone();
        }
        if mine.final_script_witness.is_none() {
            mine.final_script_witness = theirs.final_script_witness.clone();
        }
        if mine.sighash_type.is_none() {
            mine.sighash_type = theirs.sighash_type;
        }
    }

    for (mine, theirs) in merged.outputs.iter_mut().zip(incoming.outputs.iter()) {
        for (pk, source) in &theirs.bip32_derivation {
            mine.bip32_derivation.entry(*pk).or_insert_with(|| source.clone());
        }
        if mine.witness_script.is_none() {
            mine.witness_script = theirs.witness_script.clone();
        }
        if mine.redeem_script.is_none() {
            mine.redeem_script = theirs.redeem_script.clone();
        }
    }

    Ok(merged)
}

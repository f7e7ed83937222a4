//! Turning a threshold-complete PSBT into a broadcastable transaction.

use std::collections::HashMap;

use bitcoin::blockdata::script::Instruction;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::psbt::{Input, PartiallySignedTransaction as Psbt};
use bitcoin::script::PushBytesBuf;
use bitcoin::{ScriptBuf, Witness};

use crate::errors::{CoreError, Result};
use crate::signatures::count_signatures;
use crate::types::CosignerThreshold;

#[derive(Debug, Clone)]
pub struct FinalizedTx {
    pub tx_hex: String,
    pub fee_sat: u64,
    pub fee_rate_sat_vb: u64,
}

/// Total fee carried by a PSBT: input amounts minus output amounts.
///
/// Witness inputs carry their amount directly; for non-witness inputs the
/// previous transactions are scanned and their output amounts cached by
/// outpoint.
pub fn fee_from_psbt(psbt: &Psbt) -> u64 {
    let mut goes_in: u64 = 0;
    let mut amount_cache: HashMap<String, u64> = HashMap::new();

    for input in &psbt.inputs {
        if let Some(witness_utxo) = &input.witness_utxo {
            goes_in += witness_utxo.value;
        } else if let Some(prev_tx) = &input.non_witness_utxo {
            let txid = prev_tx.txid();
            for (index, out) in prev_tx.output.iter().enumerate() {
                amount_cache.insert(format!("{txid}:{index}"), out.value);
            }
        }
    }

    if goes_in == 0 {
        // No witness amounts at all; resolve from the previous-tx cache.
        for txin in &psbt.unsigned_tx.input {
            let key = format!("{}:{}", txin.previous_output.txid, txin.previous_output.vout);
            if let Some(value) = amount_cache.get(&key) {
                goes_in += value;
            }
        }
    }

    let goes_out: u64 = psbt.unsigned_tx.output.iter().map(|o| o.value).sum();
    goes_in.saturating_sub(goes_out)
}

/// Pubkeys in script order, so witness signatures line up with how
/// OP_CHECKMULTISIG expects them.
fn ordered_script_keys(script: &ScriptBuf) -> Vec<Vec<u8>> {
    script
        .instructions()
        .filter_map(|inst| match inst {
            Ok(Instruction::PushBytes(push)) if push.as_bytes().len() == 33 || push.as_bytes().len() == 65 => {
                Some(push.as_bytes().to_vec())
            }
            _ => None,
        })
        .collect()
}

fn finalize_input(input: &mut Input, m: u32) -> Result<()> {
    if input.final_script_sig.is_some() || input.final_script_witness.is_some() {
        // Already finalized; nothing to do.
        return Ok(());
    }

    let witness_script = input.witness_script.clone().ok_or_else(|| {
        CoreError::Build("input has no witness script to finalize against".to_string())
    })?;

    // CHECKMULTISIG consumes one extra stack element, hence the leading
    // empty item; then M signatures in script-key order, then the script.
    let mut witness = Witness::new();
    witness.push(&[] as &[u8]);
    let mut pushed = 0u32;
    for key in ordered_script_keys(&witness_script) {
        if pushed == m {
            break;
        }
        let found = input
            .partial_sigs
            .iter()
            .find(|(pk, _)| pk.to_bytes() == key)
            .map(|(_, sig)| sig.to_vec());
        if let Some(sig_bytes) = found {
            witness.push(sig_bytes);
            pushed += 1;
        }
    }
    if pushed < m {
        return Err(CoreError::NotEnoughSignatures { have: pushed, need: m });
    }
    witness.push(witness_script.as_bytes());

    // Wrapped segwit spends also need the redeem script pushed in scriptSig.
    if let Some(redeem) = &input.redeem_script {
        let push = PushBytesBuf::try_from(redeem.to_bytes())
            .map_err(|_| CoreError::Build("redeem script exceeds push limit".to_string()))?;
        input.final_script_sig =
            Some(bitcoin::blockdata::script::Builder::new().push_slice(push).into_script());
    }

    input.final_script_witness = Some(witness);
    input.partial_sigs.clear();
    input.bip32_derivation.clear();
    input.witness_script = None;
    input.redeem_script = None;
    Ok(())
}

/// Finalize every input and extract the raw transaction.
///
/// Refuses to run below the signature threshold. Finalizing a PSBT whose
/// inputs are all final already is a no-op apart from the extraction. The
/// reported fee rate is `fee / virtual size`, rounded to a whole sat/vbyte.
pub fn finalize_psbt(psbt: &Psbt, threshold: CosignerThreshold) -> Result<FinalizedTx> {
    let have = count_signatures(psbt, threshold);
    if have < threshold.m {
        return Err(CoreError::NotEnoughSignatures { have, need: threshold.m });
    }

    let fee_sat = fee_from_psbt(psbt);

    let mut work = psbt.clone();
    for input in work.inputs.iter_mut() {
        finalize_input(input, threshold.m)?;
    }

    let tx = work.extract_tx();
    let vsize = tx.vsize() as u64;
    let fee_rate_sat_vb = if vsize > 0 {
        ((fee_sat as f64) / (vsize as f64)).round() as u64
    } else {
        0
    };

    log::info!(
        "finalized transaction {}: {} vbytes, {} sat fee ({} sat/vb)",
        tx.txid(),
        vsize,
        fee_sat,
        fee_rate_sat_vb
    );

    Ok(FinalizedTx { tx_hex: serialize_hex(&tx), fee_sat, fee_rate_sat_vb })
}

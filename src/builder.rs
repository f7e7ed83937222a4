//! Unsigned PSBT skeleton construction.

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::psbt::PartiallySignedTransaction as Psbt;
use bitcoin::{Address, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::coinselect::estimate_fee;
use crate::errors::{CoreError, Result};
use crate::types::{SpendTarget, Utxo};
use crate::{DEFAULT_RBF_SEQUENCE, DUST_THRESHOLD};

fn script_for(address: &str, network: Network) -> Result<ScriptBuf> {
    let addr = Address::from_str(address)?.require_network(network)?;
    Ok(addr.script_pubkey())
}

/// Build an unsigned PSBT for the chosen inputs and targets.
///
/// One input per chosen UTXO in selection order, one output per target, and
/// a change output when the leftover clears the dust threshold (dust
/// leftover is absorbed into the fee). `sequence` is a pass-through flag
/// choosing replaceability; callers that do not care get the RBF default.
pub fn build_psbt(
    chosen: &[Utxo],
    targets: &[SpendTarget],
    fee_rate: u64,
    change_address: &str,
    sequence: Option<u32>,
    network: Network,
) -> Result<Psbt> {
    if targets.is_empty() {
        return Err(CoreError::Build("no destination provided".to_string()));
    }
    if targets.iter().filter(|t| t.is_max()).count() > 1 {
        return Err(CoreError::Build("more than one send-max target".to_string()));
    }

    let sequence = Sequence(sequence.unwrap_or(DEFAULT_RBF_SEQUENCE));
    let input_sum: u64 = chosen.iter().map(|u| u.value_sat).sum();
    let fixed_sum: u64 = targets.iter().filter_map(|t| t.value_sat()).sum();
    let has_max = targets.iter().any(|t| t.is_max());
    let target_addresses: Vec<&str> = targets.iter().map(|t| t.address.as_str()).collect();

    // A send-max output absorbs the leftover, so no change output is ever
    // added alongside it.
    let fee_with_change = estimate_fee(chosen, &target_addresses, !has_max, fee_rate);
    let fee_without_change = estimate_fee(chosen, &target_addresses, false, fee_rate);

    let required = fixed_sum.saturating_add(fee_without_change);
    if input_sum < required {
        return Err(CoreError::Build(format!(
            "inputs of {input_sum} sat cannot cover {fixed_sum} sat plus fee"
        )));
    }

    let mut inputs: Vec<TxIn> = Vec::with_capacity(chosen.len());
    for utxo in chosen {
        inputs.push(TxIn {
            previous_output: OutPoint::new(utxo.txid, utxo.vout),
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        });
    }

    let mut outputs: Vec<TxOut> = Vec::with_capacity(targets.len() + 1);
    for target in targets {
        let value = match target.value_sat() {
            Some(v) => v,
            None => input_sum - fixed_sum - fee_without_change,
        };
        outputs.push(TxOut { value, script_pubkey: script_for(&target.address, network)? });
    }

    if !has_max {
        let leftover = input_sum - fixed_sum;
        if leftover >= fee_with_change && leftover - fee_with_change >= DUST_THRESHOLD {
            outputs.push(TxOut {
                value: leftover - fee_with_change,
                script_pubkey: script_for(change_address, network)?,
            });
        }
        // otherwise the leftover stays with the miners
    }

    let unsigned_tx = Transaction {
        version: 2,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: outputs,
    };

    let mut psbt = Psbt::from_unsigned_tx(unsigned_tx)?;
    for (i, utxo) in chosen.iter().enumerate() {
        psbt.inputs[i].witness_utxo = Some(TxOut {
            value: utxo.value_sat,
            script_pubkey: script_for(&utxo.address, network)?,
        });
    }

    log::debug!(
        "built unsigned psbt: {} inputs, {} outputs",
        psbt.unsigned_tx.input.len(),
        psbt.unsigned_tx.output.len()
    );
    Ok(psbt)
}

//! Signature-threshold tracking for in-flight PSBTs.

use std::collections::HashSet;

use bitcoin::blockdata::script::Instruction;
use bitcoin::psbt::{Input, PartiallySignedTransaction as Psbt};
use bitcoin::ScriptBuf;

use crate::types::CosignerThreshold;

/// Cosigner pubkeys embedded in a multisig script, in script order.
fn script_pubkeys(script: &ScriptBuf) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    for inst in script.instructions() {
        if let Ok(Instruction::PushBytes(push)) = inst {
            let bytes = push.as_bytes();
            if bytes.len() == 33 || bytes.len() == 65 {
                keys.push(bytes.to_vec());
            }
        }
    }
    keys
}

/// Recognized signatures on one input. A signature counts when it comes
/// from a distinct key belonging to the input's witness or redeem script;
/// a finalized input counts as fully signed.
pub fn input_signature_count(input: &Input, m: u32) -> u32 {
    if input.final_script_sig.is_some() || input.final_script_witness.is_some() {
        return m;
    }

    let script = input.witness_script.as_ref().or(input.redeem_script.as_ref());
    let count = match script {
        Some(script) => {
            let known: HashSet<Vec<u8>> = script_pubkeys(script).into_iter().collect();
            input
                .partial_sigs
                .keys()
                .filter(|pk| known.contains(&pk.to_bytes()))
                .count() as u32
        }
        // No script metadata to check against: trust the attached records.
        None => input.partial_sigs.len() as u32,
    };
    count.min(m)
}

/// How many of the required M signatures the PSBT carries.
///
/// A PSBT is only as signed as its least-signed input, so this is the
/// minimum per-input count, never the sum. Read-only; the PSBT is not
/// touched.
pub fn count_signatures(psbt: &Psbt, threshold: CosignerThreshold) -> u32 {
    psbt.inputs
        .iter()
        .map(|input| input_signature_count(input, threshold.m))
        .min()
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod test_support {
    use bitcoin::absolute::LockTime;
    use bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_1};
    use bitcoin::blockdata::script::Builder;
    use bitcoin::ecdsa::Signature;
    use bitcoin::psbt::PartiallySignedTransaction as Psbt;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
    use bitcoin::sighash::EcdsaSighashType;
    use bitcoin::{
        OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
    };
    use std::str::FromStr;

    pub struct MultisigFixture {
        pub psbt: Psbt,
        pub keys: Vec<(SecretKey, PublicKey)>,
        pub witness_script: ScriptBuf,
    }

    pub fn cosigner_key(seed: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        let pk = PublicKey::new(sk.public_key(&secp));
        (sk, pk)
    }

    pub fn multisig_script(m: u32, pubkeys: &[PublicKey]) -> ScriptBuf {
        let m_op = OP_PUSHNUM_1.to_u8() + (m as u8 - 1);
        let n_op = OP_PUSHNUM_1.to_u8() + (pubkeys.len() as u8 - 1);
        let mut builder = Builder::new().push_opcode(m_op.into());
        for pk in pubkeys {
            builder = builder.push_key(pk);
        }
        builder.push_opcode(n_op.into()).push_opcode(OP_CHECKMULTISIG).into_script()
    }

    /// Throwaway DER signature; the tracker checks structure, not validity.
    pub fn dummy_signature(sk: &SecretKey, nonce: u8) -> Signature {
        let secp = Secp256k1::new();
        let msg = Message::from_slice(&[nonce; 32]).unwrap();
        Signature { sig: secp.sign_ecdsa(&msg, sk), hash_ty: EcdsaSighashType::All }
    }

    /// Unsigned 2-input PSBT for an M-of-N wallet, ready to have partial
    /// signatures attached.
    pub fn multisig_psbt(m: u32, n: u32, num_inputs: usize) -> MultisigFixture {
        let keys: Vec<_> = (1..=n as u8).map(cosigner_key).collect();
        let pubkeys: Vec<PublicKey> = keys.iter().map(|(_, pk)| *pk).collect();
        let witness_script = multisig_script(m, &pubkeys);
        let spk = ScriptBuf::new_v0_p2wsh(&witness_script.wscript_hash());

        let inputs: Vec<TxIn> = (0..num_inputs)
            .map(|i| TxIn {
                previous_output: OutPoint::new(
                    Txid::from_str(
                        "1111111111111111111111111111111111111111111111111111111111111111",
                    )
                    .unwrap(),
                    i as u32,
                ),
                script_sig: ScriptBuf::new(),
                sequence: Sequence(crate::DEFAULT_RBF_SEQUENCE),
                witness: Witness::new(),
            })
            .collect();

        let tx = Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: vec![TxOut { value: 90_000, script_pubkey: spk.clone() }],
        };

        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
        for input in psbt.inputs.iter_mut() {
            input.witness_utxo = Some(TxOut { value: 50_000, script_pubkey: spk.clone() });
            input.witness_script = Some(witness_script.clone());
        }

        MultisigFixture { psbt, keys, witness_script }
    }

    /// Attach cosigner `index`'s signature to every input.
    pub fn sign_all_inputs(fixture: &mut MultisigFixture, index: usize) {
        let (sk, pk) = fixture.keys[index];
        for input in fixture.psbt.inputs.iter_mut() {
            input.partial_sigs.insert(pk, dummy_signature(&sk, index as u8 + 1));
        }
    }
}

#[cfg(test)]
mod signing_flow_tests {
    use airsign::{
        build_psbt, combine_psbts, count_signatures, finalize_psbt, select_coins, start_encoding,
        CoreError, CosignerThreshold, FrameFormat, ReassemblyState, ScanPayload, SpendTarget,
        UrType, Utxo,
    };
    use bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_2, OP_PUSHNUM_3};
    use bitcoin::blockdata::script::Builder;
    use bitcoin::consensus::deserialize;
    use bitcoin::ecdsa::Signature;
    use bitcoin::psbt::PartiallySignedTransaction as Psbt;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
    use bitcoin::sighash::EcdsaSighashType;
    use bitcoin::{Address, Network, PublicKey, ScriptBuf, Transaction, Txid};
    use std::str::FromStr;

    const DEST: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
    const CHANGE: &str = "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3";

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    struct Cosigner {
        sk: SecretKey,
        pk: PublicKey,
    }

    fn cosigner(seed: u8) -> Cosigner {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[seed; 32]).expect("valid key seed");
        let pk = PublicKey::new(sk.public_key(&secp));
        Cosigner { sk, pk }
    }

    fn two_of_three_script(cosigners: &[Cosigner]) -> ScriptBuf {
        Builder::new()
            .push_opcode(OP_PUSHNUM_2)
            .push_key(&cosigners[0].pk)
            .push_key(&cosigners[1].pk)
            .push_key(&cosigners[2].pk)
            .push_opcode(OP_PUSHNUM_3)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script()
    }

    fn wallet_utxo(txid_byte: u8, vout: u32, value_sat: u64, address: &str) -> Utxo {
        Utxo {
            txid: Txid::from_str(&hex::encode([txid_byte; 32])).expect("valid txid"),
            vout,
            address: address.to_string(),
            value_sat,
            confirmations: 6,
            block_height: Some(800_000),
        }
    }

    /// A cosigning device: takes the PSBT, attaches its signature to every
    /// input, returns its own copy. The signature only has to be
    /// structurally valid for the tracker and finalizer.
    fn cosign(psbt: &Psbt, signer: &Cosigner, nonce: u8) -> Psbt {
        let secp = Secp256k1::new();
        let msg = Message::from_slice(&[nonce; 32]).expect("32 bytes");
        let sig = Signature { sig: secp.sign_ecdsa(&msg, &signer.sk), hash_ty: EcdsaSighashType::All };

        let mut copy = psbt.clone();
        for input in copy.inputs.iter_mut() {
            input.partial_sigs.insert(signer.pk, sig);
        }
        copy
    }

    /// Full 2-of-3 flow: select, build, collect two cosigner copies one at a
    /// time, finalize, and check the extracted transaction is whole.
    #[test]
    fn test_two_of_three_cosign_round() {
        init_logging();
        let cosigners: Vec<Cosigner> = (1..=3).map(cosigner).collect();
        let witness_script = two_of_three_script(&cosigners);
        let wallet_address = Address::p2wsh(&witness_script, Network::Bitcoin).to_string();
        let threshold = CosignerThreshold::new(2, 3);

        let utxos = vec![
            wallet_utxo(0xA1, 0, 60_000, &wallet_address),
            wallet_utxo(0xB2, 1, 50_000, &wallet_address),
        ];
        let targets = vec![SpendTarget::new(DEST, 70_000)];

        let selection = select_coins(&utxos, &targets, 4).expect("funds cover the target");
        let mut psbt =
            build_psbt(&selection.chosen, &targets, 4, CHANGE, None, Network::Bitcoin)
                .expect("skeleton builds");
        for input in psbt.inputs.iter_mut() {
            input.witness_script = Some(witness_script.clone());
        }
        assert_eq!(count_signatures(&psbt, threshold), 0);

        // first signer round-trips its copy back
        let signed_a = cosign(&psbt, &cosigners[0], 1);
        let psbt = combine_psbts(&psbt, &signed_a).expect("same unsigned tx");
        assert_eq!(count_signatures(&psbt, threshold), 1);

        let below = finalize_psbt(&psbt, threshold).expect_err("one signature is not enough");
        assert!(matches!(below, CoreError::NotEnoughSignatures { have: 1, need: 2 }));

        // second signer, independent copy of the same skeleton
        let signed_b = cosign(&psbt, &cosigners[2], 2);
        let psbt = combine_psbts(&psbt, &signed_b).expect("same unsigned tx");
        assert_eq!(count_signatures(&psbt, threshold), 2);

        let finalized = finalize_psbt(&psbt, threshold).expect("threshold met");
        let tx: Transaction =
            deserialize(&hex::decode(&finalized.tx_hex).expect("hex")).expect("valid tx");
        assert_eq!(tx.input.len(), selection.chosen.len());
        for input in &tx.input {
            // empty push, two signatures, witness script
            assert_eq!(input.witness.len(), 4);
        }
        assert!(finalized.fee_sat > 0);
        assert!(finalized.fee_rate_sat_vb > 0);
    }

    /// The unsigned PSBT travels to the signer as animated QR frames and
    /// comes back byte-identical, whichever format the signer speaks.
    #[test]
    fn test_psbt_survives_every_qr_format() {
        init_logging();
        let cosigners: Vec<Cosigner> = (1..=3).map(cosigner).collect();
        let witness_script = two_of_three_script(&cosigners);
        let wallet_address = Address::p2wsh(&witness_script, Network::Bitcoin).to_string();

        let utxos = vec![wallet_utxo(0xC3, 0, 80_000, &wallet_address)];
        let targets = vec![SpendTarget::new(DEST, 40_000)];
        let psbt = build_psbt(&utxos, &targets, 2, CHANGE, None, Network::Bitcoin)
            .expect("skeleton builds");
        let bytes = psbt.serialize();

        for format in [
            FrameFormat::Ur(UrType::CryptoPsbt),
            FrameFormat::Legacy,
            FrameFormat::Bbqr('P'),
        ] {
            let source = start_encoding(&bytes, format, 60).expect("encodable");
            assert!(source.total() > 1, "{format:?} should need several frames");

            let mut state = ReassemblyState::new();
            let mut result = None;
            // frames arrive out of order, some twice
            for frame in source.frames().iter().rev().chain(source.frames().iter()) {
                result = Some(state.feed(frame));
            }
            let result = result.expect("at least one frame fed");
            assert!(result.done, "{format:?} transfer completes");
            match result.payload {
                Some(ScanPayload::Psbt(received)) => {
                    let parsed = Psbt::deserialize(&received).expect("still a valid psbt");
                    assert_eq!(parsed.unsigned_tx, psbt.unsigned_tx);
                    assert_eq!(received, bytes);
                }
                other => panic!("{format:?} produced {other:?}"),
            }
        }
    }

    /// Two PSBTs that disagree on an output value must never merge.
    #[test]
    fn test_mismatched_psbts_refuse_to_merge() {
        init_logging();
        let cosigners: Vec<Cosigner> = (1..=3).map(cosigner).collect();
        let witness_script = two_of_three_script(&cosigners);
        let wallet_address = Address::p2wsh(&witness_script, Network::Bitcoin).to_string();

        let utxos = vec![wallet_utxo(0xD4, 0, 80_000, &wallet_address)];
        let a = build_psbt(
            &utxos,
            &[SpendTarget::new(DEST, 40_000)],
            2,
            CHANGE,
            None,
            Network::Bitcoin,
        )
        .expect("skeleton builds");
        let b = build_psbt(
            &utxos,
            &[SpendTarget::new(DEST, 41_000)],
            2,
            CHANGE,
            None,
            Network::Bitcoin,
        )
        .expect("skeleton builds");

        let err = combine_psbts(&a, &b).expect_err("different outputs");
        assert!(matches!(err, CoreError::IncompatiblePsbt(_)));
    }
}

//! UTXO selection and transaction building for anchoring.
//!
//! Everything here is deterministic given its inputs, apart from the
//! ECDSA signature itself. No floating-point arithmetic is used.

use std::str::FromStr;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, PushBytesBuf, ScriptBuf};
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    absolute, ecdsa, transaction, Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{AnchorError, Result};
use crate::keys::KeyMaterial;
use crate::provider::UnspentOutput;
use crate::{DUST_THRESHOLD_SATOSHI, MAX_OP_RETURN_SIZE};

/// A signed transaction ready to push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Serialized transaction, hex.
    pub raw_hex: String,
    /// Transaction id.
    pub tx_id: String,
}

impl SignedTransaction {
    fn from_tx(tx: &Transaction) -> Self {
        Self {
            raw_hex: encode::serialize_hex(tx),
            tx_id: tx.compute_txid().to_string(),
        }
    }
}

/// Outcome of splitting the wallet balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    /// Number of outputs.
    pub count: usize,
    /// Value of each output.
    pub per_output_satoshi: u64,
}

/// Build a null-data (OP_RETURN) script carrying `payload`.
pub fn build_op_return_script(payload: &[u8]) -> Result<ScriptBuf> {
    if payload.len() > MAX_OP_RETURN_SIZE {
        return Err(AnchorError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_OP_RETURN_SIZE,
        });
    }

    let push_bytes = PushBytesBuf::try_from(payload.to_vec())
        .map_err(|e| AnchorError::TxBuild(e.to_string()))?;

    Ok(Builder::new()
        .push_opcode(opcodes::all::OP_RETURN)
        .push_slice(push_bytes)
        .into_script())
}

/// Pick the output with the greatest amount; the first one seen wins ties.
pub fn select_largest(unspent: &[UnspentOutput]) -> Option<&UnspentOutput> {
    let mut best: Option<&UnspentOutput> = None;
    for utxo in unspent {
        if best.map_or(true, |b| utxo.amount_satoshi > b.amount_satoshi) {
            best = Some(utxo);
        }
    }
    best
}

/// Work out how many outputs of what size the balance can be split into.
///
/// Uses `max_outputs`, or fewer when that would leave an output below the
/// dust threshold: the count is the largest one whose floored per-output
/// value still clears it. Any remainder goes to the fee.
pub fn plan_split(total_satoshi: u64, fee_satoshi: u64, max_outputs: usize) -> Result<SplitPlan> {
    if max_outputs == 0 {
        return Err(AnchorError::Configuration(
            "max outputs must be at least 1".into(),
        ));
    }

    let working = total_satoshi
        .checked_sub(fee_satoshi)
        .ok_or(AnchorError::InsufficientFunds {
            need: fee_satoshi,
            have: total_satoshi,
        })?;

    // floor(working / n) >= dust exactly when n <= floor(working / dust).
    let affordable = usize::try_from(working / DUST_THRESHOLD_SATOSHI).unwrap_or(usize::MAX);
    let count = max_outputs.min(affordable);
    if count == 0 {
        return Err(AnchorError::InsufficientFunds {
            need: fee_satoshi + DUST_THRESHOLD_SATOSHI,
            have: total_satoshi,
        });
    }

    Ok(SplitPlan {
        count,
        per_output_satoshi: working / count as u64,
    })
}

/// Build and sign the embed transaction.
///
/// Spends the largest unspent output; output 0 carries `payload`, output 1
/// returns `amount - fee` to the anchoring address.
pub fn build_embed_tx(
    unspent: &[UnspentOutput],
    fee_satoshi: u64,
    payload: &[u8],
    keys: &KeyMaterial,
) -> Result<SignedTransaction> {
    let op_return = build_op_return_script(payload)?;

    let spendable = select_largest(unspent).ok_or(AnchorError::NoFunds)?;
    if spendable.amount_satoshi <= fee_satoshi {
        return Err(AnchorError::InsufficientFunds {
            need: fee_satoshi + 1,
            have: spendable.amount_satoshi,
        });
    }

    let change = spendable.amount_satoshi - fee_satoshi;
    if change < DUST_THRESHOLD_SATOSHI {
        warn!(
            change,
            dust_threshold = DUST_THRESHOLD_SATOSHI,
            "embed change is below the dust threshold and may be rejected by relays"
        );
    }

    let outputs = vec![
        TxOut {
            value: Amount::ZERO,
            script_pubkey: op_return,
        },
        TxOut {
            value: Amount::from_sat(change),
            script_pubkey: keys.script_pubkey(),
        },
    ];

    let tx = sign_p2pkh(vec![to_input(spendable)?], outputs, keys)?;
    Ok(SignedTransaction::from_tx(&tx))
}

/// Build and sign the split transaction.
///
/// Consumes every unspent output and pays equal outputs back to the
/// anchoring address. Returns the transaction and the output count used.
pub fn build_split_tx(
    unspent: &[UnspentOutput],
    fee_satoshi: u64,
    max_outputs: usize,
    keys: &KeyMaterial,
) -> Result<(SignedTransaction, usize)> {
    if unspent.is_empty() {
        return Err(AnchorError::NoFunds);
    }

    let total = unspent
        .iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.amount_satoshi))
        .ok_or_else(|| AnchorError::TxBuild("unspent total overflows".into()))?;

    let plan = plan_split(total, fee_satoshi, max_outputs)?;

    let inputs = unspent.iter().map(to_input).collect::<Result<Vec<_>>>()?;
    let script_pubkey = keys.script_pubkey();
    let outputs = (0..plan.count)
        .map(|_| TxOut {
            value: Amount::from_sat(plan.per_output_satoshi),
            script_pubkey: script_pubkey.clone(),
        })
        .collect();

    let tx = sign_p2pkh(inputs, outputs, keys)?;
    Ok((SignedTransaction::from_tx(&tx), plan.count))
}

fn to_input(utxo: &UnspentOutput) -> Result<TxIn> {
    let txid = Txid::from_str(&utxo.source_tx_id).map_err(|e| {
        AnchorError::TxBuild(format!("bad source txid {}: {e}", utxo.source_tx_id))
    })?;

    Ok(TxIn {
        previous_output: OutPoint {
            txid,
            vout: utxo.output_index,
        },
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    })
}

/// Assemble a legacy transaction and sign every input as P2PKH with `keys`.
fn sign_p2pkh(inputs: Vec<TxIn>, outputs: Vec<TxOut>, keys: &KeyMaterial) -> Result<Transaction> {
    let mut tx = Transaction {
        version: transaction::Version::ONE,
        lock_time: absolute::LockTime::ZERO,
        input: inputs,
        output: outputs,
    };

    let script_pubkey = keys.script_pubkey();
    let sighash_type = EcdsaSighashType::All;

    // Legacy sighashes blank every script_sig, so they can all be computed first.
    let sighashes = {
        let cache = SighashCache::new(&tx);
        (0..tx.input.len())
            .map(|index| {
                cache
                    .legacy_signature_hash(index, &script_pubkey, sighash_type.to_u32())
                    .map_err(|e| AnchorError::TxBuild(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?
    };

    for (input, sighash) in tx.input.iter_mut().zip(sighashes) {
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = ecdsa::Signature {
            signature: keys.secp().sign_ecdsa(&message, &keys.private_key().inner),
            sighash_type,
        };

        input.script_sig = Builder::new()
            .push_slice(signature.serialize())
            .push_key(keys.public_key())
            .into_script();
    }

    Ok(tx)
}

//! Transaction constructor (C6): the eleven-step pipeline from validated
//! destinations to a relayed, fully-signed transaction.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;

use crate::address::{decode_address, validate_address_allow_integrated, validate_our_address};
use crate::config::NetworkParameters;
use crate::crypto::{
    check_ring_signature, derive_public_key, derive_secret_key, derive_shared_secret,
    generate_key_image, generate_ring_signature, Hash, PublicKey, SecretKey, Signature,
};
use crate::decoy::{obscure_input, ObscuredInput, RingMember};
use crate::error::{
    BalanceError, ConstructionError, SizeError, ValidationError, WalletError, WalletResult,
};
use crate::node::Node;
use crate::subwallets::{SelectedInput, SubWallets, Transaction as WalletTransaction};

/// Tag for the ephemeral transaction public key in `extra`.
const TX_EXTRA_TAG_PUBKEY: u8 = 0x01;
/// Tag for the nonce field in `extra`, which carries the payment ID.
const TX_EXTRA_NONCE: u8 = 0x02;
const TX_EXTRA_NONCE_PAYMENT_ID: u8 = 0x00;

/// One on-chain key input: a key image plus the ring's global indexes
/// encoded as relative offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInput {
    pub amount: u64,
    pub key_offsets: Vec<u64>,
    pub key_image: crate::crypto::KeyImage,
}

/// One on-chain output: an amount and a one-time public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyOutput {
    pub amount: u64,
    pub key: PublicKey,
}

/// The wire-format transaction: `{version, unlockTime, inputs[],
/// outputs[], extra, signatures[][]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnChainTransaction {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<KeyInput>,
    pub outputs: Vec<KeyOutput>,
    pub extra: Vec<u8>,
    pub signatures: Vec<Vec<Signature>>,
}

impl OnChainTransaction {
    /// Hex-encoded wire form. The binary encoding is `bincode` prior to
    /// hex-encoding, which round-trips exactly for this wallet's own use but
    /// does not aim for bit-exact compatibility with a live network's
    /// existing transactions — that requires the full CryptoNote
    /// varint/TLV binary format, out of scope for this crate's core logic.
    pub fn to_hex(&self) -> WalletResult<String> {
        let bytes = bincode::serialize(self)
            .map_err(|e| WalletError::Invariant(format!("failed to serialize transaction: {e}")))?;
        Ok(hex::encode(bytes))
    }

    pub fn from_hex(s: &str) -> WalletResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|_| WalletError::Invariant("transaction hex is malformed".into()))?;
        bincode::deserialize(&bytes)
            .map_err(|e| WalletError::Invariant(format!("failed to deserialize transaction: {e}")))
    }

    /// Hash of everything except `signatures` — what ring signatures sign
    /// over.
    pub fn prefix_hash(&self) -> WalletResult<Hash> {
        #[derive(Serialize)]
        struct Prefix<'a> {
            version: u8,
            unlock_time: u64,
            inputs: &'a [KeyInput],
            outputs: &'a [KeyOutput],
            extra: &'a [u8],
        }
        let prefix = Prefix {
            version: self.version,
            unlock_time: self.unlock_time,
            inputs: &self.inputs,
            outputs: &self.outputs,
            extra: &self.extra,
        };
        let bytes = bincode::serialize(&prefix)
            .map_err(|e| WalletError::Invariant(format!("failed to serialize tx prefix: {e}")))?;
        let mut hasher = Keccak256::new();
        hasher.update(&bytes);
        let digest: [u8; 32] = hasher.finalize().into();
        Ok(Hash(digest))
    }
}

/// First element stays absolute, each following one becomes the delta from
/// the previous absolute value. `absolute` must already be sorted
/// ascending, which `obscure_input` guarantees.
fn absolute_to_relative_offsets(absolute: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(absolute.len());
    let mut prev = 0u64;
    for (i, &abs) in absolute.iter().enumerate() {
        out.push(if i == 0 { abs } else { abs - prev });
        prev = abs;
    }
    out
}

/// Base-10 digit decomposition, smallest digit first, skipping zero digits
/// so e.g. `1234567` becomes `[7, 60, 500, 4000, 30000, 200000, 1000000]`.
fn split_amount_into_denominations(mut amount: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let mut multiplier = 1u64;
    while amount > 0 {
        let denomination = multiplier * (amount % 10);
        if denomination != 0 {
            out.push(denomination);
        }
        amount /= 10;
        multiplier *= 10;
    }
    out
}

fn is_pretty_denomination(amount: u64) -> bool {
    if amount == 0 {
        return true;
    }
    let mut a = amount;
    while a % 10 == 0 {
        a /= 10;
    }
    a < 10
}

/// A recipient for one transaction: destination keys plus amount.
#[derive(Debug, Clone)]
struct Destination {
    public_spend_key: PublicKey,
    public_view_key: PublicKey,
    amount: u64,
}

/// Caller-supplied parameters for a standard (non-fusion) send.
pub struct SendParams<'a> {
    pub destinations: &'a [(String, u64)],
    pub mixin: u64,
    pub fee: u64,
    pub payment_id: Option<String>,
    pub change_address: Option<String>,
    pub source_addresses: &'a [String],
    pub unlock_time: u64,
}

fn resolve_address(
    params: &dyn NetworkParameters,
    address: &str,
    caller_payment_id: Option<&str>,
) -> WalletResult<(Destination, Option<String>)> {
    let (decoded, payment_id) = validate_address_allow_integrated(params, address, caller_payment_id)?;
    Ok((
        Destination {
            public_spend_key: decoded.public_spend_key,
            public_view_key: decoded.public_view_key,
            amount: 0,
        },
        payment_id,
    ))
}

/// **Step 1**: validate every parameter before any network call is made.
fn validate_transaction(
    network_params: &dyn NetworkParameters,
    our_spend_keys: &[PublicKey],
    params: &SendParams,
    current_height: u64,
    available_unlocked: u64,
) -> WalletResult<(Vec<Destination>, Option<String>)> {
    if params.destinations.is_empty() {
        return Err(ValidationError::NoDestinationsGiven.into());
    }

    let mut resolved_payment_id = params.payment_id.clone();
    let mut destinations = Vec::with_capacity(params.destinations.len());

    for (address, amount) in params.destinations {
        if *amount == 0 {
            return Err(ValidationError::AmountIsZero.into());
        }
        let (mut dest, embedded_payment_id) =
            resolve_address(network_params, address, resolved_payment_id.as_deref())?;
        if let Some(pid) = embedded_payment_id {
            resolved_payment_id = Some(pid);
        }
        dest.amount = *amount;
        destinations.push(dest);
    }

    for source in params.source_addresses {
        validate_our_address(network_params, source, our_spend_keys)?;
    }

    let range = network_params.mixin_range(current_height);
    if params.mixin < range.min {
        return Err(ValidationError::MixinTooSmall {
            given: params.mixin,
            min: range.min,
        }
        .into());
    }
    if params.mixin > range.max {
        return Err(ValidationError::MixinTooBig {
            given: params.mixin,
            max: range.max,
        }
        .into());
    }

    if let Some(pid) = &resolved_payment_id {
        crate::address::validate_payment_id(pid)?;
    }

    let min_fee = network_params.minimum_fee(current_height);
    if params.fee < min_fee {
        return Err(ValidationError::FeeTooSmall {
            given: params.fee,
            min: min_fee,
        }
        .into());
    }

    let total: u64 = destinations
        .iter()
        .map(|d| d.amount)
        .try_fold(params.fee, |acc, amt| acc.checked_add(amt))
        .ok_or(WalletError::from(BalanceError::WillOverflow))?;

    if total > available_unlocked {
        return Err(BalanceError::NotEnoughBalance.into());
    }

    if let Some(change) = &params.change_address {
        validate_our_address(network_params, change, our_spend_keys)?;
    }

    Ok((destinations, resolved_payment_id))
}

/// The outcome of a successful send: the relayed transaction and its hash.
pub struct SendResult {
    pub transaction_hash: Hash,
    pub transaction: OnChainTransaction,
}

/// Steps 1-11 for a standard send.
pub async fn send_transaction(
    params: &SendParams<'_>,
    node: &dyn Node,
    subwallets: &mut SubWallets,
    network_params: &dyn NetworkParameters,
) -> WalletResult<SendResult> {
    let current_height = node.local_tip().await?;

    let source_keys: Vec<PublicKey> = params
        .source_addresses
        .iter()
        .map(|a| decode_address(network_params, a).map(|d| d.public_spend_key))
        .collect::<WalletResult<_>>()?;

    let (available_unlocked, _locked) = subwallets.get_balance(current_height);
    let (mut destinations, payment_id) = validate_transaction(
        network_params,
        subwallets.public_spend_keys(),
        params,
        current_height,
        available_unlocked,
    )?;

    // Step 2: node fee.
    let node_fee = node.node_fee().await?;
    if node_fee.amount > 0 && !node_fee.address.is_empty() {
        let (dest, _) = resolve_address(network_params, &node_fee.address, None)?;
        destinations.push(Destination {
            amount: node_fee.amount,
            ..dest
        });
    }

    let total_amount: u64 = destinations.iter().map(|d| d.amount).sum::<u64>() + params.fee;

    // Step 3: input selection.
    let (selected, sum) =
        subwallets.get_transaction_inputs_for_amount(total_amount, &source_keys, current_height)?;
    let change_amount = sum - total_amount;

    if change_amount > 0 {
        let change_address = match &params.change_address {
            Some(a) => a.clone(),
            None => subwallets
                .primary_address()
                .ok_or_else(|| WalletError::Invariant("container has no primary address".into()))?
                .to_string(),
        };
        let (mut dest, _) = resolve_address(network_params, &change_address, None)?;
        dest.amount = change_amount;
        destinations.push(dest);
    }

    // Step 4: denomination split.
    let mut split_destinations = Vec::new();
    for dest in &destinations {
        for denomination in split_amount_into_denominations(dest.amount) {
            split_destinations.push(Destination {
                public_spend_key: dest.public_spend_key,
                public_view_key: dest.public_view_key,
                amount: denomination,
            });
        }
    }

    // By construction sum(inputs) - sum(outputs) == params.fee; checked
    // here rather than trusted, since a future change to input selection or
    // splitting could silently break it.
    let actual_fee = sum.saturating_sub(split_destinations.iter().map(|d| d.amount).sum::<u64>());
    if actual_fee != params.fee {
        return Err(SizeError::FeeMismatch {
            actual: actual_fee,
            expected: params.fee,
        }
        .into());
    }

    let (tx, tx_hash) = build_and_sign(
        &selected,
        subwallets.private_view_key(),
        &split_destinations,
        params.mixin,
        payment_id.clone(),
        params.unlock_time,
        node,
        network_params,
        current_height,
    )
    .await?;

    // Step 11: bookkeeping on the caller's subwallets store.
    for s in &selected {
        if let Some(wallet) = subwallets.get_mut(&s.public_spend_key) {
            wallet.mark_input_as_locked(&s.input.key_image)?;
        }
    }
    let mut transfers: HashMap<PublicKey, i64> = HashMap::new();
    for s in &selected {
        *transfers.entry(s.public_spend_key).or_insert(0) -= s.input.amount as i64;
    }
    subwallets.add_unconfirmed_transaction(WalletTransaction {
        transfers,
        hash: tx_hash,
        fee: params.fee,
        block_height: 0,
        timestamp: 0,
        payment_id: payment_id.unwrap_or_default(),
        unlock_time: params.unlock_time,
        is_coinbase: false,
    });

    Ok(SendResult {
        transaction_hash: tx_hash,
        transaction: tx,
    })
}

/// Steps 5-10, shared by standard sends and fusion sends, plus step 11's
/// network relay. Bookkeeping against the subwallet store is the caller's
/// job, since standard and fusion sends touch different state there.
#[allow(clippy::too_many_arguments)]
async fn build_and_sign(
    selected: &[SelectedInput],
    private_view_key: &SecretKey,
    destinations: &[Destination],
    mixin: u64,
    payment_id: Option<String>,
    unlock_time: u64,
    node: &dyn Node,
    network_params: &dyn NetworkParameters,
    current_height: u64,
) -> WalletResult<(OnChainTransaction, Hash)> {
    // Step 5: decoy mixing.
    let amounts: Vec<u64> = selected.iter().map(|s| s.input.amount).collect();
    let mut rings: Vec<ObscuredInput> = Vec::with_capacity(selected.len());
    if mixin > 0 {
        let decoys = node.get_random_outputs(&amounts, (mixin + 1) as usize).await?;
        for input in selected {
            let candidates = decoys.get(&input.input.amount).cloned().unwrap_or_default();
            let obscured = obscure_input(
                input.input.amount,
                input.input.global_output_index,
                input.input.key,
                candidates,
                mixin,
            )?;
            rings.push(obscured);
        }
    } else {
        for input in selected {
            rings.push(ObscuredInput {
                ring: vec![RingMember {
                    global_index: input.input.global_output_index,
                    key: input.input.key,
                }],
                real_output_index: 0,
            });
        }
    }

    // Step 6: key derivation per input, key-image re-derivation check.
    let mut key_inputs = Vec::with_capacity(selected.len());
    let mut one_time_secrets = Vec::with_capacity(selected.len());
    for (input, ring) in selected.iter().zip(&rings) {
        let derivation = derive_shared_secret(&input.input.transaction_public_key, private_view_key)?;
        let one_time_secret = derive_secret_key(
            &derivation,
            input.input.transaction_index as u64,
            &input.private_spend_key,
        );
        let recomputed_image = generate_key_image(&input.input.key, &one_time_secret)?;
        if recomputed_image != input.input.key_image {
            return Err(ConstructionError::InvalidGeneratedKeyImage.into());
        }

        let absolute: Vec<u64> = ring.ring.iter().map(|m| m.global_index).collect();
        key_inputs.push(KeyInput {
            amount: input.input.amount,
            key_offsets: absolute_to_relative_offsets(&absolute),
            key_image: input.input.key_image,
        });
        one_time_secrets.push(one_time_secret);
    }

    // Step 7: build outputs, sorted by amount.
    let mut sorted_destinations = destinations.to_vec();
    sorted_destinations.sort_by_key(|d| d.amount);

    let tx_secret = SecretKey::generate(&mut OsRng);
    let tx_public = tx_secret.public_key();

    let mut outputs = Vec::with_capacity(sorted_destinations.len());
    for (index, dest) in sorted_destinations.iter().enumerate() {
        let shared = derive_shared_secret(&dest.public_view_key, &tx_secret)?;
        let one_time_key = derive_public_key(&shared, index as u64, &dest.public_spend_key)?;
        outputs.push(KeyOutput {
            amount: dest.amount,
            key: one_time_key,
        });
    }

    // Step 8: assemble.
    let mut extra = Vec::new();
    if let Some(pid) = &payment_id {
        let pid_bytes = hex::decode(pid)
            .map_err(|_| WalletError::Invariant("payment ID was not valid hex after validation".into()))?;
        extra.push(TX_EXTRA_NONCE);
        extra.push((1 + pid_bytes.len()) as u8);
        extra.push(TX_EXTRA_NONCE_PAYMENT_ID);
        extra.extend_from_slice(&pid_bytes);
    }
    extra.push(TX_EXTRA_TAG_PUBKEY);
    extra.extend_from_slice(&tx_public.0);

    let mut tx = OnChainTransaction {
        version: 2,
        unlock_time,
        inputs: key_inputs,
        outputs,
        extra,
        signatures: Vec::new(),
    };

    // Step 9: sign, then immediately self-verify.
    let prefix_hash = tx.prefix_hash()?;
    let mut rng = OsRng;
    let mut signatures = Vec::with_capacity(selected.len());
    for (ring, one_time_secret) in rings.iter().zip(&one_time_secrets) {
        let ring_keys: Vec<PublicKey> = ring.ring.iter().map(|m| m.key).collect();
        let one_time_pub = ring.ring[ring.real_output_index].key;
        let key_image = generate_key_image(&one_time_pub, one_time_secret)?;

        let sig = generate_ring_signature(
            &prefix_hash,
            &key_image,
            &ring_keys,
            one_time_secret,
            ring.real_output_index,
            &mut rng,
        )?;
        if !check_ring_signature(&prefix_hash, &key_image, &ring_keys, &sig)? {
            return Err(ConstructionError::FailedToCreateRingSignature.into());
        }
        signatures.push(sig);
    }
    tx.signatures = signatures;

    // Step 10: bounds checks.
    let size = bincode::serialize(&tx)
        .map_err(|e| WalletError::Invariant(format!("failed to size transaction: {e}")))?
        .len();
    let max_size = network_params.max_transaction_size(current_height);
    if size > max_size {
        return Err(SizeError::TooManyInputsToFitInBlock {
            actual: size,
            max: max_size,
            height: current_height,
        }
        .into());
    }
    for output in &tx.outputs {
        if !is_pretty_denomination(output.amount) {
            return Err(SizeError::AmountNotPrettyDenomination(output.amount).into());
        }
    }

    // Step 11: relay.
    let tx_hex = tx.to_hex()?;
    node.submit_transaction(&tx_hex).await?;

    Ok((tx, prefix_hash))
}

/// Parameters for a fusion (consolidation) send: no recipient amount, no
/// fee, no payment ID — just as many of this wallet's own small inputs as
/// will fit into one transaction, sent back to itself as fewer, larger
/// outputs.
pub struct FusionSendParams<'a> {
    pub mixin: u64,
    pub destination_address: &'a str,
    pub source_addresses: &'a [String],
}

/// Send a fusion transaction, following the original's iterative shrink:
/// try the full candidate set, and if it doesn't fit in one transaction
/// drop the largest remaining input and retry.
pub async fn send_fusion_transaction(
    params: &FusionSendParams<'_>,
    node: &dyn Node,
    subwallets: &mut SubWallets,
    network_params: &dyn NetworkParameters,
) -> WalletResult<SendResult> {
    let current_height = node.local_tip().await?;
    validate_our_address(network_params, params.destination_address, subwallets.public_spend_keys())?;

    let source_keys: Vec<PublicKey> = params
        .source_addresses
        .iter()
        .map(|a| decode_address(network_params, a).map(|d| d.public_spend_key))
        .collect::<WalletResult<_>>()?;

    let (mut candidates, _max_fusion_inputs, _sum) = subwallets.get_fusion_transaction_inputs(
        &source_keys,
        params.mixin,
        current_height,
        network_params,
    );

    if candidates.len() < crate::subwallets::FUSION_TX_MIN_INPUT_COUNT {
        return Err(SizeError::FullyOptimized.into());
    }

    let (dest, _) = resolve_address(network_params, params.destination_address, None)?;

    loop {
        let total: u64 = candidates.iter().map(|c| c.input.amount).sum();
        let split_destinations: Vec<Destination> = split_amount_into_denominations(total)
            .into_iter()
            .map(|amount| Destination {
                public_spend_key: dest.public_spend_key,
                public_view_key: dest.public_view_key,
                amount,
            })
            .collect();

        if candidates.len() / split_destinations.len() < crate::subwallets::FUSION_TX_MIN_IN_OUT_COUNT_RATIO {
            if candidates.len() > crate::subwallets::FUSION_TX_MIN_INPUT_COUNT {
                candidates.sort_by_key(|c| c.input.amount);
                candidates.pop();
                continue;
            }
            return Err(SizeError::FullyOptimized.into());
        }

        match build_and_sign(
            &candidates,
            subwallets.private_view_key(),
            &split_destinations,
            params.mixin,
            None,
            0,
            node,
            network_params,
            current_height,
        )
        .await
        {
            Ok((tx, tx_hash)) => {
                for s in &candidates {
                    if let Some(wallet) = subwallets.get_mut(&s.public_spend_key) {
                        wallet.mark_input_as_locked(&s.input.key_image)?;
                    }
                }
                let mut transfers: HashMap<PublicKey, i64> = HashMap::new();
                for s in &candidates {
                    *transfers.entry(s.public_spend_key).or_insert(0) -= s.input.amount as i64;
                }
                subwallets.add_unconfirmed_transaction(WalletTransaction {
                    transfers,
                    hash: tx_hash,
                    fee: 0,
                    block_height: 0,
                    timestamp: 0,
                    payment_id: String::new(),
                    unlock_time: 0,
                    is_coinbase: false,
                });
                return Ok(SendResult {
                    transaction_hash: tx_hash,
                    transaction: tx,
                });
            }
            Err(WalletError::Size(SizeError::TooManyInputsToFitInBlock { .. }))
                if candidates.len() > crate::subwallets::FUSION_TX_MIN_INPUT_COUNT =>
            {
                candidates.sort_by_key(|c| c.input.amount);
                candidates.pop();
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_amount_into_denominations_matches_known_value() {
        assert_eq!(
            split_amount_into_denominations(1234567),
            vec![7, 60, 500, 4000, 30000, 200000, 1000000]
        );
    }

    #[test]
    fn split_amount_skips_zero_digits() {
        assert_eq!(split_amount_into_denominations(1010), vec![10, 1000]);
    }

    #[test]
    fn relative_offsets_match_known_value() {
        assert_eq!(
            absolute_to_relative_offsets(&[5, 10, 20, 21, 22]),
            vec![5, 5, 10, 1, 1]
        );
    }

    #[test]
    fn pretty_denominations_are_recognized() {
        assert!(is_pretty_denomination(7));
        assert!(is_pretty_denomination(4000));
        assert!(is_pretty_denomination(0));
        assert!(!is_pretty_denomination(1234));
    }
}

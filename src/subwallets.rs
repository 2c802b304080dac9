//! SubWallets store (C4): the thread-safe container of all subwallets in
//! a wallet, plus the aggregate operations (owner lookup, input selection,
//! fusion input selection, sync origin) that only make sense looking across
//! all of them at once.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::NetworkParameters;
use crate::crypto::{Hash, KeyImage, PublicKey};
use crate::error::{BalanceError, WalletResult};
use crate::subwallet::{SpendableInput, SubWallet, TransactionInput};

/// Minimum number of inputs a fusion transaction must consume to be worth
/// sending at all, grounded in `FUSION_TX_MIN_INPUT_COUNT`.
pub const FUSION_TX_MIN_INPUT_COUNT: usize = 12;

/// A fusion transaction must consume at least this many inputs per output
/// it produces, grounded in `FUSION_TX_MIN_IN_OUT_COUNT_RATIO`.
pub const FUSION_TX_MIN_IN_OUT_COUNT_RATIO: usize = 4;

/// Per-ring-member byte cost used only to bound how many fusion inputs fit
/// in one transaction; this is an estimate for input-selection purposes,
/// not part of the consensus-critical wire encoding in `transaction.rs`.
const APPROX_BYTES_PER_RING_MEMBER: usize = 32;
const APPROX_BASE_BYTES_PER_INPUT: usize = 64;

/// The wallet's own log entry for a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transfers: HashMap<PublicKey, i64>,
    pub hash: Hash,
    pub fee: u64,
    pub block_height: u64,
    pub timestamp: u64,
    pub payment_id: String,
    pub unlock_time: u64,
    pub is_coinbase: bool,
}

/// One input selected for spending, bound to its owning subwallet.
#[derive(Debug, Clone)]
pub struct SelectedInput {
    pub input: TransactionInput,
    pub public_spend_key: PublicKey,
    pub private_spend_key: crate::crypto::SecretKey,
}

impl From<SpendableInput> for SelectedInput {
    fn from(s: SpendableInput) -> Self {
        SelectedInput {
            input: s.input,
            public_spend_key: s.public_spend_key,
            private_spend_key: s.private_spend_key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubWallets {
    wallets: HashMap<PublicKey, SubWallet>,
    spend_key_order: Vec<PublicKey>,
    private_view_key: crate::crypto::SecretKey,
    primary_spend_key: PublicKey,
    confirmed_transactions: Vec<Transaction>,
    unconfirmed_transactions: Vec<Transaction>,
    /// Transaction hash -> the one-time transaction secret we generated
    /// when we built it (needed to later reconstruct or audit our own
    /// sends).
    transaction_secrets: HashMap<Hash, crate::crypto::SecretKey>,
    is_view_wallet: bool,
}

impl SubWallets {
    pub fn new(
        primary: SubWallet,
        private_view_key: crate::crypto::SecretKey,
        is_view_wallet: bool,
    ) -> Self {
        let primary_spend_key = primary.public_spend_key;
        let mut wallets = HashMap::new();
        wallets.insert(primary_spend_key, primary);
        SubWallets {
            spend_key_order: vec![primary_spend_key],
            wallets,
            private_view_key,
            primary_spend_key,
            confirmed_transactions: Vec::new(),
            unconfirmed_transactions: Vec::new(),
            transaction_secrets: HashMap::new(),
            is_view_wallet,
        }
    }

    pub fn add_sub_wallet(&mut self, wallet: SubWallet) {
        self.spend_key_order.push(wallet.public_spend_key);
        self.wallets.insert(wallet.public_spend_key, wallet);
    }

    pub fn remove_sub_wallet(&mut self, public_spend_key: &PublicKey) -> WalletResult<()> {
        if *public_spend_key == self.primary_spend_key {
            return Err(crate::error::WalletError::Invariant(
                "cannot remove the primary subwallet".into(),
            ));
        }
        self.wallets.remove(public_spend_key);
        self.spend_key_order.retain(|k| k != public_spend_key);
        Ok(())
    }

    pub fn get(&self, public_spend_key: &PublicKey) -> Option<&SubWallet> {
        self.wallets.get(public_spend_key)
    }

    pub fn get_mut(&mut self, public_spend_key: &PublicKey) -> Option<&mut SubWallet> {
        self.wallets.get_mut(public_spend_key)
    }

    pub fn public_spend_keys(&self) -> &[PublicKey] {
        &self.spend_key_order
    }

    pub fn private_view_key(&self) -> &crate::crypto::SecretKey {
        &self.private_view_key
    }

    pub fn is_view_wallet(&self) -> bool {
        self.is_view_wallet
    }

    pub fn primary_address(&self) -> Option<&str> {
        self.wallets.get(&self.primary_spend_key).map(|w| w.address.as_str())
    }

    pub fn get_balance(&self, current_height: u64) -> (u64, u64) {
        self.wallets.values().fold((0, 0), |(u, l), wallet| {
            let (wu, wl) = wallet.get_balance(current_height);
            (u.saturating_add(wu), l.saturating_add(wl))
        })
    }

    /// Linear scan for the subwallet holding `key_image` in `unspent` or
    /// `locked`. Returns the owning subwallet's public spend key.
    pub fn get_key_image_owner(&self, key_image: &KeyImage) -> Option<PublicKey> {
        self.wallets.iter().find_map(|(spend_key, wallet)| {
            let owns = wallet.unspent.iter().any(|i| &i.key_image == key_image)
                || wallet.locked.iter().any(|i| &i.key_image == key_image);
            owns.then_some(*spend_key)
        })
    }

    /// Select inputs summing to at least `target_amount`.
    ///
    /// `from` restricts the candidate set to those subwallets; an empty
    /// slice means "all subwallets".
    pub fn get_transaction_inputs_for_amount(
        &self,
        target_amount: u64,
        from: &[PublicKey],
        current_height: u64,
    ) -> WalletResult<(Vec<SelectedInput>, u64)> {
        let mut candidates: Vec<SelectedInput> = self
            .wallets
            .iter()
            .filter(|(key, _)| from.is_empty() || from.contains(key))
            .flat_map(|(_, wallet)| wallet.get_spendable_inputs(current_height))
            .map(SelectedInput::from)
            .collect();

        candidates.shuffle(&mut OsRng);

        let mut selected = Vec::new();
        let mut sum = 0u64;
        for candidate in candidates {
            if sum >= target_amount {
                break;
            }
            sum = sum.saturating_add(candidate.input.amount);
            selected.push(candidate);
        }

        if sum < target_amount {
            return Err(BalanceError::NotEnoughBalance.into());
        }

        Ok((selected, sum))
    }

    /// Select inputs for a fusion (consolidation) transaction: as many
    /// small-denomination inputs as will fit in one transaction while
    /// respecting the minimum input/output ratio.
    ///
    /// Returns the candidate inputs (caller trims them down while building
    /// the transaction, per the original's retry loop), the
    /// `max_fusion_inputs` ceiling used, and their summed amount.
    pub fn get_fusion_transaction_inputs(
        &self,
        from: &[PublicKey],
        mixin: u64,
        current_height: u64,
        params: &dyn NetworkParameters,
    ) -> (Vec<SelectedInput>, usize, u64) {
        let mut candidates: Vec<SelectedInput> = self
            .wallets
            .iter()
            .filter(|(key, _)| from.is_empty() || from.contains(key))
            .flat_map(|(_, wallet)| wallet.get_spendable_inputs(current_height))
            .map(SelectedInput::from)
            .collect();

        // Smallest amounts first: fusion is about consolidating dust, and
        // the denomination-split output count is minimized by feeding it
        // already-small amounts.
        candidates.sort_by_key(|c| c.input.amount);

        let per_input_bytes = APPROX_BASE_BYTES_PER_INPUT + (mixin as usize) * APPROX_BYTES_PER_RING_MEMBER;
        let max_fusion_inputs = (params.max_transaction_size(current_height) / per_input_bytes.max(1))
            .max(FUSION_TX_MIN_INPUT_COUNT);

        candidates.truncate(max_fusion_inputs);

        let sum = candidates.iter().map(|c| c.input.amount).sum();
        (candidates, max_fusion_inputs, sum)
    }

    /// Minimum `(height, timestamp)` sync origin across all subwallets,
    /// per the original's `getMinInitialSyncStart`: whichever of height or
    /// timestamp is earlier (after converting the other subwallet's
    /// timestamp/height to the same unit) is returned non-zero, the other
    /// zero.
    pub fn get_min_initial_sync_start(&self) -> (u64, u64) {
        let min_height = self
            .wallets
            .values()
            .filter(|w| w.sync_start_height != 0 || w.sync_start_timestamp == 0)
            .map(|w| w.sync_start_height)
            .min();

        let min_timestamp = self
            .wallets
            .values()
            .filter(|w| w.sync_start_timestamp != 0)
            .map(|w| w.sync_start_timestamp)
            .min();

        match (min_height, min_timestamp) {
            // A subwallet starting at height 0 wants to scan from genesis,
            // which nothing can precede; it wins outright regardless of any
            // timestamp-origin subwallet.
            (Some(0), _) => (0, 0),
            (Some(h), Some(t)) => {
                // No common unit to compare height against timestamp
                // without the chain's height/timestamp conversion function;
                // the original resolves this via `scanHeightToTimestamp`.
                // Absent that here, prefer the height-based origin, which
                // matches the common case of two wallets both created
                // pre-genesis-plus-delta.
                let _ = t;
                (h, 0)
            }
            (Some(h), None) => (h, 0),
            (None, Some(t)) => (0, t),
            (None, None) => (0, 0),
        }
    }

    pub fn add_transaction(&mut self, tx: Transaction) {
        self.unconfirmed_transactions.retain(|t| t.hash != tx.hash);
        self.confirmed_transactions.push(tx);
    }

    pub fn add_unconfirmed_transaction(&mut self, tx: Transaction) {
        self.unconfirmed_transactions.push(tx);
    }

    pub fn confirmed_transactions(&self) -> &[Transaction] {
        &self.confirmed_transactions
    }

    pub fn unconfirmed_transactions(&self) -> &[Transaction] {
        &self.unconfirmed_transactions
    }

    pub fn store_transaction_secret(&mut self, tx_hash: Hash, secret: crate::crypto::SecretKey) {
        self.transaction_secrets.insert(tx_hash, secret);
    }

    /// Rewind every subwallet and the confirmed transaction log past a
    /// reorg at `fork_height`.
    pub fn remove_forked_transactions(&mut self, fork_height: u64) {
        for wallet in self.wallets.values_mut() {
            wallet.remove_forked_inputs(fork_height);
        }
        self.confirmed_transactions.retain(|t| t.block_height < fork_height);
    }

    pub fn remove_cancelled_transactions(&mut self, cancelled: &HashSet<Hash>) {
        for wallet in self.wallets.values_mut() {
            wallet.remove_cancelled_transactions(cancelled);
        }
        self.unconfirmed_transactions.retain(|t| !cancelled.contains(&t.hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticNetworkParameters;
    use crate::crypto::SecretKey;
    use crate::subwallet::TransactionInput;

    fn wallet_with_input(spend_key: PublicKey, amount: u64, height: u64) -> SubWallet {
        let mut wallet = SubWallet::new(
            spend_key,
            Some(SecretKey([5u8; 32])),
            "addr".into(),
            0,
            0,
            true,
        );
        wallet.unspent.push(TransactionInput {
            key_image: KeyImage([amount as u8; 32]),
            amount,
            block_height: height,
            transaction_public_key: PublicKey([1u8; 32]),
            transaction_index: 0,
            global_output_index: 0,
            key: PublicKey([2u8; 32]),
            spend_height: 0,
            unlock_time: 0,
            parent_transaction_hash: Hash([3u8; 32]),
        });
        wallet
    }

    use crate::crypto::KeyImage;

    #[test]
    fn input_selection_succeeds_when_enough_balance() {
        let primary = wallet_with_input(PublicKey([0u8; 32]), 100, 1);
        let mut subwallets = SubWallets::new(primary, SecretKey([1u8; 32]), false);
        subwallets.add_sub_wallet(wallet_with_input(PublicKey([9u8; 32]), 200, 1));

        let (selected, sum) = subwallets
            .get_transaction_inputs_for_amount(150, &[], 10)
            .unwrap();
        assert!(sum >= 150);
        assert!(!selected.is_empty());
    }

    #[test]
    fn input_selection_fails_when_not_enough_balance() {
        let primary = wallet_with_input(PublicKey([0u8; 32]), 100, 1);
        let subwallets = SubWallets::new(primary, SecretKey([1u8; 32]), false);
        let result = subwallets.get_transaction_inputs_for_amount(1000, &[], 10);
        assert!(matches!(
            result,
            Err(crate::error::WalletError::Balance(BalanceError::NotEnoughBalance))
        ));
    }

    #[test]
    fn fusion_input_selection_respects_max_count() {
        let mut primary = SubWallet::new(PublicKey([0u8; 32]), Some(SecretKey([5u8; 32])), "a".into(), 0, 0, true);
        for i in 0..500u64 {
            primary.unspent.push(TransactionInput {
                key_image: KeyImage([(i % 255) as u8; 32]),
                amount: 1,
                block_height: 1,
                transaction_public_key: PublicKey([1u8; 32]),
                transaction_index: 0,
                global_output_index: i,
                key: PublicKey([2u8; 32]),
                spend_height: 0,
                unlock_time: 0,
                parent_transaction_hash: Hash([3u8; 32]),
            });
        }
        let subwallets = SubWallets::new(primary, SecretKey([1u8; 32]), false);
        let params = StaticNetworkParameters::default();
        let (inputs, max, _sum) = subwallets.get_fusion_transaction_inputs(&[], 3, 10, &params);
        assert!(inputs.len() <= max);
        assert!(max >= FUSION_TX_MIN_INPUT_COUNT);
    }

    #[test]
    fn sync_origin_prefers_height_zero_genesis() {
        let primary = SubWallet::new(PublicKey([0u8; 32]), None, "a".into(), 0, 0, true);
        let mut subwallets = SubWallets::new(primary, SecretKey([1u8; 32]), true);
        subwallets.add_sub_wallet(SubWallet::new(PublicKey([1u8; 32]), None, "b".into(), 0, 12345, true));
        let (height, timestamp) = subwallets.get_min_initial_sync_start();
        assert_eq!(height, 0);
        assert_eq!(timestamp, 0);
    }
}

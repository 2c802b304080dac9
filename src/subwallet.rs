//! SubWallet (C3): one address within a wallet container and its four
//! input buckets.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::{Hash, KeyImage, PublicKey, SecretKey};
use crate::error::{WalletError, WalletResult};

/// Height/timestamp boundary for `unlockTime` interpretation: values below
/// this are a block height, values at or above it are a unix timestamp.
pub const UNLOCK_TIME_HEIGHT_TIMESTAMP_BOUNDARY: u64 = 500_000_000;

fn is_unlocked(unlock_time: u64, current_height: u64) -> bool {
    if unlock_time < UNLOCK_TIME_HEIGHT_TIMESTAMP_BOUNDARY {
        unlock_time <= current_height
    } else {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        unlock_time <= now
    }
}

/// One received output owned by this wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub key_image: KeyImage,
    pub amount: u64,
    pub block_height: u64,
    pub transaction_public_key: PublicKey,
    pub transaction_index: u32,
    pub global_output_index: u64,
    pub key: PublicKey,
    pub spend_height: u64,
    pub unlock_time: u64,
    pub parent_transaction_hash: Hash,
}

impl TransactionInput {
    pub fn is_unlocked(&self, current_height: u64) -> bool {
        is_unlocked(self.unlock_time, current_height)
    }
}

/// Change or just-sent output, recognized before its block is scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnconfirmedInput {
    pub amount: u64,
    pub one_time_public_key: PublicKey,
    pub parent_transaction_hash: Hash,
}

/// A spendable input alongside the keys needed to sign for it.
#[derive(Debug, Clone)]
pub struct SpendableInput {
    pub input: TransactionInput,
    pub public_spend_key: PublicKey,
    pub private_spend_key: SecretKey,
}

/// One address within a wallet container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubWallet {
    pub public_spend_key: PublicKey,
    pub private_spend_key: Option<SecretKey>,
    pub address: String,
    pub sync_start_height: u64,
    pub sync_start_timestamp: u64,
    pub is_primary: bool,

    pub unspent: Vec<TransactionInput>,
    pub locked: Vec<TransactionInput>,
    pub spent: Vec<TransactionInput>,
    pub unconfirmed_incoming: Vec<UnconfirmedInput>,
}

impl SubWallet {
    pub fn new(
        public_spend_key: PublicKey,
        private_spend_key: Option<SecretKey>,
        address: String,
        sync_start_height: u64,
        sync_start_timestamp: u64,
        is_primary: bool,
    ) -> Self {
        SubWallet {
            public_spend_key,
            private_spend_key,
            address,
            sync_start_height,
            sync_start_timestamp,
            is_primary,
            unspent: Vec::new(),
            locked: Vec::new(),
            spent: Vec::new(),
            unconfirmed_incoming: Vec::new(),
        }
    }

    pub fn is_view_only(&self) -> bool {
        self.private_spend_key.is_none()
    }

    /// `(unlocked, locked)` balance at `current_height`.
    ///
    /// Preserved behavior (not fixed, intentionally matching the original):
    /// a view-only wallet cannot observe spends of its own outputs (it has
    /// no key image to match against chain data), so outputs this wallet
    /// has in fact already spent elsewhere remain counted as unspent here.
    /// Callers of a view wallet's balance should treat it as an upper bound,
    /// not an exact figure.
    pub fn get_balance(&self, current_height: u64) -> (u64, u64) {
        let mut unlocked = 0u64;
        let mut locked = 0u64;
        for input in &self.unspent {
            if input.is_unlocked(current_height) {
                unlocked = unlocked.saturating_add(input.amount);
            } else {
                locked = locked.saturating_add(input.amount);
            }
        }
        for input in &self.locked {
            locked = locked.saturating_add(input.amount);
        }
        for input in &self.unconfirmed_incoming {
            locked = locked.saturating_add(input.amount);
        }
        (unlocked, locked)
    }

    /// Record a newly-scanned output. For a view wallet the caller passes
    /// the sentinel zero key image (invariant 5).
    pub fn store_transaction_input(&mut self, input: TransactionInput) {
        self.unconfirmed_incoming
            .retain(|u| u.one_time_public_key != input.key);
        self.unspent.push(input);
    }

    /// Move a key image from `unspent` to `locked`. Programmer error if
    /// the key image is not currently unspent.
    pub fn mark_input_as_locked(&mut self, key_image: &KeyImage) -> WalletResult<()> {
        let pos = self
            .unspent
            .iter()
            .position(|i| &i.key_image == key_image)
            .ok_or_else(|| {
                WalletError::Invariant(format!(
                    "mark_input_as_locked: key image {} not in unspent",
                    key_image
                ))
            })?;
        let input = self.unspent.remove(pos);
        self.locked.push(input);
        Ok(())
    }

    /// Move a key image from `unspent` or `locked` to `spent`.
    pub fn mark_input_as_spent(&mut self, key_image: &KeyImage, spend_height: u64) -> WalletResult<()> {
        if let Some(pos) = self.unspent.iter().position(|i| &i.key_image == key_image) {
            let mut input = self.unspent.remove(pos);
            input.spend_height = spend_height;
            self.spent.push(input);
            return Ok(());
        }
        if let Some(pos) = self.locked.iter().position(|i| &i.key_image == key_image) {
            let mut input = self.locked.remove(pos);
            input.spend_height = spend_height;
            self.spent.push(input);
            return Ok(());
        }
        Err(WalletError::Invariant(format!(
            "mark_input_as_spent: key image {} not in unspent or locked",
            key_image
        )))
    }

    /// Rewind this subwallet's state past a reorg at `fork_height`.
    ///
    /// `locked` and `unconfirmed_incoming` are dropped wholesale rather
    /// than selectively: they will re-derive on resync. This means an
    /// outgoing transaction that was in flight (its change output still
    /// `locked`, its spend not yet confirmed) loses its `locked` bookkeeping
    /// across a fork at or below its own height — the input falls out of
    /// this subwallet's local view until a new spend attempt re-selects it
    /// from `unspent`. Preserved rather than fixed; a real fix would need to
    /// distinguish "locked because of a transaction above the fork height"
    /// from "locked because of a transaction the fork didn't touch" before
    /// discarding.
    pub fn remove_forked_inputs(&mut self, fork_height: u64) {
        self.unspent.retain(|i| i.block_height < fork_height);

        for input in self.spent.iter_mut() {
            if input.spend_height >= fork_height && input.block_height < fork_height {
                input.spend_height = 0;
            }
        }
        let (still_spent, back_to_unspent): (Vec<_>, Vec<_>) =
            self.spent.drain(..).partition(|i| i.spend_height != 0);
        self.spent = still_spent;
        self.unspent.extend(back_to_unspent);

        self.locked.clear();
        self.unconfirmed_incoming.clear();
    }

    /// Restore cancelled transactions' inputs back to `unspent`.
    pub fn remove_cancelled_transactions(&mut self, cancelled: &std::collections::HashSet<Hash>) {
        let mut restored = Vec::new();
        self.locked.retain(|i| {
            if cancelled.contains(&i.parent_transaction_hash) {
                let mut input = i.clone();
                input.spend_height = 0;
                restored.push(input);
                false
            } else {
                true
            }
        });
        self.unspent.extend(restored);
        self.unconfirmed_incoming
            .retain(|u| !cancelled.contains(&u.parent_transaction_hash));
    }

    /// Unspent inputs unlocked at `height`, paired with the keys needed to
    /// sign for them. Empty for a view-only subwallet (no private key to
    /// hand back).
    pub fn get_spendable_inputs(&self, height: u64) -> Vec<SpendableInput> {
        let Some(private_spend_key) = self.private_spend_key else {
            return Vec::new();
        };
        self.unspent
            .iter()
            .filter(|i| i.is_unlocked(height))
            .map(|i| SpendableInput {
                input: i.clone(),
                public_spend_key: self.public_spend_key,
                private_spend_key,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input(height: u64, unlock_time: u64, amount: u64) -> TransactionInput {
        TransactionInput {
            key_image: KeyImage([height as u8; 32]),
            amount,
            block_height: height,
            transaction_public_key: PublicKey([1u8; 32]),
            transaction_index: 0,
            global_output_index: 0,
            key: PublicKey([2u8; 32]),
            spend_height: 0,
            unlock_time,
            parent_transaction_hash: Hash([3u8; 32]),
        }
    }

    #[test]
    fn balance_splits_locked_and_unlocked() {
        let mut wallet = SubWallet::new(PublicKey([0u8; 32]), None, "addr".into(), 0, 0, true);
        wallet.unspent.push(sample_input(10, 10, 100));
        wallet.unspent.push(sample_input(10, 20, 50));
        let (unlocked, locked) = wallet.get_balance(15);
        assert_eq!(unlocked, 100);
        assert_eq!(locked, 50);
    }

    #[test]
    fn mark_as_locked_then_spent() {
        let mut wallet = SubWallet::new(PublicKey([0u8; 32]), None, "addr".into(), 0, 0, true);
        let input = sample_input(5, 0, 100);
        wallet.unspent.push(input.clone());
        wallet.mark_input_as_locked(&input.key_image).unwrap();
        assert!(wallet.unspent.is_empty());
        assert_eq!(wallet.locked.len(), 1);
        wallet.mark_input_as_spent(&input.key_image, 20).unwrap();
        assert!(wallet.locked.is_empty());
        assert_eq!(wallet.spent[0].spend_height, 20);
    }

    #[test]
    fn mark_as_locked_missing_input_is_invariant_error() {
        let mut wallet = SubWallet::new(PublicKey([0u8; 32]), None, "addr".into(), 0, 0, true);
        assert!(wallet.mark_input_as_locked(&KeyImage([9u8; 32])).is_err());
    }

    #[test]
    fn fork_rewind_returns_post_fork_spends_to_unspent() {
        let mut wallet = SubWallet::new(PublicKey([0u8; 32]), None, "addr".into(), 0, 0, true);
        let mut spent_input = sample_input(5, 0, 100);
        spent_input.spend_height = 50;
        wallet.spent.push(spent_input);

        let mut future_input = sample_input(60, 0, 200);
        wallet.unspent.push(future_input.clone());
        future_input.key_image = KeyImage([99u8; 32]);
        wallet.locked.push(future_input);

        wallet.remove_forked_inputs(40);

        assert_eq!(wallet.unspent.len(), 1);
        assert_eq!(wallet.unspent[0].spend_height, 0);
        assert!(wallet.locked.is_empty());
        assert!(wallet.spent.is_empty());
    }

    #[test]
    fn spendable_inputs_empty_for_view_only() {
        let mut wallet = SubWallet::new(PublicKey([0u8; 32]), None, "addr".into(), 0, 0, true);
        wallet.unspent.push(sample_input(1, 0, 100));
        assert!(wallet.get_spendable_inputs(10).is_empty());
    }
}

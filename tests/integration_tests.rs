//! End-to-end scenarios spanning the crate's module boundary: a fresh
//! wallet receiving funds and reporting balance, a send rejected for
//! insufficient balance with no state change, a reorg unwinding both a
//! subwallet's buckets and the confirmed-transaction log, and an oversized
//! send recovering via one fusion pass before a successful retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use tempfile::TempDir;

use cryptonote_wallet_core::address::encode_address;
use cryptonote_wallet_core::crypto::{
    derive_public_key, derive_secret_key, derive_shared_secret, generate_key_image,
};
use cryptonote_wallet_core::node::{MockNode, WalletOutput};
use cryptonote_wallet_core::persistence::WalletFile;
use cryptonote_wallet_core::subwallet::TransactionInput;
use cryptonote_wallet_core::transaction::send_transaction;
use cryptonote_wallet_core::{
    BalanceError, Hash, KeyImage, MixinRange, NetworkParameters, Node, PublicKey, SecretKey,
    SendParams, StaticNetworkParameters, SubWallet, SubWallets, Transaction, WalletBackend,
    WalletBlock, WalletError, WalletTransaction,
};

/// Network parameters whose `max_transaction_size` answer is scripted call
/// by call, so a test can force a size failure on one attempt and a success
/// on the next without needing to know the transaction's real encoded size.
struct CountingNetworkParameters {
    inner: StaticNetworkParameters,
    call_count: AtomicUsize,
    schedule: Vec<usize>,
}

impl CountingNetworkParameters {
    fn new(inner: StaticNetworkParameters, schedule: Vec<usize>) -> Self {
        CountingNetworkParameters {
            inner,
            call_count: AtomicUsize::new(0),
            schedule,
        }
    }
}

impl NetworkParameters for CountingNetworkParameters {
    fn address_prefix(&self) -> u64 {
        self.inner.address_prefix()
    }

    fn standard_address_length(&self) -> usize {
        self.inner.standard_address_length()
    }

    fn integrated_address_length(&self) -> usize {
        self.inner.integrated_address_length()
    }

    fn decimal_places(&self) -> u32 {
        self.inner.decimal_places()
    }

    fn minimum_fee(&self, height: u64) -> u64 {
        self.inner.minimum_fee(height)
    }

    fn dust_threshold(&self) -> u64 {
        self.inner.dust_threshold()
    }

    fn mixin_range(&self, height: u64) -> MixinRange {
        self.inner.mixin_range(height)
    }

    fn max_transaction_size(&self, _height: u64) -> usize {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        *self.schedule.get(idx).unwrap_or_else(|| self.schedule.last().unwrap())
    }
}

#[tokio::test]
async fn fresh_wallet_receive_updates_balance() {
    let view_secret = SecretKey::generate(&mut OsRng);
    let spend_secret = SecretKey::generate(&mut OsRng);
    let spend_public = spend_secret.public_key();

    let tx_secret = SecretKey::generate(&mut OsRng);
    let tx_public = tx_secret.public_key();
    let derivation = derive_shared_secret(&tx_public, &view_secret).unwrap();
    let one_time_key = derive_public_key(&derivation, 0, &spend_public).unwrap();

    let mock = Arc::new(MockNode::new());
    {
        let mut blocks = mock.blocks.lock().unwrap();
        blocks.push(WalletBlock {
            block_height: 1,
            block_hash: Hash([1u8; 32]),
            block_timestamp: 1_700_000_000,
            coinbase_transaction: Some(WalletTransaction {
                hash: Hash([2u8; 32]),
                transaction_public_key: tx_public,
                outputs: vec![WalletOutput {
                    amount: 100_000,
                    key: one_time_key,
                    global_index: 7,
                }],
                inputs: vec![],
                payment_id: None,
                unlock_time: 0,
            }),
            transactions: vec![],
        });
    }
    *mock.local_tip.lock().unwrap() = 1;
    *mock.network_tip.lock().unwrap() = 1;
    let node: Arc<dyn Node> = mock;

    let params: Arc<dyn NetworkParameters> = Arc::new(StaticNetworkParameters::default());
    let primary = SubWallet::new(spend_public, Some(spend_secret), "primary".into(), 0, 0, true);

    let mut backend = WalletBackend::create(node, params, primary, view_secret, false);
    backend.start();

    for _ in 0..200 {
        if backend.scan_height().await >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    backend.stop().await;

    let (unlocked, _locked) = backend.get_balance().await.unwrap();
    assert_eq!(unlocked, 100_000);
}

#[tokio::test]
async fn insufficient_balance_rejects_send_and_leaves_state_unchanged() {
    let view_secret = SecretKey::generate(&mut OsRng);
    let view_public = view_secret.public_key();
    let spend_secret = SecretKey::generate(&mut OsRng);
    let spend_public = spend_secret.public_key();
    let dest_secret = SecretKey::generate(&mut OsRng);
    let dest_public = dest_secret.public_key();

    let probe = StaticNetworkParameters::default();
    let dest_address = encode_address(&probe, &dest_public, &view_public);
    let params = StaticNetworkParameters {
        standard_address_length: dest_address.len(),
        ..probe
    };

    let mut primary = SubWallet::new(spend_public, Some(spend_secret), "primary".into(), 0, 0, true);
    primary.unspent.push(TransactionInput {
        key_image: KeyImage([1u8; 32]),
        amount: 1000,
        block_height: 1,
        transaction_public_key: PublicKey([2u8; 32]),
        transaction_index: 0,
        global_output_index: 0,
        key: PublicKey([3u8; 32]),
        spend_height: 0,
        unlock_time: 0,
        parent_transaction_hash: Hash::zero(),
    });
    let mut subwallets = SubWallets::new(primary, view_secret, false);

    let node = MockNode::new();
    *node.local_tip.lock().unwrap() = 10;

    let send_params = SendParams {
        destinations: &[(dest_address, 950)],
        mixin: 0,
        fee: 100,
        payment_id: None,
        change_address: None,
        source_addresses: &[],
        unlock_time: 0,
    };

    let result = send_transaction(&send_params, &node, &mut subwallets, &params).await;

    assert!(matches!(
        result,
        Err(WalletError::Balance(BalanceError::NotEnoughBalance))
    ));
    assert!(subwallets.unconfirmed_transactions().is_empty());
    assert_eq!(subwallets.get_balance(10).0, 1000);
}

#[test]
fn fork_recovery_matches_literal_scenario() {
    let mut primary = SubWallet::new(PublicKey([0u8; 32]), None, "addr".into(), 0, 0, true);

    primary.unspent.push(TransactionInput {
        key_image: KeyImage([1u8; 32]),
        amount: 500,
        block_height: 1000,
        transaction_public_key: PublicKey([2u8; 32]),
        transaction_index: 0,
        global_output_index: 0,
        key: PublicKey([3u8; 32]),
        spend_height: 0,
        unlock_time: 0,
        parent_transaction_hash: Hash::zero(),
    });

    let mut spent_input = TransactionInput {
        key_image: KeyImage([4u8; 32]),
        amount: 300,
        block_height: 900,
        transaction_public_key: PublicKey([2u8; 32]),
        transaction_index: 0,
        global_output_index: 1,
        key: PublicKey([5u8; 32]),
        spend_height: 0,
        unlock_time: 0,
        parent_transaction_hash: Hash::zero(),
    };
    spent_input.spend_height = 1100;
    primary.spent.push(spent_input);

    let mut subwallets = SubWallets::new(primary, SecretKey([6u8; 32]), true);
    subwallets.add_transaction(Transaction {
        transfers: std::collections::HashMap::new(),
        hash: Hash([9u8; 32]),
        fee: 0,
        block_height: 1050,
        timestamp: 0,
        payment_id: String::new(),
        unlock_time: 0,
        is_coinbase: false,
    });

    subwallets.remove_forked_transactions(1000);

    let wallet = subwallets.get(&PublicKey([0u8; 32])).unwrap();
    assert!(wallet.unspent.iter().all(|i| i.key_image != KeyImage([1u8; 32])));
    assert!(wallet
        .unspent
        .iter()
        .any(|i| i.key_image == KeyImage([4u8; 32]) && i.spend_height == 0));
    assert!(subwallets.confirmed_transactions().is_empty());
}

#[tokio::test]
async fn oversized_send_recovers_via_fusion_pass_and_retry() {
    let view_secret = SecretKey::generate(&mut OsRng);
    let spend_secret = SecretKey::generate(&mut OsRng);
    let spend_public = spend_secret.public_key();

    let probe = StaticNetworkParameters::default();
    let address = encode_address(&probe, &spend_public, &view_secret.public_key());
    let base_params = StaticNetworkParameters {
        standard_address_length: address.len(),
        ..probe
    };

    let mut primary = SubWallet::new(spend_public, Some(spend_secret), address.clone(), 0, 0, true);

    let tx_secret = SecretKey::generate(&mut OsRng);
    let tx_public = tx_secret.public_key();
    let derivation = derive_shared_secret(&tx_public, &view_secret).unwrap();

    let mut next_index = 0u64;
    let mut push_owned_input = |wallet: &mut SubWallet, amount: u64| {
        let one_time_key = derive_public_key(&derivation, next_index, &spend_public).unwrap();
        let one_time_secret = derive_secret_key(&derivation, next_index, &spend_secret);
        let key_image = generate_key_image(&one_time_key, &one_time_secret).unwrap();
        wallet.unspent.push(TransactionInput {
            key_image,
            amount,
            block_height: 1,
            transaction_public_key: tx_public,
            transaction_index: next_index as u32,
            global_output_index: next_index,
            key: one_time_key,
            spend_height: 0,
            unlock_time: 0,
            parent_transaction_hash: Hash::zero(),
        });
        next_index += 1;
    };

    // 20 dust inputs, small enough that fusion's amount-ascending sort
    // consumes them first; 10 larger inputs that fusion should never touch.
    for _ in 0..20 {
        push_owned_input(&mut primary, 10);
    }
    for _ in 0..10 {
        push_owned_input(&mut primary, 500);
    }

    let node: Arc<dyn Node> = Arc::new(MockNode::new());
    // Schedule: (1) the direct send's size check, rigged to fail; (2) the
    // fusion input-selection cap, sized to select exactly the 20 dust
    // inputs and none of the 10 larger ones; (3) the fusion transaction's
    // own size check; (4) the retried send's size check.
    let params: Arc<dyn NetworkParameters> =
        Arc::new(CountingNetworkParameters::new(base_params, vec![1, 1280, 10_000_000, 10_000_000]));

    let backend = WalletBackend::create(node, params, primary, view_secret, false);

    let send_params = SendParams {
        destinations: &[(address.clone(), 4000)],
        mixin: 0,
        fee: 100,
        payment_id: None,
        change_address: None,
        source_addresses: &[],
        unlock_time: 0,
    };

    let result = backend.send_with_fusion_retry(&send_params, 0).await;
    assert!(result.is_ok());

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wallet.json");
    backend.save(&path).await.unwrap();
    let file = WalletFile::load(&path).unwrap();

    // One unconfirmed transaction from the fusion pass, one from the send
    // that finally fit.
    assert_eq!(file.sub_wallets.unconfirmed_transactions().len(), 2);
}

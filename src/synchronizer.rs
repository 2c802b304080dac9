//! WalletSynchronizer (C5): a two-stage downloader/scanner pipeline over
//! blocks from a remote node, grounded in `WalletSynchronizer.cpp`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::crypto::{
    derive_secret_key, derive_shared_secret, generate_key_image, underive_public_key, KeyImage,
    PublicKey,
};
use crate::error::WalletResult;
use crate::node::{Node, WalletBlock, WalletTransaction as NodeTransaction};
use crate::subwallet::TransactionInput;
use crate::subwallets::{SubWallets, Transaction as WalletTransaction};
use crate::sync_status::SynchronizationStatus;

const QUEUE_CAPACITY: usize = 64;
const EMPTY_POLL_DELAY: Duration = Duration::from_secs(1);
const ERROR_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Drives the downloader and scanner tasks, and owns the two independent
/// [`SynchronizationStatus`] trackers they each advance.
pub struct WalletSynchronizer {
    node: Arc<dyn Node>,
    subwallets: Arc<Mutex<SubWallets>>,
    download_status: Arc<Mutex<SynchronizationStatus>>,
    scan_status: Arc<Mutex<SynchronizationStatus>>,
    should_stop: Arc<AtomicBool>,
    start_height: u64,
    start_timestamp: u64,
    downloader_handle: Option<JoinHandle<()>>,
    scanner_handle: Option<JoinHandle<()>>,
}

impl WalletSynchronizer {
    pub fn new(
        node: Arc<dyn Node>,
        subwallets: Arc<Mutex<SubWallets>>,
        start_height: u64,
        start_timestamp: u64,
    ) -> Self {
        WalletSynchronizer {
            node,
            subwallets,
            download_status: Arc::new(Mutex::new(SynchronizationStatus::new())),
            scan_status: Arc::new(Mutex::new(SynchronizationStatus::new())),
            should_stop: Arc::new(AtomicBool::new(false)),
            start_height,
            start_timestamp,
            downloader_handle: None,
            scanner_handle: None,
        }
    }

    /// Restore previously-persisted progress (e.g. loaded from a wallet
    /// file), so a restart resumes rather than rescanning from scratch.
    pub async fn restore_status(
        &self,
        download_status: SynchronizationStatus,
        scan_status: SynchronizationStatus,
    ) {
        *self.download_status.lock().await = download_status;
        *self.scan_status.lock().await = scan_status;
    }

    pub async fn download_status(&self) -> SynchronizationStatus {
        self.download_status.lock().await.clone()
    }

    pub async fn scan_status(&self) -> SynchronizationStatus {
        self.scan_status.lock().await.clone()
    }

    /// The scanner's height is the only one meaningful to a caller: funds
    /// aren't visible until the scanner, not merely the downloader, has
    /// processed a block.
    pub async fn height(&self) -> u64 {
        self.scan_status.lock().await.height()
    }

    /// Launch the downloader and scanner as independent background tasks,
    /// connected by a bounded queue that applies backpressure to the
    /// downloader when the scanner falls behind.
    pub fn start(&mut self) {
        if self.downloader_handle.is_some() || self.scanner_handle.is_some() {
            return;
        }

        self.should_stop.store(false, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel::<WalletBlock>(QUEUE_CAPACITY);

        self.downloader_handle = Some(tokio::spawn(download_loop(
            Arc::clone(&self.node),
            Arc::clone(&self.download_status),
            Arc::clone(&self.should_stop),
            self.start_height,
            self.start_timestamp,
            tx,
        )));

        self.scanner_handle = Some(tokio::spawn(scan_loop(
            Arc::clone(&self.subwallets),
            Arc::clone(&self.scan_status),
            Arc::clone(&self.should_stop),
            rx,
        )));
    }

    /// Signal both tasks to stop and wait for them to exit. Dropping the
    /// downloader's sender (which happens when its task returns) closes the
    /// channel, unblocking the scanner's `recv` even if it's mid-wait.
    pub async fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.downloader_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.scanner_handle.take() {
            let _ = handle.await;
        }
    }

    /// Rewind sync state to an arbitrary height or timestamp and restart,
    /// per the facade's `reset` operation. Event emission is implicitly
    /// paused for the duration: both tasks are stopped before any state is
    /// touched and only restarted once the new origin is in place.
    pub async fn reset(&mut self, start_height: u64, start_timestamp: u64) {
        self.stop().await;
        self.start_height = start_height;
        self.start_timestamp = start_timestamp;
        *self.download_status.lock().await = SynchronizationStatus::new();
        *self.scan_status.lock().await = SynchronizationStatus::new();
        self.start();
    }
}

async fn download_loop(
    node: Arc<dyn Node>,
    download_status: Arc<Mutex<SynchronizationStatus>>,
    should_stop: Arc<AtomicBool>,
    start_height: u64,
    start_timestamp: u64,
    queue: mpsc::Sender<WalletBlock>,
) {
    while !should_stop.load(Ordering::SeqCst) {
        let checkpoints = download_status.lock().await.get_block_hash_checkpoints();

        match node.get_blocks(&checkpoints, start_height, start_timestamp).await {
            Ok(blocks) if blocks.is_empty() => {
                tokio::time::sleep(EMPTY_POLL_DELAY).await;
            }
            Ok(blocks) => {
                debug!(count = blocks.len(), "downloaded blocks");
                for block in blocks {
                    if should_stop.load(Ordering::SeqCst) {
                        return;
                    }
                    download_status
                        .lock()
                        .await
                        .store_block_hash(block.block_height, block.block_hash);
                    if queue.send(block).await.is_err() {
                        // Scanner side dropped; nothing left to do.
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to query blocks");
                tokio::time::sleep(ERROR_RETRY_DELAY).await;
            }
        }
    }
}

async fn scan_loop(
    subwallets: Arc<Mutex<SubWallets>>,
    scan_status: Arc<Mutex<SynchronizationStatus>>,
    should_stop: Arc<AtomicBool>,
    mut queue: mpsc::Receiver<WalletBlock>,
) {
    while let Some(block) = queue.recv().await {
        if should_stop.load(Ordering::SeqCst) {
            return;
        }

        // Fork check: if we've already scanned at or past this height, the
        // chain we're now seeing disagrees with what we thought.
        let is_fork = scan_status.lock().await.could_be_fork(block.block_height);
        if is_fork {
            info!(height = block.block_height, "fork detected, rewinding");
            subwallets.lock().await.remove_forked_transactions(block.block_height);
            scan_status.lock().await.rewind(block.block_height);
        }

        let mut wallets = subwallets.lock().await;

        if let Some(coinbase) = &block.coinbase_transaction {
            process_coinbase_transaction(&mut wallets, coinbase, block.block_height, block.block_timestamp);
        }
        for tx in &block.transactions {
            process_transaction(&mut wallets, tx, block.block_height, block.block_timestamp);
        }

        drop(wallets);

        // Only after every transaction in the block is committed do we
        // advance the scanner's checkpoint — a crash between the two steps
        // must re-derive the same transactions on restart, not skip them.
        scan_status
            .lock()
            .await
            .store_block_hash(block.block_height, block.block_hash);
    }
}

fn process_transaction_inputs(
    wallets: &mut SubWallets,
    tx: &NodeTransaction,
    block_height: u64,
    transfers: &mut HashMap<PublicKey, i64>,
) -> u64 {
    let mut sum_of_inputs = 0u64;
    for input in &tx.inputs {
        sum_of_inputs += input.amount;
        if let Some(owner) = wallets.get_key_image_owner(&input.key_image) {
            *transfers.entry(owner).or_insert(0) -= input.amount as i64;
            if let Some(wallet) = wallets.get_mut(&owner) {
                let _ = wallet.mark_input_as_spent(&input.key_image, block_height);
            }
        }
    }
    sum_of_inputs
}

/// Returns `(success, sumOfOutputs)`. Failure to compute the shared secret
/// means the transaction's public key is malformed; the caller should treat
/// the whole transaction as irrelevant to us rather than fail the block.
fn process_transaction_outputs(
    wallets: &mut SubWallets,
    tx: &NodeTransaction,
    block_height: u64,
    transfers: &mut HashMap<PublicKey, i64>,
) -> (bool, u64) {
    let private_view_key = wallets.private_view_key().clone();
    let derivation = match derive_shared_secret(&tx.transaction_public_key, &private_view_key) {
        Ok(d) => d,
        Err(_) => return (false, 0),
    };

    let mut sum_of_outputs = 0u64;
    let our_spend_keys: Vec<PublicKey> = wallets.public_spend_keys().to_vec();

    for (output_index, output) in tx.outputs.iter().enumerate() {
        sum_of_outputs += output.amount;

        let candidate = match underive_public_key(&derivation, output_index as u64, &output.key) {
            Ok(c) => c,
            Err(_) => return (false, 0),
        };

        if !our_spend_keys.contains(&candidate) {
            continue;
        }

        *transfers.entry(candidate).or_insert(0) += output.amount as i64;

        let key_image = wallets
            .get(&candidate)
            .and_then(|w| w.private_spend_key)
            .map(|private_spend_key| {
                let one_time_secret = derive_secret_key(&derivation, output_index as u64, &private_spend_key);
                generate_key_image(&output.key, &one_time_secret).unwrap_or_else(|_| KeyImage::zero())
            })
            .unwrap_or_else(KeyImage::zero);

        let input = TransactionInput {
            key_image,
            amount: output.amount,
            block_height,
            transaction_public_key: tx.transaction_public_key,
            transaction_index: output_index as u32,
            global_output_index: output.global_index,
            key: output.key,
            spend_height: 0,
            unlock_time: tx.unlock_time,
            parent_transaction_hash: tx.hash,
        };

        if let Some(wallet) = wallets.get_mut(&candidate) {
            wallet.store_transaction_input(input);
        }
    }

    (true, sum_of_outputs)
}

fn process_coinbase_transaction(
    wallets: &mut SubWallets,
    tx: &NodeTransaction,
    block_height: u64,
    block_timestamp: u64,
) {
    let mut transfers = HashMap::new();
    let (_success, _sum) = process_transaction_outputs(wallets, tx, block_height, &mut transfers);

    if !transfers.is_empty() {
        wallets.add_transaction(WalletTransaction {
            transfers,
            hash: tx.hash,
            fee: 0,
            block_height,
            timestamp: block_timestamp,
            payment_id: String::new(),
            unlock_time: tx.unlock_time,
            is_coinbase: true,
        });
    }
}

fn process_transaction(
    wallets: &mut SubWallets,
    tx: &NodeTransaction,
    block_height: u64,
    block_timestamp: u64,
) {
    let mut transfers = HashMap::new();

    let sum_of_inputs = process_transaction_inputs(wallets, tx, block_height, &mut transfers);
    let (success, sum_of_outputs) = process_transaction_outputs(wallets, tx, block_height, &mut transfers);

    if !success || transfers.is_empty() {
        return;
    }

    let fee = sum_of_inputs.saturating_sub(sum_of_outputs);

    wallets.add_transaction(WalletTransaction {
        transfers,
        hash: tx.hash,
        fee,
        block_height,
        timestamp: block_timestamp,
        payment_id: tx.payment_id.clone().unwrap_or_default(),
        unlock_time: tx.unlock_time,
        is_coinbase: false,
    });
}

/// Self-contained check used by a caller deciding whether to report "fully
/// synced": true once the scanner has caught up to the node's local tip.
pub async fn is_synced(synchronizer: &WalletSynchronizer, node: &dyn Node) -> WalletResult<bool> {
    let tip = node.local_tip().await?;
    Ok(synchronizer.height().await >= tip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Hash, SecretKey};
    use crate::node::{MockNode, WalletOutput};
    use crate::subwallet::SubWallet;

    fn make_subwallets() -> (PublicKey, SecretKey, Arc<Mutex<SubWallets>>) {
        let view_secret = SecretKey([9u8; 32]);
        let spend_secret = SecretKey([3u8; 32]);
        let spend_public = spend_secret.public_key();
        let primary = SubWallet::new(spend_public, Some(spend_secret), "addr".into(), 0, 0, true);
        let subwallets = SubWallets::new(primary, view_secret, false);
        (spend_public, view_secret, Arc::new(Mutex::new(subwallets)))
    }

    #[tokio::test]
    async fn scans_an_owned_output_into_unspent_balance() {
        let (spend_public, view_secret, subwallets) = make_subwallets();

        let tx_secret = SecretKey([4u8; 32]);
        let tx_public = tx_secret.public_key();
        let derivation = derive_shared_secret(&tx_public, &view_secret).unwrap();
        let one_time_key = crate::crypto::derive_public_key(&derivation, 0, &spend_public).unwrap();

        let node_tx = NodeTransaction {
            hash: Hash([1u8; 32]),
            transaction_public_key: tx_public,
            outputs: vec![WalletOutput {
                amount: 500,
                key: one_time_key,
                global_index: 42,
            }],
            inputs: vec![],
            payment_id: None,
            unlock_time: 0,
        };

        {
            let mut wallets = subwallets.lock().await;
            process_transaction(&mut wallets, &node_tx, 10, 1000);
        }

        let wallets = subwallets.lock().await;
        let (unlocked, _locked) = wallets.get_balance(10);
        assert_eq!(unlocked, 500);
        assert_eq!(wallets.confirmed_transactions().len(), 1);
    }

    #[tokio::test]
    async fn fork_rewind_clears_confirmed_transactions_at_or_above_fork_height() {
        let (_spend_public, _view_secret, subwallets) = make_subwallets();
        {
            let mut wallets = subwallets.lock().await;
            wallets.add_transaction(WalletTransaction {
                transfers: HashMap::new(),
                hash: Hash([2u8; 32]),
                fee: 0,
                block_height: 50,
                timestamp: 0,
                payment_id: String::new(),
                unlock_time: 0,
                is_coinbase: false,
            });
        }

        subwallets.lock().await.remove_forked_transactions(40);
        assert!(subwallets.lock().await.confirmed_transactions().is_empty());
    }

    #[tokio::test]
    async fn start_and_stop_is_clean_with_no_blocks() {
        let node: Arc<dyn Node> = Arc::new(MockNode::new());
        let (_spend_public, _view_secret, subwallets) = make_subwallets();

        let mut synchronizer = WalletSynchronizer::new(node, subwallets, 0, 0);
        synchronizer.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        synchronizer.stop().await;
    }
}

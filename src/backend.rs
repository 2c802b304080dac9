//! WalletBackend facade (C7): coordinates initialization (load state ->
//! inflate C3/C4 -> construct C5 -> start scanner tasks), shutdown (stop
//! C5, flush C4, write to disk), and orchestration of sends that overflow a
//! single transaction's size budget.
//!
//! An owned handle returned by a factory (`create`/`open`/`import`), not a
//! static instance — nothing prevents a process from holding several.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::config::NetworkParameters;
use crate::crypto::SecretKey;
use crate::error::{SizeError, WalletError, WalletResult};
use crate::node::Node;
use crate::persistence::WalletFile;
use crate::subwallet::SubWallet;
use crate::subwallets::SubWallets;
use crate::sync_status::SynchronizationStatus;
use crate::synchronizer::WalletSynchronizer;
use crate::transaction::{self, FusionSendParams, SendParams, SendResult};

/// An owned wallet handle: the subwallets store, its synchronizer, and the
/// node/network parameters it was built against. Dropping this without
/// calling [`WalletBackend::stop`] leaves the background tasks running
/// until they notice the handle is gone via the channel closing.
pub struct WalletBackend {
    node: Arc<dyn Node>,
    network_params: Arc<dyn NetworkParameters>,
    subwallets: Arc<Mutex<SubWallets>>,
    synchronizer: WalletSynchronizer,
}

impl WalletBackend {
    /// Create a brand-new wallet around a freshly generated (or externally
    /// supplied) primary subwallet.
    pub fn create(
        node: Arc<dyn Node>,
        network_params: Arc<dyn NetworkParameters>,
        primary: SubWallet,
        private_view_key: SecretKey,
        is_view_wallet: bool,
    ) -> Self {
        let start_height = primary.sync_start_height;
        let start_timestamp = primary.sync_start_timestamp;
        let subwallets = Arc::new(Mutex::new(SubWallets::new(primary, private_view_key, is_view_wallet)));
        let synchronizer =
            WalletSynchronizer::new(Arc::clone(&node), Arc::clone(&subwallets), start_height, start_timestamp);
        WalletBackend {
            node,
            network_params,
            subwallets,
            synchronizer,
        }
    }

    /// Import already-constructed wallet state — e.g. subwallets and sync
    /// progress recovered from a mnemonic or hardware signer elsewhere;
    /// that recovery process itself is out of this crate's scope.
    pub async fn import(
        node: Arc<dyn Node>,
        network_params: Arc<dyn NetworkParameters>,
        sub_wallets: SubWallets,
        sync_status: SynchronizationStatus,
    ) -> Self {
        let (start_height, start_timestamp) = sub_wallets.get_min_initial_sync_start();
        let subwallets = Arc::new(Mutex::new(sub_wallets));
        let synchronizer =
            WalletSynchronizer::new(Arc::clone(&node), Arc::clone(&subwallets), start_height, start_timestamp);
        synchronizer.restore_status(sync_status.clone(), sync_status).await;
        WalletBackend {
            node,
            network_params,
            subwallets,
            synchronizer,
        }
    }

    /// Load a wallet from disk, restoring both the subwallets store and the
    /// synchronizer's exact checkpoint history.
    pub async fn open(
        node: Arc<dyn Node>,
        network_params: Arc<dyn NetworkParameters>,
        path: &Path,
    ) -> WalletResult<Self> {
        let file = WalletFile::load(path)?;
        let (start_height, start_timestamp) = file.sub_wallets.get_min_initial_sync_start();
        let subwallets = Arc::new(Mutex::new(file.sub_wallets));
        let synchronizer =
            WalletSynchronizer::new(Arc::clone(&node), Arc::clone(&subwallets), start_height, start_timestamp);
        synchronizer.restore_status(file.wallet_synchronizer.clone(), file.wallet_synchronizer).await;
        Ok(WalletBackend {
            node,
            network_params,
            subwallets,
            synchronizer,
        })
    }

    /// Flush the current subwallets store and synchronizer progress to
    /// disk. Encrypting the resulting document is the embedding
    /// application's responsibility.
    pub async fn save(&self, path: &Path) -> WalletResult<()> {
        let subwallets = self.subwallets.lock().await.clone();
        let sync_status = self.synchronizer.scan_status().await;
        let file = WalletFile::new(subwallets, sync_status);
        file.save(path)
    }

    pub fn start(&mut self) {
        self.synchronizer.start();
    }

    pub async fn stop(&mut self) {
        self.synchronizer.stop().await;
    }

    /// Rewind sync state to an arbitrary height or timestamp. Stops the
    /// scanner first so it can't race an in-flight block against the new
    /// origin, then restarts it from scratch.
    pub async fn reset(&mut self, height: u64, timestamp: u64) {
        self.synchronizer.reset(height, timestamp).await;
    }

    pub async fn scan_height(&self) -> u64 {
        self.synchronizer.height().await
    }

    pub async fn is_synced(&self) -> WalletResult<bool> {
        let tip = self.node.network_tip().await?;
        Ok(self.scan_height().await >= tip)
    }

    pub async fn get_balance(&self) -> WalletResult<(u64, u64)> {
        let height = self.node.local_tip().await?;
        Ok(self.subwallets.lock().await.get_balance(height))
    }

    pub async fn send_transaction(&self, params: &SendParams<'_>) -> WalletResult<SendResult> {
        let mut subwallets = self.subwallets.lock().await;
        transaction::send_transaction(params, self.node.as_ref(), &mut subwallets, self.network_params.as_ref()).await
    }

    pub async fn send_fusion_transaction(&self, params: &FusionSendParams<'_>) -> WalletResult<SendResult> {
        let mut subwallets = self.subwallets.lock().await;
        transaction::send_fusion_transaction(
            params,
            self.node.as_ref(),
            &mut subwallets,
            self.network_params.as_ref(),
        )
        .await
    }

    /// Send, and if the transaction doesn't fit in one block even after the
    /// constructor's own denomination splitting, run one fusion pass over
    /// the same source addresses and retry once. A wallet with many small
    /// unspent inputs first fails with `TooManyInputsToFitInBlock`, then
    /// succeeds once consolidated.
    pub async fn send_with_fusion_retry(
        &self,
        params: &SendParams<'_>,
        fusion_mixin: u64,
    ) -> WalletResult<SendResult> {
        match self.send_transaction(params).await {
            Err(WalletError::Size(SizeError::TooManyInputsToFitInBlock { .. })) => {
                warn!("send too large for one transaction, attempting a fusion pass before retrying");
                let primary_address = {
                    let subwallets = self.subwallets.lock().await;
                    subwallets
                        .primary_address()
                        .ok_or_else(|| WalletError::Invariant("container has no primary address".into()))?
                        .to_string()
                };
                let fusion_params = FusionSendParams {
                    mixin: fusion_mixin,
                    destination_address: &primary_address,
                    source_addresses: params.source_addresses,
                };
                self.send_fusion_transaction(&fusion_params).await?;
                self.send_transaction(params).await
            }
            other => other,
        }
    }
}

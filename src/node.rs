//! Node interface (C2): the narrow contract the core consumes to talk to a
//! remote node. Implementations use JSON-RPC internally, but the core only
//! ever sees the [`Node`] trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::crypto::{Hash, KeyImage, PublicKey};
use crate::error::{NetworkError, WalletError, WalletResult};

/// One output as seen inside a wallet-oriented block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletOutput {
    pub amount: u64,
    pub key: PublicKey,
    /// Chain-wide index for this amount, needed later to request decoys
    /// for this output if it's ever spent.
    pub global_index: u64,
}

/// One key-image input as seen inside a wallet-oriented block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInput {
    pub amount: u64,
    pub key_image: KeyImage,
}

/// A transaction prefiltered by the node into the fields a wallet needs:
/// public tx key, output keys with amounts, key-image inputs with
/// amounts, and an optional payment ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub hash: Hash,
    pub transaction_public_key: PublicKey,
    pub outputs: Vec<WalletOutput>,
    pub inputs: Vec<WalletInput>,
    pub payment_id: Option<String>,
    pub unlock_time: u64,
}

/// A block, trimmed to what the wallet synchronizer needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBlock {
    pub block_height: u64,
    pub block_hash: Hash,
    pub block_timestamp: u64,
    pub coinbase_transaction: Option<WalletTransaction>,
    pub transactions: Vec<WalletTransaction>,
}

/// One candidate decoy output for a given amount: its chain-wide index and
/// one-time public key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RandomOutput {
    pub global_index: u64,
    pub key: PublicKey,
}

/// The node's recommended transfer-fee destination, or `None` if the node
/// charges no mandatory fee.
#[derive(Debug, Clone)]
pub struct NodeFee {
    pub amount: u64,
    pub address: String,
}

/// The narrow contract the wallet core consumes. Implementations are free
/// to batch, cache, or retry internally; the core only sees these five
/// operations.
#[async_trait]
pub trait Node: Send + Sync {
    /// The node's locally-stored chain tip height.
    async fn local_tip(&self) -> WalletResult<u64>;

    /// The network's best-known chain tip height (may exceed `local_tip`
    /// while the node itself is catching up).
    async fn network_tip(&self) -> WalletResult<u64>;

    /// The node's mandatory transfer fee, if any.
    async fn node_fee(&self) -> WalletResult<NodeFee>;

    /// Stream wallet-oriented blocks starting from the first checkpoint the
    /// node still has, or from `start_height`/`start_timestamp` if none of
    /// the checkpoints are recognized.
    async fn get_blocks(
        &self,
        checkpoints: &[Hash],
        start_height: u64,
        start_timestamp: u64,
    ) -> WalletResult<Vec<WalletBlock>>;

    /// Fetch decoy candidates for each requested amount.
    async fn get_random_outputs(
        &self,
        amounts: &[u64],
        requested_count: usize,
    ) -> WalletResult<HashMap<u64, Vec<RandomOutput>>>;

    /// Broadcast a fully-signed, hex-encoded transaction.
    async fn submit_transaction(&self, tx_hex: &str) -> WalletResult<()>;
}

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<T>,
    error: Option<JsonRpcError>,
    #[allow(dead_code)]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// A single-node JSON-RPC client. Failover and gossip-based peer discovery
/// belong to the P2P layer, out of scope for this crate; callers who need
/// multi-node resilience wrap several `HttpNode`s themselves.
pub struct HttpNode {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNode {
    pub fn new(base_url: impl Into<String>) -> WalletResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| NetworkError::DaemonOffline(e.to_string()))?;
        Ok(HttpNode {
            client,
            base_url: base_url.into(),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> WalletResult<T> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| NetworkError::DaemonOffline(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NetworkError::DaemonError(format!("HTTP {}", response.status())).into());
        }

        let parsed: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| NetworkError::DaemonError(e.to_string()))?;

        if let Some(error) = parsed.error {
            warn!(method, code = error.code, "node rejected request");
            return Err(NetworkError::DaemonError(error.message).into());
        }

        parsed
            .result
            .ok_or_else(|| WalletError::from(NetworkError::DaemonError("missing result".into())))
    }
}

#[async_trait]
impl Node for HttpNode {
    async fn local_tip(&self) -> WalletResult<u64> {
        #[derive(Deserialize)]
        struct Resp {
            height: u64,
        }
        let resp: Resp = self.call("getLastBlockHeader", serde_json::json!({})).await?;
        Ok(resp.height)
    }

    async fn network_tip(&self) -> WalletResult<u64> {
        #[derive(Deserialize)]
        struct Resp {
            network_height: u64,
        }
        let resp: Resp = self.call("getLastBlockHeader", serde_json::json!({})).await?;
        Ok(resp.network_height)
    }

    async fn node_fee(&self) -> WalletResult<NodeFee> {
        #[derive(Deserialize)]
        struct Resp {
            fee_amount: u64,
            fee_address: String,
        }
        let resp: Resp = self
            .call("getFeeInfo", serde_json::json!({}))
            .await
            .map_err(|e| WalletError::from(NetworkError::NodeFeeQueryFailed(e.to_string())))?;
        Ok(NodeFee {
            amount: resp.fee_amount,
            address: resp.fee_address,
        })
    }

    async fn get_blocks(
        &self,
        checkpoints: &[Hash],
        start_height: u64,
        start_timestamp: u64,
    ) -> WalletResult<Vec<WalletBlock>> {
        debug!(count = checkpoints.len(), start_height, "requesting blocks");
        self.call(
            "getBlocks",
            serde_json::json!({
                "blockHashCheckpoints": checkpoints.iter().map(|h| h.to_hex()).collect::<Vec<_>>(),
                "startHeight": start_height,
                "startTimestamp": start_timestamp,
            }),
        )
        .await
    }

    async fn get_random_outputs(
        &self,
        amounts: &[u64],
        requested_count: usize,
    ) -> WalletResult<HashMap<u64, Vec<RandomOutput>>> {
        self.call(
            "getRandomOuts",
            serde_json::json!({
                "amounts": amounts,
                "outs_count": requested_count,
            }),
        )
        .await
    }

    async fn submit_transaction(&self, tx_hex: &str) -> WalletResult<()> {
        #[derive(Deserialize)]
        struct Resp {
            status: String,
        }
        let resp: Resp = self
            .call("sendRawTransaction", serde_json::json!({ "tx_as_hex": tx_hex }))
            .await?;
        if resp.status == "OK" {
            Ok(())
        } else {
            Err(NetworkError::DaemonError(resp.status).into())
        }
    }
}

/// An in-memory, fully-programmable node fixture for tests.
#[derive(Default)]
pub struct MockNode {
    pub local_tip: std::sync::Mutex<u64>,
    pub network_tip: std::sync::Mutex<u64>,
    pub fee: std::sync::Mutex<Option<NodeFee>>,
    pub blocks: std::sync::Mutex<Vec<WalletBlock>>,
    pub random_outputs: std::sync::Mutex<HashMap<u64, Vec<RandomOutput>>>,
    pub submitted: std::sync::Mutex<Vec<String>>,
    pub fail_submit: std::sync::Mutex<bool>,
}

impl MockNode {
    pub fn new() -> Self {
        MockNode::default()
    }
}

#[async_trait]
impl Node for MockNode {
    async fn local_tip(&self) -> WalletResult<u64> {
        Ok(*self.local_tip.lock().unwrap())
    }

    async fn network_tip(&self) -> WalletResult<u64> {
        Ok(*self.network_tip.lock().unwrap())
    }

    async fn node_fee(&self) -> WalletResult<NodeFee> {
        Ok(self
            .fee
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(NodeFee { amount: 0, address: String::new() }))
    }

    async fn get_blocks(
        &self,
        checkpoints: &[Hash],
        start_height: u64,
        _start_timestamp: u64,
    ) -> WalletResult<Vec<WalletBlock>> {
        let all = self.blocks.lock().unwrap();
        if let Some(known) = checkpoints.iter().find_map(|cp| {
            all.iter().find(|b| b.block_hash == *cp).map(|b| b.block_height)
        }) {
            Ok(all.iter().filter(|b| b.block_height > known).cloned().collect())
        } else {
            Ok(all
                .iter()
                .filter(|b| b.block_height >= start_height)
                .cloned()
                .collect())
        }
    }

    async fn get_random_outputs(
        &self,
        amounts: &[u64],
        _requested_count: usize,
    ) -> WalletResult<HashMap<u64, Vec<RandomOutput>>> {
        let all = self.random_outputs.lock().unwrap();
        Ok(amounts
            .iter()
            .map(|a| (*a, all.get(a).cloned().unwrap_or_default()))
            .collect())
    }

    async fn submit_transaction(&self, tx_hex: &str) -> WalletResult<()> {
        if *self.fail_submit.lock().unwrap() {
            return Err(NetworkError::DaemonError("rejected by mock node".into()).into());
        }
        self.submitted.lock().unwrap().push(tx_hex.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_node_returns_blocks_after_checkpoint() {
        let node = MockNode::new();
        {
            let mut blocks = node.blocks.lock().unwrap();
            for h in 1..=5u64 {
                blocks.push(WalletBlock {
                    block_height: h,
                    block_hash: Hash([h as u8; 32]),
                    block_timestamp: 0,
                    coinbase_transaction: None,
                    transactions: Vec::new(),
                });
            }
        }
        let checkpoint = Hash([2u8; 32]);
        let result = node.get_blocks(&[checkpoint], 0, 0).await.unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].block_height, 3);
    }

    #[tokio::test]
    async fn mock_node_submit_can_be_forced_to_fail() {
        let node = MockNode::new();
        *node.fail_submit.lock().unwrap() = true;
        assert!(node.submit_transaction("deadbeef").await.is_err());
    }
}

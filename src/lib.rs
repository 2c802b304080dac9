//! Core of a CryptoNote-family wallet backend: the SubWallets state store,
//! the WalletSynchronizer downloader/scanner pipeline, and the transaction
//! constructor. Consumes a remote node only through the narrow [`node::Node`]
//! trait — no REPL, RPC dispatcher, CLI, wallet-file encryption, mnemonic
//! codec, or P2P/consensus logic lives here.

pub mod address;
pub mod backend;
pub mod config;
pub mod crypto;
pub mod decoy;
pub mod error;
pub mod node;
pub mod persistence;
pub mod secmem;
pub mod subwallet;
pub mod subwallets;
pub mod sync_status;
pub mod synchronizer;
pub mod transaction;

pub use address::{Address, IntegratedAddress};
pub use backend::WalletBackend;
pub use config::{MixinRange, NetworkParameters, StaticNetworkParameters};
pub use crypto::{Hash, KeyImage, PublicKey, SecretKey, Signature};
pub use error::{
    BalanceError, ConstructionError, NetworkError, PersistenceError, SizeError, ValidationError,
    WalletError, WalletResult,
};
pub use node::{HttpNode, Node, NodeFee, RandomOutput, WalletBlock, WalletTransaction};
pub use subwallet::SubWallet;
pub use subwallets::{SelectedInput, SubWallets, Transaction};
pub use synchronizer::WalletSynchronizer;
pub use transaction::{FusionSendParams, SendParams, SendResult};

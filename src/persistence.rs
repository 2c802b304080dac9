//! Wallet file persistence (C8): plain JSON round-trip of the
//! `{walletFileFormatVersion, subWallets, walletSynchronizer}` document.
//!
//! Unencrypted by design — wrapping this document in a password-protected
//! container is the embedding application's job, not this crate's.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{PersistenceError, WalletError, WalletResult};
use crate::subwallets::SubWallets;
use crate::sync_status::SynchronizationStatus;

const WALLET_FILE_FORMAT_VERSION: u32 = 1;

/// The document persisted to (or loaded from) a wallet file.
#[derive(Debug, Serialize, Deserialize)]
pub struct WalletFile {
    pub wallet_file_format_version: u32,
    pub sub_wallets: SubWallets,
    pub wallet_synchronizer: SynchronizationStatus,
}

impl WalletFile {
    pub fn new(sub_wallets: SubWallets, wallet_synchronizer: SynchronizationStatus) -> Self {
        WalletFile {
            wallet_file_format_version: WALLET_FILE_FORMAT_VERSION,
            sub_wallets,
            wallet_synchronizer,
        }
    }

    /// Serialize to pretty JSON and write to `path`, creating parent
    /// directories as needed. Restricted to owner-read/write on unix, since
    /// the document contains private keys even though it isn't encrypted.
    pub fn save(&self, path: &Path) -> WalletResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| WalletError::Invariant(format!("failed to create wallet directory: {e}")))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PersistenceError::Malformed(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .map_err(|e| WalletError::Invariant(format!("failed to open wallet file: {e}")))?;
            file.write_all(json.as_bytes())
                .map_err(|e| WalletError::Invariant(format!("failed to write wallet file: {e}")))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, json)
                .map_err(|e| WalletError::Invariant(format!("failed to write wallet file: {e}")))?;
        }

        Ok(())
    }

    /// Load and validate a wallet file's format version.
    pub fn load(path: &Path) -> WalletResult<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| WalletError::Invariant(format!("failed to read wallet file: {e}")))?;

        let file: WalletFile = serde_json::from_str(&json)
            .map_err(|e| PersistenceError::Malformed(e.to_string()))?;

        if file.wallet_file_format_version != WALLET_FILE_FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(file.wallet_file_format_version).into());
        }

        Ok(file)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::subwallet::SubWallet;
    use tempfile::TempDir;

    fn sample() -> WalletFile {
        let primary = SubWallet::new(
            SecretKey([1u8; 32]).public_key(),
            Some(SecretKey([1u8; 32])),
            "addr".into(),
            0,
            0,
            true,
        );
        let sub_wallets = SubWallets::new(primary, SecretKey([2u8; 32]), false);
        WalletFile::new(sub_wallets, SynchronizationStatus::new())
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");

        sample().save(&path).unwrap();
        assert!(WalletFile::exists(&path));

        let loaded = WalletFile::load(&path).unwrap();
        assert_eq!(loaded.wallet_file_format_version, WALLET_FILE_FORMAT_VERSION);
        assert_eq!(loaded.sub_wallets.public_spend_keys().len(), 1);
    }

    #[test]
    fn rejects_future_format_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");

        let mut file = sample();
        file.wallet_file_format_version = 99;
        let json = serde_json::to_string(&file).unwrap();
        fs::write(&path, json).unwrap();

        let result = WalletFile::load(&path);
        assert!(matches!(
            result,
            Err(WalletError::Persistence(PersistenceError::UnsupportedVersion(99)))
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            WalletFile::load(&path),
            Err(WalletError::Persistence(PersistenceError::Malformed(_)))
        ));
    }
}

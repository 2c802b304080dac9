//! Error taxonomy for the wallet core.
//!
//! Every public operation returns an explicit [`WalletError`] rather than
//! throwing across component boundaries. Each taxonomy category from the
//! design is its own enum so call sites can match narrowly; `WalletError`
//! is the umbrella type that `?` converts into.

use thiserror::Error;

/// Input validation failures, raised before any network call is made.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no destinations given")]
    NoDestinationsGiven,
    #[error("amount is zero")]
    AmountIsZero,
    #[error("address has the wrong length: expected {expected} or {expected_integrated}, got {got}")]
    AddressWrongLength {
        expected: usize,
        expected_integrated: usize,
        got: usize,
    },
    #[error("address has the wrong prefix")]
    AddressWrongPrefix,
    #[error("address failed base58 decoding")]
    AddressNotBase58,
    #[error("address is not a valid CryptoNote address")]
    AddressNotValid,
    #[error("integrated addresses are not valid for this parameter")]
    AddressIsIntegrated,
    #[error("payment ID extracted from integrated address is malformed")]
    IntegratedAddressPaymentIdInvalid,
    #[error("payment ID must be empty or exactly 64 hex chars")]
    PaymentIdInvalid,
    #[error("wrong payment ID length: {0}")]
    PaymentIdWrongLength(usize),
    #[error("a payment ID was supplied but conflicts with the one embedded in an integrated address")]
    ConflictingPaymentIds,
    #[error("mixin {given} is below the minimum allowed ({min})")]
    MixinTooSmall { given: u64, min: u64 },
    #[error("mixin {given} is above the maximum allowed ({max})")]
    MixinTooBig { given: u64, max: u64 },
    #[error("fee {given} is below the minimum allowed ({min})")]
    FeeTooSmall { given: u64, min: u64 },
}

/// Balance-related failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("not enough unlocked balance")]
    NotEnoughBalance,
    #[error("sum of requested amounts overflows a 64-bit integer")]
    WillOverflow,
    #[error("address does not exist in this wallet container")]
    AddressNotInWallet,
}

/// Transaction-construction failures (post input-selection, pre-relay).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("not enough decoy outputs available for amount {amount}: needed {needed}, node returned {available}")]
    NotEnoughFakeOutputs {
        amount: u64,
        needed: usize,
        available: usize,
    },
    #[error("derived one-time key does not match the on-chain key; key material may be corrupted")]
    InvalidGeneratedKeyImage,
    #[error("failed to generate or self-verify a ring signature")]
    FailedToCreateRingSignature,
}

/// Transaction size and economics failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("transaction of {actual} bytes exceeds the maximum of {max} bytes for height {height}, even after optimization")]
    TooManyInputsToFitInBlock {
        actual: usize,
        max: usize,
        height: u64,
    },
    #[error("an output amount is not in the pretty-denomination set: {0}")]
    AmountNotPrettyDenomination(u64),
    #[error("actual fee {actual} does not equal expected fee {expected}")]
    FeeMismatch { actual: u64, expected: u64 },
    #[error("wallet is already fully optimized; no fusion transaction possible")]
    FullyOptimized,
}

/// Failures talking to the remote node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("daemon is offline or unreachable: {0}")]
    DaemonOffline(String),
    #[error("daemon rejected the request: {0}")]
    DaemonError(String),
    #[error("failed to query the node fee: {0}")]
    NodeFeeQueryFailed(String),
}

/// On-disk wallet file failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("unsupported wallet file format version: {0}")]
    UnsupportedVersion(u32),
    #[error("wallet file is malformed: {0}")]
    Malformed(String),
}

/// The umbrella error type returned by every public operation in this crate.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    #[error(transparent)]
    Size(#[from] SizeError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// A programmer error: an invariant the caller was supposed to uphold
    /// (e.g. locking a key image that was never in `unspent`) was violated.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

pub type WalletResult<T> = Result<T, WalletError>;

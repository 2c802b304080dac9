//! Chain parameters (ambient configuration).
//!
//! The core takes these as data rather than compiling them in, so the same
//! crate can back wallets for different CryptoNote-family chains. Defaults
//! below match the constants recoverable from `ValidateParameters.cpp` and
//! its companion config header in the original source.

/// Minimum and maximum mixin (ring size minus one) allowed at a given
/// blockchain height, plus the default mixin a caller should use when none
/// is specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixinRange {
    pub min: u64,
    pub max: u64,
    pub default: u64,
}

/// Parameters of the chain a wallet is talking to. Fork-aware fields are
/// exposed as functions of height rather than constants.
pub trait NetworkParameters: Send + Sync {
    /// Base58 address prefix (varint-encoded prefix value, e.g. Monero's
    /// `18`-style prefix).
    fn address_prefix(&self) -> u64;

    /// Length in base58 characters of a standard address.
    fn standard_address_length(&self) -> usize;

    /// Length in base58 characters of an integrated address.
    fn integrated_address_length(&self) -> usize;

    /// Number of atomic units per whole coin (controls decimal formatting).
    fn decimal_places(&self) -> u32;

    /// Minimum transaction fee, in atomic units, at the given height.
    fn minimum_fee(&self, height: u64) -> u64;

    /// Outputs below this value are not worth including as change/decoys.
    fn dust_threshold(&self) -> u64;

    /// Allowable mixin range at the given height.
    fn mixin_range(&self, height: u64) -> MixinRange;

    /// Maximum transaction size, in bytes, that will fit in a block at the
    /// given height.
    fn max_transaction_size(&self, height: u64) -> usize;

    /// Height/timestamp boundary: values below this are interpreted as a
    /// block height, values at or above it as a unix timestamp. This is the
    /// single constant CryptoNote-family chains keep fixed across forks.
    fn unlock_time_height_timestamp_boundary(&self) -> u64 {
        500_000_000
    }
}

/// A fixed-parameter chain, for wallets that don't need fork-dependent
/// schedules. Good enough as the default for tests and for chains that
/// have never changed these constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticNetworkParameters {
    pub address_prefix: u64,
    pub standard_address_length: usize,
    pub integrated_address_length: usize,
    pub decimal_places: u32,
    pub minimum_fee: u64,
    pub dust_threshold: u64,
    pub mixin_range: MixinRange,
    pub max_transaction_size: usize,
}

impl Default for StaticNetworkParameters {
    fn default() -> Self {
        StaticNetworkParameters {
            address_prefix: 0x3d,
            standard_address_length: 99,
            integrated_address_length: 187,
            decimal_places: 6,
            minimum_fee: 10,
            dust_threshold: 1,
            mixin_range: MixinRange {
                min: 0,
                max: 100,
                default: 3,
            },
            max_transaction_size: 100_000,
        }
    }
}

impl NetworkParameters for StaticNetworkParameters {
    fn address_prefix(&self) -> u64 {
        self.address_prefix
    }

    fn standard_address_length(&self) -> usize {
        self.standard_address_length
    }

    fn integrated_address_length(&self) -> usize {
        self.integrated_address_length
    }

    fn decimal_places(&self) -> u32 {
        self.decimal_places
    }

    fn minimum_fee(&self, _height: u64) -> u64 {
        self.minimum_fee
    }

    fn dust_threshold(&self) -> u64 {
        self.dust_threshold
    }

    fn mixin_range(&self, _height: u64) -> MixinRange {
        self.mixin_range
    }

    fn max_transaction_size(&self, _height: u64) -> usize {
        self.max_transaction_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let params = StaticNetworkParameters::default();
        let range = params.mixin_range(0);
        assert!(range.min <= range.default && range.default <= range.max);
        assert!(params.standard_address_length() < params.integrated_address_length());
    }
}

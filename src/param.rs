//! Consensus parameters.
//!
//! Every height constant that changes trie behavior lives here: expiration
//! terms, activation-delay tuning, and the heights of the three rule forks
//! (extended expiration, name normalization, all-claims hashing). The
//! values differ per network, so the type ships presets for mainnet,
//! testnet, and regtest.

/// Consensus parameters for one network.
#[derive(Clone, Debug)]
pub struct Params {
    /// Expiration term, in blocks, for stakes accepted before the
    /// extended-expiration fork.
    pub original_claim_expiration: i32,
    /// Expiration term for stakes accepted at or after the fork.
    pub extended_claim_expiration: i32,
    /// Height at which the extended expiration term takes effect.
    pub extended_claim_expiration_fork_height: i32,
    /// Below this height, removals that do not cause a takeover still
    /// force-activate pending stakes, mirroring a bug in the old chain
    /// software that replayed history must reproduce.
    pub max_removal_workaround_height: i32,
    /// Height at which the trie root starts committing to every active
    /// claim instead of only the controlling one.
    pub all_claims_in_merkle_fork_height: i32,
    /// Height from which names are compared in normalized form. The
    /// boundary is exclusive: this height itself already normalizes.
    pub normalization_fork_height: i32,
    /// Divisor applied to the blocks-since-takeover when computing a new
    /// stake's activation delay.
    pub activation_delay_divisor: i32,
    /// Upper bound on the activation delay, in blocks.
    pub max_activation_delay: i32,
}

impl Params {
    /// Mainnet parameters.
    pub fn mainnet() -> Self {
        Params {
            original_claim_expiration: 262_974,
            extended_claim_expiration: 2_102_400,
            extended_claim_expiration_fork_height: 400_155,
            max_removal_workaround_height: 658_300,
            all_claims_in_merkle_fork_height: 658_310,
            normalization_fork_height: 539_940,
            activation_delay_divisor: 32,
            max_activation_delay: 4032,
        }
    }

    /// Testnet parameters.
    pub fn testnet() -> Self {
        Params {
            original_claim_expiration: 262_974,
            extended_claim_expiration: 2_102_400,
            extended_claim_expiration_fork_height: 278_160,
            max_removal_workaround_height: 100,
            all_claims_in_merkle_fork_height: 1_198_559,
            normalization_fork_height: 993_380,
            activation_delay_divisor: 32,
            max_activation_delay: 4032,
        }
    }

    /// Regtest parameters: low fork heights so every rule change is
    /// reachable in tests and local chains.
    pub fn regtest() -> Self {
        Params {
            original_claim_expiration: 500,
            extended_claim_expiration: 600,
            extended_claim_expiration_fork_height: 800,
            max_removal_workaround_height: 0,
            all_claims_in_merkle_fork_height: 349,
            normalization_fork_height: 250,
            activation_delay_divisor: 32,
            max_activation_delay: 4032,
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::mainnet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_mainnet() {
        let params = Params::default();
        assert_eq!(params.activation_delay_divisor, 32);
        assert_eq!(params.max_activation_delay, 4032);
        assert_eq!(params.original_claim_expiration, 262_974);
    }

    #[test]
    fn regtest_forks_are_reachable() {
        let params = Params::regtest();
        assert!(params.normalization_fork_height < params.all_claims_in_merkle_fork_height);
        assert!(params.all_claims_in_merkle_fork_height < 1000);
    }
}

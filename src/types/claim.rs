//! Claim and support records.
//!
//! Both claims and supports are stakes against a name: a claim carries its
//! own identity, a support boosts the claim whose id it names. They share
//! the same lifecycle (accepted, activated, removed on spend or expiry),
//! so a single record type backs both.

use serde::{Deserialize, Serialize};

use super::{ClaimId, OutPoint};
use crate::param::Params;

/// Lifecycle status of a claim or support inside the node state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ClaimStatus {
    /// Accepted into the node but not yet eligible to bid.
    Accepted,
    /// Active: participates in bidding (claims) or boosts its claim
    /// (supports).
    Activated,
    /// Spent at the current height. Kept on the node until the next bid
    /// evaluation because an update in the same block may revive it.
    Deactivated,
}

/// A named stake: either a claim or a support.
///
/// For a claim, `claim_id` is its own identity. For a support, `claim_id`
/// names the claim whose effective amount it boosts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claim {
    /// Identity of the claim (or of the supported claim).
    pub claim_id: ClaimId,
    /// Output holding the stake.
    pub outpoint: OutPoint,
    /// Stake amount in base units.
    pub amount: i64,
    /// Height of the block that accepted the stake.
    ///
    /// Survives updates: an updated claim keeps the acceptance height of
    /// the output it replaced so its activation clock does not reset.
    pub accepted_height: i32,
    /// First height at which the stake participates in bidding.
    pub active_height: i32,
    /// Current lifecycle status.
    pub status: ClaimStatus,
}

/// Supports reuse the claim record; `claim_id` names the supported claim.
pub type Support = Claim;

impl Claim {
    /// Height at which this stake expires and is removed from its node.
    ///
    /// The expiration term depends on when the stake was accepted: stakes
    /// accepted before the extended-expiration fork use the original term,
    /// later ones the extended term.
    pub fn expires_at(&self, params: &Params) -> i32 {
        if self.accepted_height < params.extended_claim_expiration_fork_height {
            self.accepted_height + params.original_claim_expiration
        } else {
            self.accepted_height + params.extended_claim_expiration
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClaimId, OutPoint, TxId};

    fn claim_accepted_at(height: i32) -> Claim {
        Claim {
            claim_id: ClaimId([1u8; 20]),
            outpoint: OutPoint::new(TxId([2u8; 32]), 0),
            amount: 10,
            accepted_height: height,
            active_height: height,
            status: ClaimStatus::Accepted,
        }
    }

    #[test]
    fn expiration_term_switches_at_the_fork() {
        let mut params = Params::regtest();
        params.original_claim_expiration = 500;
        params.extended_claim_expiration = 600;
        params.extended_claim_expiration_fork_height = 800;

        let before = claim_accepted_at(799);
        assert_eq!(before.expires_at(&params), 799 + 500);

        let at = claim_accepted_at(800);
        assert_eq!(at.expires_at(&params), 800 + 600);
    }
}

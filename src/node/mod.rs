//! Node state machine.
//!
//! A [`Node`] is the derived state of one name at one height: its claims
//! and supports, the controlling claim, and the height at which the
//! current controller took over. Nodes are never stored; they are rebuilt
//! by replaying the name's ordered change history up to a target height.
//!
//! Replay interleaves two clocks. Changes land at their block heights;
//! between changes, scheduled events (activations, expirations) fire at
//! their own heights, and the bid is re-evaluated at every height where
//! anything happened. A takeover activates every pending stake on the
//! node before the new controller is recorded.

pub mod manager;
pub mod repo;

use crate::change::{Change, ChangeType};
use crate::error::{Error, Result};
use crate::logging::warn_once;
use crate::param::Params;
use crate::types::{Claim, ClaimId, ClaimStatus, Support};

/// Derived state of one name at one height.
#[derive(Clone, Debug, Default)]
pub struct Node {
    claims: Vec<Claim>,
    supports: Vec<Support>,
    best_claim: Option<ClaimId>,
    taken_over_at: i32,
}

impl Node {
    /// Creates an empty node.
    pub fn new() -> Self {
        Node::default()
    }

    /// Rebuilds a node by replaying `changes` (ordered by height) up to
    /// and including `height`. Returns `None` when no change falls inside
    /// that range.
    pub fn from_changes(changes: &[Change], height: i32, params: &Params) -> Result<Option<Node>> {
        let end = changes
            .iter()
            .position(|c| c.height > height)
            .unwrap_or(changes.len());
        let changes = &changes[..end];
        if changes.is_empty() {
            return Ok(None);
        }

        let mut node = Node::new();
        let mut previous = changes[0].height;
        let mut i = 0;
        while i < changes.len() {
            let h = changes[i].height;
            if h < previous {
                return Err(Error::InvalidChange(format!(
                    "change history out of order: height {h} after {previous}"
                )));
            }
            previous = h;

            // Settle everything scheduled strictly before this block.
            node.catch_up(h - 1, params);

            while i < changes.len() && changes[i].height == h {
                let delay = node.delay_for(&changes[i], params);
                node.apply_change(&changes[i], delay);
                i += 1;
            }

            let (_, removed) = node.handle_expired_and_activated(h, params);
            node.update_takeover(h, params, removed > 0);
        }

        node.catch_up(height, params);
        Ok(Some(node))
    }

    /// The claim currently controlling the name, if any.
    pub fn controlling(&self) -> Option<&Claim> {
        let id = self.best_claim?;
        self.claims
            .iter()
            .find(|c| c.claim_id == id && c.status == ClaimStatus::Activated)
    }

    /// Height at which the current controller displaced its predecessor.
    pub fn takeover_height(&self) -> i32 {
        self.taken_over_at
    }

    /// All claims on the node, active or pending.
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// All supports on the node, active or pending.
    pub fn supports(&self) -> &[Support] {
        &self.supports
    }

    /// A claim's own amount plus the amounts of its active supports.
    pub fn effective_amount_of(&self, claim: &Claim) -> i64 {
        if claim.status != ClaimStatus::Activated {
            return 0;
        }
        let mut amount = claim.amount;
        for s in &self.supports {
            if s.status == ClaimStatus::Activated && s.claim_id == claim.claim_id {
                amount += s.amount;
            }
        }
        amount
    }

    /// Active supports attached to `id`.
    pub fn active_supports_of(&self, id: &ClaimId) -> Vec<&Support> {
        self.supports
            .iter()
            .filter(|s| s.status == ClaimStatus::Activated && s.claim_id == *id)
            .collect()
    }

    /// Smallest future height at which this node's state changes, or 0
    /// when nothing remains scheduled.
    pub fn next_update_height(&self, params: &Params) -> i32 {
        let mut next = i32::MAX;
        for c in self.claims.iter().chain(self.supports.iter()) {
            let expires = c.expires_at(params);
            if expires < next {
                next = expires;
            }
            if c.status == ClaimStatus::Accepted && c.active_height < next {
                next = c.active_height;
            }
        }
        if next == i32::MAX {
            0
        } else {
            next
        }
    }

    /// Activation delay for `chg` given the node's current state: zero
    /// when there is no activated controller or the change extends the
    /// controller's own claim, otherwise proportional to the controller's
    /// tenure, capped.
    fn delay_for(&self, chg: &Change, params: &Params) -> i32 {
        if !chg.is_add() || chg.active_height > 0 {
            return 0;
        }
        if self.controlling().is_none() {
            return 0;
        }
        if self.best_claim == Some(chg.claim_id) {
            return 0;
        }
        let delay = (chg.height - self.taken_over_at) / params.activation_delay_divisor;
        delay.min(params.max_activation_delay)
    }

    /// Applies one change. `delay` is the activation delay computed
    /// against the node's state before the change.
    fn apply_change(&mut self, chg: &Change, delay: i32) {
        match chg.change_type {
            ChangeType::AddClaim => {
                if self.claims.iter().any(|c| c.outpoint == chg.outpoint) {
                    return; // replayed duplicate
                }
                self.claims.push(new_stake(chg, delay));
            }
            ChangeType::SpendClaim => {
                match self.claims.iter_mut().find(|c| c.outpoint == chg.outpoint) {
                    Some(c) => c.status = ClaimStatus::Deactivated,
                    None => warn_once("spend of a claim that is not present"),
                }
            }
            ChangeType::UpdateClaim => {
                let found = self.claims.iter_mut().find(|c| {
                    c.claim_id == chg.claim_id && c.status == ClaimStatus::Deactivated
                });
                match found {
                    Some(c) => {
                        c.outpoint = chg.outpoint;
                        c.amount = chg.amount;
                        c.status = ClaimStatus::Accepted;
                        // The activation clock is inherited: a claim that
                        // was already active re-activates in this block, a
                        // still-pending one keeps its scheduled height.
                        if c.active_height <= chg.height {
                            c.active_height = chg.height;
                        }
                    }
                    None => warn_once("update of a claim that was not spent"),
                }
            }
            ChangeType::AddSupport => {
                if self.supports.iter().any(|s| s.outpoint == chg.outpoint) {
                    return;
                }
                self.supports.push(new_stake(chg, delay));
            }
            ChangeType::SpendSupport => {
                match self
                    .supports
                    .iter_mut()
                    .find(|s| s.outpoint == chg.outpoint)
                {
                    Some(s) => s.status = ClaimStatus::Deactivated,
                    None => warn_once("spend of a support that is not present"),
                }
            }
        }
    }

    /// Fires every scheduled event up to and including `to`, each at its
    /// own height.
    fn catch_up(&mut self, to: i32, params: &Params) {
        let mut previous = i32::MIN;
        loop {
            let next = self.next_update_height(params);
            if next == 0 || next > to || next <= previous {
                break;
            }
            previous = next;
            let (_, removed) = self.handle_expired_and_activated(next, params);
            self.update_takeover(next, params, removed > 0);
        }
    }

    /// Activates due stakes and drops expired or deactivated ones.
    /// Returns `(activated, removed)` counts.
    fn handle_expired_and_activated(&mut self, height: i32, params: &Params) -> (usize, usize) {
        let mut activated = 0;
        let mut removed = 0;
        for items in [&mut self.claims, &mut self.supports] {
            let mut i = 0;
            while i < items.len() {
                let c = &mut items[i];
                if c.status == ClaimStatus::Accepted && c.active_height <= height {
                    c.status = ClaimStatus::Activated;
                    activated += 1;
                }
                if c.status == ClaimStatus::Deactivated || c.expires_at(params) <= height {
                    items.swap_remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        }
        (activated, removed)
    }

    /// Activates every pending stake, clamping its activation height to
    /// `height`. Returns the number of stakes activated.
    fn activate_all(&mut self, height: i32) -> usize {
        let mut count = 0;
        for c in self.claims.iter_mut().chain(self.supports.iter_mut()) {
            if c.status == ClaimStatus::Accepted {
                if c.active_height > height {
                    c.active_height = height;
                }
                c.status = ClaimStatus::Activated;
                count += 1;
            }
        }
        count
    }

    /// Highest-bidding active claim: greatest effective amount, ties to
    /// the earlier acceptance, then the smaller outpoint.
    fn find_best_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, c) in self.claims.iter().enumerate() {
            if c.status != ClaimStatus::Activated {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(b) => {
                    if self.outbids(c, &self.claims[b]) {
                        Some(i)
                    } else {
                        Some(b)
                    }
                }
            };
        }
        best
    }

    fn outbids(&self, challenger: &Claim, incumbent: &Claim) -> bool {
        let ca = self.effective_amount_of(challenger);
        let ia = self.effective_amount_of(incumbent);
        if ca != ia {
            return ca > ia;
        }
        if challenger.accepted_height != incumbent.accepted_height {
            return challenger.accepted_height < incumbent.accepted_height;
        }
        challenger.outpoint < incumbent.outpoint
    }

    /// Re-evaluates the bid at `height` and records a takeover when the
    /// winner changed.
    fn update_takeover(&mut self, height: i32, params: &Params, removed: bool) {
        let mut candidate = self.find_best_index();

        if candidate.is_none() && self.best_claim.is_none() {
            return;
        }

        let has_current_winner = self.controlling().is_some();
        let candidate_id = candidate.map(|i| self.claims[i].claim_id);
        let mut takeover = candidate.is_none() || !has_current_winner || self.best_claim != candidate_id;

        if takeover {
            if self.activate_all(height) > 0 {
                candidate = self.find_best_index();
            }
        } else if removed && height < params.max_removal_workaround_height {
            // The old chain software activated pending stakes on any
            // removal, takeover or not; replayed history must agree.
            if self.activate_all(height) > 0 {
                let refreshed = self.find_best_index();
                let refreshed_id = refreshed.map(|i| self.claims[i].claim_id);
                if refreshed_id != candidate_id {
                    takeover = true;
                    candidate = refreshed;
                }
            }
        }

        if takeover {
            self.taken_over_at = height;
            self.best_claim = candidate.map(|i| self.claims[i].claim_id);
        }
    }
}

fn new_stake(chg: &Change, delay: i32) -> Claim {
    let accepted = if chg.visible_height > 0 {
        chg.visible_height
    } else {
        chg.height
    };
    let active = if chg.active_height > 0 {
        chg.active_height
    } else {
        chg.height + delay
    };
    Claim {
        claim_id: chg.claim_id,
        outpoint: chg.outpoint,
        amount: chg.amount,
        accepted_height: accepted,
        active_height: active,
        status: ClaimStatus::Accepted,
    }
}

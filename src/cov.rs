//! Branch coverage bookkeeping.
//!
//! Decides which branches are worth solving: a negated branch is
//! interesting exactly when its (pc, id, context, direction) tuple has
//! never been observed. Tracking is a virgin bitmap over hashed tuples,
//! AFL-style; collisions lose a little precision and nothing else.

use std::hash::{BuildHasher, Hasher};
use std::rc::Rc;

use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};

/// One observed (or hypothetical) branch outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchContext {
    pub addr: u32,
    pub id: u32,
    pub direction: bool,
    pub context: u32,
    pub is_loop: bool,
    pub is_counted: bool,
}

impl BranchContext {
    /// The same branch taken the other way.
    pub fn negated(&self) -> BranchContext {
        BranchContext {
            direction: !self.direction,
            ..*self
        }
    }
}

pub trait CovManager {
    /// Records a taken branch and hands back its context.
    fn add_branch(
        &mut self,
        addr: u32,
        id: u32,
        direction: bool,
        context: u32,
        is_loop: bool,
        is_counted: bool,
    ) -> Rc<BranchContext>;

    /// Whether reaching this branch outcome would cover new ground.
    fn is_branch_interesting(&self, ctx: &BranchContext) -> bool;
}

/// Same map geometry as an AFL coverage map of 65536 * 16 entries.
const VIRGIN_BITS: usize = 1 << 20;

pub struct EdgeCovManager {
    virgin: BitVec,
    hasher: ahash::RandomState,
}

impl EdgeCovManager {
    pub fn new() -> Self {
        EdgeCovManager {
            virgin: BitVec::repeat(false, VIRGIN_BITS),
            hasher: ahash::RandomState::with_seeds(0, 0, 0, 0),
        }
    }

    fn slot(&self, ctx: &BranchContext) -> usize {
        let mut hasher = self.hasher.build_hasher();
        let mut buf = [0u8; 13];
        buf[0..4].copy_from_slice(&ctx.addr.to_le_bytes());
        buf[4..8].copy_from_slice(&ctx.id.to_le_bytes());
        buf[8..12].copy_from_slice(&ctx.context.to_le_bytes());
        buf[12] = ctx.direction as u8;
        hasher.write(&buf);
        (hasher.finish() as usize) % VIRGIN_BITS
    }
}

impl Default for EdgeCovManager {
    fn default() -> Self {
        EdgeCovManager::new()
    }
}

impl CovManager for EdgeCovManager {
    fn add_branch(
        &mut self,
        addr: u32,
        id: u32,
        direction: bool,
        context: u32,
        is_loop: bool,
        is_counted: bool,
    ) -> Rc<BranchContext> {
        let ctx = BranchContext {
            addr,
            id,
            direction,
            context,
            is_loop,
            is_counted,
        };
        let slot = self.slot(&ctx);
        self.virgin.set(slot, true);
        Rc::new(ctx)
    }

    fn is_branch_interesting(&self, ctx: &BranchContext) -> bool {
        !self.virgin[self.slot(ctx)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_negation_is_interesting() {
        let mut cov = EdgeCovManager::new();
        let ctx = cov.add_branch(0x401000, 1, true, 0xcafe, false, false);
        assert!(cov.is_branch_interesting(&ctx.negated()));
        assert!(!cov.is_branch_interesting(&ctx));
    }

    #[test]
    fn both_directions_seen_means_nothing_new() {
        let mut cov = EdgeCovManager::new();
        let ctx = cov.add_branch(0x401000, 1, true, 0xcafe, false, false);
        cov.add_branch(0x401000, 1, false, 0xcafe, false, false);
        assert!(!cov.is_branch_interesting(&ctx.negated()));
        assert!(!cov.is_branch_interesting(&ctx));
    }

    #[test]
    fn distinct_contexts_are_distinct_edges() {
        let mut cov = EdgeCovManager::new();
        cov.add_branch(0x401000, 1, true, 1, false, false);
        let other = BranchContext {
            addr: 0x401000,
            id: 1,
            direction: true,
            context: 2,
            ..BranchContext::default()
        };
        assert!(cov.is_branch_interesting(&other));
    }
}

//! Balancing tree derived from rank numbers alone.
//!
//! Every rank computes its parent and children from `(rank, size)` with
//! binary lifting, so no topology messages are ever exchanged. For a group
//! of 8 ranks the tree is:
//!
//! ```text
//!            0
//!        /   |   \
//!       4    2    1
//!      / \   |
//!     6   5  3
//!     |
//!     7
//! ```
//!
//! A rank's parent clears its lowest set bit; the depth of any rank is its
//! popcount, hence at most `ceil(log2(size))` hops from the root.

use volgrid_core::Rank;

use crate::error::{BalanceError, BalanceResult};

/// Position of one rank in the balancing tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancingTree {
    rank: Rank,
    size: usize,
}

impl BalancingTree {
    pub fn new(rank: Rank, size: usize) -> BalanceResult<Self> {
        if rank >= size {
            return Err(BalanceError::RankOutOfRange { rank, size });
        }
        Ok(Self { rank, size })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn parent(&self) -> Rank {
        parent_of(self.rank)
    }

    pub fn children(&self) -> Vec<Rank> {
        children_of(self.rank, self.size)
    }

    pub fn is_root(&self) -> bool {
        is_root(self.rank)
    }

    pub fn is_leaf(&self) -> bool {
        is_leaf(self.rank)
    }
}

/// Parent of `rank`. The root is its own parent.
pub fn parent_of(rank: Rank) -> Rank {
    if rank == 0 {
        return 0;
    }
    let mut exp: Rank = 2;
    loop {
        if rank % exp == exp / 2 {
            return rank - exp / 2;
        }
        exp *= 2;
    }
}

/// Children of `rank` in a group of `size`, farthest subtree first.
pub fn children_of(rank: Rank, size: usize) -> Vec<Rank> {
    let mut children = Vec::new();
    let mut exp = size.max(1).next_power_of_two();
    while exp >= 2 {
        if rank % exp == 0 {
            let child = rank + exp / 2;
            if child < size {
                children.push(child);
            }
        }
        exp /= 2;
    }
    children
}

pub fn is_root(rank: Rank) -> bool {
    rank == 0
}

/// Odd ranks have no valid child offset. An even rank may still end up
/// childless when the group size is not a power of two.
pub fn is_leaf(rank: Rank) -> bool {
    rank % 2 == 1
}

/// Number of hops from `rank` up to the root.
pub fn depth_of(rank: Rank) -> u32 {
    rank.count_ones()
}

//! Chain tip tracking and reorg detection

use crate::types::Block;
use std::collections::BTreeMap;

/// How an incoming block relates to the accepted chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// Next block on the accepted tip (or the first block seen)
    Extends,
    /// Same height and hash as an accepted block
    Duplicate,
    /// Replaces accepted blocks from `fork_height` up to `old_tip`
    Reorg { fork_height: u64, old_tip: u64, depth: u64 },
    /// Heights `from..=to` are missing before this block can be placed
    Gap { from: u64, to: u64 },
    /// Older than any height still tracked; cannot be placed
    BelowHorizon { height: u64 },
    /// Late block for a height that was skipped; it links to the accepted
    /// blocks on both sides
    Fill { height: u64 },
}

#[derive(Debug, Clone)]
struct AcceptedBlock {
    hash: String,
    parent_hash: String,
}

/// Bounded map of accepted height → block hash
#[derive(Debug, Clone)]
pub struct ChainTracker {
    max_tracked: usize,
    chain: BTreeMap<u64, AcceptedBlock>,
}

impl ChainTracker {
    pub fn new(max_tracked: usize) -> Self {
        Self {
            max_tracked: max_tracked.max(2),
            chain: BTreeMap::new(),
        }
    }

    pub fn tip(&self) -> Option<(u64, &str)> {
        self.chain
            .iter()
            .next_back()
            .map(|(height, b)| (*height, b.hash.as_str()))
    }

    pub fn hash_at(&self, height: u64) -> Option<&str> {
        self.chain.get(&height).map(|b| b.hash.as_str())
    }

    pub fn oldest_height(&self) -> Option<u64> {
        self.chain.keys().next().copied()
    }

    /// Accepted (height, hash) pairs above `height`, lowest first
    pub fn accepted_above(&self, height: u64) -> Vec<(u64, String)> {
        self.chain
            .range(height.saturating_add(1)..)
            .map(|(h, b)| (*h, b.hash.clone()))
            .collect()
    }

    /// A skipped height whose accepted neighbours agree with `block`
    fn fills_hole(&self, block: &Block) -> bool {
        if self.chain.contains_key(&block.height) {
            return false;
        }
        let parent_ok = self
            .chain
            .get(&(block.height - 1))
            .map_or(true, |parent| parent.hash == block.parent_hash);
        let child_ok = self
            .chain
            .get(&(block.height + 1))
            .map_or(true, |child| child.parent_hash == block.hash);
        parent_ok && child_ok
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn classify(&self, block: &Block) -> ChainEvent {
        let Some((tip_height, tip_hash)) = self.tip() else {
            return ChainEvent::Extends;
        };

        if self.hash_at(block.height) == Some(block.hash.as_str()) {
            return ChainEvent::Duplicate;
        }

        if block.height > tip_height + 1 {
            return ChainEvent::Gap {
                from: tip_height + 1,
                to: block.height - 1,
            };
        }

        if block.height == tip_height + 1 && block.parent_hash == tip_hash {
            return ChainEvent::Extends;
        }

        let oldest = self.oldest_height().unwrap_or(tip_height);
        if block.height <= oldest {
            return ChainEvent::BelowHorizon { height: block.height };
        }

        if self.fills_hole(block) {
            return ChainEvent::Fill { height: block.height };
        }

        // Competing block at or below the tip: its parent must sit on the
        // accepted chain
        match self.hash_at(block.height - 1) {
            Some(parent) if parent == block.parent_hash && block.height <= tip_height => {
                ChainEvent::Reorg {
                    fork_height: block.height,
                    old_tip: tip_height,
                    depth: tip_height - block.height + 1,
                }
            }
            // Branch ancestor not seen yet
            _ => ChainEvent::Gap {
                from: block.height - 1,
                to: block.height - 1,
            },
        }
    }

    /// Record `block` as the accepted block at its height, dropping
    /// anything above it
    pub fn accept(&mut self, block: &Block) {
        self.truncate_from(block.height + 1);
        self.chain.insert(
            block.height,
            AcceptedBlock {
                hash: block.hash.clone(),
                parent_hash: block.parent_hash.clone(),
            },
        );
        while self.chain.len() > self.max_tracked {
            self.chain.pop_first();
        }
    }

    /// Forget accepted blocks at `height` and above
    pub fn truncate_from(&mut self, height: u64) {
        self.chain.split_off(&height);
    }

    /// True when each tracked block's parent hash matches its predecessor
    pub fn is_consistent(&self) -> bool {
        self.chain
            .iter()
            .zip(self.chain.iter().skip(1))
            .all(|((h1, a), (h2, b))| *h2 != h1 + 1 || b.parent_hash == a.hash)
    }
}

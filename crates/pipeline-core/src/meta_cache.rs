//! BlockMetadataCache (C1): an ephemeral `BlockId -> BlockMeta` map written
//! once per successful block fetch and read by notifications. Read-mostly,
//! so a short-lived `std::sync::Mutex` (never held across an `.await`) is
//! simpler and cheaper here than an actor mailbox (§4.1).

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use ethp_types::{BlockId, BlockMeta, BlockMetaView};

/// Open Question resolution (§9): left at "a few thousand" entries; fixed
/// here at 4096 with LRU eviction.
const CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct BlockMetadataCache {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    map: HashMap<BlockId, BlockMeta>,
    order: VecDeque<BlockId>,
}

impl Default for BlockMetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockMetadataCache {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner { map: HashMap::new(), order: VecDeque::new() })) }
    }

    pub fn insert(&self, block: BlockId, meta: BlockMeta) {
        let mut inner = self.inner.lock().expect("meta cache lock poisoned");
        if inner.map.insert(block, meta).is_some() {
            inner.order.retain(|b| *b != block);
        }
        inner.order.push_back(block);

        if inner.order.len() > CAPACITY {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            }
        }
    }

    /// Never errors: a miss degrades gracefully to [`BlockMetaView::Unknown`]
    /// (§4.1, §4.7 invariant on lookup misses).
    pub fn get(&self, block: BlockId) -> BlockMetaView {
        let inner = self.inner.lock().expect("meta cache lock poisoned");
        match inner.map.get(&block) {
            Some(meta) => BlockMetaView::Known(*meta),
            None => BlockMetaView::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_formats_as_unknown() {
        let cache = BlockMetadataCache::new();
        assert_eq!(cache.get(1).to_string(), "unknown");
    }

    #[test]
    fn hit_returns_stored_meta() {
        let cache = BlockMetadataCache::new();
        cache.insert(1, BlockMeta { gas_used: 21_000, tx_count: 3 });
        assert!(matches!(cache.get(1), BlockMetaView::Known(_)));
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let cache = BlockMetadataCache::new();
        for i in 0..CAPACITY as u64 + 1 {
            cache.insert(i, BlockMeta { gas_used: i, tx_count: 0 });
        }
        assert!(matches!(cache.get(0), BlockMetaView::Unknown));
        assert!(matches!(cache.get(CAPACITY as u64), BlockMetaView::Known(_)));
    }
}

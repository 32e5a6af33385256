//! The insert skip-list: where new keys for a leaf slot live until the
//! next reconciliation rewrites the page (spec §4.4 "traverse the insert
//! skip-list for that slot"). One instance hangs off the space between
//! every pair of adjacent on-page slots (and one before the first, one
//! after the last).
//!
//! Structural changes to a page are already serialized under the page's
//! own spin lock (spec §4.4's "serialization function under the
//! insert-head's publish-order lock"), so — as with [`crate::block::extent`]
//! — the concurrent multi-level skip list described in the original is
//! realized here as an ordered map behind one `RwLock`: same asymptotic
//! behavior for a single writer at a time, far less unsafe surface.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::txn::update::UpdateChain;

#[derive(Default)]
pub struct InsertList {
    inner: RwLock<BTreeMap<Vec<u8>, UpdateChain>>,
}

impl InsertList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<UpdateChain> {
        self.inner.read().unwrap().get(key).cloned()
    }

    /// Insert a new key with an empty update chain, returning the chain so
    /// the caller can push the first update onto it. No-op (returns the
    /// existing chain) if the key is already present.
    pub fn insert(&self, key: Vec<u8>) -> UpdateChain {
        let mut inner = self.inner.write().unwrap();
        inner.entry(key).or_insert_with(UpdateChain::new).clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys in ascending order, used by reconciliation to merge the
    /// insert list into the rebuilt page image.
    pub fn iter_sorted(&self) -> Vec<(Vec<u8>, UpdateChain)> {
        self.inner.read().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

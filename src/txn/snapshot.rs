//! Transaction snapshots and visibility (spec §4.5). A snapshot fixes
//! which other transactions' writes a reader may see; optional timestamps
//! layer on top of id-based visibility.

/// `(snapshot_min, snapshot_max, concurrent ids)` captured at transaction
/// begin, plus an optional read timestamp.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub snapshot_min: u64,
    pub snapshot_max: u64,
    pub concurrent: Vec<u64>,
    pub read_ts: Option<u64>,
}

impl Snapshot {
    pub fn new(snapshot_min: u64, snapshot_max: u64, concurrent: Vec<u64>) -> Self {
        Self {
            snapshot_min,
            snapshot_max,
            concurrent,
            read_ts: None,
        }
    }

    pub fn with_read_timestamp(mut self, read_ts: u64) -> Self {
        self.read_ts = Some(read_ts);
        self
    }

    /// Id-based visibility (spec §4.5): `id >= snapshot_max` invisible;
    /// `id < snapshot_min` visible; otherwise visible iff not concurrent.
    /// When a read timestamp is set, visibility additionally requires
    /// `commit_ts <= read_ts`.
    pub fn is_visible(&self, txn_id: u64, commit_ts: u64) -> bool {
        let id_visible = if txn_id >= self.snapshot_max {
            false
        } else if txn_id < self.snapshot_min {
            true
        } else {
            !self.concurrent.contains(&txn_id)
        };
        if !id_visible {
            return false;
        }
        match self.read_ts {
            Some(read_ts) => commit_ts <= read_ts,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_at_or_above_snapshot_max_are_invisible() {
        let s = Snapshot::new(5, 10, Vec::new());
        assert!(!s.is_visible(10, 0));
        assert!(!s.is_visible(11, 0));
    }

    #[test]
    fn ids_below_snapshot_min_are_always_visible() {
        let s = Snapshot::new(5, 10, vec![3]);
        assert!(s.is_visible(3, 0));
    }

    #[test]
    fn ids_in_range_depend_on_concurrent_set() {
        let s = Snapshot::new(5, 10, vec![7]);
        assert!(!s.is_visible(7, 0));
        assert!(s.is_visible(8, 0));
    }

    #[test]
    fn read_timestamp_additionally_bounds_commit_ts() {
        let s = Snapshot::new(0, 100, Vec::new()).with_read_timestamp(50);
        assert!(s.is_visible(1, 50));
        assert!(!s.is_visible(1, 51));
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

lazy_static! {
    static ref STATS: Stats = Stats::new();
}

/// Process wide hit/miss counters
#[derive(Debug)]
pub struct Stats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct LoadedStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl Stats {
    fn new() -> Stats {
        Stats {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn cache_hit() {
        STATS.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_miss() {
        STATS.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load() -> LoadedStats {
        LoadedStats {
            cache_hits: STATS.cache_hits.load(Ordering::Relaxed),
            cache_misses: STATS.cache_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_grow() {
        let before = Stats::load();

        Stats::cache_hit();
        Stats::cache_miss();
        Stats::cache_miss();

        let after = Stats::load();
        assert!(after.cache_hits >= before.cache_hits + 1);
        assert!(after.cache_misses >= before.cache_misses + 2);
    }
}

//! Victim selection for capacity eviction.

use crate::entry::{CacheEntry, CacheKey};
use quotaguard_core::EvictionPolicy;

/// Pick the entry to evict under `policy`.
///
/// LRU orders by last access; LFU by access count, falling back to last
/// access among equally frequent entries.
pub(crate) fn select_victim<'a, I>(policy: EvictionPolicy, entries: I) -> Option<&'a CacheKey>
where
    I: IntoIterator<Item = (&'a CacheKey, &'a CacheEntry)>,
{
    let entries = entries.into_iter();
    match policy {
        EvictionPolicy::Lru => entries
            .min_by_key(|(_, entry)| (entry.last_accessed_at, entry.access_seq))
            .map(|(key, _)| key),
        EvictionPolicy::Lfu => entries
            .min_by_key(|(_, entry)| {
                (entry.access_count, entry.last_accessed_at, entry.access_seq)
            })
            .map(|(key, _)| key),
    }
}

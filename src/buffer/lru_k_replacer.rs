use std::collections::{HashMap, VecDeque};

use crate::common::{PageId, Timestamp};

/// Access history of one cached page
#[derive(Debug)]
struct PageAccessInfo {
    /// Access timestamps, most recent at back, at most k of them
    history: VecDeque<Timestamp>,
    is_evictable: bool,
}

impl PageAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Backward k-distance, or None (+inf) with fewer than k accesses
    fn k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[self.history.len() - k])
        }
    }

    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

/// LRU-K eviction order over cached pages.
///
/// The victim is the evictable page with the largest backward k-distance,
/// i.e. the longest time since its kth most recent access. Pages with fewer
/// than k accesses have +inf distance; among those the one touched earliest
/// goes first, which degrades to plain LRU when k = 1.
///
/// The buffer pool keeps dirty pages non-evictable. The replacer is not
/// synchronized on its own; it lives inside the pool's critical section.
#[derive(Debug)]
pub struct LruKReplacer {
    k: usize,
    current_timestamp: Timestamp,
    pages: HashMap<PageId, PageAccessInfo>,
    num_evictable: usize,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            current_timestamp: 0,
            pages: HashMap::new(),
            num_evictable: 0,
        }
    }

    /// Picks and forgets the page with the largest backward k-distance.
    /// Returns None if no page is evictable.
    pub fn evict(&mut self) -> Option<PageId> {
        if self.num_evictable == 0 {
            return None;
        }

        let now = self.current_timestamp;
        let mut victim: Option<PageId> = None;
        let mut victim_k_dist: Option<Timestamp> = None;
        let mut victim_earliest_ts: Option<Timestamp> = None;

        for (&page_id, info) in self.pages.iter() {
            if !info.is_evictable {
                continue;
            }

            let k_dist = info.k_distance(now, self.k);
            let earliest_ts = info.earliest_timestamp();

            let should_replace = match (victim_k_dist, k_dist) {
                (None, Some(_)) => false,
                (Some(_), None) => true,
                (None, None) => match (victim_earliest_ts, earliest_ts) {
                    (Some(v_ts), Some(c_ts)) => c_ts < v_ts,
                    (None, Some(_)) => true,
                    _ => false,
                },
                (Some(v_dist), Some(c_dist)) => c_dist > v_dist,
            };

            if victim.is_none() || should_replace {
                victim = Some(page_id);
                victim_k_dist = k_dist;
                victim_earliest_ts = earliest_ts;
            }
        }

        if let Some(page_id) = victim {
            self.pages.remove(&page_id);
            self.num_evictable -= 1;
        }

        victim
    }

    /// Records an access to the page at the current timestamp.
    pub fn record_access(&mut self, page_id: PageId) {
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;

        self.pages
            .entry(page_id)
            .or_insert_with(PageAccessInfo::new)
            .record_access(timestamp, self.k);
    }

    /// Sets whether a tracked page may be chosen as a victim.
    pub fn set_evictable(&mut self, page_id: PageId, is_evictable: bool) {
        if let Some(info) = self.pages.get_mut(&page_id) {
            if info.is_evictable != is_evictable {
                if is_evictable {
                    self.num_evictable += 1;
                } else {
                    self.num_evictable -= 1;
                }
                info.is_evictable = is_evictable;
            }
        } else if is_evictable {
            let mut info = PageAccessInfo::new();
            info.is_evictable = true;
            self.pages.insert(page_id, info);
            self.num_evictable += 1;
        }
    }

    /// Stops tracking a page, e.g. when it is discarded from the pool.
    pub fn remove(&mut self, page_id: PageId) {
        if let Some(info) = self.pages.remove(&page_id) {
            if info.is_evictable {
                self.num_evictable -= 1;
            }
        }
    }

    /// Returns the number of evictable pages.
    pub fn size(&self) -> usize {
        self.num_evictable
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

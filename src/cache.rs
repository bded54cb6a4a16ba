//! In-memory page cache: an ordered map from pgno to cached page plus an
//! LRU recency list, bounded by a configurable page count.
//!
//! Single-threaded by construction (see `Db`'s `RefCell`-based interior
//! mutability); reference counts are plain integers rather than atomics.

use std::collections::{BTreeMap, VecDeque};

use crate::config::Pgno;
use crate::page::Page;

/// One cached page plus the bookkeeping the tree descent/cursor code
/// leans on: its parent link (valid only for the duration of the current
/// operation), its effective prefix, and whether it has been modified in
/// the current writer transaction.
pub struct CacheEntry {
    pub page: Page,
    pub parent: Option<Pgno>,
    pub parent_index: usize,
    pub prefix: Vec<u8>,
    pub dirty: bool,
    refs: i32,
}

impl CacheEntry {
    fn new(page: Page) -> CacheEntry {
        CacheEntry {
            page,
            parent: None,
            parent_index: 0,
            prefix: Vec::new(),
            dirty: false,
            refs: 0,
        }
    }
}

pub struct Cache {
    entries: BTreeMap<Pgno, CacheEntry>,
    /// Recency order, LRU at the front, MRU at the back. May contain
    /// stale entries for pgnos no longer present; `prune` skips those.
    order: VecDeque<Pgno>,
    max_cache: usize,
}

impl Cache {
    pub fn new(max_cache: usize) -> Cache {
        Cache {
            entries: BTreeMap::new(),
            order: VecDeque::new(),
            max_cache,
        }
    }

    pub fn set_max_cache(&mut self, max_cache: usize) {
        self.max_cache = max_cache;
        self.prune();
    }

    pub fn get(&mut self, pgno: Pgno) -> Option<&CacheEntry> {
        if self.entries.contains_key(&pgno) {
            self.touch_mru(pgno);
            self.entries.get(&pgno)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, pgno: Pgno) -> Option<&mut CacheEntry> {
        if self.entries.contains_key(&pgno) {
            self.touch_mru(pgno);
            self.entries.get_mut(&pgno)
        } else {
            None
        }
    }

    pub fn contains(&self, pgno: Pgno) -> bool {
        self.entries.contains_key(&pgno)
    }

    /// Read without disturbing recency order, for callers (like commit's
    /// writeback loop) that don't want a cache scan's own bookkeeping to
    /// count as a "use."
    pub fn peek(&self, pgno: Pgno) -> Option<&CacheEntry> {
        self.entries.get(&pgno)
    }

    /// Insert a freshly read or newly allocated page, evicting if the
    /// cache is over its bound and room can be made.
    pub fn insert(&mut self, pgno: Pgno, page: Page) -> &mut CacheEntry {
        self.entries.insert(pgno, CacheEntry::new(page));
        self.order.push_back(pgno);
        self.prune();
        self.entries.get_mut(&pgno).unwrap()
    }

    pub fn remove(&mut self, pgno: Pgno) -> Option<CacheEntry> {
        self.entries.remove(&pgno)
    }

    pub fn bump_ref(&mut self, pgno: Pgno) {
        if let Some(e) = self.entries.get_mut(&pgno) {
            e.refs += 1;
        }
    }

    pub fn release_ref(&mut self, pgno: Pgno) {
        if let Some(e) = self.entries.get_mut(&pgno) {
            debug_assert!(e.refs > 0);
            e.refs -= 1;
        }
    }

    pub fn mark_dirty(&mut self, pgno: Pgno) {
        if let Some(e) = self.entries.get_mut(&pgno) {
            e.dirty = true;
        }
    }

    /// All currently dirty pgnos, in the order they were first touched
    /// (insertion order of `order`, filtered).
    pub fn dirty_pgnos(&self) -> Vec<Pgno> {
        self.order
            .iter()
            .copied()
            .filter(|p| self.entries.get(p).map(|e| e.dirty).unwrap_or(false))
            .collect()
    }

    pub fn clear_dirty(&mut self, pgno: Pgno) {
        if let Some(e) = self.entries.get_mut(&pgno) {
            e.dirty = false;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn touch_mru(&mut self, pgno: Pgno) {
        if let Some(pos) = self.order.iter().position(|&p| p == pgno) {
            self.order.remove(pos);
        }
        self.order.push_back(pgno);
    }

    /// Evict from the LRU head while over `max_cache`, skipping any entry
    /// that is still referenced or dirty -- those are never evicted, so
    /// the cache may legitimately exceed its bound while a writer
    /// transaction or live cursor holds pages pinned.
    pub fn prune(&mut self) {
        while self.entries.len() > self.max_cache {
            let Some(&victim) = self.order.front() else {
                break;
            };
            let evictable = self
                .entries
                .get(&victim)
                .map(|e| !e.dirty && e.refs <= 0)
                .unwrap_or(true);
            if !evictable {
                // Can't evict the LRU head; nothing further back is a
                // better candidate under strict LRU order, so stop.
                break;
            }
            self.order.pop_front();
            self.entries.remove(&victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageFlags;

    fn page(pgno: Pgno) -> Page {
        let mut p = Page::zeroed(256);
        p.set_pgno(pgno);
        p.init_node_page(PageFlags::LEAF);
        p
    }

    #[test]
    fn evicts_lru_unreferenced_clean_entries() {
        let mut c = Cache::new(2);
        c.insert(1, page(1));
        c.insert(2, page(2));
        c.insert(3, page(3));
        assert_eq!(c.len(), 2);
        assert!(!c.contains(1));
        assert!(c.contains(2));
        assert!(c.contains(3));
    }

    #[test]
    fn dirty_and_referenced_entries_survive_over_bound() {
        let mut c = Cache::new(1);
        c.insert(1, page(1));
        c.mark_dirty(1);
        c.insert(2, page(2));
        assert!(c.contains(1));
        assert!(c.contains(2));
    }

    #[test]
    fn get_promotes_to_mru() {
        let mut c = Cache::new(2);
        c.insert(1, page(1));
        c.insert(2, page(2));
        c.get(1);
        c.insert(3, page(3));
        assert!(c.contains(1));
        assert!(!c.contains(2));
    }
}

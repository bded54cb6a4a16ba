//! Meta pages: the anchor for one committed revision of the tree.
//!
//! A meta page carries the root pgno, bookkeeping counters, and a SHA-256
//! hash over everything before the hash field. Meta pages are written
//! interleaved with ordinary data pages; on open the engine scans
//! backward from the end of the file for the newest page whose hash
//! still validates.

use std::fs::File;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::config::{MetaFlags, PageFlags, Pgno, INVALID_PGNO};
use crate::disk;
use crate::page::{Page, COMMON_HDR_SIZE};
use crate::{Error, Result};

const FLAGS_OFF: usize = COMMON_HDR_SIZE;
const ROOT_OFF: usize = FLAGS_OFF + 1;
const PREV_META_OFF: usize = ROOT_OFF + 4;
const CREATED_AT_OFF: usize = PREV_META_OFF + 4;
const BRANCH_PAGES_OFF: usize = CREATED_AT_OFF + 8;
const LEAF_PAGES_OFF: usize = BRANCH_PAGES_OFF + 4;
const OVERFLOW_PAGES_OFF: usize = LEAF_PAGES_OFF + 4;
const REVISIONS_OFF: usize = OVERFLOW_PAGES_OFF + 4;
const DEPTH_OFF: usize = REVISIONS_OFF + 8;
const ENTRIES_OFF: usize = DEPTH_OFF + 4;
const HASH_OFF: usize = ENTRIES_OFF + 8;
const HASH_LEN: usize = 32;

/// In-memory contents of one meta page.
#[derive(Clone, Copy, Debug)]
pub struct MetaPage {
    pub flags: MetaFlags,
    pub root: Pgno,
    pub prev_meta: Pgno,
    pub created_at: u64,
    pub branch_pages: u32,
    pub leaf_pages: u32,
    pub overflow_pages: u32,
    pub revisions: u64,
    pub depth: u32,
    pub entries: u64,
}

impl MetaPage {
    pub fn empty() -> MetaPage {
        MetaPage {
            flags: MetaFlags::empty(),
            root: INVALID_PGNO,
            prev_meta: INVALID_PGNO,
            created_at: now_unix(),
            branch_pages: 0,
            leaf_pages: 0,
            overflow_pages: 0,
            revisions: 0,
            depth: 0,
            entries: 0,
        }
    }

    pub fn is_empty_tree(&self) -> bool {
        self.root == INVALID_PGNO
    }

    pub fn encode(&self, pgno: Pgno, psize: u32) -> Page {
        let mut page = Page::zeroed(psize);
        page.set_pgno(pgno);
        page.set_flags(PageFlags::META);
        page.data[FLAGS_OFF] = self.flags.bits();
        page.set_u32(ROOT_OFF, self.root);
        page.set_u32(PREV_META_OFF, self.prev_meta);
        page.set_u64(CREATED_AT_OFF, self.created_at);
        page.set_u32(BRANCH_PAGES_OFF, self.branch_pages);
        page.set_u32(LEAF_PAGES_OFF, self.leaf_pages);
        page.set_u32(OVERFLOW_PAGES_OFF, self.overflow_pages);
        page.set_u64(REVISIONS_OFF, self.revisions);
        page.set_u32(DEPTH_OFF, self.depth);
        page.set_u64(ENTRIES_OFF, self.entries);
        let hash = hash_of(&page.data[..HASH_OFF]);
        page.data[HASH_OFF..HASH_OFF + HASH_LEN].copy_from_slice(&hash);
        page
    }

    /// Decode and verify a meta page's hash. Does not itself reject a
    /// tombstoned page -- callers decide what a tombstone means for them.
    pub fn decode(page: &Page) -> Result<MetaPage> {
        if !page.flags().contains(PageFlags::META) {
            return Err(Error::Corrupted(format!(
                "page {}: expected META flag",
                page.pgno()
            )));
        }
        let want = hash_of(&page.data[..HASH_OFF]);
        let got = &page.data[HASH_OFF..HASH_OFF + HASH_LEN];
        if want.as_slice() != got {
            return Err(Error::Corrupted(format!(
                "page {}: meta hash mismatch",
                page.pgno()
            )));
        }
        Ok(MetaPage {
            flags: MetaFlags::from_bits_truncate(page.data[FLAGS_OFF]),
            root: page.get_u32(ROOT_OFF),
            prev_meta: page.get_u32(PREV_META_OFF),
            created_at: page.get_u64(CREATED_AT_OFF),
            branch_pages: page.get_u32(BRANCH_PAGES_OFF),
            leaf_pages: page.get_u32(LEAF_PAGES_OFF),
            overflow_pages: page.get_u32(OVERFLOW_PAGES_OFF),
            revisions: page.get_u64(REVISIONS_OFF),
            depth: page.get_u32(DEPTH_OFF),
            entries: page.get_u64(ENTRIES_OFF),
        })
    }
}

fn hash_of(bytes: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Write a meta page at `pgno`. Callers fsync afterward themselves,
/// gated on `DbOptions::no_sync` (see `Txn::commit`).
pub fn write_meta(file: &File, pgno: Pgno, meta: &MetaPage, psize: u32) -> Result<()> {
    let page = meta.encode(pgno, psize);
    disk::write_pages(file, std::slice::from_ref(&page))
}

/// Scan backward from the end of the file for the newest valid meta page.
/// Returns `Ok(None)` if the file has only a header page (empty database).
/// Returns `Error::Stale` if the newest valid meta is tombstoned.
pub fn find_latest_meta(file: &File, psize: u32) -> Result<Option<(Pgno, MetaPage)>> {
    let (total_pages, _torn) = disk::file_len_pages(file, psize)?;
    if total_pages <= 1 {
        return Ok(None);
    }
    let mut pgno = (total_pages - 1) as Pgno;
    loop {
        match disk::read_page(file, pgno, psize) {
            Ok(page) if page.flags().contains(PageFlags::META) => match MetaPage::decode(&page) {
                Ok(meta) => {
                    if meta.flags.contains(MetaFlags::TOMBSTONE) {
                        return Err(Error::Stale);
                    }
                    return Ok(Some((pgno, meta)));
                }
                Err(_) => {
                    log::debug!("meta page {pgno} failed hash check, scanning earlier pages");
                }
            },
            _ => {}
        }
        if pgno <= 1 {
            return Ok(None);
        }
        pgno -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_round_trips_through_encode_decode() {
        let mut m = MetaPage::empty();
        m.root = 3;
        m.revisions = 7;
        m.entries = 42;
        let page = m.encode(5, 512);
        let decoded = MetaPage::decode(&page).unwrap();
        assert_eq!(decoded.root, 3);
        assert_eq!(decoded.revisions, 7);
        assert_eq!(decoded.entries, 42);
    }

    #[test]
    fn meta_detects_corruption() {
        let m = MetaPage::empty();
        let mut page = m.encode(5, 512);
        page.data[ROOT_OFF] ^= 0xFF;
        assert!(MetaPage::decode(&page).is_err());
    }

    #[test]
    fn tombstone_round_trips() {
        let mut m = MetaPage::empty();
        m.flags = MetaFlags::TOMBSTONE;
        m.prev_meta = 9;
        let page = m.encode(5, 512);
        let decoded = MetaPage::decode(&page).unwrap();
        assert!(decoded.flags.contains(MetaFlags::TOMBSTONE));
        assert_eq!(decoded.prev_meta, 9);
    }
}

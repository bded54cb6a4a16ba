//! Transaction manager: begin/commit/abort, the dirty-page queue, and the
//! COW page-allocation primitives (`new_page`, `touch`) that search and
//! the mutators build on.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::cache::CacheEntry;
use crate::config::{PageFlags, Pgno, COMMIT_BATCH, INVALID_PGNO, MAX_KEY_LEN};
use crate::cursor::Cursor;
use crate::db::Db;
use crate::disk;
use crate::meta::{self, MetaPage};
use crate::page::Page;
use crate::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    InProgress,
    Committed,
    Aborted,
}

/// One read or write transaction. Write transactions hold the database's
/// exclusive file lock for their entire lifetime; read transactions never
/// block and see a consistent snapshot of the root they began with.
pub struct Txn<'a> {
    pub(crate) db: &'a Db,
    pub(crate) rdonly: bool,
    status: Cell<TxnStatus>,
    meta: Cell<MetaPage>,
    base_meta_pgno: Pgno,
    next_pgno: Cell<Pgno>,
    dirty_order: RefCell<VecDeque<Pgno>>,
    poisoned: Cell<bool>,
}

impl<'a> Txn<'a> {
    pub(crate) fn new(db: &'a Db, rdonly: bool, meta: MetaPage, base_meta_pgno: Pgno, next_pgno: Pgno) -> Txn<'a> {
        Txn {
            db,
            rdonly,
            status: Cell::new(TxnStatus::InProgress),
            meta: Cell::new(meta),
            base_meta_pgno,
            next_pgno: Cell::new(next_pgno),
            dirty_order: RefCell::new(VecDeque::new()),
            poisoned: Cell::new(false),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.rdonly
    }

    pub(crate) fn root_pgno(&self) -> Pgno {
        self.meta.get().root
    }

    pub(crate) fn set_root(&self, pgno: Pgno) {
        let mut m = self.meta.get();
        m.root = pgno;
        self.meta.set(m);
    }

    pub(crate) fn depth(&self) -> u32 {
        self.meta.get().depth
    }

    pub(crate) fn adjust_depth(&self, delta: i32) {
        let mut m = self.meta.get();
        m.depth = (m.depth as i32 + delta).max(0) as u32;
        self.meta.set(m);
    }

    pub(crate) fn adjust_entries(&self, delta: i64) {
        let mut m = self.meta.get();
        m.entries = (m.entries as i64 + delta).max(0) as u64;
        self.meta.set(m);
    }

    pub(crate) fn adjust_page_count(&self, flags: PageFlags, delta: i32) {
        let mut m = self.meta.get();
        if flags.contains(PageFlags::BRANCH) {
            m.branch_pages = (m.branch_pages as i32 + delta).max(0) as u32;
        } else if flags.contains(PageFlags::LEAF) {
            m.leaf_pages = (m.leaf_pages as i32 + delta).max(0) as u32;
        } else if flags.contains(PageFlags::OVERFLOW) {
            m.overflow_pages = (m.overflow_pages as i32 + delta).max(0) as u32;
        }
        self.meta.set(m);
    }

    pub(crate) fn psize(&self) -> usize {
        self.db.psize as usize
    }

    fn ensure_cached(&self, pgno: Pgno) -> Result<()> {
        if self.db.cache.borrow().contains(pgno) {
            return Ok(());
        }
        let page = disk::read_page(&self.db.file, pgno, self.db.psize)?;
        self.db.cache.borrow_mut().insert(pgno, page);
        Ok(())
    }

    pub(crate) fn with_page<R>(&self, pgno: Pgno, f: impl FnOnce(&CacheEntry) -> R) -> Result<R> {
        self.ensure_cached(pgno)?;
        let mut cache = self.db.cache.borrow_mut();
        Ok(f(cache.get(pgno).expect("just ensured cached")))
    }

    pub(crate) fn with_page_mut<R>(&self, pgno: Pgno, f: impl FnOnce(&mut CacheEntry) -> R) -> Result<R> {
        self.ensure_cached(pgno)?;
        let mut cache = self.db.cache.borrow_mut();
        Ok(f(cache.get_mut(pgno).expect("just ensured cached")))
    }

    pub(crate) fn bump_ref(&self, pgno: Pgno) {
        self.db.cache.borrow_mut().bump_ref(pgno);
    }

    pub(crate) fn release_ref(&self, pgno: Pgno) {
        self.db.cache.borrow_mut().release_ref(pgno);
    }

    /// Allocate a fresh page number and cache a new, dirty, zeroed page
    /// of the given type.
    pub(crate) fn new_page(&self, flags: PageFlags) -> Result<Pgno> {
        if self.rdonly {
            return Err(Error::Permission);
        }
        let pgno = self.next_pgno.get();
        self.next_pgno.set(pgno + 1);
        let mut page = Page::zeroed(self.db.psize);
        page.set_pgno(pgno);
        if flags.contains(PageFlags::BRANCH) || flags.contains(PageFlags::LEAF) {
            page.init_node_page(flags);
        } else {
            page.set_flags(flags);
        }
        {
            let mut cache = self.db.cache.borrow_mut();
            let entry = cache.insert(pgno, page);
            entry.dirty = true;
        }
        self.dirty_order.borrow_mut().push_back(pgno);
        self.adjust_page_count(flags, 1);
        Ok(pgno)
    }

    /// COW: if `pgno` is already dirty in this transaction, returns it
    /// unchanged. Otherwise allocates a fresh pgno, copies the page's raw
    /// bytes and cache bookkeeping (parent link, prefix) across, and
    /// returns the new pgno. Does not touch the parent's pointer -- use
    /// `touch_child` during descent, which does.
    pub(crate) fn touch(&self, pgno: Pgno) -> Result<Pgno> {
        if self.rdonly {
            return Err(Error::Permission);
        }
        self.ensure_cached(pgno)?;
        let already_dirty = self
            .with_page(pgno, |e| e.dirty)
            .unwrap_or(false);
        if already_dirty {
            return Ok(pgno);
        }
        let (data, parent, parent_index, prefix) = self.with_page(pgno, |e| {
            (e.page.data.clone(), e.parent, e.parent_index, e.prefix.clone())
        })?;
        let new_pgno = self.next_pgno.get();
        self.next_pgno.set(new_pgno + 1);
        let mut new_page = Page::from_bytes(data);
        new_page.set_pgno(new_pgno);
        {
            let mut cache = self.db.cache.borrow_mut();
            let entry = cache.insert(new_pgno, new_page);
            entry.dirty = true;
            entry.parent = parent;
            entry.parent_index = parent_index;
            entry.prefix = prefix;
        }
        self.dirty_order.borrow_mut().push_back(new_pgno);
        Ok(new_pgno)
    }

    /// Touch `pgno` (reached via slot `slot` of `parent`, or the root if
    /// `parent` is `None`) and propagate a pgno change up into the
    /// parent's child pointer or the transaction's root.
    pub(crate) fn touch_child(&self, parent: Option<Pgno>, pgno: Pgno, slot: usize) -> Result<Pgno> {
        let new_pgno = self.touch(pgno)?;
        if new_pgno != pgno {
            match parent {
                Some(parent_pgno) => {
                    self.with_page_mut(parent_pgno, |e| {
                        e.page.set_node_payload_field(slot, new_pgno);
                        e.dirty = true;
                    })?;
                }
                None => self.set_root(new_pgno),
            }
        }
        Ok(new_pgno)
    }

    fn poison_if_err<T>(&self, res: Result<T>) -> Result<T> {
        if res.is_err() {
            self.poisoned.set(true);
        }
        res
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        crate::search::get(self, key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.rdonly {
            return Err(Error::Permission);
        }
        validate_key(key)?;
        let res = crate::insert::put(self, key, value);
        self.poison_if_err(res)
    }

    pub fn delete(&self, key: &[u8]) -> Result<Vec<u8>> {
        if self.rdonly {
            return Err(Error::Permission);
        }
        validate_key(key)?;
        let res = crate::delete::delete(self, key);
        if matches!(res, Err(Error::NotFound)) {
            return res;
        }
        self.poison_if_err(res)
    }

    pub fn cursor(&self) -> Result<Cursor<'_>> {
        Cursor::new(self)
    }

    pub fn entries(&self) -> u64 {
        self.meta.get().entries
    }

    pub fn depth_public(&self) -> u32 {
        self.meta.get().depth
    }

    pub fn commit(self) -> Result<()> {
        if self.rdonly {
            self.status.set(TxnStatus::Aborted);
            return Err(Error::Permission);
        }
        if self.poisoned.get() {
            self.status.set(TxnStatus::Aborted);
            return Err(Error::InvalidArgument(
                "transaction poisoned by a prior error".into(),
            ));
        }

        let dirty: Vec<Pgno> = self.dirty_order.borrow().iter().copied().collect();
        if !dirty.is_empty() {
            for batch in dirty.chunks(COMMIT_BATCH) {
                let pages: Vec<Page> = {
                    let cache = self.db.cache.borrow();
                    batch
                        .iter()
                        .map(|&p| cache.peek(p).expect("dirty page must be cached").page.clone())
                        .collect()
                };
                disk::write_pages(&self.db.file, &pages)?;
                let mut cache = self.db.cache.borrow_mut();
                for &p in batch {
                    cache.clear_dirty(p);
                }
            }
            log::trace!(
                "commit: wrote {} dirty pages in {} batches",
                dirty.len(),
                dirty.len().div_ceil(COMMIT_BATCH)
            );
            if !self.db.options.no_sync {
                self.db.file.sync_all().map_err(Error::from)?;
            }
        }

        let mut meta = self.meta.get();
        meta.revisions += 1;
        meta.created_at = crate::meta::now_unix();
        meta.prev_meta = self.base_meta_pgno;
        let new_meta_pgno = self.next_pgno.get();
        self.next_pgno.set(new_meta_pgno + 1);
        meta::write_meta(&self.db.file, new_meta_pgno, &meta, self.db.psize)?;
        if !self.db.options.no_sync {
            self.db.file.sync_all().map_err(Error::from)?;
        }

        self.db.meta.set(meta);
        self.db.meta_pgno.set(new_meta_pgno);
        self.db.cache.borrow_mut().prune();
        log::debug!(
            "commit: new meta pgno={new_meta_pgno}, revision={}",
            meta.revisions
        );

        self.status.set(TxnStatus::Committed);
        self.db.finish_writer();
        Ok(())
    }

    pub fn abort(self) {
        self.do_abort();
        self.status.set(TxnStatus::Aborted);
    }

    fn do_abort(&self) {
        if !self.rdonly {
            let dirty: Vec<Pgno> = self.dirty_order.borrow_mut().drain(..).collect();
            {
                let mut cache = self.db.cache.borrow_mut();
                for p in dirty {
                    cache.remove(p);
                }
            }
            self.db.finish_writer();
        }
    }
}

impl<'a> Drop for Txn<'a> {
    fn drop(&mut self) {
        if self.status.get() == TxnStatus::InProgress {
            self.do_abort();
        }
    }
}

pub(crate) fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidArgument(format!(
            "key length {} exceeds maximum of {MAX_KEY_LEN}",
            key.len()
        )));
    }
    Ok(())
}

/// Whether the tree is currently empty, for callers that need it without
/// going through a full descent.
pub(crate) fn root_is_empty(pgno: Pgno) -> bool {
    pgno == INVALID_PGNO
}

//! Ordered iteration over a transaction's key space.
//!
//! A cursor keeps a stack of `(page, slot)` frames from root to the
//! current leaf. Every cached page a cursor's stack references is
//! ref-bumped so the page cache never evicts it out from under a live
//! cursor; the bump is released when the frame is popped or the cursor
//! is dropped.

use crate::config::Pgno;
use crate::prefix;
use crate::search;
use crate::txn::Txn;
use crate::{Error, Result};

struct CursorFrame {
    pgno: Pgno,
    slot: usize,
    bound_left: Option<Vec<u8>>,
    bound_right: Option<Vec<u8>>,
}

pub struct Cursor<'a> {
    txn: &'a Txn<'a>,
    stack: Vec<CursorFrame>,
    initialized: bool,
    eof: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(txn: &'a Txn<'a>) -> Result<Cursor<'a>> {
        Ok(Cursor {
            txn,
            stack: Vec::new(),
            initialized: false,
            eof: false,
        })
    }

    /// Position on the smallest key ≥ `key`. If every key in the leaf that
    /// would contain it is smaller, advances to the next leaf's first
    /// entry. Returns `false` if the tree has no such key.
    pub fn set(&mut self, key: &[u8]) -> Result<bool> {
        let descent = match search::descend(self.txn, key, false) {
            Ok(d) => d,
            Err(Error::NotFound) => {
                self.reset_empty();
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.adopt(descent)?;
        if self.eof {
            return self.climb_to_next_leaf();
        }
        Ok(true)
    }

    /// Position exactly on `key`. Returns `false` (and leaves the cursor at
    /// EOF) if `key` is absent.
    pub fn set_exact(&mut self, key: &[u8]) -> Result<bool> {
        let descent = match search::descend(self.txn, key, false) {
            Ok(d) => d,
            Err(Error::NotFound) => {
                self.reset_empty();
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !descent.exact {
            self.reset_empty();
            return Ok(false);
        }
        self.adopt(descent)
    }

    /// Position on the smallest key in the tree.
    pub fn first(&mut self) -> Result<bool> {
        let descent = match search::descend(self.txn, b"", false) {
            Ok(d) => d,
            Err(Error::NotFound) => {
                self.reset_empty();
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.adopt(descent)
    }

    /// Advance to the next key in order. Returns `false` once past the
    /// last entry.
    pub fn next(&mut self) -> Result<bool> {
        if !self.initialized || self.eof {
            return Ok(false);
        }
        let (pgno, slot) = {
            let top = self.stack.last().expect("initialized cursor has a leaf frame");
            (top.pgno, top.slot)
        };
        let n = self.txn.with_page(pgno, |e| e.page.num_slots())?;
        if slot + 1 < n {
            self.stack.last_mut().unwrap().slot = slot + 1;
            return Ok(true);
        }
        let popped = self.stack.pop().unwrap();
        self.txn.release_ref(popped.pgno);
        self.climb_to_next_leaf()
    }

    pub fn key(&self) -> Result<Option<Vec<u8>>> {
        if !self.initialized || self.eof {
            return Ok(None);
        }
        let leaf = self.stack.last().expect("initialized cursor has a leaf frame");
        let prefix = self.txn.with_page(leaf.pgno, |e| e.prefix.clone())?;
        let key = self.txn.with_page(leaf.pgno, |e| prefix::full_key(&prefix, e.page.node_key(leaf.slot)))?;
        Ok(Some(key))
    }

    pub fn value(&self) -> Result<Option<Vec<u8>>> {
        if !self.initialized || self.eof {
            return Ok(None);
        }
        let leaf = self.stack.last().expect("initialized cursor has a leaf frame");
        search::read_leaf_value(self.txn, leaf.pgno, leaf.slot)
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    fn reset_empty(&mut self) {
        self.release_all();
        self.initialized = true;
        self.eof = true;
    }

    fn release_all(&mut self) {
        for f in self.stack.drain(..) {
            self.txn.release_ref(f.pgno);
        }
    }

    /// Replace the cursor's stack with the path from a fresh descent,
    /// ref-bumping every frame. Sets `eof` if the tree is empty or the
    /// descent landed past the leaf's last entry.
    fn adopt(&mut self, descent: search::Descent) -> Result<bool> {
        if descent.path.is_empty() {
            self.reset_empty();
            return Ok(false);
        }
        self.release_all();
        let path = descent.path;
        let last = path.len() - 1;
        let mut stack = Vec::with_capacity(path.len());
        for (i, frame) in path.iter().enumerate() {
            // A branch frame's effective "current slot" is the child index
            // that was actually followed, recorded as the *next* frame's
            // `parent_slot`; the leaf frame uses the descent's own slot.
            let slot = if i < last { path[i + 1].parent_slot } else { descent.slot };
            stack.push(CursorFrame {
                pgno: frame.pgno,
                slot,
                bound_left: frame.bound_left.clone(),
                bound_right: frame.bound_right.clone(),
            });
        }
        self.stack = stack;
        self.initialized = true;

        let leaf = self.stack.last().unwrap();
        let leaf_n = self.txn.with_page(leaf.pgno, |e| e.page.num_slots())?;
        self.eof = leaf_n == 0 || leaf.slot >= leaf_n;
        for f in &self.stack {
            self.txn.bump_ref(f.pgno);
        }
        Ok(!self.eof)
    }

    /// Pop frames while exhausted, then push back down along slot 0 from
    /// the first ancestor with room to advance its own index.
    fn climb_to_next_leaf(&mut self) -> Result<bool> {
        while let Some(top) = self.stack.last() {
            let n = self.txn.with_page(top.pgno, |e| e.page.num_slots())?;
            if top.slot + 1 < n {
                let new_slot = top.slot + 1;
                self.stack.last_mut().unwrap().slot = new_slot;
                self.push_down_leftmost(new_slot)?;
                self.eof = false;
                return Ok(true);
            }
            let popped = self.stack.pop().unwrap();
            self.txn.release_ref(popped.pgno);
        }
        self.eof = true;
        Ok(false)
    }

    /// From the branch frame at the top of the stack, descend into its
    /// child at `cur_slot`, then keep taking slot 0 until reaching a leaf.
    fn push_down_leftmost(&mut self, mut cur_slot: usize) -> Result<()> {
        loop {
            let parent_pgno = self.stack.last().unwrap().pgno;
            let parent_prefix = self.txn.with_page(parent_pgno, |e| e.prefix.clone())?;
            let n = self.txn.with_page(parent_pgno, |e| e.page.num_slots())?;
            let (pb_left, pb_right) = {
                let top = self.stack.last().unwrap();
                (top.bound_left.clone(), top.bound_right.clone())
            };
            let child_pgno = self.txn.with_page(parent_pgno, |e| e.page.node_child(cur_slot))?;

            let new_left = if cur_slot > 0 {
                Some(self.txn.with_page(parent_pgno, |e| {
                    prefix::full_key(&parent_prefix, e.page.node_key(cur_slot))
                })?)
            } else {
                pb_left
            };
            let new_right = if cur_slot + 1 < n {
                Some(self.txn.with_page(parent_pgno, |e| {
                    prefix::full_key(&parent_prefix, e.page.node_key(cur_slot + 1))
                })?)
            } else {
                pb_right
            };

            let my_prefix = prefix::compute_prefix(new_left.as_deref(), new_right.as_deref(), &parent_prefix);
            self.txn.with_page_mut(child_pgno, |e| {
                e.parent = Some(parent_pgno);
                e.parent_index = cur_slot;
                e.prefix = my_prefix;
            })?;
            self.txn.bump_ref(child_pgno);

            let is_branch = self.txn.with_page(child_pgno, |e| e.page.is_branch())?;
            self.stack.push(CursorFrame {
                pgno: child_pgno,
                slot: 0,
                bound_left: new_left,
                bound_right: new_right,
            });
            if !is_branch {
                return Ok(());
            }
            cur_slot = 0;
        }
    }
}

impl<'a> Drop for Cursor<'a> {
    fn drop(&mut self) {
        self.release_all();
    }
}


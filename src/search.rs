//! Binary search within a page and root-to-leaf descent.

use std::cmp::Ordering;

use crate::config::{Pgno, INVALID_PGNO};
use crate::prefix;
use crate::txn::Txn;
use crate::{Error, Result};

/// One level of the path from root to leaf.
#[derive(Clone)]
pub struct Frame {
    pub pgno: Pgno,
    /// Slot of this page's child pointer in its parent (unused for the
    /// root frame).
    pub parent_slot: usize,
    /// This page's own effective bounds at the moment it was visited --
    /// the nearest ancestor separators strictly below/above it. Threaded
    /// through so a mutator that later splits this page can compute its
    /// children's post-split prefixes the same way a fresh descent would.
    pub bound_left: Option<Vec<u8>>,
    pub bound_right: Option<Vec<u8>>,
}

pub struct Descent {
    pub path: Vec<Frame>,
    pub leaf: Pgno,
    /// Slot in the leaf where `key` was found, or where it should be
    /// inserted if absent.
    pub slot: usize,
    pub exact: bool,
}

/// Compare `query` against the full key `prefix ++ stored` without
/// materialising the full key.
fn cmp_with_prefix(prefix: &[u8], stored: &[u8], query: &[u8]) -> Ordering {
    let n = prefix.len().min(query.len());
    match prefix[..n].cmp(&query[..n]) {
        Ordering::Equal => {
            if prefix.len() > query.len() {
                Ordering::Greater
            } else {
                stored.cmp(&query[prefix.len()..])
            }
        }
        other => other,
    }
}

/// Lower-bound binary search: the smallest slot whose full key is ≥
/// `query`, or `num_slots()` if none. Branch slot 0 (the implicit −∞ key)
/// is never returned as an exact match and is skipped as a candidate.
pub fn binary_search(page: &crate::page::Page, page_prefix: &[u8], query: &[u8]) -> (usize, bool) {
    let start = if page.is_branch() { 1 } else { 0 };
    let n = page.num_slots();
    let mut lo = start;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp_with_prefix(page_prefix, page.node_key(mid), query) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let exact = lo < n && cmp_with_prefix(page_prefix, page.node_key(lo), query) == Ordering::Equal;
    (lo, exact)
}

/// Descend from the root to the leaf that would contain `key`. When
/// `modify` is set, every page on the path is COW-touched and the new
/// pgno propagated into its parent (or the transaction root).
pub fn descend(txn: &Txn, key: &[u8], modify: bool) -> Result<Descent> {
    let root = txn.root_pgno();
    if root == INVALID_PGNO {
        return Err(Error::NotFound);
    }

    let mut path = Vec::new();
    let mut pgno = root;
    let mut parent: Option<Pgno> = None;
    let mut parent_slot = 0usize;
    let mut bound_left: Option<Vec<u8>> = None;
    let mut bound_right: Option<Vec<u8>> = None;
    let mut parent_prefix: Vec<u8> = Vec::new();

    loop {
        if modify {
            pgno = txn.touch_child(parent, pgno, parent_slot)?;
        }

        let my_prefix = prefix::compute_prefix(bound_left.as_deref(), bound_right.as_deref(), &parent_prefix);
        txn.with_page_mut(pgno, |e| {
            e.parent = parent;
            e.parent_index = parent_slot;
            e.prefix = my_prefix.clone();
        })?;

        let is_branch = txn.with_page(pgno, |e| e.page.is_branch())?;
        if !is_branch {
            let (slot, exact) = txn.with_page(pgno, |e| binary_search(&e.page, &e.prefix, key))?;
            path.push(Frame {
                pgno,
                parent_slot,
                bound_left: bound_left.clone(),
                bound_right: bound_right.clone(),
            });
            return Ok(Descent {
                path,
                leaf: pgno,
                slot,
                exact,
            });
        }

        path.push(Frame {
            pgno,
            parent_slot,
            bound_left: bound_left.clone(),
            bound_right: bound_right.clone(),
        });
        let (found, exact) = txn.with_page(pgno, |e| binary_search(&e.page, &e.prefix, key))?;
        let n = txn.with_page(pgno, |e| e.page.num_slots())?;
        let child_idx = if exact {
            found
        } else if found == 0 {
            0
        } else if found < n {
            found - 1
        } else {
            n - 1
        };

        let new_left = if child_idx > 0 {
            Some(txn.with_page(pgno, |e| prefix::full_key(&e.prefix, e.page.node_key(child_idx)))?)
        } else {
            bound_left.clone()
        };
        let new_right = if child_idx + 1 < n {
            Some(txn.with_page(pgno, |e| {
                prefix::full_key(&e.prefix, e.page.node_key(child_idx + 1))
            })?)
        } else {
            bound_right.clone()
        };

        let child_pgno = txn.with_page(pgno, |e| e.page.node_child(child_idx))?;
        let my_prefix_now = txn.with_page(pgno, |e| e.prefix.clone())?;

        parent = Some(pgno);
        parent_slot = child_idx;
        parent_prefix = my_prefix_now;
        bound_left = new_left;
        bound_right = new_right;
        pgno = child_pgno;
    }
}

/// Point lookup: `get` never mutates, so it descends with `modify=false`.
pub fn get(txn: &Txn, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let descent = match descend(txn, key, false) {
        Ok(d) => d,
        Err(Error::NotFound) => return Ok(None),
        Err(e) => return Err(e),
    };
    if !descent.exact {
        return Ok(None);
    }
    read_leaf_value(txn, descent.leaf, descent.slot)
}

/// Materialise a leaf node's value, following an overflow chain if needed.
pub(crate) fn read_leaf_value(txn: &Txn, leaf: Pgno, slot: usize) -> Result<Option<Vec<u8>>> {
    let head = txn.with_page(leaf, |e| match e.page.node_value(slot) {
        crate::node::NodeValueRef::Inline(_) => None,
        crate::node::NodeValueRef::Overflow(head) => Some(head),
    })?;
    match head {
        None => {
            let bytes = txn.with_page(leaf, |e| match e.page.node_value(slot) {
                crate::node::NodeValueRef::Inline(bytes) => bytes.to_vec(),
                crate::node::NodeValueRef::Overflow(_) => unreachable!(),
            })?;
            Ok(Some(bytes))
        }
        Some(head_pgno) => {
            let head_page = txn.with_page(head_pgno, |e| e.page.clone())?;
            let value = crate::overflow::read_chain(&head_page, |pgno| {
                txn.with_page(pgno, |e| e.page.clone())
            })?;
            Ok(Some(value))
        }
    }
}

//! `del`: remove a key and rebalance the tree (move-node or merge) so
//! every page stays above the minimum fill threshold.

use crate::config::{FILL_THRESHOLD_PPT, INVALID_PGNO, Pgno};
use crate::insert::{self, Entry, EntryValue};
use crate::node;
use crate::page::PAGEHDRSZ;
use crate::prefix;
use crate::search::{self, Frame};
use crate::txn::Txn;
use crate::{Error, Result};

pub fn delete(txn: &Txn, key: &[u8]) -> Result<Vec<u8>> {
    let descent = search::descend(txn, key, true)?;
    if !descent.exact {
        return Err(Error::NotFound);
    }
    let old_value = search::read_leaf_value(txn, descent.leaf, descent.slot)?
        .expect("exact match always has a value");
    txn.with_page_mut(descent.leaf, |e| node::delete_node(&mut e.page, descent.slot))?;
    txn.adjust_entries(-1);
    rebalance(txn, &descent.path, descent.path.len() - 1)?;
    Ok(old_value)
}

fn fill_ppt(txn: &Txn, pgno: Pgno) -> Result<u32> {
    txn.with_page(pgno, |e| {
        let usable = e.page.psize() - PAGEHDRSZ;
        let used = usable - e.page.free_bytes();
        ((used as u64 * 1000) / usable as u64) as u32
    })
}

fn rebalance(txn: &Txn, path: &[Frame], level: usize) -> Result<()> {
    let pgno = path[level].pgno;
    if fill_ppt(txn, pgno)? >= FILL_THRESHOLD_PPT {
        return Ok(());
    }

    if level == 0 {
        return rebalance_root(txn, pgno);
    }

    let parent_frame = &path[level - 1];
    let parent_pgno = parent_frame.pgno;
    let my_slot = path[level].parent_slot;
    let parent_n = txn.with_page(parent_pgno, |e| e.page.num_slots())?;
    let is_leftmost = my_slot == 0;
    let neighbor_slot = if is_leftmost { my_slot + 1 } else { my_slot - 1 };
    if neighbor_slot >= parent_n {
        // No sibling to rebalance against (single-child parent); leave as is.
        return Ok(());
    }

    let (neighbor_pgno, neighbor_bound_left, neighbor_bound_right) =
        touch_neighbor(txn, parent_frame, parent_pgno, neighbor_slot)?;
    let neighbor_n = txn.with_page(neighbor_pgno, |e| e.page.num_slots())?;
    let neighbor_fill = fill_ppt(txn, neighbor_pgno)?;

    if neighbor_fill >= FILL_THRESHOLD_PPT && neighbor_n >= 2 {
        if is_leftmost {
            move_from_right(
                txn,
                parent_pgno,
                pgno,
                &path[level],
                neighbor_pgno,
                neighbor_bound_right,
                neighbor_slot,
            )?;
        } else {
            move_from_left(
                txn,
                parent_pgno,
                pgno,
                &path[level],
                neighbor_pgno,
                neighbor_bound_left,
                my_slot,
            )?;
        }
        return Ok(());
    }

    if is_leftmost {
        // `pgno` (leftmost) merges its right neighbor into itself.
        merge(
            txn,
            pgno,
            path[level].bound_left.clone(),
            neighbor_pgno,
            neighbor_bound_right,
            parent_pgno,
            neighbor_slot,
        )?;
    } else {
        // `pgno` merges itself into its left neighbor.
        merge(
            txn,
            neighbor_pgno,
            neighbor_bound_left,
            pgno,
            path[level].bound_right.clone(),
            parent_pgno,
            my_slot,
        )?;
    }
    rebalance(txn, path, level - 1)
}

fn rebalance_root(txn: &Txn, pgno: Pgno) -> Result<()> {
    let n = txn.with_page(pgno, |e| e.page.num_slots())?;
    let is_branch = txn.with_page(pgno, |e| e.page.is_branch())?;
    if n == 0 {
        txn.set_root(INVALID_PGNO);
        txn.adjust_depth(-1);
    } else if is_branch && n == 1 {
        let child = txn.with_page(pgno, |e| e.page.node_child(0))?;
        txn.with_page_mut(child, |e| {
            let old_prefix = e.prefix.clone();
            prefix::adjust_prefix(&mut e.page, &old_prefix, &[]);
            e.parent = None;
            e.parent_index = 0;
            e.prefix = Vec::new();
            e.dirty = true;
        })?;
        txn.set_root(child);
        txn.adjust_depth(-1);
    }
    Ok(())
}

/// COW-touch the neighbor child at `neighbor_slot` of `parent_pgno`,
/// recomputing and caching its effective prefix (mirroring what a fresh
/// descent would do, since rebalance visits the neighbor without having
/// descended into it).
fn touch_neighbor(
    txn: &Txn,
    parent_frame: &Frame,
    parent_pgno: Pgno,
    neighbor_slot: usize,
) -> Result<(Pgno, Option<Vec<u8>>, Option<Vec<u8>>)> {
    let n = txn.with_page(parent_pgno, |e| e.page.num_slots())?;
    let parent_prefix = txn.with_page(parent_pgno, |e| e.prefix.clone())?;
    let child_pgno = txn.with_page(parent_pgno, |e| e.page.node_child(neighbor_slot))?;
    let left = if neighbor_slot > 0 {
        Some(txn.with_page(parent_pgno, |e| prefix::full_key(&e.prefix, e.page.node_key(neighbor_slot)))?)
    } else {
        parent_frame.bound_left.clone()
    };
    let right = if neighbor_slot + 1 < n {
        Some(txn.with_page(parent_pgno, |e| prefix::full_key(&e.prefix, e.page.node_key(neighbor_slot + 1)))?)
    } else {
        parent_frame.bound_right.clone()
    };
    let touched = txn.touch_child(Some(parent_pgno), child_pgno, neighbor_slot)?;
    let eff_prefix = prefix::compute_prefix(left.as_deref(), right.as_deref(), &parent_prefix);
    txn.with_page_mut(touched, |e| {
        e.parent = Some(parent_pgno);
        e.parent_index = neighbor_slot;
        e.prefix = eff_prefix;
    })?;
    Ok((touched, left, right))
}

/// Walk to the leftmost leaf under `pgno` and return its first key,
/// reconstructed with that leaf's own prefix.
fn leftmost_leaf_first_key(txn: &Txn, mut pgno: Pgno) -> Result<Vec<u8>> {
    loop {
        let is_branch = txn.with_page(pgno, |e| e.page.is_branch())?;
        if !is_branch {
            let prefix = txn.with_page(pgno, |e| e.prefix.clone())?;
            return txn.with_page(pgno, |e| prefix::full_key(&prefix, e.page.node_key(0)));
        }
        pgno = txn.with_page(pgno, |e| e.page.node_child(0))?;
    }
}

/// Reconstruct a page's entries with their true, semantically meaningful
/// keys: a branch page's slot 0 has no stored key of its own, so its real
/// key is the smallest key reachable under its child subtree.
fn real_collect_entries(txn: &Txn, pgno: Pgno) -> Result<Vec<Entry>> {
    let prefix = txn.with_page(pgno, |e| e.prefix.clone())?;
    let is_branch = txn.with_page(pgno, |e| e.page.is_branch())?;
    let n = txn.with_page(pgno, |e| e.page.num_slots())?;
    let mut out = Vec::with_capacity(n);
    for slot in 0..n {
        let value = if is_branch {
            EntryValue::Child(txn.with_page(pgno, |e| e.page.node_child(slot))?)
        } else {
            txn.with_page(pgno, |e| match e.page.node_value(slot) {
                node::NodeValueRef::Inline(b) => EntryValue::Inline(b.to_vec()),
                node::NodeValueRef::Overflow(h) => EntryValue::Overflow(h),
            })?
        };
        let key = if is_branch && slot == 0 {
            let child = match &value {
                EntryValue::Child(c) => *c,
                _ => unreachable!(),
            };
            leftmost_leaf_first_key(txn, child)?
        } else {
            txn.with_page(pgno, |e| prefix::full_key(&prefix, e.page.node_key(slot)))?
        };
        out.push(Entry { key, value });
    }
    Ok(out)
}

/// Merge `right_pgno` into `left_pgno`; `left_pgno` survives and keeps its
/// page number, `right_pgno` is dropped from the parent at
/// `right_slot_in_parent` (always ≥ 1, since the surviving page always
/// keeps the lower slot).
fn merge(
    txn: &Txn,
    left_pgno: Pgno,
    left_bound_left: Option<Vec<u8>>,
    right_pgno: Pgno,
    right_bound_right: Option<Vec<u8>>,
    parent_pgno: Pgno,
    right_slot_in_parent: usize,
) -> Result<()> {
    let flags = txn.with_page(left_pgno, |e| e.page.flags())?;
    let mut merged = real_collect_entries(txn, left_pgno)?;
    merged.extend(real_collect_entries(txn, right_pgno)?);

    let parent_prefix = txn.with_page(parent_pgno, |e| e.prefix.clone())?;
    let new_prefix = prefix::compute_prefix(left_bound_left.as_deref(), right_bound_right.as_deref(), &parent_prefix);
    insert::write_entries(txn, left_pgno, flags, &new_prefix, &merged)?;

    txn.with_page_mut(parent_pgno, |e| node::delete_node(&mut e.page, right_slot_in_parent))?;
    txn.adjust_page_count(flags, -1);
    log::trace!("merged page {right_pgno} into {left_pgno}");
    Ok(())
}

/// `self_pgno` is leftmost in its parent; move the neighbor's (right
/// sibling's) first entry onto `self_pgno`'s end.
fn move_from_right(
    txn: &Txn,
    parent_pgno: Pgno,
    self_pgno: Pgno,
    self_frame: &Frame,
    neighbor_pgno: Pgno,
    neighbor_bound_right: Option<Vec<u8>>,
    neighbor_slot_in_parent: usize,
) -> Result<()> {
    let self_flags = txn.with_page(self_pgno, |e| e.page.flags())?;
    let neighbor_flags = txn.with_page(neighbor_pgno, |e| e.page.flags())?;
    let mut self_entries = real_collect_entries(txn, self_pgno)?;
    let mut neighbor_entries = real_collect_entries(txn, neighbor_pgno)?;
    let moved = neighbor_entries.remove(0);
    let new_boundary = neighbor_entries[0].key.clone();
    self_entries.push(moved);

    let parent_prefix = txn.with_page(parent_pgno, |e| e.prefix.clone())?;
    let new_self_prefix =
        prefix::compute_prefix(self_frame.bound_left.as_deref(), Some(&new_boundary), &parent_prefix);
    let new_neighbor_prefix =
        prefix::compute_prefix(Some(&new_boundary), neighbor_bound_right.as_deref(), &parent_prefix);

    insert::write_entries(txn, self_pgno, self_flags, &new_self_prefix, &self_entries)?;
    insert::write_entries(txn, neighbor_pgno, neighbor_flags, &new_neighbor_prefix, &neighbor_entries)?;

    let stripped = prefix::strip_prefix(&parent_prefix, &new_boundary).to_vec();
    txn.with_page_mut(parent_pgno, |e| node::update_key(&mut e.page, neighbor_slot_in_parent, &stripped))?;
    log::trace!("moved node from right sibling {neighbor_pgno} into {self_pgno}");
    Ok(())
}

/// `self_pgno` is not leftmost; move the neighbor's (left sibling's) last
/// entry onto `self_pgno`'s front.
fn move_from_left(
    txn: &Txn,
    parent_pgno: Pgno,
    self_pgno: Pgno,
    self_frame: &Frame,
    neighbor_pgno: Pgno,
    neighbor_bound_left: Option<Vec<u8>>,
    self_slot_in_parent: usize,
) -> Result<()> {
    let self_flags = txn.with_page(self_pgno, |e| e.page.flags())?;
    let neighbor_flags = txn.with_page(neighbor_pgno, |e| e.page.flags())?;
    let mut self_entries = real_collect_entries(txn, self_pgno)?;
    let mut neighbor_entries = real_collect_entries(txn, neighbor_pgno)?;
    let moved = neighbor_entries.pop().expect("neighbor has >= 2 keys");
    let new_boundary = moved.key.clone();
    self_entries.insert(0, moved);

    let parent_prefix = txn.with_page(parent_pgno, |e| e.prefix.clone())?;
    let new_self_prefix =
        prefix::compute_prefix(Some(&new_boundary), self_frame.bound_right.as_deref(), &parent_prefix);
    let new_neighbor_prefix =
        prefix::compute_prefix(neighbor_bound_left.as_deref(), Some(&new_boundary), &parent_prefix);

    insert::write_entries(txn, self_pgno, self_flags, &new_self_prefix, &self_entries)?;
    insert::write_entries(txn, neighbor_pgno, neighbor_flags, &new_neighbor_prefix, &neighbor_entries)?;

    let stripped = prefix::strip_prefix(&parent_prefix, &new_boundary).to_vec();
    txn.with_page_mut(parent_pgno, |e| node::update_key(&mut e.page, self_slot_in_parent, &stripped))?;
    log::trace!("moved node from left sibling {neighbor_pgno} into {self_pgno}");
    Ok(())
}

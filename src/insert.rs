//! `put`: insert-or-overwrite, splitting pages as needed to make room.

use crate::config::{PageFlags, Pgno, INVALID_PGNO, MIN_KEYS};
use crate::node::{self, NodeValue};
use crate::overflow;
use crate::prefix;
use crate::search::{self, Frame};
use crate::txn::Txn;
use crate::Result;

/// One (key, value) pair as a plain owned value, independent of any
/// page's prefix -- used while shuffling entries around during a split
/// or rebalance.
pub(crate) struct Entry {
    pub(crate) key: Vec<u8>,
    pub(crate) value: EntryValue,
}

pub(crate) enum EntryValue {
    Child(Pgno),
    Inline(Vec<u8>),
    Overflow(Pgno),
}

impl EntryValue {
    pub(crate) fn as_node_value(&self) -> NodeValue<'_> {
        match self {
            EntryValue::Child(p) => NodeValue::Child(*p),
            EntryValue::Inline(v) => NodeValue::Inline(v),
            EntryValue::Overflow(p) => NodeValue::Overflow(*p),
        }
    }
}

pub fn put(txn: &Txn, key: &[u8], value: &[u8]) -> Result<()> {
    let entry_value = make_value(txn, value)?;

    if txn.root_pgno() == INVALID_PGNO {
        let leaf = txn.new_page(PageFlags::LEAF)?;
        txn.set_root(leaf);
        txn.adjust_depth(1);
        let frame = Frame {
            pgno: leaf,
            parent_slot: 0,
            bound_left: None,
            bound_right: None,
        };
        insert_at(txn, std::slice::from_ref(&frame), 0, 0, key, entry_value)?;
        txn.adjust_entries(1);
        return Ok(());
    }

    let descent = search::descend(txn, key, true)?;
    let is_new = !descent.exact;
    if descent.exact {
        txn.with_page_mut(descent.leaf, |e| node::delete_node(&mut e.page, descent.slot))?;
    }
    let level = descent.path.len() - 1;
    insert_at(txn, &descent.path, level, descent.slot, key, entry_value)?;
    if is_new {
        txn.adjust_entries(1);
    }
    Ok(())
}

fn make_value(txn: &Txn, value: &[u8]) -> Result<EntryValue> {
    let threshold = txn.psize() as u32 / MIN_KEYS;
    if value.len() as u32 >= threshold {
        Ok(EntryValue::Overflow(store_overflow(txn, value)?))
    } else {
        Ok(EntryValue::Inline(value.to_vec()))
    }
}

fn store_overflow(txn: &Txn, value: &[u8]) -> Result<Pgno> {
    let psize = txn.psize();
    let n = overflow::chain_len(psize, value.len());
    let mut pgnos = Vec::with_capacity(n);
    for _ in 0..n {
        pgnos.push(txn.new_page(PageFlags::OVERFLOW)?);
    }
    let pages = overflow::build_chain(psize, value, &pgnos);
    for page in pages {
        let pgno = page.pgno();
        txn.with_page_mut(pgno, |e| e.page = page)?;
    }
    Ok(pgnos[0])
}

fn try_add(txn: &Txn, pgno: Pgno, slot: usize, key_full: &[u8], value: &EntryValue) -> Result<bool> {
    let page_prefix = txn.with_page(pgno, |e| e.prefix.clone())?;
    let stripped = prefix::strip_prefix(&page_prefix, key_full).to_vec();
    txn.with_page_mut(pgno, |e| {
        let ok = node::add_node(&mut e.page, slot, &stripped, value.as_node_value());
        if ok {
            e.dirty = true;
        }
        ok
    })
}

fn insert_at(
    txn: &Txn,
    path: &[Frame],
    level: usize,
    slot: usize,
    key_full: &[u8],
    value: EntryValue,
) -> Result<()> {
    let pgno = path[level].pgno;
    if try_add(txn, pgno, slot, key_full, &value)? {
        return Ok(());
    }
    split(txn, path, level, slot, key_full, value)
}

/// Reconstruct a page's entries exactly as currently stored. Branch slot
/// 0's key is structurally empty (the implicit −∞ key) and is collected
/// as such -- callers that need its real routing key (merge/move-node)
/// must reconstruct it separately by walking to the leftmost leaf.
pub(crate) fn collect_entries(txn: &Txn, pgno: Pgno, page_prefix: &[u8]) -> Result<Vec<Entry>> {
    txn.with_page(pgno, |e| {
        let is_branch = e.page.is_branch();
        let n = e.page.num_slots();
        (0..n)
            .map(|slot| {
                let key = if is_branch && slot == 0 {
                    Vec::new()
                } else {
                    prefix::full_key(page_prefix, e.page.node_key(slot))
                };
                let value = if is_branch {
                    EntryValue::Child(e.page.node_child(slot))
                } else {
                    match e.page.node_value(slot) {
                        node::NodeValueRef::Inline(bytes) => EntryValue::Inline(bytes.to_vec()),
                        node::NodeValueRef::Overflow(head) => EntryValue::Overflow(head),
                    }
                };
                Entry { key, value }
            })
            .collect()
    })
}

/// Reset `pgno` and write `entries` back with `new_prefix` stripped.
/// Branch slot 0 is always written with an empty key, regardless of
/// what the corresponding `Entry::key` holds -- the real routing key (if
/// any) has already been promoted to the parent as a separator.
pub(crate) fn write_entries(txn: &Txn, pgno: Pgno, flags: PageFlags, new_prefix: &[u8], entries: &[Entry]) -> Result<()> {
    let is_branch = flags.contains(PageFlags::BRANCH);
    txn.with_page_mut(pgno, |e| {
        e.page.init_node_page(flags);
        for (i, ent) in entries.iter().enumerate() {
            let ok = if is_branch && i == 0 {
                node::add_node(&mut e.page, 0, &[], ent.value.as_node_value())
            } else {
                let stripped = prefix::strip_prefix(new_prefix, &ent.key);
                node::add_node(&mut e.page, i, stripped, ent.value.as_node_value())
            };
            debug_assert!(ok, "freshly cleared page must fit its own post-split share");
        }
        e.prefix = new_prefix.to_vec();
        e.dirty = true;
    })
}

/// Split `path[level]`'s page to make room for `(key_full, value)` at
/// `slot`, then insert the new separator into the parent (creating a new
/// root if the target had none), possibly cascading into a further split.
fn split(
    txn: &Txn,
    path: &[Frame],
    level: usize,
    slot: usize,
    key_full: &[u8],
    value: EntryValue,
) -> Result<()> {
    let frame = &path[level];
    let pgno = frame.pgno;
    let flags = txn.with_page(pgno, |e| e.page.flags())?;
    let cur_prefix = txn.with_page(pgno, |e| e.prefix.clone())?;
    let is_branch = flags.contains(PageFlags::BRANCH);

    let mut entries = collect_entries(txn, pgno, &cur_prefix)?;
    let orig_n = entries.len();
    entries.insert(slot, Entry { key: key_full.to_vec(), value });

    let split_index = (orig_n / 2 + 1).clamp(1, entries.len() - 1);
    let mut sep_full = entries[split_index].key.clone();
    if !is_branch {
        sep_full = prefix::reduce_separator(&entries[split_index - 1].key, &sep_full);
    }

    let right = txn.new_page(flags)?;

    let (parent_pgno, parent_slot) = if level == 0 {
        let new_root = txn.new_page(PageFlags::BRANCH)?;
        txn.with_page_mut(new_root, |e| {
            node::add_node(&mut e.page, 0, &[], NodeValue::Child(pgno));
        })?;
        txn.set_root(new_root);
        txn.adjust_depth(1);
        txn.with_page_mut(pgno, |e| {
            e.parent = Some(new_root);
            e.parent_index = 0;
        })?;
        (new_root, 0usize)
    } else {
        (path[level - 1].pgno, frame.parent_slot)
    };

    let parent_prefix = txn.with_page(parent_pgno, |e| e.prefix.clone())?;
    let left_prefix = prefix::compute_prefix(frame.bound_left.as_deref(), Some(&sep_full), &parent_prefix);
    let right_prefix = prefix::compute_prefix(Some(&sep_full), frame.bound_right.as_deref(), &parent_prefix);

    let left_entries = &entries[..split_index];
    let right_entries = &entries[split_index..];
    write_entries(txn, pgno, flags, &left_prefix, left_entries)?;
    write_entries(txn, right, flags, &right_prefix, right_entries)?;
    txn.with_page_mut(right, |e| e.parent = Some(parent_pgno))?;

    log::trace!("split page {pgno} -> {pgno}/{right}, separator len {}", sep_full.len());

    let sep_slot = parent_slot + 1;
    if level == 0 {
        let root_frame = Frame {
            pgno: parent_pgno,
            parent_slot: 0,
            bound_left: None,
            bound_right: None,
        };
        insert_at(txn, std::slice::from_ref(&root_frame), 0, sep_slot, &sep_full, EntryValue::Child(right))
    } else {
        insert_at(txn, path, level - 1, sep_slot, &sep_full, EntryValue::Child(right))
    }
}

//! Node codec: the slot array and variable-length node payloads inside a
//! BRANCH or LEAF page.
//!
//! Layout inside a page: the slot array is an array of 16-bit payload
//! offsets immediately following the page header, growing upward from
//! `lower`. Node payloads grow downward from `upper`. Each payload is a
//! small fixed header followed by the (already prefix-stripped) key bytes
//! and, for leaves, either inline value bytes or nothing (when the value
//! lives on an overflow chain).

use crate::config::{NodeFlags, Pgno};
use crate::page::{Page, PAGEHDRSZ, SLOT_SIZE};

/// `u32` payload field + `u16` key size + `u8` node flags.
pub const NODE_HDR_SIZE: usize = 4 + 2 + 1;

/// What a node's fixed `u32` payload field means, depending on page type
/// and (for leaves) whether the value is inline or overflowed.
#[derive(Clone, Copy)]
pub enum NodeValue<'a> {
    /// BRANCH node: pgno of the child subtree.
    Child(Pgno),
    /// LEAF node: value stored inline in this page.
    Inline(&'a [u8]),
    /// LEAF node: value lives on an overflow chain; this is its head pgno.
    Overflow(Pgno),
}

impl<'a> NodeValue<'a> {
    fn flags(&self) -> NodeFlags {
        match self {
            NodeValue::Overflow(_) => NodeFlags::BIGDATA,
            _ => NodeFlags::empty(),
        }
    }

    fn extra_len(&self) -> usize {
        match self {
            NodeValue::Child(_) | NodeValue::Overflow(_) => 0,
            NodeValue::Inline(bytes) => bytes.len(),
        }
    }
}

/// Bytes needed to add a node with the given key and value, including the
/// slot-array entry.
pub fn node_size(key: &[u8], value: &NodeValue<'_>) -> usize {
    NODE_HDR_SIZE + key.len() + value.extra_len() + SLOT_SIZE
}

fn slot_off(slot: usize) -> usize {
    PAGEHDRSZ + slot * SLOT_SIZE
}

/// Raw node accessors, read-only.
impl Page {
    fn slot_payload_offset(&self, slot: usize) -> usize {
        self.get_u16(slot_off(slot)) as usize
    }

    fn set_slot_payload_offset(&mut self, slot: usize, offset: usize) {
        self.set_u16(slot_off(slot), offset as u16);
    }

    pub fn node_flags(&self, slot: usize) -> NodeFlags {
        let off = self.slot_payload_offset(slot);
        NodeFlags::from_bits_truncate(self.data[off + 6])
    }

    fn node_payload_field(&self, slot: usize) -> u32 {
        let off = self.slot_payload_offset(slot);
        self.get_u32(off)
    }

    fn node_key_size(&self, slot: usize) -> usize {
        let off = self.slot_payload_offset(slot);
        self.get_u16(off + 4) as usize
    }

    /// Stored (prefix-stripped) key bytes for a slot.
    pub fn node_key(&self, slot: usize) -> &[u8] {
        let off = self.slot_payload_offset(slot);
        let ksize = self.node_key_size(slot);
        &self.data[off + NODE_HDR_SIZE..off + NODE_HDR_SIZE + ksize]
    }

    /// BRANCH only: child pgno.
    pub fn node_child(&self, slot: usize) -> Pgno {
        self.node_payload_field(slot)
    }

    /// Overwrite a node's fixed `u32` payload field in place (child pgno,
    /// or overflow head pgno for a BIGDATA leaf node). Never changes a
    /// node's size, so no slot shifting is required.
    pub fn set_node_payload_field(&mut self, slot: usize, value: u32) {
        let off = self.slot_payload_offset(slot);
        self.set_u32(off, value);
    }

    /// LEAF only: the inline value, or the overflow chain's head pgno,
    /// depending on `BIGDATA`.
    pub fn node_value(&self, slot: usize) -> NodeValueRef<'_> {
        if self.node_flags(slot).contains(NodeFlags::BIGDATA) {
            NodeValueRef::Overflow(self.node_payload_field(slot))
        } else {
            let off = self.slot_payload_offset(slot);
            let ksize = self.node_key_size(slot);
            let vstart = off + NODE_HDR_SIZE + ksize;
            let vend = self.slot_region_end(slot);
            NodeValueRef::Inline(&self.data[vstart..vend])
        }
    }

    /// Inline value bytes for a leaf node, or `None` for a branch node or
    /// a leaf node whose value lives on an overflow chain.
    fn node_value_or_none(&self, slot: usize) -> Option<&[u8]> {
        if self.is_branch() || self.node_flags(slot).contains(NodeFlags::BIGDATA) {
            None
        } else {
            match self.node_value(slot) {
                NodeValueRef::Inline(bytes) => Some(bytes),
                NodeValueRef::Overflow(_) => None,
            }
        }
    }

    /// End of this slot's payload region: either the start of the
    /// previous (lower-offset) node, or `psize` for the first node
    /// allocated (i.e. the one with the smallest offset isn't
    /// necessarily slot 0 -- nodes are not stored in offset order, so we
    /// derive the length from `node_size` recorded implicitly by key/flag
    /// rather than by neighboring offsets).
    fn slot_region_end(&self, slot: usize) -> usize {
        let off = self.slot_payload_offset(slot);
        let ksize = self.node_key_size(slot);
        // The `u32` payload field doubles as the trailing inline value's
        // length only for a non-BIGDATA leaf node; for a branch node it's
        // a child pgno and for a BIGDATA leaf node it's an overflow head
        // pgno, neither of which leaves trailing bytes in this payload.
        let vlen = if self.is_branch() || self.node_flags(slot).contains(NodeFlags::BIGDATA) {
            0
        } else {
            self.node_payload_field(slot) as usize
        };
        off + NODE_HDR_SIZE + ksize + vlen
    }

    /// Total on-disk size (header + key + value bytes) of the node at `slot`.
    fn node_total_size(&self, slot: usize) -> usize {
        let off = self.slot_payload_offset(slot);
        self.slot_region_end(slot) - off
    }
}

/// Borrowed view of a leaf node's value.
pub enum NodeValueRef<'a> {
    Inline(&'a [u8]),
    Overflow(Pgno),
}

/// Insert a new node at `slot`, shifting existing slots `[slot, n)` up by
/// one. Returns `false` ("page full") without modifying the page if there
/// is not enough free space.
pub fn add_node(page: &mut Page, slot: usize, key: &[u8], value: NodeValue<'_>) -> bool {
    let needed = node_size(key, &value);
    if needed > page.free_bytes() {
        return false;
    }
    let n = page.num_slots();
    debug_assert!(slot <= n);

    // Shift slot-array entries at [slot, n) up by one to make room.
    for i in (slot..n).rev() {
        let v = page.get_u16(slot_off(i));
        page.set_u16(slot_off(i + 1), v);
    }

    let payload_len = needed - SLOT_SIZE;
    let new_upper = page.upper() as usize - payload_len;
    page.set_upper(new_upper as u16);
    page.set_slot_payload_offset(slot, new_upper);
    page.set_lower(page.lower() + SLOT_SIZE as u16);

    let (field, flags, tail): (u32, NodeFlags, &[u8]) = match value {
        NodeValue::Child(pgno) => (pgno, NodeFlags::empty(), &[][..]),
        NodeValue::Overflow(head) => (head, NodeFlags::BIGDATA, &[][..]),
        NodeValue::Inline(bytes) => (bytes.len() as u32, NodeFlags::empty(), bytes),
    };
    page.set_u32(new_upper, field);
    page.set_u16(new_upper + 4, key.len() as u16);
    page.data[new_upper + 6] = flags.bits();
    page.data[new_upper + NODE_HDR_SIZE..new_upper + NODE_HDR_SIZE + key.len()]
        .copy_from_slice(key);
    page.data[new_upper + NODE_HDR_SIZE + key.len()..new_upper + NODE_HDR_SIZE + key.len() + tail.len()]
        .copy_from_slice(tail);
    true
}

/// Remove the node at `slot`, reclaiming its payload bytes and closing the
/// gap in the slot array.
pub fn delete_node(page: &mut Page, slot: usize) {
    let n = page.num_slots();
    debug_assert!(slot < n);
    let off = page.slot_payload_offset(slot);
    let size = page.node_total_size(slot);
    let upper = page.upper() as usize;

    // Shift every payload byte between `upper` and the deleted node's
    // start up by `size`, then fix up slot offsets that pointed below it.
    let (dst_start, src_start, src_end) = (upper + size, upper, off);
    page.data.copy_within(src_start..src_end, dst_start);

    for i in 0..n {
        if i == slot {
            continue;
        }
        let o = page.slot_payload_offset(i);
        if o < off {
            page.set_slot_payload_offset(i, o + size);
        }
    }
    for i in slot..n - 1 {
        let v = page.get_u16(slot_off(i + 1));
        page.set_u16(slot_off(i), v);
    }
    page.set_lower(page.lower() - SLOT_SIZE as u16);
    page.set_upper((upper + size) as u16);
}

/// Overwrite the key stored at `slot`, growing or shrinking its payload
/// region as needed and shifting every other node's offset accordingly.
///
/// The node's full payload (header, key, and trailing value bytes if any)
/// is relocated as a unit rather than shifted byte-by-byte in place: since
/// only the key length changes, the trailing value bytes of a leaf's
/// inline node would otherwise be left behind at their old offset. Slot
/// `slot`'s position in the array is preserved.
pub fn update_key(page: &mut Page, slot: usize, new_key: &[u8]) {
    if page.node_key(slot) == new_key {
        return;
    }
    let is_branch = page.is_branch();
    let flags = page.node_flags(slot);
    let field = page.node_payload_field(slot);
    let value: Vec<u8> = match page.node_value_or_none(slot) {
        Some(bytes) => bytes.to_vec(),
        None => Vec::new(),
    };

    delete_node(page, slot);
    let node_value = if is_branch {
        NodeValue::Child(field)
    } else if flags.contains(NodeFlags::BIGDATA) {
        NodeValue::Overflow(field)
    } else {
        NodeValue::Inline(&value)
    };
    let ok = add_node(page, slot, new_key, node_value);
    debug_assert!(ok, "update_key must not be called without headroom");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageFlags;

    fn leaf_page() -> Page {
        let mut p = Page::zeroed(512);
        p.init_node_page(PageFlags::LEAF);
        p
    }

    #[test]
    fn add_then_read_inline_value() {
        let mut p = leaf_page();
        assert!(add_node(&mut p, 0, b"apple", NodeValue::Inline(b"1")));
        assert_eq!(p.node_key(0), b"apple");
        match p.node_value(0) {
            NodeValueRef::Inline(v) => assert_eq!(v, b"1"),
            _ => panic!("expected inline"),
        }
    }

    #[test]
    fn insert_keeps_slots_sorted_by_shifting() {
        let mut p = leaf_page();
        assert!(add_node(&mut p, 0, b"b", NodeValue::Inline(b"2")));
        assert!(add_node(&mut p, 0, b"a", NodeValue::Inline(b"1")));
        assert!(add_node(&mut p, 2, b"c", NodeValue::Inline(b"3")));
        assert_eq!(p.node_key(0), b"a");
        assert_eq!(p.node_key(1), b"b");
        assert_eq!(p.node_key(2), b"c");
    }

    #[test]
    fn delete_reclaims_space_and_shifts_slots() {
        let mut p = leaf_page();
        add_node(&mut p, 0, b"a", NodeValue::Inline(b"1"));
        add_node(&mut p, 1, b"b", NodeValue::Inline(b"2"));
        add_node(&mut p, 2, b"c", NodeValue::Inline(b"3"));
        let free_before = p.free_bytes();
        delete_node(&mut p, 1);
        assert_eq!(p.num_slots(), 2);
        assert_eq!(p.node_key(0), b"a");
        assert_eq!(p.node_key(1), b"c");
        assert!(p.free_bytes() > free_before);
    }

    #[test]
    fn update_key_grow_and_shrink() {
        let mut p = leaf_page();
        add_node(&mut p, 0, b"a", NodeValue::Inline(b"1"));
        add_node(&mut p, 1, b"bb", NodeValue::Inline(b"2"));
        update_key(&mut p, 0, b"aaaa");
        assert_eq!(p.node_key(0), b"aaaa");
        assert_eq!(p.node_key(1), b"bb");
        match p.node_value(1) {
            NodeValueRef::Inline(v) => assert_eq!(v, b"2"),
            _ => panic!("expected inline"),
        }
        update_key(&mut p, 0, b"a");
        assert_eq!(p.node_key(0), b"a");
        assert_eq!(p.node_key(1), b"bb");
    }

    #[test]
    fn add_node_fails_when_full() {
        let mut p = Page::zeroed(PAGEHDRSZ + NODE_HDR_SIZE + 4 + SLOT_SIZE);
        p.init_node_page(PageFlags::LEAF);
        assert!(add_node(&mut p, 0, b"a", NodeValue::Inline(b"1")));
        assert!(!add_node(&mut p, 1, b"b", NodeValue::Inline(b"2")));
    }

    #[test]
    fn branch_node_stores_child_pgno() {
        let mut p = Page::zeroed(512);
        p.init_node_page(PageFlags::BRANCH);
        assert!(add_node(&mut p, 0, b"", NodeValue::Child(7)));
        assert!(add_node(&mut p, 1, b"m", NodeValue::Child(8)));
        assert_eq!(p.node_child(0), 7);
        assert_eq!(p.node_child(1), 8);
        assert_eq!(p.node_key(0), b"");
        assert_eq!(p.node_key(1), b"m");
    }
}

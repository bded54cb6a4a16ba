//! Prefix engine: per-page common key prefixes, derived from the
//! surrounding ancestor separators rather than stored explicitly on the
//! page.
//!
//! A page's effective prefix is the longest common prefix of the nearest
//! ancestor separator strictly below it (its lower bound) and the nearest
//! ancestor separator strictly above it (its upper bound). Keys are
//! physically stored on the page with that prefix stripped; `full_key`
//! reconstructs the original bytes on read.

use crate::config::PageFlags;
use crate::node::{update_key, NodeValueRef};
use crate::page::Page;
use crate::util::common_prefix_len;

/// Effective prefix for a page given its nearest ancestor bounds.
///
/// `left`/`right` are `None` when no ancestor separator bounds that side
/// (the page is the global leftmost/rightmost page of the tree on that
/// side). When exactly one bound is known the prefix is empty -- it would
/// be unsafe to assume anything about keys beyond the missing bound. When
/// neither bound is known (an unconstrained page, i.e. the root of a
/// single-page tree) the parent's current prefix is inherited as the
/// least-surprising default.
pub fn compute_prefix(left: Option<&[u8]>, right: Option<&[u8]>, parent_prefix: &[u8]) -> Vec<u8> {
    match (left, right) {
        (Some(l), Some(r)) => {
            let n = common_prefix_len(l, r);
            l[..n].to_vec()
        }
        (None, None) => parent_prefix.to_vec(),
        _ => Vec::new(),
    }
}

/// Reconstruct a node's full key from the page's current prefix and its
/// stored (stripped) bytes.
pub fn full_key(prefix: &[u8], stored: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + stored.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(stored);
    out
}

/// Strip a page's current prefix off a full key before storing/comparing
/// against the page's already-stripped node keys.
pub fn strip_prefix<'a>(prefix: &[u8], full: &'a [u8]) -> &'a [u8] {
    debug_assert!(full.starts_with(prefix));
    &full[prefix.len()..]
}

/// Re-key every node on `page` after its effective prefix changed from
/// `old_prefix` to `new_prefix`.
///
/// `old_prefix.len() < new_prefix.len()` (the prefix grew): each stored
/// key is shortened by the extra bytes now implied by the larger prefix.
/// `old_prefix.len() > new_prefix.len()` (the prefix shrank): each stored
/// key is lengthened by re-prepending the bytes that fell out of the
/// prefix. Branch slot 0, whose key is always the empty "-inf" key, is
/// left untouched.
pub fn adjust_prefix(page: &mut Page, old_prefix: &[u8], new_prefix: &[u8]) {
    if old_prefix == new_prefix {
        return;
    }
    debug_assert!(
        old_prefix.starts_with(new_prefix) || new_prefix.starts_with(old_prefix),
        "prefix change must be a pure grow or shrink"
    );
    let is_branch = page.is_branch();
    let n = page.num_slots();
    let start = if is_branch { 1 } else { 0 };
    for slot in start..n {
        let stored = page.node_key(slot).to_vec();
        let full = full_key(old_prefix, &stored);
        let restored = strip_prefix(new_prefix, &full).to_vec();
        update_key(page, slot, &restored);
    }
}

/// Truncate `sep` to the shortest prefix of itself that still compares
/// greater than `min` (one byte past the first differing position, or one
/// byte past `min`'s length if `min` is itself a prefix of `sep`).
pub fn reduce_separator(min: &[u8], sep: &[u8]) -> Vec<u8> {
    debug_assert!(min < sep);
    let common = common_prefix_len(min, sep);
    let cut = (common + 1).min(sep.len());
    sep[..cut].to_vec()
}

/// Read back a leaf node's full key, for callers outside the node module
/// that already know the page's prefix.
pub fn leaf_full_key(page: &Page, slot: usize, prefix: &[u8]) -> Vec<u8> {
    full_key(prefix, page.node_key(slot))
}

/// Read back a leaf node's inline value, or `None` if it is overflowed.
pub fn leaf_inline_value(page: &Page, slot: usize) -> Option<Vec<u8>> {
    match page.node_value(slot) {
        NodeValueRef::Inline(v) => Some(v.to_vec()),
        NodeValueRef::Overflow(_) => None,
    }
}

pub fn is_leaf(page: &Page) -> bool {
    page.flags().contains(PageFlags::LEAF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageFlags;
    use crate::node::{add_node, NodeValue};

    #[test]
    fn compute_prefix_both_bounds() {
        let p = compute_prefix(Some(b"apple"), Some(b"application"), b"");
        assert_eq!(p, b"app");
    }

    #[test]
    fn compute_prefix_one_bound_is_empty() {
        assert_eq!(compute_prefix(Some(b"apple"), None, b"xy"), Vec::<u8>::new());
        assert_eq!(compute_prefix(None, Some(b"apple"), b"xy"), Vec::<u8>::new());
    }

    #[test]
    fn compute_prefix_no_bounds_inherits_parent() {
        assert_eq!(compute_prefix(None, None, b"xy"), b"xy");
    }

    #[test]
    fn reduce_separator_picks_first_differing_byte() {
        assert_eq!(reduce_separator(b"apple", b"banana"), b"b");
        assert_eq!(reduce_separator(b"abc", b"abd"), b"abd");
    }

    #[test]
    fn reduce_separator_when_min_is_prefix_of_sep() {
        assert_eq!(reduce_separator(b"app", b"apple"), b"appl");
    }

    #[test]
    fn adjust_prefix_grow_then_shrink_round_trips() {
        let mut page = Page::zeroed(512);
        page.init_node_page(PageFlags::LEAF);
        add_node(&mut page, 0, b"apple", NodeValue::Inline(b"1"));
        add_node(&mut page, 1, b"apricot", NodeValue::Inline(b"2"));

        adjust_prefix(&mut page, b"", b"ap");
        assert_eq!(page.node_key(0), b"ple");
        assert_eq!(page.node_key(1), b"ricot");

        adjust_prefix(&mut page, b"ap", b"");
        assert_eq!(page.node_key(0), b"apple");
        assert_eq!(page.node_key(1), b"apricot");
    }

    #[test]
    fn adjust_prefix_skips_branch_slot_zero() {
        let mut page = Page::zeroed(512);
        page.init_node_page(PageFlags::BRANCH);
        add_node(&mut page, 0, b"", NodeValue::Child(1));
        add_node(&mut page, 1, b"apple", NodeValue::Child(2));
        adjust_prefix(&mut page, b"", b"ap");
        assert_eq!(page.node_key(0), b"");
        assert_eq!(page.node_key(1), b"ple");
    }
}

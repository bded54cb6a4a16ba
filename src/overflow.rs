//! Overflow pages: a singly-linked chain of pages holding one value that
//! is too large to live inline in a leaf node.
//!
//! Layout: common header (pgno/flags), then a `u32 next_pgno` (0 means end
//! of chain) and, on the head page only, a `u32 total_len` recording the
//! full value length so a reader knows how many trailing bytes of the
//! final page actually belong to the value. Every non-head page fills its
//! data region completely except possibly the last.

use crate::page::{Page, COMMON_HDR_SIZE};

const NEXT_PGNO_OFF: usize = COMMON_HDR_SIZE;
const TOTAL_LEN_OFF: usize = COMMON_HDR_SIZE + 4;
/// Header present only on the chain's head page.
const HEAD_HDR_SIZE: usize = 4 + 4;
/// Header present on every non-head page.
const TAIL_HDR_SIZE: usize = 4;

pub fn head_capacity(psize: usize) -> usize {
    psize - HEAD_HDR_SIZE
}

pub fn tail_capacity(psize: usize) -> usize {
    psize - TAIL_HDR_SIZE
}

/// Number of pages needed to store a value of `len` bytes.
pub fn chain_len(psize: usize, len: usize) -> usize {
    let head_cap = head_capacity(psize);
    if len <= head_cap {
        return 1;
    }
    1 + crate::util::div_ceil(len - head_cap, tail_capacity(psize))
}

/// Split `value` into page-sized chunks ready to be written into a freshly
/// allocated chain of pgnos (`pgnos[0]` is the head).
pub fn build_chain(psize: usize, value: &[u8], pgnos: &[crate::config::Pgno]) -> Vec<Page> {
    assert_eq!(pgnos.len(), chain_len(psize, value.len()));
    let mut pages = Vec::with_capacity(pgnos.len());
    let mut pos = 0usize;
    for (i, &pgno) in pgnos.iter().enumerate() {
        let mut page = Page::zeroed(psize as u32);
        page.set_pgno(pgno);
        page.set_flags(crate::config::PageFlags::OVERFLOW);
        let next = pgnos.get(i + 1).copied().unwrap_or(crate::config::INVALID_PGNO);
        page.set_u32(NEXT_PGNO_OFF, if i + 1 < pgnos.len() { next } else { 0 });
        let (hdr_size, cap) = if i == 0 {
            page.set_u32(TOTAL_LEN_OFF, value.len() as u32);
            (HEAD_HDR_SIZE, head_capacity(psize))
        } else {
            (TAIL_HDR_SIZE, tail_capacity(psize))
        };
        let take = cap.min(value.len() - pos);
        page.data[hdr_size..hdr_size + take].copy_from_slice(&value[pos..pos + take]);
        pos += take;
        pages.push(page);
    }
    debug_assert_eq!(pos, value.len());
    pages
}

pub fn next_pgno(page: &Page) -> crate::config::Pgno {
    page.get_u32(NEXT_PGNO_OFF)
}

/// Rewrite a chain page's `next_pgno` link, used by compaction once the
/// successor's post-renumbering pgno is known.
pub fn set_next_pgno(page: &mut Page, next: crate::config::Pgno) {
    page.set_u32(NEXT_PGNO_OFF, next);
}

/// Read the full value out of a chain, given the head page and a callback
/// to fetch subsequent pages by pgno.
pub fn read_chain<F>(head: &Page, mut fetch: F) -> crate::Result<Vec<u8>>
where
    F: FnMut(crate::config::Pgno) -> crate::Result<Page>,
{
    let total_len = head.get_u32(TOTAL_LEN_OFF) as usize;
    let mut out = Vec::with_capacity(total_len);
    let psize = head.psize();

    let take = head_capacity(psize).min(total_len);
    out.extend_from_slice(&head.data[HEAD_HDR_SIZE..HEAD_HDR_SIZE + take]);

    let mut next = next_pgno(head);
    while out.len() < total_len {
        if next == 0 {
            return Err(crate::Error::Corrupted(
                "overflow chain ended before total_len bytes were read".into(),
            ));
        }
        let page = fetch(next)?;
        let remaining = total_len - out.len();
        let take = tail_capacity(psize).min(remaining);
        out.extend_from_slice(&page.data[TAIL_HDR_SIZE..TAIL_HDR_SIZE + take]);
        next = next_pgno(&page);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageFlags;

    #[test]
    fn single_page_chain_round_trips() {
        let psize = 256;
        let value = vec![7u8; head_capacity(psize)];
        let pgnos = vec![5];
        let pages = build_chain(psize, &value, &pgnos);
        assert_eq!(pages.len(), 1);
        assert!(pages[0].flags().contains(PageFlags::OVERFLOW));
        let out = read_chain(&pages[0], |_| unreachable!()).unwrap();
        assert_eq!(out, value);
    }

    #[test]
    fn multi_page_chain_round_trips() {
        let psize = 256;
        let value: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        let n = chain_len(psize, value.len());
        assert!(n > 1);
        let pgnos: Vec<_> = (10..10 + n as u32).collect();
        let pages = build_chain(psize, &value, &pgnos);
        let rest = pages.clone();
        let out = read_chain(&pages[0], |pgno| {
            rest.iter()
                .find(|p| p.pgno() == pgno)
                .cloned()
                .ok_or(crate::Error::NotFound)
        })
        .unwrap();
        assert_eq!(out, value);
    }
}

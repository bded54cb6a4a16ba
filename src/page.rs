//! Raw page storage and the fields common to every page type.
//!
//! Every page starts with a six-byte common prefix (`pgno`, `flags`, one
//! reserved pad byte) followed by a four-byte region whose meaning depends
//! on the page's flags: `lower`/`upper` free-space offsets for BRANCH/LEAF,
//! or a single `next_pgno` for OVERFLOW. BRANCH and LEAF pages therefore
//! have a ten-byte header (`PAGEHDRSZ`); OVERFLOW and META pages lay out
//! their own fields after the six-byte prefix.

use crate::config::{PageFlags, Pgno};

/// Size of the common `pgno` + `flags` + pad prefix shared by every page.
pub const COMMON_HDR_SIZE: usize = 6;

/// Header size for BRANCH/LEAF pages: common prefix plus `lower`/`upper`.
pub const PAGEHDRSZ: usize = COMMON_HDR_SIZE + 4;

/// Bytes used by one slot-array entry (a 16-bit payload offset).
pub const SLOT_SIZE: usize = 2;

/// An in-memory, owned copy of one page's raw bytes.
///
/// `Page` only knows about the fields every page type shares; the
/// BRANCH/LEAF slot array and node payloads live in [`crate::node`], the
/// overflow chain fields live in [`crate::overflow`], and the meta page
/// fields live in [`crate::meta`].
#[derive(Clone)]
pub struct Page {
    pub data: Box<[u8]>,
}

impl Page {
    /// Allocate a zeroed page of the given size.
    pub fn zeroed(psize: u32) -> Page {
        Page {
            data: vec![0u8; psize as usize].into_boxed_slice(),
        }
    }

    /// Wrap an existing byte buffer (e.g. just read from disk).
    pub fn from_bytes(data: Box<[u8]>) -> Page {
        Page { data }
    }

    pub fn psize(&self) -> usize {
        self.data.len()
    }

    pub fn pgno(&self) -> Pgno {
        u32::from_le_bytes(self.data[0..4].try_into().unwrap())
    }

    pub fn set_pgno(&mut self, pgno: Pgno) {
        self.data[0..4].copy_from_slice(&pgno.to_le_bytes());
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.data[4])
    }

    pub fn set_flags(&mut self, flags: PageFlags) {
        self.data[4] = flags.bits();
    }

    pub fn is_branch(&self) -> bool {
        self.flags().contains(PageFlags::BRANCH)
    }

    pub fn is_leaf(&self) -> bool {
        self.flags().contains(PageFlags::LEAF)
    }

    pub fn is_overflow(&self) -> bool {
        self.flags().contains(PageFlags::OVERFLOW)
    }

    pub fn is_meta(&self) -> bool {
        self.flags().contains(PageFlags::META)
    }

    // -- BRANCH/LEAF free-space bounds --

    pub fn lower(&self) -> u16 {
        self.get_u16(COMMON_HDR_SIZE)
    }

    pub fn set_lower(&mut self, v: u16) {
        self.set_u16(COMMON_HDR_SIZE, v);
    }

    pub fn upper(&self) -> u16 {
        self.get_u16(COMMON_HDR_SIZE + 2)
    }

    pub fn set_upper(&mut self, v: u16) {
        self.set_u16(COMMON_HDR_SIZE + 2, v);
    }

    pub fn num_slots(&self) -> usize {
        (self.lower() as usize - PAGEHDRSZ) / SLOT_SIZE
    }

    pub fn free_bytes(&self) -> usize {
        self.upper() as usize - self.lower() as usize
    }

    /// Reset an empty BRANCH/LEAF page's free-space bounds.
    pub fn init_node_page(&mut self, flags: PageFlags) {
        self.set_flags(flags);
        self.set_lower(PAGEHDRSZ as u16);
        self.set_upper(self.psize() as u16);
    }

    // -- shared byte helpers --

    pub fn get_u16(&self, off: usize) -> u16 {
        u16::from_le_bytes(self.data[off..off + 2].try_into().unwrap())
    }

    pub fn set_u16(&mut self, off: usize, v: u16) {
        self.data[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn get_u32(&self, off: usize) -> u32 {
        u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap())
    }

    pub fn set_u32(&mut self, off: usize, v: u32) {
        self.data[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn get_u64(&self, off: usize) -> u64 {
        u64::from_le_bytes(self.data[off..off + 8].try_into().unwrap())
    }

    pub fn set_u64(&mut self, off: usize, v: u64) {
        self.data[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Validate that the page's self-stored `pgno` matches its expected
    /// position, used after a positioned read to detect short/torn reads.
    pub fn check_pgno(&self, expected: Pgno) -> bool {
        self.pgno() == expected
    }
}

/// The fixed-format header page written once at file creation (page 0).
pub struct HeaderPage {
    pub magic: u32,
    pub version: u32,
    pub flags: PageFlags,
    pub psize: u32,
}

impl HeaderPage {
    pub fn encode(&self) -> Page {
        let mut page = Page::zeroed(self.psize);
        page.set_pgno(0);
        page.set_flags(PageFlags::HEAD);
        page.set_u32(COMMON_HDR_SIZE, self.magic);
        page.set_u32(COMMON_HDR_SIZE + 4, self.version);
        page.set_u32(COMMON_HDR_SIZE + 8, self.psize);
        page
    }

    pub fn decode(page: &Page) -> crate::Result<HeaderPage> {
        if !page.flags().contains(PageFlags::HEAD) {
            return Err(crate::Error::Corrupted("missing HEAD flag on page 0".into()));
        }
        let magic = page.get_u32(COMMON_HDR_SIZE);
        let version = page.get_u32(COMMON_HDR_SIZE + 4);
        let psize = page.get_u32(COMMON_HDR_SIZE + 8);
        if magic != crate::config::MAGIC {
            return Err(crate::Error::Corrupted(format!(
                "bad magic {magic:#x}, expected {:#x}",
                crate::config::MAGIC
            )));
        }
        Ok(HeaderPage {
            magic,
            version,
            flags: page.flags(),
            psize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_page_round_trips() {
        let hdr = HeaderPage {
            magic: crate::config::MAGIC,
            version: crate::config::VERSION,
            flags: PageFlags::HEAD,
            psize: 4096,
        };
        let page = hdr.encode();
        let decoded = HeaderPage::decode(&page).unwrap();
        assert_eq!(decoded.magic, crate::config::MAGIC);
        assert_eq!(decoded.version, crate::config::VERSION);
        assert_eq!(decoded.psize, 4096);
    }

    #[test]
    fn header_page_rejects_bad_magic() {
        let mut page = Page::zeroed(4096);
        page.set_flags(PageFlags::HEAD);
        page.set_u32(COMMON_HDR_SIZE, 0xDEAD_BEEF);
        assert!(HeaderPage::decode(&page).is_err());
    }

    #[test]
    fn node_page_bounds_invariant_holds_on_init() {
        let mut page = Page::zeroed(4096);
        page.init_node_page(PageFlags::LEAF);
        assert!(PAGEHDRSZ <= page.lower() as usize);
        assert!(page.lower() <= page.upper());
        assert!(page.upper() as usize <= page.psize());
        assert_eq!(page.num_slots(), 0);
    }
}

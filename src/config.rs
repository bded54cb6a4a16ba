//! Shared constants, type aliases, and page-level flag bits for the
//! on-disk format.

use bitflags::bitflags;

/// Page number; doubles as a file offset in units of `psize`.
pub type Pgno = u32;

/// Page number meaning "no page" / an invalid reference.
pub const INVALID_PGNO: Pgno = Pgno::MAX;

/// Magic value stamped into the header page.
pub const MAGIC: u32 = 0xB3DB_B3DB;

/// On-disk format version.
pub const VERSION: u32 = 4;

/// Default page size used when creating a new file and the filesystem's
/// optimal block size can't be determined.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Largest page size this engine will ever pick at creation time.
pub const MAX_PAGE_SIZE: u32 = 32 * 1024;

/// Smallest page size accepted on an existing file.
pub const MIN_PAGE_SIZE: u32 = 512;

/// Keys longer than this are rejected with `InvalidArgument`.
pub const MAX_KEY_LEN: usize = 255;

/// Default bound on the number of cached pages.
pub const DEFAULT_MAX_CACHE: usize = 1024;

/// Up to this many dirty pages are written per gathered-write batch at commit.
pub const COMMIT_BATCH: usize = 64;

/// Page fill factor threshold (parts per thousand) below which a page
/// becomes a rebalance candidate.
pub const FILL_THRESHOLD_PPT: u32 = 250;

/// Divisor applied to `psize` to obtain the overflow threshold: a leaf
/// value at least `psize / MIN_KEYS` bytes is pushed onto an overflow chain.
pub const MIN_KEYS: u32 = 4;

bitflags! {
    /// Page type / role flags stored in every page's header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PageFlags: u8 {
        const BRANCH   = 0x01;
        const LEAF     = 0x02;
        const OVERFLOW = 0x04;
        const META     = 0x08;
        const HEAD     = 0x10;
    }
}

bitflags! {
    /// Flags stored on a meta page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MetaFlags: u8 {
        const TOMBSTONE = 0x01;
    }
}

bitflags! {
    /// Per-node flags inside a BRANCH/LEAF page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        const BIGDATA = 0x01;
    }
}

bitflags! {
    /// Caller-facing open flags (`DbOptions`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u8 {
        const NOSYNC = 0x01;
        const RDONLY = 0x02;
    }
}

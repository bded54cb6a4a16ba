//! Positioned, page-granular file I/O. The engine only ever appends: a
//! page is written once at `pgno * psize` and never rewritten in place.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::config::Pgno;
use crate::page::Page;
use crate::{Error, Result};

/// Read one page at its canonical offset, verifying the page's self-stored
/// `pgno` matches what was requested (catches short/torn reads).
pub fn read_page(file: &File, pgno: Pgno, psize: u32) -> Result<Page> {
    let mut buf = vec![0u8; psize as usize].into_boxed_slice();
    file.read_exact_at(&mut buf, pgno as u64 * psize as u64)
        .map_err(Error::from)?;
    let page = Page::from_bytes(buf);
    if !page.check_pgno(pgno) {
        return Err(Error::Corrupted(format!(
            "page {pgno}: self-stored pgno {} does not match",
            page.pgno()
        )));
    }
    Ok(page)
}

/// Read the header page (page 0) without pgno validation -- the header
/// page's own `pgno` field is always zero, which matches anyway, but it is
/// read before the engine otherwise trusts `psize`.
pub fn read_header_raw(file: &File, psize: u32) -> Result<Page> {
    let mut buf = vec![0u8; psize as usize].into_boxed_slice();
    file.read_exact_at(&mut buf, 0).map_err(Error::from)?;
    Ok(Page::from_bytes(buf))
}

/// Append a batch of whole pages via a single gathered write. Callers
/// guarantee `pages[i].pgno()` is contiguous and equal to the current
/// end-of-file in page units.
pub fn write_pages(file: &File, pages: &[Page]) -> Result<()> {
    for page in pages {
        let off = page.pgno() as u64 * page.psize() as u64;
        file.write_all_at(&page.data, off).map_err(Error::from)?;
    }
    Ok(())
}

/// Current file length in whole pages, rounding down. Used both to derive
/// the next allocatable pgno and to detect a torn-commit tail.
pub fn file_len_pages(file: &File, psize: u32) -> Result<(u64, bool)> {
    let len = file.metadata().map_err(Error::from)?.len();
    let whole = len / psize as u64;
    let torn = len % psize as u64 != 0;
    Ok((whole, torn))
}

/// Truncate a torn commit tail back down to the last whole page boundary.
/// Called once, lazily, before the first write of a writer transaction.
pub fn fix_pad(file: &File, psize: u32) -> Result<()> {
    let (whole, torn) = file_len_pages(file, psize)?;
    if torn {
        file.set_len(whole * psize as u64).map_err(Error::from)?;
    }
    Ok(())
}

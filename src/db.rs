//! Top-level database handle: owns the file, the page cache, the current
//! committed meta, and the single-writer bookkeeping.

use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::cache::Cache;
use crate::config::{
    DEFAULT_MAX_CACHE, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, OpenFlags,
};
use crate::disk;
use crate::meta::{self, MetaPage};
use crate::page::HeaderPage;
use crate::txn::Txn;
use crate::{Error, Result};

/// Open-time configuration. Mirrors the `OpenOptions`-builder shape
/// common to embedded storage engines in this corpus, but as a plain
/// struct with a `Default` impl rather than a fluent builder, since the
/// field set here is small and unlikely to grow.
#[derive(Clone, Debug)]
pub struct DbOptions {
    /// Open the file read-only; all transactions begun on it are
    /// read-only regardless of what the caller requests from `begin`.
    pub read_only: bool,
    /// Skip the fsync calls around commit. Trades durability for
    /// throughput; a crash can lose committed-but-unsynced revisions.
    pub no_sync: bool,
    /// Page size used only when creating a new file. `None` picks the
    /// filesystem's reported block size, capped at 32 KiB. Ignored when
    /// reopening an existing file -- the header page's stamped size
    /// always wins.
    pub page_size: Option<u32>,
    /// Initial bound on the number of cached pages.
    pub max_cache: usize,
}

impl Default for DbOptions {
    fn default() -> DbOptions {
        DbOptions {
            read_only: false,
            no_sync: false,
            page_size: None,
            max_cache: DEFAULT_MAX_CACHE,
        }
    }
}

impl DbOptions {
    pub(crate) fn flags(&self) -> OpenFlags {
        let mut f = OpenFlags::empty();
        if self.read_only {
            f |= OpenFlags::RDONLY;
        }
        if self.no_sync {
            f |= OpenFlags::NOSYNC;
        }
        f
    }
}

pub struct Db {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
    pub(crate) psize: u32,
    pub(crate) cache: RefCell<Cache>,
    pub(crate) meta: Cell<MetaPage>,
    pub(crate) meta_pgno: Cell<crate::config::Pgno>,
    pub(crate) options: DbOptions,
    pub(crate) writer_active: Cell<bool>,
}

impl Db {
    pub fn open(path: impl AsRef<Path>, options: DbOptions) -> Result<Db> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(!options.read_only)
            .create(!options.read_only)
            .open(&path)?;

        let len = file.metadata()?.len();
        let (psize, created) = if len == 0 {
            let psize = pick_page_size(&options, &path);
            let header = HeaderPage {
                magic: crate::config::MAGIC,
                version: crate::config::VERSION,
                flags: crate::config::PageFlags::HEAD,
                psize,
            };
            disk::write_pages(&file, std::slice::from_ref(&header.encode()))?;
            meta::write_meta(&file, 1, &MetaPage::empty(), psize)?;
            file.sync_all()?;
            (psize, true)
        } else {
            let raw = disk::read_header_raw(&file, MIN_PAGE_SIZE)?;
            let header = HeaderPage::decode(&raw)?;
            (header.psize, false)
        };

        let (meta_pgno, meta) = match meta::find_latest_meta(&file, psize)? {
            Some((pgno, meta)) => (pgno, meta),
            None => (1, MetaPage::empty()),
        };

        log::debug!(
            "opened {:?} ({}), psize={psize}, meta_pgno={meta_pgno}, revision={}",
            path,
            if created { "created" } else { "reopened" },
            meta.revisions
        );

        Ok(Db {
            file,
            path,
            psize,
            cache: RefCell::new(Cache::new(options.max_cache)),
            meta: Cell::new(meta),
            meta_pgno: Cell::new(meta_pgno),
            options,
            writer_active: Cell::new(false),
        })
    }

    pub fn open_default(path: impl AsRef<Path>) -> Result<Db> {
        Db::open(path, DbOptions::default())
    }

    pub fn set_cache_size(&self, n: usize) {
        self.cache.borrow_mut().set_max_cache(n);
    }

    pub fn sync(&self) -> Result<()> {
        if !self.options.no_sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    pub fn begin(&self, rdonly: bool) -> Result<Txn<'_>> {
        let rdonly = rdonly || self.options.read_only;
        if !rdonly {
            if self.writer_active.get() {
                return Err(Error::Busy);
            }
            if self.file.try_lock_exclusive().is_err() {
                log::warn!("database {:?} is locked by another writer", self.path);
                return Err(Error::Busy);
            }
            if let Err(e) = disk::fix_pad(&self.file, self.psize) {
                let _ = fs2::FileExt::unlock(&self.file);
                return Err(e);
            }
            self.writer_active.set(true);
        }
        let (total_pages, _) = disk::file_len_pages(&self.file, self.psize)?;
        Ok(Txn::new(self, rdonly, self.meta.get(), self.meta_pgno.get(), total_pages as crate::config::Pgno))
    }

    pub fn compact(&self) -> Result<()> {
        crate::compact::compact(self)
    }

    /// Flush and close. Equivalent to dropping the handle, spelled out for
    /// callers that want to observe the final sync's result.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    pub(crate) fn finish_writer(&self) {
        let _ = fs2::FileExt::unlock(&self.file);
        self.writer_active.set(false);
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if !self.options.no_sync {
            let _ = self.file.sync_all();
        }
    }
}

fn pick_page_size(options: &DbOptions, path: &Path) -> u32 {
    if let Some(p) = options.page_size {
        return p.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Some(dir) = path.parent() {
            if let Ok(meta) = std::fs::metadata(if dir.as_os_str().is_empty() {
                Path::new(".")
            } else {
                dir
            }) {
                let blk = meta.blksize() as u32;
                if blk > 0 {
                    return blk.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
                }
            }
        }
    }
    DEFAULT_PAGE_SIZE
}

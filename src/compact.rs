//! Offline compaction: rewrite a database into a fresh file with no
//! reclaimable garbage, then swap it in under the original path.
//!
//! Safe to run against pages reachable from a snapshotted root even while
//! a concurrent writer is active, because this engine never mutates a
//! committed page in place -- every structural change allocates a new
//! pgno (see `Txn::touch`). A page this pass is still reading can only
//! ever be superseded, never overwritten underneath it.

use std::fs::{File, OpenOptions};

use crate::config::{Pgno, PageFlags, MetaFlags, INVALID_PGNO};
use crate::db::Db;
use crate::disk;
use crate::meta::{self, MetaPage};
use crate::node::NodeValueRef;
use crate::overflow;
use crate::page::{HeaderPage, Page};
use crate::{Error, Result};

struct DestWriter<'f> {
    file: &'f File,
    next_pgno: Pgno,
}

impl<'f> DestWriter<'f> {
    fn alloc_and_write(&mut self, mut page: Page) -> Result<Pgno> {
        let pgno = self.next_pgno;
        self.next_pgno += 1;
        page.set_pgno(pgno);
        disk::write_pages(self.file, std::slice::from_ref(&page))?;
        Ok(pgno)
    }
}

pub fn compact(db: &Db) -> Result<()> {
    // Held only so a concurrent reader sees this compaction as an
    // in-progress operation; the actual traversal reads raw pages, which
    // is safe under the COW invariant above.
    let _read_txn = db.begin(true)?;
    let src_meta = db.meta.get();
    let src_path = db.path.clone();

    let tmp_name = format!(
        "{}.compact-{}.tmp",
        src_path.file_name().and_then(|n| n.to_str()).unwrap_or("db"),
        std::process::id()
    );
    let tmp_path = src_path.with_file_name(tmp_name);

    let dest_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    let header = HeaderPage {
        magic: crate::config::MAGIC,
        version: crate::config::VERSION,
        flags: PageFlags::HEAD,
        psize: db.psize,
    };
    disk::write_pages(&dest_file, std::slice::from_ref(&header.encode()))?;

    let mut writer = DestWriter { file: &dest_file, next_pgno: 1 };

    let new_root = if src_meta.root == INVALID_PGNO {
        INVALID_PGNO
    } else {
        copy_node(&db.file, db.psize, src_meta.root, &mut writer)?
    };

    let mut new_meta = src_meta;
    new_meta.root = new_root;
    new_meta.revisions = 0;
    new_meta.prev_meta = INVALID_PGNO;
    new_meta.created_at = meta::now_unix();
    new_meta.flags = MetaFlags::empty();

    let src_pages = writer.next_pgno;
    let meta_pgno = writer.next_pgno;
    meta::write_meta(&dest_file, meta_pgno, &new_meta, db.psize)?;
    dest_file.sync_all().map_err(Error::from)?;

    log::info!(
        "compact: {:?} rewritten into {} pages (branch={}, leaf={}, overflow={})",
        src_path,
        src_pages,
        new_meta.branch_pages,
        new_meta.leaf_pages,
        new_meta.overflow_pages
    );

    drop(dest_file);
    std::fs::rename(&tmp_path, &src_path)?;

    let tombstone = MetaPage {
        flags: MetaFlags::TOMBSTONE,
        ..src_meta
    };
    let (total_pages, _) = disk::file_len_pages(&db.file, db.psize)?;
    meta::write_meta(&db.file, total_pages as Pgno, &tombstone, db.psize)?;
    db.file.sync_all().map_err(Error::from)?;

    Ok(())
}

/// Copy one BRANCH/LEAF page (and everything under it) to the
/// destination, rewriting every child/overflow-head pgno to its
/// post-renumbering value first.
fn copy_node(src: &File, psize: u32, pgno: Pgno, dest: &mut DestWriter) -> Result<Pgno> {
    let mut page = disk::read_page(src, pgno, psize)?;

    if page.is_branch() {
        let n = page.num_slots();
        for slot in 0..n {
            let child = page.node_child(slot);
            let new_child = copy_node(src, psize, child, dest)?;
            page.set_node_payload_field(slot, new_child);
        }
    } else if page.is_leaf() {
        let n = page.num_slots();
        for slot in 0..n {
            if let NodeValueRef::Overflow(head) = page.node_value(slot) {
                let new_head = copy_overflow_chain(src, psize, head, dest)?;
                page.set_node_payload_field(slot, new_head);
            }
        }
    }

    dest.alloc_and_write(page)
}

/// Copy one overflow chain, tail-first, so each page's `next_pgno` can be
/// rewritten to its successor's already-known post-renumbering pgno.
fn copy_overflow_chain(src: &File, psize: u32, pgno: Pgno, dest: &mut DestWriter) -> Result<Pgno> {
    let mut page = disk::read_page(src, pgno, psize)?;
    let next = overflow::next_pgno(&page);
    if next != 0 {
        let new_next = copy_overflow_chain(src, psize, next, dest)?;
        overflow::set_next_pgno(&mut page, new_next);
    }
    dest.alloc_and_write(page)
}

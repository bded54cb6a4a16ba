use std::path::Path;

use cowkv::{Db, DbOptions};

fn open(path: &Path) -> Db {
    Db::open(path, DbOptions::default()).unwrap()
}

#[test]
fn get_on_empty_tree_returns_none() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("empty.db"));
    let txn = db.begin(true).unwrap();
    assert_eq!(txn.get(b"missing").unwrap(), None);
}

#[test]
fn put_get_commit_reopen_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("basic.db");
    {
        let db = open(&path);
        let txn = db.begin(false).unwrap();
        txn.put(b"1", b"one").unwrap();
        txn.put(b"2", b"two").unwrap();
        txn.put(b"3", b"three").unwrap();
        assert_eq!(txn.get(b"1").unwrap().unwrap(), b"one");
        txn.commit().unwrap();
    }
    {
        let db = open(&path);
        let txn = db.begin(true).unwrap();
        assert_eq!(txn.get(b"1").unwrap().unwrap(), b"one");
        assert_eq!(txn.get(b"2").unwrap().unwrap(), b"two");
        assert_eq!(txn.get(b"3").unwrap().unwrap(), b"three");
        assert_eq!(txn.get(b"4").unwrap(), None);
    }
}

#[test]
fn put_overwrites_existing_value() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("overwrite.db"));

    let txn = db.begin(false).unwrap();
    txn.put(b"k", b"v1").unwrap();
    txn.commit().unwrap();

    let txn = db.begin(false).unwrap();
    txn.put(b"k", b"v2-longer-value").unwrap();
    assert_eq!(txn.get(b"k").unwrap().unwrap(), b"v2-longer-value");
    let entries_before = txn.entries();
    txn.commit().unwrap();

    let txn = db.begin(true).unwrap();
    assert_eq!(txn.entries(), entries_before);
    assert_eq!(txn.get(b"k").unwrap().unwrap(), b"v2-longer-value");
}

#[test]
fn delete_removes_key_and_returns_prior_value() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("delete.db"));

    let txn = db.begin(false).unwrap();
    txn.put(b"a", b"1").unwrap();
    txn.put(b"b", b"2").unwrap();
    txn.commit().unwrap();

    let txn = db.begin(false).unwrap();
    let old = txn.delete(b"a").unwrap();
    assert_eq!(old, b"1");
    assert!(matches!(txn.delete(b"a"), Err(cowkv::Error::NotFound)));
    txn.commit().unwrap();

    let txn = db.begin(true).unwrap();
    assert_eq!(txn.get(b"a").unwrap(), None);
    assert_eq!(txn.get(b"b").unwrap().unwrap(), b"2");
}

#[test]
fn cursor_iterates_keys_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("cursor.db"));

    let txn = db.begin(false).unwrap();
    for k in ["banana", "apple", "cherry", "date"] {
        txn.put(k.as_bytes(), b"v").unwrap();
    }
    txn.commit().unwrap();

    let txn = db.begin(true).unwrap();
    let mut cursor = txn.cursor().unwrap();
    let mut seen = Vec::new();
    let mut has_row = cursor.first().unwrap();
    while has_row {
        seen.push(cursor.key().unwrap().unwrap());
        has_row = cursor.next().unwrap();
    }
    assert_eq!(seen, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec(), b"date".to_vec()]);
}

#[test]
fn cursor_set_lands_on_smallest_key_greater_or_equal() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("cursor_set.db"));

    let txn = db.begin(false).unwrap();
    for k in ["a", "c", "e"] {
        txn.put(k.as_bytes(), b"v").unwrap();
    }
    txn.commit().unwrap();

    let txn = db.begin(true).unwrap();
    let mut cursor = txn.cursor().unwrap();
    assert!(cursor.set(b"b").unwrap());
    assert_eq!(cursor.key().unwrap().unwrap(), b"c");

    assert!(!cursor.set_exact(b"b").unwrap());
    assert!(cursor.set_exact(b"c").unwrap());
    assert_eq!(cursor.key().unwrap().unwrap(), b"c");

    assert!(!cursor.set(b"z").unwrap());
}

#[test]
fn split_under_pressure_keeps_all_keys_readable() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("split.db"));

    let n = 10_000u32;
    let txn = db.begin(false).unwrap();
    for i in 0..n {
        let key = format!("key-{i:06}");
        let value = format!("value-{i}");
        txn.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
    assert_eq!(txn.entries(), n as u64);
    txn.commit().unwrap();

    let txn = db.begin(true).unwrap();
    assert_eq!(txn.entries(), n as u64);
    for i in (0..n).step_by(97) {
        let key = format!("key-{i:06}");
        let want = format!("value-{i}");
        assert_eq!(txn.get(key.as_bytes()).unwrap().unwrap(), want.as_bytes());
    }

    let mut cursor = txn.cursor().unwrap();
    let mut count = 0u32;
    let mut has_row = cursor.first().unwrap();
    let mut prev: Option<Vec<u8>> = None;
    while has_row {
        let key = cursor.key().unwrap().unwrap();
        if let Some(p) = &prev {
            assert_eq!(cowkv::cmp(p, &key), std::cmp::Ordering::Less);
        }
        prev = Some(key);
        count += 1;
        has_row = cursor.next().unwrap();
    }
    assert_eq!(count, n);
}

#[test]
fn overflow_value_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("overflow.db"));

    let big = vec![0xABu8; 50_000];
    let txn = db.begin(false).unwrap();
    txn.put(b"big", &big).unwrap();
    txn.put(b"small", b"tiny").unwrap();
    txn.commit().unwrap();

    let txn = db.begin(true).unwrap();
    assert_eq!(txn.get(b"big").unwrap().unwrap(), big);
    assert_eq!(txn.get(b"small").unwrap().unwrap(), b"tiny");
}

#[test]
fn deleting_most_keys_triggers_merges_and_stays_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("merge.db"));

    let n = 2_000u32;
    let txn = db.begin(false).unwrap();
    for i in 0..n {
        let key = format!("k{i:05}");
        txn.put(key.as_bytes(), b"v").unwrap();
    }
    txn.commit().unwrap();

    let txn = db.begin(false).unwrap();
    for i in 0..n {
        if i % 3 != 0 {
            let key = format!("k{i:05}");
            txn.delete(key.as_bytes()).unwrap();
        }
    }
    txn.commit().unwrap();

    let txn = db.begin(true).unwrap();
    for i in 0..n {
        let key = format!("k{i:05}");
        if i % 3 == 0 {
            assert!(txn.get(key.as_bytes()).unwrap().is_some(), "missing {key}");
        } else {
            assert!(txn.get(key.as_bytes()).unwrap().is_none(), "should be gone: {key}");
        }
    }
}

#[test]
fn compact_preserves_all_entries_and_shrinks_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compact.db");

    let n = 5_000u32;
    {
        let db = open(&path);
        let txn = db.begin(false).unwrap();
        for i in 0..n {
            let key = format!("k{i:05}");
            txn.put(key.as_bytes(), b"some value").unwrap();
        }
        txn.commit().unwrap();

        let txn = db.begin(false).unwrap();
        for i in 0..n {
            if i % 2 == 0 {
                let key = format!("k{i:05}");
                txn.delete(key.as_bytes()).unwrap();
            }
        }
        txn.commit().unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        db.compact().unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after <= before, "compaction should not grow the file");
    }

    let db = open(&path);
    let txn = db.begin(true).unwrap();
    for i in 0..n {
        let key = format!("k{i:05}");
        if i % 2 == 0 {
            assert_eq!(txn.get(key.as_bytes()).unwrap(), None);
        } else {
            assert_eq!(txn.get(key.as_bytes()).unwrap().unwrap(), b"some value");
        }
    }
}

#[test]
fn second_writer_is_rejected_while_one_is_active() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.db");
    let db = open(&path);

    let _writer = db.begin(false).unwrap();
    assert!(matches!(db.begin(false), Err(cowkv::Error::Busy)));
}

#[test]
fn reader_sees_pre_commit_snapshot_while_writer_is_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.db");
    let db = open(&path);

    let txn = db.begin(false).unwrap();
    txn.put(b"k", b"v1").unwrap();
    txn.commit().unwrap();

    let writer = db.begin(false).unwrap();
    writer.put(b"k", b"v2").unwrap();

    let reader = db.begin(true).unwrap();
    assert_eq!(reader.get(b"k").unwrap().unwrap(), b"v1");
    drop(reader);

    writer.commit().unwrap();
    let reader = db.begin(true).unwrap();
    assert_eq!(reader.get(b"k").unwrap().unwrap(), b"v2");
}

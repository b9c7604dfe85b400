//! Multi-node placement through a directory-backed transport

mod common;

use std::time::Duration;

use common::{age_records, cursors, files_under, Fixture};
use file_storage::{compute_hash, ErrorKind, StorageError};

#[test]
fn test_save_replicates_to_every_node() {
    let fixture = Fixture::new(true, &["node2", "node3"]);
    let bucket = fixture.bucket();

    let hashes = bucket
        .save(None, None, "orders.1", &mut cursors(&[b"replicated"]))
        .unwrap();
    let hash = &hashes[0];

    assert_eq!(std::fs::read(bucket.file_path(hash)).unwrap(), b"replicated");
    for addr in ["node2", "node3"] {
        let path = fixture.remote_path(addr, &bucket, hash);
        assert_eq!(std::fs::read(path).unwrap(), b"replicated");
    }
}

#[test]
fn test_remote_only_bucket_stages_uploads() {
    let fixture = Fixture::new(false, &["node2"]);
    let bucket = fixture.bucket();
    assert!(!bucket.nodes().is_local());

    let hash = bucket
        .save(None, None, "", &mut cursors(&[b"remote only"]))
        .unwrap()[0]
        .clone();

    assert!(!bucket.dir().exists());
    assert_eq!(
        std::fs::read(fixture.remote_path("node2", &bucket, &hash)).unwrap(),
        b"remote only"
    );
    // a remote-only bucket has nothing to open locally
    assert!(matches!(
        bucket.read_file(None, &hash, ""),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn test_collect_removes_from_every_node() {
    let fixture = Fixture::new(true, &["node2", "node3"]);
    let bucket = fixture.bucket();
    let hashes = bucket
        .save(None, None, "", &mut cursors(&[b"garbage", b"kept"]))
        .unwrap();
    bucket.link(None, "orders.1", &hashes[1..]).unwrap();

    age_records();
    assert_eq!(
        bucket.collect_garbage(Duration::ZERO).unwrap(),
        vec![hashes[0].clone()]
    );

    let kept = bucket.placement().relative_path(&hashes[1]);
    assert_eq!(files_under(bucket.dir()), vec![kept.clone()]);
    for addr in ["node2", "node3"] {
        assert_eq!(files_under(&fixture.transport.node_root(addr)), vec![kept.clone()]);
    }
}

#[test]
fn test_failed_replication_is_repaired_by_next_save() {
    let fixture = Fixture::new(true, &["node2", "node3"]);
    let bucket = fixture.bucket();
    fixture.transport.set_failing("node3", true);

    let err = bucket
        .save(None, None, "orders.1", &mut cursors(&[b"flaky"]))
        .unwrap_err();
    assert!(matches!(err, StorageError::Remote { ref addr, .. } if addr == "node3"));
    assert_eq!(err.kind(), ErrorKind::Storage);

    // the catalog commit stands, node3 has no copy
    let hash = compute_hash(b"flaky");
    assert!(bucket.file_info(None, &hash).unwrap().is_some());
    assert!(bucket.linked(None, "orders.1", &hash).unwrap());
    assert!(!fixture.remote_path("node3", &bucket, &hash).exists());

    fixture.transport.set_failing("node3", false);
    bucket
        .save(None, None, "orders.1", &mut cursors(&[b"flaky"]))
        .unwrap();
    assert_eq!(
        std::fs::read(fixture.remote_path("node3", &bucket, &hash)).unwrap(),
        b"flaky"
    );
}

#[test]
fn test_failed_collection_restores_rows() {
    let fixture = Fixture::new(true, &["node2"]);
    let bucket = fixture.bucket();
    let hash = bucket.save(None, None, "", &mut cursors(&[b"stuck"])).unwrap()[0].clone();

    age_records();
    fixture.transport.set_failing("node2", true);
    let err = bucket.collect_garbage(Duration::ZERO).unwrap_err();
    assert!(matches!(err, StorageError::Remote { .. }));
    // the row is restored, so the next cycle retries
    assert!(bucket.file_info(None, &hash).unwrap().is_some());

    fixture.transport.set_failing("node2", false);
    assert_eq!(bucket.collect_garbage(Duration::ZERO).unwrap(), vec![hash.clone()]);
    assert!(!fixture.remote_path("node2", &bucket, &hash).exists());
    assert!(!bucket.file_path(&hash).exists());
}

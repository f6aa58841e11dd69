//! Expired signatures are re-signed before and during reads

mod common;

use ::common::prelude::*;

const DAY: i64 = 24 * 60 * 60;

fn expired(nodes: &[Node]) -> usize {
    let now = chrono::Utc::now().timestamp();
    nodes.iter().filter(|n| n.is_expired(now)).count()
}

#[tokio::test]
async fn test_open_refreshes_and_persists() {
    let env = common::setup_test_env(false);
    let data = common::payload(common::CHUNK_SIZE * 4 + 1);

    env.platform.set_signature_ttl(-60);
    common::put(&env.fs, "/old", &data).await;
    env.platform.set_signature_ttl(DAY);

    let before = env.fs.nodes("/old").await.unwrap();
    assert_eq!(expired(&before), 5);

    assert_eq!(common::cat(&env.fs, "/old").await, data);
    // one lookup per channel holding expired chunks
    assert_eq!(env.platform.lookup_requests(), 3);

    let after = env.fs.nodes("/old").await.unwrap();
    assert_eq!(expired(&after), 0);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.url, new.url);
        assert_eq!(old.mid, new.mid);
        assert_eq!(old.index, new.index);
        assert_ne!(old.hm, new.hm);
    }

    // persisted, so the next open needs no lookup
    common::cat(&env.fs, "/old").await;
    assert_eq!(env.platform.lookup_requests(), 3);
}

#[tokio::test]
async fn test_unresolved_chunks_are_stale() {
    let env = common::setup_test_env(false);

    env.platform.set_signature_ttl(-60);
    common::put(&env.fs, "/old", &common::payload(common::CHUNK_SIZE * 3)).await;
    env.platform.set_signature_ttl(DAY);

    let nodes = env.fs.nodes("/old").await.unwrap();
    env.platform.hide_message(nodes[1].mid);

    match env.fs.open("/old", 0).await {
        Err(FsError::Stale { path, unresolved }) => {
            assert_eq!(path, "/old");
            assert_eq!(unresolved, [nodes[1].mid]);
        }
        other => panic!("expected a stale error, got {:?}", other.map(|_| ())),
    }

    // the chunks that could be re-signed were kept
    let stored = env.fs.nodes("/old").await.unwrap();
    assert_eq!(expired(&stored), 1);

    let report = env.fs.refresh("/old").await.unwrap();
    assert_eq!(report.refreshed, 0);
    assert_eq!(report.unresolved, [nodes[1].mid]);
}

#[tokio::test]
async fn test_reader_refreshes_while_reading() {
    let env = common::setup_test_env(true);
    let data = common::payload(common::CHUNK_SIZE * 2);
    common::put(&env.fs, "/f", &data).await;

    // signatures that expired after the file was opened
    let mut nodes = env.fs.nodes("/f").await.unwrap();
    for node in nodes.iter_mut() {
        node.ex = 0;
    }
    let mut reader = env.driver().new_reader(nodes, 0);
    assert_eq!(&reader.read_to_end().await.unwrap()[..], &data[..]);
    assert!(reader.is_refreshed());
    assert_eq!(expired(reader.nodes()), 0);

    let refreshed = reader.nodes().to_vec();
    env.fs.save_refreshed("/f", reader).await.unwrap();
    let stored = env.fs.nodes("/f").await.unwrap();
    assert_eq!(stored, refreshed);
}

#[tokio::test]
async fn test_explicit_refresh_of_fresh_file_is_a_no_op() {
    let env = common::setup_test_env(false);
    common::put(&env.fs, "/f", &common::payload(40)).await;

    let report = env.fs.refresh("/f").await.unwrap();
    assert_eq!(report, RefreshReport::default());
    assert_eq!(env.platform.lookup_requests(), 0);
}

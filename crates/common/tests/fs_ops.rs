//! Metadata operations through the filesystem facade

mod common;

use ::common::fs::path;
use ::common::prelude::*;

fn paths(files: &[File]) -> Vec<String> {
    files.iter().map(|f| f.path.clone()).collect()
}

#[tokio::test]
async fn test_mv_cascades_and_keeps_content() {
    let env = common::setup_test_env(false);
    env.fs.mkdir("/docs").await.unwrap();
    env.fs.mkdir("/docs/2024").await.unwrap();
    let data = common::payload(40);
    common::put(&env.fs, "/docs/2024/report", &data).await;

    env.fs.mkdir("/archive").await.unwrap();
    env.fs.mv("/docs", "/archive/docs").await.unwrap();

    assert!(matches!(
        env.fs.stat("/docs/2024/report").await,
        Err(FsError::NotFound(_))
    ));
    let moved = env.fs.stat("/archive/docs/2024/report").await.unwrap();
    assert_eq!(moved.id, path::encode_id("/archive/docs/2024/report"));
    assert_eq!(moved.parent.as_deref(), Some("/archive/docs/2024"));
    assert_eq!(moved.size, 40);
    assert_eq!(common::cat(&env.fs, "/archive/docs/2024/report").await, data);

    let dir = env.fs.stat("/archive/docs").await.unwrap();
    let children = env
        .fs
        .provider()
        .get_children(&dir.id)
        .await
        .unwrap();
    assert_eq!(paths(&children), ["/archive/docs/2024"]);
}

#[tokio::test]
async fn test_mv_rejections() {
    let env = common::setup_test_env(false);
    env.fs.mkdir("/a").await.unwrap();
    env.fs.mkdir("/a/b").await.unwrap();
    env.fs.touch("/c").await.unwrap();

    assert!(matches!(
        env.fs.mv("/a", "/a/b/a").await,
        Err(FsError::MoveIntoSelf { .. })
    ));
    assert!(matches!(
        env.fs.mv("/c", "/a/b").await,
        Err(FsError::AlreadyExists(_))
    ));
    assert!(matches!(
        env.fs.mv("/c", "/missing/c").await,
        Err(FsError::NotFound(_))
    ));
    assert!(matches!(env.fs.mv("/", "/x").await, Err(FsError::RootImmutable)));
}

#[tokio::test]
async fn test_ls_paginates_direct_children() {
    let env = common::setup_test_env(false);
    env.fs.mkdir("/dir").await.unwrap();
    env.fs.mkdir("/dir/sub").await.unwrap();
    env.fs.touch("/dir/sub/deep").await.unwrap();
    env.fs.touch("/dirt").await.unwrap();
    for name in ["e", "a", "d", "c", "b"] {
        env.fs.touch(&format!("/dir/{}", name)).await.unwrap();
    }

    let all = env.fs.ls("/dir", None, 0).await.unwrap();
    assert_eq!(
        paths(&all),
        ["/dir/a", "/dir/b", "/dir/c", "/dir/d", "/dir/e", "/dir/sub"]
    );

    let mut pages = Vec::new();
    let mut offset = 0;
    loop {
        let page = env.fs.ls("/dir", Some(4), offset).await.unwrap();
        if page.is_empty() {
            break;
        }
        offset += page.len();
        pages.push(paths(&page));
    }
    assert_eq!(pages.len(), 2);
    assert_eq!(pages.concat(), paths(&all));
}

#[tokio::test]
async fn test_rm_removes_subtree() {
    let env = common::setup_test_env(false);
    env.fs.mkdir("/tmp").await.unwrap();
    common::put(&env.fs, "/tmp/a", b"aaaa").await;
    env.fs.touch("/tmpfile").await.unwrap();

    env.fs.rm("/tmp").await.unwrap();
    assert!(env.fs.stat("/tmp/a").await.is_err());
    assert_eq!(paths(&env.fs.ls("/", None, 0).await.unwrap()), ["/tmpfile"]);
    assert!(matches!(env.fs.rm("/").await, Err(FsError::RootImmutable)));
}

#[tokio::test]
async fn test_touch_and_chtime() {
    let env = common::setup_test_env(false);
    env.fs.touch("/f").await.unwrap();
    let created = env.fs.stat("/f").await.unwrap();
    assert_eq!(created.size, 0);
    assert!(!created.dir);

    let past = chrono::Utc::now() - chrono::Duration::days(30);
    env.fs.chtime("/f", past).await.unwrap();
    assert_eq!(env.fs.stat("/f").await.unwrap().mtime, past);

    env.fs.touch("/f").await.unwrap();
    assert!(env.fs.stat("/f").await.unwrap().mtime > past);
}

#[tokio::test]
async fn test_out_of_order_nodes_are_rejected() {
    let env = common::setup_test_env(false);
    let file = common::put(&env.fs, "/f", &common::payload(common::CHUNK_SIZE * 3)).await;

    let mut nodes = env.fs.nodes("/f").await.unwrap();
    nodes.swap(0, 2);
    let err: FsError = env
        .fs
        .provider()
        .set_nodes(&file.id, nodes)
        .await
        .unwrap_err()
        .into();
    assert!(matches!(err, FsError::OutOfOrder { expected: 0, found: 2 }));

    // the stored list is untouched
    let stored = env.fs.nodes("/f").await.unwrap();
    let indices: Vec<u64> = stored.iter().map(|n| n.index).collect();
    assert_eq!(indices, [0, 1, 2]);
}

#[tokio::test]
async fn test_snapshot_restores_a_readable_tree() {
    let env = common::setup_test_env(true);
    env.fs.mkdir("/music").await.unwrap();
    let data = common::payload(common::CHUNK_SIZE * 2 + 7);
    common::put(&env.fs, "/music/track", &data).await;

    let snapshot = env.fs.provider().snapshot().unwrap();
    let json = serde_json::to_vec(&snapshot).unwrap();

    let restored =
        MemoryDataProvider::from_snapshot(serde_json::from_slice(&json).unwrap()).unwrap();
    let fs = Fs::new(restored, env.driver().clone());

    let track = fs.stat("/music/track").await.unwrap();
    assert_eq!(track.size, data.len() as u64);
    assert_eq!(common::cat(&fs, "/music/track").await, data);
}

#[tokio::test]
async fn test_snapshot_with_swapped_chunks_fails_to_load() {
    let env = common::setup_test_env(false);
    let data = common::payload(common::CHUNK_SIZE * 3);
    common::put(&env.fs, "/f", &data).await;

    let mut snapshot = env.fs.provider().snapshot().unwrap();
    let entry = snapshot
        .entries
        .iter_mut()
        .find(|e| e.file.path == "/f")
        .unwrap();
    entry.nodes.swap(0, 2);

    let err: FsError = MemoryDataProvider::from_snapshot(snapshot)
        .unwrap_err()
        .into();
    assert!(matches!(err, FsError::OutOfOrder { expected: 0, found: 2 }));
}

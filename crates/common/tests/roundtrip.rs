//! Write a stream, read it back, for both writer variants

mod common;

use std::sync::Arc;
use std::time::Duration;

use ::common::prelude::*;
use parking_lot::Mutex;

fn lengths() -> [usize; 4] {
    [0, common::CHUNK_SIZE / 3, common::CHUNK_SIZE, common::CHUNK_SIZE * 7 / 2]
}

async fn round_trip(async_write: bool) {
    let env = common::setup_test_env(async_write);

    for len in lengths() {
        let path = format!("/file-{}", len);
        let data = common::payload(len);

        let file = common::put(&env.fs, &path, &data).await;
        assert_eq!(file.size, len as u64);

        let nodes = env.fs.nodes(&path).await.unwrap();
        assert_eq!(nodes.len(), len.div_ceil(common::CHUNK_SIZE));
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.index, i as u64);
            assert!(node.size <= common::CHUNK_SIZE as u64);
        }

        assert_eq!(common::cat(&env.fs, &path).await, data, "length {}", len);
    }
}

#[tokio::test]
async fn test_round_trip_sequential() {
    round_trip(false).await;
}

#[tokio::test]
async fn test_round_trip_concurrent() {
    round_trip(true).await;
}

#[tokio::test]
async fn test_many_small_writes() {
    let env = common::setup_test_env(true);
    let data = common::payload(common::CHUNK_SIZE * 5 + 3);

    let mut writer = env.fs.create("/pieces").await.unwrap();
    for piece in data.chunks(3) {
        writer.write(piece).await.unwrap();
    }
    assert_eq!(writer.written(), data.len() as u64);
    writer.close().await.unwrap();

    assert_eq!(common::cat(&env.fs, "/pieces").await, data);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_emission_is_ordered() {
    let env = common::setup_test_env(true);
    // earlier chunks finish last
    env.platform.set_upload_delay(|data| {
        Duration::from_millis(100 - u64::from(data.first().copied().unwrap_or(0)))
    });

    let emitted = Arc::new(Mutex::new(Vec::new()));
    let sink = emitted.clone();
    let mut writer = env.driver().new_nwriter(move |node: Node| sink.lock().push(node));

    let data: Vec<u8> = (0..6u8)
        .flat_map(|i| std::iter::repeat(i * 10).take(common::CHUNK_SIZE))
        .collect();
    writer.write(&data).await.unwrap();
    writer.close().await.unwrap();

    let nodes = emitted.lock().clone();
    let indices: Vec<u64> = nodes.iter().map(|n| n.index).collect();
    assert_eq!(indices, [0, 1, 2, 3, 4, 5]);

    let read = env
        .driver()
        .new_reader(nodes, 0)
        .read_to_end()
        .await
        .unwrap();
    assert_eq!(&read[..], &data[..]);
}

#[tokio::test]
async fn test_uploads_spread_over_channels() {
    let env = common::setup_test_env(false);
    common::put(&env.fs, "/spread", &common::payload(common::CHUNK_SIZE * 3)).await;

    let channels: Vec<String> = env
        .fs
        .nodes("/spread")
        .await
        .unwrap()
        .iter()
        .map(|n| n.channel_id().unwrap())
        .collect();
    assert_eq!(channels, ["111", "222", "333"]);
}

//! Shared setup for the engine integration tests
#![allow(dead_code)]

use std::sync::Arc;

use ::common::prelude::*;
use ::common::testkit::MockPlatform;

pub const CHUNK_SIZE: usize = 16;

pub struct TestEnv {
    pub platform: Arc<MockPlatform>,
    pub fs: Fs<MemoryDataProvider>,
}

impl TestEnv {
    pub fn driver(&self) -> &Driver {
        self.fs.driver()
    }
}

pub fn config(platform: &MockPlatform, async_write: bool) -> Config {
    Config {
        token: "token-a,token-b".to_string(),
        channels: "111,222,333".to_string(),
        chunk_size: CHUNK_SIZE as i64,
        async_write,
        api_url: platform.api_url(),
        ..Config::default()
    }
}

/// Route engine logs to the test harness, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A filesystem backed by a fresh mock platform and an empty memory provider
pub fn setup_test_env(async_write: bool) -> TestEnv {
    init_tracing();
    let platform = Arc::new(MockPlatform::new());
    let driver = Driver::with_client(&config(&platform, async_write), platform.clone()).unwrap();
    TestEnv {
        platform,
        fs: Fs::new(MemoryDataProvider::new(), driver),
    }
}

/// `len` bytes that differ per position
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub async fn put(fs: &Fs<MemoryDataProvider>, path: &str, data: &[u8]) -> File {
    let mut writer = fs.create(path).await.unwrap();
    writer.write(data).await.unwrap();
    writer.close().await.unwrap()
}

pub async fn cat(fs: &Fs<MemoryDataProvider>, path: &str) -> Vec<u8> {
    let mut reader = fs.open(path, 0).await.unwrap();
    reader.read_to_end().await.unwrap().to_vec()
}

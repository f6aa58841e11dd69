/// In-process test harness
///
/// Stands in for the remote platform so the engine can be
/// exercised end to end without network access or credentials.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use common::prelude::*;
/// use common::testkit::MockPlatform;
///
/// #[tokio::test]
/// async fn test_round_trip() -> anyhow::Result<()> {
///     let platform = Arc::new(MockPlatform::new());
///     let config = Config {
///         token: "token".to_string(),
///         channels: "1".to_string(),
///         api_url: platform.api_url(),
///         ..Config::default()
///     };
///     let driver = Driver::with_client(&config, platform.clone())?;
///     // write through driver.new_writer(..), read back with driver.new_reader(..)
///     Ok(())
/// }
/// ```
mod platform;

pub use platform::{Leg, MockPlatform};

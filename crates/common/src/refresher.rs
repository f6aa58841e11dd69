use std::collections::{BTreeMap, HashMap};

use crate::codec::CodecError;
use crate::node::Node;
use crate::rest::{Rest, RestError};

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("message lookup failed: {0}")]
    Rest(#[from] RestError),
    #[error("bad attachment url: {0}")]
    Codec(#[from] CodecError),
}

/// Outcome of a refresh pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Nodes that received a fresh signature
    pub refreshed: usize,
    /// Message ids of expired nodes that could not be re-signed
    pub unresolved: Vec<u64>,
}

impl RefreshReport {
    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Re-sign every node expired at `now`, in place.
///
/// Expired nodes are grouped by the channel their attachment lives in,
///  and each group is matched against one page of that channel's
///  messages starting just before the oldest message in the group.
///  Nodes whose message is not on that page are reported as unresolved
///  and left untouched.
pub async fn refresh(
    rest: &Rest,
    nodes: &mut [Node],
    now: i64,
) -> Result<RefreshReport, RefreshError> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if node.is_expired(now) {
            groups.entry(node.channel_id()?).or_default().push(i);
        }
    }

    let mut report = RefreshReport::default();
    for (channel, members) in groups {
        let oldest = members.iter().map(|&i| nodes[i].mid).min().unwrap_or(0);
        tracing::debug!(
            "refresher: {} expired node(s) in channel {}, looking up after {}",
            members.len(),
            channel,
            oldest.saturating_sub(1)
        );

        let messages = rest
            .get_messages(&channel, Some(oldest.saturating_sub(1)))
            .await?;
        let by_id: HashMap<u64, _> = messages
            .iter()
            .filter_map(|m| m.mid().ok().map(|mid| (mid, m)))
            .collect();

        for i in members {
            let node = &mut nodes[i];
            match by_id.get(&node.mid) {
                Some(message) => {
                    node.resign(&message.attachment()?.url)?;
                    report.refreshed += 1;
                }
                None => report.unresolved.push(node.mid),
            }
        }
    }

    if !report.is_resolved() {
        tracing::warn!(
            "refresher: {} node(s) left unresolved: {:?}",
            report.unresolved.len(),
            report.unresolved
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::node::unix_now;
    use crate::rest::Rotator;
    use crate::testkit::MockPlatform;

    fn rest(platform: &Arc<MockPlatform>) -> Rest {
        let rotator = Rotator::new(
            vec!["t".to_string()],
            vec!["10".to_string(), "20".to_string()],
        )
        .unwrap();
        Rest::new(platform.clone(), rotator, &platform.api_url())
    }

    async fn upload(rest: &Rest, n: usize) -> Vec<Node> {
        let mut nodes = Vec::new();
        for i in 0..n {
            let mut node = rest.create_attachment(Bytes::from(vec![i as u8; 8])).await.unwrap();
            node.index = i as u64;
            nodes.push(node);
        }
        nodes
    }

    #[tokio::test]
    async fn test_refresh_resigns_expired_across_channels() {
        let platform = Arc::new(MockPlatform::new());
        let rest = rest(&platform);

        platform.set_signature_ttl(-60);
        let mut nodes = upload(&rest, 4).await;
        platform.set_signature_ttl(3600);

        let before = nodes.clone();
        let report = refresh(&rest, &mut nodes, unix_now()).await.unwrap();

        assert_eq!(report.refreshed, 4);
        assert!(report.is_resolved());
        for (old, new) in before.iter().zip(&nodes) {
            assert!(!new.is_expired(unix_now()));
            assert_ne!(old.ex, new.ex);
            assert_eq!(old.mid, new.mid);
            assert_eq!(old.url, new.url);
            assert_eq!(old.index, new.index);
        }
        // one lookup per channel
        assert_eq!(platform.lookup_requests(), 2);
    }

    #[tokio::test]
    async fn test_fresh_nodes_are_left_alone() {
        let platform = Arc::new(MockPlatform::new());
        let rest = rest(&platform);

        let mut nodes = upload(&rest, 2).await;
        let before = nodes.clone();
        let report = refresh(&rest, &mut nodes, unix_now()).await.unwrap();

        assert_eq!(report, RefreshReport::default());
        assert_eq!(nodes, before);
        assert_eq!(platform.lookup_requests(), 0);
    }

    #[tokio::test]
    async fn test_missing_message_is_unresolved() {
        let platform = Arc::new(MockPlatform::new());
        let rest = rest(&platform);

        platform.set_signature_ttl(-60);
        let mut nodes = upload(&rest, 2).await;
        platform.set_signature_ttl(3600);
        platform.hide_message(nodes[1].mid);

        let before = nodes.clone();
        let report = refresh(&rest, &mut nodes, unix_now()).await.unwrap();

        assert_eq!(report.refreshed, 1);
        assert_eq!(report.unresolved, [before[1].mid]);
        assert_eq!(nodes[1], before[1]);
        assert_ne!(nodes[0], before[0]);
    }

    #[tokio::test]
    async fn test_malformed_url_fails_the_pass() {
        let platform = Arc::new(MockPlatform::new());
        let rest = rest(&platform);

        let mut nodes = upload(&rest, 1).await;
        nodes[0].ex = 0;
        nodes[0].url = "https://cdn.example.com/not-an-attachment".to_string();

        assert!(matches!(
            refresh(&rest, &mut nodes, unix_now()).await,
            Err(RefreshError::Codec(_))
        ));
    }
}

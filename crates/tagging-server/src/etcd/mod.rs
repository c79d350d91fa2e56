//! Etcd Adapters
//!
//! Backing store and legacy source implementations on etcd, plus the shared
//! connection helper.
//!
//! Key layout under the configured prefix:
//! - `{prefix}/members/{tag}/{bucket:04}/{member}` holds the creation timestamp
//! - `{prefix}/buckets/{tag}/{bucket:04}` is the empty presence row
//!
//! Buckets are zero-padded so lexical key order matches numeric bucket order.

mod legacy;
mod store;

pub use legacy::EtcdLegacyStore;
pub use store::EtcdStore;

use anyhow::{anyhow, Result};
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::Client;
use tagging_core::BucketId;
use tracing::{debug, warn};

use crate::config::ServerConfig;

/// Connect to etcd with exponential backoff
pub async fn connect(config: &ServerConfig) -> Result<Client> {
    let backoff = ExponentialBackoff {
        initial_interval: config.etcd_backoff_initial,
        max_interval: config.etcd_backoff_max,
        max_elapsed_time: Some(config.etcd_backoff_max_elapsed),
        multiplier: config.etcd_backoff_multiplier,
        ..Default::default()
    };
    let endpoints = config.etcd_endpoints.clone();

    retry(backoff, || async {
        match Client::connect(&endpoints, None).await {
            Ok(client) => {
                debug!("Connected to etcd");
                Ok(client)
            }
            Err(e) => {
                warn!(error = %e, "etcd connection failed, retrying");
                Err(backoff::Error::transient(e))
            }
        }
    })
    .await
    .map_err(|e| anyhow!("Failed to connect to etcd after retries: {:?}", e))
}

/// Builds the keys of the bucketed layout.
#[derive(Debug, Clone)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn member_key(&self, tag: &str, bucket: BucketId, member: &str) -> String {
        format!("{}{member}", self.bucket_members_prefix(tag, bucket))
    }

    pub fn bucket_members_prefix(&self, tag: &str, bucket: BucketId) -> String {
        format!("{}/members/{}/{bucket:04}/", self.prefix, escape_segment(tag))
    }

    pub fn presence_key(&self, tag: &str, bucket: BucketId) -> String {
        format!("{}{bucket:04}", self.presence_prefix(tag))
    }

    pub fn presence_prefix(&self, tag: &str) -> String {
        format!("{}/buckets/{}/", self.prefix, escape_segment(tag))
    }

    /// Prefix of every presence row of every tag.
    pub fn presence_root(&self) -> String {
        format!("{}/buckets/", self.prefix)
    }

    /// Split a presence key into its tag and bucket.
    pub fn parse_presence_key(&self, key: &str) -> Option<(String, BucketId)> {
        let rest = key.strip_prefix(self.presence_root().as_str())?;
        let (tag, bucket) = rest.split_once('/')?;
        Some((unescape_segment(tag)?, bucket.parse().ok()?))
    }
}

/// Percent-escape `%` and `/` so a tag id is always exactly one key segment.
fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace('/', "%2F")
}

fn unescape_segment(segment: &str) -> Option<String> {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        match rest.get(at + 1..at + 3) {
            Some("25") => out.push('%'),
            Some("2F") => out.push('/'),
            _ => return None,
        }
        rest = &rest[at + 3..];
    }
    out.push_str(rest);
    Some(out)
}

/// Smallest key greater than every key starting with `prefix`.
pub(crate) fn range_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // Empty or all-0xff prefix: range to the end of the keyspace
    vec![0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let layout = KeyLayout::new("/tagging/");
        assert_eq!(layout.member_key("promo", 7, "AA"), "/tagging/members/promo/0007/AA");
        assert_eq!(layout.presence_key("promo", 123), "/tagging/buckets/promo/0123");
        assert_eq!(
            layout.parse_presence_key("/tagging/buckets/promo/0123"),
            Some(("promo".to_string(), 123))
        );
        assert_eq!(layout.parse_presence_key("/tagging/members/promo/0123/AA"), None);
    }

    #[test]
    fn test_slash_in_tag_stays_in_its_own_segment() {
        let layout = KeyLayout::new("/tagging");
        let nested = layout.member_key("a/0007", 3, "M");
        assert_eq!(nested, "/tagging/members/a%2F0007/0003/M");
        assert!(!nested.starts_with(&layout.bucket_members_prefix("a", 7)));
        assert!(!layout.presence_key("a/0007", 3).starts_with(&layout.presence_prefix("a")));

        assert_eq!(
            layout.parse_presence_key(&layout.presence_key("a/0007", 3)),
            Some(("a/0007".to_string(), 3))
        );
        assert_eq!(
            layout.parse_presence_key(&layout.presence_key("100%", 9)),
            Some(("100%".to_string(), 9))
        );
        assert_eq!(layout.parse_presence_key("/tagging/buckets/a/0007/0003"), None);
        assert_eq!(layout.parse_presence_key("/tagging/buckets/bad%zz/0003"), None);
    }

    #[test]
    fn test_range_end() {
        assert_eq!(range_end("/a/"), b"/a0".to_vec());
        assert_eq!(range_end("ab\u{7f}"), b"ab\x80".to_vec());
        assert_eq!(range_end(""), vec![0]);
    }
}

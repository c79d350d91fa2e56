//! Bucketed membership rows on etcd

use std::collections::BTreeSet;

use async_trait::async_trait;
use etcd_client::{Client, DeleteOptions, GetOptions, Txn, TxnOp};
use tagging_core::backend::{Mutation, WideColumnStore};
use tagging_core::{BucketId, StoreError};
use tracing::{debug, warn};

use super::{range_end, KeyLayout};

/// [`WideColumnStore`] on etcd. Batches are split into transactions of at most
/// `max_txn_ops` operations; each transaction is atomic but the batch is not.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    layout: KeyLayout,
    max_txn_ops: usize,
}

impl EtcdStore {
    pub fn new(client: Client, prefix: &str, max_txn_ops: usize) -> Self {
        Self {
            client,
            layout: KeyLayout::new(prefix),
            max_txn_ops: max_txn_ops.max(1),
        }
    }

    fn to_op(&self, mutation: &Mutation) -> (String, TxnOp) {
        match mutation {
            Mutation::PutMember {
                tag,
                bucket,
                member,
                created,
            } => {
                let key = self.layout.member_key(tag, *bucket, member);
                (key.clone(), TxnOp::put(key, created.to_string(), None))
            }
            Mutation::PutPresence { tag, bucket } => {
                let key = self.layout.presence_key(tag, *bucket);
                (key.clone(), TxnOp::put(key, "", None))
            }
            Mutation::DeleteMember { tag, bucket, member } => {
                let key = self.layout.member_key(tag, *bucket, member);
                (key.clone(), TxnOp::delete(key, None))
            }
            Mutation::DeleteBucketMembers { tag, bucket } => {
                let prefix = self.layout.bucket_members_prefix(tag, *bucket);
                (
                    prefix.clone(),
                    TxnOp::delete(prefix, Some(DeleteOptions::new().with_prefix())),
                )
            }
            Mutation::DeletePresence { tag, bucket } => {
                let key = self.layout.presence_key(tag, *bucket);
                (key.clone(), TxnOp::delete(key, None))
            }
        }
    }

    async fn keys(&self, start: Vec<u8>, options: GetOptions) -> Result<Vec<String>, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(start, Some(options.with_keys_only()))
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        resp.kvs()
            .iter()
            .map(|kv| {
                kv.key_str()
                    .map(str::to_string)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl WideColumnStore for EtcdStore {
    async fn scan_members(
        &self,
        tag: &str,
        bucket: BucketId,
        after: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let prefix = self.layout.bucket_members_prefix(tag, bucket);
        // The smallest key strictly after `after` is `after` followed by NUL
        let mut start = prefix.clone().into_bytes();
        if !after.is_empty() {
            start.extend_from_slice(after.as_bytes());
            start.push(0);
        }

        let options = GetOptions::new()
            .with_range(range_end(&prefix))
            .with_limit(limit as i64);
        let keys = self.keys(start, options).await?;

        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect())
    }

    async fn scan_presence(&self, tag: &str) -> Result<Vec<BucketId>, StoreError> {
        let prefix = self.layout.presence_prefix(tag);
        let keys = self
            .keys(prefix.clone().into_bytes(), GetOptions::new().with_prefix())
            .await?;

        let mut buckets = Vec::with_capacity(keys.len());
        for key in keys {
            match self.layout.parse_presence_key(&key) {
                Some((key_tag, bucket)) if key_tag == tag => buckets.push(bucket),
                _ => warn!(key = %key, "Ignoring malformed presence key"),
            }
        }
        Ok(buckets)
    }

    async fn scan_tag_ids(&self) -> Result<Vec<String>, StoreError> {
        let root = self.layout.presence_root();
        let keys = self
            .keys(root.into_bytes(), GetOptions::new().with_prefix())
            .await?;

        let tags: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| self.layout.parse_presence_key(key))
            .map(|(tag, _)| tag)
            .collect();
        Ok(tags.into_iter().collect())
    }

    async fn execute_batch(&self, batch: Vec<Mutation>) -> Result<(), StoreError> {
        // etcd rejects a transaction naming the same key twice; the last
        // mutation of a key wins
        let mut seen = BTreeSet::new();
        let mut ops: Vec<TxnOp> = Vec::with_capacity(batch.len());
        for mutation in batch.iter().rev() {
            let (key, op) = self.to_op(mutation);
            if seen.insert(key) {
                ops.push(op);
            }
        }
        ops.reverse();

        let mut client = self.client.clone();
        let total = ops.len();
        let mut applied = 0usize;
        let mut ops = ops.into_iter().peekable();
        while ops.peek().is_some() {
            let chunk: Vec<TxnOp> = ops.by_ref().take(self.max_txn_ops).collect();
            let size = chunk.len();
            client.txn(Txn::new().and_then(chunk)).await.map_err(|e| {
                StoreError::Write(format!("applied {applied} of {total} operations: {e}"))
            })?;
            applied += size;
        }

        debug!(operations = total, "Applied batch");
        Ok(())
    }
}

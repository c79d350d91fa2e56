//! Paginated and full reads
//!
//! Populated buckets are walked in the order the backing store enumerates
//! them. Bucket scans are fanned out in waves of `scan_workers` and merged
//! back in bucket order, so memory stays bounded by one wave.

use tracing::{debug, error, info, warn};

use crate::bucket::BucketId;
use crate::config::TaggingConfig;
use crate::cursor::{Cursor, CursorCodec};
use crate::error::{StoreError, TaggingError, TaggingResult};
use crate::models::{MembersPage, MembersSnapshot};
use crate::store::BucketedStore;
use crate::worker_pool::run_pool;

#[derive(Debug, Clone)]
struct BucketScan {
    index: usize,
    bucket: BucketId,
    after: String,
    limit: usize,
}

type ScanResult = (usize, Result<Vec<String>, StoreError>);

#[derive(Clone)]
pub struct PaginatedReader {
    store: BucketedStore,
    config: TaggingConfig,
}

impl PaginatedReader {
    pub fn new(store: BucketedStore, config: TaggingConfig) -> Self {
        Self { store, config }
    }

    /// One page of `tag`'s members, resuming from `cursor` (empty for the
    /// first page). `limit` of zero selects the default page size; larger
    /// than the maximum is clamped.
    #[tracing::instrument(skip(self, cursor))]
    pub async fn page(&self, tag: &str, limit: usize, cursor: &str) -> TaggingResult<MembersPage> {
        let limit = self.config.page_limit(limit);

        let buckets = match self.store.populated_buckets(tag).await {
            Ok(buckets) => buckets,
            Err(e) => {
                error!(tag_id = tag, error = %e, "Failed to list populated buckets");
                Vec::new()
            }
        };
        if buckets.is_empty() {
            return Err(TaggingError::not_found(tag));
        }

        let cursor = CursorCodec::decode(cursor);
        let Some(start) = buckets.iter().position(|b| *b >= cursor.bucket_id) else {
            debug!(tag_id = tag, bucket = cursor.bucket_id, "Cursor is past the last populated bucket");
            return Ok(MembersPage::default());
        };

        let mut data: Vec<String> = Vec::with_capacity(limit);
        let mut last_touched: Option<usize> = None;
        let mut next = start;

        'waves: while next < buckets.len() && data.len() < limit {
            let wave_end = (next + self.config.scan_workers()).min(buckets.len());
            let lookahead = limit - data.len() + 1;
            let scans = (next..wave_end)
                .map(|index| BucketScan {
                    index,
                    bucket: buckets[index],
                    after: if index == start && buckets[index] == cursor.bucket_id {
                        cursor.last_member.clone()
                    } else {
                        String::new()
                    },
                    limit: lookahead,
                })
                .collect();

            for (index, result) in self.scan_wave(tag, scans).await {
                let bucket = buckets[index];
                let members = match result {
                    Ok(members) => members,
                    Err(e) if data.is_empty() => {
                        warn!(tag_id = tag, bucket = bucket, error = %e, "Skipping unreadable bucket");
                        metrics::counter!("tagging_bucket_read_errors_total").increment(1);
                        last_touched = Some(index);
                        continue;
                    }
                    Err(e) => {
                        // Resume at this bucket on the next page
                        warn!(tag_id = tag, bucket = bucket, error = %e, "Bucket read failed, ending page early");
                        metrics::counter!("tagging_bucket_read_errors_total").increment(1);
                        let after = if index == start && bucket == cursor.bucket_id {
                            cursor.last_member.clone()
                        } else {
                            String::new()
                        };
                        let total = cursor.total_collected + data.len() as u64;
                        return Ok(MembersPage {
                            data,
                            next_cursor: Some(CursorCodec::encode(&Cursor::new(bucket, after, total))),
                            has_more: true,
                        });
                    }
                };

                let needed = limit - data.len();
                if members.len() > needed {
                    data.extend(members.into_iter().take(needed));
                    let last = data.last().cloned().unwrap_or_default();
                    let total = cursor.total_collected + data.len() as u64;
                    debug!(tag_id = tag, bucket = bucket, returned = data.len(), "Page filled inside bucket");
                    return Ok(MembersPage {
                        data,
                        next_cursor: Some(CursorCodec::encode(&Cursor::new(bucket, last, total))),
                        has_more: true,
                    });
                }

                data.extend(members);
                last_touched = Some(index);
                if data.len() >= limit {
                    break 'waves;
                }
            }

            next = wave_end;
        }

        let resume = last_touched.map_or(start, |i| i + 1);
        let has_more = resume < buckets.len();
        let next_cursor = has_more.then(|| {
            let total = cursor.total_collected + data.len() as u64;
            CursorCodec::encode(&Cursor::new(buckets[resume], "", total))
        });

        debug!(tag_id = tag, returned = data.len(), has_more = has_more, "Returning page");
        Ok(MembersPage {
            data,
            next_cursor,
            has_more,
        })
    }

    /// Every member of `tag` up to the full-read ceiling.
    #[tracing::instrument(skip(self))]
    pub async fn read_all(&self, tag: &str) -> TaggingResult<MembersSnapshot> {
        let buckets = self.store.populated_buckets(tag).await?;
        if buckets.is_empty() {
            return Err(TaggingError::not_found(tag));
        }

        let ceiling = self.config.max_full_read;
        let mut members: Vec<String> = Vec::new();
        let mut truncated = false;

        let indexed: Vec<(usize, BucketId)> = buckets.iter().copied().enumerate().collect();
        'waves: for wave in indexed.chunks(self.config.scan_workers()) {
            // One extra member tells a full tag apart from a truncated one
            let remaining = ceiling - members.len() + 1;
            let scans = wave
                .iter()
                .map(|(index, bucket)| BucketScan {
                    index: *index,
                    bucket: *bucket,
                    after: String::new(),
                    limit: remaining,
                })
                .collect();

            for (index, result) in self.scan_wave(tag, scans).await {
                let chunk = match result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(tag_id = tag, bucket = buckets[index], error = %e, "Skipping unreadable bucket");
                        metrics::counter!("tagging_bucket_read_errors_total").increment(1);
                        continue;
                    }
                };

                let space = ceiling - members.len();
                if chunk.len() > space {
                    members.extend(chunk.into_iter().take(space));
                    truncated = true;
                    break 'waves;
                }
                members.extend(chunk);
            }
        }

        info!(tag_id = tag, count = members.len(), truncated = truncated, "Read tag members");
        Ok(MembersSnapshot { members, truncated })
    }

    async fn scan_wave(&self, tag: &str, scans: Vec<BucketScan>) -> Vec<ScanResult> {
        let workers = scans.len();
        let store = self.store.clone();
        let tag = tag.to_string();
        let chunk_size = self.config.fetch_chunk_size.max(1);

        let mut results = run_pool(scans, workers, move |scan: BucketScan| {
            let store = store.clone();
            let tag = tag.clone();
            async move {
                let result = scan_bucket(&store, &tag, &scan, chunk_size).await;
                Some((scan.index, result))
            }
        })
        .await;

        results.sort_unstable_by_key(|(index, _)| *index);
        results
    }
}

/// Read up to `scan.limit` members of one bucket in chunks.
async fn scan_bucket(
    store: &BucketedStore,
    tag: &str,
    scan: &BucketScan,
    chunk_size: usize,
) -> Result<Vec<String>, StoreError> {
    let mut collected = Vec::new();
    let mut after = scan.after.clone();

    while collected.len() < scan.limit {
        let chunk_limit = chunk_size.min(scan.limit - collected.len());
        let chunk = store.members_of(tag, scan.bucket, &after, chunk_limit).await?;
        let exhausted = chunk.len() < chunk_limit;
        if let Some(last) = chunk.last() {
            after = last.clone();
        }
        collected.extend(chunk);
        if exhausted {
            break;
        }
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::backend::MemoryStore;
    use crate::bucket::BucketAssignor;
    use crate::registry::MemoryRegistry;
    use crate::sync::RegistrySyncCoordinator;

    async fn seeded(tag: &str, members: &[String]) -> (Arc<MemoryStore>, BucketedStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = BucketedStore::new(backend.clone());
        let report = store.add_grouped(tag, members, 1).await;
        assert!(report.is_complete());
        (backend, store)
    }

    fn small_config() -> TaggingConfig {
        TaggingConfig {
            read_workers: 3,
            fetch_chunk_size: 2,
            ..TaggingConfig::default()
        }
    }

    async fn drain(reader: &PaginatedReader, tag: &str, limit: usize) -> (Vec<String>, usize) {
        let mut cursor = String::new();
        let mut all = Vec::new();
        let mut pages = 0;
        loop {
            let page = reader.page(tag, limit, &cursor).await.unwrap();
            pages += 1;
            assert!(page.data.len() <= limit);
            all.extend(page.data);
            if !page.has_more {
                assert!(page.next_cursor.is_none());
                break;
            }
            cursor = page.next_cursor.unwrap();
            assert!(pages < 10_000, "pagination did not terminate");
        }
        (all, pages)
    }

    #[tokio::test]
    async fn test_pagination_is_complete() {
        let members: Vec<String> = (0..537).map(|i| format!("DEVICE-{i:05}")).collect();
        let (_, store) = seeded("fleet", &members).await;
        let reader = PaginatedReader::new(store, small_config());

        for limit in [1, 7, 50, 600] {
            let (all, _) = drain(&reader, "fleet", limit).await;
            assert_eq!(all.len(), members.len(), "limit {limit}");
            let distinct: HashSet<&String> = all.iter().collect();
            assert_eq!(distinct.len(), members.len(), "duplicates at limit {limit}");
        }
    }

    #[tokio::test]
    async fn test_promo_scenario() {
        let macs: Vec<String> = [
            "AA:BB:CC:00:00:01",
            "AA:BB:CC:00:00:02",
            "AA:BB:CC:00:00:03",
            "AA:BB:CC:00:00:04",
            "AA:BB:CC:00:00:05",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let backend = Arc::new(MemoryStore::new());
        let store = BucketedStore::new(backend.clone());
        let coordinator = RegistrySyncCoordinator::new(
            store.clone(),
            Arc::new(MemoryRegistry::new()),
            TaggingConfig::default(),
        );
        let report = coordinator.add_members("promo", macs.clone()).await.unwrap();
        assert_eq!(report.confirmed, 5);
        assert_eq!(backend.row_count("promo").await, 5);

        let reader = PaginatedReader::new(store, TaggingConfig::default());

        let first = reader.page("promo", 2, "").await.unwrap();
        assert_eq!(first.data.len(), 2);
        assert!(first.has_more);
        let cursor = first.next_cursor.clone().unwrap();
        assert!(!cursor.is_empty());

        let second = reader.page("promo", 2, &cursor).await.unwrap();
        assert_eq!(second.data.len(), 2);
        assert!(second.has_more);

        let third = reader
            .page("promo", 2, &second.next_cursor.clone().unwrap())
            .await
            .unwrap();
        assert_eq!(third.data.len(), 1);
        assert!(!third.has_more);
        assert!(third.next_cursor.is_none());

        let rest: HashSet<&String> = second.data.iter().chain(&third.data).collect();
        assert_eq!(rest.len(), 3);
        assert!(first.data.iter().all(|m| !rest.contains(m)));

        let mut seen: Vec<String> = first.data.into_iter().chain(second.data).chain(third.data).collect();
        seen.sort();
        assert_eq!(seen, macs);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_not_found() {
        let reader = PaginatedReader::new(BucketedStore::new(Arc::new(MemoryStore::new())), small_config());
        assert!(matches!(
            reader.page("missing", 10, "").await,
            Err(TaggingError::NotFound { .. })
        ));
        assert!(matches!(
            reader.read_all("missing").await,
            Err(TaggingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_presence_lookup_failure_is_not_found() {
        let (backend, store) = seeded("promo", &["A".to_string()]).await;
        backend.fail_presence_scan().await;
        let reader = PaginatedReader::new(store, small_config());
        assert!(matches!(
            reader.page("promo", 10, "").await,
            Err(TaggingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_cursor_restarts() {
        let members: Vec<String> = (0..5).map(|i| format!("M{i}")).collect();
        let (_, store) = seeded("t", &members).await;
        let reader = PaginatedReader::new(store, small_config());

        let first = reader.page("t", 3, "").await.unwrap();
        let garbage = reader.page("t", 3, "%%%").await.unwrap();
        assert_eq!(first, garbage);
    }

    #[tokio::test]
    async fn test_stale_presence_row_is_harmless() {
        let (backend, store) = seeded("t", &["A".to_string(), "B".to_string()]).await;
        let stale = (0..1000)
            .find(|b| *b != BucketAssignor::bucket_of("A") && *b != BucketAssignor::bucket_of("B"))
            .unwrap();
        backend.insert_stale_presence("t", stale).await;
        let reader = PaginatedReader::new(store, small_config());

        let (all, _) = drain(&reader, "t", 1).await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_errored_bucket_is_retried_on_next_page() {
        let members: Vec<String> = (0..200).map(|i| format!("M{i:03}")).collect();
        let (backend, store) = seeded("t", &members).await;
        let buckets = store.populated_buckets("t").await.unwrap();
        let broken = buckets[1];
        backend.fail_bucket_reads(broken).await;
        let reader = PaginatedReader::new(store, small_config());

        // First page reads bucket 0, then stops at the broken bucket
        let page = reader.page("t", 150, "").await.unwrap();
        assert!(page.has_more);
        let resume = CursorCodec::decode(page.next_cursor.as_deref().unwrap());
        assert_eq!(resume.bucket_id, broken);

        backend.heal().await;
        let mut all = page.data;
        let mut cursor = page.next_cursor.unwrap();
        loop {
            let page = reader.page("t", 150, &cursor).await.unwrap();
            all.extend(page.data);
            match page.next_cursor {
                Some(next) if page.has_more => cursor = next,
                _ => break,
            }
        }
        assert_eq!(all.len(), 200);
    }

    #[tokio::test]
    async fn test_errored_first_bucket_is_skipped() {
        let members: Vec<String> = (0..50).map(|i| format!("M{i:03}")).collect();
        let (backend, store) = seeded("t", &members).await;
        let buckets = store.populated_buckets("t").await.unwrap();
        let broken = buckets[0];
        let lost = members
            .iter()
            .filter(|m| BucketAssignor::bucket_of(m) == broken)
            .count();
        backend.fail_bucket_reads(broken).await;
        let reader = PaginatedReader::new(store, small_config());

        let (all, _) = drain(&reader, "t", 10).await;
        assert_eq!(all.len(), 50 - lost);
    }

    #[tokio::test]
    async fn test_read_all_truncates_at_ceiling() {
        let members: Vec<String> = (0..40).map(|i| format!("M{i:03}")).collect();
        let (_, store) = seeded("t", &members).await;

        let config = TaggingConfig {
            max_full_read: 25,
            ..small_config()
        };
        let snapshot = PaginatedReader::new(store.clone(), config).read_all("t").await.unwrap();
        assert_eq!(snapshot.members.len(), 25);
        assert!(snapshot.truncated);

        let config = TaggingConfig {
            max_full_read: 40,
            ..small_config()
        };
        let snapshot = PaginatedReader::new(store, config).read_all("t").await.unwrap();
        assert_eq!(snapshot.members.len(), 40);
        assert!(!snapshot.truncated);
    }
}

//! Tagging Configuration
//!
//! Limits and worker sizing for the tagging services, with environment variable
//! overrides. A `TaggingConfig` value is handed to each service at construction.

/// Number of members per registry worker before another worker is added.
pub const MEMBERS_PER_WORKER: usize = 100;

/// Tagging configuration with sensible defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggingConfig {
    // Worker sizing
    /// Floor for registry worker pools (env: TAG_WORKER_COUNT)
    pub base_workers: usize,

    /// Hard ceiling for any worker pool (env: TAG_MAX_WORKERS)
    pub max_workers: usize,

    /// Concurrent bucket scans per read (env: TAG_READ_WORKERS)
    pub read_workers: usize,

    // Batch limits
    /// Maximum members accepted by a single add/remove call (env: TAG_MAX_BATCH_SIZE)
    pub max_batch_size: usize,

    // Read limits
    /// Page size used when the caller passes no limit (env: TAG_DEFAULT_PAGE_SIZE)
    pub default_page_size: usize,

    /// Largest page a caller may request (env: TAG_MAX_PAGE_SIZE)
    pub max_page_size: usize,

    /// Ceiling for non-paginated reads (env: TAG_MAX_FULL_READ)
    pub max_full_read: usize,

    /// Members fetched per store query during full reads (env: TAG_FETCH_CHUNK)
    pub fetch_chunk_size: usize,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            base_workers: 20,
            max_workers: 100,
            read_workers: 20,

            max_batch_size: 5000,

            default_page_size: 500,
            max_page_size: 5000,
            max_full_read: 100_000,
            fetch_chunk_size: 1000,
        }
    }
}

impl TaggingConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_usize("TAG_WORKER_COUNT", &mut config.base_workers);
        override_usize("TAG_MAX_WORKERS", &mut config.max_workers);
        override_usize("TAG_READ_WORKERS", &mut config.read_workers);
        override_usize("TAG_MAX_BATCH_SIZE", &mut config.max_batch_size);
        override_usize("TAG_DEFAULT_PAGE_SIZE", &mut config.default_page_size);
        override_usize("TAG_MAX_PAGE_SIZE", &mut config.max_page_size);
        override_usize("TAG_MAX_FULL_READ", &mut config.max_full_read);
        override_usize("TAG_FETCH_CHUNK", &mut config.fetch_chunk_size);

        config
    }

    /// Worker count for a registry fan-out over `member_count` members.
    ///
    /// `min(max(member_count / 100, base_workers), max_workers)`, never below one.
    pub fn sync_workers(&self, member_count: usize) -> usize {
        (member_count / MEMBERS_PER_WORKER)
            .max(self.base_workers)
            .min(self.max_workers)
            .max(1)
    }

    /// Worker count for concurrent bucket scans.
    pub fn scan_workers(&self) -> usize {
        self.read_workers.min(self.max_workers).max(1)
    }

    /// Resolve a caller supplied page size: zero means default, anything above
    /// the maximum is clamped.
    pub fn page_limit(&self, requested: usize) -> usize {
        match requested {
            0 => self.default_page_size,
            n => n.min(self.max_page_size),
        }
    }
}

fn override_usize(var: &str, target: &mut usize) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<usize>() {
            Ok(parsed) if parsed > 0 => *target = parsed,
            _ => tracing::warn!(var = var, value = %raw, "Ignoring invalid configuration value"),
        }
    }
}

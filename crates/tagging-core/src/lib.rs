//! Core types and services for bucketed tag membership
//!
//! A tag is a named set of members (usually device MAC addresses) that can grow
//! to millions of entries. Members are sharded across a fixed number of buckets
//! in a wide-column store, with a presence index that records which buckets are
//! populated. The external group registry is the system of record; every
//! mutation goes to the registry first and only confirmed members are committed
//! locally.
//!
//! Module map, leaves first:
//! - `bucket`: deterministic member-to-bucket assignment
//! - `cursor`: opaque pagination cursors
//! - `backend`: wide-column store contract and the in-memory implementation
//! - `store`: bucketed CRUD over membership and presence rows
//! - `reader`: paginated and full reads
//! - `sync`: registry-first add/remove coordinator
//! - `bulk`: chunked tag deletion
//! - `migration`: legacy store migration

pub mod backend;
pub mod bucket;
pub mod bulk;
pub mod config;
pub mod cursor;
pub mod error;
pub mod legacy;
pub mod migration;
pub mod models;
pub mod normalize;
pub mod reader;
pub mod registry;
pub mod store;
pub mod sync;
pub mod worker_pool;

pub use bucket::{BucketAssignor, BucketId, BUCKET_COUNT};
pub use bulk::BulkOperations;
pub use config::TaggingConfig;
pub use cursor::{Cursor, CursorCodec};
pub use error::{LegacyError, RegistryError, StoreError, TaggingError, TaggingResult};
pub use migration::{MigrationReport, MigrationStatus, Migrator};
pub use models::{DeleteReport, MembersPage, MembersSnapshot, SyncReport};
pub use reader::PaginatedReader;
pub use store::BucketedStore;
pub use sync::RegistrySyncCoordinator;

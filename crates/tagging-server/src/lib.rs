//! Tagging Server Library
//!
//! HTTP service over the bucketed tag-membership store: etcd and registry
//! adapters, the migration job actor and the REST API.

pub mod api;
pub mod config;
pub mod etcd;
pub mod migration_job;
pub mod observability;
pub mod registry;
pub mod version;

//! Migration Job
//!
//! A single `MigrationJobActor` per server owns the legacy migration job:
//! ```text
//! POST ?command=start  -> ask(StartMigration)  -> spawn run task
//! POST ?command=cancel -> ask(CancelMigration) -> trip the CancellationToken
//! GET  /status         -> ask(GetMigrationStatus)
//! ```
//! Only one run may be in flight at a time.

mod actor;
mod messages;

pub use actor::MigrationJobActor;
pub use messages::{
    CancelMigration, CancelOutcome, GetMigrationStatus, JobState, MigrationJobStatus,
    StartMigration, StartOutcome,
};

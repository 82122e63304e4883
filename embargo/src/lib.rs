//! Embargo pipeline: decide per record whether it may be published, split
//! archives accordingly, and release embargoed archives once they age out.

pub mod day_batch;
pub mod error;
pub mod policy;
pub mod splitter;
pub mod unembargo;
pub mod whitelist;

#[cfg(test)]
mod testing;

pub use day_batch::{BatchSettings, DayBatchRunner, DayReport, FailedArchive};
pub use error::{EmbargoError, SplitError, WhitelistError};
pub use policy::{classify, should_embargo, Decision, EmbargoPolicy, NO_IP_EMBARGOED};
pub use splitter::{split, split_async, SplitOutput, SplitStats};
pub use unembargo::{MigrationReport, MigrationState, UnembargoMigrator, EPOCH_YEAR};
pub use whitelist::{SiteWhitelist, WhitelistSnapshot, WhitelistSource};

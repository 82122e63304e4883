mod dates;
pub mod filename;
pub mod naming;

pub use dates::{CutoffDate, DateParseError, RecordDate};
pub use naming::{day_of_week, ArchiveNaming, UNKNOWN_DAY};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// The three containers an embargo run touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbargoBuckets {
    /// Raw archives as produced by the collectors. Never modified.
    pub source: String,
    /// Embargoed halves, waiting for their embargo to lapse.
    pub private: String,
    /// Publicly released archives.
    pub public: String,
}

/// Where a record ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Classification {
    Public,
    Embargoed,
}

/// Why a record was classified the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DecisionReason {
    /// Not a web100 record; the policy does not apply.
    NotWeb100,
    /// Leading date could not be parsed.
    InvalidDate,
    /// Older than the cutoff.
    BeforeCutoff,
    Whitelisted,
    NotWhitelisted,
    /// Old filename format without an address.
    NoIp,
    /// Address segment present but malformed.
    InvalidIp,
}

impl DecisionReason {
    /// Reasons that indicate malformed input worth alerting on.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, DecisionReason::InvalidDate | DecisionReason::InvalidIp)
    }
}

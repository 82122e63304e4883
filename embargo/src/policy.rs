//! The per-record embargo rule.
//!
//! A record is embargoed when it is a web100 record, collected on or after the
//! cutoff, from a host that is not whitelisted. Age always wins over the
//! whitelist.

use std::sync::Arc;

use data_model::{
    filename::{self, IpParseError},
    Classification,
    CutoffDate,
    DecisionReason,
};

use crate::whitelist::WhitelistSnapshot;

/// Records in the old filename format carry no address and cannot be matched
/// against the whitelist. They are withheld.
pub const NO_IP_EMBARGOED: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub embargoed: bool,
    pub reason: DecisionReason,
}

impl Decision {
    fn public(reason: DecisionReason) -> Self {
        Self {
            embargoed: false,
            reason,
        }
    }

    fn embargoed(reason: DecisionReason) -> Self {
        Self {
            embargoed: true,
            reason,
        }
    }

    pub fn classification(&self) -> Classification {
        if self.embargoed {
            Classification::Embargoed
        } else {
            Classification::Public
        }
    }
}

/// A whitelist snapshot bound to a cutoff. Cheap to clone and share.
#[derive(Debug, Clone)]
pub struct EmbargoPolicy {
    whitelist: Arc<WhitelistSnapshot>,
    cutoff: CutoffDate,
}

impl EmbargoPolicy {
    pub fn new(whitelist: Arc<WhitelistSnapshot>, cutoff: CutoffDate) -> Self {
        Self { whitelist, cutoff }
    }

    pub fn cutoff(&self) -> CutoffDate {
        self.cutoff
    }

    /// Decide where the record named `name` goes. `name` is a basename.
    pub fn classify(&self, name: &str) -> Decision {
        classify(name, &self.whitelist, self.cutoff)
    }
}

/// [`EmbargoPolicy::classify`] against a borrowed snapshot.
pub fn classify(name: &str, whitelist: &WhitelistSnapshot, cutoff: CutoffDate) -> Decision {
    if !filename::is_web100(name) {
        return Decision::public(DecisionReason::NotWeb100);
    }
    let Some(date) = filename::parse_date(name) else {
        return Decision::embargoed(DecisionReason::InvalidDate);
    };
    if cutoff.precedes(date) {
        return Decision::public(DecisionReason::BeforeCutoff);
    }
    match filename::parse_ip(name) {
        Ok(ip) if whitelist.contains(&ip) => Decision::public(DecisionReason::Whitelisted),
        Ok(_) => Decision::embargoed(DecisionReason::NotWhitelisted),
        Err(IpParseError::Missing) => Decision {
            embargoed: NO_IP_EMBARGOED,
            reason: DecisionReason::NoIp,
        },
        Err(IpParseError::Invalid(_)) => Decision::embargoed(DecisionReason::InvalidIp),
    }
}

pub fn should_embargo(name: &str, whitelist: &WhitelistSnapshot, cutoff: CutoffDate) -> bool {
    classify(name, whitelist, cutoff).embargoed
}

//! Report status graph
//!
//! Status names, not database ids, carry meaning here; the infrastructure
//! resolves names to ids once at start-up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compliance report status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReportStatus {
    Draft,
    Submitted,
    RecommendedByAnalyst,
    RecommendedByManager,
    Assessed,
    Reassessed,
    AnalystAdjustment,
    Rejected,
    NotSubmitted,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 9] = [
        ReportStatus::Draft,
        ReportStatus::Submitted,
        ReportStatus::RecommendedByAnalyst,
        ReportStatus::RecommendedByManager,
        ReportStatus::Assessed,
        ReportStatus::Reassessed,
        ReportStatus::AnalystAdjustment,
        ReportStatus::Rejected,
        ReportStatus::NotSubmitted,
    ];

    /// Name stored in the status reference table
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "Draft",
            ReportStatus::Submitted => "Submitted",
            ReportStatus::RecommendedByAnalyst => "Recommended_by_analyst",
            ReportStatus::RecommendedByManager => "Recommended_by_manager",
            ReportStatus::Assessed => "Assessed",
            ReportStatus::Reassessed => "Reassessed",
            ReportStatus::AnalystAdjustment => "Analyst_adjustment",
            ReportStatus::Rejected => "Rejected",
            ReportStatus::NotSubmitted => "Not_submitted",
        }
    }

    /// Terminal reports no longer block a new version in their group
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportStatus::Assessed
                | ReportStatus::Reassessed
                | ReportStatus::Rejected
                | ReportStatus::NotSubmitted
        )
    }

    /// Assessed or Reassessed; the authoritative version of a group
    pub fn is_assessed(&self) -> bool {
        matches!(self, ReportStatus::Assessed | ReportStatus::Reassessed)
    }

    /// Statuses in which a reservation may be attached
    pub fn may_hold_reservation(&self) -> bool {
        matches!(
            self,
            ReportStatus::Submitted | ReportStatus::RecommendedByAnalyst | ReportStatus::RecommendedByManager
        )
    }

    /// Checks the legal edges of the report workflow
    pub fn can_transition_to(&self, to: ReportStatus) -> bool {
        use ReportStatus::*;
        matches!(
            (*self, to),
            (Draft, Submitted)
                | (Draft, NotSubmitted)
                | (Submitted, RecommendedByAnalyst)
                | (Submitted, Draft)
                | (Submitted, Rejected)
                | (RecommendedByAnalyst, RecommendedByManager)
                | (RecommendedByAnalyst, Submitted)
                | (RecommendedByAnalyst, Rejected)
                | (RecommendedByManager, Assessed)
                | (RecommendedByManager, Reassessed)
                | (RecommendedByManager, RecommendedByAnalyst)
                | (RecommendedByManager, Rejected)
                | (AnalystAdjustment, RecommendedByAnalyst)
                | (AnalystAdjustment, NotSubmitted)
        )
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown report status: {s}"))
    }
}

/// Who started a supplemental version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupplementalInitiator {
    Supplier,
    Government,
    AnalystAdjustment,
}

impl SupplementalInitiator {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupplementalInitiator::Supplier => "Supplier",
            SupplementalInitiator::Government => "Government",
            SupplementalInitiator::AnalystAdjustment => "Analyst_adjustment",
        }
    }

    /// Status a new version starts in
    pub fn initial_status(&self) -> ReportStatus {
        match self {
            SupplementalInitiator::Supplier | SupplementalInitiator::Government => ReportStatus::Draft,
            SupplementalInitiator::AnalystAdjustment => ReportStatus::AnalystAdjustment,
        }
    }
}

impl FromStr for SupplementalInitiator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Supplier" => Ok(SupplementalInitiator::Supplier),
            "Government" => Ok(SupplementalInitiator::Government),
            "Analyst_adjustment" => Ok(SupplementalInitiator::AnalystAdjustment),
            other => Err(format!("unknown supplemental initiator: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_have_no_outgoing_edges() {
        for from in ReportStatus::ALL.into_iter().filter(ReportStatus::is_terminal) {
            for to in ReportStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_core_path() {
        assert!(ReportStatus::Draft.can_transition_to(ReportStatus::Submitted));
        assert!(ReportStatus::Submitted.can_transition_to(ReportStatus::RecommendedByAnalyst));
        assert!(ReportStatus::RecommendedByAnalyst.can_transition_to(ReportStatus::RecommendedByManager));
        assert!(ReportStatus::RecommendedByManager.can_transition_to(ReportStatus::Assessed));
        assert!(!ReportStatus::Draft.can_transition_to(ReportStatus::Assessed));
        assert!(!ReportStatus::Draft.can_transition_to(ReportStatus::Rejected));
        assert!(ReportStatus::AnalystAdjustment.can_transition_to(ReportStatus::NotSubmitted));
    }

    #[test]
    fn test_names_round_trip() {
        for status in ReportStatus::ALL {
            assert_eq!(status.as_str().parse::<ReportStatus>().unwrap(), status);
        }
        assert_eq!(ReportStatus::AnalystAdjustment.to_string(), "Analyst_adjustment");
    }
}

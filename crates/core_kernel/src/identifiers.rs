//! Strongly-typed identifiers for domain entities
//!
//! Ledger and report rows are keyed by database sequences, so most
//! identifiers wrap an `i64`. Newtypes keep an organization id from being
//! passed where a transaction id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database key
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw database key
            pub const fn value(&self) -> i64 {
                self.0
            }

            /// Returns the identifier prefix for display
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(raw.parse()?))
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }
    };
}

// Ledger identifiers
define_id!(OrganizationId, "ORG");
define_id!(TransactionId, "TXN");
define_id!(TransferId, "CT");
define_id!(InitiativeAgreementId, "IA");
define_id!(AdminAdjustmentId, "AA");

// Compliance reporting identifiers
define_id!(ComplianceReportId, "CR");
define_id!(ChildRecordId, "REC");
define_id!(SummaryId, "SUM");

/// Identity shared by every version of one supplier's report for one period
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportGroupId(Uuid);

impl ReportGroupId {
    /// Creates a new random group identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReportGroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReportGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GRP-{}", self.0)
    }
}

impl FromStr for ReportGroupId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("GRP-").unwrap_or(s);
        Ok(Self(Uuid::parse_str(raw)?))
    }
}

impl From<Uuid> for ReportGroupId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identity of one child-record entity across its versions
///
/// A fuel supply row that is updated twice keeps the same entity group and
/// gains a higher version each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityGroupId(Uuid);

impl EntityGroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityGroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ENT-{}", self.0)
    }
}

impl From<Uuid> for EntityGroupId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_id_display() {
        let id = OrganizationId::new(42);
        assert_eq!(id.to_string(), "ORG-42");
    }

    #[test]
    fn test_id_parsing() {
        let original = TransactionId::new(9001);
        let parsed: TransactionId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);

        let bare: TransactionId = "17".parse().unwrap();
        assert_eq!(bare.value(), 17);
    }

    #[test]
    fn test_ids_order_by_value() {
        assert!(OrganizationId::new(1) < OrganizationId::new(2));
    }

    #[test]
    fn test_group_id_round_trip() {
        let group = ReportGroupId::new();
        let parsed: ReportGroupId = group.to_string().parse().unwrap();
        assert_eq!(group, parsed);
    }
}

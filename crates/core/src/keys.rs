//! Natural keys supplied by collaborators (group, player, district, month).

use core::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// External group identifier (as issued by the roster source).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

/// External player identifier, unique within a group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

/// District a player belongs to (roster metadata only).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistrictId(String);

macro_rules! impl_key_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Validate and wrap a raw key.
            ///
            /// Keys become segments of identity paths, so they must be
            /// non-empty and must not contain `/`.
            pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
                let raw = raw.into();
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: empty", $name)));
                }
                if trimmed.contains('/') {
                    return Err(DomainError::invalid_id(format!(
                        "{}: '{}' contains '/'",
                        $name, trimmed
                    )));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl ValueObject for $t {}
    };
}

impl_key_newtype!(GroupId, "GroupId");
impl_key_newtype!(PlayerId, "PlayerId");
impl_key_newtype!(DistrictId, "DistrictId");

/// Accounting month label, e.g. `JAN-24`.
///
/// Always derived from a calendar date (`%b-%y`, upper-cased) so every
/// collaborator lands on the same label for the same month.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonthLabel(String);

impl MonthLabel {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format("%b-%y").to_string().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `date` falls inside this month.
    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::from_date(date) == *self
    }
}

impl core::fmt::Display for MonthLabel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MonthLabel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Parse through a concrete day so only real months are accepted.
        let first_of_month = format!("01-{}", s.trim());
        let date = NaiveDate::parse_from_str(&first_of_month, "%d-%b-%y")
            .map_err(|e| DomainError::invalid_id(format!("MonthLabel '{s}': {e}")))?;
        Ok(Self::from_date(date))
    }
}

impl ValueObject for MonthLabel {}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn month_label_is_upper_cased_abbreviation() {
        assert_eq!(MonthLabel::from_date(date("2024-01-05")).as_str(), "JAN-24");
        assert_eq!(MonthLabel::from_date(date("2023-12-31")).as_str(), "DEC-23");
    }

    #[test]
    fn month_label_parses_case_insensitively() {
        let label: MonthLabel = "feb-24".parse().unwrap();
        assert_eq!(label.as_str(), "FEB-24");
        assert!(label.contains(date("2024-02-29")));
        assert!(!label.contains(date("2024-03-01")));
    }

    #[test]
    fn rejects_unknown_month() {
        assert!("FOO-24".parse::<MonthLabel>().is_err());
    }

    #[test]
    fn keys_reject_empty_and_slashes() {
        assert!(GroupId::new("  ").is_err());
        assert!(PlayerId::new("a/b").is_err());
        assert_eq!(GroupId::new(" g-7 ").unwrap().as_str(), "g-7");
    }

    #[test]
    fn keys_serialize_as_plain_strings() {
        let json = serde_json::to_string(&PlayerId::new("p1").unwrap()).unwrap();
        assert_eq!(json, "\"p1\"");
    }
}

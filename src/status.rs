//! The closed set of application statuses.
//!
//! Every stage is declared once in the `application_statuses!` table below,
//! together with its display label, badge colours and the stats group it
//! rolls up into. The enum, its lookup functions and `ALL` are generated from
//! that table.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Badge colours as `(background, foreground)` hex strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusColor {
    pub background: &'static str,
    pub foreground: &'static str,
}

/// Coarse bucket used for the dashboard counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusGroup {
    Applied,
    Interview,
    Offer,
    Rejected,
    Inactive,
}

macro_rules! application_statuses {
    ($($variant:ident => $label:literal, $group:ident, ($bg:literal, $fg:literal);)+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ApplicationStatus {
            $($variant,)+
        }

        impl ApplicationStatus {
            pub const ALL: &'static [ApplicationStatus] = &[$(ApplicationStatus::$variant,)+];

            pub fn label(self) -> &'static str {
                match self {
                    $(ApplicationStatus::$variant => $label,)+
                }
            }

            pub fn group(self) -> StatusGroup {
                match self {
                    $(ApplicationStatus::$variant => StatusGroup::$group,)+
                }
            }

            pub fn color(self) -> StatusColor {
                match self {
                    $(ApplicationStatus::$variant => StatusColor {
                        background: $bg,
                        foreground: $fg,
                    },)+
                }
            }
        }
    };
}

application_statuses! {
    Applied => "Applied", Applied, ("#dbeafe", "#1e40af");
    PhoneScreen => "Phone Screen", Interview, ("#fef9c3", "#854d0e");
    HrInterview => "HR Interview", Interview, ("#fef3c7", "#92400e");
    TechInterview => "Tech Interview", Interview, ("#ffedd5", "#9a3412");
    FinalRound => "Final Round", Interview, ("#f3e8ff", "#6b21a8");
    Offer => "Offer", Offer, ("#dcfce7", "#166534");
    Rejected => "Rejected", Rejected, ("#fee2e2", "#991b1b");
    Withdrawn => "Withdrawn", Inactive, ("#f3f4f6", "#1f2937");
    OnHold => "On Hold", Inactive, ("#f1f5f9", "#1e293b");
}

impl Default for ApplicationStatus {
    fn default() -> Self {
        ApplicationStatus::Applied
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown application status: {0}")]
pub struct UnknownStatus(pub String);

// "Phone Screen", "phone_screen" and "PHONESCREEN" all name the same stage.
fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

impl FromStr for ApplicationStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(value);
        if wanted.is_empty() {
            return Err(UnknownStatus(value.to_string()));
        }
        ApplicationStatus::ALL
            .iter()
            .copied()
            .find(|status| normalize(status.label()) == wanted)
            .ok_or_else(|| UnknownStatus(value.trim().to_string()))
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for ApplicationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ApplicationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

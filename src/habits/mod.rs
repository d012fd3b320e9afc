pub mod complete;
pub mod ledger;
pub mod registry;

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod fields {
    pub const USER_ID: &str = "user_id";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const STREAK_COUNT: &str = "streak_count";
    pub const LAST_COMPLETED: &str = "last_completed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
        }
    }
}

impl FromStr for Frequency {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" => Err(ValidationError::Missing { field: "frequency" }),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(ValidationError::UnknownFrequency {
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    #[serde(rename = "$id")]
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub frequency: Frequency,
    pub streak_count: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_completed: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitCompletion {
    #[serde(rename = "$id")]
    pub id: String,
    pub habit_id: String,
    pub user_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewHabit {
    pub title: String,
    pub description: String,
    pub frequency: Frequency,
}

impl NewHabit {
    pub fn parse(title: &str, description: &str, frequency: &str) -> Result<Self, ValidationError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ValidationError::Missing { field: "title" });
        }

        let description = description.trim();
        if description.is_empty() {
            return Err(ValidationError::Missing {
                field: "description",
            });
        }

        Ok(Self {
            title: title.to_string(),
            description: description.to_string(),
            frequency: frequency.parse()?,
        })
    }
}

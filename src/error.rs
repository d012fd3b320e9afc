use crate::store::{RemoteError, SubscriptionError};
use thiserror::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    Validation,
    Remote,
    Subscription,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("unsupported frequency: {value} (expected daily, weekly or monthly)")]
    UnknownFrequency { value: String },
}

#[derive(Debug, Error)]
pub enum HabitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    // Completion is in the ledger; the habit cache was not bumped.
    #[error("completion {completion_id} recorded but habit cache update failed: {source}")]
    CacheBehindLedger {
        completion_id: String,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl HabitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Remote(_) | Self::CacheBehindLedger { .. } => ErrorKind::Remote,
            Self::Subscription(_) => ErrorKind::Subscription,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Remote(RemoteError::NotFound { .. })
                | Self::CacheBehindLedger {
                    source: RemoteError::NotFound { .. },
                    ..
                }
        )
    }
}

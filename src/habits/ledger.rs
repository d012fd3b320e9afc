use super::registry::object;
use super::{HabitCompletion, fields};
use crate::store::{DocumentStore, Filter, RemoteError};
use anyhow::Context;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct CompletionLedger {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl CompletionLedger {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn list_completions(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HabitCompletion>, RemoteError> {
        let mut filters = vec![Filter::equal(fields::USER_ID, user_id)];
        if let Some(since) = since {
            filters.push(Filter::greater_than_equal(
                fields::COMPLETED_AT,
                since.timestamp_millis(),
            ));
        }

        self.store
            .query(&self.collection, &filters)
            .await?
            .into_iter()
            .map(|document| document.decode())
            .collect()
    }

    pub async fn list_today(&self, user_id: &str) -> Result<Vec<HabitCompletion>, RemoteError> {
        self.list_completions(user_id, Some(today_start()?)).await
    }

    pub async fn append(
        &self,
        user_id: &str,
        habit_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<HabitCompletion, RemoteError> {
        let completion: HabitCompletion = self
            .store
            .create(
                &self.collection,
                object(json!({
                    "habit_id": habit_id,
                    "user_id": user_id,
                    "completed_at": completed_at.timestamp_millis(),
                })),
            )
            .await?
            .decode()?;

        debug!(completion_id = %completion.id, habit_id, user_id, "completion appended");
        Ok(completion)
    }
}

pub fn today_start() -> Result<DateTime<Utc>, RemoteError> {
    local_midnight(Local::now()).map_err(|error| RemoteError::Backend(error.to_string()))
}

pub fn local_midnight<Tz: TimeZone>(now: DateTime<Tz>) -> anyhow::Result<DateTime<Utc>> {
    let start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .context("Failed to build midnight timestamp")?;

    // A DST jump can skip midnight; fall back to the earliest valid instant.
    let local = now
        .timezone()
        .from_local_datetime(&start)
        .earliest()
        .context("Failed to convert midnight to local time")?;

    Ok(local.with_timezone(&Utc))
}

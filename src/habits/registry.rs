use super::{Habit, NewHabit, fields};
use crate::error::HabitError;
use crate::store::{DocumentStore, Filter, ID_FIELD, RemoteError};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct HabitRegistry {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl HabitRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn list_habits(&self, user_id: &str) -> Result<Vec<Habit>, RemoteError> {
        self.store
            .query(&self.collection, &[Filter::equal(fields::USER_ID, user_id)])
            .await?
            .into_iter()
            .map(|document| document.decode())
            .collect()
    }

    pub async fn get_habit(&self, habit_id: &str) -> Result<Habit, RemoteError> {
        self.store
            .query(&self.collection, &[Filter::equal(ID_FIELD, habit_id)])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound {
                collection: self.collection.clone(),
                id: habit_id.to_string(),
            })?
            .decode()
    }

    pub async fn create_habit(
        &self,
        user_id: &str,
        title: &str,
        description: &str,
        frequency: &str,
    ) -> Result<Habit, HabitError> {
        let habit = NewHabit::parse(title, description, frequency)?;
        let now = Utc::now().timestamp_millis();

        let document = self
            .store
            .create(
                &self.collection,
                object(json!({
                    "user_id": user_id,
                    "title": habit.title,
                    "description": habit.description,
                    "frequency": habit.frequency.as_str(),
                    "streak_count": 0,
                    "last_completed": now,
                    "created_at": now,
                })),
            )
            .await?;

        let created: Habit = document.decode()?;
        info!(habit_id = %created.id, user_id, title = %created.title, "habit created");
        Ok(created)
    }

    pub async fn delete_habit(&self, habit_id: &str) -> Result<(), RemoteError> {
        self.store.delete(&self.collection, habit_id).await?;
        info!(habit_id, "habit deleted");
        Ok(())
    }

    pub async fn record_completion(
        &self,
        habit: &Habit,
        completed_at: DateTime<Utc>,
    ) -> Result<Habit, RemoteError> {
        let mut update = Map::new();
        update.insert(
            fields::STREAK_COUNT.to_string(),
            json!(habit.streak_count.saturating_add(1)),
        );
        update.insert(
            fields::LAST_COMPLETED.to_string(),
            json!(completed_at.timestamp_millis()),
        );

        let updated: Habit = self
            .store
            .update(&self.collection, &habit.id, update)
            .await?
            .decode()?;
        debug!(habit_id = %updated.id, streak_count = updated.streak_count, "habit cache updated");
        Ok(updated)
    }
}

pub(crate) fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

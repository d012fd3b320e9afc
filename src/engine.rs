use crate::error::HabitError;
use crate::habits::complete::{CompletionHandler, CompletionOutcome};
use crate::habits::ledger::{CompletionLedger, today_start};
use crate::habits::registry::HabitRegistry;
use crate::habits::{Habit, HabitCompletion};
use crate::store::DocumentStore;
use crate::streaks::StreakReport;
use crate::streaks::ranking::{RankedHabits, habit_streaks, rank};
use crate::sync::{AttachReport, SyncOptions, SyncSession, SyncState};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub database_id: String,
    pub habits_collection: String,
    pub completions_collection: String,
    pub sync: SyncOptions,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_id: "habitsync".to_string(),
            habits_collection: "habits".to_string(),
            completions_collection: "completions".to_string(),
            sync: SyncOptions::default(),
        }
    }
}

pub struct HabitEngine {
    registry: HabitRegistry,
    ledger: CompletionLedger,
    completions: CompletionHandler,
    session: SyncSession,
}

impl HabitEngine {
    pub fn new(store: Arc<dyn DocumentStore>, settings: &EngineSettings) -> Self {
        let registry = HabitRegistry::new(store.clone(), &settings.habits_collection);
        let ledger = CompletionLedger::new(store.clone(), &settings.completions_collection);
        let completions = CompletionHandler::new(registry.clone(), ledger.clone());
        let session = SyncSession::new(
            store,
            &settings.database_id,
            registry.clone(),
            ledger.clone(),
            settings.sync,
        );

        Self {
            registry,
            ledger,
            completions,
            session,
        }
    }

    pub async fn list_habits(&self, user_id: &str) -> Result<Vec<Habit>, HabitError> {
        Ok(self.registry.list_habits(user_id).await?)
    }

    pub async fn create_habit(
        &self,
        user_id: &str,
        title: &str,
        description: &str,
        frequency: &str,
    ) -> Result<Habit, HabitError> {
        self.registry
            .create_habit(user_id, title, description, frequency)
            .await
    }

    pub async fn delete_habit(&self, habit_id: &str) -> Result<(), HabitError> {
        Ok(self.registry.delete_habit(habit_id).await?)
    }

    pub async fn list_completions(&self, user_id: &str) -> Result<Vec<HabitCompletion>, HabitError> {
        Ok(self.ledger.list_completions(user_id, None).await?)
    }

    pub async fn list_today(&self, user_id: &str) -> Result<Vec<HabitCompletion>, HabitError> {
        if let Some(state) = self.synced_for(user_id) {
            return Ok(state.today_since(today_start()?));
        }
        Ok(self.ledger.list_today(user_id).await?)
    }

    pub async fn mark_complete(
        &self,
        user_id: &str,
        habit_id: &str,
    ) -> Result<CompletionOutcome, HabitError> {
        let completed_today = match self.synced_for(user_id) {
            Some(state) => state.completed_since(today_start()?),
            None => self
                .ledger
                .list_today(user_id)
                .await?
                .into_iter()
                .map(|completion| completion.habit_id)
                .collect::<HashSet<_>>(),
        };

        self.completions
            .mark_complete(user_id, habit_id, &completed_today)
            .await
    }

    pub async fn get_streak_data(
        &self,
        user_id: &str,
        habit_id: &str,
    ) -> Result<StreakReport, HabitError> {
        if let Some(state) = self.synced_for(user_id) {
            return Ok(state.streak_report(habit_id));
        }

        let habit = match self.registry.get_habit(habit_id).await {
            Ok(habit) => Some(habit),
            Err(error) => {
                let error = HabitError::from(error);
                if !error.is_not_found() {
                    return Err(error);
                }
                None
            }
        };
        let history = self.ledger.list_completions(user_id, None).await?;

        Ok(StreakReport::build(habit_id, habit.as_ref(), &history))
    }

    pub async fn get_ranked_habits(&self, user_id: &str) -> Result<RankedHabits, HabitError> {
        if let Some(state) = self.synced_for(user_id) {
            return Ok(state.ranked);
        }

        let habits = self.registry.list_habits(user_id).await?;
        let history = self.ledger.list_completions(user_id, None).await?;
        Ok(rank(habit_streaks(&habits, &history)))
    }

    pub async fn attach_sync(&self, user_id: &str) -> AttachReport {
        self.session.attach(user_id).await
    }

    pub fn detach_sync(&self) {
        self.session.detach();
    }

    pub fn sync(&self) -> &SyncSession {
        &self.session
    }

    fn synced_for(&self, user_id: &str) -> Option<SyncState> {
        let state = self.session.snapshot();
        let serving = state.user_id.as_deref() == Some(user_id);
        (serving && state.is_loaded() && state.history_tracked).then_some(state)
    }
}

use super::ledger::CompletionLedger;
use super::registry::HabitRegistry;
use super::{Habit, HabitCompletion};
use crate::error::HabitError;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    AlreadyCompleted,
    Recorded {
        completion: HabitCompletion,
        habit: Habit,
    },
}

#[derive(Clone)]
pub struct CompletionHandler {
    registry: HabitRegistry,
    ledger: CompletionLedger,
}

impl CompletionHandler {
    pub fn new(registry: HabitRegistry, ledger: CompletionLedger) -> Self {
        Self { registry, ledger }
    }

    // Two calls racing on a stale `completed_today` both append.
    pub async fn mark_complete(
        &self,
        user_id: &str,
        habit_id: &str,
        completed_today: &HashSet<String>,
    ) -> Result<CompletionOutcome, HabitError> {
        if completed_today.contains(habit_id) {
            debug!(habit_id, "habit already completed today");
            return Ok(CompletionOutcome::AlreadyCompleted);
        }

        let now = Utc::now();
        let completion = self.ledger.append(user_id, habit_id, now).await?;

        let cached = async {
            let habit = self.registry.get_habit(habit_id).await?;
            self.registry.record_completion(&habit, now).await
        };

        match cached.await {
            Ok(habit) => Ok(CompletionOutcome::Recorded { completion, habit }),
            Err(source) => {
                warn!(
                    habit_id,
                    completion_id = %completion.id,
                    error = %source,
                    "completion recorded but streak cache not updated"
                );
                Err(HabitError::CacheBehindLedger {
                    completion_id: completion.id,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CompletionHandler, CompletionOutcome};
    use crate::error::HabitError;
    use crate::habits::ledger::CompletionLedger;
    use crate::habits::registry::HabitRegistry;
    use crate::store::sqlite::SqliteStore;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn parts() -> (HabitRegistry, CompletionLedger, CompletionHandler) {
        let store = Arc::new(SqliteStore::open_in_memory("main").expect("store"));
        let registry = HabitRegistry::new(store.clone(), "habits");
        let ledger = CompletionLedger::new(store, "completions");
        let handler = CompletionHandler::new(registry.clone(), ledger.clone());
        (registry, ledger, handler)
    }

    #[tokio::test]
    async fn mark_complete_appends_then_bumps_cache() {
        let (registry, ledger, handler) = parts();
        let habit = registry
            .create_habit("u1", "Read", "20 pages", "daily")
            .await
            .expect("create");

        let outcome = handler
            .mark_complete("u1", &habit.id, &HashSet::new())
            .await
            .expect("complete");

        let CompletionOutcome::Recorded { completion, habit: updated } = outcome else {
            panic!("expected a recorded completion");
        };
        assert_eq!(updated.streak_count, 1);
        assert_eq!(updated.last_completed, completion.completed_at);

        let today = ledger.list_today("u1").await.expect("today");
        assert_eq!(today, vec![completion]);
    }

    #[tokio::test]
    async fn completed_today_set_short_circuits() {
        let (registry, ledger, handler) = parts();
        let habit = registry
            .create_habit("u1", "Read", "20 pages", "daily")
            .await
            .expect("create");
        let done = HashSet::from([habit.id.clone()]);

        let outcome = handler
            .mark_complete("u1", &habit.id, &done)
            .await
            .expect("complete");

        assert_eq!(outcome, CompletionOutcome::AlreadyCompleted);
        assert!(ledger.list_completions("u1", None).await.expect("list").is_empty());
        assert_eq!(registry.get_habit(&habit.id).await.expect("get").streak_count, 0);
    }

    // The ledger does not enforce one completion per day; a stale guard lets both through.
    #[tokio::test]
    async fn stale_guard_allows_double_completion() {
        let (registry, ledger, handler) = parts();
        let habit = registry
            .create_habit("u1", "Read", "20 pages", "daily")
            .await
            .expect("create");
        let stale = HashSet::new();

        handler
            .mark_complete("u1", &habit.id, &stale)
            .await
            .expect("first");
        handler
            .mark_complete("u1", &habit.id, &stale)
            .await
            .expect("second");

        assert_eq!(ledger.list_today("u1").await.expect("today").len(), 2);
        assert_eq!(registry.get_habit(&habit.id).await.expect("get").streak_count, 2);
    }

    #[tokio::test]
    async fn missing_habit_leaves_cache_behind_ledger() {
        let (_, ledger, handler) = parts();

        let result = handler
            .mark_complete("u1", "deleted-habit", &HashSet::new())
            .await;

        let Err(HabitError::CacheBehindLedger { completion_id, .. }) = result else {
            panic!("expected cache divergence error");
        };
        let history = ledger.list_completions("u1", None).await.expect("list");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, completion_id);
    }
}

pub mod feed;

use crate::error::HabitError;
use crate::habits::ledger::CompletionLedger;
use crate::habits::registry::HabitRegistry;
use crate::habits::{Habit, HabitCompletion};
use crate::store::{DocumentStore, FeedMessage, Subscription, collection_channel};
use crate::streaks::StreakReport;
use crate::streaks::ranking::{RankedHabits, habit_streaks, rank};
use feed::{Feed, SyncEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub full_history: bool,
    pub event_buffer: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            full_history: true,
            event_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Subscribed { user_id: String },
}

#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub epoch: u64,
    pub user_id: Option<String>,
    pub habits_feed: bool,
    pub completions_feed: bool,
    pub history_tracked: bool,
    pub habits: Vec<Habit>,
    pub today: Vec<HabitCompletion>,
    pub history: Vec<HabitCompletion>,
    pub habits_loaded: bool,
    pub today_loaded: bool,
    pub history_loaded: bool,
    pub ranked: RankedHabits,
}

impl SyncState {
    pub fn phase(&self) -> SessionPhase {
        match &self.user_id {
            Some(user_id) => SessionPhase::Subscribed {
                user_id: user_id.clone(),
            },
            None => SessionPhase::Idle,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.user_id.is_some()
            && self.habits_loaded
            && self.today_loaded
            && (self.history_loaded || !self.history_tracked)
    }

    // `today` is only refetched on new completions, so it can still hold
    // records from before the latest local midnight.
    pub fn today_since(&self, midnight: DateTime<Utc>) -> Vec<HabitCompletion> {
        self.today
            .iter()
            .filter(|completion| completion.completed_at >= midnight)
            .cloned()
            .collect()
    }

    pub fn completed_since(&self, midnight: DateTime<Utc>) -> HashSet<String> {
        self.today_since(midnight)
            .into_iter()
            .map(|completion| completion.habit_id)
            .collect()
    }

    pub fn streak_report(&self, habit_id: &str) -> StreakReport {
        let habit = self.habits.iter().find(|habit| habit.id == habit_id);
        StreakReport::build(habit_id, habit, &self.history)
    }

    fn rerank(&mut self) {
        self.ranked = rank(habit_streaks(&self.habits, &self.history));
    }
}

#[derive(Debug)]
pub struct AttachReport {
    pub habits_feed: bool,
    pub completions_feed: bool,
    pub failures: Vec<HabitError>,
}

pub struct SyncSession {
    store: Arc<dyn DocumentStore>,
    database_id: String,
    registry: HabitRegistry,
    ledger: CompletionLedger,
    options: SyncOptions,
    state: Arc<watch::Sender<SyncState>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncSession {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        database_id: &str,
        registry: HabitRegistry,
        ledger: CompletionLedger,
        options: SyncOptions,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::default());

        Self {
            store,
            database_id: database_id.to_string(),
            registry,
            ledger,
            options,
            state: Arc::new(state),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn attach(&self, user_id: &str) -> AttachReport {
        if self.state.borrow().user_id.is_some() {
            self.detach();
        }

        let mut epoch = 0;
        let history_tracked = self.options.full_history;
        self.state.send_modify(|state| {
            *state = SyncState {
                epoch: state.epoch + 1,
                user_id: Some(user_id.to_string()),
                history_tracked,
                ..SyncState::default()
            };
            epoch = state.epoch;
        });

        let (sender, receiver) = mpsc::channel(self.options.event_buffer.max(1));
        let mut subscriptions = Vec::new();
        let mut failures = Vec::new();

        for feed in [Feed::Habits, Feed::Completions] {
            let channel = collection_channel(&self.database_id, self.collection(feed));
            match self.store.subscribe(&channel).await {
                Ok(subscription) => subscriptions.push((feed, subscription)),
                Err(error) => {
                    warn!(
                        feed = feed.name(),
                        channel = %channel,
                        error = %error,
                        "change feed subscription failed; feed left unsubscribed"
                    );
                    failures.push(HabitError::from(error));
                }
            }
        }

        let habits_feed = subscriptions.iter().any(|(feed, _)| *feed == Feed::Habits);
        let completions_feed = subscriptions
            .iter()
            .any(|(feed, _)| *feed == Feed::Completions);

        let reconciler = Reconciler {
            registry: self.registry.clone(),
            ledger: self.ledger.clone(),
            user_id: user_id.to_string(),
            epoch,
            full_history: self.options.full_history,
            state: Arc::clone(&self.state),
        };
        reconciler.apply("feeds", |state| {
            state.habits_feed = habits_feed;
            state.completions_feed = completions_feed;
        });

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            // A detach that ran while we were subscribing wins.
            if self.state.borrow().epoch != epoch {
                debug!(user_id, "attach superseded before start");
                return AttachReport {
                    habits_feed: false,
                    completions_feed: false,
                    failures,
                };
            }

            tasks.extend(
                subscriptions
                    .into_iter()
                    .map(|(feed, subscription)| {
                        tokio::spawn(forward_feed(feed, subscription, sender.clone()))
                    }),
            );
            tasks.push(tokio::spawn(reconciler.run(receiver)));
        }

        info!(user_id, habits_feed, completions_feed, "sync attached");

        AttachReport {
            habits_feed,
            completions_feed,
            failures,
        }
    }

    pub fn detach(&self) {
        let mut previous = None;
        self.state.send_modify(|state| {
            state.epoch += 1;
            state.habits_feed = false;
            state.completions_feed = false;
            previous = state.user_id.take();
        });

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }

        if let Some(user_id) = previous {
            info!(user_id = %user_id, "sync detached");
        }
    }

    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub async fn wait_until_loaded(&self) -> SyncState {
        let mut receiver = self.watch();
        let loaded = receiver.wait_for(SyncState::is_loaded).await;
        match loaded {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }

    fn collection(&self, feed: Feed) -> &str {
        match feed {
            Feed::Habits => self.registry.collection(),
            Feed::Completions => self.ledger.collection(),
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn forward_feed(feed: Feed, mut subscription: Subscription, events: mpsc::Sender<SyncEvent>) {
    debug!(feed = feed.name(), channel = subscription.channel(), "feed forwarder started");

    while let Some(message) = subscription.next().await {
        let event = match message {
            FeedMessage::Notice(notice) => match feed.trigger(&notice) {
                Some(event) => {
                    debug!(
                        feed = feed.name(),
                        database_id = %event.database_id,
                        collection = %event.collection,
                        document_id = %event.document_id,
                        kind = event.kind.as_str(),
                        "change notice"
                    );
                    SyncEvent::Changed {
                        feed,
                        kind: event.kind,
                        document_id: event.document_id,
                    }
                }
                None => {
                    debug!(feed = feed.name(), document_id = %notice.document_id, "notice not watched");
                    continue;
                }
            },
            FeedMessage::Lagged(skipped) => {
                warn!(feed = feed.name(), skipped, "change feed lagged; forcing refetch");
                SyncEvent::Lagged { feed, skipped }
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }

    debug!(feed = feed.name(), "feed forwarder stopped");
}

struct Reconciler {
    registry: HabitRegistry,
    ledger: CompletionLedger,
    user_id: String,
    epoch: u64,
    full_history: bool,
    state: Arc<watch::Sender<SyncState>>,
}

impl Reconciler {
    async fn run(self, mut events: mpsc::Receiver<SyncEvent>) {
        self.refetch_habits().await;
        self.refetch_completions().await;

        while let Some(event) = events.recv().await {
            match &event {
                SyncEvent::Changed {
                    feed,
                    kind,
                    document_id,
                } => debug!(
                    feed = feed.name(),
                    kind = kind.as_str(),
                    document_id = %document_id,
                    "refetching after change"
                ),
                SyncEvent::Lagged { feed, skipped } => {
                    debug!(feed = feed.name(), skipped, "refetching after lag")
                }
            }

            match event.feed() {
                Feed::Habits => self.refetch_habits().await,
                Feed::Completions => self.refetch_completions().await,
            }
        }
    }

    async fn refetch_habits(&self) {
        match self.registry.list_habits(&self.user_id).await {
            Ok(habits) => {
                self.apply("habits", |state| {
                    state.habits = habits;
                    state.habits_loaded = true;
                });
            }
            Err(error) => warn!(user_id = %self.user_id, error = %error, "habit refetch failed"),
        }
    }

    async fn refetch_completions(&self) {
        match self.ledger.list_today(&self.user_id).await {
            Ok(today) => {
                self.apply("today", |state| {
                    state.today = today;
                    state.today_loaded = true;
                });
            }
            Err(error) => {
                warn!(user_id = %self.user_id, error = %error, "today completions refetch failed")
            }
        }

        if !self.full_history {
            return;
        }

        match self.ledger.list_completions(&self.user_id, None).await {
            Ok(history) => {
                self.apply("history", |state| {
                    state.history = history;
                    state.history_loaded = true;
                });
            }
            Err(error) => {
                warn!(user_id = %self.user_id, error = %error, "completion history refetch failed")
            }
        }
    }

    // Only applies while this reconciler's epoch is still current.
    fn apply(&self, view: &'static str, update: impl FnOnce(&mut SyncState)) -> bool {
        let epoch = self.epoch;
        let applied = self.state.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            update(state);
            state.rerank();
            true
        });

        if !applied {
            debug!(view, epoch, "discarding result for a detached session");
        }
        applied
    }
}

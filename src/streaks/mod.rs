pub mod ranking;

use crate::habits::{Habit, HabitCompletion};
use chrono::{DateTime, Utc};
use serde::Serialize;

const MS_PER_DAY: f64 = 86_400_000.0;

// Largest gap, in days, that still continues a streak.
pub const STREAK_GAP_DAYS: f64 = 1.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreakStats {
    pub streak: u32,
    pub best_streak: u32,
    pub total: u32,
}

pub fn compute_streak(completions: &[HabitCompletion]) -> StreakStats {
    let mut times = completions
        .iter()
        .map(|completion| completion.completed_at)
        .collect::<Vec<_>>();
    times.sort();

    let mut stats = StreakStats {
        total: u32::try_from(times.len()).unwrap_or(u32::MAX),
        ..StreakStats::default()
    };
    let mut previous: Option<DateTime<Utc>> = None;

    for at in times {
        stats.streak = match previous {
            Some(last) if gap_days(last, at) <= STREAK_GAP_DAYS => stats.streak + 1,
            _ => 1,
        };
        stats.best_streak = stats.best_streak.max(stats.streak);
        previous = Some(at);
    }

    stats
}

pub fn streak_for_habit(history: &[HabitCompletion], habit_id: &str) -> StreakStats {
    let completions = history
        .iter()
        .filter(|completion| completion.habit_id == habit_id)
        .cloned()
        .collect::<Vec<_>>();
    compute_streak(&completions)
}

fn gap_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MS_PER_DAY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakSource {
    Cached,
    Ledger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreakReport {
    pub habit_id: String,
    pub cached_streak: Option<u32>,
    pub last_completed: Option<DateTime<Utc>>,
    pub computed: StreakStats,
}

impl StreakReport {
    pub fn build(habit_id: &str, habit: Option<&Habit>, history: &[HabitCompletion]) -> Self {
        Self {
            habit_id: habit_id.to_string(),
            cached_streak: habit.map(|habit| habit.streak_count),
            last_completed: habit.map(|habit| habit.last_completed),
            computed: streak_for_habit(history, habit_id),
        }
    }

    pub fn current(&self, source: StreakSource) -> u32 {
        match source {
            StreakSource::Cached => self.cached_streak.unwrap_or_default(),
            StreakSource::Ledger => self.computed.streak,
        }
    }

    pub fn divergence(&self) -> Option<i64> {
        self.cached_streak
            .map(|cached| i64::from(cached) - i64::from(self.computed.streak))
    }
}

#[cfg(test)]
mod tests {
    use super::{StreakReport, StreakSource, StreakStats, compute_streak, streak_for_habit};
    use crate::habits::{Frequency, Habit, HabitCompletion};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).single().expect("time")
    }

    fn at_days(habit_id: &str, days: &[f64]) -> Vec<HabitCompletion> {
        days.iter()
            .enumerate()
            .map(|(index, day)| HabitCompletion {
                id: format!("c{index}"),
                habit_id: habit_id.to_string(),
                user_id: "u1".to_string(),
                completed_at: base() + Duration::milliseconds((day * 86_400_000.0) as i64),
            })
            .collect()
    }

    fn stats(streak: u32, best_streak: u32, total: u32) -> StreakStats {
        StreakStats {
            streak,
            best_streak,
            total,
        }
    }

    #[test]
    fn empty_history_is_all_zero() {
        assert_eq!(compute_streak(&[]), stats(0, 0, 0));
    }

    #[test]
    fn single_completion_starts_a_streak() {
        assert_eq!(compute_streak(&at_days("h", &[0.0])), stats(1, 1, 1));
    }

    #[test]
    fn gap_within_tolerance_continues() {
        assert_eq!(compute_streak(&at_days("h", &[0.0, 1.5])), stats(2, 2, 2));
    }

    #[test]
    fn gap_beyond_tolerance_resets_but_counts() {
        assert_eq!(compute_streak(&at_days("h", &[0.0, 1.51])), stats(1, 1, 2));
    }

    #[test]
    fn reset_after_two_day_run_keeps_best() {
        assert_eq!(
            compute_streak(&at_days("h", &[0.0, 1.0, 2.6])),
            stats(1, 2, 3)
        );
    }

    #[test]
    fn same_day_completions_extend_the_streak() {
        assert_eq!(
            compute_streak(&at_days("h", &[0.0, 0.1, 0.2])),
            stats(3, 3, 3)
        );
    }

    #[test]
    fn input_order_does_not_matter() {
        assert_eq!(
            compute_streak(&at_days("h", &[2.6, 0.0, 1.0])),
            compute_streak(&at_days("h", &[0.0, 1.0, 2.6]))
        );
    }

    #[test]
    fn best_streak_is_max_over_prefixes() {
        let days = [0.0, 1.0, 2.0, 5.0, 6.0, 10.0, 11.0, 12.0, 13.0, 20.0];
        let history = at_days("h", &days);

        let full = compute_streak(&history);
        let best_prefix = (1..=history.len())
            .map(|len| compute_streak(&history[..len]).streak)
            .max()
            .unwrap_or_default();

        assert_eq!(full.total as usize, history.len());
        assert!(full.best_streak >= full.streak);
        assert_eq!(full.best_streak, best_prefix);
        assert_eq!(full, stats(1, 4, 10));
    }

    #[test]
    fn per_habit_filter_ignores_other_habits() {
        let mut history = at_days("a", &[0.0, 1.0]);
        history.extend(at_days("b", &[0.5]));

        assert_eq!(streak_for_habit(&history, "a"), stats(2, 2, 2));
        assert_eq!(streak_for_habit(&history, "b"), stats(1, 1, 1));
        assert_eq!(streak_for_habit(&history, "c"), stats(0, 0, 0));
    }

    #[test]
    fn report_exposes_both_sources() {
        let habit = Habit {
            id: "a".to_string(),
            user_id: "u1".to_string(),
            title: "Read".to_string(),
            description: "20 pages".to_string(),
            frequency: Frequency::Daily,
            streak_count: 5,
            last_completed: base(),
            created_at: base(),
        };
        let history = at_days("a", &[0.0, 1.0, 2.6]);

        let report = StreakReport::build("a", Some(&habit), &history);
        assert_eq!(report.current(StreakSource::Cached), 5);
        assert_eq!(report.current(StreakSource::Ledger), 1);
        assert_eq!(report.divergence(), Some(4));

        let orphan = StreakReport::build("a", None, &history);
        assert_eq!(orphan.divergence(), None);
        assert_eq!(orphan.computed.total, 3);
    }
}

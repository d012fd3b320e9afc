use super::{StreakStats, streak_for_habit};
use crate::habits::{Habit, HabitCompletion};
use serde::Serialize;

const LEADERBOARD_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HabitStreak {
    pub habit: Habit,
    #[serde(flatten)]
    pub stats: StreakStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    First,
    Second,
    Third,
}

impl Tier {
    fn from_position(position: usize) -> Option<Self> {
        match position {
            0 => Some(Self::First),
            1 => Some(Self::Second),
            2 => Some(Self::Third),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::First => "1st",
            Self::Second => "2nd",
            Self::Third => "3rd",
        }
    }

    pub fn medal(self) -> &'static str {
        match self {
            Self::First => "gold",
            Self::Second => "silver",
            Self::Third => "bronze",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub tier: Tier,
    pub label: &'static str,
    pub medal: &'static str,
    pub habit_id: String,
    pub title: String,
    pub best_streak: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedHabits {
    pub leaderboard: Vec<LeaderboardEntry>,
    pub habits: Vec<HabitStreak>,
}

pub fn habit_streaks(habits: &[Habit], history: &[HabitCompletion]) -> Vec<HabitStreak> {
    habits
        .iter()
        .map(|habit| HabitStreak {
            habit: habit.clone(),
            stats: streak_for_habit(history, &habit.id),
        })
        .collect()
}

pub fn rank(mut entries: Vec<HabitStreak>) -> RankedHabits {
    entries.sort_by(|left, right| right.stats.best_streak.cmp(&left.stats.best_streak));

    let leaderboard = entries
        .iter()
        .take(LEADERBOARD_SIZE)
        .enumerate()
        .filter_map(|(position, entry)| {
            Tier::from_position(position).map(|tier| LeaderboardEntry {
                tier,
                label: tier.label(),
                medal: tier.medal(),
                habit_id: entry.habit.id.clone(),
                title: entry.habit.title.clone(),
                best_streak: entry.stats.best_streak,
            })
        })
        .collect();

    RankedHabits {
        leaderboard,
        habits: entries,
    }
}

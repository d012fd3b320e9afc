pub mod onboard;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "HabitSync", about = "Habit tracking with synced streaks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Onboard,
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    Habit {
        #[command(subcommand)]
        command: HabitCommands,
    },
    /// Mark a habit complete for today
    Complete { habit_id: String },
    /// Show streaks, or the dual streak report for one habit
    Streaks {
        #[arg(long)]
        habit: Option<String>,
    },
    /// Attach sync and serve the HTTP API
    Serve,
    Doctor,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}

#[derive(Debug, Subcommand)]
pub enum HabitCommands {
    List,
    Add {
        title: String,
        description: String,
        #[arg(long, default_value = "daily")]
        frequency: String,
    },
    Delete { habit_id: String },
}

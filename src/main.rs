mod api;
mod cli;
mod config;
mod engine;
mod error;
mod habits;
mod store;
mod streaks;
mod sync;

use crate::api::routes::ApiState;
use crate::cli::onboard::run_onboarding;
use crate::cli::{Cli, Commands, ConfigCommands, HabitCommands};
use crate::config::Config;
use crate::engine::HabitEngine;
use crate::error::HabitError;
use crate::habits::complete::CompletionOutcome;
use crate::store::sqlite::SqliteStore;
use crate::store::{DocumentStore, collection_channel};
use crate::streaks::StreakSource;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const INITIAL_LOAD_WAIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            let _ = run_onboarding()?;
            Ok(())
        }
        Commands::Config { command } => handle_config_command(command),
        Commands::Habit { command } => handle_habit_command(command).await,
        Commands::Complete { habit_id } => handle_complete(&habit_id).await,
        Commands::Streaks { habit } => handle_streaks(habit.as_deref()).await,
        Commands::Serve => {
            let config = load_config()?;
            run_service(config).await
        }
        Commands::Doctor => handle_doctor().await,
    }
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = load_or_default_config()?;
            config.set_value(&key, &value)?;
            config.ensure_bootstrap_files()?;
            config.save()?;

            println!("Config saved: {key} = {value}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = load_config()?;
            let value = config
                .get_value(&key)
                .with_context(|| format!("Unsupported config key: {key}"))?;

            println!("{value}");
            Ok(())
        }
    }
}

async fn handle_habit_command(command: HabitCommands) -> Result<()> {
    let config = load_config()?;
    let user_id = config.require_user()?;
    let engine = open_engine(&config)?;

    match command {
        HabitCommands::List => {
            let habits = engine.list_habits(user_id).await?;
            if habits.is_empty() {
                println!("No habits yet. Add one with `HabitSync habit add <title> <description>`.");
            }
            for habit in habits {
                println!(
                    "{}  {:<24} {:<8} streak {:>3}  last {}",
                    habit.id,
                    habit.title,
                    habit.frequency.as_str(),
                    habit.streak_count,
                    habit.last_completed.format("%Y-%m-%d %H:%M")
                );
            }
        }
        HabitCommands::Add {
            title,
            description,
            frequency,
        } => {
            let habit = engine
                .create_habit(user_id, &title, &description, &frequency)
                .await?;
            println!("Habit created: {} ({}, {})", habit.title, habit.frequency, habit.id);
        }
        HabitCommands::Delete { habit_id } => {
            engine
                .delete_habit(&habit_id)
                .await
                .with_context(|| format!("Failed to delete habit: {habit_id}"))?;
            println!("Habit deleted: {habit_id} (completion history kept)");
        }
    }

    Ok(())
}

async fn handle_complete(habit_id: &str) -> Result<()> {
    let config = load_config()?;
    let user_id = config.require_user()?;
    let engine = open_engine(&config)?;

    match engine.mark_complete(user_id, habit_id).await {
        Ok(CompletionOutcome::AlreadyCompleted) => {
            println!("Already completed today: {habit_id}");
        }
        Ok(CompletionOutcome::Recorded { completion, habit }) => {
            println!(
                "Completed {} at {} (streak {})",
                habit.title,
                completion.completed_at.format("%H:%M"),
                habit.streak_count
            );
        }
        Err(HabitError::CacheBehindLedger {
            completion_id,
            source,
        }) => {
            bail!(
                "Completion {completion_id} was recorded, but the habit's cached streak was not updated: {source}"
            );
        }
        Err(error) => return Err(error.into()),
    }

    Ok(())
}

async fn handle_streaks(habit_id: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let user_id = config.require_user()?;
    let engine = open_engine(&config)?;

    if let Some(habit_id) = habit_id {
        let report = engine.get_streak_data(user_id, habit_id).await?;
        println!("Streak report for {habit_id}");
        match report.cached_streak {
            Some(_) => println!("- cached streak: {}", report.current(StreakSource::Cached)),
            None => println!("- cached streak: (habit deleted)"),
        }
        println!("- ledger streak: {}", report.current(StreakSource::Ledger));
        println!("- best streak: {}", report.computed.best_streak);
        println!("- total completions: {}", report.computed.total);
        if let Some(last) = report.last_completed {
            println!("- last completed: {}", last.format("%Y-%m-%d %H:%M"));
        }
        match report.divergence() {
            Some(0) | None => {}
            Some(delta) => println!("[WARN] cached streak differs from ledger by {delta}"),
        }
        return Ok(());
    }

    let ranked = engine.get_ranked_habits(user_id).await?;
    if ranked.habits.is_empty() {
        println!("No habits yet.");
        return Ok(());
    }

    for entry in &ranked.leaderboard {
        println!(
            "{} ({}) {} - best {}",
            entry.label, entry.medal, entry.title, entry.best_streak
        );
    }
    println!();
    for entry in &ranked.habits {
        println!(
            "{:<24} current {:>3}  best {:>3}  total {:>4}",
            entry.habit.title, entry.stats.streak, entry.stats.best_streak, entry.stats.total
        );
    }

    Ok(())
}

async fn handle_doctor() -> Result<()> {
    let config_path = Config::config_path()?;
    let mut issues = Vec::new();

    if config_path.exists() {
        println!("[OK] config.json found: {}", config_path.display());
    } else {
        println!("[WARN] config.json not found: {}", config_path.display());
        issues.push("config missing".to_string());
    }

    let config = load_or_default_config()?;

    match config.require_user() {
        Ok(user_id) => println!("[OK] user configured: {user_id}"),
        Err(_) => {
            println!("[WARN] user_id not set");
            issues.push("user missing".to_string());
        }
    }

    match SqliteStore::open(&config.db_path, &config.database_id) {
        Ok(store) => {
            println!("[OK] SQLite reachable: {}", config.db_path.display());

            for collection in [&config.habits_collection, &config.completions_collection] {
                let channel = collection_channel(store.database_id(), collection);
                match store.subscribe(&channel).await {
                    Ok(_) => println!("[OK] change feed available: {channel}"),
                    Err(error) => {
                        println!("[WARN] change feed unavailable: {error}");
                        issues.push("feed unavailable".to_string());
                    }
                }
            }
        }
        Err(error) => {
            println!("[WARN] SQLite check failed: {error}");
            issues.push("db unreachable".to_string());
        }
    }

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.api_port));
    match TcpListener::bind(addr) {
        Ok(_) => println!("[OK] API port free: {addr}"),
        Err(error) => {
            println!("[WARN] API port unavailable ({addr}): {error}");
            issues.push("port busy".to_string());
        }
    }

    if issues.is_empty() {
        println!("doctor result: no issues");
    } else {
        println!("doctor result: {} warning(s)", issues.len());
    }

    Ok(())
}

async fn run_service(config: Config) -> Result<()> {
    config.ensure_bootstrap_files()?;
    let user_id = config.require_user()?.to_string();
    let engine = Arc::new(open_engine(&config)?);

    let report = engine.attach_sync(&user_id).await;
    for failure in &report.failures {
        warn!(error = %failure, "sync feed unavailable");
    }
    info!(
        habits_feed = report.habits_feed,
        completions_feed = report.completions_feed,
        "sync feeds attached"
    );

    match timeout(INITIAL_LOAD_WAIT, engine.sync().wait_until_loaded()).await {
        Ok(state) => info!(
            habits = state.habits.len(),
            completed_today = state.today.len(),
            "initial sync loaded"
        ),
        Err(_) => warn!("initial sync still loading; serving partial views"),
    }

    let state = ApiState {
        engine: Arc::clone(&engine),
        config: Arc::new(config),
    };

    info!(user_id = %user_id, "HabitSync service started");

    tokio::select! {
        api_result = api::run_server(state) => {
            api_result?;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    engine.detach_sync();
    Ok(())
}

fn open_engine(config: &Config) -> Result<HabitEngine> {
    let store = SqliteStore::open(&config.db_path, &config.database_id)?;
    let store: Arc<dyn DocumentStore> = Arc::new(store);
    Ok(HabitEngine::new(store, &config.engine_settings()))
}

fn load_or_default_config() -> Result<Config> {
    Config::load().or_else(|_| {
        let config = Config::default();
        config.ensure_bootstrap_files()?;
        config.save()?;
        Ok(config)
    })
}

fn load_config() -> Result<Config> {
    Config::load()
        .with_context(|| "Config file not found. Run `HabitSync onboard` first.".to_string())
}

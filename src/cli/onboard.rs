use crate::config::{Config, expand_home};
use crate::store::sqlite::SqliteStore;
use anyhow::{Context, Result};
use dialoguer::{Confirm, Input, theme::ColorfulTheme};

pub fn run_onboarding() -> Result<Config> {
    println!("──────────────────────────────────────────");
    println!("  Welcome to HabitSync onboarding.");
    println!("──────────────────────────────────────────");

    let theme = ColorfulTheme::default();
    let defaults = Config::load().unwrap_or_default();

    println!("\n[1/3] Who is tracking?");
    let user_id: String = Input::with_theme(&theme)
        .with_prompt("  User id")
        .with_initial_text(defaults.user_id.clone().unwrap_or_default())
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            if input.trim().is_empty() {
                Err("User id must not be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()
        .context("Failed to read user id")?;
    println!("  ✓ Tracking habits for {}", user_id.trim());

    println!("\n[2/3] Local habit store");
    let db_input: String = Input::with_theme(&theme)
        .with_prompt("  SQLite database file")
        .default(defaults.db_path.display().to_string())
        .interact_text()
        .context("Failed to read database path")?;
    let db_path = expand_home(&db_input);
    println!("  ✓ {}", db_path.display());

    println!("\n[3/3] Streak history");
    let sync_full_history = Confirm::with_theme(&theme)
        .with_prompt("  Keep full completion history in sync for streaks?")
        .default(defaults.sync_full_history)
        .interact()
        .context("Failed to read history sync input")?;

    let mut config = Config {
        db_path,
        sync_full_history,
        ..defaults
    };
    config.set_value("user_id", &user_id)?;

    config.ensure_bootstrap_files()?;
    config.save()?;
    let _ = SqliteStore::open(&config.db_path, &config.database_id)?;

    println!("\n──────────────────────────────────────────");
    println!("  Onboarding complete!");
    println!("  Run HabitSync habit add <title> <description> to create your first habit.");
    println!("──────────────────────────────────────────");

    Ok(config)
}

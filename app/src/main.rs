//! CWAC registry - command-line front end
//!
//! Opens the on-disk remote store and cache, loads the working set and runs
//! one command. Results are printed as JSON.

mod cli;
mod commands;
mod settings;
mod state;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command, SettingsCmd};
use serde::Serialize;
use settings::SettingsManager;
use state::{AppState, SessionOverrides};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish<T: Serialize>(result: commands::CommandResult<T>) -> anyhow::Result<()> {
    match result {
        Ok(value) => print(&value),
        Err(message) => anyhow::bail!(message),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut settings_manager = SettingsManager::new(&cli.data_dir);
    let settings_path = settings_manager.settings_path().display().to_string();
    settings_manager
        .load()
        .await
        .with_context(|| format!("reading {settings_path}"))?;

    let cmd = match cli.cmd {
        Command::Settings { cmd } => {
            return match cmd {
                SettingsCmd::Show => print(settings_manager.get()),
                SettingsCmd::Reset => print(settings_manager.reset().await?),
                SettingsCmd::SetRole { role } => {
                    let mut settings = settings_manager.get().clone();
                    settings.session.role = role;
                    settings_manager.update(settings).await?;
                    print(settings_manager.get())
                }
            };
        }
        cmd => cmd,
    };

    let overrides = SessionOverrides {
        role: cli.role,
        offline: cli.offline,
    };
    let state = AppState::open(&cli.data_dir, settings_manager.get(), overrides)
        .await
        .context("opening registry storage")?;

    if let Command::Load = cmd {
        return finish(commands::load_registry(&state).await);
    }

    let init = commands::initialize(&state)
        .await
        .map_err(anyhow::Error::msg)?;
    tracing::info!(source = %init.source, "working set ready");

    match cmd {
        Command::Load | Command::Settings { .. } => Ok(()),
        Command::Save => finish(commands::save_registry(&state).await),
        Command::Sync => finish(commands::sync_now(&state).await),
        Command::Reconnect => finish(commands::set_online(&state, true).await),
        Command::Status => print(&commands::get_sync_status(&state).await),
        Command::Stats => print(&commands::get_stats(&state).await),
        Command::List {
            collection,
            area,
            status,
        } => finish(
            commands::list_members(
                &state,
                collection.into(),
                area.as_deref(),
                status.as_deref(),
            )
            .await,
        ),
        Command::Search { term } => print(&commands::search_members(&state, &term).await),
        Command::EditPhone {
            area,
            index,
            number,
        } => finish(commands::edit_phone(&state, &area, index, &number).await),
        Command::SetStatus {
            area,
            index,
            status,
        } => finish(commands::set_status(&state, &area, index, &status).await),
        Command::Add {
            collection,
            name,
            id,
            phone,
            area,
            status,
        } => {
            let input = commands::AddMemberInput {
                name,
                id,
                call_number: phone,
                cwac_area: area,
                status,
            };
            finish(commands::add_member(&state, collection.into(), input).await)
        }
        Command::Delete {
            collection,
            area,
            index,
        } => finish(commands::delete_member(&state, collection.into(), &area, index).await),
        Command::Import { kind, path } => {
            finish(commands::import_members(&state, kind.into(), &path).await)
        }
        Command::Export { kind, dir } => {
            finish(commands::export_members(&state, kind.into(), dir.as_deref()).await)
        }
    }
}

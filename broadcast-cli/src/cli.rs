use anyhow::{Context, anyhow};
use broadcast_core::{
    BroadcastOrchestrator, Config, Location, ProviderId,
    broadcast::LocationSummarizer,
    store::JsonUserStore,
};
use chrono::{Local, SecondsFormat};
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode};

/// Target name accepted by `configure` for the messaging token.
const LINE_TARGET: &str = "line";

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-broadcast", version, about = "Daily weather broadcast to subscribers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store credentials: a provider API key or the LINE channel access token.
    Configure {
        /// "openweather", "weatherapi" or "line".
        target: String,
    },

    /// Register a subscriber, or move an existing one to a new location.
    Subscribe {
        /// Messaging user id.
        user_id: String,

        #[arg(long)]
        city: String,

        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },

    /// Print today's message for a location without sending anything.
    Preview {
        #[arg(long)]
        city: String,

        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },

    /// Broadcast today's weather to every subscriber.
    Run {
        /// Print the outcome counts as JSON.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let mut config = Config::load()?;

        match self.command {
            Command::Configure { target } => configure(&mut config, &target)?,
            Command::Subscribe { user_id, city, lat, lon } => {
                let location = Location::new(city, lat, lon)?;
                let path = config.users_file_path()?;
                let store = JsonUserStore::new(&path);
                let user = store
                    .upsert(&user_id, location)
                    .await
                    .with_context(|| format!("Failed to update {}", path.display()))?;
                tracing::info!(
                    user_id = %user.user_id,
                    city_name = user.location().city_name(),
                    users_file = %path.display(),
                    "Subscriber saved"
                );

                println!(
                    "Subscribed {} at {} ({}, {}); registered {}, updated {}",
                    user.user_id,
                    user.location().city_name(),
                    user.location().latitude(),
                    user.location().longitude(),
                    user.created_at().with_timezone(&Local).to_rfc3339_opts(SecondsFormat::Secs, true),
                    user.updated_at().with_timezone(&Local).to_rfc3339_opts(SecondsFormat::Secs, true),
                );
            }
            Command::Preview { city, lat, lon } => {
                let location = Location::new(city, lat, lon)?;
                let summarizer = LocationSummarizer::from_config(&config)?;
                let weather = summarizer.summarize(&location).await?;

                println!("Variant: {}", config.broadcast.variant);
                println!();
                println!("{}", summarizer.render(&location, &weather));
            }
            Command::Run { json } => {
                let started = Local::now();
                tracing::info!(
                    variant = %config.broadcast.variant,
                    concurrency = config.broadcast.concurrency,
                    "Preparing broadcast"
                );
                let orchestrator = BroadcastOrchestrator::from_config(&config)?;
                let report = orchestrator.execute().await.context("Broadcast aborted")?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    return Ok(());
                }

                println!(
                    "Broadcast started {}: {} users in {} locations",
                    started.format("%Y-%m-%d %H:%M:%S"),
                    report.users,
                    report.groups
                );
                println!("  delivered:          {}", report.delivered);
                println!("  failed:             {}", report.failed);
                println!("  groups skipped:     {}", report.groups_skipped);
                println!("  groups not started: {}", report.groups_not_started);
            }
        }

        Ok(())
    }
}

fn configure(config: &mut Config, target: &str) -> anyhow::Result<()> {
    if target.eq_ignore_ascii_case(LINE_TARGET) {
        let token = prompt_secret("LINE channel access token:")?;
        config.set_channel_access_token(token);
        config.save()?;
        println!("Saved LINE channel access token to {}", Config::config_file_path()?.display());
        return Ok(());
    }

    let id = ProviderId::try_from(target)
        .map_err(|e| anyhow!("{e}\nUse `{LINE_TARGET}` to configure the messaging token."))?;
    let api_key = prompt_secret(&format!("API key for {id}:"))?;
    config.upsert_provider_api_key(id, api_key);
    config.save()?;

    println!("Saved API key for {id} to {}", Config::config_file_path()?.display());
    let source = config.data_source_id();
    if !config.is_provider_configured(source) {
        println!(
            "Note: the configured variant `{}` reads from {source}, which has no API key yet.",
            config.broadcast.variant
        );
    }
    Ok(())
}

fn prompt_secret(message: &str) -> anyhow::Result<String> {
    let value = Password::new(message)
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read input")?;

    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(anyhow!("Value must not be empty"));
    }
    Ok(value)
}

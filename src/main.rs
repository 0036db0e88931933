use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gradewatch::cache::store::{CacheStore, FileCacheStore};
use gradewatch::config::Config;
use gradewatch::cycle::{AudiencePlan, CycleRunner};
use gradewatch::export::write_csv;
use gradewatch::notify::sink::{Audience, NotifySink, StdoutSink, TelegramSink};
use gradewatch::snapshot::aliases::AliasTable;
use gradewatch::snapshot::schema::RawRow;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "gradewatch",
    about = "Grade change watcher for university portal records"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one normalize-compare-notify-commit cycle over extracted rows.
    Run {
        /// JSON array of raw rows; reads stdin when omitted.
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Skip delivery for this cycle; the snapshot still commits.
        #[arg(long)]
        no_notify: bool,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
    /// Write the cached snapshot as a CSV grade table.
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(Some(&config_path))?;

    match &cli.command {
        Commands::Run { input, no_notify } => {
            run_cycle(&config, input.as_deref(), *no_notify).await
        }
        Commands::Config { init, show } => handle_config(&config, &config_path, *init, *show),
        Commands::Export { output } => export_snapshot(&config, output),
    }
}

async fn run_cycle(config: &Config, input: Option<&Path>, no_notify: bool) -> Result<()> {
    let rows = read_rows(input)?;
    info!(rows = rows.len(), "raw extraction received");

    let aliases = match config.alias_path() {
        Some(path) => AliasTable::load(&path)?,
        None => AliasTable::default(),
    };
    let store = FileCacheStore::new(config.resolved_cache_path());
    let notify_enabled = config.notify.enabled && !no_notify;

    let runner = CycleRunner::new(
        store,
        aliases,
        config.value_parser(),
        config.message.clone(),
        notify_enabled,
        build_audience_plans(config),
    );
    let report = runner.run(&rows).await?;

    info!(
        changes = report.changes.len(),
        row_errors = report.row_errors.len(),
        committed = report.committed,
        "cycle finished"
    );
    for (audience, outcome) in &report.deliveries {
        info!(%audience, ?outcome, "delivery outcome");
    }
    Ok(())
}

fn build_audience_plans(config: &Config) -> Vec<AudiencePlan> {
    let token = config.notify.telegram.resolved_bot_token();
    [Audience::Summary, Audience::Detail]
        .into_iter()
        .map(|audience| {
            let settings = config.audience(audience);
            let mut sinks: Vec<Box<dyn NotifySink>> = Vec::new();
            if config.notify.stdout {
                sinks.push(Box::new(StdoutSink));
            }
            let chat_id = settings.telegram_chat_id.trim();
            if let Some(token) = token.as_deref() {
                if !chat_id.is_empty() {
                    sinks.push(Box::new(TelegramSink::new(
                        token,
                        chat_id,
                        config.notify.telegram.parse_mode.clone(),
                    )));
                }
            }
            AudiencePlan {
                audience,
                enabled: settings.enabled,
                mandatory: settings.mandatory,
                sinks,
            }
        })
        .collect()
}

fn read_rows(input: Option<&Path>) -> Result<Vec<RawRow>> {
    let data = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed reading raw rows: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed reading raw rows from stdin")?;
            buffer
        }
    };
    serde_json::from_str(&data).context("raw rows are not a JSON array of row objects")
}

fn handle_config(config: &Config, config_path: &Path, init: bool, show: bool) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", serde_json::to_string_pretty(config)?);
    }
    Ok(())
}

fn export_snapshot(config: &Config, output: &Path) -> Result<()> {
    let store = FileCacheStore::new(config.resolved_cache_path());
    let state = store.load()?;
    let written = write_csv(&state.snapshot, output)?;
    println!("Wrote {written} records to {}", output.display());
    Ok(())
}

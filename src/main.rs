use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use summonbot::batcher::Batcher;
use summonbot::config::{self, Config, Secrets};
use summonbot::ledger::Ledger;
use summonbot::reddit::{RedditClient, Sort};
use summonbot::scanner::{FeedQuery, ScanReport, Scanner};
use summonbot::sheets::SheetsClient;
use summonbot::store::SqliteStore;
use summonbot::summoner::{DirectoryRange, Summoner};

#[derive(Debug, Parser)]
#[command(author, version, about = "Summon subscribers to new competition posts")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Seconds between scans; overrides `app.interval_seconds`. 0 runs once.
    #[arg(long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let secrets = Secrets::from_env()?;

    let scanner = build_scanner(&cfg, &secrets).await?;
    let interval = args.interval.unwrap_or(cfg.app.interval_seconds);

    if interval == 0 {
        let report = scanner.run_once().await?;
        log_report(&report);
        info!(outcomes = report.outcomes.len(), "DONE");
        return Ok(());
    }

    info!(interval, "starting scan loop");
    loop {
        match scanner.run_once().await {
            Ok(report) => {
                log_report(&report);
                info!(outcomes = report.outcomes.len(), "scan complete");
            }
            // Committed progress stays in the ledger; the next tick picks it up.
            Err(err) => error!(?err, "scan failed"),
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

fn log_report(report: &ScanReport) {
    for (event_id, outcome) in &report.outcomes {
        info!(event_id = %event_id, outcome = outcome.as_str(), "event handled");
    }
}

async fn build_scanner(cfg: &Config, secrets: &Secrets) -> Result<Scanner> {
    let store = SqliteStore::connect(&cfg.database_url()).await?;
    let ledger = Ledger::new(Arc::new(store));

    let reddit = Arc::new(RedditClient::from_config(cfg, secrets)?);
    let sheets = Arc::new(SheetsClient::new(secrets.google_api_token.clone())?);

    let batcher = Batcher::new(
        cfg.limits(),
        &cfg.summon.mention_prefix,
        cfg.summon.batch_prefix.clone(),
    );
    let summoner = Summoner::new(
        reddit.clone(),
        sheets,
        ledger,
        batcher,
        DirectoryRange {
            sheet_id: cfg.sheets.spreadsheet_id.clone(),
            range: cfg.sheets.range.clone(),
        },
        cfg.summon.announcement.clone(),
    );

    Ok(Scanner::new(
        reddit,
        summoner,
        cfg.classifier(),
        FeedQuery {
            subreddit: cfg.reddit.subreddit.clone(),
            sort: Sort::New,
            limit: cfg.reddit.listing_limit,
        },
    ))
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use summonbot::config;
use summonbot::ledger::Ledger;
use summonbot::store::SqliteStore;

#[derive(Parser, Debug)]
#[command(about = "Show completion markers and pending resume tokens")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Delete every record for this event id so the next scan treats it as new
    #[arg(long)]
    forget: Option<String>,
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
    let store = SqliteStore::connect(&cfg.database_url()).await?;
    let ledger = Ledger::new(Arc::new(store));

    if let Some(event_id) = args.forget {
        ledger.forget(&event_id).await?;
        println!("Forgot {}", event_id);
        return Ok(());
    }

    let completed = ledger.list_completed().await?;
    println!("Completed events ({}):", completed.len());
    for id in completed {
        println!("  {}", id);
    }

    let pending = ledger.list_pending_tokens().await?;
    println!("Pending resume tokens ({}):", pending.len());
    for (id, token) in pending {
        println!(
            "  {} -> {{ parent: {}, cursor: {} (row {}), updated: {} }}",
            id,
            token.parent_message_id,
            token.last_processed_subscriber,
            token.last_processed_index,
            token.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

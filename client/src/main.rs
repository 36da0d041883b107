//! `gardensync` - inspect and repair the local sync queue.

use clap::{Parser, Subcommand};
use gardensync_client::{open_local_store, telemetry, LocalStore, SyncConfig};
use gardensync_engine::{Clock, QueueStatus, Seq, SystemClock};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "gardensync")]
#[command(about = "Inspect and repair the GardenSync local queue", long_about = None)]
struct Args {
    /// Local database (overrides GARDENSYNC_DATABASE_URL)
    #[arg(short, long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue counts per status and the last sync time
    Status {
        /// User whose last sync time to show
        #[arg(short, long)]
        user: Option<String>,
    },
    /// List queued operations
    Queue {
        /// Only operations with this status
        #[arg(short, long)]
        status: Option<QueueStatus>,
    },
    /// Requeue a failed operation
    Retry { seq: Seq },
    /// Drop completed operations and settled tombstones past the retention window
    Purge,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let args = Args::parse();
    let mut config = SyncConfig::from_env()?;
    if let Some(database) = args.database {
        config.database_url = database;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_local_store(&config.database_url, clock.clone()).await?;

    match args.command {
        Command::Status { user } => status(store.as_ref(), user.as_deref()).await?,
        Command::Queue { status } => queue(store.as_ref(), status).await?,
        Command::Retry { seq } => {
            if store.requeue_failed(seq).await? {
                println!("operation {seq} requeued");
            } else {
                return Err(format!("operation {seq} is not failed").into());
            }
        }
        Command::Purge => {
            let cutoff = clock.now().saturating_sub(config.retention_ms());
            let operations = store.purge_completed(cutoff).await?;
            let tombstones = store.purge_tombstones(cutoff).await?;
            println!("purged {operations} completed operations, {tombstones} tombstones");
        }
    }

    Ok(())
}

async fn status(store: &dyn LocalStore, user: Option<&str>) -> gardensync_client::Result<()> {
    for status in QueueStatus::ALL {
        let count = store.operations_with_status(status).await?.len();
        println!("{:<12} {count}", status.as_str());
    }

    if let Some(user) = user {
        let last_sync = store
            .load_settings(user)
            .await?
            .and_then(|settings| settings.last_sync_at)
            .and_then(|ms| chrono::DateTime::from_timestamp_millis(i64::try_from(ms).ok()?));
        match last_sync {
            Some(at) => println!("last sync    {}", at.to_rfc3339()),
            None => println!("last sync    never"),
        }
    }
    Ok(())
}

async fn queue(store: &dyn LocalStore, status: Option<QueueStatus>) -> gardensync_client::Result<()> {
    let statuses = match status {
        Some(status) => vec![status],
        None => QueueStatus::ALL.to_vec(),
    };

    let mut ops = Vec::new();
    for status in statuses {
        ops.extend(store.operations_with_status(status).await?);
    }
    ops.sort_by_key(|op| op.seq);

    for op in ops {
        println!(
            "{:>6}  {:<11} {:<6} {}/{}  attempts={}{}",
            op.seq,
            op.status.as_str(),
            op.kind.as_str(),
            op.collection,
            op.document_id,
            op.attempt_count,
            op.last_error
                .map(|e| format!("  error={e}"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

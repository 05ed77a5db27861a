//! tabula: record store over newline-delimited JSON
//!
//! Reads one request per line from stdin and writes one response per line to
//! stdout. Logs go to stderr.
//!
//! ```text
//! $ echo '{"operation":"createProfile","userId":"U1","name":"Ann"}' | tabula
//! {"ok":true,"record":{"createdAt":"...","name":"Ann","partitionKey":"U1","sortKey":"PROFILE#..."}}
//! ```
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: sqlite
//!   sqlite:
//!     path: ./data/tabula.db
//!
//! reaper:
//!   enabled: true
//!   interval_secs: 30
//!   batch_size: 100
//!
//! entities:
//!   activity_ttl_secs: 86400
//! ```

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

use tabula::config::Config;
use tabula::dispatch::Dispatcher;
use tabula::repository::EntityRepository;
use tabula::storage::{init_storage, TtlReaper};
use tabula::utils::bootstrap::{init_tracing, parse_config_path};
use tabula::utils::clock::{Clock, SystemClock};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting tabula");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = init_storage(&config.storage, clock.clone()).await?;

    let reaper = if config.reaper.enabled {
        let reaper = TtlReaper::new(store.clone())
            .with_interval(config.reaper.interval())
            .with_batch_size(config.reaper.batch_size);
        Some(reaper.spawn())
    } else {
        info!("TTL reaper disabled");
        None
    };

    let entities =
        EntityRepository::with_activity_ttl(store, clock, config.entities.activity_ttl());
    let dispatcher = Dispatcher::new(entities);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = dispatcher.handle_json(&line).await;
                stdout.write_all(response.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!("Shutting down...");
    if let Some(reaper) = reaper {
        reaper.shutdown().await;
    }

    info!("Shutdown complete");
    Ok(())
}

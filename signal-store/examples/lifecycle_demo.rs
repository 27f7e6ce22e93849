use anyhow::Result;
use signal_store::{create_config_template, load_config, Direction, SignalDraft, SignalStore, StoreConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Signal lifecycle walkthrough
///
/// Usage: cargo run -p signal-store --example lifecycle_demo [config.toml]
/// Without a config file the store is created in a temporary directory.

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let scratch = tempfile::tempdir()?;
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            if !path.exists() {
                create_config_template(&path)?;
                info!("Wrote config template to {}", path.display());
            }
            load_config(&path)?
        }
        None => StoreConfig {
            data_dir: scratch.path().join("data"),
            ..StoreConfig::default()
        },
    };

    let store = SignalStore::open(config).await?;
    let now = chrono::Utc::now().with_timezone(&store.config().tz()?);
    let entry = |offset_minutes: i64| {
        (now + chrono::Duration::minutes(offset_minutes))
            .format("%H:%M")
            .to_string()
    };

    info!("=== Saving candidates ===");
    let candidates = vec![
        SignalDraft::new("EURUSD", Direction::Up, 0.82, entry(0)).with_reason("Bounce off support"),
        SignalDraft::new("GBPJPY", Direction::Down, 0.77, entry(1)).with_duration(3),
        SignalDraft::new("USDCHF", Direction::Up, 0.74, entry(2)),
        SignalDraft::new("AUDCAD", Direction::Down, 0.71, entry(2)),
    ];
    let outcome = store.lifecycle().save(candidates).await?;
    if let Some(report) = outcome.report() {
        info!(
            "Saved {:?}, {} did not fit",
            report.saved_ids, report.rejected_capacity
        );
    }

    let collection = store.lifecycle().load().await;
    for signal in &collection.signals {
        let phase = store
            .lifecycle()
            .evaluator()
            .phase(signal, &now.fixed_offset());
        info!(
            "  {} {} @ {} ({:.0}%) {:?}",
            signal.asset,
            signal.direction,
            signal.entry_time,
            signal.confidence * 100.0,
            phase
        );
    }
    info!(
        "{} stored, {} active",
        collection.total_count, collection.active_count
    );

    info!("=== Recording feedback ===");
    if let Some(first) = collection.signals.first() {
        store
            .feedback()
            .record(&first.id, true, Some("Closed in profit"))
            .await?;
    }

    let summary = store.learning().summary().await;
    for (asset, record) in &summary.per_asset {
        info!(
            "  {}: {} wins / {} losses ({:.0}%)",
            asset,
            record.wins,
            record.losses,
            record.win_rate() * 100.0
        );
    }

    let stats = store.lifecycle().stats().await;
    info!("Stats: {:?}", stats);

    let cleanup = store.lifecycle().cleanup().await?;
    info!("Cleanup: {:?}", cleanup);

    Ok(())
}

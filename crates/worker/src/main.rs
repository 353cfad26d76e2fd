use clap::Parser;
use senticker_core::domain::sentiment::aggregate;
use senticker_core::ingest::{FetchOptions, HttpNewsProvider};
use senticker_core::pipeline::{self, InitOutcome};
use senticker_core::storage::CacheStore;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod tickers;

#[derive(Debug, Parser)]
#[command(name = "senticker_worker")]
struct Args {
    /// Comma-separated tickers to preload. Defaults to PRELOAD_TICKERS.
    #[arg(long)]
    tickers: Option<String>,

    /// Refetch even when the cache already has rows.
    #[arg(long)]
    force: bool,

    /// Log what would be fetched without touching the network or the cache.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = senticker_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let tickers = tickers::resolve_preload_tickers(&settings, args.tickers.as_deref())?;
    let opts = FetchOptions::from_env();
    let store = CacheStore::new(settings.cache_path.clone());

    if args.dry_run {
        tracing::info!(
            ?tickers,
            cache = %store.path().display(),
            cached_rows = store.load().len(),
            page_size = opts.page_size,
            max_articles = opts.max_articles,
            lookback_hours = opts.lookback_hours,
            dry_run = true,
            "preload plan"
        );
        return Ok(());
    }

    let provider = HttpNewsProvider::from_settings(&settings)?;

    match pipeline::initialize(&provider, &store, &opts, &tickers, args.force).await {
        Ok(InitOutcome::Cached { rows }) => {
            tracing::info!(rows, "cache already populated; use --force to refetch");
        }
        Ok(InitOutcome::Preloaded(report)) => {
            for (ticker, _) in &report.refreshed {
                let dist = aggregate(&store.records_for(ticker));
                tracing::info!(
                    %ticker,
                    positive = dist.positive,
                    neutral = dist.neutral,
                    negative = dist.negative,
                    "cached sentiment"
                );
            }
            for (ticker, error) in &report.failed {
                tracing::error!(%ticker, %error, "ticker not preloaded");
            }
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "preload run failed");
            return Err(err);
        }
    }

    Ok(())
}

fn init_sentry(settings: &senticker_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

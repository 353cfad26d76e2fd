use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use senticker_core::domain::article::canonical_symbol;
use senticker_core::domain::sentiment::SentimentFilter;
use senticker_core::ingest::{
    FetchError, FetchErrorKind, FetchOptions, HttpNewsProvider, NewsProvider,
};
use senticker_core::pipeline::{self, TickerView};
use senticker_core::storage::CacheStore;

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

    let store = CacheStore::new(settings.cache_path.clone());
    let opts = FetchOptions::from_env();

    let provider: Option<Arc<dyn NewsProvider>> = match HttpNewsProvider::from_settings(&settings)
    {
        Ok(p) => Some(Arc::new(p)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "news API not configured; serving cache only");
            None
        }
    };

    // Populate the cache before the first request is served.
    if let Some(provider) = &provider {
        if let Err(e) = pipeline::initialize(
            provider.as_ref(),
            &store,
            &opts,
            &settings.preload_tickers,
            false,
        )
        .await
        {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "cache initialization failed; continuing with existing cache");
        }
    }

    let state = AppState {
        provider,
        store,
        opts,
        writer: Arc::new(tokio::sync::Mutex::new(())),
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/news/:ticker", get(get_news))
        .route("/cache", get(list_cached_symbols))
        .route("/cache/:ticker", get(get_cached_news))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    provider: Option<Arc<dyn NewsProvider>>,
    store: CacheStore,
    opts: FetchOptions,
    // Serializes cache writes from concurrent requests.
    writer: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Debug, Default, Deserialize)]
struct ViewQuery {
    sentiment: Option<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

fn parse_request(ticker: &str, query: &ViewQuery) -> Result<(String, SentimentFilter), ApiError> {
    let symbol = canonical_symbol(ticker)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "ticker must be non-empty"))?;

    let filter = match query.sentiment.as_deref() {
        Some(s) => s
            .parse::<SentimentFilter>()
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => SentimentFilter::All,
    };

    Ok((symbol, filter))
}

fn fetch_error_response(err: FetchError) -> ApiError {
    let status = match &err.kind {
        FetchErrorKind::InvalidTicker => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    ApiError::new(status, err.to_string())
}

async fn get_news(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<TickerView>, ApiError> {
    let (symbol, filter) = parse_request(&ticker, &query)?;

    let Some(provider) = &state.provider else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "news API is not configured",
        ));
    };

    let _writer = state.writer.lock().await;
    // A failed cache write is logged inside; the fetched records are still served.
    let records =
        pipeline::refresh_for_display(provider.as_ref(), &state.store, &state.opts, &symbol)
            .await
            .map_err(|e| {
                tracing::warn!(%symbol, error = %e, "on-demand fetch failed");
                fetch_error_response(e)
            })?;

    Ok(Json(TickerView::build(&symbol, records, filter)))
}

async fn get_cached_news(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<TickerView>, ApiError> {
    let (symbol, filter) = parse_request(&ticker, &query)?;
    let records = state.store.records_for(&symbol);
    Ok(Json(TickerView::build(&symbol, records, filter)))
}

async fn list_cached_symbols(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.store.symbols())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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

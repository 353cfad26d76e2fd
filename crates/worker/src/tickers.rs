use senticker_core::config::{parse_ticker_list, Settings};

/// Preload list: CLI override first, then `PRELOAD_TICKERS` from settings.
pub fn resolve_preload_tickers(
    settings: &Settings,
    cli_override: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let tickers = match cli_override {
        Some(raw) => parse_ticker_list(raw),
        None => settings.preload_tickers.clone(),
    };

    anyhow::ensure!(
        !tickers.is_empty(),
        "preload ticker list is empty (set PRELOAD_TICKERS or pass --tickers)"
    );
    Ok(tickers)
}

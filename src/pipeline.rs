use anyhow::{Context, Result};
use chrono::Utc;
use std::io::{BufRead, Write};
use tracing::{error, info, warn};
use crate::analysis::lead_lag::{lead_lag, pearson};
use crate::analysis::panel::build_aligned_panel;
use crate::analysis;
use crate::collect::markets::MarketCollector;
use crate::collect::reference::collect_reference;
use crate::collect::survey::survey_series;
use crate::config::Config;
use crate::data::kalshi::KalshiClient;
use crate::data::store::{CsvStore, PanelSource};
use crate::data::yahoo::YahooClient;
use crate::error::PipelineError;
use crate::monitoring::charts::ChartWriter;
use crate::monitoring::report::ReportWriter;

/// Lags reported by the exploratory correlation summary
const EXPLORATORY_LAGS: usize = 5;

/// Pull the market panel and persist it
pub async fn markets(config: &Config) -> Result<()> {
    let client = KalshiClient::new(config.markets.base_url.clone())?;
    let panel = MarketCollector::new(&client, &config.markets)
        .collect(Utc::now())
        .await?;

    let store = CsvStore::from_config(config);
    store.write_market_panel(&panel)?;
    info!("✓ Saved {} rows to {}", panel.len(), store.market_path().display());
    Ok(())
}

/// Pull the reference series and persist them
pub async fn reference(config: &Config) -> Result<()> {
    let client = YahooClient::new(config.reference.base_url.clone())?;
    let table = collect_reference(&client, &config.reference, Utc::now().date_naive()).await?;

    let store = CsvStore::from_config(config);
    store.write_reference_table(&table)?;
    info!("✓ Saved {} rows to {}", table.rows.len(), store.reference_path().display());
    Ok(())
}

/// Exploratory charts plus contemporaneous and lagged correlations
pub fn plot(config: &Config) -> Result<()> {
    let store = CsvStore::from_config(config);
    let market = store.market_panel()?;
    let reference = store.reference_table()?;

    if let Some((first, last)) = market.date_range() {
        info!("Kalshi data: {} rows, {} to {}", market.len(), first, last);
    }
    if let (Some(first), Some(last)) = (reference.rows.keys().next(), reference.rows.keys().last()) {
        info!("Yahoo data: {} rows, {} to {}", reference.rows.len(), first, last);
    }
    info!("Available thresholds: {:?}", market.thresholds());

    let panel = build_aligned_panel(&market, &reference, &config.analysis.threshold)?;
    info!("Using threshold: {}", panel.threshold);
    info!("Merged data: {} rows", panel.len());

    let column = panel
        .pick_column(&config.analysis.target_column)
        .ok_or_else(|| PipelineError::UnknownColumn(config.analysis.target_column.clone()))?;
    info!("Using IV column: {}", column);
    let pair = panel.signal_pair(&column)?;

    if config.plots.enabled {
        let charts = ChartWriter::from_config(config);
        charts.signal(&pair.dates, &pair.probability, panel.threshold)?;
        charts.reference(&pair.dates, &pair.reference, &column)?;
        charts.overlay(&pair.dates, &pair.probability, &pair.reference, &column)?;
    }

    let contemporaneous = pearson(pair.probability.iter().copied().zip(pair.reference.iter().copied()));
    match contemporaneous {
        Some(c) => info!("Correlation between Kalshi and {}: {:.3}", column, c),
        None => warn!("Correlation between Kalshi and {} is undefined", column),
    }

    let lagged = lead_lag(("kalshi", &pair.probability), (&column, &pair.reference), EXPLORATORY_LAGS);
    info!("Lagged correlations (Kalshi leads):");
    for lag in 1..=EXPLORATORY_LAGS as i64 {
        match lagged.at(lag) {
            Some(c) => info!("  Lag {}: {:.3}", lag, c),
            None => info!("  Lag {}: n/a", lag),
        }
    }
    Ok(())
}

/// Stationarity, causality and lead-lag over the persisted tables
pub fn analyze(config: &Config) -> Result<()> {
    let store = CsvStore::from_config(config);
    analyze_source(&store, config)
}

pub fn analyze_source(source: &impl PanelSource, config: &Config) -> Result<()> {
    let report = analysis::run(source, &config.analysis)?;
    ReportWriter::new(&config.system.output_dir).write(&report)?;

    if config.plots.enabled {
        let charts = ChartWriter::from_config(config);
        if let Err(e) = charts.lead_lag(&report.lead_lag) {
            warn!("Lead-lag chart skipped: {:#}", e);
        }
        if let Err(e) = charts.granger_pvalues(&report.forward, &report.reverse, config.analysis.significance) {
            warn!("Granger chart skipped: {:#}", e);
        }
    }

    info!(
        "Dataset: {} observations; variables {}, {}",
        report.signals.pair.len(),
        report.signals.probability_name,
        report.signals.reference_name
    );
    Ok(())
}

/// Summarise candidate series so one with settled history can be chosen
pub async fn survey(config: &Config) -> Result<()> {
    let client = KalshiClient::new(config.markets.base_url.clone())?;
    let candidates = if config.markets.survey_series.is_empty() {
        vec![config.markets.series_ticker.clone()]
    } else {
        config.markets.survey_series.clone()
    };

    let surveys = survey_series(&client, &candidates, config.markets.list_limit).await;
    match surveys.iter().filter(|s| s.has_history()).max_by_key(|s| s.terminal) {
        Some(best) => info!(
            "Best candidate: {} with {} settled markets",
            best.series, best.terminal
        ),
        None => warn!("No surveyed series has settled markets"),
    }
    Ok(())
}

/// markets -> reference -> plot -> analyze. Only a markets failure may be
/// waved through, and only with the user's consent.
pub async fn run_all(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.system.data_dir)
        .with_context(|| format!("Failed to create {}", config.system.data_dir))?;
    std::fs::create_dir_all(&config.system.output_dir)
        .with_context(|| format!("Failed to create {}", config.system.output_dir))?;

    info!("Step 1: Pulling Kalshi data");
    if let Err(e) = markets(config).await {
        error!("✗ Kalshi data pull failed: {:#}", e);
        let stdin = std::io::stdin();
        if !confirm(&mut stdin.lock(), &mut std::io::stdout(), "Continue anyway? (y/n): ")? {
            warn!("Pipeline stopped after the markets stage");
            return Ok(());
        }
    }

    info!("Step 2: Pulling Yahoo Finance data");
    reference(config).await.context("Reference stage failed")?;

    info!("Step 3: Creating visualizations and correlations");
    plot(config).context("Plot stage failed. Check that the data files exist")?;

    info!("Step 4: Running stationarity and causality analysis");
    analyze(config).context("Analyze stage failed")?;

    info!("✓ PIPELINE COMPLETE");
    Ok(())
}

/// Ask a yes/no question; only `y` (any case) confirms
pub fn confirm(input: &mut impl BufRead, output: &mut impl Write, prompt: &str) -> Result<bool> {
    write!(output, "{}", prompt)?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};
use crate::config::ReferenceConfig;
use crate::data::types::ReferenceTable;
use crate::data::yahoo::ReferenceApi;
use crate::error::PipelineError;

/// Fetch every configured symbol from `start_date` through `today` into
/// one wide table. Symbols that fail or return nothing are skipped.
pub async fn collect_reference<A: ReferenceApi + Sync>(
    api: &A,
    config: &ReferenceConfig,
    today: NaiveDate,
) -> Result<ReferenceTable> {
    let mut table = ReferenceTable::new(Vec::new());

    for series in &config.series {
        info!("Fetching {} ({})...", series.name, series.symbol);
        let closes = match api.daily_closes(&series.symbol, config.start_date, today).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Error fetching {}: {:#}", series.symbol, e);
                continue;
            }
        };

        if closes.is_empty() {
            warn!("No data for {}", series.symbol);
            continue;
        }
        info!("  ✓ {} days", closes.len());
        table.push_column(&series.name, &closes);
    }

    if table.columns.is_empty() {
        return Err(PipelineError::NoReferenceData.into());
    }

    if let (Some(first), Some(last)) = (table.rows.keys().next(), table.rows.keys().last()) {
        info!(
            "Reference table: {} rows, {} to {}, columns {:?}",
            table.rows.len(),
            first,
            last,
            table.columns
        );
    }
    Ok(table)
}

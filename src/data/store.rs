use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use crate::config::Config;
use crate::data::types::{MarketObservation, MarketPanel, ReferenceTable};
use crate::error::PipelineError;

/// Where the analysis stage gets its tables from.
///
/// Fetching and analysis only meet through this trait: the CSV store
/// serves files written by the collectors, tests serve tables built in
/// memory.
pub trait PanelSource {
    fn market_panel(&self) -> Result<MarketPanel>;
    fn reference_table(&self) -> Result<ReferenceTable>;
}

/// Tables already held in memory
pub struct Preloaded {
    pub market: MarketPanel,
    pub reference: ReferenceTable,
}

impl PanelSource for Preloaded {
    fn market_panel(&self) -> Result<MarketPanel> {
        Ok(self.market.clone())
    }

    fn reference_table(&self) -> Result<ReferenceTable> {
        Ok(self.reference.clone())
    }
}

pub struct CsvStore {
    market_path: PathBuf,
    reference_path: PathBuf,
}

impl CsvStore {
    pub fn new(data_dir: impl AsRef<Path>, market_file: &str, reference_file: &str) -> Self {
        let dir = data_dir.as_ref();
        Self {
            market_path: dir.join(market_file),
            reference_path: dir.join(reference_file),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.system.data_dir,
            &config.markets.panel_file,
            &config.reference.output_file,
        )
    }

    pub fn market_path(&self) -> &Path {
        &self.market_path
    }

    pub fn reference_path(&self) -> &Path {
        &self.reference_path
    }

    /// Write the long-format market panel, overwriting any previous run
    pub fn write_market_panel(&self, panel: &MarketPanel) -> Result<()> {
        ensure_parent(&self.market_path)?;
        let mut writer = csv::Writer::from_path(&self.market_path)
            .with_context(|| format!("Failed to create {}", self.market_path.display()))?;

        for obs in &panel.observations {
            writer.serialize(obs)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the wide reference table: `date` then one column per series
    pub fn write_reference_table(&self, table: &ReferenceTable) -> Result<()> {
        ensure_parent(&self.reference_path)?;
        let mut writer = csv::Writer::from_path(&self.reference_path)
            .with_context(|| format!("Failed to create {}", self.reference_path.display()))?;

        let mut header = vec!["date".to_string()];
        header.extend(table.columns.iter().cloned());
        writer.write_record(&header)?;

        for (date, slots) in &table.rows {
            let mut record = vec![date.format("%Y-%m-%d").to_string()];
            record.extend(
                slots
                    .iter()
                    .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
            );
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl PanelSource for CsvStore {
    fn market_panel(&self) -> Result<MarketPanel> {
        require(&self.market_path, "markets")?;
        let mut reader = csv::Reader::from_path(&self.market_path)
            .with_context(|| format!("Failed to open {}", self.market_path.display()))?;

        let observations = reader
            .deserialize::<MarketObservation>()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse {}", self.market_path.display()))?;

        Ok(MarketPanel::new(observations))
    }

    fn reference_table(&self) -> Result<ReferenceTable> {
        require(&self.reference_path, "reference")?;
        let mut reader = csv::Reader::from_path(&self.reference_path)
            .with_context(|| format!("Failed to open {}", self.reference_path.display()))?;

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .skip(1)
            .map(str::to_string)
            .collect();
        let mut table = ReferenceTable::new(columns);

        for record in reader.records() {
            let record = record?;
            let raw_date = record.get(0).unwrap_or_default();
            let date = parse_date(raw_date)
                .with_context(|| format!("Bad date {:?} in {}", raw_date, self.reference_path.display()))?;
            let slots = (1..=table.columns.len())
                .map(|i| record.get(i).and_then(|v| v.trim().parse::<f64>().ok()))
                .collect();
            table.rows.insert(date, slots);
        }

        Ok(table)
    }
}

fn require(path: &Path, stage: &'static str) -> Result<()> {
    if !path.exists() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
            stage,
        }
        .into());
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Accepts `2024-01-02` as well as timestamped `2024-01-02 00:00:00`
fn parse_date(raw: &str) -> Result<NaiveDate> {
    let day = raw.trim().get(..10).unwrap_or(raw);
    Ok(NaiveDate::parse_from_str(day, "%Y-%m-%d")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kalshi-iv-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_market_panel_round_trip() {
        let dir = scratch_dir("market");
        let store = CsvStore::new(&dir, "panel.csv", "ref.csv");
        let panel = MarketPanel::new(vec![
            MarketObservation {
                date: day(2),
                ticker: "KX-T2.7".to_string(),
                threshold: 2.7,
                probability: 0.41,
                title: "Core CPI above 2.7%, YoY".to_string(),
            },
            MarketObservation {
                date: day(1),
                ticker: "KX-T2.7".to_string(),
                threshold: 2.7,
                probability: 0.39,
                title: "Core CPI above 2.7%, YoY".to_string(),
            },
        ]);

        store.write_market_panel(&panel).unwrap();
        let loaded = store.market_panel().unwrap();

        assert_eq!(loaded, panel);
        assert_eq!(loaded.observations[0].date, day(1));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_reads_legacy_market_columns() {
        let dir = scratch_dir("legacy");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("panel.csv"),
            "date,prob_close,ticker,threshold,title\n2024-05-01,0.55,KX-T3,3.0,above 3\n",
        )
        .unwrap();
        let store = CsvStore::new(&dir, "panel.csv", "ref.csv");

        let panel = store.market_panel().unwrap();
        assert_eq!(panel.len(), 1);
        assert!((panel.observations[0].probability - 0.55).abs() < 1e-12);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_reference_table_round_trip_keeps_gaps() {
        let dir = scratch_dir("reference");
        let store = CsvStore::new(&dir, "panel.csv", "ref.csv");
        let mut table = ReferenceTable::new(Vec::new());
        table.push_column("VIX", &[(day(1), 14.5), (day(2), 15.25)]);
        table.push_column("VIX1D", &[(day(2), 11.0)]);

        store.write_reference_table(&table).unwrap();
        let loaded = store.reference_table().unwrap();

        assert_eq!(loaded, table);
        assert_eq!(loaded.rows[&day(1)], vec![Some(14.5), None]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_is_named() {
        let dir = scratch_dir("missing");
        let store = CsvStore::new(&dir, "panel.csv", "ref.csv");

        let err = store.market_panel().unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::MissingInput { path, stage }) => {
                assert!(path.ends_with("panel.csv"));
                assert_eq!(*stage, "markets");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

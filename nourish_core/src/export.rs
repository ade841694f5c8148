//! CSV export of the weight log and introduced-food history, and CSV import
//! of weights.
//!
//! Exports truncate the target file, write a header row and fsync before
//! returning, so a finished export is always complete on disk.

use crate::journal::IntroducedFood;
use crate::weight::WeightEntry;
use crate::Result;
use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// A weight row as written to / read from CSV
#[derive(Debug, Serialize, Deserialize)]
struct WeightCsvRow {
    date: String,
    weight: f64,
}

impl From<&WeightEntry> for WeightCsvRow {
    fn from(entry: &WeightEntry) -> Self {
        WeightCsvRow {
            date: entry.date.format("%Y-%m-%d").to_string(),
            weight: entry.weight,
        }
    }
}

/// A history row as written to CSV
#[derive(Debug, Serialize)]
struct HistoryCsvRow {
    date: String,
    name: String,
    category: String,
    reaction: String,
}

impl From<&IntroducedFood> for HistoryCsvRow {
    fn from(entry: &IntroducedFood) -> Self {
        HistoryCsvRow {
            date: entry.date.format("%Y-%m-%d").to_string(),
            name: entry.name.clone(),
            category: entry.category.clone(),
            reaction: entry.reaction.clone(),
        }
    }
}

fn write_csv<T: Serialize>(rows: impl IntoIterator<Item = T>, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_writer(File::create(path)?);
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Wrote {} rows to {:?}", count, path);
    Ok(count)
}

/// Write weight entries to `path`; returns the number of rows
pub fn export_weights_csv(entries: &[WeightEntry], path: &Path) -> Result<usize> {
    write_csv(entries.iter().map(WeightCsvRow::from), path)
}

/// Write introduced-food history to `path`; returns the number of rows
pub fn export_history_csv(entries: &[IntroducedFood], path: &Path) -> Result<usize> {
    write_csv(entries.iter().map(HistoryCsvRow::from), path)
}

/// Read `(date, weight)` pairs from a CSV with `date,weight` headers.
///
/// Rows that don't parse are skipped with a warning.
pub fn import_weights_csv(path: &Path) -> Result<Vec<(NaiveDate, f64)>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut weights = Vec::new();
    for (row_num, result) in reader.deserialize::<WeightCsvRow>().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("Skipping weight row {}: {}", row_num + 1, e);
                continue;
            }
        };

        match NaiveDate::parse_from_str(&row.date, "%Y-%m-%d") {
            Ok(date) => weights.push((date, row.weight)),
            Err(e) => tracing::warn!("Skipping weight row {}: bad date '{}': {}", row_num + 1, row.date, e),
        }
    }

    tracing::debug!("Read {} weights from {:?}", weights.len(), path);
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReactionLevel;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    #[test]
    fn test_weights_export_then_import() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("out").join("weights.csv");

        let entries = vec![
            WeightEntry {
                id: None,
                date: date(1),
                weight: 80.5,
            },
            WeightEntry {
                id: None,
                date: date(2),
                weight: 80.1,
            },
        ];
        assert_eq!(export_weights_csv(&entries, &path).unwrap(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("date,weight"));

        let imported = import_weights_csv(&path).unwrap();
        assert_eq!(imported, vec![(date(1), 80.5), (date(2), 80.1)]);
    }

    #[test]
    fn test_export_truncates_previous_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("history.csv");
        let entry = IntroducedFood::new("Oats", "Grains", ReactionLevel::Mild, date(3));

        export_history_csv(&[entry.clone(), entry.clone()], &path).unwrap();
        export_history_csv(&[entry], &path).unwrap();

        let reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.into_records().count(), 1);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("2024-04-03,Oats,Grains,mild"));
    }

    #[test]
    fn test_import_skips_bad_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("weights.csv");
        std::fs::write(
            &path,
            "date,weight\n2024-04-01,80\nyesterday,79\n2024-04-03,heavy\n2024-04-04, 78.5\n",
        )
        .unwrap();

        let imported = import_weights_csv(&path).unwrap();
        assert_eq!(imported, vec![(date(1), 80.0), (date(4), 78.5)]);
    }
}

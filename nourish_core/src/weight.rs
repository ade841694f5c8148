//! Weight log and calendar bucketing for charts.

use crate::gateway::{Gateway, Record};
use crate::{Error, Result};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Row in `weight_entries`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WeightEntry {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub date: NaiveDate,
    pub weight: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightPatch {
    pub weight: Option<f64>,
}

impl Record for WeightEntry {
    const TABLE: &'static str = "weight_entries";
    type Patch = WeightPatch;

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn apply(&mut self, patch: &WeightPatch) {
        if let Some(weight) = patch.weight {
            self.weight = weight;
        }
    }
}

/// Chart granularity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    /// ISO weeks, starting Monday
    Week,
    Month,
}

impl Bucket {
    /// First day of the bucket containing `day`
    pub fn start_of(&self, day: NaiveDate) -> NaiveDate {
        match self {
            Bucket::Week => {
                let back = Days::new(u64::from(day.weekday().num_days_from_monday()));
                day.checked_sub_days(back).unwrap_or(day)
            }
            Bucket::Month => day.with_day(1).unwrap_or(day),
        }
    }
}

impl FromStr for Bucket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "week" | "weekly" => Ok(Bucket::Week),
            "month" | "monthly" => Ok(Bucket::Month),
            other => Err(Error::Validation(format!(
                "unknown bucket '{}' (expected week or month)",
                other
            ))),
        }
    }
}

/// Aggregate of the entries falling in one bucket
#[derive(Clone, Debug, PartialEq)]
pub struct WeightBucket {
    pub start: NaiveDate,
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

fn validate_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || weight <= 0.0 {
        return Err(Error::Validation(format!(
            "weight must be a positive number, got {}",
            weight
        )));
    }
    Ok(())
}

/// Log a weight for a day; an existing entry for that day is overwritten
pub fn log_weight<G: Gateway>(gateway: &G, date: NaiveDate, weight: f64) -> Result<WeightEntry> {
    validate_weight(weight)?;

    let existing: Vec<WeightEntry> = gateway.select_where(|e: &WeightEntry| e.date == date)?;
    if let Some(mut entry) = existing.into_iter().next() {
        let id = entry
            .id
            .ok_or_else(|| Error::Gateway(format!("weight entry for {} has no id", date)))?;
        let patch = WeightPatch {
            weight: Some(weight),
        };
        gateway.update::<WeightEntry>(id, &patch)?;
        entry.apply(&patch);
        tracing::info!("Updated weight for {} to {}", date, weight);
        return Ok(entry);
    }

    let entry = gateway.insert(WeightEntry {
        id: None,
        date,
        weight,
    })?;
    tracing::info!("Logged weight {} for {}", weight, date);
    Ok(entry)
}

/// All entries, oldest first
pub fn list_weights<G: Gateway>(gateway: &G) -> Result<Vec<WeightEntry>> {
    gateway.select_ordered(|e: &WeightEntry| e.date)
}

pub fn delete_weight<G: Gateway>(gateway: &G, id: Uuid) -> Result<()> {
    gateway.delete::<WeightEntry>(id)?;
    tracing::info!("Deleted weight entry {}", id);
    Ok(())
}

/// Group entries into calendar buckets, oldest bucket first
pub fn bucket_weights(entries: &[WeightEntry], bucket: Bucket) -> Vec<WeightBucket> {
    let mut groups: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(bucket.start_of(entry.date))
            .or_default()
            .push(entry.weight);
    }

    groups
        .into_iter()
        .map(|(start, weights)| {
            let count = weights.len();
            let sum: f64 = weights.iter().sum();
            let min = weights.iter().copied().fold(f64::INFINITY, f64::min);
            let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            WeightBucket {
                start,
                count,
                average: sum / count as f64,
                min,
                max,
            }
        })
        .collect()
}

/// Latest weight minus earliest weight, by date
pub fn weight_change(entries: &[WeightEntry]) -> Option<f64> {
    let first = entries.iter().min_by_key(|e| e.date)?;
    let last = entries.iter().max_by_key(|e| e.date)?;
    Some(last.weight - first.weight)
}

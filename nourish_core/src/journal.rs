//! Introduced-food history and the shared food summary.
//!
//! History is append-only. Every entry points at a single summary record,
//! which is created the first time anything is written.

use crate::gateway::{Gateway, Record};
use crate::types::ReactionLevel;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The shared summary record (`food_summaries`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FoodSummary {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub last_junk_food: Option<NaiveDate>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FoodSummaryPatch {
    pub streak: Option<u32>,
    pub last_junk_food: Option<NaiveDate>,
}

impl Record for FoodSummary {
    const TABLE: &'static str = "food_summaries";
    type Patch = FoodSummaryPatch;

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn apply(&mut self, patch: &FoodSummaryPatch) {
        if let Some(streak) = patch.streak {
            self.streak = streak;
        }
        if let Some(day) = patch.last_junk_food {
            self.last_junk_food = Some(day);
        }
    }
}

/// One history entry (`introduced_foods`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IntroducedFood {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub food_summary_id: Option<Uuid>,
    pub name: String,
    pub category: String,
    /// Reaction level label: none, mild or severe
    pub reaction: String,
    pub date: NaiveDate,
}

impl IntroducedFood {
    pub fn new(name: &str, category: &str, reaction: ReactionLevel, date: NaiveDate) -> Self {
        Self {
            id: None,
            food_summary_id: None,
            name: name.to_string(),
            category: category.to_string(),
            reaction: reaction.as_str().to_string(),
            date,
        }
    }
}

impl Record for IntroducedFood {
    const TABLE: &'static str = "introduced_foods";
    // Entries are never edited.
    type Patch = ();

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn apply(&mut self, _patch: &()) {}
}

/// Fetch the summary record, creating it on first use
pub fn ensure_summary<G: Gateway>(gateway: &G) -> Result<FoodSummary> {
    let existing: Vec<FoodSummary> = gateway.select()?;
    if let Some(summary) = existing.into_iter().next() {
        return Ok(summary);
    }

    let created = gateway.insert(FoodSummary {
        id: None,
        streak: 0,
        last_junk_food: None,
    })?;
    tracing::info!("Created food summary {:?}", created.id);
    Ok(created)
}

/// Append an entry to the introduced-food history
pub fn append_introduced<G: Gateway>(gateway: &G, mut entry: IntroducedFood) -> Result<IntroducedFood> {
    let summary = ensure_summary(gateway)?;
    let summary_id = summary
        .id
        .ok_or_else(|| Error::Gateway("food summary has no id".into()))?;

    entry.food_summary_id = Some(summary_id);
    let stored = gateway.insert(entry)?;
    tracing::info!(
        "Recorded introduction of {} ({}) on {}",
        stored.name,
        stored.reaction,
        stored.date
    );
    Ok(stored)
}

/// History entries, oldest first
pub fn introduced_history<G: Gateway>(gateway: &G) -> Result<Vec<IntroducedFood>> {
    gateway.select_ordered(|e: &IntroducedFood| (e.date, e.name.clone()))
}

/// Note a junk-food day, which restarts the streak
pub fn record_junk_food<G: Gateway>(gateway: &G, day: NaiveDate) -> Result<FoodSummary> {
    let mut summary = ensure_summary(gateway)?;
    let id = summary
        .id
        .ok_or_else(|| Error::Gateway("food summary has no id".into()))?;

    let patch = FoodSummaryPatch {
        streak: Some(0),
        last_junk_food: Some(day),
    };
    gateway.update::<FoodSummary>(id, &patch)?;
    summary.apply(&patch);
    tracing::info!("Recorded junk food on {}", day);
    Ok(summary)
}

/// Whole days since the last junk-food day
pub fn current_streak(summary: &FoodSummary, today: NaiveDate) -> u32 {
    match summary.last_junk_food {
        Some(day) if day <= today => (today - day).num_days() as u32,
        Some(_) => 0,
        None => summary.streak,
    }
}

//! Known food intolerances.

use crate::clock::Clock;
use crate::gateway::{Gateway, Record};
use crate::types::ReactionLevel;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Severity of a confirmed intolerance
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntoleranceLevel {
    Mild,
    Severe,
}

impl IntoleranceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntoleranceLevel::Mild => "mild",
            IntoleranceLevel::Severe => "severe",
        }
    }
}

impl fmt::Display for IntoleranceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntoleranceLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mild" => Ok(IntoleranceLevel::Mild),
            "severe" => Ok(IntoleranceLevel::Severe),
            other => Err(Error::Validation(format!(
                "unknown intolerance level '{}' (expected mild or severe)",
                other
            ))),
        }
    }
}

impl TryFrom<ReactionLevel> for IntoleranceLevel {
    type Error = Error;

    fn try_from(level: ReactionLevel) -> Result<Self> {
        match level {
            ReactionLevel::Mild => Ok(IntoleranceLevel::Mild),
            ReactionLevel::Severe => Ok(IntoleranceLevel::Severe),
            ReactionLevel::None => Err(Error::Validation(
                "a food without a reaction is not an intolerance".into(),
            )),
        }
    }
}

/// Row in `food_intolerances`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FoodIntolerance {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub food_name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub reaction_level: IntoleranceLevel,
    #[serde(default)]
    pub reaction_notes: String,
    pub discovered_date: NaiveDate,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntolerancePatch {
    pub reaction_level: Option<IntoleranceLevel>,
    pub reaction_notes: Option<String>,
}

impl Record for FoodIntolerance {
    const TABLE: &'static str = "food_intolerances";
    type Patch = IntolerancePatch;

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn apply(&mut self, patch: &IntolerancePatch) {
        if let Some(level) = patch.reaction_level {
            self.reaction_level = level;
        }
        if let Some(notes) = &patch.reaction_notes {
            self.reaction_notes = notes.clone();
        }
    }
}

/// Input for [`record_intolerance`]
#[derive(Clone, Debug)]
pub struct NewIntolerance {
    pub food_name: String,
    pub category: Option<String>,
    pub reaction_level: IntoleranceLevel,
    pub reaction_notes: String,
    /// Defaults to today
    pub discovered_date: Option<NaiveDate>,
}

pub fn record_intolerance<G: Gateway, C: Clock>(
    gateway: &G,
    clock: &C,
    new: NewIntolerance,
) -> Result<FoodIntolerance> {
    let food_name = new.food_name.trim();
    if food_name.is_empty() {
        return Err(Error::Validation("food name must not be blank".into()));
    }

    let row = gateway.insert(FoodIntolerance {
        id: None,
        food_name: food_name.to_string(),
        category: new
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        reaction_level: new.reaction_level,
        reaction_notes: new.reaction_notes.trim().to_string(),
        discovered_date: new.discovered_date.unwrap_or_else(|| clock.today()),
    })?;

    tracing::info!(
        "Recorded {} intolerance to {}",
        row.reaction_level,
        row.food_name
    );
    Ok(row)
}

/// Intolerances, most recently discovered first
pub fn list_intolerances<G: Gateway>(gateway: &G) -> Result<Vec<FoodIntolerance>> {
    gateway.select_ordered(|i: &FoodIntolerance| (Reverse(i.discovered_date), i.food_name.clone()))
}

pub fn remove_intolerance<G: Gateway>(gateway: &G, id: Uuid) -> Result<()> {
    gateway.delete::<FoodIntolerance>(id)?;
    tracing::info!("Removed intolerance {}", id);
    Ok(())
}

pub fn is_intolerant(intolerances: &[FoodIntolerance], food_name: &str) -> bool {
    let food_name = food_name.trim();
    intolerances
        .iter()
        .any(|i| i.food_name.eq_ignore_ascii_case(food_name))
}

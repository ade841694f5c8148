//! Core domain types for the elimination diet tracker.
//!
//! This module defines:
//! - Reaction levels recorded when a food is introduced
//! - Persisted row shapes for categories and foods (with their patches)
//! - The in-memory read model: categories owning ordered foods

use crate::gateway::Record;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Reaction Levels
// ============================================================================

/// How a food was tolerated when introduced
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReactionLevel {
    None,
    Mild,
    Severe,
}

impl ReactionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionLevel::None => "none",
            ReactionLevel::Mild => "mild",
            ReactionLevel::Severe => "severe",
        }
    }
}

impl fmt::Display for ReactionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(ReactionLevel::None),
            "mild" => Ok(ReactionLevel::Mild),
            "severe" => Ok(ReactionLevel::Severe),
            other => Err(crate::Error::Validation(format!(
                "unknown reaction level '{}' (expected none, mild or severe)",
                other
            ))),
        }
    }
}

// ============================================================================
// Persisted Rows
// ============================================================================

/// Row in the `food_categories` table
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CategoryRow {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub expanded: bool,
    #[serde(default)]
    pub order: i32,
}

/// Partial update of a category row
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub expanded: Option<bool>,
    pub order: Option<i32>,
}

impl Record for CategoryRow {
    const TABLE: &'static str = "food_categories";
    type Patch = CategoryPatch;

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn apply(&mut self, patch: &CategoryPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(expanded) = patch.expanded {
            self.expanded = expanded;
        }
        if let Some(order) = patch.order {
            self.order = order;
        }
    }
}

/// Row in the `foods` table
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FoodRow {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub category_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub introduced: bool,
    #[serde(default)]
    pub introduction_date: Option<NaiveDate>,
    #[serde(default)]
    pub reaction: Option<String>,
    #[serde(default)]
    pub reaction_level: Option<ReactionLevel>,
    #[serde(default)]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default)]
    pub order: i32,
}

/// Partial update of a food.
///
/// `None` leaves a field untouched; there is no way to clear a field, so
/// `introduction_date` can only ever be set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FoodPatch {
    pub name: Option<String>,
    pub introduced: Option<bool>,
    pub introduction_date: Option<NaiveDate>,
    pub reaction: Option<String>,
    pub reaction_level: Option<ReactionLevel>,
    pub scheduled_date: Option<NaiveDate>,
    pub order: Option<i32>,
}

impl FoodPatch {
    pub fn is_empty(&self) -> bool {
        *self == FoodPatch::default()
    }

    /// Whether applying this patch can change the scheduling sequence
    pub fn affects_schedule(&self) -> bool {
        self.introduced.is_some() || self.order.is_some()
    }

    pub fn scheduled(date: NaiveDate) -> Self {
        Self {
            scheduled_date: Some(date),
            ..Self::default()
        }
    }

    pub fn ordered(order: i32) -> Self {
        Self {
            order: Some(order),
            ..Self::default()
        }
    }
}

impl Record for FoodRow {
    const TABLE: &'static str = "foods";
    type Patch = FoodPatch;

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn apply(&mut self, patch: &FoodPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(introduced) = patch.introduced {
            self.introduced = introduced;
        }
        if let Some(date) = patch.introduction_date {
            self.introduction_date = Some(date);
        }
        if let Some(reaction) = &patch.reaction {
            self.reaction = Some(reaction.clone());
        }
        if let Some(level) = patch.reaction_level {
            self.reaction_level = Some(level);
        }
        if let Some(date) = patch.scheduled_date {
            self.scheduled_date = Some(date);
        }
        if let Some(order) = patch.order {
            self.order = order;
        }
    }
}

// ============================================================================
// Read Model
// ============================================================================

/// A food inside a category, mirrored from a persisted row
#[derive(Clone, Debug, PartialEq)]
pub struct Food {
    pub id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub introduced: bool,
    pub introduction_date: Option<NaiveDate>,
    pub reaction: Option<String>,
    pub reaction_level: Option<ReactionLevel>,
    pub scheduled_date: Option<NaiveDate>,
    pub order: i32,
}

impl Food {
    /// Mirror a persisted patch into memory, same merge as the row
    pub fn apply(&mut self, patch: &FoodPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(introduced) = patch.introduced {
            self.introduced = introduced;
        }
        if let Some(date) = patch.introduction_date {
            self.introduction_date = Some(date);
        }
        if let Some(reaction) = &patch.reaction {
            self.reaction = Some(reaction.clone());
        }
        if let Some(level) = patch.reaction_level {
            self.reaction_level = Some(level);
        }
        if let Some(date) = patch.scheduled_date {
            self.scheduled_date = Some(date);
        }
        if let Some(order) = patch.order {
            self.order = order;
        }
    }

    /// Scheduled date that still carries meaning (ignored once introduced)
    pub fn active_schedule(&self) -> Option<NaiveDate> {
        if self.introduced {
            None
        } else {
            self.scheduled_date
        }
    }
}

impl TryFrom<FoodRow> for Food {
    type Error = crate::Error;

    fn try_from(row: FoodRow) -> crate::Result<Self> {
        let id = row
            .id
            .ok_or_else(|| crate::Error::Gateway(format!("food '{}' has no id", row.name)))?;
        Ok(Food {
            id,
            category_id: row.category_id,
            name: row.name,
            introduced: row.introduced,
            introduction_date: row.introduction_date,
            reaction: row.reaction,
            reaction_level: row.reaction_level,
            scheduled_date: row.scheduled_date,
            order: row.order,
        })
    }
}

/// A category of foods, owning its foods in display order
#[derive(Clone, Debug, PartialEq)]
pub struct FoodCategory {
    pub id: Uuid,
    pub name: String,
    pub expanded: bool,
    pub order: i32,
    pub foods: Vec<Food>,
}

impl FoodCategory {
    pub fn food(&self, food_id: Uuid) -> Option<&Food> {
        self.foods.iter().find(|f| f.id == food_id)
    }

    pub fn food_mut(&mut self, food_id: Uuid) -> Option<&mut Food> {
        self.foods.iter_mut().find(|f| f.id == food_id)
    }

    /// Next free order slot within this category
    pub fn next_food_order(&self) -> i32 {
        self.foods.iter().map(|f| f.order).max().map_or(0, |max| max + 1)
    }

    pub fn sort_foods(&mut self) {
        self.foods
            .sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
    }
}

impl TryFrom<CategoryRow> for FoodCategory {
    type Error = crate::Error;

    fn try_from(row: CategoryRow) -> crate::Result<Self> {
        let id = row
            .id
            .ok_or_else(|| crate::Error::Gateway(format!("category '{}' has no id", row.name)))?;
        Ok(FoodCategory {
            id,
            name: row.name,
            expanded: row.expanded,
            order: row.order,
            foods: Vec::new(),
        })
    }
}

/// A food together with the category that owns it
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledFood<'a> {
    pub category: &'a FoodCategory,
    pub food: &'a Food,
}

/// Outcome of a multi-row write (reorder, reschedule)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteReport {
    /// Rows written successfully
    pub written: usize,
    /// Rows whose write failed; memory may disagree with storage for these
    pub failed: Vec<Uuid>,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn merge(&mut self, other: WriteReport) {
        self.written += other.written;
        self.failed.extend(other.failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn food(order: i32, name: &str) -> Food {
        Food {
            id: Uuid::new_v4(),
            category_id: Uuid::nil(),
            name: name.into(),
            introduced: false,
            introduction_date: None,
            reaction: None,
            reaction_level: None,
            scheduled_date: None,
            order,
        }
    }

    #[test]
    fn test_reaction_level_parse() {
        assert_eq!("Mild".parse::<ReactionLevel>().unwrap(), ReactionLevel::Mild);
        assert_eq!(" severe ".parse::<ReactionLevel>().unwrap(), ReactionLevel::Severe);
        assert!("awful".parse::<ReactionLevel>().is_err());
    }

    #[test]
    fn test_patch_never_clears_introduction_date() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mut f = food(0, "Almond");
        f.apply(&FoodPatch {
            introduced: Some(true),
            introduction_date: Some(day),
            ..FoodPatch::default()
        });
        f.apply(&FoodPatch {
            introduced: Some(false),
            ..FoodPatch::default()
        });
        assert_eq!(f.introduction_date, Some(day));
        assert!(!f.introduced);
    }

    #[test]
    fn test_active_schedule_ignored_once_introduced() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mut f = food(0, "Almond");
        f.scheduled_date = Some(day);
        assert_eq!(f.active_schedule(), Some(day));
        f.introduced = true;
        assert_eq!(f.active_schedule(), None);
        assert_eq!(f.scheduled_date, Some(day));
    }

    #[test]
    fn test_sort_foods_breaks_ties_by_name() {
        let mut category = FoodCategory {
            id: Uuid::new_v4(),
            name: "Nuts".into(),
            expanded: true,
            order: 0,
            foods: vec![food(1, "Walnut"), food(0, "Cashew"), food(0, "Almond")],
        };
        category.sort_foods();
        let names: Vec<_> = category.foods.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Almond", "Cashew", "Walnut"]);
        assert_eq!(category.next_food_order(), 2);
    }

    #[test]
    fn test_affects_schedule() {
        assert!(!FoodPatch::default().affects_schedule());
        assert!(FoodPatch::ordered(3).affects_schedule());
        assert!(!FoodPatch::scheduled(NaiveDate::MIN).affects_schedule());
    }
}

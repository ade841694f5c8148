//! Elimination diet engine.
//!
//! Owns the in-memory list of food categories and keeps it mirrored in a
//! [`Gateway`]. Every mutation follows "persist, then mirror": memory only
//! changes once the corresponding write has succeeded. Operations that change
//! the set or order of not-yet-introduced foods finish with
//! [`DietEngine::recompute_schedule`], which lays those foods out on
//! consecutive days starting today:
//!
//! 1. Walk categories by `(order, name)`, foods by `(order, name)`
//! 2. Skip introduced foods
//! 3. The k-th remaining food is scheduled for `today + k`
//!
//! Multi-row writes (reordering, rescheduling) are not atomic. Failed rows are
//! logged and reported in a [`WriteReport`]; nothing is rolled back.

use crate::clock::Clock;
use crate::gateway::Gateway;
use crate::journal::{self, IntroducedFood};
use crate::starter::starter_plan;
use crate::types::{
    CategoryPatch, CategoryRow, Food, FoodCategory, FoodPatch, FoodRow, ReactionLevel,
    ScheduledFood, WriteReport,
};
use crate::{Error, Result};
use chrono::{Days, NaiveDate};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Elimination diet state over a persistence gateway
pub struct DietEngine<G: Gateway, C: Clock> {
    gateway: G,
    clock: C,
    categories: Vec<FoodCategory>,
}

impl<G: Gateway, C: Clock> DietEngine<G, C> {
    /// Create an engine with empty state; call [`load_all`](Self::load_all) to populate it
    pub fn new(gateway: G, clock: C) -> Self {
        Self {
            gateway,
            clock,
            categories: Vec::new(),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Categories in scheduling order, each with its foods in order
    pub fn categories(&self) -> &[FoodCategory] {
        &self.categories
    }

    pub fn category(&self, id: Uuid) -> Option<&FoodCategory> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Look a category up by id or case-insensitive name
    pub fn find_category(&self, key: &str) -> Option<&FoodCategory> {
        let key = key.trim();
        if let Ok(id) = Uuid::parse_str(key) {
            return self.category(id);
        }
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(key))
    }

    /// Look a food up by id or case-insensitive name within one category
    pub fn find_food(&self, category_id: Uuid, key: &str) -> Option<&Food> {
        let category = self.category(category_id)?;
        let key = key.trim();
        if let Ok(id) = Uuid::parse_str(key) {
            return category.food(id);
        }
        category.foods.iter().find(|f| f.name.eq_ignore_ascii_case(key))
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Replace in-memory state with a fresh read of the gateway.
    ///
    /// On failure the previous state is kept as-is.
    pub fn load_all(&mut self) -> Result<()> {
        match self.fetch_all() {
            Ok(categories) => {
                self.install(categories);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to load foods: {}", e);
                Err(e)
            }
        }
    }

    /// [`load_all`](Self::load_all) with a fixed-delay retry on transient errors.
    ///
    /// `attempts` counts the first try; permanent errors are not retried.
    pub fn load_all_with_retry(&mut self, attempts: u32, delay: Duration) -> Result<()> {
        let attempts = attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.fetch_all() {
                Ok(categories) => {
                    self.install(categories);
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        "Load attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to load foods after {} attempt(s): {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    fn fetch_all(&self) -> Result<Vec<FoodCategory>> {
        let category_rows: Vec<CategoryRow> = self.gateway.select()?;
        let food_rows: Vec<FoodRow> = self.gateway.select_ordered(|r: &FoodRow| r.order)?;

        let mut categories = category_rows
            .into_iter()
            .map(FoodCategory::try_from)
            .collect::<Result<Vec<_>>>()?;

        let index: HashMap<Uuid, usize> = categories
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();

        for row in food_rows {
            let food = Food::try_from(row)?;
            match index.get(&food.category_id) {
                Some(&i) => categories[i].foods.push(food),
                None => tracing::debug!(
                    "Ignoring food {} ({}) with missing category {}",
                    food.name,
                    food.id,
                    food.category_id
                ),
            }
        }

        sort_categories(&mut categories);
        for category in &mut categories {
            category.sort_foods();
        }
        Ok(categories)
    }

    fn install(&mut self, categories: Vec<FoodCategory>) {
        let food_count: usize = categories.iter().map(|c| c.foods.len()).sum();
        tracing::info!(
            "Loaded {} categories with {} foods",
            categories.len(),
            food_count
        );
        self.categories = categories;
    }

    // ========================================================================
    // Categories
    // ========================================================================

    /// Create an empty category after all existing ones
    pub fn add_category(&mut self, name: &str) -> Result<Uuid> {
        let name = required_name(name, "category")?;
        let order = self
            .categories
            .iter()
            .map(|c| c.order)
            .max()
            .map_or(0, |max| max + 1);

        let row = self
            .gateway
            .insert(CategoryRow {
                id: None,
                name,
                expanded: true,
                order,
            })
            .map_err(|e| {
                tracing::error!("Failed to add category: {}", e);
                e
            })?;

        let category = FoodCategory::try_from(row)?;
        let id = category.id;
        tracing::info!("Added category {} ({})", category.name, id);

        self.categories.push(category);
        sort_categories(&mut self.categories);
        self.recompute_schedule();
        Ok(id)
    }

    pub fn rename_category(&mut self, id: Uuid, name: &str) -> Result<()> {
        let name = required_name(name, "category")?;
        let idx = self.category_index(id)?;

        let patch = CategoryPatch {
            name: Some(name.clone()),
            ..CategoryPatch::default()
        };
        self.gateway
            .update::<CategoryRow>(id, &patch)
            .map_err(|e| {
                tracing::error!("Failed to rename category {}: {}", id, e);
                e
            })?;

        self.categories[idx].name = name;
        // Name breaks order ties, so the total order may change.
        sort_categories(&mut self.categories);
        self.recompute_schedule();
        Ok(())
    }

    /// Delete a category and every food in it
    pub fn delete_category(&mut self, id: Uuid) -> Result<()> {
        let idx = self.category_index(id)?;

        self.gateway.delete::<CategoryRow>(id).map_err(|e| {
            tracing::error!("Failed to delete category {}: {}", id, e);
            e
        })?;

        let removed = self.categories.remove(idx);
        for food in &removed.foods {
            if let Err(e) = self.gateway.delete::<FoodRow>(food.id) {
                // Orphans are skipped on load.
                tracing::warn!(
                    "Failed to delete food {} of removed category {}: {}",
                    food.id,
                    id,
                    e
                );
            }
        }

        tracing::info!(
            "Deleted category {} with {} foods",
            removed.name,
            removed.foods.len()
        );
        self.recompute_schedule();
        Ok(())
    }

    /// Flip the expanded flag; returns the new value
    pub fn toggle_category_expanded(&mut self, id: Uuid) -> Result<bool> {
        let idx = self.category_index(id)?;
        let expanded = !self.categories[idx].expanded;

        let patch = CategoryPatch {
            expanded: Some(expanded),
            ..CategoryPatch::default()
        };
        self.gateway
            .update::<CategoryRow>(id, &patch)
            .map_err(|e| {
                tracing::error!("Failed to toggle category {}: {}", id, e);
                e
            })?;

        self.categories[idx].expanded = expanded;
        Ok(expanded)
    }

    // ========================================================================
    // Foods
    // ========================================================================

    /// Add a not-yet-introduced food at the end of a category
    pub fn add_food(&mut self, category_id: Uuid, name: &str) -> Result<Uuid> {
        let name = required_name(name, "food")?;
        let idx = self
            .category_index(category_id)
            .map_err(|_| Error::Validation(format!("unknown category {}", category_id)))?;
        let order = self.categories[idx].next_food_order();

        let row = self
            .gateway
            .insert(FoodRow {
                id: None,
                category_id,
                name,
                introduced: false,
                introduction_date: None,
                reaction: None,
                reaction_level: None,
                scheduled_date: None,
                order,
            })
            .map_err(|e| {
                tracing::error!("Failed to add food: {}", e);
                e
            })?;

        let food = Food::try_from(row)?;
        let id = food.id;
        tracing::info!("Added food {} ({}) to {}", food.name, id, category_id);

        let category = &mut self.categories[idx];
        category.foods.push(food);
        category.sort_foods();
        self.recompute_schedule();
        Ok(id)
    }

    /// Apply a partial update to a food.
    ///
    /// Setting `introduced` stamps today's date as the introduction date unless
    /// one is supplied or already recorded. A recorded introduction date is
    /// never replaced. Changing `introduced` or `order` reschedules, as does a
    /// rename that moves the food among others with the same order.
    pub fn update_food(&mut self, category_id: Uuid, food_id: Uuid, patch: FoodPatch) -> Result<()> {
        let today = self.clock.today();
        let recorded_date = self.food_ref(category_id, food_id)?.introduction_date;

        let mut patch = patch;
        if let Some(name) = patch.name.take() {
            patch.name = Some(required_name(&name, "food")?);
        }
        if recorded_date.is_some() {
            patch.introduction_date = None;
        } else if patch.introduced == Some(true) && patch.introduction_date.is_none() {
            patch.introduction_date = Some(today);
        }

        if patch.is_empty() {
            return Ok(());
        }

        self.gateway
            .update::<FoodRow>(food_id, &patch)
            .map_err(|e| {
                tracing::error!("Failed to update food {}: {}", food_id, e);
                e
            })?;

        let idx = self.category_index(category_id)?;
        let category = &mut self.categories[idx];
        if let Some(food) = category.food_mut(food_id) {
            food.apply(&patch);
        }

        // Name breaks order ties, so a rename can move a food too.
        let mut reordered = false;
        if patch.order.is_some() || patch.name.is_some() {
            let before: Vec<Uuid> = category.foods.iter().map(|f| f.id).collect();
            category.sort_foods();
            reordered = category.foods.iter().map(|f| f.id).ne(before);
        }
        tracing::debug!("Updated food {}: {:?}", food_id, patch);

        if patch.affects_schedule() || reordered {
            self.recompute_schedule();
        }
        Ok(())
    }

    pub fn delete_food(&mut self, category_id: Uuid, food_id: Uuid) -> Result<()> {
        self.food_ref(category_id, food_id)?;

        self.gateway.delete::<FoodRow>(food_id).map_err(|e| {
            tracing::error!("Failed to delete food {}: {}", food_id, e);
            e
        })?;

        let idx = self.category_index(category_id)?;
        self.categories[idx].foods.retain(|f| f.id != food_id);
        tracing::info!("Deleted food {}", food_id);
        self.recompute_schedule();
        Ok(())
    }

    /// Record that a food was tried, with the observed reaction.
    ///
    /// The first time a food is introduced an entry is appended to the
    /// introduced-food history. That append is best-effort: a failure is
    /// logged and the food update stands.
    pub fn mark_introduced(
        &mut self,
        category_id: Uuid,
        food_id: Uuid,
        reaction_level: ReactionLevel,
        reaction_notes: &str,
    ) -> Result<()> {
        let already_introduced = self.food_ref(category_id, food_id)?.introduced;

        self.update_food(
            category_id,
            food_id,
            FoodPatch {
                introduced: Some(true),
                reaction: Some(reaction_notes.trim().to_string()),
                reaction_level: Some(reaction_level),
                ..FoodPatch::default()
            },
        )?;

        if already_introduced {
            tracing::debug!("Food {} was already introduced; history unchanged", food_id);
            return Ok(());
        }

        let today = self.clock.today();
        let category = &self.categories[self.category_index(category_id)?];
        let food = self.food_ref(category_id, food_id)?;
        let entry = IntroducedFood::new(
            &food.name,
            &category.name,
            reaction_level,
            food.introduction_date.unwrap_or(today),
        );

        if let Err(e) = journal::append_introduced(&self.gateway, entry) {
            tracing::warn!(
                "Food {} marked introduced but history entry was not recorded: {}",
                food_id,
                e
            );
        }
        Ok(())
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// Reorder categories to follow `ordered_ids`.
    ///
    /// Ids missing from the list keep their relative order after the listed
    /// ones. Orders are renumbered densely from 0 and each changed row is
    /// written individually.
    pub fn reorder_categories(&mut self, ordered_ids: &[Uuid]) -> Result<WriteReport> {
        let rank = |id: Uuid| {
            ordered_ids
                .iter()
                .position(|x| *x == id)
                .unwrap_or(usize::MAX)
        };
        self.categories.sort_by_key(|c| rank(c.id));

        let mut report = WriteReport::default();
        for (position, category) in self.categories.iter_mut().enumerate() {
            let order = position as i32;
            if category.order == order {
                continue;
            }
            category.order = order;

            let patch = CategoryPatch {
                order: Some(order),
                ..CategoryPatch::default()
            };
            match self.gateway.update::<CategoryRow>(category.id, &patch) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!("Failed to persist order of category {}: {}", category.id, e);
                    report.failed.push(category.id);
                }
            }
        }

        tracing::info!("Reordered categories ({} rows written)", report.written);
        report.merge(self.recompute_schedule());
        Ok(report)
    }

    /// Reorder the foods of one category; same rules as [`reorder_categories`](Self::reorder_categories)
    pub fn reorder_foods(&mut self, category_id: Uuid, ordered_ids: &[Uuid]) -> Result<WriteReport> {
        let idx = self.category_index(category_id)?;
        let rank = |id: Uuid| {
            ordered_ids
                .iter()
                .position(|x| *x == id)
                .unwrap_or(usize::MAX)
        };

        let category = &mut self.categories[idx];
        category.foods.sort_by_key(|f| rank(f.id));

        let mut report = WriteReport::default();
        for (position, food) in category.foods.iter_mut().enumerate() {
            let order = position as i32;
            if food.order == order {
                continue;
            }
            food.order = order;

            match self.gateway.update::<FoodRow>(food.id, &FoodPatch::ordered(order)) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!("Failed to persist order of food {}: {}", food.id, e);
                    report.failed.push(food.id);
                }
            }
        }

        tracing::info!(
            "Reordered foods in {} ({} rows written)",
            category_id,
            report.written
        );
        report.merge(self.recompute_schedule());
        Ok(report)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Assign consecutive days from today to every not-yet-introduced food.
    ///
    /// Only rows whose date changes are written; running it twice on the same
    /// day writes nothing the second time. On a later day every date moves
    /// forward so the sequence always starts today.
    pub fn recompute_schedule(&mut self) -> WriteReport {
        let today = self.clock.today();
        let mut report = WriteReport::default();
        let mut slot: u64 = 0;

        for category in &mut self.categories {
            for food in category.foods.iter_mut().filter(|f| !f.introduced) {
                let date = slot_date(today, slot);
                slot += 1;

                if food.scheduled_date == Some(date) {
                    continue;
                }

                match self.gateway.update::<FoodRow>(food.id, &FoodPatch::scheduled(date)) {
                    Ok(()) => {
                        food.scheduled_date = Some(date);
                        report.written += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to schedule food {} for {}: {}", food.id, date, e);
                        report.failed.push(food.id);
                    }
                }
            }
        }

        tracing::info!(
            "Scheduled {} foods from {} ({} rows written, {} failed)",
            slot,
            today,
            report.written,
            report.failed.len()
        );
        report
    }

    /// Not-yet-introduced foods in scheduling order
    pub fn schedule(&self) -> impl Iterator<Item = ScheduledFood<'_>> + '_ {
        self.categories.iter().flat_map(|category| {
            category
                .foods
                .iter()
                .filter(|f| !f.introduced)
                .map(move |food| ScheduledFood { category, food })
        })
    }

    /// The food to introduce today.
    ///
    /// Preference: a food scheduled exactly today; else the first overdue food
    /// in scheduling order; else the soonest upcoming one; else the first
    /// unscheduled one. `None` once everything is introduced.
    pub fn todays_food(&self) -> Option<ScheduledFood<'_>> {
        let today = self.clock.today();

        if let Some(hit) = self.schedule().find(|s| s.food.scheduled_date == Some(today)) {
            return Some(hit);
        }
        if let Some(overdue) = self
            .schedule()
            .find(|s| matches!(s.food.scheduled_date, Some(d) if d < today))
        {
            return Some(overdue);
        }
        if let Some(upcoming) = self
            .schedule()
            .filter(|s| s.food.scheduled_date.is_some())
            .min_by_key(|s| s.food.scheduled_date)
        {
            return Some(upcoming);
        }
        self.schedule().next()
    }

    /// Introduced-food history, oldest first
    pub fn introduced_history(&self) -> Result<Vec<IntroducedFood>> {
        journal::introduced_history(&self.gateway)
    }

    /// Populate an empty tracker with the starter categories.
    ///
    /// Returns the number of foods added; does nothing when categories exist.
    /// If an insert fails partway, whatever was stored is kept in memory and
    /// scheduled before the error is returned.
    pub fn seed_starter_plan(&mut self) -> Result<usize> {
        if !self.categories.is_empty() {
            tracing::info!("Tracker already has categories; starter plan not applied");
            return Ok(0);
        }

        let mut added = 0;
        let result = self.insert_starter_plan(&mut added);
        match &result {
            Ok(()) => tracing::info!("Seeded starter plan with {} foods", added),
            Err(e) => tracing::error!("Starter plan stopped after {} foods: {}", added, e),
        }

        self.recompute_schedule();
        result.map(|()| added)
    }

    fn insert_starter_plan(&mut self, added: &mut usize) -> Result<()> {
        for (order, starter) in starter_plan().iter().enumerate() {
            let row = self.gateway.insert(CategoryRow {
                id: None,
                name: starter.name.clone(),
                expanded: true,
                order: order as i32,
            })?;
            self.categories.push(FoodCategory::try_from(row)?);
            let idx = self.categories.len() - 1;
            let category_id = self.categories[idx].id;

            for (food_order, food_name) in starter.foods.iter().enumerate() {
                let row = self.gateway.insert(FoodRow {
                    id: None,
                    category_id,
                    name: food_name.clone(),
                    introduced: false,
                    introduction_date: None,
                    reaction: None,
                    reaction_level: None,
                    scheduled_date: None,
                    order: food_order as i32,
                })?;
                self.categories[idx].foods.push(Food::try_from(row)?);
                *added += 1;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn category_index(&self, id: Uuid) -> Result<usize> {
        self.categories
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(format!("category {}", id)))
    }

    fn food_ref(&self, category_id: Uuid, food_id: Uuid) -> Result<&Food> {
        let idx = self.category_index(category_id)?;
        self.categories[idx]
            .food(food_id)
            .ok_or_else(|| Error::NotFound(format!("food {} in category {}", food_id, category_id)))
    }
}

fn sort_categories(categories: &mut [FoodCategory]) {
    categories.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
}

fn slot_date(today: NaiveDate, slot: u64) -> NaiveDate {
    today.checked_add_days(Days::new(slot)).unwrap_or(NaiveDate::MAX)
}

fn required_name(name: &str, what: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} name must not be blank", what)));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::gateway::{MemoryStore, Op, Record};

    fn day(offset: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .checked_add_days(Days::new(offset))
            .unwrap()
    }

    fn engine() -> DietEngine<MemoryStore, FixedClock> {
        crate::logging::init_test();
        DietEngine::new(MemoryStore::new(), FixedClock::new(day(0)))
    }

    /// Nuts(0): Almond, Cashew; Fruits(1): Banana
    fn nuts_and_fruits() -> (DietEngine<MemoryStore, FixedClock>, Ids) {
        let mut engine = engine();
        let nuts = engine.add_category("Nuts").unwrap();
        let fruits = engine.add_category("Fruits").unwrap();
        let almond = engine.add_food(nuts, "Almond").unwrap();
        let cashew = engine.add_food(nuts, "Cashew").unwrap();
        let banana = engine.add_food(fruits, "Banana").unwrap();
        (
            engine,
            Ids {
                nuts,
                fruits,
                almond,
                cashew,
                banana,
            },
        )
    }

    struct Ids {
        nuts: Uuid,
        fruits: Uuid,
        almond: Uuid,
        cashew: Uuid,
        banana: Uuid,
    }

    fn scheduled(engine: &DietEngine<MemoryStore, FixedClock>, category: Uuid, food: Uuid) -> Option<NaiveDate> {
        engine.category(category).unwrap().food(food).unwrap().scheduled_date
    }

    fn stored_food(engine: &DietEngine<MemoryStore, FixedClock>, id: Uuid) -> FoodRow {
        engine
            .gateway()
            .rows::<FoodRow>()
            .into_iter()
            .find(|r| r.id == Some(id))
            .unwrap()
    }

    #[test]
    fn test_schedule_follows_total_order() {
        let (mut engine, ids) = nuts_and_fruits();
        engine.recompute_schedule();

        assert_eq!(scheduled(&engine, ids.nuts, ids.almond), Some(day(0)));
        assert_eq!(scheduled(&engine, ids.nuts, ids.cashew), Some(day(1)));
        assert_eq!(scheduled(&engine, ids.fruits, ids.banana), Some(day(2)));

        // Persisted, not just mirrored
        assert_eq!(stored_food(&engine, ids.banana).scheduled_date, Some(day(2)));
    }

    #[test]
    fn test_recompute_is_idempotent_within_a_day() {
        let (mut engine, _) = nuts_and_fruits();
        let before: Vec<_> = engine.schedule().map(|s| s.food.scheduled_date).collect();
        let writes = engine.gateway().write_count();

        let report = engine.recompute_schedule();

        let after: Vec<_> = engine.schedule().map(|s| s.food.scheduled_date).collect();
        assert_eq!(before, after);
        assert_eq!(report, WriteReport::default());
        assert_eq!(engine.gateway().write_count(), writes);
    }

    #[test]
    fn test_recompute_on_later_day_shifts_dates() {
        let (mut engine, ids) = nuts_and_fruits();
        engine.clock().advance_days(3);
        engine.recompute_schedule();

        assert_eq!(scheduled(&engine, ids.nuts, ids.almond), Some(day(3)));
        assert_eq!(scheduled(&engine, ids.fruits, ids.banana), Some(day(5)));
    }

    #[test]
    fn test_mark_introduced_removes_food_from_schedule() {
        let (mut engine, ids) = nuts_and_fruits();

        engine
            .mark_introduced(ids.nuts, ids.almond, ReactionLevel::Mild, "itchy throat")
            .unwrap();

        assert_eq!(scheduled(&engine, ids.nuts, ids.cashew), Some(day(0)));
        assert_eq!(scheduled(&engine, ids.fruits, ids.banana), Some(day(1)));

        let almond = engine.category(ids.nuts).unwrap().food(ids.almond).unwrap().clone();
        assert!(almond.introduced);
        assert_eq!(almond.introduction_date, Some(day(0)));
        assert_eq!(almond.reaction.as_deref(), Some("itchy throat"));
        assert_eq!(almond.reaction_level, Some(ReactionLevel::Mild));
        assert_eq!(almond.active_schedule(), None);

        let history = engine.introduced_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "Almond");
        assert_eq!(history[0].category, "Nuts");
        assert_eq!(history[0].reaction, "mild");
    }

    #[test]
    fn test_mark_introduced_is_one_way() {
        let (mut engine, ids) = nuts_and_fruits();
        engine
            .mark_introduced(ids.nuts, ids.almond, ReactionLevel::None, "")
            .unwrap();

        engine.clock().advance_days(4);
        engine
            .mark_introduced(ids.nuts, ids.almond, ReactionLevel::Severe, "hives")
            .unwrap();
        engine.recompute_schedule();

        let almond = engine.category(ids.nuts).unwrap().food(ids.almond).unwrap();
        assert_eq!(almond.introduction_date, Some(day(0)));
        assert_eq!(almond.reaction_level, Some(ReactionLevel::Severe));
        assert_eq!(almond.scheduled_date, Some(day(0)));
        assert_eq!(stored_food(&engine, ids.almond).introduction_date, Some(day(0)));

        // Only the first introduction lands in history
        assert_eq!(engine.introduced_history().unwrap().len(), 1);
        assert_eq!(scheduled(&engine, ids.nuts, ids.cashew), Some(day(4)));
    }

    #[test]
    fn test_history_failure_does_not_roll_back_introduction() {
        let (mut engine, ids) = nuts_and_fruits();
        engine
            .gateway()
            .fail_next(IntroducedFood::TABLE, Op::Insert, 1);

        engine
            .mark_introduced(ids.nuts, ids.almond, ReactionLevel::Mild, "")
            .unwrap();

        assert!(engine.category(ids.nuts).unwrap().food(ids.almond).unwrap().introduced);
        assert!(stored_food(&engine, ids.almond).introduced);
        assert!(engine.introduced_history().unwrap().is_empty());
    }

    #[test]
    fn test_update_food_stamps_introduction_date_once() {
        let (mut engine, ids) = nuts_and_fruits();
        engine
            .update_food(
                ids.nuts,
                ids.cashew,
                FoodPatch {
                    introduced: Some(true),
                    ..FoodPatch::default()
                },
            )
            .unwrap();
        assert_eq!(
            engine.category(ids.nuts).unwrap().food(ids.cashew).unwrap().introduction_date,
            Some(day(0))
        );

        // Toggling back re-enters the schedule but keeps the date
        engine.clock().advance_days(1);
        engine
            .update_food(
                ids.nuts,
                ids.cashew,
                FoodPatch {
                    introduced: Some(false),
                    introduction_date: Some(day(9)),
                    ..FoodPatch::default()
                },
            )
            .unwrap();
        let cashew = engine.category(ids.nuts).unwrap().food(ids.cashew).unwrap();
        assert!(!cashew.introduced);
        assert_eq!(cashew.introduction_date, Some(day(0)));
        assert_eq!(cashew.scheduled_date, Some(day(2)));
    }

    #[test]
    fn test_update_food_keeps_supplied_introduction_date() {
        let (mut engine, ids) = nuts_and_fruits();
        engine
            .update_food(
                ids.fruits,
                ids.banana,
                FoodPatch {
                    introduced: Some(true),
                    introduction_date: Some(day(7)),
                    ..FoodPatch::default()
                },
            )
            .unwrap();
        assert_eq!(
            stored_food(&engine, ids.banana).introduction_date,
            Some(day(7))
        );
    }

    #[test]
    fn test_rename_without_schedule_change_writes_once() {
        let (mut engine, ids) = nuts_and_fruits();
        let writes = engine.gateway().write_count();

        engine
            .update_food(
                ids.nuts,
                ids.almond,
                FoodPatch {
                    name: Some("  Raw almond ".into()),
                    ..FoodPatch::default()
                },
            )
            .unwrap();

        assert_eq!(engine.gateway().write_count(), writes + 1);
        assert_eq!(stored_food(&engine, ids.almond).name, "Raw almond");
    }

    #[test]
    fn test_delete_category_cascades_and_reschedules() {
        let (mut engine, ids) = nuts_and_fruits();
        engine.delete_category(ids.nuts).unwrap();

        assert_eq!(engine.categories().len(), 1);
        assert_eq!(scheduled(&engine, ids.fruits, ids.banana), Some(day(0)));

        let rows = engine.gateway().rows::<FoodRow>();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, Some(ids.banana));
    }

    #[test]
    fn test_add_food_to_last_category_takes_next_slot() {
        let (mut engine, ids) = nuts_and_fruits();
        let kiwi = engine.add_food(ids.fruits, "Kiwi").unwrap();

        assert_eq!(scheduled(&engine, ids.nuts, ids.almond), Some(day(0)));
        assert_eq!(scheduled(&engine, ids.nuts, ids.cashew), Some(day(1)));
        assert_eq!(scheduled(&engine, ids.fruits, ids.banana), Some(day(2)));
        assert_eq!(scheduled(&engine, ids.fruits, kiwi), Some(day(3)));
    }

    #[test]
    fn test_add_food_keeps_earlier_dates() {
        let (mut engine, ids) = nuts_and_fruits();
        let walnut = engine.add_food(ids.nuts, "Walnut").unwrap();

        assert_eq!(scheduled(&engine, ids.nuts, ids.almond), Some(day(0)));
        assert_eq!(scheduled(&engine, ids.nuts, ids.cashew), Some(day(1)));
        assert_eq!(scheduled(&engine, ids.nuts, walnut), Some(day(2)));
        assert_eq!(
            engine.category(ids.nuts).unwrap().food(walnut).unwrap().order,
            2
        );
    }

    #[test]
    fn test_reorder_categories() {
        let (mut engine, ids) = nuts_and_fruits();
        let report = engine.reorder_categories(&[ids.fruits, ids.nuts]).unwrap();
        assert!(report.is_complete());

        assert_eq!(engine.category(ids.fruits).unwrap().order, 0);
        assert_eq!(engine.category(ids.nuts).unwrap().order, 1);
        assert_eq!(scheduled(&engine, ids.fruits, ids.banana), Some(day(0)));
        assert_eq!(scheduled(&engine, ids.nuts, ids.almond), Some(day(1)));
        assert_eq!(scheduled(&engine, ids.nuts, ids.cashew), Some(day(2)));

        let stored = engine.gateway().rows::<CategoryRow>();
        let fruits = stored.iter().find(|r| r.id == Some(ids.fruits)).unwrap();
        assert_eq!(fruits.order, 0);
    }

    #[test]
    fn test_reorder_unlisted_ids_sort_last() {
        let mut engine = engine();
        let a = engine.add_category("A").unwrap();
        let b = engine.add_category("B").unwrap();
        let c = engine.add_category("C").unwrap();

        engine.reorder_categories(&[c]).unwrap();

        let names: Vec<_> = engine.categories().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["C", "A", "B"]);
        let orders: Vec<_> = engine.categories().iter().map(|c| c.order).collect();
        assert_eq!(orders, [0, 1, 2]);
        assert_eq!(engine.category(a).unwrap().order, 1);
        assert_eq!(engine.category(b).unwrap().order, 2);
    }

    #[test]
    fn test_reorder_foods() {
        let (mut engine, ids) = nuts_and_fruits();
        engine
            .reorder_foods(ids.nuts, &[ids.cashew, ids.almond])
            .unwrap();

        let names: Vec<_> = engine
            .category(ids.nuts)
            .unwrap()
            .foods
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, ["Cashew", "Almond"]);
        assert_eq!(scheduled(&engine, ids.nuts, ids.cashew), Some(day(0)));
        assert_eq!(scheduled(&engine, ids.nuts, ids.almond), Some(day(1)));
    }

    #[test]
    fn test_reorder_partial_failure_is_reported() {
        let (mut engine, ids) = nuts_and_fruits();
        engine
            .gateway()
            .fail_row(CategoryRow::TABLE, Op::Update, ids.nuts);

        let report = engine.reorder_categories(&[ids.fruits, ids.nuts]).unwrap();

        assert_eq!(report.failed, vec![ids.nuts]);
        // Memory moved on; storage did not for the failed row
        assert_eq!(engine.category(ids.nuts).unwrap().order, 1);
        let stored = engine.gateway().rows::<CategoryRow>();
        let nuts = stored.iter().find(|r| r.id == Some(ids.nuts)).unwrap();
        assert_eq!(nuts.order, 0);
    }

    #[test]
    fn test_failed_schedule_write_keeps_old_date_in_memory() {
        let (mut engine, ids) = nuts_and_fruits();
        engine.clock().advance_days(1);
        engine
            .gateway()
            .fail_row(FoodRow::TABLE, Op::Update, ids.cashew);

        let report = engine.recompute_schedule();

        assert_eq!(report.failed, vec![ids.cashew]);
        assert_eq!(report.written, 2);
        assert_eq!(scheduled(&engine, ids.nuts, ids.cashew), Some(day(1)));
        assert_eq!(scheduled(&engine, ids.nuts, ids.almond), Some(day(1)));
    }

    #[test]
    fn test_validation_rejects_before_any_write() {
        let mut engine = engine();
        assert!(matches!(engine.add_category("   "), Err(Error::Validation(_))));
        assert!(matches!(
            engine.add_food(Uuid::new_v4(), "Almond"),
            Err(Error::Validation(_))
        ));
        let nuts = engine.add_category("Nuts").unwrap();
        assert!(matches!(engine.add_food(nuts, ""), Err(Error::Validation(_))));
        assert_eq!(engine.gateway().write_count(), 1);
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() {
        let (mut engine, ids) = nuts_and_fruits();
        let before = engine.categories().to_vec();

        engine.gateway().fail_next(CategoryRow::TABLE, Op::Insert, 1);
        assert!(engine.add_category("Seeds").is_err());

        engine.gateway().fail_next(CategoryRow::TABLE, Op::Update, 2);
        assert!(engine.rename_category(ids.nuts, "Tree nuts").is_err());
        assert!(engine.toggle_category_expanded(ids.nuts).is_err());

        engine.gateway().fail_next(CategoryRow::TABLE, Op::Delete, 1);
        assert!(engine.delete_category(ids.fruits).is_err());

        engine.gateway().fail_next(FoodRow::TABLE, Op::Delete, 1);
        assert!(engine.delete_food(ids.nuts, ids.almond).is_err());

        assert_eq!(engine.categories(), before.as_slice());
    }

    #[test]
    fn test_toggle_expanded_persists() {
        let (mut engine, ids) = nuts_and_fruits();
        assert!(!engine.toggle_category_expanded(ids.nuts).unwrap());
        assert!(engine.toggle_category_expanded(ids.nuts).unwrap());
        let stored = engine.gateway().rows::<CategoryRow>();
        assert!(stored.iter().all(|r| r.expanded));
    }

    #[test]
    fn test_todays_food_exact_match() {
        let (engine, ids) = nuts_and_fruits();
        let today = engine.todays_food().unwrap();
        assert_eq!(today.food.id, ids.almond);
        assert_eq!(today.category.id, ids.nuts);
    }

    #[test]
    fn test_todays_food_prefers_overdue_then_upcoming() {
        let (mut engine, ids) = nuts_and_fruits();

        // Two days later without a recompute: Almond and Cashew are overdue
        engine.clock().advance_days(2);
        assert_eq!(engine.todays_food().unwrap().food.id, ids.banana);
        engine.clock().advance_days(1);
        assert_eq!(engine.todays_food().unwrap().food.id, ids.almond);

        // Upcoming only: move the clock back before the schedule starts
        engine.clock().set(day(0).pred_opt().unwrap());
        assert_eq!(engine.todays_food().unwrap().food.id, ids.almond);

        engine
            .mark_introduced(ids.nuts, ids.almond, ReactionLevel::None, "")
            .unwrap();
        engine
            .mark_introduced(ids.nuts, ids.cashew, ReactionLevel::None, "")
            .unwrap();
        engine
            .mark_introduced(ids.fruits, ids.banana, ReactionLevel::None, "")
            .unwrap();
        assert!(engine.todays_food().is_none());
    }

    #[test]
    fn test_load_all_joins_and_sorts() {
        let (engine, ids) = nuts_and_fruits();
        let store = engine.gateway();

        let mut fresh = DietEngine::new(store, FixedClock::new(day(0)));
        fresh.load_all().unwrap();

        assert_eq!(fresh.categories(), engine.categories());
        assert_eq!(fresh.categories()[0].id, ids.nuts);
        assert_eq!(fresh.find_category("fruits").unwrap().id, ids.fruits);
        assert_eq!(
            fresh.find_food(ids.nuts, "CASHEW").unwrap().id,
            ids.cashew
        );
        assert_eq!(
            fresh.find_food(ids.nuts, &ids.almond.to_string()).unwrap().name,
            "Almond"
        );
    }

    #[test]
    fn test_load_failure_keeps_previous_state() {
        let (mut engine, _) = nuts_and_fruits();
        let before = engine.categories().to_vec();

        engine.gateway().fail_next(FoodRow::TABLE, Op::Select, 1);
        assert!(engine.load_all().is_err());
        assert_eq!(engine.categories(), before.as_slice());
    }

    #[test]
    fn test_load_retries_transient_failures_only() {
        let (engine, _) = nuts_and_fruits();
        let store = engine.gateway();

        store.fail_next_transient(CategoryRow::TABLE, Op::Select, 2);
        let mut retried = DietEngine::new(store, FixedClock::new(day(0)));
        retried
            .load_all_with_retry(3, Duration::from_millis(1))
            .unwrap();
        assert_eq!(retried.categories().len(), 2);

        store.fail_next_transient(CategoryRow::TABLE, Op::Select, 3);
        let mut exhausted = DietEngine::new(store, FixedClock::new(day(0)));
        let err = exhausted
            .load_all_with_retry(3, Duration::from_millis(1))
            .unwrap_err();
        assert!(err.is_transient());
        assert!(exhausted.categories().is_empty());

        store.fail_next(CategoryRow::TABLE, Op::Select, 1);
        let mut permanent = DietEngine::new(store, FixedClock::new(day(0)));
        assert!(permanent
            .load_all_with_retry(3, Duration::from_millis(1))
            .is_err());
        // The permanent fault was consumed by the single attempt
        permanent.load_all().unwrap();
        assert_eq!(permanent.categories().len(), 2);
    }

    #[test]
    fn test_load_skips_orphaned_foods() {
        let (engine, ids) = nuts_and_fruits();
        let store = engine.gateway();
        store
            .insert(FoodRow {
                id: None,
                category_id: Uuid::new_v4(),
                name: "Ghost".into(),
                introduced: false,
                introduction_date: None,
                reaction: None,
                reaction_level: None,
                scheduled_date: None,
                order: 0,
            })
            .unwrap();

        let mut fresh = DietEngine::new(store, FixedClock::new(day(0)));
        fresh.load_all().unwrap();
        let total: usize = fresh.categories().iter().map(|c| c.foods.len()).sum();
        assert_eq!(total, 3);
        assert!(fresh.category(ids.nuts).is_some());
    }

    #[test]
    fn test_seed_starter_plan_only_when_empty() {
        let mut engine = engine();
        let added = engine.seed_starter_plan().unwrap();
        assert!(added > 0);
        assert_eq!(engine.schedule().count(), added);

        let dates: Vec<_> = engine.schedule().filter_map(|s| s.food.scheduled_date).collect();
        assert_eq!(dates.first(), Some(&day(0)));
        assert!(dates.windows(2).all(|w| w[1] == w[0].succ_opt().unwrap()));

        assert_eq!(engine.seed_starter_plan().unwrap(), 0);
    }

    #[test]
    fn test_rename_that_reorders_tied_foods_reschedules() {
        let mut engine = engine();
        let nuts = engine.add_category("Nuts").unwrap();
        let almond = engine.add_food(nuts, "Almond").unwrap();
        let cashew = engine.add_food(nuts, "Cashew").unwrap();

        // Same order: the name decides
        engine.update_food(nuts, cashew, FoodPatch::ordered(0)).unwrap();
        assert_eq!(scheduled(&engine, nuts, almond), Some(day(0)));
        assert_eq!(scheduled(&engine, nuts, cashew), Some(day(1)));

        engine
            .update_food(
                nuts,
                almond,
                FoodPatch {
                    name: Some("Walnut".into()),
                    ..FoodPatch::default()
                },
            )
            .unwrap();

        let names: Vec<_> = engine
            .category(nuts)
            .unwrap()
            .foods
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, ["Cashew", "Walnut"]);
        assert_eq!(scheduled(&engine, nuts, cashew), Some(day(0)));
        assert_eq!(scheduled(&engine, nuts, almond), Some(day(1)));
        assert_eq!(stored_food(&engine, cashew).scheduled_date, Some(day(0)));
        assert_eq!(stored_food(&engine, almond).scheduled_date, Some(day(1)));
    }

    #[test]
    fn test_seed_failure_keeps_stored_rows_in_memory() {
        let mut engine = engine();
        engine.gateway().fail_next(FoodRow::TABLE, Op::Insert, 1);

        assert!(engine.seed_starter_plan().is_err());

        // The first category made it to storage before the food insert failed
        let stored = engine.gateway().rows::<CategoryRow>();
        assert_eq!(stored.len(), 1);
        assert_eq!(engine.categories().len(), 1);
        assert_eq!(engine.categories()[0].id, stored[0].id.unwrap());

        // Memory matches a fresh load, and reseeding is a no-op
        let in_memory = engine.categories().to_vec();
        engine.load_all().unwrap();
        assert_eq!(engine.categories(), in_memory.as_slice());
        assert_eq!(engine.seed_starter_plan().unwrap(), 0);
    }
}

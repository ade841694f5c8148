//! Daily activity timeline (schedule items).
//!
//! Changes are applied to the in-memory list first and rolled back if the
//! gateway write fails, so the list always reflects the last known-good state.

use crate::gateway::{Gateway, Record};
use crate::optimistic;
use crate::{Error, Result};
use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How often an item repeats after its start date
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepeatFrequency {
    Daily,
    /// Every other day
    Alternate,
    Weekly,
    Monthly,
    None,
}

impl fmt::Display for RepeatFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RepeatFrequency::Daily => "daily",
            RepeatFrequency::Alternate => "alternate",
            RepeatFrequency::Weekly => "weekly",
            RepeatFrequency::Monthly => "monthly",
            RepeatFrequency::None => "none",
        };
        f.write_str(label)
    }
}

impl FromStr for RepeatFrequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(RepeatFrequency::Daily),
            "alternate" => Ok(RepeatFrequency::Alternate),
            "weekly" => Ok(RepeatFrequency::Weekly),
            "monthly" => Ok(RepeatFrequency::Monthly),
            "none" | "" => Ok(RepeatFrequency::None),
            other => Err(Error::Validation(format!(
                "unknown repeat frequency '{}'",
                other
            ))),
        }
    }
}

/// Row in `schedule_items`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduleItem {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub time: NaiveTime,
    pub date: NaiveDate,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub repeat_frequency: Option<RepeatFrequency>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScheduleItemPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub time: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
    pub completed: Option<bool>,
    pub repeat_frequency: Option<RepeatFrequency>,
}

impl Record for ScheduleItem {
    const TABLE: &'static str = "schedule_items";
    type Patch = ScheduleItemPatch;

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn apply(&mut self, patch: &ScheduleItemPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(time) = patch.time {
            self.time = time;
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(repeat) = patch.repeat_frequency {
            self.repeat_frequency = Some(repeat);
        }
    }
}

impl ScheduleItem {
    /// Whether this item shows up on `day`
    pub fn occurs_on(&self, day: NaiveDate) -> bool {
        if day < self.date {
            return false;
        }
        let offset = (day - self.date).num_days();

        match self.repeat_frequency.unwrap_or(RepeatFrequency::None) {
            RepeatFrequency::None => day == self.date,
            RepeatFrequency::Daily => true,
            RepeatFrequency::Alternate => offset % 2 == 0,
            RepeatFrequency::Weekly => offset % 7 == 0,
            RepeatFrequency::Monthly => {
                let anchor = self.date.day();
                let last = days_in_month(day);
                day.day() == anchor || (anchor > last && day.day() == last)
            }
        }
    }
}

fn days_in_month(day: NaiveDate) -> u32 {
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

/// Input for [`Timeline::add`]
#[derive(Clone, Debug)]
pub struct NewScheduleItem {
    pub title: String,
    pub description: String,
    pub time: NaiveTime,
    pub date: NaiveDate,
    pub repeat_frequency: Option<RepeatFrequency>,
}

/// In-memory timeline mirrored to the gateway
pub struct Timeline<G: Gateway> {
    gateway: G,
    items: Vec<ScheduleItem>,
}

impl<G: Gateway> Timeline<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            items: Vec::new(),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Replace the list from the gateway; keeps the old list on failure
    pub fn load(&mut self) -> Result<()> {
        let items = self
            .gateway
            .select_ordered(|i: &ScheduleItem| (i.date, i.time))
            .map_err(|e| {
                tracing::error!("Failed to load schedule items: {}", e);
                e
            })?;
        tracing::debug!("Loaded {} schedule items", items.len());
        self.items = items;
        Ok(())
    }

    pub fn items(&self) -> &[ScheduleItem] {
        &self.items
    }

    /// Look an item up by id or case-insensitive title
    pub fn find(&self, key: &str) -> Option<&ScheduleItem> {
        let key = key.trim();
        if let Ok(id) = Uuid::parse_str(key) {
            return self.items.iter().find(|i| i.id == Some(id));
        }
        self.items.iter().find(|i| i.title.eq_ignore_ascii_case(key))
    }

    /// Items occurring on `day`, by time then title
    pub fn items_for(&self, day: NaiveDate) -> Vec<&ScheduleItem> {
        let mut items: Vec<_> = self.items.iter().filter(|i| i.occurs_on(day)).collect();
        items.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.title.cmp(&b.title)));
        items
    }

    pub fn add(&mut self, new: NewScheduleItem) -> Result<Uuid> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(Error::Validation("activity title must not be blank".into()));
        }

        let id = Uuid::new_v4();
        let item = ScheduleItem {
            id: Some(id),
            title: title.to_string(),
            description: new.description.trim().to_string(),
            time: new.time,
            date: new.date,
            completed: false,
            repeat_frequency: new.repeat_frequency,
        };

        let gateway = &self.gateway;
        let remote_item = item.clone();
        optimistic::apply(
            &mut self.items,
            |items| items.push(item),
            |items| items.retain(|i| i.id != Some(id)),
            || gateway.insert(remote_item),
        )?;

        tracing::info!("Added activity {} ({})", title, id);
        Ok(id)
    }

    pub fn delete(&mut self, id: Uuid) -> Result<()> {
        let idx = self.index_of(id)?;
        let gateway = &self.gateway;
        let removed = self.items[idx].clone();

        optimistic::apply(
            &mut self.items,
            |items| {
                items.remove(idx);
            },
            |items| items.insert(idx, removed),
            || gateway.delete::<ScheduleItem>(id),
        )?;

        tracing::info!("Deleted activity {}", id);
        Ok(())
    }

    pub fn set_completed(&mut self, id: Uuid, completed: bool) -> Result<()> {
        let idx = self.index_of(id)?;
        let gateway = &self.gateway;
        let patch = ScheduleItemPatch {
            completed: Some(completed),
            ..ScheduleItemPatch::default()
        };

        optimistic::apply_snapshot(
            &mut self.items,
            |items| items[idx].apply(&patch),
            || gateway.update::<ScheduleItem>(id, &patch),
        )?;

        tracing::info!("Marked activity {} completed={}", id, completed);
        Ok(())
    }

    fn index_of(&self, id: Uuid) -> Result<usize> {
        self.items
            .iter()
            .position(|i| i.id == Some(id))
            .ok_or_else(|| Error::NotFound(format!("activity {}", id)))
    }
}

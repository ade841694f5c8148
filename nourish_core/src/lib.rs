#![forbid(unsafe_code)]

//! Core domain model and business logic for the Nourish elimination diet tracker.
//!
//! This crate provides:
//! - Domain types (categories, foods, reactions)
//! - The diet engine that owns the plan and keeps the schedule in sync
//! - Persistence gateways (JSONL tables on disk, in-memory for tests)
//! - Introduction history, intolerances, weight log and activity timeline
//! - Settings, CSV export and the starter plan

pub mod types;
pub mod error;
pub mod clock;
pub mod config;
pub mod logging;
pub mod gateway;
pub mod engine;
pub mod journal;
pub mod starter;
pub mod intolerance;
pub mod weight;
pub mod optimistic;
pub mod timeline;
pub mod settings;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use gateway::{Gateway, JsonlStore, MemoryStore, Op, Record};
pub use engine::DietEngine;
pub use journal::{FoodSummary, IntroducedFood};
pub use intolerance::{FoodIntolerance, IntoleranceLevel, NewIntolerance};
pub use weight::{Bucket, WeightBucket, WeightEntry};
pub use timeline::{NewScheduleItem, RepeatFrequency, ScheduleItem, Timeline};
pub use settings::Settings;

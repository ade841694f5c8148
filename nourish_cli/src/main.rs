use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use nourish_core::*;
use nourish_core::{export, intolerance, journal, weight};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

type Engine<'a> = DietEngine<&'a JsonlStore, SystemClock>;

#[derive(Parser)]
#[command(name = "nourish")]
#[command(about = "Elimination diet planner and health log", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the food to introduce today (default)
    Today,

    /// Show the full plan, category by category
    Plan,

    /// Manage food categories
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// Manage foods within a category
    Food {
        #[command(subcommand)]
        action: FoodAction,
    },

    /// Change the introduction order
    Reorder {
        #[command(subcommand)]
        action: ReorderAction,
    },

    /// List introduced foods, oldest first
    History,

    /// Track foods that caused a reaction
    Intolerance {
        #[command(subcommand)]
        action: IntoleranceAction,
    },

    /// Weight log
    Weight {
        #[command(subcommand)]
        action: WeightAction,
    },

    /// Daily activity timeline
    Timeline {
        #[command(subcommand)]
        action: TimelineAction,
    },

    /// Local preferences
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Export weights and introduction history to CSV
    Export {
        /// Output directory (defaults to <data-dir>/export)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Fill an empty tracker with a starter plan
    Seed,

    /// Days since the last junk food
    Streak {
        /// Record junk food today, resetting the streak
        #[arg(long)]
        junk: bool,
    },
}

#[derive(Subcommand)]
enum CategoryAction {
    Add { name: String },
    Rename { category: String, name: String },
    Delete { category: String },
    /// Expand or collapse a category in the plan view
    Toggle { category: String },
    List,
}

#[derive(Subcommand)]
enum FoodAction {
    Add {
        category: String,
        name: String,
    },
    Rename {
        category: String,
        food: String,
        name: String,
    },
    Delete {
        category: String,
        food: String,
    },
    /// Mark a food as introduced
    Introduce {
        category: String,
        food: String,

        /// Reaction level (none, mild, severe)
        #[arg(long, default_value = "none")]
        reaction: ReactionLevel,

        /// Free-form reaction notes
        #[arg(long, default_value = "")]
        notes: String,
    },
}

#[derive(Subcommand)]
enum ReorderAction {
    /// Categories in their new order; unlisted ones follow
    Categories { categories: Vec<String> },
    /// Foods of one category in their new order; unlisted ones follow
    Foods { category: String, foods: Vec<String> },
}

#[derive(Subcommand)]
enum IntoleranceAction {
    Add {
        food: String,

        #[arg(long)]
        category: Option<String>,

        /// Severity (mild, severe)
        #[arg(long, default_value = "mild")]
        level: IntoleranceLevel,

        #[arg(long, default_value = "")]
        notes: String,

        /// Discovery date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    List,
    Remove { id: Uuid },
}

#[derive(Subcommand)]
enum WeightAction {
    Log {
        weight: f64,

        /// Date of the weigh-in (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    List,
    /// Averages per week or month
    Chart {
        #[arg(long, default_value = "week")]
        bucket: Bucket,
    },
    /// Import `date,weight` rows from a CSV file
    Import { path: PathBuf },
}

#[derive(Subcommand)]
enum TimelineAction {
    Add {
        title: String,

        /// Time of day, HH:MM
        #[arg(long)]
        time: NaiveTime,

        /// First day (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// daily, alternate, weekly, monthly or none
        #[arg(long)]
        repeat: Option<RepeatFrequency>,

        #[arg(long, default_value = "")]
        description: String,
    },
    Show {
        /// Day to show (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Done {
        item: String,

        /// Clear the completed flag instead
        #[arg(long)]
        undo: bool,
    },
    Delete { item: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print one setting, or all of them
    Get { key: Option<String> },
    /// Store a value; JSON is accepted, anything else is kept as a string
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    nourish_core::logging::init_with_level(&config.logging.level);

    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    std::fs::create_dir_all(&data_dir)?;

    let store = JsonlStore::open(&data_dir);
    let mut engine = DietEngine::new(&store, SystemClock);
    engine.load_all_with_retry(config.sync.load_attempts, config.sync.retry_delay())?;

    match cli.command.unwrap_or(Commands::Today) {
        Commands::Today => cmd_today(&engine),
        Commands::Plan => cmd_plan(&engine),
        Commands::Category { action } => cmd_category(&mut engine, action),
        Commands::Food { action } => cmd_food(&mut engine, action),
        Commands::Reorder { action } => cmd_reorder(&mut engine, action),
        Commands::History => cmd_history(&engine),
        Commands::Intolerance { action } => cmd_intolerance(&store, action),
        Commands::Weight { action } => cmd_weight(&store, action),
        Commands::Timeline { action } => cmd_timeline(&store, action),
        Commands::Settings { action } => cmd_settings(&data_dir, action),
        Commands::Export { out } => {
            cmd_export(&store, out.unwrap_or_else(|| data_dir.join("export")))
        }
        Commands::Seed => cmd_seed(&mut engine),
        Commands::Streak { junk } => cmd_streak(&store, junk),
    }
}

// ============================================================================
// Lookups
// ============================================================================

fn resolve_category(engine: &Engine, key: &str) -> Result<Uuid> {
    engine
        .find_category(key)
        .map(|c| c.id)
        .ok_or_else(|| Error::NotFound(format!("category '{}'", key)))
}

fn resolve_food(engine: &Engine, category: &str, food: &str) -> Result<(Uuid, Uuid)> {
    let category_id = resolve_category(engine, category)?;
    let food_id = engine
        .find_food(category_id, food)
        .map(|f| f.id)
        .ok_or_else(|| Error::NotFound(format!("food '{}' in '{}'", food, category)))?;
    Ok((category_id, food_id))
}

fn report_partial(report: &WriteReport) {
    if !report.is_complete() {
        eprintln!(
            "warning: {} rows saved, {} could not be written",
            report.written,
            report.failed.len()
        );
    }
}

// ============================================================================
// Plan
// ============================================================================

fn cmd_today(engine: &Engine) -> Result<()> {
    let Some(next) = engine.todays_food() else {
        if engine.categories().iter().all(|c| c.foods.is_empty()) {
            println!("No foods planned yet. Add some with `nourish food add` or `nourish seed`.");
        } else {
            println!("All foods introduced!");
        }
        return Ok(());
    };

    println!("Today's food: {} ({})", next.food.name, next.category.name);
    if let Some(date) = next.food.scheduled_date {
        println!("  Scheduled: {}", date);
    }

    // Intolerance lookups are advisory; a failed read does not block the plan
    match intolerance::list_intolerances(engine.gateway()) {
        Ok(known) if intolerance::is_intolerant(&known, &next.food.name) => {
            println!("  ⚠ Previously recorded as an intolerance");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Could not read intolerances: {}", e),
    }
    Ok(())
}

fn cmd_plan(engine: &Engine) -> Result<()> {
    if engine.categories().is_empty() {
        println!("No categories yet.");
        return Ok(());
    }

    for category in engine.categories() {
        let introduced = category.foods.iter().filter(|f| f.introduced).count();
        println!(
            "{} [{}/{} introduced]",
            category.name,
            introduced,
            category.foods.len()
        );

        if !category.expanded {
            println!("  (collapsed)");
            continue;
        }

        for food in &category.foods {
            if food.introduced {
                let date = food
                    .introduction_date
                    .map(|d| d.to_string())
                    .unwrap_or_default();
                let level = food
                    .reaction_level
                    .map(|l| l.as_str())
                    .unwrap_or("none");
                println!("  ✓ {} (introduced {}, reaction: {})", food.name, date, level);
            } else {
                match food.scheduled_date {
                    Some(date) => println!("  • {}  {}", food.name, date),
                    None => println!("  • {}  unscheduled", food.name),
                }
            }
        }
    }
    Ok(())
}

fn cmd_category(engine: &mut Engine, action: CategoryAction) -> Result<()> {
    match action {
        CategoryAction::Add { name } => {
            let id = engine.add_category(&name)?;
            println!("✓ Added category {} ({})", name.trim(), id);
        }
        CategoryAction::Rename { category, name } => {
            let id = resolve_category(engine, &category)?;
            engine.rename_category(id, &name)?;
            println!("✓ Renamed category to {}", name.trim());
        }
        CategoryAction::Delete { category } => {
            let id = resolve_category(engine, &category)?;
            engine.delete_category(id)?;
            println!("✓ Deleted category {}", category);
        }
        CategoryAction::Toggle { category } => {
            let id = resolve_category(engine, &category)?;
            let expanded = engine.toggle_category_expanded(id)?;
            println!(
                "✓ {} is now {}",
                category,
                if expanded { "expanded" } else { "collapsed" }
            );
        }
        CategoryAction::List => {
            for category in engine.categories() {
                println!(
                    "{}  {}  ({} foods)",
                    category.id,
                    category.name,
                    category.foods.len()
                );
            }
        }
    }
    Ok(())
}

fn cmd_food(engine: &mut Engine, action: FoodAction) -> Result<()> {
    match action {
        FoodAction::Add { category, name } => {
            let category_id = resolve_category(engine, &category)?;
            let id = engine.add_food(category_id, &name)?;
            let scheduled = engine
                .find_food(category_id, &id.to_string())
                .and_then(|f| f.scheduled_date);
            match scheduled {
                Some(date) => println!("✓ Added {} (scheduled {})", name.trim(), date),
                None => println!("✓ Added {}", name.trim()),
            }
        }
        FoodAction::Rename {
            category,
            food,
            name,
        } => {
            let (category_id, food_id) = resolve_food(engine, &category, &food)?;
            engine.update_food(
                category_id,
                food_id,
                FoodPatch {
                    name: Some(name.clone()),
                    ..FoodPatch::default()
                },
            )?;
            println!("✓ Renamed {} to {}", food, name.trim());
        }
        FoodAction::Delete { category, food } => {
            let (category_id, food_id) = resolve_food(engine, &category, &food)?;
            engine.delete_food(category_id, food_id)?;
            println!("✓ Deleted {}", food);
        }
        FoodAction::Introduce {
            category,
            food,
            reaction,
            notes,
        } => {
            let (category_id, food_id) = resolve_food(engine, &category, &food)?;
            engine.mark_introduced(category_id, food_id, reaction, &notes)?;
            println!("✓ Marked {} as introduced (reaction: {})", food, reaction);

            if let Some(next) = engine.todays_food() {
                println!("  Next up: {} ({})", next.food.name, next.category.name);
            }
        }
    }
    Ok(())
}

fn cmd_reorder(engine: &mut Engine, action: ReorderAction) -> Result<()> {
    match action {
        ReorderAction::Categories { categories } => {
            let ids = categories
                .iter()
                .map(|key| resolve_category(engine, key))
                .collect::<Result<Vec<_>>>()?;
            let report = engine.reorder_categories(&ids)?;
            report_partial(&report);
            println!("✓ Categories reordered");
        }
        ReorderAction::Foods { category, foods } => {
            let category_id = resolve_category(engine, &category)?;
            let ids = foods
                .iter()
                .map(|key| resolve_food(engine, &category, key).map(|(_, id)| id))
                .collect::<Result<Vec<_>>>()?;
            let report = engine.reorder_foods(category_id, &ids)?;
            report_partial(&report);
            println!("✓ Foods in {} reordered", category);
        }
    }
    cmd_plan(engine)
}

fn cmd_history(engine: &Engine) -> Result<()> {
    let history = engine.introduced_history()?;
    if history.is_empty() {
        println!("No foods introduced yet.");
        return Ok(());
    }

    for entry in history {
        println!(
            "{}  {} ({})  reaction: {}",
            entry.date, entry.name, entry.category, entry.reaction
        );
    }
    Ok(())
}

fn cmd_seed(engine: &mut Engine) -> Result<()> {
    let added = engine.seed_starter_plan()?;
    if added == 0 {
        println!("Tracker already has categories; nothing to seed.");
    } else {
        println!("✓ Added {} foods from the starter plan", added);
    }
    Ok(())
}

// ============================================================================
// Journal, intolerances, weight
// ============================================================================

fn cmd_streak(store: &JsonlStore, junk: bool) -> Result<()> {
    let today = SystemClock.today();
    let summary = if junk {
        journal::record_junk_food(store, today)?
    } else {
        journal::ensure_summary(store)?
    };

    let streak = journal::current_streak(&summary, today);
    println!("Streak: {} days without junk food", streak);
    Ok(())
}

fn cmd_intolerance(store: &JsonlStore, action: IntoleranceAction) -> Result<()> {
    match action {
        IntoleranceAction::Add {
            food,
            category,
            level,
            notes,
            date,
        } => {
            let row = intolerance::record_intolerance(
                store,
                &SystemClock,
                NewIntolerance {
                    food_name: food,
                    category,
                    reaction_level: level,
                    reaction_notes: notes,
                    discovered_date: date,
                },
            )?;
            println!("✓ Recorded {} intolerance to {}", row.reaction_level, row.food_name);
        }
        IntoleranceAction::List => {
            let rows = intolerance::list_intolerances(store)?;
            if rows.is_empty() {
                println!("No intolerances recorded.");
            }
            for row in rows {
                let id = row.id.map(|id| id.to_string()).unwrap_or_default();
                println!(
                    "{}  {}  {}  {}  {}",
                    id, row.discovered_date, row.food_name, row.reaction_level, row.reaction_notes
                );
            }
        }
        IntoleranceAction::Remove { id } => {
            intolerance::remove_intolerance(store, id)?;
            println!("✓ Removed intolerance {}", id);
        }
    }
    Ok(())
}

fn cmd_weight(store: &JsonlStore, action: WeightAction) -> Result<()> {
    match action {
        WeightAction::Log { weight, date } => {
            let date = date.unwrap_or_else(|| SystemClock.today());
            let entry = weight::log_weight(store, date, weight)?;
            println!("✓ Logged {:.1} for {}", entry.weight, entry.date);
        }
        WeightAction::List => {
            let entries = weight::list_weights(store)?;
            for entry in &entries {
                println!("{}  {:.1}", entry.date, entry.weight);
            }
            if let Some(change) = weight::weight_change(&entries) {
                println!("Change: {:+.1}", change);
            }
        }
        WeightAction::Chart { bucket } => {
            let entries = weight::list_weights(store)?;
            for b in weight::bucket_weights(&entries, bucket) {
                println!(
                    "{}  avg {:.1}  min {:.1}  max {:.1}  ({} entries)",
                    b.start, b.average, b.min, b.max, b.count
                );
            }
        }
        WeightAction::Import { path } => {
            let rows = export::import_weights_csv(&path)?;
            let mut imported = 0;
            for (date, value) in rows {
                match weight::log_weight(store, date, value) {
                    Ok(_) => imported += 1,
                    Err(e) => eprintln!("Skipping {}: {}", date, e),
                }
            }
            println!("✓ Imported {} weights", imported);
        }
    }
    Ok(())
}

// ============================================================================
// Timeline, settings, export
// ============================================================================

fn resolve_item(timeline: &Timeline<&JsonlStore>, key: &str) -> Result<Uuid> {
    timeline
        .find(key)
        .and_then(|i| i.id)
        .ok_or_else(|| Error::NotFound(format!("activity '{}'", key)))
}

fn cmd_timeline(store: &JsonlStore, action: TimelineAction) -> Result<()> {
    let mut timeline = Timeline::new(store);
    timeline.load()?;

    match action {
        TimelineAction::Add {
            title,
            time,
            date,
            repeat,
            description,
        } => {
            let id = timeline.add(NewScheduleItem {
                title: title.clone(),
                description,
                time,
                date: date.unwrap_or_else(|| SystemClock.today()),
                repeat_frequency: repeat,
            })?;
            println!("✓ Added {} ({})", title.trim(), id);
        }
        TimelineAction::Show { date } => {
            let day = date.unwrap_or_else(|| SystemClock.today());
            let items = timeline.items_for(day);
            if items.is_empty() {
                println!("Nothing scheduled for {}.", day);
            }
            for item in items {
                let mark = if item.completed { "x" } else { " " };
                let repeat = item
                    .repeat_frequency
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default();
                println!("[{}] {}  {}{}", mark, item.time.format("%H:%M"), item.title, repeat);
            }
        }
        TimelineAction::Done { item, undo } => {
            let id = resolve_item(&timeline, &item)?;
            timeline.set_completed(id, !undo)?;
            println!("✓ {} {}", item, if undo { "reopened" } else { "done" });
        }
        TimelineAction::Delete { item } => {
            let id = resolve_item(&timeline, &item)?;
            timeline.delete(id)?;
            println!("✓ Deleted {}", item);
        }
    }
    Ok(())
}

fn cmd_settings(data_dir: &Path, action: SettingsAction) -> Result<()> {
    let mut settings = Settings::in_data_dir(data_dir);

    match action {
        SettingsAction::Get { key: Some(key) } => match settings.get_raw(&key) {
            Some(value) => println!("{}", value),
            None => println!("{} is not set", key),
        },
        SettingsAction::Get { key: None } => {
            let keys: Vec<String> = settings.keys().map(str::to_string).collect();
            for key in keys {
                if let Some(value) = settings.get_raw(&key) {
                    println!("{} = {}", key, value);
                }
            }
        }
        SettingsAction::Set { key, value } => {
            let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            settings.set(&key, &value)?;
            println!("✓ {} = {}", key, value);
        }
    }
    Ok(())
}

fn cmd_export(store: &JsonlStore, out: PathBuf) -> Result<()> {
    let weights = weight::list_weights(store)?;
    let history = journal::introduced_history(store)?;

    let weights_path = out.join("weights.csv");
    let history_path = out.join("history.csv");
    let weight_rows = export::export_weights_csv(&weights, &weights_path)?;
    let history_rows = export::export_history_csv(&history, &history_path)?;

    println!("✓ Exported {} weights to {}", weight_rows, weights_path.display());
    println!("✓ Exported {} history entries to {}", history_rows, history_path.display());
    Ok(())
}

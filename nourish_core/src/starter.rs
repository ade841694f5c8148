//! Built-in starter plan for an empty tracker.
//!
//! Categories run roughly from least to most commonly reactive, so the
//! schedule introduces gentle foods first.

use once_cell::sync::Lazy;

/// A category and its foods, in introduction order
#[derive(Clone, Debug)]
pub struct StarterCategory {
    pub name: String,
    pub foods: Vec<String>,
}

static STARTER_PLAN: Lazy<Vec<StarterCategory>> = Lazy::new(build_starter_plan);

/// Cached starter plan
pub fn starter_plan() -> &'static [StarterCategory] {
    &STARTER_PLAN
}

fn build_starter_plan() -> Vec<StarterCategory> {
    let plan: [(&str, &[&str]); 6] = [
        ("Vegetables", &["Zucchini", "Carrot", "Sweet potato", "Spinach"]),
        ("Fruits", &["Pear", "Banana", "Blueberry", "Apple"]),
        ("Grains", &["Rice", "Oats", "Corn", "Wheat"]),
        ("Proteins", &["Chicken", "Beef", "Salmon", "Egg"]),
        ("Nuts & Seeds", &["Sunflower seed", "Almond", "Cashew", "Peanut"]),
        ("Dairy", &["Butter", "Yogurt", "Cheese", "Milk"]),
    ];

    plan.iter()
        .map(|(name, foods)| StarterCategory {
            name: (*name).to_string(),
            foods: foods.iter().map(|f| (*f).to_string()).collect(),
        })
        .collect()
}

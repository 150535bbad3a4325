use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// How on-hand inventory steers the generated recipes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryMode {
    /// Prefer items already in the kitchen.
    #[default]
    All,
    /// Recipes draw only from items flagged as priority.
    Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default)]
    pub priority: bool,
}

/// Daily macro targets in grams.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroGoals {
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
}

/// Immutable snapshot of what the user asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub days: u32,
    pub meals_per_day: u32,
    pub people: u32,
    pub target_calories: u32,
    #[serde(default)]
    pub restrictions: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_goals: Option<MacroGoals>,
    #[serde(default)]
    pub cuisine_preferences: Vec<String>,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub inventory_mode: InventoryMode,
}

/// Ingredient amount as emitted by the generator: a number or free text
/// such as "1/2" or "to taste".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub name: String,
    pub amount: Amount,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub step: u32,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_minutes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nutrition {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fats: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub name: String,
    pub description: String,
    pub cooking_time: u32,
    pub servings: u32,
    pub difficulty: String,
    pub cuisine: String,
    pub meal_type: String,
    pub ingredients: Vec<Ingredient>,
    pub instructions: Vec<Instruction>,
    pub nutrition: Nutrition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tips: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedMeal {
    #[serde(rename = "type")]
    pub meal_type: String,
    pub recipe: Recipe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPlan {
    pub day: u32,
    pub meals: Vec<PlannedMeal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShoppingCategory {
    Meat,
    Fish,
    Dairy,
    Eggs,
    Vegetables,
    Fruit,
    Grains,
    Legumes,
    Oils,
    Spices,
    Other,
}

impl ShoppingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShoppingCategory::Meat => "meat",
            ShoppingCategory::Fish => "fish",
            ShoppingCategory::Dairy => "dairy",
            ShoppingCategory::Eggs => "eggs",
            ShoppingCategory::Vegetables => "vegetables",
            ShoppingCategory::Fruit => "fruit",
            ShoppingCategory::Grains => "grains",
            ShoppingCategory::Legumes => "legumes",
            ShoppingCategory::Oils => "oils",
            ShoppingCategory::Spices => "spices",
            ShoppingCategory::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingItem {
    pub name: String,
    pub quantity: String,
    pub category: ShoppingCategory,
}

/// The finished plan stored on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanResult {
    pub id: Uuid,
    pub name: String,
    pub days: u32,
    pub meals_per_day: u32,
    pub people: u32,
    pub daily_plans: Vec<DailyPlan>,
    pub shopping_list: Vec<ShoppingItem>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

//! Turning a plan request into a finished meal plan: prompt construction,
//! the call to the text generator, response validation and the shopping list.

pub mod generator;
pub mod parser;
pub mod prompt;
pub mod shopping;
pub mod types;

use time::OffsetDateTime;
use uuid::Uuid;

pub use generator::{GenerationError, HttpTextGenerator, ScriptedGenerator, TextGenerator};
pub use parser::ParseError;
pub use types::{MealPlanResult, PlanRequest};

/// Validate a raw generator response against the request and build the
/// stored result, shopping list included.
pub fn assemble_plan(req: &PlanRequest, raw: &str) -> Result<MealPlanResult, ParseError> {
    let generated = parser::parse_plan(raw, req.days, req.meals_per_day)?;
    let shopping_list = shopping::consolidate(shopping::flatten_ingredients(&generated.daily_plans));
    let name = generated
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{}-Day Meal Plan", req.days));

    Ok(MealPlanResult {
        id: Uuid::new_v4(),
        name,
        days: req.days,
        meals_per_day: req.meals_per_day,
        people: req.people,
        daily_plans: generated.daily_plans,
        shopping_list,
        created_at: OffsetDateTime::now_utc(),
    })
}

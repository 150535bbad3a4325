use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::types::DailyPlan;

/// Raised when the generator's text cannot be turned into a plan.
///
/// Messages are phrased so users can tell a formatting failure apart from a
/// content failure.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("The meal plan response was not formatted correctly: no JSON object found")]
    NoJson,

    #[error("The meal plan response was not formatted correctly: invalid JSON ({0})")]
    InvalidJson(String),

    #[error("The meal plan response was not formatted correctly: missing dailyPlans")]
    MissingDailyPlans,

    #[error("The meal plan response was not formatted correctly: dailyPlans is not a list")]
    DailyPlansNotSequence,

    #[error("The meal plan response was not formatted correctly: {0}")]
    Schema(String),

    #[error("The meal plan response was not formatted correctly: {0}")]
    Shape(String),
}

/// Structured content extracted from a generator response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPlan {
    #[serde(default)]
    pub name: Option<String>,
    pub daily_plans: Vec<DailyPlan>,
}

lazy_static! {
    static ref FENCED_RE: Regex =
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid fence regex");
}

/// Remove markdown code fences or surrounding prose around the JSON payload.
pub fn strip_wrapping(raw: &str) -> Option<&str> {
    if let Some(inner) = FENCED_RE.captures(raw).and_then(|c| c.get(1)) {
        let inner = inner.as_str().trim();
        if !inner.is_empty() {
            return Some(inner);
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Decode and validate a raw generator response.
///
/// `days` and `meals_per_day` are the requested shape; any deviation rejects
/// the whole response instead of repairing it.
pub fn parse_plan(raw: &str, days: u32, meals_per_day: u32) -> Result<GeneratedPlan, ParseError> {
    let body = strip_wrapping(raw).ok_or(ParseError::NoJson)?;
    let value: Value =
        serde_json::from_str(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    match value.get("dailyPlans") {
        None | Some(Value::Null) => return Err(ParseError::MissingDailyPlans),
        Some(Value::Array(_)) => {}
        Some(_) => return Err(ParseError::DailyPlansNotSequence),
    }

    let plan: GeneratedPlan =
        serde_json::from_value(value).map_err(|e| ParseError::Schema(e.to_string()))?;
    check_shape(&plan.daily_plans, days, meals_per_day)?;
    Ok(plan)
}

fn check_shape(plans: &[DailyPlan], days: u32, meals_per_day: u32) -> Result<(), ParseError> {
    if plans.len() != days as usize {
        return Err(ParseError::Shape(format!(
            "expected {days} days, got {}",
            plans.len()
        )));
    }
    for (idx, plan) in plans.iter().enumerate() {
        if plan.meals.len() != meals_per_day as usize {
            return Err(ParseError::Shape(format!(
                "day {} has {} meals, expected {meals_per_day}",
                idx + 1,
                plan.meals.len()
            )));
        }
    }
    Ok(())
}

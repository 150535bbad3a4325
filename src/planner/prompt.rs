use std::fmt::Write;

use super::types::{InventoryItem, InventoryMode, PlanRequest};

/// Display labels used by the app mapped to the wording the generator expects.
const DIETARY_VOCABULARY: &[(&str, &str)] = &[
    ("vegetarian", "vegetarian (no meat or fish)"),
    ("vegan", "vegan (no animal products at all)"),
    ("pescatarian", "pescatarian (fish allowed, no other meat)"),
    ("gluten-free", "gluten-free"),
    ("gluten free", "gluten-free"),
    ("dairy-free", "dairy-free (no milk, cheese, butter or cream)"),
    ("dairy free", "dairy-free (no milk, cheese, butter or cream)"),
    ("lactose-free", "lactose-free"),
    ("keto", "ketogenic (very low carbohydrate, high fat)"),
    ("low-carb", "low-carbohydrate"),
    ("low carb", "low-carbohydrate"),
    ("paleo", "paleo (no grains, legumes or processed foods)"),
    ("halal", "halal"),
    ("kosher", "kosher"),
    ("low-sodium", "low-sodium"),
    ("nut-free", "nut-free"),
    ("high-protein", "high-protein"),
];

const MEAL_SLOTS: &[&str] = &["breakfast", "lunch", "dinner", "snack", "snack", "snack"];

/// Translate a restriction label from the app into generator vocabulary.
/// Unknown labels are passed through lowercased.
pub fn map_restriction(label: &str) -> String {
    let key = label.trim().to_lowercase();
    DIETARY_VOCABULARY
        .iter()
        .find(|(ui, _)| *ui == key)
        .map(|(_, service)| (*service).to_string())
        .unwrap_or(key)
}

/// Calories available to each meal, rounded to the nearest kcal.
pub fn per_meal_calories(target_calories: u32, meals_per_day: u32) -> u32 {
    if meals_per_day == 0 {
        return target_calories;
    }
    (f64::from(target_calories) / f64::from(meals_per_day)).round() as u32
}

/// Meal type names for one day, in serving order.
pub fn meal_slots(meals_per_day: u32) -> Vec<&'static str> {
    (0..meals_per_day as usize)
        .map(|i| MEAL_SLOTS.get(i).copied().unwrap_or("snack"))
        .collect()
}

/// Build the full instruction text sent to the generator.
///
/// The output is deterministic for a given request.
pub fn build_prompt(req: &PlanRequest) -> String {
    let mut p = String::with_capacity(4096);
    let per_meal = per_meal_calories(req.target_calories, req.meals_per_day);
    let slots = meal_slots(req.meals_per_day).join(", ");

    let _ = writeln!(
        p,
        "Create a {days}-day meal plan with {meals} meals per day for {people} {persons}.",
        days = req.days,
        meals = req.meals_per_day,
        people = req.people,
        persons = if req.people == 1 { "person" } else { "people" },
    );
    let _ = writeln!(p, "Meals each day, in order: {slots}.");
    let _ = writeln!(
        p,
        "Target about {} kcal per person per day, roughly {} kcal per meal.",
        req.target_calories, per_meal
    );

    if let Some(goals) = &req.macro_goals {
        let mut parts = Vec::new();
        if let Some(v) = goals.protein {
            parts.push(format!("protein {v:.0} g"));
        }
        if let Some(v) = goals.carbs {
            parts.push(format!("carbohydrates {v:.0} g"));
        }
        if let Some(v) = goals.fats {
            parts.push(format!("fats {v:.0} g"));
        }
        if !parts.is_empty() {
            let _ = writeln!(p, "Daily macro targets per person: {}.", parts.join(", "));
        }
    }

    if !req.restrictions.is_empty() {
        let mapped: Vec<String> = req.restrictions.iter().map(|r| map_restriction(r)).collect();
        let _ = writeln!(p, "Dietary requirements: {}.", mapped.join(", "));
    }

    if !req.allergies.is_empty() {
        let _ = writeln!(
            p,
            "ALLERGIES (hard constraint): never use {} or any product containing them.",
            req.allergies.join(", ")
        );
    }

    if !req.cuisine_preferences.is_empty() {
        let _ = writeln!(
            p,
            "Preferred cuisines: {}.",
            req.cuisine_preferences.join(", ")
        );
    }

    write_inventory(&mut p, &req.inventory, req.inventory_mode);

    let _ = writeln!(p);
    let _ = writeln!(p, "Scale every recipe to {} servings.", req.people);
    let _ = writeln!(
        p,
        "Respond with a single JSON object and nothing else, using exactly this shape:"
    );
    p.push_str(RESPONSE_SHAPE);
    let _ = writeln!(
        p,
        "\"dailyPlans\" must contain exactly {} entries (day 1 to {}), each with exactly {} meals.",
        req.days, req.days, req.meals_per_day
    );
    let _ = writeln!(
        p,
        "Use numbers for amount, cookingTime, servings, step, timeMinutes and all nutrition values."
    );
    p
}

fn write_inventory(p: &mut String, inventory: &[InventoryItem], mode: InventoryMode) {
    let describe = |item: &InventoryItem| match &item.quantity {
        Some(q) if !q.trim().is_empty() => format!("{} ({})", item.name.trim(), q.trim()),
        _ => item.name.trim().to_string(),
    };

    match mode {
        InventoryMode::Priority => {
            let priority: Vec<String> = inventory
                .iter()
                .filter(|i| i.priority)
                .map(describe)
                .collect();
            if priority.is_empty() {
                return write_inventory(p, inventory, InventoryMode::All);
            }
            let _ = writeln!(
                p,
                "You MUST use exclusively these ingredients as the basis of every recipe: {}.",
                priority.join(", ")
            );
            let _ = writeln!(
                p,
                "Do not add other main ingredients; only basic pantry staples (salt, pepper, water, cooking oil) are allowed in addition."
            );
        }
        InventoryMode::All => {
            if inventory.is_empty() {
                return;
            }
            let items: Vec<String> = inventory.iter().map(describe).collect();
            let _ = writeln!(
                p,
                "The user already has these ingredients at home; favour recipes that use them: {}.",
                items.join(", ")
            );
        }
    }
}

const RESPONSE_SHAPE: &str = r#"{
  "name": "plan title",
  "dailyPlans": [
    {
      "day": 1,
      "meals": [
        {
          "type": "breakfast",
          "recipe": {
            "name": "recipe name",
            "description": "one sentence",
            "cookingTime": 20,
            "servings": 2,
            "difficulty": "easy",
            "cuisine": "cuisine name",
            "mealType": "breakfast",
            "ingredients": [{ "name": "ingredient", "amount": 200, "unit": "g" }],
            "instructions": [{ "step": 1, "instruction": "what to do", "timeMinutes": 5 }],
            "nutrition": { "calories": 450, "protein": 25, "carbs": 40, "fats": 15 },
            "tips": ["optional tip"],
            "tags": ["optional tag"]
          }
        }
      ]
    }
  ]
}
"#;

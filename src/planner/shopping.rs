use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use super::types::{Amount, DailyPlan, Ingredient, ShoppingCategory, ShoppingItem};

/// Keyword table checked in order; the first category with a matching
/// keyword wins.
const CATEGORY_KEYWORDS: &[(ShoppingCategory, &[&str])] = &[
    (
        ShoppingCategory::Meat,
        &[
            "chicken", "beef", "pork", "lamb", "turkey", "bacon", "ham", "sausage", "steak",
            "mince", "veal", "duck", "prosciutto", "chorizo",
        ],
    ),
    (
        ShoppingCategory::Fish,
        &[
            "salmon", "tuna", "cod", "fish", "shrimp", "prawn", "trout", "sardine", "anchov",
            "mackerel", "tilapia", "crab", "mussel", "scallop", "squid",
        ],
    ),
    (
        ShoppingCategory::Dairy,
        &[
            "milk", "cheese", "yogurt", "yoghurt", "butter", "cream", "parmesan", "mozzarella",
            "feta", "ricotta", "kefir",
        ],
    ),
    (ShoppingCategory::Eggs, &["egg"]),
    (
        ShoppingCategory::Vegetables,
        &[
            "onion", "garlic", "tomato", "bell pepper", "carrot", "broccoli", "spinach", "lettuce",
            "cucumber", "zucchini", "courgette", "potato", "mushroom", "cabbage", "kale",
            "celery", "cauliflower", "leek", "asparagus", "pumpkin", "squash", "sweetcorn", "peas",
            "aubergine", "beet", "radish", "arugula", "shallot",
        ],
    ),
    (
        ShoppingCategory::Fruit,
        &[
            "apple", "banana", "orange", "lemon", "lime", "berry", "berries", "grape", "mango",
            "pineapple", "pear", "peach", "avocado", "cherry", "kiwi", "melon", "date",
        ],
    ),
    (
        ShoppingCategory::Grains,
        &[
            "rice", "pasta", "bread", "flour", "oat", "quinoa", "noodle", "couscous", "barley",
            "tortilla", "bulgur", "spaghetti", "cereal",
        ],
    ),
    (
        ShoppingCategory::Legumes,
        &["bean", "lentil", "chickpea", "tofu", "tempeh", "edamame", "hummus"],
    ),
    (
        ShoppingCategory::Oils,
        &["oil", "vinegar", "ghee", "lard"],
    ),
    (
        ShoppingCategory::Spices,
        &[
            "salt", "cumin", "paprika", "cinnamon", "oregano", "basil", "thyme", "rosemary",
            "turmeric", "chili", "ginger", "nutmeg", "spice", "parsley", "cilantro", "coriander",
            "curry", "bay leaf", "dill", "mint",
        ],
    ),
];

lazy_static! {
    static ref LEADING_NUMBER_RE: Regex =
        Regex::new(r"^\s*(\d+(?:[.,]\d+)?)").expect("valid number regex");
}

/// Category for an ingredient name, by case-insensitive substring match.
pub fn categorize(name: &str) -> ShoppingCategory {
    let name = name.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| name.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(ShoppingCategory::Other)
}

/// Numeric value of an amount; anything without a leading number counts as 1.
pub fn numeric_amount(amount: &Amount) -> f64 {
    let value = match amount {
        Amount::Number(n) => Some(*n),
        Amount::Text(t) => LEADING_NUMBER_RE
            .captures(t)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok()),
    };
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 1.0,
    }
}

/// Every ingredient line across all recipes of the plan.
pub fn flatten_ingredients(plans: &[DailyPlan]) -> Vec<&Ingredient> {
    plans
        .iter()
        .flat_map(|d| d.meals.iter())
        .flat_map(|m| m.recipe.ingredients.iter())
        .collect()
}

struct Line {
    name: String,
    unit: String,
    total: f64,
}

/// Merge ingredient lines into a shopping list.
///
/// Lines are keyed by lowercased name; amounts are summed and the unit of
/// the first line seen for a key is kept. The displayed name is the
/// lexicographically smallest spelling. Output is sorted by category name,
/// then by ingredient name.
pub fn consolidate<'a, I>(ingredients: I) -> Vec<ShoppingItem>
where
    I: IntoIterator<Item = &'a Ingredient>,
{
    let mut lines: HashMap<String, Line> = HashMap::new();
    for ing in ingredients {
        let name = ing.name.trim();
        if name.is_empty() {
            continue;
        }
        let amount = numeric_amount(&ing.amount);
        lines
            .entry(name.to_lowercase())
            .and_modify(|l| {
                l.total += amount;
                if name < l.name.as_str() {
                    l.name = name.to_string();
                }
            })
            .or_insert_with(|| Line {
                name: name.to_string(),
                unit: ing.unit.trim().to_string(),
                total: amount,
            });
    }

    let mut items: Vec<(String, ShoppingItem)> = lines
        .into_iter()
        .map(|(key, line)| {
            let quantity = display_quantity(line.total, &line.unit);
            let item = ShoppingItem {
                category: categorize(&line.name),
                name: line.name,
                quantity,
            };
            (key, item)
        })
        .collect();
    items.sort_by(|(ka, a), (kb, b)| {
        a.category
            .as_str()
            .cmp(b.category.as_str())
            .then_with(|| ka.cmp(kb))
    });
    items.into_iter().map(|(_, item)| item).collect()
}

fn display_quantity(total: f64, unit: &str) -> String {
    // Sums of decimal amounts drift slightly above whole numbers.
    let rounded = ((total * 1e6).round() / 1e6).ceil() as u64;
    if unit.is_empty() {
        rounded.to_string()
    } else {
        format!("{rounded} {unit}")
    }
}

use anyhow::{Result, bail};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

// --- Meal types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Desayuno,
    Almuerzo,
    Cena,
}

impl MealType {
    pub const ALL: [MealType; 3] = [MealType::Desayuno, MealType::Almuerzo, MealType::Cena];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desayuno => "desayuno",
            Self::Almuerzo => "almuerzo",
            Self::Cena => "cena",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "desayuno" => Ok(Self::Desayuno),
            "almuerzo" => Ok(Self::Almuerzo),
            "cena" => Ok(Self::Cena),
            _ => bail!("Invalid meal type '{value}'. Must be one of: desayuno, almuerzo, cena"),
        }
    }
}

impl std::fmt::Display for MealType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which meal types a generation request covers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MealSelection {
    pub desayuno: bool,
    pub almuerzo: bool,
    pub cena: bool,
}

impl MealSelection {
    /// Active meal types in day order. An empty selection means all three.
    #[must_use]
    pub fn active(&self) -> Vec<MealType> {
        let selected: Vec<MealType> = MealType::ALL
            .into_iter()
            .filter(|m| match m {
                MealType::Desayuno => self.desayuno,
                MealType::Almuerzo => self.almuerzo,
                MealType::Cena => self.cena,
            })
            .collect();
        if selected.is_empty() {
            MealType::ALL.to_vec()
        } else {
            selected
        }
    }
}

/// Monday of the week containing `date`. Menus are keyed by this date.
#[must_use]
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

#[must_use]
pub fn spanish_weekday(date: NaiveDate) -> &'static str {
    match date.weekday() {
        chrono::Weekday::Mon => "lunes",
        chrono::Weekday::Tue => "martes",
        chrono::Weekday::Wed => "miércoles",
        chrono::Weekday::Thu => "jueves",
        chrono::Weekday::Fri => "viernes",
        chrono::Weekday::Sat => "sábado",
        chrono::Weekday::Sun => "domingo",
    }
}

/// Case-insensitive identity of an ingredient name: trimmed, inner
/// whitespace collapsed, lowercased.
#[must_use]
pub fn ingredient_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Display form of an ingredient name: trimmed with inner whitespace collapsed.
#[must_use]
pub fn ingredient_display_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

// --- Users ---

pub const DEFAULT_DIET: &str = "omnivora";
pub const DEFAULT_CALORIE_TARGET: i64 = 2000;
pub const DEFAULT_SERVINGS: i64 = 1;
pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: String,
    pub diet: String,
    pub calorie_target: i64,
    pub allergies: Vec<String>,
    pub servings: i64,
    pub preferences: String,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Partial profile update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub diet: Option<String>,
    pub calorie_target: Option<i64>,
    pub allergies: Option<Vec<String>>,
    pub servings: Option<i64>,
    pub preferences: Option<String>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.diet.is_none()
            && self.calorie_target.is_none()
            && self.allergies.is_none()
            && self.servings.is_none()
            && self.preferences.is_none()
    }
}

pub fn validate_profile_update(update: &ProfileUpdate) -> Result<()> {
    if update.is_empty() {
        bail!("At least one field must be provided");
    }
    if let Some(diet) = &update.diet {
        if diet.trim().is_empty() {
            bail!("diet must not be empty");
        }
    }
    if let Some(calories) = update.calorie_target {
        if !(1..=10_000).contains(&calories) {
            bail!("calorie_target must be between 1 and 10000");
        }
    }
    if let Some(servings) = update.servings {
        if !(1..=12).contains(&servings) {
            bail!("servings must be between 1 and 12");
        }
    }
    if let Some(allergies) = &update.allergies {
        if allergies.iter().any(|a| a.trim().is_empty()) {
            bail!("allergies must not contain empty entries");
        }
    }
    Ok(())
}

// --- Generated recipes (LLM boundary) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Facil,
    Intermedio,
    Dificil,
}

impl Difficulty {
    pub const NAMES: [&'static str; 3] = ["facil", "intermedio", "dificil"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Facil => "facil",
            Self::Intermedio => "intermedio",
            Self::Dificil => "dificil",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    G,
    Kg,
    Ml,
    L,
    Unidad,
}

impl Unit {
    pub const NAMES: [&'static str; 5] = ["g", "kg", "ml", "l", "unidad"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::G => "g",
            Self::Kg => "kg",
            Self::Ml => "ml",
            Self::L => "l",
            Self::Unidad => "unidad",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedIngredient {
    pub name: String,
    pub amount: f64,
    pub unit: Unit,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Macros {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl Macros {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn scaled(self, servings: i64) -> Self {
        let factor = servings as f64;
        Self {
            calories: self.calories * factor,
            protein: self.protein * factor,
            carbs: self.carbs * factor,
            fat: self.fat * factor,
        }
    }
}

/// A recipe exactly as the generation API returns it. Macros are per serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedRecipe {
    pub title: String,
    pub description: String,
    pub servings: i64,
    pub difficulty: Difficulty,
    pub prep_time_minutes: i64,
    pub ingredients: Vec<GeneratedIngredient>,
    pub instructions: Vec<String>,
    pub macros_per_serving: Macros,
}

impl GeneratedRecipe {
    /// Per-recipe totals: per-serving macros multiplied by servings.
    #[must_use]
    pub fn total_macros(&self) -> Macros {
        self.macros_per_serving.scaled(self.servings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            bail!("title must not be empty");
        }
        if self.servings < 1 {
            bail!("servings must be at least 1 (got {})", self.servings);
        }
        if self.prep_time_minutes < 0 {
            bail!("prep_time_minutes must not be negative");
        }
        if self.ingredients.is_empty() {
            bail!("recipe '{}' has no ingredients", self.title);
        }
        if self.instructions.iter().all(|s| s.trim().is_empty()) {
            bail!("recipe '{}' has no instructions", self.title);
        }
        for ingredient in &self.ingredients {
            if ingredient.name.trim().is_empty() {
                bail!("ingredient name must not be empty");
            }
            if !(ingredient.amount.is_finite() && ingredient.amount > 0.0) {
                bail!(
                    "ingredient '{}' must have a positive amount",
                    ingredient.name
                );
            }
        }
        let m = self.macros_per_serving;
        if [m.calories, m.protein, m.carbs, m.fat]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            bail!("macros must be non-negative numbers");
        }
        Ok(())
    }
}

// --- Stored entities ---

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub servings: i64,
    pub difficulty: String,
    pub prep_time_minutes: i64,
    pub instructions: Vec<String>,
    // Per-recipe totals
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub favorite: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeIngredient {
    pub ingredient_id: i64,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub ingredients: Vec<RecipeIngredient>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Menu {
    pub id: i64,
    pub user_id: String,
    pub week_start: NaiveDate,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledRecipe {
    pub date: NaiveDate,
    pub meal_type: MealType,
    pub recipe: Recipe,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuDetail {
    #[serde(flatten)]
    pub menu: Menu,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shopping_list_id: Option<i64>,
    pub schedule: Vec<ScheduledRecipe>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingListItem {
    pub ingredient_id: i64,
    pub name: String,
    pub acquired: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingList {
    pub id: i64,
    pub menu_id: i64,
    pub week_start: NaiveDate,
    pub items: Vec<ShoppingListItem>,
    pub acquired_count: usize,
    pub pending_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recipe() -> GeneratedRecipe {
        GeneratedRecipe {
            title: "Tortilla de patatas".to_string(),
            description: "Clásica tortilla española".to_string(),
            servings: 4,
            difficulty: Difficulty::Intermedio,
            prep_time_minutes: 40,
            ingredients: vec![
                GeneratedIngredient {
                    name: "Patata".to_string(),
                    amount: 600.0,
                    unit: Unit::G,
                    note: None,
                },
                GeneratedIngredient {
                    name: "Huevo".to_string(),
                    amount: 6.0,
                    unit: Unit::Unidad,
                    note: Some("camperos".to_string()),
                },
            ],
            instructions: vec!["Pelar y cortar las patatas".to_string()],
            macros_per_serving: Macros {
                calories: 350.0,
                protein: 14.0,
                carbs: 30.0,
                fat: 18.0,
            },
        }
    }

    #[test]
    fn test_week_start_is_monday() {
        let sunday = NaiveDate::from_ymd_opt(2024, 6, 16).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        assert_eq!(week_start(sunday), monday);
        assert_eq!(week_start(monday), monday);

        let wednesday = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
        assert_eq!(week_start(wednesday), monday);
    }

    #[test]
    fn test_week_start_crosses_year_boundary() {
        let new_year = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(
            week_start(new_year),
            NaiveDate::from_ymd_opt(2024, 12, 30).unwrap()
        );
    }

    #[test]
    fn test_meal_selection_defaults_to_all() {
        let empty = MealSelection::default();
        assert_eq!(empty.active(), MealType::ALL.to_vec());
    }

    #[test]
    fn test_meal_selection_keeps_day_order() {
        let selection = MealSelection {
            desayuno: true,
            almuerzo: false,
            cena: true,
        };
        assert_eq!(
            selection.active(),
            vec![MealType::Desayuno, MealType::Cena]
        );
    }

    #[test]
    fn test_meal_type_parse() {
        assert_eq!(MealType::parse("Cena").unwrap(), MealType::Cena);
        assert_eq!(MealType::parse(" desayuno ").unwrap(), MealType::Desayuno);
        assert!(MealType::parse("merienda").is_err());
    }

    #[test]
    fn test_ingredient_key_case_and_spacing() {
        assert_eq!(ingredient_key("Tomate"), ingredient_key("tomate"));
        assert_eq!(ingredient_key("  Aceite   de oliva "), "aceite de oliva");
        assert_eq!(ingredient_key("PIÑA"), "piña");
        assert_eq!(ingredient_display_name("  Aceite   de oliva "), "Aceite de oliva");
    }

    #[test]
    fn test_total_macros_multiplies_by_servings() {
        let totals = sample_recipe().total_macros();
        assert!((totals.calories - 1400.0).abs() < f64::EPSILON);
        assert!((totals.protein - 56.0).abs() < f64::EPSILON);
        assert!((totals.carbs - 120.0).abs() < f64::EPSILON);
        assert!((totals.fat - 72.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_generated_recipe() {
        assert!(sample_recipe().validate().is_ok());

        let mut no_title = sample_recipe();
        no_title.title = "  ".to_string();
        assert!(no_title.validate().is_err());

        let mut zero_servings = sample_recipe();
        zero_servings.servings = 0;
        assert!(zero_servings.validate().is_err());

        let mut no_ingredients = sample_recipe();
        no_ingredients.ingredients.clear();
        assert!(no_ingredients.validate().is_err());

        let mut bad_amount = sample_recipe();
        bad_amount.ingredients[0].amount = 0.0;
        assert!(bad_amount.validate().is_err());

        let mut negative_fat = sample_recipe();
        negative_fat.macros_per_serving.fat = -1.0;
        assert!(negative_fat.validate().is_err());
    }

    #[test]
    fn test_generated_recipe_rejects_unknown_unit() {
        let json = serde_json::json!({
            "title": "Sopa",
            "description": "",
            "servings": 2,
            "difficulty": "facil",
            "prep_time_minutes": 20,
            "ingredients": [{"name": "Agua", "amount": 2, "unit": "cups", "note": null}],
            "instructions": ["Hervir"],
            "macros_per_serving": {"calories": 50, "protein": 1, "carbs": 5, "fat": 1}
        });
        assert!(serde_json::from_value::<GeneratedRecipe>(json).is_err());
    }

    #[test]
    fn test_validate_profile_update() {
        assert!(validate_profile_update(&ProfileUpdate::default()).is_err());

        let ok = ProfileUpdate {
            calorie_target: Some(1800),
            servings: Some(2),
            allergies: Some(vec!["gluten".to_string()]),
            ..ProfileUpdate::default()
        };
        assert!(validate_profile_update(&ok).is_ok());

        let zero_calories = ProfileUpdate {
            calorie_target: Some(0),
            ..ProfileUpdate::default()
        };
        assert!(validate_profile_update(&zero_calories).is_err());

        let too_many_servings = ProfileUpdate {
            servings: Some(40),
            ..ProfileUpdate::default()
        };
        assert!(validate_profile_update(&too_many_servings).is_err());

        let blank_allergy = ProfileUpdate {
            allergies: Some(vec![" ".to_string()]),
            ..ProfileUpdate::default()
        };
        assert!(validate_profile_update(&blank_allergy).is_err());
    }
}

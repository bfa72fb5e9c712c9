//! Weekly menu generation: slot planning, retries and ingredient dedup.
//!
//! Nothing here touches the database. The service layer runs
//! [`generate_week`] without holding the store lock and hands the result to
//! [`crate::db::Database::persist_generated_menu`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{PlannerError, SlotFailure};
use crate::generator::{GenerationError, RecipeGenerator, RecipePrompt};
use crate::models::{
    GeneratedIngredient, GeneratedRecipe, MealType, User, ingredient_display_name, ingredient_key,
};
use crate::prompts::slot_prompt;

pub const DAYS_PER_WEEK: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub date: NaiveDate,
    pub meal_type: MealType,
}

#[derive(Debug, Clone)]
pub struct PlannedRecipe {
    pub slot: Slot,
    pub recipe: GeneratedRecipe,
}

/// Retry policy for a single generation call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per slot, including the first one.
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }
}

/// Slots of the week grouped by day, days in order.
#[must_use]
pub fn week_slots(week_start: NaiveDate, meal_types: &[MealType]) -> Vec<Vec<Slot>> {
    (0..DAYS_PER_WEEK)
        .map(|offset| {
            let date = week_start + chrono::Duration::days(offset);
            meal_types
                .iter()
                .map(|&meal_type| Slot { date, meal_type })
                .collect()
        })
        .collect()
}

/// Run one prompt through the generator under `policy`.
///
/// Returns the recipe, or the last error together with the number of
/// attempts made.
pub async fn generate_with_retry(
    generator: &dyn RecipeGenerator,
    policy: &RetryPolicy,
    prompt: &RecipePrompt,
) -> Result<GeneratedRecipe, (GenerationError, usize)> {
    let mut attempts = 0usize;
    let result = (|| {
        attempts += 1;
        async move { generator.generate(prompt).await }
    })
    .retry(policy.backoff())
    .when(GenerationError::is_retryable)
    .notify(|err: &GenerationError, dur: Duration| {
        warn!(
            error = %err,
            delay_ms = dur.as_millis() as u64,
            "recipe generation failed, retrying"
        );
    })
    .await;
    result.map_err(|err| (err, attempts))
}

/// Generate one recipe per slot for the whole week.
///
/// Days are processed in order; the meal types of one day run concurrently.
/// Once a day finishes with failed slots no further days are started, and
/// the error lists every failed slot.
pub async fn generate_week(
    generator: &dyn RecipeGenerator,
    policy: &RetryPolicy,
    user: &User,
    week_start: NaiveDate,
    meal_types: &[MealType],
) -> Result<Vec<PlannedRecipe>, PlannerError> {
    let days = week_slots(week_start, meal_types);
    let total = days.iter().map(Vec::len).sum::<usize>();
    let mut planned: Vec<PlannedRecipe> = Vec::with_capacity(total);
    let mut failures: Vec<SlotFailure> = Vec::new();

    for day in days {
        let earlier: Vec<String> = planned.iter().map(|p| p.recipe.title.clone()).collect();
        let prompts: Vec<(Slot, RecipePrompt)> = day
            .into_iter()
            .map(|slot| (slot, slot_prompt(user, slot.date, slot.meal_type, &earlier)))
            .collect();

        let results = join_all(
            prompts
                .iter()
                .map(|(_, prompt)| generate_with_retry(generator, policy, prompt)),
        )
        .await;

        for ((slot, _), result) in prompts.into_iter().zip(results) {
            match result {
                Ok(recipe) => {
                    debug!(date = %slot.date, meal = %slot.meal_type, title = %recipe.title, "slot generated");
                    planned.push(PlannedRecipe { slot, recipe });
                }
                Err((err, attempts)) => {
                    warn!(date = %slot.date, meal = %slot.meal_type, attempts, error = %err, "slot failed");
                    failures.push(SlotFailure {
                        date: slot.date,
                        meal_type: slot.meal_type,
                        attempts,
                        error: err.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(PlannerError::Upstream {
                message: format!(
                    "recipe generation failed for {} slot(s); {} of {total} completed before aborting",
                    failures.len(),
                    planned.len()
                ),
                failures,
            });
        }
    }

    info!(user = %user.id, %week_start, recipes = planned.len(), "week generated");
    Ok(planned)
}

/// Merge repeated ingredients inside one recipe.
///
/// Entries with the same case-insensitive name and unit have their amounts
/// summed. A repeat with a different unit is dropped in favour of the first
/// entry.
#[must_use]
pub fn collapse_ingredients(ingredients: &[GeneratedIngredient]) -> Vec<GeneratedIngredient> {
    let mut merged: Vec<GeneratedIngredient> = Vec::with_capacity(ingredients.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for ingredient in ingredients {
        let key = ingredient_key(&ingredient.name);
        if let Some(&i) = index.get(&key) {
            let existing = &mut merged[i];
            if existing.unit == ingredient.unit {
                existing.amount += ingredient.amount;
            } else {
                warn!(
                    name = %ingredient.name,
                    kept = existing.unit.as_str(),
                    dropped = ingredient.unit.as_str(),
                    "ingredient repeated with a different unit"
                );
            }
            continue;
        }
        index.insert(key, merged.len());
        merged.push(GeneratedIngredient {
            name: ingredient_display_name(&ingredient.name),
            ..ingredient.clone()
        });
    }
    merged
}

/// Distinct ingredient names across a batch, compared case-insensitively.
/// The first spelling seen wins.
#[must_use]
pub fn distinct_ingredient_names<'a, I>(recipes: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a GeneratedRecipe>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut names = Vec::new();
    for recipe in recipes {
        for ingredient in &recipe.ingredients {
            let key = ingredient_key(&ingredient.name);
            if seen.insert(key) {
                names.push(ingredient_display_name(&ingredient.name));
            }
        }
    }
    names
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::generator::{GenerationError, RecipeGenerator, RecipePrompt};
    use crate::models::{Difficulty, GeneratedIngredient, GeneratedRecipe, Macros, Unit};

    pub fn recipe(title: &str, ingredients: &[(&str, f64, Unit)]) -> GeneratedRecipe {
        GeneratedRecipe {
            title: title.to_string(),
            description: format!("Receta de {title}"),
            servings: 2,
            difficulty: Difficulty::Facil,
            prep_time_minutes: 20,
            ingredients: ingredients
                .iter()
                .map(|(name, amount, unit)| GeneratedIngredient {
                    name: (*name).to_string(),
                    amount: *amount,
                    unit: *unit,
                    note: None,
                })
                .collect(),
            instructions: vec!["Mezclar".to_string(), "Servir".to_string()],
            macros_per_serving: Macros {
                calories: 300.0,
                protein: 20.0,
                carbs: 30.0,
                fat: 10.0,
            },
        }
    }

    /// Generator that hands out recipes from a script, falling back to a
    /// numbered default once the script runs dry.
    pub struct ScriptedGenerator {
        script: Mutex<VecDeque<Result<GeneratedRecipe, GenerationError>>>,
        calls: Mutex<Vec<RecipePrompt>>,
    }

    impl ScriptedGenerator {
        pub fn new(script: Vec<Result<GeneratedRecipe, GenerationError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn always_ok() -> Self {
            Self::new(Vec::new())
        }

        pub fn calls(&self) -> Vec<RecipePrompt> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecipeGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            prompt: &RecipePrompt,
        ) -> Result<GeneratedRecipe, GenerationError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(prompt.clone());
                calls.len()
            };
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                Ok(recipe(
                    &format!("Plato {n}"),
                    &[("Tomate", 100.0, Unit::G), ("Aceite de oliva", 10.0, Unit::Ml)],
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{ScriptedGenerator, recipe};
    use super::*;
    use crate::models::Unit;

    fn sample_user() -> User {
        User {
            id: "user-1".to_string(),
            email: "ana@example.com".to_string(),
            name: None,
            role: "user".to_string(),
            diet: "mediterranea".to_string(),
            calorie_target: 2000,
            allergies: Vec::new(),
            servings: 2,
            preferences: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    #[test]
    fn test_week_slots_shape() {
        let days = week_slots(monday(), &[MealType::Desayuno, MealType::Cena]);
        assert_eq!(days.len(), 7);
        assert!(days.iter().all(|d| d.len() == 2));
        assert_eq!(days[0][0].date, monday());
        assert_eq!(days[6][1].date, NaiveDate::from_ymd_opt(2024, 6, 16).unwrap());
        assert_eq!(days[6][1].meal_type, MealType::Cena);
    }

    #[tokio::test]
    async fn test_generate_week_one_recipe_per_slot() {
        let generator = ScriptedGenerator::always_ok();
        let planned = generate_week(
            &generator,
            &fast_retry(),
            &sample_user(),
            monday(),
            &[MealType::Desayuno, MealType::Cena],
        )
        .await
        .unwrap();

        assert_eq!(planned.len(), 14);
        assert_eq!(generator.calls().len(), 14);
        assert_eq!(planned[0].slot.date, monday());
        assert_eq!(planned[13].slot.meal_type, MealType::Cena);
    }

    #[tokio::test]
    async fn test_generate_week_mentions_earlier_titles() {
        let generator = ScriptedGenerator::always_ok();
        generate_week(
            &generator,
            &fast_retry(),
            &sample_user(),
            monday(),
            &[MealType::Almuerzo],
        )
        .await
        .unwrap();

        let calls = generator.calls();
        assert!(!calls[0].user.contains("Evita repetir"));
        assert!(calls[1].user.contains("Plato 1"));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Timeout),
            Ok(recipe("Gazpacho", &[("Tomate", 500.0, Unit::G)])),
        ]);
        let planned = generate_week(
            &generator,
            &fast_retry(),
            &sample_user(),
            monday(),
            &[MealType::Cena],
        )
        .await
        .unwrap();

        assert_eq!(planned.len(), 7);
        assert_eq!(planned[0].recipe.title, "Gazpacho");
        assert_eq!(generator.calls().len(), 8);
    }

    #[tokio::test]
    async fn test_permanent_failure_reports_slot() {
        let generator = ScriptedGenerator::new(vec![Err(GenerationError::InvalidApiKey)]);
        let err = generate_week(
            &generator,
            &fast_retry(),
            &sample_user(),
            monday(),
            &[MealType::Desayuno],
        )
        .await
        .unwrap_err();

        match err {
            PlannerError::Upstream { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].date, monday());
                assert_eq!(failures[0].meal_type, MealType::Desayuno);
                assert_eq!(failures[0].attempts, 1);
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
        // Aborted after the first day
        assert_eq!(generator.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::RateLimited),
            Err(GenerationError::RateLimited),
            Err(GenerationError::RateLimited),
        ]);
        let err = generate_week(
            &generator,
            &fast_retry(),
            &sample_user(),
            monday(),
            &[MealType::Cena],
        )
        .await
        .unwrap_err();

        let PlannerError::Upstream { failures, .. } = err else {
            panic!("expected upstream error");
        };
        assert_eq!(failures[0].attempts, 3);
        assert_eq!(generator.calls().len(), 3);
    }

    #[test]
    fn test_distinct_names_case_insensitive() {
        let a = recipe("A", &[("Tomate", 1.0, Unit::Unidad), ("Sal", 2.0, Unit::G)]);
        let b = recipe("B", &[("tomate", 200.0, Unit::G), ("  AJO ", 1.0, Unit::Unidad)]);
        let names = distinct_ingredient_names([&a, &b]);
        assert_eq!(names, vec!["Tomate", "Sal", "AJO"]);
    }

    #[test]
    fn test_collapse_ingredients() {
        let r = recipe(
            "Ensalada",
            &[
                ("Tomate", 100.0, Unit::G),
                ("tomate", 50.0, Unit::G),
                ("Tomate", 1.0, Unit::Unidad),
                ("Lechuga", 1.0, Unit::Unidad),
            ],
        );
        let collapsed = collapse_ingredients(&r.ingredients);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].name, "Tomate");
        assert!((collapsed[0].amount - 150.0).abs() < f64::EPSILON);
        assert_eq!(collapsed[0].unit, Unit::G);
    }
}

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{PlannerError, PlannerResult};
use crate::generator::RecipeGenerator;
use crate::models::{
    MealSelection, Menu, MenuDetail, NewUser, ProfileUpdate, Recipe, RecipeDetail, ShoppingList,
    ShoppingListItem, User, validate_profile_update, week_start,
};
use crate::planner::{RetryPolicy, generate_week, generate_with_retry};
use crate::prompts::regeneration_prompt;

/// Application service shared by the HTTP server and the CLI.
///
/// The database lock is only taken for short synchronous sections; every
/// call to the recipe generator runs with the lock released.
#[derive(Clone)]
pub struct PlannerService {
    db: Arc<Mutex<Database>>,
    generator: Arc<dyn RecipeGenerator>,
    retry: RetryPolicy,
}

impl PlannerService {
    pub fn new(db: Database, generator: Arc<dyn RecipeGenerator>, retry: RetryPolicy) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            generator,
            retry,
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_user(&self, user_id: &str) -> PlannerResult<User> {
        self.db()
            .get_user(user_id)?
            .ok_or_else(|| PlannerError::not_found("User profile not found"))
    }

    // --- Users ---

    pub fn register_user(&self, user: &NewUser) -> PlannerResult<User> {
        let db = self.db();
        if db.get_user(&user.id)?.is_some() {
            return Err(PlannerError::Conflict(format!(
                "User {} is already registered",
                user.id
            )));
        }
        let created = db.insert_user(user)?;
        info!(user = %created.id, "user registered");
        Ok(created)
    }

    pub fn get_profile(&self, user_id: &str) -> PlannerResult<User> {
        self.require_user(user_id)
    }

    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> PlannerResult<User> {
        validate_profile_update(update).map_err(|e| PlannerError::validation(format!("{e:#}")))?;
        self.db()
            .update_user(user_id, update)?
            .ok_or_else(|| PlannerError::not_found("User profile not found"))
    }

    /// Every registered user. Only callers with the admin role may list them.
    pub fn list_users(&self, requester_id: &str) -> PlannerResult<Vec<User>> {
        let db = self.db();
        let is_admin = db.get_user(requester_id)?.is_some_and(|u| u.is_admin());
        if !is_admin {
            return Err(PlannerError::Forbidden(
                "Listing users requires the admin role".to_string(),
            ));
        }
        Ok(db.list_users()?)
    }

    /// Every registered user, without a role check. For local administration.
    pub fn all_users(&self) -> PlannerResult<Vec<User>> {
        Ok(self.db().list_users()?)
    }

    pub fn set_role(&self, user_id: &str, role: &str) -> PlannerResult<User> {
        if !self.db().set_user_role(user_id, role)? {
            return Err(PlannerError::not_found("User profile not found"));
        }
        self.require_user(user_id)
    }

    // --- Menus ---

    pub fn list_menus(&self, user_id: &str) -> PlannerResult<Vec<Menu>> {
        Ok(self.db().list_menus(user_id)?)
    }

    /// Menu of the week containing `today`.
    pub fn current_menu(&self, user_id: &str, today: NaiveDate) -> PlannerResult<MenuDetail> {
        let db = self.db();
        let Some(menu) = db.get_menu_for_week(user_id, week_start(today))? else {
            return Err(PlannerError::not_found("No menu for the current week"));
        };
        db.get_menu_detail(user_id, menu.id)?
            .ok_or_else(|| PlannerError::not_found("No menu for the current week"))
    }

    pub fn get_menu(&self, user_id: &str, menu_id: i64) -> PlannerResult<MenuDetail> {
        self.db()
            .get_menu_detail(user_id, menu_id)?
            .ok_or_else(|| PlannerError::not_found(format!("Menu {menu_id} not found")))
    }

    /// Generate and store the menu for the week containing `today`.
    pub async fn generate_menu(
        &self,
        user_id: &str,
        selection: MealSelection,
        today: NaiveDate,
    ) -> PlannerResult<MenuDetail> {
        let week = week_start(today);
        let meal_types = selection.active();

        let user = {
            let db = self.db();
            let user = db
                .get_user(user_id)?
                .ok_or_else(|| PlannerError::not_found("User profile not found"))?;
            if db.get_menu_for_week(user_id, week)?.is_some() {
                return Err(week_taken(week));
            }
            user
        };

        info!(user = user_id, %week, meals = ?meal_types, "generating menu");
        let planned = generate_week(
            self.generator.as_ref(),
            &self.retry,
            &user,
            week,
            &meal_types,
        )
        .await?;

        let db = self.db();
        let Some(persisted) = db.persist_generated_menu(user_id, week, &planned)? else {
            warn!(user = user_id, %week, "menu created concurrently, discarding generated week");
            return Err(week_taken(week));
        };
        db.get_menu_detail(user_id, persisted.menu_id)?
            .ok_or_else(|| PlannerError::not_found(format!("Menu {} not found", persisted.menu_id)))
    }

    // --- Shopping lists ---

    pub fn list_shopping_lists(&self, user_id: &str) -> PlannerResult<Vec<ShoppingList>> {
        Ok(self.db().list_shopping_lists(user_id)?)
    }

    pub fn get_shopping_list(&self, user_id: &str, list_id: i64) -> PlannerResult<ShoppingList> {
        self.db()
            .get_shopping_list(user_id, list_id)?
            .ok_or_else(|| PlannerError::not_found(format!("Shopping list {list_id} not found")))
    }

    pub fn toggle_acquired(
        &self,
        user_id: &str,
        list_id: i64,
        ingredient_id: i64,
    ) -> PlannerResult<ShoppingListItem> {
        self.db()
            .toggle_acquired(user_id, list_id, ingredient_id)?
            .ok_or_else(|| {
                PlannerError::not_found(format!(
                    "Ingredient {ingredient_id} not found in shopping list {list_id}"
                ))
            })
    }

    // --- Recipes ---

    pub fn favorite_recipes(&self, user_id: &str) -> PlannerResult<Vec<Recipe>> {
        Ok(self.db().favorite_recipes(user_id)?)
    }

    pub fn toggle_favorite(&self, user_id: &str, recipe_id: i64) -> PlannerResult<Recipe> {
        self.db()
            .toggle_favorite(user_id, recipe_id)?
            .ok_or_else(|| PlannerError::not_found(format!("Recipe {recipe_id} not found")))
    }

    pub fn get_recipe(&self, user_id: &str, recipe_id: i64) -> PlannerResult<RecipeDetail> {
        self.db()
            .get_recipe_detail(user_id, recipe_id)?
            .ok_or_else(|| PlannerError::not_found(format!("Recipe {recipe_id} not found")))
    }

    /// Ask the generator for a replacement of one recipe following the
    /// caller's modification request. The shopping list is left as is.
    pub async fn regenerate_recipe(
        &self,
        user_id: &str,
        recipe_id: i64,
        modification: &str,
    ) -> PlannerResult<RecipeDetail> {
        if modification.trim().is_empty() {
            return Err(PlannerError::validation("modificacion must not be empty"));
        }

        let (user, current) = {
            let db = self.db();
            let user = db
                .get_user(user_id)?
                .ok_or_else(|| PlannerError::not_found("User profile not found"))?;
            let current = db
                .get_recipe_detail(user_id, recipe_id)?
                .ok_or_else(|| PlannerError::not_found(format!("Recipe {recipe_id} not found")))?;
            (user, current)
        };

        let prompt = regeneration_prompt(&user, &current.recipe, &current.ingredients, modification);
        let replacement = generate_with_retry(self.generator.as_ref(), &self.retry, &prompt)
            .await
            .map_err(|(err, attempts)| PlannerError::Upstream {
                message: format!("recipe regeneration failed after {attempts} attempt(s): {err}"),
                failures: Vec::new(),
            })?;

        let db = self.db();
        db.replace_recipe(recipe_id, &replacement)?;
        info!(user = user_id, recipe_id, title = %replacement.title, "recipe regenerated");
        db.get_recipe_detail(user_id, recipe_id)?
            .ok_or_else(|| PlannerError::not_found(format!("Recipe {recipe_id} not found")))
    }
}

fn week_taken(week: NaiveDate) -> PlannerError {
    PlannerError::Conflict(format!("A menu already exists for the week starting {week}"))
}

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::models::{
    DEFAULT_CALORIE_TARGET, DEFAULT_DIET, DEFAULT_SERVINGS, GeneratedIngredient, GeneratedRecipe,
    MealType, Menu, MenuDetail, NewUser, ProfileUpdate, ROLE_USER, Recipe, RecipeDetail,
    RecipeIngredient, ScheduledRecipe, ShoppingList, ShoppingListItem, User, ingredient_key,
};
use crate::planner::{PlannedRecipe, collapse_ingredients, distinct_ingredient_names};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const USER_COLUMNS: &str = "id, email, name, role, diet, calorie_target, allergies, servings, \
     preferences, created_at, updated_at";

const RECIPE_COLUMNS: &str = "r.id, r.user_id, r.title, r.description, r.servings, r.difficulty, \
     r.prep_time_minutes, r.instructions, r.calories, r.protein, r.carbs, r.fat, r.favorite, \
     r.created_at, r.updated_at";

/// Ids of a freshly persisted menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedMenu {
    pub menu_id: i64,
    pub shopping_list_id: i64,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    fn configure(&self) -> Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL,
                    name TEXT,
                    role TEXT NOT NULL DEFAULT 'user',
                    diet TEXT NOT NULL,
                    calorie_target INTEGER NOT NULL,
                    allergies TEXT NOT NULL DEFAULT '[]',
                    servings INTEGER NOT NULL,
                    preferences TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS menus (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    week_start TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, week_start)
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    servings INTEGER NOT NULL,
                    difficulty TEXT NOT NULL,
                    prep_time_minutes INTEGER NOT NULL,
                    instructions TEXT NOT NULL,
                    calories REAL NOT NULL,
                    protein REAL NOT NULL,
                    carbs REAL NOT NULL,
                    fat REAL NOT NULL,
                    favorite INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    name_key TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id),
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL,
                    note TEXT,
                    PRIMARY KEY (recipe_id, ingredient_id)
                );

                CREATE TABLE IF NOT EXISTS menu_recipe_schedule (
                    menu_id INTEGER NOT NULL REFERENCES menus(id) ON DELETE CASCADE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id),
                    date TEXT NOT NULL,
                    meal_type TEXT NOT NULL,
                    PRIMARY KEY (menu_id, date, meal_type)
                );

                CREATE TABLE IF NOT EXISTS shopping_lists (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    menu_id INTEGER NOT NULL UNIQUE REFERENCES menus(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS shopping_list_ingredients (
                    list_id INTEGER NOT NULL REFERENCES shopping_lists(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id),
                    acquired INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (list_id, ingredient_id)
                );

                CREATE INDEX IF NOT EXISTS idx_menus_user ON menus(user_id);
                CREATE INDEX IF NOT EXISTS idx_recipes_user ON recipes(user_id);
                CREATE INDEX IF NOT EXISTS idx_schedule_recipe ON menu_recipe_schedule(recipe_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: row.get(3)?,
            diet: row.get(4)?,
            calorie_target: row.get(5)?,
            allergies: json_column(row, 6)?,
            servings: row.get(7)?,
            preferences: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    /// Maps `RECIPE_COLUMNS` starting at `offset`.
    fn recipe_at(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(offset)?,
            user_id: row.get(offset + 1)?,
            title: row.get(offset + 2)?,
            description: row.get(offset + 3)?,
            servings: row.get(offset + 4)?,
            difficulty: row.get(offset + 5)?,
            prep_time_minutes: row.get(offset + 6)?,
            instructions: json_column(row, offset + 7)?,
            calories: row.get(offset + 8)?,
            protein: row.get(offset + 9)?,
            carbs: row.get(offset + 10)?,
            fat: row.get(offset + 11)?,
            favorite: row.get(offset + 12)?,
            created_at: row.get(offset + 13)?,
            updated_at: row.get(offset + 14)?,
        })
    }

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Self::recipe_at(row, 0)
    }

    fn menu_from_row(row: &rusqlite::Row) -> rusqlite::Result<Menu> {
        Ok(Menu {
            id: row.get(0)?,
            user_id: row.get(1)?,
            week_start: date_column(row, 2)?,
            created_at: row.get(3)?,
        })
    }

    // --- Users ---

    pub fn insert_user(&self, user: &NewUser) -> Result<User> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (id, email, name, role, diet, calorie_target, allergies, servings, preferences, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '[]', ?7, '', ?8, ?8)",
            params![
                user.id,
                user.email,
                user.name,
                ROLE_USER,
                DEFAULT_DIET,
                DEFAULT_CALORIE_TARGET,
                DEFAULT_SERVINGS,
                now,
            ],
        )?;
        self.get_user(&user.id)?
            .context("User not found after insert")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id"
        ))?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Apply a partial profile update. Returns `None` for an unknown user.
    pub fn update_user(&self, id: &str, update: &ProfileUpdate) -> Result<Option<User>> {
        let Some(mut user) = self.get_user(id)? else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            let name = name.trim();
            user.name = (!name.is_empty()).then(|| name.to_string());
        }
        if let Some(diet) = &update.diet {
            user.diet = diet.trim().to_string();
        }
        if let Some(calories) = update.calorie_target {
            user.calorie_target = calories;
        }
        if let Some(allergies) = &update.allergies {
            user.allergies = allergies.iter().map(|a| a.trim().to_string()).collect();
        }
        if let Some(servings) = update.servings {
            user.servings = servings;
        }
        if let Some(preferences) = &update.preferences {
            user.preferences = preferences.trim().to_string();
        }

        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE users SET name = ?1, diet = ?2, calorie_target = ?3, allergies = ?4,
                    servings = ?5, preferences = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                user.name,
                user.diet,
                user.calorie_target,
                serde_json::to_string(&user.allergies)?,
                user.servings,
                user.preferences,
                now,
                id,
            ],
        )?;
        self.get_user(id)
    }

    pub fn set_user_role(&self, id: &str, role: &str) -> Result<bool> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
            params![role, now, id],
        )?;
        Ok(rows > 0)
    }

    // --- Menus ---

    pub fn get_menu_for_week(&self, user_id: &str, week_start: NaiveDate) -> Result<Option<Menu>> {
        let menu = self
            .conn
            .query_row(
                "SELECT id, user_id, week_start, created_at FROM menus
                 WHERE user_id = ?1 AND week_start = ?2",
                params![user_id, week_start.format("%Y-%m-%d").to_string()],
                Self::menu_from_row,
            )
            .optional()?;
        Ok(menu)
    }

    /// A menu by id, only if it belongs to `user_id`.
    pub fn get_menu(&self, user_id: &str, menu_id: i64) -> Result<Option<Menu>> {
        let menu = self
            .conn
            .query_row(
                "SELECT id, user_id, week_start, created_at FROM menus
                 WHERE id = ?1 AND user_id = ?2",
                params![menu_id, user_id],
                Self::menu_from_row,
            )
            .optional()?;
        Ok(menu)
    }

    /// All menus of a user, most recent week first.
    pub fn list_menus(&self, user_id: &str) -> Result<Vec<Menu>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, week_start, created_at FROM menus
             WHERE user_id = ?1
             ORDER BY week_start DESC",
        )?;
        let menus = stmt
            .query_map(params![user_id], Self::menu_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(menus)
    }

    pub fn get_menu_detail(&self, user_id: &str, menu_id: i64) -> Result<Option<MenuDetail>> {
        let Some(menu) = self.get_menu(user_id, menu_id)? else {
            return Ok(None);
        };
        let shopping_list_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM shopping_lists WHERE menu_id = ?1",
                params![menu_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT s.date, s.meal_type, {RECIPE_COLUMNS}
             FROM menu_recipe_schedule s
             JOIN recipes r ON r.id = s.recipe_id
             WHERE s.menu_id = ?1
             ORDER BY s.date,
                      CASE s.meal_type WHEN 'desayuno' THEN 0 WHEN 'almuerzo' THEN 1 ELSE 2 END"
        ))?;
        let schedule = stmt
            .query_map(params![menu_id], |row| {
                Ok(ScheduledRecipe {
                    date: date_column(row, 0)?,
                    meal_type: meal_type_column(row, 1)?,
                    recipe: Self::recipe_at(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(MenuDetail {
            menu,
            shopping_list_id,
            schedule,
        }))
    }

    /// Write a generated week in one transaction: menu, shopping list,
    /// ingredients, recipes, links and schedule rows. The shopping list is
    /// seeded after the commit.
    ///
    /// Returns `None` if the user already has a menu for `week_start`.
    pub fn persist_generated_menu(
        &self,
        user_id: &str,
        week_start: NaiveDate,
        planned: &[PlannedRecipe],
    ) -> Result<Option<PersistedMenu>> {
        let now = Local::now().to_rfc3339();
        let week = week_start.format("%Y-%m-%d").to_string();
        let tx = self.conn.unchecked_transaction()?;

        let taken: Option<i64> = tx
            .query_row(
                "SELECT id FROM menus WHERE user_id = ?1 AND week_start = ?2",
                params![user_id, week],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Ok(None);
        }

        match tx.execute(
            "INSERT INTO menus (user_id, week_start, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, week, now],
        ) {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let menu_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO shopping_lists (menu_id) VALUES (?1)",
            params![menu_id],
        )?;
        let shopping_list_id = tx.last_insert_rowid();

        let names = distinct_ingredient_names(planned.iter().map(|p| &p.recipe));
        let ingredient_ids = resolve_ingredients(&tx, &names)?;

        for entry in planned {
            let recipe_id = insert_recipe(&tx, user_id, &entry.recipe, &now)?;
            insert_recipe_links(&tx, recipe_id, &entry.recipe.ingredients, &ingredient_ids)?;
            tx.execute(
                "INSERT INTO menu_recipe_schedule (menu_id, recipe_id, date, meal_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    menu_id,
                    recipe_id,
                    entry.slot.date.format("%Y-%m-%d").to_string(),
                    entry.slot.meal_type.as_str(),
                ],
            )?;
        }

        tx.commit()?;
        info!(user = user_id, menu_id, recipes = planned.len(), ingredients = ingredient_ids.len(), "menu persisted");

        let mut ids: Vec<i64> = ingredient_ids.into_values().collect();
        ids.sort_unstable();
        self.seed_shopping_list(shopping_list_id, &ids)?;

        Ok(Some(PersistedMenu {
            menu_id,
            shopping_list_id,
        }))
    }

    /// Add `(list, ingredient, acquired = false)` rows, skipping pairs that
    /// already exist. Returns the number of rows added.
    pub fn seed_shopping_list(&self, list_id: i64, ingredient_ids: &[i64]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO shopping_list_ingredients (list_id, ingredient_id, acquired)
                 VALUES (?1, ?2, 0)",
            )?;
            for id in ingredient_ids {
                added += stmt.execute(params![list_id, id])?;
            }
        }
        tx.commit()?;
        debug!(list_id, added, "shopping list seeded");
        Ok(added)
    }

    // --- Recipes ---

    /// A recipe by id, only if it belongs to `user_id`.
    pub fn get_recipe(&self, user_id: &str, recipe_id: i64) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.id = ?1 AND r.user_id = ?2"),
                params![recipe_id, user_id],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    /// Ingredient lines of a recipe in insertion order.
    pub fn get_recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.ingredient_id, i.name, ri.quantity, ri.unit, ri.note
             FROM recipe_ingredients ri
             JOIN ingredients i ON i.id = ri.ingredient_id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.rowid",
        )?;
        let ingredients = stmt
            .query_map(params![recipe_id], |row| {
                Ok(RecipeIngredient {
                    ingredient_id: row.get(0)?,
                    name: row.get(1)?,
                    quantity: row.get(2)?,
                    unit: row.get(3)?,
                    note: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn get_recipe_detail(&self, user_id: &str, recipe_id: i64) -> Result<Option<RecipeDetail>> {
        let Some(recipe) = self.get_recipe(user_id, recipe_id)? else {
            return Ok(None);
        };
        let ingredients = self.get_recipe_ingredients(recipe_id)?;
        Ok(Some(RecipeDetail {
            recipe,
            ingredients,
        }))
    }

    pub fn favorite_recipes(&self, user_id: &str) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r
             WHERE r.user_id = ?1 AND r.favorite = 1
             ORDER BY r.title COLLATE NOCASE, r.id"
        ))?;
        let recipes = stmt
            .query_map(params![user_id], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    /// Flip `favorite` on a recipe owned by `user_id`.
    pub fn toggle_favorite(&self, user_id: &str, recipe_id: i64) -> Result<Option<Recipe>> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE recipes SET favorite = 1 - favorite, updated_at = ?1
             WHERE id = ?2 AND user_id = ?3",
            params![now, recipe_id, user_id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get_recipe(user_id, recipe_id)
    }

    /// Replace a recipe's fields and every ingredient link in one transaction.
    pub fn replace_recipe(&self, recipe_id: i64, recipe: &GeneratedRecipe) -> Result<()> {
        let now = Local::now().to_rfc3339();
        let totals = recipe.total_macros();
        let tx = self.conn.unchecked_transaction()?;

        let rows = tx.execute(
            "UPDATE recipes SET title = ?1, description = ?2, servings = ?3, difficulty = ?4,
                    prep_time_minutes = ?5, instructions = ?6, calories = ?7, protein = ?8,
                    carbs = ?9, fat = ?10, updated_at = ?11
             WHERE id = ?12",
            params![
                recipe.title.trim(),
                recipe.description,
                recipe.servings,
                recipe.difficulty.as_str(),
                recipe.prep_time_minutes,
                serde_json::to_string(&recipe.instructions)?,
                totals.calories,
                totals.protein,
                totals.carbs,
                totals.fat,
                now,
                recipe_id,
            ],
        )?;
        anyhow::ensure!(rows == 1, "Recipe {recipe_id} not found");

        tx.execute(
            "DELETE FROM recipe_ingredients WHERE recipe_id = ?1",
            params![recipe_id],
        )?;
        let names = distinct_ingredient_names([recipe]);
        let ingredient_ids = resolve_ingredients(&tx, &names)?;
        insert_recipe_links(&tx, recipe_id, &recipe.ingredients, &ingredient_ids)?;

        tx.commit()?;
        Ok(())
    }

    // --- Shopping lists ---

    fn shopping_list_items(&self, list_id: i64) -> Result<Vec<ShoppingListItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT sli.ingredient_id, i.name, sli.acquired
             FROM shopping_list_ingredients sli
             JOIN ingredients i ON i.id = sli.ingredient_id
             WHERE sli.list_id = ?1
             ORDER BY i.name_key",
        )?;
        let items = stmt
            .query_map(params![list_id], |row| {
                Ok(ShoppingListItem {
                    ingredient_id: row.get(0)?,
                    name: row.get(1)?,
                    acquired: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn build_shopping_list(&self, id: i64, menu_id: i64, week_start: NaiveDate) -> Result<ShoppingList> {
        let items = self.shopping_list_items(id)?;
        let acquired_count = items.iter().filter(|i| i.acquired).count();
        Ok(ShoppingList {
            id,
            menu_id,
            week_start,
            pending_count: items.len() - acquired_count,
            acquired_count,
            items,
        })
    }

    /// Every shopping list of a user's menus, most recent week first.
    pub fn list_shopping_lists(&self, user_id: &str) -> Result<Vec<ShoppingList>> {
        let heads: Vec<(i64, i64, NaiveDate)> = {
            let mut stmt = self.conn.prepare(
                "SELECT sl.id, sl.menu_id, m.week_start
                 FROM shopping_lists sl
                 JOIN menus m ON m.id = sl.menu_id
                 WHERE m.user_id = ?1
                 ORDER BY m.week_start DESC",
            )?;
            stmt.query_map(params![user_id], |row| {
                Ok((row.get(0)?, row.get(1)?, date_column(row, 2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };
        heads
            .into_iter()
            .map(|(id, menu_id, week_start)| self.build_shopping_list(id, menu_id, week_start))
            .collect()
    }

    pub fn get_shopping_list(&self, user_id: &str, list_id: i64) -> Result<Option<ShoppingList>> {
        let head: Option<(i64, NaiveDate)> = self
            .conn
            .query_row(
                "SELECT sl.menu_id, m.week_start
                 FROM shopping_lists sl
                 JOIN menus m ON m.id = sl.menu_id
                 WHERE sl.id = ?1 AND m.user_id = ?2",
                params![list_id, user_id],
                |row| Ok((row.get(0)?, date_column(row, 1)?)),
            )
            .optional()?;
        head.map(|(menu_id, week_start)| self.build_shopping_list(list_id, menu_id, week_start))
            .transpose()
    }

    /// Flip `acquired` on one row of a list belonging to one of `user_id`'s
    /// menus. Returns `None` when the pair does not exist for that user.
    pub fn toggle_acquired(
        &self,
        user_id: &str,
        list_id: i64,
        ingredient_id: i64,
    ) -> Result<Option<ShoppingListItem>> {
        let rows = self.conn.execute(
            "UPDATE shopping_list_ingredients SET acquired = 1 - acquired
             WHERE list_id = ?1 AND ingredient_id = ?2
               AND list_id IN (
                   SELECT sl.id FROM shopping_lists sl
                   JOIN menus m ON m.id = sl.menu_id
                   WHERE m.user_id = ?3
               )",
            params![list_id, ingredient_id, user_id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        let item = self.conn.query_row(
            "SELECT sli.ingredient_id, i.name, sli.acquired
             FROM shopping_list_ingredients sli
             JOIN ingredients i ON i.id = sli.ingredient_id
             WHERE sli.list_id = ?1 AND sli.ingredient_id = ?2",
            params![list_id, ingredient_id],
            |row| {
                Ok(ShoppingListItem {
                    ingredient_id: row.get(0)?,
                    name: row.get(1)?,
                    acquired: row.get(2)?,
                })
            },
        )?;
        Ok(Some(item))
    }

    #[cfg(test)]
    pub(crate) fn count(&self, table: &str) -> i64 {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }
}

// --- Transaction helpers ---

/// Ids for `names` keyed by [`ingredient_key`], inserting names not seen
/// before.
fn resolve_ingredients(conn: &Connection, names: &[String]) -> Result<HashMap<String, i64>> {
    let mut ids = HashMap::with_capacity(names.len());
    let mut select = conn.prepare("SELECT id FROM ingredients WHERE name_key = ?1")?;
    let mut insert =
        conn.prepare("INSERT OR IGNORE INTO ingredients (name, name_key) VALUES (?1, ?2)")?;
    let mut created = 0usize;
    for name in names {
        let key = ingredient_key(name);
        if ids.contains_key(&key) {
            continue;
        }
        let existing: Option<i64> = select.query_row(params![key], |row| row.get(0)).optional()?;
        let id = if let Some(id) = existing {
            id
        } else {
            created += insert.execute(params![name, key])?;
            select.query_row(params![key], |row| row.get(0))?
        };
        ids.insert(key, id);
    }
    debug!(distinct = ids.len(), created, "ingredients resolved");
    Ok(ids)
}

fn insert_recipe(
    conn: &Connection,
    user_id: &str,
    recipe: &GeneratedRecipe,
    now: &str,
) -> Result<i64> {
    let totals = recipe.total_macros();
    conn.execute(
        "INSERT INTO recipes (user_id, title, description, servings, difficulty, prep_time_minutes,
                              instructions, calories, protein, carbs, fat, favorite, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?12)",
        params![
            user_id,
            recipe.title.trim(),
            recipe.description,
            recipe.servings,
            recipe.difficulty.as_str(),
            recipe.prep_time_minutes,
            serde_json::to_string(&recipe.instructions)?,
            totals.calories,
            totals.protein,
            totals.carbs,
            totals.fat,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_recipe_links(
    conn: &Connection,
    recipe_id: i64,
    ingredients: &[GeneratedIngredient],
    ingredient_ids: &HashMap<String, i64>,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, quantity, unit, note)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for ingredient in collapse_ingredients(ingredients) {
        let key = ingredient_key(&ingredient.name);
        let Some(&ingredient_id) = ingredient_ids.get(&key) else {
            warn!(recipe_id, name = %ingredient.name, "ingredient was not resolved");
            anyhow::bail!("Ingredient '{}' was not resolved", ingredient.name);
        };
        stmt.execute(params![
            recipe_id,
            ingredient_id,
            ingredient.amount,
            ingredient.unit.as_str(),
            ingredient.note,
        ])?;
    }
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn meal_type_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<MealType> {
    let text: String = row.get(idx)?;
    MealType::parse(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

use std::fmt::Write;

use chrono::NaiveDate;

use crate::generator::RecipePrompt;
use crate::models::{MealType, Recipe, RecipeIngredient, User, spanish_weekday};

const SYSTEM_PROMPT: &str = "Eres un nutricionista y chef que diseña recetas caseras. \
Responde siempre en español con una única receta en formato JSON que cumpla el esquema indicado. \
Los nombres de los campos van en inglés y el contenido en español. \
Usa únicamente unidades del sistema internacional (g, kg, ml, l) o \"unidad\" para piezas contables. \
Los valores nutricionales son por ración.";

fn describe_profile(out: &mut String, user: &User) {
    let _ = writeln!(out, "- Dieta: {}", user.diet);
    let _ = writeln!(out, "- Objetivo calórico diario: {} kcal", user.calorie_target);
    if user.allergies.is_empty() {
        let _ = writeln!(out, "- Alergias: ninguna");
    } else {
        let _ = writeln!(
            out,
            "- Alergias (excluir por completo): {}",
            user.allergies.join(", ")
        );
    }
    let _ = writeln!(out, "- Raciones: {}", user.servings);
    if !user.preferences.trim().is_empty() {
        let _ = writeln!(out, "- Preferencias adicionales: {}", user.preferences.trim());
    }
}

/// Prompt for one (day, meal type) slot of a weekly menu.
///
/// `earlier_titles` lists dishes already planned for the week so the model
/// can avoid repeating them.
#[must_use]
pub fn slot_prompt(
    user: &User,
    date: NaiveDate,
    meal_type: MealType,
    earlier_titles: &[String],
) -> RecipePrompt {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Genera una receta de {} para el {} {}.",
        meal_type,
        spanish_weekday(date),
        date.format("%d/%m/%Y")
    );
    out.push_str("Perfil del usuario:\n");
    describe_profile(&mut out, user);
    if !earlier_titles.is_empty() {
        let _ = writeln!(
            out,
            "Evita repetir estos platos ya planificados esta semana: {}.",
            earlier_titles.join("; ")
        );
    }
    RecipePrompt {
        system: SYSTEM_PROMPT.to_string(),
        user: out,
    }
}

/// Prompt asking for a full replacement of `recipe` following `modification`.
#[must_use]
pub fn regeneration_prompt(
    user: &User,
    recipe: &Recipe,
    ingredients: &[RecipeIngredient],
    modification: &str,
) -> RecipePrompt {
    let mut out = String::new();
    out.push_str("Modifica la siguiente receta según la petición del usuario y devuelve la receta completa.\n");
    let _ = writeln!(out, "Petición: {}", modification.trim());
    out.push_str("Receta original:\n");
    let _ = writeln!(out, "- Título: {}", recipe.title);
    let _ = writeln!(out, "- Descripción: {}", recipe.description);
    let _ = writeln!(out, "- Raciones: {}", recipe.servings);
    let _ = writeln!(out, "- Dificultad: {}", recipe.difficulty);
    let _ = writeln!(out, "- Tiempo de preparación: {} min", recipe.prep_time_minutes);
    out.push_str("- Ingredientes:\n");
    for ing in ingredients {
        let note = ing
            .note
            .as_ref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default();
        let _ = writeln!(out, "  * {} {} {}{note}", ing.quantity, ing.unit, ing.name);
    }
    out.push_str("- Pasos:\n");
    for (i, step) in recipe.instructions.iter().enumerate() {
        let _ = writeln!(out, "  {}. {step}", i + 1);
    }
    out.push_str("Perfil del usuario:\n");
    describe_profile(&mut out, user);
    RecipePrompt {
        system: SYSTEM_PROMPT.to_string(),
        user: out,
    }
}

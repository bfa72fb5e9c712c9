use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use menuplan_core::models::{ScheduledRecipe, spanish_weekday};

pub(crate) fn print_schedule_table(schedule: &[ScheduledRecipe]) {
    #[derive(Tabled)]
    struct ScheduleRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Day")]
        day: &'static str,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Recipe")]
        title: String,
        #[tabled(rename = "Min")]
        minutes: i64,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "Fav")]
        favorite: &'static str,
    }

    let rows: Vec<ScheduleRow> = schedule
        .iter()
        .map(|s| ScheduleRow {
            date: s.date.format("%Y-%m-%d").to_string(),
            day: spanish_weekday(s.date),
            meal: s.meal_type.to_string(),
            id: s.recipe.id,
            title: truncate(&s.recipe.title, 40),
            minutes: s.recipe.prep_time_minutes,
            calories: format!("{:.0}", no_neg_zero(s.recipe.calories)),
            favorite: if s.recipe.favorite { "*" } else { "" },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(5..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

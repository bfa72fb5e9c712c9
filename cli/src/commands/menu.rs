use anyhow::Result;
use chrono::Local;
use uuid::Uuid;

use menuplan_core::error::PlannerError;
use menuplan_core::models::{MealSelection, MenuDetail};
use menuplan_core::service::PlannerService;

use super::helpers::{no_neg_zero, print_schedule_table};

pub(crate) async fn cmd_menu_generate(
    service: &PlannerService,
    user: Uuid,
    selection: MealSelection,
    json: bool,
) -> Result<()> {
    let meals: Vec<String> = selection.active().iter().map(ToString::to_string).collect();
    if !json {
        eprintln!("Generating {} for user {user}...", meals.join(", "));
    }

    let today = Local::now().date_naive();
    let menu = match service
        .generate_menu(&user.to_string(), selection, today)
        .await
    {
        Ok(menu) => menu,
        Err(PlannerError::Upstream { message, failures }) => {
            for f in &failures {
                eprintln!(
                    "  {} {}: {} (after {} attempt(s))",
                    f.date, f.meal_type, f.error, f.attempts
                );
            }
            anyhow::bail!(message);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&menu)?);
    } else {
        print_menu(&menu);
    }
    Ok(())
}

pub(crate) fn cmd_menu_show(service: &PlannerService, user: Uuid, json: bool) -> Result<()> {
    let menu = service.current_menu(&user.to_string(), Local::now().date_naive())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&menu)?);
    } else {
        print_menu(&menu);
    }
    Ok(())
}

fn print_menu(menu: &MenuDetail) {
    println!(
        "Menu #{} for the week of {}",
        menu.menu.id,
        menu.menu.week_start.format("%Y-%m-%d")
    );
    print_schedule_table(&menu.schedule);

    let total: f64 = menu.schedule.iter().map(|s| s.recipe.calories).sum();
    println!("Total: {:.0} kcal", no_neg_zero(total));
    if let Some(list_id) = menu.shopping_list_id {
        println!("Shopping list: #{list_id}");
    }
}

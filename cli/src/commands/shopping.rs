use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};
use uuid::Uuid;

use menuplan_core::service::PlannerService;

use super::helpers::truncate;

/// Show one shopping list: `list_id` when given, otherwise the newest week.
pub(crate) fn cmd_shopping_show(
    service: &PlannerService,
    user: Uuid,
    list_id: Option<i64>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Ingredient")]
        name: String,
        #[tabled(rename = "Acquired")]
        acquired: &'static str,
    }

    let user_id = user.to_string();
    let list = match list_id {
        Some(id) => Some(service.get_shopping_list(&user_id, id)?),
        // Newest week first
        None => service.list_shopping_lists(&user_id)?.into_iter().next(),
    };

    let Some(list) = list else {
        if json {
            println!("{}", serde_json::json!({ "error": "No shopping lists found" }));
        } else {
            eprintln!("No shopping lists found. Use `menuplan menu generate` first.");
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    let rows: Vec<ItemRow> = list
        .items
        .iter()
        .map(|i| ItemRow {
            id: i.ingredient_id,
            name: truncate(&i.name, 40),
            acquired: if i.acquired { "yes" } else { "" },
        })
        .collect();

    println!(
        "Shopping list #{} (week of {})",
        list.id,
        list.week_start.format("%Y-%m-%d")
    );
    println!("{}", Table::new(&rows).with(Style::rounded()));
    println!(
        "{} acquired, {} pending",
        list.acquired_count, list.pending_count
    );
    Ok(())
}

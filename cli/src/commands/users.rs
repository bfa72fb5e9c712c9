use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};
use tracing::info;
use uuid::Uuid;

use menuplan_core::models::ROLE_ADMIN;
use menuplan_core::service::PlannerService;

use super::helpers::truncate;

pub(crate) fn cmd_users_list(service: &PlannerService, json: bool) -> Result<()> {
    let users = service.all_users()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
    } else if users.is_empty() {
        eprintln!("No users registered yet.");
    } else {
        #[derive(Tabled)]
        struct UserRow {
            #[tabled(rename = "ID")]
            id: String,
            #[tabled(rename = "Email")]
            email: String,
            #[tabled(rename = "Name")]
            name: String,
            #[tabled(rename = "Role")]
            role: String,
            #[tabled(rename = "Diet")]
            diet: String,
            #[tabled(rename = "Kcal")]
            calories: i64,
        }

        let rows: Vec<UserRow> = users
            .iter()
            .map(|u| UserRow {
                id: u.id.clone(),
                email: truncate(&u.email, 30),
                name: u.name.as_deref().map(|n| truncate(n, 20)).unwrap_or_default(),
                role: u.role.clone(),
                diet: u.diet.clone(),
                calories: u.calorie_target,
            })
            .collect();

        println!("{}", Table::new(&rows).with(Style::rounded()));
    }

    Ok(())
}

pub(crate) fn cmd_users_promote(service: &PlannerService, user: Uuid) -> Result<()> {
    let updated = service.set_role(&user.to_string(), ROLE_ADMIN)?;
    info!(user = %updated.id, "granted admin role");
    println!("{} ({}) is now an admin", updated.email, updated.id);
    Ok(())
}

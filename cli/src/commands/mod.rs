mod helpers;
mod menu;
mod shopping;
mod users;

pub(crate) use menu::{cmd_menu_generate, cmd_menu_show};
pub(crate) use shopping::cmd_shopping_show;
pub(crate) use users::{cmd_users_list, cmd_users_promote};

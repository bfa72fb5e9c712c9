mod auth;
mod commands;
mod config;
mod llm;
mod server;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::auth::{IdentityProvider, SupabaseAuth};
use crate::commands::{
    cmd_menu_generate, cmd_menu_show, cmd_shopping_show, cmd_users_list, cmd_users_promote,
};
use crate::config::{AuthArgs, Config, DEFAULT_LOG_FILTER, LlmArgs};
use crate::llm::ChatCompletionsClient;
use crate::server::AppState;
use menuplan_core::db::Database;
use menuplan_core::models::MealSelection;
use menuplan_core::service::PlannerService;

#[derive(Parser)]
#[command(
    name = "menuplan",
    version,
    about = "Weekly meal planner with generated recipes and shopping lists"
)]
struct Cli {
    /// Path to the SQLite database (default: platform data directory)
    #[arg(long, env = "MENUPLAN_DB", global = true)]
    db: Option<PathBuf>,

    #[command(flatten)]
    llm: LlmArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
        /// Address to bind to (use 0.0.0.0 to listen on all interfaces)
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Generate or inspect weekly menus
    Menu {
        #[command(subcommand)]
        command: MenuCommands,
    },
    /// Show shopping lists
    Shopping {
        #[command(subcommand)]
        command: ShoppingCommands,
    },
    /// Manage registered users
    Users {
        #[command(subcommand)]
        command: UsersCommands,
    },
}

#[derive(Subcommand)]
enum MenuCommands {
    /// Generate the menu for the current week
    Generate {
        /// User id (UUID)
        #[arg(long)]
        user: Uuid,
        /// Include breakfast
        #[arg(long)]
        desayuno: bool,
        /// Include lunch
        #[arg(long)]
        almuerzo: bool,
        /// Include dinner
        #[arg(long)]
        cena: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the menu for the current week
    Show {
        /// User id (UUID)
        #[arg(long)]
        user: Uuid,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ShoppingCommands {
    /// Show the most recent shopping list, or one by id
    Show {
        /// User id (UUID)
        #[arg(long)]
        user: Uuid,
        /// Shopping list id (default: the newest week)
        #[arg(long)]
        list: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UsersCommands {
    /// List every registered user
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Grant the admin role to a user
    Promote {
        /// User id (UUID)
        #[arg(long)]
        user: Uuid,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    let db = Database::open(&config.db_path)?;
    let generator = Arc::new(ChatCompletionsClient::new(&cli.llm)?);
    let service = PlannerService::new(db, generator, cli.llm.retry_policy());

    match cli.command {
        Commands::Serve { port, bind, auth } => {
            let identity: Arc<dyn IdentityProvider> = Arc::new(SupabaseAuth::new(&auth)?);
            if cli.llm.api_key.is_none() {
                tracing::warn!("LLM_API_KEY is not set; menu generation will fail");
            }
            let state = AppState { service, identity };
            server::start_server(state, port, &bind).await
        }
        Commands::Menu { command } => match command {
            MenuCommands::Generate {
                user,
                desayuno,
                almuerzo,
                cena,
                json,
            } => {
                let selection = MealSelection {
                    desayuno,
                    almuerzo,
                    cena,
                };
                cmd_menu_generate(&service, user, selection, json).await
            }
            MenuCommands::Show { user, json } => cmd_menu_show(&service, user, json),
        },
        Commands::Shopping { command } => match command {
            ShoppingCommands::Show { user, list, json } => {
                cmd_shopping_show(&service, user, list, json)
            }
        },
        Commands::Users { command } => match command {
            UsersCommands::List { json } => cmd_users_list(&service, json),
            UsersCommands::Promote { user } => cmd_users_promote(&service, user),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_menu_generate() {
        let cli = Cli::try_parse_from([
            "menuplan",
            "menu",
            "generate",
            "--user",
            "0f8e2d4c-6b1a-4e3f-8d7c-5a9b1c2d3e4f",
            "--cena",
        ])
        .unwrap();
        match cli.command {
            Commands::Menu {
                command:
                    MenuCommands::Generate {
                        desayuno,
                        almuerzo,
                        cena,
                        ..
                    },
            } => assert!(!desayuno && !almuerzo && cena),
            _ => panic!("expected menu generate"),
        }
    }

    #[test]
    fn test_parse_shopping_show_with_list() {
        let cli = Cli::try_parse_from([
            "menuplan",
            "shopping",
            "show",
            "--user",
            "0f8e2d4c-6b1a-4e3f-8d7c-5a9b1c2d3e4f",
            "--list",
            "7",
        ])
        .unwrap();
        match cli.command {
            Commands::Shopping {
                command: ShoppingCommands::Show { list, .. },
            } => assert_eq!(list, Some(7)),
            _ => panic!("expected shopping show"),
        }
    }

    #[test]
    fn test_llm_flags_keep_their_names() {
        let cli = Cli::try_parse_from([
            "menuplan",
            "--llm-model",
            "local-model",
            "--llm-max-attempts",
            "5",
            "users",
            "list",
        ])
        .unwrap();
        assert_eq!(cli.llm.model, "local-model");
        assert_eq!(cli.llm.retry_policy().max_attempts, 5);
    }

    #[test]
    fn test_rejects_malformed_user_id() {
        assert!(
            Cli::try_parse_from(["menuplan", "shopping", "show", "--user", "ana"]).is_err()
        );
    }
}

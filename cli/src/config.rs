use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use directories::ProjectDirs;

use menuplan_core::planner::RetryPolicy;

pub const DEFAULT_LOG_FILTER: &str = "menuplan=info,menuplan_core=info,tower_http=info";

pub struct Config {
    pub db_path: PathBuf,
}

impl Config {
    /// Resolve the database location. `db_override` comes from `--db` or
    /// `MENUPLAN_DB`; otherwise the platform data directory is used.
    pub fn load(db_override: Option<PathBuf>) -> Result<Self> {
        if let Some(db_path) = db_override {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
            return Ok(Config { db_path });
        }

        let proj_dirs =
            ProjectDirs::from("", "", "menuplan").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config {
            db_path: data_dir.join("menuplan.db"),
        })
    }
}

/// Settings for the chat-completions endpoint that generates recipes.
#[derive(Args, Debug, Clone)]
pub struct LlmArgs {
    /// API key for the recipe generation endpoint
    #[arg(
        long = "llm-api-key",
        env = "LLM_API_KEY",
        global = true,
        hide_env_values = true
    )]
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible API
    #[arg(
        long = "llm-base-url",
        env = "LLM_BASE_URL",
        global = true,
        default_value = "https://api.openai.com/v1"
    )]
    pub base_url: String,
    /// Model used for recipe generation
    #[arg(
        long = "llm-model",
        env = "LLM_MODEL",
        global = true,
        default_value = "gpt-4o-mini"
    )]
    pub model: String,
    /// Request timeout in seconds
    #[arg(
        long = "llm-timeout-secs",
        env = "LLM_TIMEOUT_SECS",
        global = true,
        default_value = "60"
    )]
    pub timeout_secs: u64,
    /// Attempts per recipe before a slot is reported as failed
    #[arg(
        long = "llm-max-attempts",
        env = "LLM_MAX_ATTEMPTS",
        global = true,
        default_value = "3",
        value_parser = clap::value_parser!(u32).range(1..=10)
    )]
    pub max_attempts: u32,
}

impl LlmArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts as usize,
            ..RetryPolicy::default()
        }
    }
}

/// Settings for the hosted auth provider used by the HTTP API.
#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    /// Project URL of the Supabase instance
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,
    /// Anonymous (public) API key of the Supabase project
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub supabase_anon_key: Option<String>,
}

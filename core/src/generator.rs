use async_trait::async_trait;
use thiserror::Error;

use crate::models::GeneratedRecipe;

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("response did not match the recipe schema: {0}")]
    InvalidOutput(String),
    #[error("recipe generation is not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    /// Transient failures and malformed model output are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited | Self::InvalidOutput(_) => {
                true
            }
            Self::Http { status, .. } => (500..=599).contains(status),
            Self::InvalidApiKey | Self::NotConfigured(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipePrompt {
    pub system: String,
    pub user: String,
}

/// Source of structured recipes.
///
/// The server wires in an HTTP client for a chat-completions API; tests use
/// scripted in-process implementations.
#[async_trait]
pub trait RecipeGenerator: Send + Sync {
    async fn generate(&self, prompt: &RecipePrompt) -> Result<GeneratedRecipe, GenerationError>;
}

/// Parse and validate a model response body into a [`GeneratedRecipe`].
pub fn parse_generated_recipe(text: &str) -> Result<GeneratedRecipe, GenerationError> {
    let json = extract_json(text);
    if json.is_empty() {
        return Err(GenerationError::InvalidOutput("empty response".to_string()));
    }
    let recipe: GeneratedRecipe = serde_json::from_str(json).map_err(|e| {
        let preview: String = json.chars().take(200).collect();
        GenerationError::InvalidOutput(format!("{e} (response preview: {preview})"))
    })?;
    recipe
        .validate()
        .map_err(|e| GenerationError::InvalidOutput(format!("{e:#}")))?;
    Ok(recipe)
}

/// Strip a surrounding markdown code fence, if any.
fn extract_json(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the language tag line
    let body = rest.find('\n').map_or("", |i| &rest[i + 1..]);
    body.rfind("```").map_or(body, |end| &body[..end]).trim()
}

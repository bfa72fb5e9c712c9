use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use menuplan_core::generator::{
    GenerationError, RecipeGenerator, RecipePrompt, parse_generated_recipe,
};
use menuplan_core::models::GeneratedRecipe;
use menuplan_core::schema::{RECIPE_SCHEMA_NAME, recipe_response_schema};

use crate::config::LlmArgs;

const TEMPERATURE: f64 = 0.7;

/// Recipe generator backed by an OpenAI-compatible chat-completions API
/// with strict structured output.
pub struct ChatCompletionsClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    refusal: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(args: &LlmArgs) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(format!("menuplan/{}", env!("CARGO_PKG_VERSION")))
            .timeout(args.timeout())
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", args.base_url.trim_end_matches('/')),
            api_key: args.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: args.model.clone(),
        })
    }

    async fn send(&self, prompt: &RecipePrompt) -> Result<String, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GenerationError::NotConfigured("LLM_API_KEY is not set".to_string())
        })?;

        let res = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request_body(&self.model, prompt))
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e))?;

        match res.status() {
            s if s.is_success() => {
                let body: ChatResponse = res
                    .json()
                    .await
                    .map_err(|e| GenerationError::InvalidOutput(e.to_string()))?;
                message_content(body)
            }
            StatusCode::UNAUTHORIZED => Err(GenerationError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(GenerationError::RateLimited),
            s => {
                let body = res.text().await.unwrap_or_default();
                Err(GenerationError::Http {
                    status: s.as_u16(),
                    body: body.chars().take(500).collect(),
                })
            }
        }
    }
}

#[async_trait]
impl RecipeGenerator for ChatCompletionsClient {
    async fn generate(&self, prompt: &RecipePrompt) -> Result<GeneratedRecipe, GenerationError> {
        let content = self.send(prompt).await?;
        debug!(model = %self.model, bytes = content.len(), "completion received");
        parse_generated_recipe(&content)
    }
}

fn request_body(model: &str, prompt: &RecipePrompt) -> serde_json::Value {
    json!({
        "model": model,
        "temperature": TEMPERATURE,
        "messages": [
            { "role": "system", "content": prompt.system },
            { "role": "user", "content": prompt.user }
        ],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": RECIPE_SCHEMA_NAME,
                "strict": true,
                "schema": recipe_response_schema()
            }
        }
    })
}

fn message_content(body: ChatResponse) -> Result<String, GenerationError> {
    let Some(choice) = body.choices.into_iter().next() else {
        return Err(GenerationError::InvalidOutput(
            "completion has no choices".to_string(),
        ));
    };
    match (choice.message.content, choice.message.refusal) {
        (Some(content), _) if !content.trim().is_empty() => Ok(content),
        (_, Some(refusal)) => Err(GenerationError::InvalidOutput(format!(
            "model refused: {refusal}"
        ))),
        _ => Err(GenerationError::InvalidOutput(
            "completion has no content".to_string(),
        )),
    }
}

fn map_reqwest_error(e: &reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(api_key: Option<&str>) -> LlmArgs {
        LlmArgs {
            api_key: api_key.map(str::to_string),
            base_url: "https://llm.example.com/v1/".to_string(),
            model: "test-model".to_string(),
            timeout_secs: 5,
            max_attempts: 1,
        }
    }

    fn prompt() -> RecipePrompt {
        RecipePrompt {
            system: "sistema".to_string(),
            user: "Genera una receta de cena".to_string(),
        }
    }

    #[test]
    fn test_request_body_uses_strict_schema() {
        let body = request_body("test-model", &prompt());
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Genera una receta de cena");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(
            body["response_format"]["json_schema"]["name"],
            RECIPE_SCHEMA_NAME
        );
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["type"],
            "object"
        );
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client = ChatCompletionsClient::new(&args(Some("k"))).unwrap();
        assert_eq!(
            client.endpoint,
            "https://llm.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_message_content_variants() {
        let ok: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "{}", "refusal": null } }]
        }))
        .unwrap();
        assert_eq!(message_content(ok).unwrap(), "{}");

        let refused: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": null, "refusal": "no puedo" } }]
        }))
        .unwrap();
        let err = message_content(refused).unwrap_err();
        assert!(err.to_string().contains("no puedo"));

        let empty: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(
            message_content(empty),
            Err(GenerationError::InvalidOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_not_retryable() {
        let client = ChatCompletionsClient::new(&args(None)).unwrap();
        let err = client.generate(&prompt()).await.unwrap_err();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
        assert!(!err.is_retryable());
    }

    // --- Integration tests (hit a real chat-completions API) ---

    #[tokio::test]
    #[ignore = "hits the LLM API; needs LLM_API_KEY"]
    async fn test_generate_live_recipe() {
        let key = std::env::var("LLM_API_KEY").unwrap();
        let mut live = args(Some(&key));
        live.base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        live.model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        live.timeout_secs = 60;
        let client = ChatCompletionsClient::new(&live).unwrap();
        let recipe = client.generate(&prompt()).await.unwrap();
        assert!(!recipe.title.is_empty());
        assert!(!recipe.ingredients.is_empty());
    }
}

//! # Ingredient Generator Module
//!
//! The external generator proposes an ingredient list for a dish and a number
//! of servings. The planning engine only sees the [`IngredientGenerator`]
//! trait; [`HttpIngredientGenerator`] talks to an OpenAI-compatible chat
//! completions endpoint.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::planning_model::GeneratedIngredient;

/// Source of generated ingredient lists
///
/// Calls may be slow and may fail; an empty list is a valid (useless) answer.
#[async_trait]
pub trait IngredientGenerator: Send + Sync {
    async fn generate(&self, dish_name: &str, serving_count: i32) -> Result<Vec<GeneratedIngredient>>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Generator backed by a chat completions HTTP API
pub struct HttpIngredientGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl HttpIngredientGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build generator HTTP client")?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl IngredientGenerator for HttpIngredientGenerator {
    async fn generate(&self, dish_name: &str, serving_count: i32) -> Result<Vec<GeneratedIngredient>> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You list the ingredients needed to cook a dish. Answer with JSON only."
                        .to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_prompt(dish_name, serving_count),
                },
            ],
            temperature: 0.7,
        };

        debug!(dish_name, serving_count, model = %self.config.model, "Requesting ingredient generation");

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response: ChatResponse = builder
            .send()
            .await
            .context("Generator request failed")?
            .error_for_status()
            .context("Generator returned an error status")?
            .json()
            .await
            .context("Generator response is not valid JSON")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("Generator response has no choices"))?;

        let ingredients = parse_generated_ingredients(&content)?;
        info!(dish_name, serving_count, count = ingredients.len(), "Generated ingredients");
        Ok(ingredients)
    }
}

/// Prompt asking for a JSON array of `{name, quantity, category}`
pub fn build_prompt(dish_name: &str, serving_count: i32) -> String {
    format!(
        r#"List the ingredients to buy for "{dish_name}" for {serving_count} people.

For each ingredient give:
- name: the ingredient name, in the language of the dish name
- quantity: the amount for {serving_count} people with its unit (e.g., "400g", "4", "2 bouteilles"), or null
- category: the supermarket aisle (e.g., "fruits et légumes", "crèmerie", "épicerie"), or null

Respond with ONLY a JSON array, no other text. Example:
[
  {{"name": "farine", "quantity": "250g", "category": "épicerie"}},
  {{"name": "oeufs", "quantity": "4", "category": "crèmerie"}}
]"#
    )
}

/// Extract the ingredient array from a generator answer
///
/// Tolerates text or code fences around the array.
pub fn parse_generated_ingredients(content: &str) -> Result<Vec<GeneratedIngredient>> {
    let start = content.find('[');
    let end = content.rfind(']');

    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => return Err(anyhow!("Generator answer contains no JSON array")),
    };

    serde_json::from_str(json).with_context(|| format!("Invalid ingredient JSON: {json}"))
}

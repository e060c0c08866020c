//! OpenAI-compatible chat completions client (Groq by default).

use super::{Generation, SYSTEM_MESSAGE, SqlGenerator, build_prompt, parse_response};
use crate::config::GeneratorConfig;
use crate::database::SchemaSummary;
use crate::error::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl ChatCompletionsGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base)
    }

    pub fn is_configured(&self) -> bool {
        self.api_key().is_some()
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[async_trait]
impl SqlGenerator for ChatCompletionsGenerator {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn generate(
        &self,
        schema: &SchemaSummary,
        question: &str,
    ) -> Result<Generation, GenerationError> {
        let api_key = self
            .api_key()
            .ok_or(GenerationError::NotConfigured("LLM_API_KEY is not set".into()))?;

        let prompt = build_prompt(schema, question);
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string().into()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(GenerationError::InvalidResponse("no content in completion".into()))?;

        debug!(chars = content.len(), "Completion received");
        parse_response(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let generator = ChatCompletionsGenerator::new(GeneratorConfig {
            api_base: "http://localhost:8080/v1".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(generator.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "llama-3.3-70b-versatile",
            messages: [
                ChatMessage { role: "system", content: SYSTEM_MESSAGE },
                ChatMessage { role: "user", content: "q" },
            ],
            temperature: 0.1,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "llama-3.3-70b-versatile");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "q");
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let generator = ChatCompletionsGenerator::new(GeneratorConfig {
            api_key: Some("   ".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(!generator.is_configured());

        let result = generator.generate(&SchemaSummary::default(), "anything").await;
        assert!(matches!(result, Err(GenerationError::NotConfigured(_))));
    }
}

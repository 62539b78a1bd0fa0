// src/chat/title.rs
// Conversation title generation. A small model produces the title from the
// first user message; without a provider (or on any provider failure) the
// message text itself is truncated instead, so conversation creation never
// blocks on the collaborator.

use serde_json::json;
use std::sync::Arc;

use crate::llm::{MessageRole, Provider, ProviderMessage, ProviderRequest};

use super::prompt::title_prompt;

const MAX_TITLE_CHARS: usize = 80;

pub struct TitleGenerator {
    provider: Option<(Arc<dyn Provider>, String)>,
}

impl TitleGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: String) -> Self {
        Self {
            provider: Some((provider, model)),
        }
    }

    /// Truncation-only generator, for deployments without a title model
    pub fn truncating() -> Self {
        Self { provider: None }
    }

    pub async fn generate(&self, first_message: &str) -> String {
        if let Some((provider, model)) = &self.provider {
            let request = ProviderRequest {
                model: model.clone(),
                system: title_prompt().to_string(),
                messages: vec![ProviderMessage::text(MessageRole::User, first_message)],
                tools: Vec::new(),
                options: json!({}),
            };

            match provider.complete(request).await {
                Ok(title) => {
                    let title = title.trim();
                    if !title.is_empty() {
                        return truncate(title);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Title generation failed, falling back to truncation");
                }
            }
        }

        truncate(first_message.trim())
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_TITLE_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_truncating_generator() {
        let generator = TitleGenerator::truncating();
        assert_eq!(generator.generate("what's 2+2").await, "what's 2+2");

        let long = "x".repeat(200);
        let title = generator.generate(&long).await;
        assert!(title.chars().count() <= MAX_TITLE_CHARS);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_truncate_multibyte_safe() {
        let text = "é".repeat(100);
        let title = truncate(&text);
        assert!(title.chars().count() <= MAX_TITLE_CHARS);
    }
}

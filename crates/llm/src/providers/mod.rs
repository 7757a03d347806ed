pub mod anthropic;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use marshal_core::{ConfigError, Settings};
use marshal_runtime::Provider;

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// Create the configured provider adapter. API keys come from the
/// environment (call `marshal_core::config::load_dotenv()` first); an unknown
/// provider id or a missing key is a configuration error and the run never
/// starts.
pub fn create_provider(settings: &Settings) -> Result<Arc<dyn Provider>, ConfigError> {
    match settings.provider.as_str() {
        "anthropic" => {
            let api_key = env_opt("ANTHROPIC_API_KEY")
                .ok_or_else(|| ConfigError::Invalid("ANTHROPIC_API_KEY not set".into()))?;
            let model = settings
                .model
                .clone()
                .unwrap_or_else(|| anthropic::DEFAULT_MODEL.to_string());
            let base_url = env_opt("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| "https://api.anthropic.com".to_string());
            Ok(Arc::new(anthropic::AnthropicProvider::new(
                api_key, model, base_url,
            )))
        }
        "openai" => {
            let api_key = env_opt("OPENAI_API_KEY")
                .ok_or_else(|| ConfigError::Invalid("OPENAI_API_KEY not set".into()))?;
            let model = settings
                .model
                .clone()
                .unwrap_or_else(|| openai::DEFAULT_MODEL.to_string());
            let base_url = env_opt("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".to_string());
            Ok(Arc::new(openai::OpenAiProvider::new(
                api_key, model, base_url,
            )))
        }
        "ollama" => {
            let url =
                env_opt("OLLAMA_URL").unwrap_or_else(|| "http://localhost:11434".to_string());
            let model = settings
                .model
                .clone()
                .unwrap_or_else(|| ollama::DEFAULT_MODEL.to_string());
            Ok(Arc::new(ollama::OllamaProvider::new(url, model)))
        }
        other => Err(ConfigError::Invalid(format!(
            "unknown LLM provider: '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let settings = Settings {
            provider: "mystery".to_string(),
            ..Default::default()
        };
        let err = match create_provider(&settings) {
            Ok(_) => panic!("expected unknown provider to be rejected"),
            Err(e) => e,
        };
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_ollama_needs_no_api_key() {
        let settings = Settings {
            provider: "ollama".to_string(),
            ..Default::default()
        };
        let provider = create_provider(&settings).unwrap();
        assert_eq!(provider.name(), "ollama");
    }
}

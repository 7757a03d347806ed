pub mod providers;

pub use providers::anthropic::AnthropicProvider;
pub use providers::create_provider;
pub use providers::ollama::OllamaProvider;
pub use providers::openai::OpenAiProvider;

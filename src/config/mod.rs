// Configuration management module
// TOML settings for the embedding service, chat model, retrieval and sessions

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, EmbeddingConfig, LlmConfig, LoaderConfig, PromptStyle, Provider,
    RetrievalConfig, SessionsConfig,
};

/// Resolve the configuration directory: an explicit override, or the platform default
#[inline]
pub fn resolve_config_dir(
    override_dir: Option<std::path::PathBuf>,
) -> Result<std::path::PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir),
        None => Config::default_dir(),
    }
}

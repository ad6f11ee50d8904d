
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::{Config, EmbeddingConfig, LlmConfig, PromptStyle, Provider};

const GEMINI_OPENAI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
const OLLAMA_ENDPOINT: &str = "http://localhost:11434";

/// Service presets offered in the interactive setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preset {
    Ollama,
    OpenAi,
    Gemini,
}

const PRESETS: &[Preset] = &[Preset::Ollama, Preset::OpenAi, Preset::Gemini];

impl Preset {
    fn label(self) -> &'static str {
        match self {
            Self::Ollama => "Ollama (local)",
            Self::OpenAi => "OpenAI",
            Self::Gemini => "Google Gemini (OpenAI-compatible endpoint)",
        }
    }

    fn provider(self) -> Provider {
        match self {
            Self::Ollama => Provider::Ollama,
            Self::OpenAi | Self::Gemini => Provider::OpenAi,
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            Self::Ollama => OLLAMA_ENDPOINT,
            Self::OpenAi => OPENAI_ENDPOINT,
            Self::Gemini => GEMINI_OPENAI_ENDPOINT,
        }
    }

    fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::Ollama => None,
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Gemini => Some("GOOGLE_API_KEY"),
        }
    }

    fn chat_model(self) -> &'static str {
        match self {
            Self::Ollama => "llama3.2:latest",
            Self::OpenAi => "gpt-4o-mini",
            Self::Gemini => "gemini-2.0-flash",
        }
    }

    fn embedding_model(self) -> &'static str {
        match self {
            Self::Ollama => "nomic-embed-text:latest",
            Self::OpenAi => "text-embedding-3-small",
            Self::Gemini => "text-embedding-004",
        }
    }

    /// Best guess at which preset an existing configuration came from
    fn detect(provider: Provider, endpoint: &str) -> Self {
        match provider {
            Provider::Ollama => Self::Ollama,
            Provider::OpenAi if endpoint.contains("generativelanguage.googleapis.com") => {
                Self::Gemini
            }
            Provider::OpenAi => Self::OpenAi,
        }
    }
}

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Ask the Docs Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Chat Model").bold().yellow());
    eprintln!("The language model that writes the answers.");
    eprintln!();
    configure_llm(&mut config.llm)?;

    eprintln!();
    eprintln!("{}", style("Embedding Model").bold().yellow());
    eprintln!("Turns documents and questions into vectors for retrieval.");
    eprintln!();
    configure_embedding(&mut config.embedding)?;

    let top_k: usize = Input::new()
        .with_prompt("Documents to retrieve per question")
        .default(config.retrieval.top_k)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=100).contains(input) {
                Ok(())
            } else {
                Err("Must be between 1 and 100")
            }
        })
        .interact_text()?;
    config.retrieval.top_k = top_k;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    report_connection("Chat service", &config.llm.endpoint);
    report_connection("Embedding service", &config.embedding.endpoint);

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Chat Model:").bold().yellow());
    eprintln!("  Provider: {}", style(config.llm.provider).cyan());
    eprintln!("  Endpoint: {}", style(&config.llm.endpoint).cyan());
    eprintln!("  Model: {}", style(&config.llm.model).cyan());
    eprintln!("  Temperature: {}", style(config.llm.temperature).cyan());
    eprintln!("  Prompt style: {}", style(config.llm.prompt_style).cyan());
    eprintln!(
        "  Context limit: {} tokens",
        style(config.llm.max_context_tokens).cyan()
    );
    print_api_key_status(config.llm.api_key_env.as_deref());

    eprintln!();
    eprintln!("{}", style("Embedding Model:").bold().yellow());
    eprintln!("  Provider: {}", style(config.embedding.provider).cyan());
    eprintln!("  Endpoint: {}", style(&config.embedding.endpoint).cyan());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
    print_api_key_status(config.embedding.api_key_env.as_deref());

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!("  RAG enabled: {}", style(config.retrieval.use_rag).cyan());
    eprintln!(
        "  Splitting: {}",
        if config.splitting.enabled {
            style(format!(
                "{} chars, {} overlap",
                config.splitting.chunk_size, config.splitting.chunk_overlap
            ))
            .cyan()
        } else {
            style("disabled".to_string()).dim()
        }
    );

    eprintln!();
    eprintln!(
        "Sessions: {} (kept {} hours)",
        style(config.sessions_root().display()).cyan(),
        config.sessions.retention_hours
    );
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn print_api_key_status(var: Option<&str>) {
    match var {
        Some(var) if crate::service::api_key_from_env(Some(var)).is_some() => {
            eprintln!("  API Key: {} ({})", style("✅ Set").green(), var);
        }
        Some(var) => eprintln!("  API Key: {} ({})", style("❌ Not Set").red(), var),
        None => eprintln!("  API Key: {}", style("not required").dim()),
    }
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("Existing configuration is unreadable. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            if config.config_file_path().exists() {
                eprintln!("{}", style("Found existing configuration.").green());
            } else {
                eprintln!(
                    "{}",
                    style("No existing configuration found. Using defaults.").yellow()
                );
            }
            Ok(config)
        },
    )
}

fn select_preset(prompt: &str, current: Preset) -> Result<Preset> {
    let labels: Vec<&str> = PRESETS.iter().map(|p| p.label()).collect();
    let default_index = PRESETS.iter().position(|&p| p == current).unwrap_or(0);

    let index = Select::new()
        .with_prompt(prompt)
        .default(default_index)
        .items(&labels)
        .interact()?;

    Ok(PRESETS[index])
}

fn prompt_endpoint(current: String) -> Result<String> {
    Ok(Input::new()
        .with_prompt("Endpoint URL")
        .default(current)
        .validate_with(|input: &String| -> Result<(), String> {
            EmbeddingConfig::default()
                .set_endpoint(input.clone())
                .map_err(|e| e.to_string())
        })
        .interact_text()?)
}

fn prompt_model(current: String) -> Result<String> {
    Ok(Input::new()
        .with_prompt("Model")
        .default(current)
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?)
}

fn prompt_api_key_env(current: Option<String>, preset: Preset) -> Result<Option<String>> {
    let default = current
        .or_else(|| preset.api_key_env().map(str::to_string))
        .unwrap_or_default();

    let var: String = Input::new()
        .with_prompt("Environment variable holding the API key (empty for none)")
        .default(default)
        .allow_empty(true)
        .interact_text()?;

    Ok(Some(var.trim().to_string()).filter(|v| !v.is_empty()))
}

fn configure_llm(llm: &mut LlmConfig) -> Result<()> {
    let current = Preset::detect(llm.provider, &llm.endpoint);
    let preset = select_preset("Chat provider", current)?;

    let (endpoint, model) = if preset == current {
        (llm.endpoint.clone(), llm.model.clone())
    } else {
        (
            preset.endpoint().to_string(),
            preset.chat_model().to_string(),
        )
    };

    let endpoint = prompt_endpoint(endpoint)?;
    let model = prompt_model(model)?;
    let api_key_env = prompt_api_key_env(
        llm.api_key_env.clone().filter(|_| preset == current),
        preset,
    )?;

    let temperature: f32 = Input::new()
        .with_prompt("Temperature")
        .default(llm.temperature)
        .validate_with(|input: &f32| -> Result<(), &str> {
            if (0.0..=2.0).contains(input) {
                Ok(())
            } else {
                Err("Temperature must be between 0.0 and 2.0")
            }
        })
        .interact_text()?;

    let max_context_tokens: usize = Input::new()
        .with_prompt("Model context limit (tokens)")
        .default(llm.max_context_tokens)
        .interact_text()?;

    let styles = [PromptStyle::Instruction, PromptStyle::RetrievalQa];
    let style_index = Select::new()
        .with_prompt("Prompt style")
        .default(styles.iter().position(|&s| s == llm.prompt_style).unwrap_or(0))
        .items(&["instruction", "retrieval-qa"])
        .interact()?;

    llm.provider = preset.provider();
    llm.set_endpoint(endpoint)?;
    llm.set_model(model)?;
    llm.set_api_key_env(api_key_env)?;
    llm.set_temperature(temperature)?;
    llm.set_max_context_tokens(max_context_tokens)?;
    llm.prompt_style = styles[style_index];

    Ok(())
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let current = Preset::detect(embedding.provider, &embedding.endpoint);
    let preset = select_preset("Embedding provider", current)?;

    let (endpoint, model) = if preset == current {
        (embedding.endpoint.clone(), embedding.model.clone())
    } else {
        (
            preset.endpoint().to_string(),
            preset.embedding_model().to_string(),
        )
    };

    let endpoint = prompt_endpoint(endpoint)?;
    let model = prompt_model(model)?;
    let api_key_env = prompt_api_key_env(
        embedding.api_key_env.clone().filter(|_| preset == current),
        preset,
    )?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(embedding.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    embedding.provider = preset.provider();
    embedding.set_endpoint(endpoint)?;
    embedding.set_model(model)?;
    embedding.set_api_key_env(api_key_env)?;
    embedding.set_batch_size(batch_size)?;

    Ok(())
}

fn report_connection(label: &str, endpoint: &str) {
    if test_connection(endpoint) {
        eprintln!("{}", style(format!("✓ {label} reachable")).green());
    } else {
        eprintln!(
            "{}",
            style(format!("⚠ Warning: could not reach {label} at {endpoint}")).yellow()
        );
        eprintln!("You can continue, but make sure it is running before asking questions.");
    }
}

/// Any HTTP answer, even a 4xx, means something is listening
fn test_connection(endpoint: &str) -> bool {
    let agent = crate::service::build_agent(std::time::Duration::from_secs(5), None);

    match agent.get(endpoint).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}

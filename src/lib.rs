use thiserror::Error;

pub type Result<T> = std::result::Result<T, AskError>;

#[derive(Error, Debug)]
pub enum AskError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] service::ServiceError),

    #[error("Loader error: {0}")]
    Load(#[from] loader::LoadError),

    #[error("Index error: {0}")]
    Index(#[from] index::IndexError),

    #[error("Retrieval error: {0}")]
    Retrieve(#[from] retriever::RetrieveError),

    #[error("Answer error: {0}")]
    Compose(#[from] composer::ComposeError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod composer;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod llm;
pub mod loader;
pub mod retriever;
pub mod service;
pub mod session;

#[cfg(test)]
mod test_support;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocChatError>;

#[derive(Error, Debug)]
pub enum DocChatError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Indexing error: {0}")]
    Indexing(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Materialize error: {0}")]
    Materialize(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Store error: {0}")]
    Store(#[from] database::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod cache;
pub mod commands;
pub mod config;
pub mod converter;
pub mod database;
pub mod encoder;
pub mod indexer;
pub mod materialize;
pub mod retrieval;
pub mod search;
pub mod sections;
pub mod session;

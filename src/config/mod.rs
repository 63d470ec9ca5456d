// Configuration management module
// TOML settings for the encoder connection, retrieval and document conversion

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, ConverterConfig, EncoderConfig, RetrievalConfig, StorageMode,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

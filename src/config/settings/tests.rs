use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.encoder.protocol, "http");
    assert_eq!(config.encoder.host, "localhost");
    assert_eq!(config.encoder.port, 8765);
    assert_eq!(config.encoder.model, "vidore/colpali");
    assert_eq!(config.retrieval.top_k, 3);
    assert_eq!(config.retrieval.storage, StorageMode::Disk);
    assert!(config.converter.enabled);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.encoder.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.encoder.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.encoder.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.encoder.timeout_seconds = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retrieval.top_k = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.converter.command = "  ".to_string();
    assert!(invalid_config.validate().is_err());

    // An empty command is fine when conversion is disabled
    let mut disabled = config;
    disabled.converter.enabled = false;
    disabled.converter.command = String::new();
    assert!(disabled.validate().is_ok());
}

#[test]
fn encoder_url_generation() {
    let config = Config::default();
    let url = config
        .encoder_url()
        .expect("should generate encoder_url successfully");
    assert_eq!(url.as_str(), "http://localhost:8765/");

    let mut secure = Config::default();
    secure.encoder.protocol = "https".to_string();
    secure.encoder.host = "encoder.example.com".to_string();
    secure.encoder.port = 443;
    let url = secure
        .encoder_url()
        .expect("should generate https url successfully");
    assert_eq!(url.as_str(), "https://encoder.example.com/");
}

#[test]
fn toml_serialization() {
    let mut config = Config::default();
    config.retrieval.storage = StorageMode::Native;
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    assert!(toml_str.contains("storage = \"native\""));

    let mut parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    parsed_config.base_dir = config.base_dir.clone();
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [encoder]
        host = "gpu-box"

        [retrieval]
        top_k = 5
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.encoder.host, "gpu-box");
    assert_eq!(parsed.encoder.port, 8765);
    assert_eq!(parsed.retrieval.top_k, 5);
    assert_eq!(parsed.retrieval.storage, StorageMode::Disk);
    assert_eq!(parsed.converter, ConverterConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = EncoderConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("vidore/colqwen2".to_string()).is_ok());
    assert!(config.set_timeout_seconds(30).is_ok());
    assert!(config.set_retry_attempts(5).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_timeout_seconds(0).is_err());
    assert!(config.set_retry_attempts(11).is_err());

    let mut retrieval = RetrievalConfig::default();
    assert!(retrieval.set_top_k(10).is_ok());
    assert!(retrieval.set_top_k(0).is_err());
    assert!(retrieval.set_top_k(51).is_err());
}

#[test]
fn load_missing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("missing config should load defaults");
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.encoder, EncoderConfig::default());
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let mut config = Config::with_base_dir(temp_dir.path());
    config.encoder.host = "remote.encoder.net".to_string();
    config.retrieval.top_k = 7;
    config.save().expect("should save config");

    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path()).expect("should load saved config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[retrieval]\ntop_k = 500\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn derived_paths() {
    let config = Config::with_base_dir("/srv/doc-chat");
    assert_eq!(config.index_root(), PathBuf::from("/srv/doc-chat/index"));
    assert_eq!(config.static_root(), PathBuf::from("/srv/doc-chat/static"));
    assert_eq!(config.uploads_root(), PathBuf::from("/srv/doc-chat/uploads"));
}

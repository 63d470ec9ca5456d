#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use doc_chat::config::Config;
use doc_chat::converter::PdfOnlyConverter;
use doc_chat::encoder::{Encoder, HttpEncoder};
use doc_chat::indexer::Indexer;
use doc_chat::materialize::Materializer;
use doc_chat::retrieval::Retriever;
use doc_chat::session::{IndexBackend, SessionPaths, SessionRegistry};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn png_b64(shade: u8) -> String {
    let img = RgbImage::from_pixel(3, 3, Rgb([shade, 0, 0]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png)
        .expect("should encode png");
    STANDARD.encode(bytes.into_inner())
}

async fn mock_encoder() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/encode/document"))
        .and(body_partial_json(json!({"file_name": "manual.pdf"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pages": [
                {"image": png_b64(10), "embedding": [1.0, 0.0, 0.0]},
                {"image": png_b64(20), "embedding": [0.0, 1.0, 0.0]},
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/encode/document"))
        .and(body_partial_json(json!({"file_name": "brochure.pdf"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pages": [{"image": png_b64(30), "embedding": [0.9, 0.1, 0.0]}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/encode/document"))
        .and(body_partial_json(json!({"file_name": "corrupt.pdf"})))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/encode/query"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": [1.0, 0.0, 0.0]})),
        )
        .mount(&server)
        .await;

    server
}

fn config_for(server: &MockServer, base: &TempDir) -> Config {
    let mut config = Config::with_base_dir(base.path());
    config.encoder.host = server.address().ip().to_string();
    config.encoder.port = server.address().port();
    config.encoder.retry_attempts = 1;
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn index_then_retrieve_over_http() {
    let server = mock_encoder().await;
    let base = TempDir::new().expect("should create temp dir");
    let config = config_for(&server, &base);
    let paths = SessionPaths::from_config(&config);

    let uploads = paths.uploads_dir("s1");
    fs::create_dir_all(&uploads).expect("should create uploads");
    for name in ["manual.pdf", "brochure.pdf", "corrupt.pdf", "readme.txt"] {
        fs::write(uploads.join(name), b"%PDF-1.4").expect("should write upload");
    }

    let encoder: Arc<dyn Encoder> = Arc::new(
        HttpEncoder::new(&config)
            .expect("should create encoder")
            .with_timeout(Duration::from_secs(5)),
    );
    let indexer = Indexer::new(
        Arc::clone(&encoder),
        Arc::new(PdfOnlyConverter),
        config.index_root(),
    );

    let (index, stats) = indexer
        .index_folder(&uploads, "s1")
        .await
        .expect("should index uploads");

    assert_eq!(stats.documents_indexed, 2);
    assert_eq!(stats.documents_failed, 1);
    assert_eq!(stats.pages_indexed, 3);

    let retriever = Retriever::new(encoder, Materializer::new(config.static_root()));
    let results = retriever.retrieve(&index, "what does the manual say?", 2).await;

    assert_eq!(results.len(), 2);
    for relative in &results {
        assert!(relative.starts_with("images/s1/retrieved_"));
        let written = config.static_root().join(relative);
        let decoded = image::open(&written).expect("materialized file should be a png");
        assert_eq!(decoded.width(), 3);
    }

    // The best match is page 0 of manual.pdf, then brochure.pdf
    let first = image::open(config.static_root().join(&results[0]))
        .expect("should open")
        .to_rgb8();
    let second = image::open(config.static_root().join(&results[1]))
        .expect("should open")
        .to_rgb8();
    assert_eq!(first.get_pixel(0, 0), &Rgb([10, 0, 0]));
    assert_eq!(second.get_pixel(0, 0), &Rgb([30, 0, 0]));

    // Asking again reuses the same files
    let again = retriever.retrieve(&index, "what does the manual say?", 2).await;
    assert_eq!(results, again);
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_survive_reload_and_delete_cleanly() {
    let server = mock_encoder().await;
    let base = TempDir::new().expect("should create temp dir");
    let config = config_for(&server, &base);
    let paths = SessionPaths::from_config(&config);

    let encoder: Arc<dyn Encoder> =
        Arc::new(HttpEncoder::new(&config).expect("should create encoder"));
    let indexer = Indexer::new(
        Arc::clone(&encoder),
        Arc::new(PdfOnlyConverter),
        config.index_root(),
    );

    for session in ["alpha", "beta"] {
        let uploads = paths.uploads_dir(session);
        fs::create_dir_all(&uploads).expect("should create uploads");
        fs::write(uploads.join("manual.pdf"), b"%PDF-1.4").expect("should write upload");
        indexer
            .index_folder(&uploads, session)
            .await
            .expect("should index session");
    }

    let mut registry = SessionRegistry::load_existing(&config.index_root())
        .await
        .expect("should load sessions");
    assert_eq!(registry.ids(), vec!["alpha", "beta"]);

    let retriever = Retriever::new(encoder, Materializer::new(config.static_root()));
    let alpha = registry.get("alpha").expect("alpha loaded").clone();
    let beta = registry.get("beta").expect("beta loaded").clone();
    let IndexBackend::DiskCache(_) = &alpha.backend else {
        panic!("alpha should be a disk cache session");
    };

    let alpha_paths = retriever.retrieve(&alpha, "q", 1).await;
    let beta_paths = retriever.retrieve(&beta, "q", 1).await;
    assert_eq!(alpha_paths.len(), 1);
    assert_eq!(beta_paths.len(), 1);
    // Same bytes, separate per-session copies
    assert_ne!(alpha_paths, beta_paths);

    registry
        .delete_session("alpha", &paths)
        .await
        .expect("should delete alpha");

    assert!(!config.static_root().join(&alpha_paths[0]).exists());
    assert!(config.static_root().join(&beta_paths[0]).exists());
    assert!(!paths.index_dir("alpha").exists());
    assert!(!paths.uploads_dir("alpha").exists());

    let reloaded = SessionRegistry::load_existing(&config.index_root())
        .await
        .expect("should reload sessions");
    assert_eq!(reloaded.ids(), vec!["beta"]);
}

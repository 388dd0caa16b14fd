//! HTTP endpoint behaviour against a real listener on an ephemeral port.

mod common;

use std::fs;
use std::sync::Arc;

use campus_rag::config::{Config, IngestConfig};
use campus_rag::error::ProviderErrorKind;
use campus_rag::embedding::EmbeddingProvider;
use campus_rag::generation::AnswerGenerator;
use campus_rag::lock::BuildLock;
use campus_rag::ingest::ingest_directory;
use campus_rag::query::QueryService;
use campus_rag::rules::{RuleMatcher, FALLBACK_HINT};
use campus_rag::server::{router, AppState, ServiceState};
use campus_rag::store::InMemoryStore;
use serde_json::{json, Value};

use common::{EchoGenerator, FailingEmbedder, FailingGenerator, HashEmbedder};

async fn spawn(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn ready_service(generator: Arc<dyn AnswerGenerator>) -> QueryService {
    ready_service_with(HashEmbedder::new(), generator).await
}

/// Builds with the hash embedder, then queries with `query_embedder`.
async fn ready_service_with(
    query_embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn AnswerGenerator>,
) -> QueryService {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("library.txt"), "图书馆开放时间：8:00-22:00").unwrap();
    fs::write(dir.path().join("canteen.txt"), "食堂开放时间：6:30-20:00").unwrap();

    let store = Arc::new(InMemoryStore::new());
    let embedder = HashEmbedder::new();
    let config = IngestConfig {
        source_dir: dir.path().to_path_buf(),
        ..IngestConfig::default()
    };
    ingest_directory(store.as_ref(), embedder.as_ref(), &config, "campus", 64, false)
        .await
        .unwrap();

    QueryService::new(query_embedder, store, generator, "campus", 3)
}

async fn spawn_ready(service: QueryService) -> String {
    spawn(AppState::new(
        ServiceState::Ready(Arc::new(service)),
        RuleMatcher::default(),
        false,
    ))
    .await
}

async fn post(base: &str, path: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn get(base: &str, path: &str) -> (u16, Value) {
    let resp = reqwest::get(format!("{}{}", base, path)).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn test_ask_returns_answer_and_sources() {
    let service = ready_service(EchoGenerator::new()).await;
    let base = spawn(AppState::new(
        ServiceState::Ready(Arc::new(service)),
        RuleMatcher::default(),
        false,
    ))
    .await;

    let (status, body) = post(&base, "/ask", json!({ "question": "图书馆几点开门" })).await;
    assert_eq!(status, 200);
    assert!(body["answer"].as_str().unwrap().contains("8:00"));
    let sources = body["source_documents"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0]["source"], "library.txt");
    assert_eq!(sources[0]["content"], "图书馆开放时间：8:00-22:00");

    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "rag");
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_blank_or_malformed_question_is_bad_request() {
    let service = ready_service(EchoGenerator::new()).await;
    let base = spawn(AppState::new(
        ServiceState::Ready(Arc::new(service)),
        RuleMatcher::default(),
        false,
    ))
    .await;

    for body in [json!({ "question": "" }), json!({ "question": "   " }), json!({})] {
        let (status, resp) = post(&base, "/ask", body).await;
        assert_eq!(status, 400);
        assert_eq!(resp["error"]["code"], "bad_request");
        assert_eq!(resp["error"]["message"], "问题不能为空");
    }

    let resp = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_failed_initialization_reports_not_ready() {
    let persist = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.store.persist_dir = persist.path().join("never-built");

    let state = AppState::from_config(&config, false).await;
    let base = spawn(state).await;

    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, 503);
    assert_eq!(body["status"], "not_ready");
    assert!(body["error"].as_str().is_some());

    let (status, body) = post(&base, "/ask", json!({ "question": "图书馆几点开门" })).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "not_ready");

    // The rule table does not depend on the query service.
    let (status, body) = post(&base, "/rules/match", json!({ "question": "宿舍几点关门" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["category"], "dormitory");
}

#[tokio::test]
async fn test_provider_failures_map_to_gateway_errors() {
    let service = ready_service(Arc::new(FailingGenerator(ProviderErrorKind::Status(500)))).await;
    let base = spawn(AppState::new(
        ServiceState::Ready(Arc::new(service)),
        RuleMatcher::default(),
        false,
    ))
    .await;
    let (status, body) = post(&base, "/ask", json!({ "question": "图书馆几点开门" })).await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "provider_error");

    let service = ready_service(Arc::new(FailingGenerator(ProviderErrorKind::Timeout))).await;
    let base = spawn(AppState::new(
        ServiceState::Ready(Arc::new(service)),
        RuleMatcher::default(),
        false,
    ))
    .await;
    let (status, body) = post(&base, "/ask", json!({ "question": "图书馆几点开门" })).await;
    assert_eq!(status, 504);
    assert_eq!(body["error"]["code"], "timeout");
}

#[tokio::test]
async fn test_rule_prefilter_skips_generation() {
    let generator = EchoGenerator::new();
    let service = ready_service(generator.clone()).await;
    let base = spawn(AppState::new(
        ServiceState::Ready(Arc::new(service)),
        RuleMatcher::default(),
        true,
    ))
    .await;

    let (status, body) = post(&base, "/ask", json!({ "question": "图书馆几点开门" })).await;
    assert_eq!(status, 200);
    assert!(body["answer"]
        .as_str()
        .unwrap()
        .starts_with("图书馆开放时间：周一至周日 8:00-22:00"));
    assert_eq!(body["source_documents"], json!([]));
    assert_eq!(generator.calls(), 0);

    // No rule matches, so the query service answers.
    let (status, body) = post(&base, "/ask", json!({ "question": "开放时间是什么" })).await;
    assert_eq!(status, 200);
    assert!(!body["source_documents"].as_array().unwrap().is_empty());
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_offline_mode_answers_from_rules() {
    let base = spawn(AppState::new(ServiceState::Offline, RuleMatcher::default(), false)).await;

    let (status, body) = post(&base, "/ask", json!({ "question": "食堂在哪里" })).await;
    assert_eq!(status, 200);
    assert!(body["answer"].as_str().unwrap().starts_with("食堂信息："));
    assert_eq!(body["source_documents"], json!([]));

    let (status, body) = post(&base, "/ask", json!({ "question": "今天天气怎么样" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], FALLBACK_HINT);

    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["mode"], "offline");
}

#[tokio::test]
async fn test_rules_match_endpoint() {
    let base = spawn(AppState::new(ServiceState::Offline, RuleMatcher::default(), false)).await;

    let (status, body) = post(&base, "/rules/match", json!({ "question": "图书馆和食堂" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["category"], "library");

    let (status, body) = post(&base, "/rules/match", json!({ "question": "今天天气怎么样" })).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_embedding_failures_map_to_gateway_errors() {
    let cases = [
        (ProviderErrorKind::Timeout, 504, "timeout"),
        (ProviderErrorKind::RateLimited, 502, "provider_error"),
        (ProviderErrorKind::Status(503), 502, "provider_error"),
    ];
    for (kind, expected, code) in cases {
        let embedder = FailingEmbedder::always(kind);
        let generator = EchoGenerator::new();
        let service = ready_service_with(embedder.clone(), generator.clone()).await;
        let base = spawn_ready(service).await;

        let (status, body) = post(&base, "/ask", json!({ "question": "图书馆几点开门" })).await;
        assert_eq!(status, expected, "{:?}", kind);
        assert_eq!(body["error"]["code"], code);
        assert_eq!(embedder.calls(), 1);
        assert_eq!(generator.calls(), 0);
    }
}

#[tokio::test]
async fn test_ask_not_ready_while_build_runs() {
    let persist = tempfile::tempdir().unwrap();
    let service = ready_service(EchoGenerator::new()).await;
    let base = spawn(
        AppState::new(
            ServiceState::Ready(Arc::new(service)),
            RuleMatcher::default(),
            false,
        )
        .with_build_lock(persist.path()),
    )
    .await;

    let lock = BuildLock::acquire(persist.path()).unwrap();
    let (status, body) = post(&base, "/ask", json!({ "question": "图书馆几点开门" })).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "not_ready");
    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, 503);
    assert_eq!(body["status"], "not_ready");

    drop(lock);
    let (status, _) = post(&base, "/ask", json!({ "question": "图书馆几点开门" })).await;
    assert_eq!(status, 200);
    let (status, _) = get(&base, "/health").await;
    assert_eq!(status, 200);
}

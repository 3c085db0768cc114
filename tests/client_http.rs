//! HTTP contract tests for the external-service clients, driven against
//! mock servers.

use httpmock::prelude::*;
use serde_json::json;

use simili::config::QdrantConfig;
use simili::embedding::{EmbeddingProvider, GeminiEmbedder, OpenAiEmbedder};
use simili::github::{GithubClient, ReactionDecision};
use simili::models::Issue;
use simili::vectordb::VectorStore;

fn gh(server: &MockServer) -> GithubClient {
    GithubClient::with_base_url(server.base_url(), "test-token".to_string())
}

fn store(server: &MockServer, dims: usize) -> VectorStore {
    VectorStore::new(
        &QdrantConfig {
            url: server.base_url(),
            api_key: "qdrant-key".to_string(),
            use_grpc: false,
        },
        dims,
    )
    .unwrap()
}

#[tokio::test]
async fn post_comment_returns_echoed_id() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/web/issues/1/comments")
            .header("authorization", "Bearer test-token")
            .json_body(json!({"body": "hello"}));
        then.status(201).json_body(json!({"id": 4242}));
    });

    let id = gh(&server)
        .post_comment_with_id("acme", "web", 1, "hello")
        .await
        .unwrap();
    assert_eq!(id, 4242);
    mock.assert();
}

#[tokio::test]
async fn post_comment_falls_back_to_marker_scan_without_echo() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/repos/acme/web/issues/1/comments");
        then.status(201).body("");
    });
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/issues/1/comments");
        then.status(200).json_body(json!([
            {"id": 1, "body": "unrelated", "created_at": "2026-08-01T00:00:00Z"},
            {"id": 2, "body": "... <!-- simili-pending-action: {} --> ...", "created_at": "2026-08-01T01:00:00Z"}
        ]));
    });

    let id = gh(&server)
        .post_comment_with_id("acme", "web", 1, "body with simili-pending-action marker")
        .await
        .unwrap();
    assert_eq!(id, 2);
}

#[tokio::test]
async fn cooldown_only_counts_recent_bot_comments() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/issues/5/comments");
        then.status(200).json_body(json!([
            {"id": 1, "body": "old Simili comment", "created_at": "2020-01-01T00:00:00Z"},
            {"id": 2, "body": "human comment", "created_at": chrono::Utc::now().to_rfc3339()}
        ]));
    });

    let skip = gh(&server)
        .should_skip_comment("acme", "web", 5, 1)
        .await
        .unwrap();
    assert!(!skip, "stale bot comment and fresh human comment both pass");
}

#[tokio::test]
async fn cooldown_trips_on_fresh_bot_comment() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/issues/5/comments");
        then.status(200).json_body(json!([
            {"id": 1, "body": "🤖 Powered by Simili", "created_at": chrono::Utc::now().to_rfc3339()}
        ]));
    });

    let skip = gh(&server)
        .should_skip_comment("acme", "web", 5, 1)
        .await
        .unwrap();
    assert!(skip);
}

#[tokio::test]
async fn reaction_decision_cancel_dominates_approve() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/web/issues/comments/10/reactions");
        then.status(200).json_body(json!([
            {"content": "+1", "user": {"login": "alice"}},
            {"content": "-1", "user": {"login": "bob"}},
            {"content": "rocket", "user": {"login": "carol"}}
        ]));
    });

    let decision = gh(&server)
        .check_reaction_decision("acme", "web", 10, "+1", "-1")
        .await
        .unwrap();
    assert_eq!(decision, ReactionDecision::Cancel);
}

#[tokio::test]
async fn reaction_decision_none_without_votes() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/web/issues/comments/10/reactions");
        then.status(200)
            .json_body(json!([{"content": "eyes", "user": {"login": "alice"}}]));
    });

    let decision = gh(&server)
        .check_reaction_decision("acme", "web", 10, "+1", "-1")
        .await
        .unwrap();
    assert_eq!(decision, ReactionDecision::None);
}

#[tokio::test]
async fn transferred_marker_is_detected() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/issues/3/comments");
        then.status(200).json_body(json!([
            {"id": 1, "body": "🚚 This issue has been automatically transferred to **acme/api**", "created_at": "2026-08-01T00:00:00Z"}
        ]));
    });

    let transferred = gh(&server)
        .was_already_transferred("acme", "web", 3)
        .await
        .unwrap();
    assert!(transferred);
}

#[tokio::test]
async fn openai_embedder_sends_model_dimensions_and_auth() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/embeddings")
            .header("authorization", "Bearer embed-key")
            .json_body(json!({
                "model": "text-embedding-3-small",
                "input": ["hello"],
                "dimensions": 3
            }));
        then.status(200).json_body(json!({
            "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
        }));
    });

    let embedder = OpenAiEmbedder::with_api_base(
        server.base_url(),
        "embed-key".to_string(),
        "text-embedding-3-small".to_string(),
        3,
    );
    let vector = embedder.embed("hello").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    mock.assert();
}

#[tokio::test]
async fn openai_embedder_retries_server_errors() {
    let server = MockServer::start();
    // First hit fails, the retry succeeds; httpmock serves mocks in
    // definition order until their hit limits are reached.
    let failure = server.mock(|when, then| {
        when.method(POST).path("/v1/embeddings");
        then.status(500).body("boom");
    });

    let embedder = OpenAiEmbedder::with_api_base(
        server.base_url(),
        "embed-key".to_string(),
        "m".to_string(),
        2,
    );
    // All attempts hit the failing mock; after retries the error surfaces.
    let err = embedder.embed("hello").await.unwrap_err();
    assert!(err.to_string().contains("openai API error"));
    assert!(failure.hits() > 1, "expected at least one retry");
}

#[tokio::test]
async fn openai_embedder_rejects_wrong_dimensionality() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/embeddings");
        then.status(200).json_body(json!({
            "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3, 0.4, 0.5]}]
        }));
    });

    let embedder = OpenAiEmbedder::with_api_base(
        server.base_url(),
        "embed-key".to_string(),
        "m".to_string(),
        3,
    );
    let err = embedder.embed("hello").await.unwrap_err();
    assert!(err.to_string().contains("dimensionality mismatch"));
}

#[tokio::test]
async fn gemini_embedder_pins_output_dimensionality() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1beta/models/gemini-embedding-001:batchEmbedContents")
            .header("x-goog-api-key", "gem-key")
            .body_contains("\"outputDimensionality\":2");
        then.status(200).json_body(json!({
            "embeddings": [{"values": [0.5, -0.5]}]
        }));
    });

    let embedder = GeminiEmbedder::with_api_base(
        server.base_url(),
        "gem-key".to_string(),
        String::new(),
        2,
    );
    let vector = embedder.embed("hello").await.unwrap();
    assert_eq!(vector, vec![0.5, -0.5]);
    mock.assert();
}

#[tokio::test]
async fn ensure_collection_creates_schema_and_indexes() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/collections/acme_issues/exists");
        then.status(200).json_body(json!({"result": {"exists": false}}));
    });
    let create = server.mock(|when, then| {
        when.method(PUT)
            .path("/collections/acme_issues")
            .header("api-key", "qdrant-key")
            .json_body(json!({"vectors": {"size": 4, "distance": "Cosine"}}));
        then.status(200).json_body(json!({"result": true}));
    });
    let indexes = server.mock(|when, then| {
        when.method(PUT).path("/collections/acme_issues/index");
        then.status(200).json_body(json!({"result": {}}));
    });

    store(&server, 4)
        .ensure_collection("acme_issues")
        .await
        .unwrap();
    create.assert();
    indexes.assert_hits(5);
}

#[tokio::test]
async fn ensure_collection_is_idempotent() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/collections/acme_issues/exists");
        then.status(200).json_body(json!({"result": {"exists": true}}));
    });
    let create = server.mock(|when, then| {
        when.method(PUT).path("/collections/acme_issues");
        then.status(200).json_body(json!({"result": true}));
    });

    store(&server, 4)
        .ensure_collection("acme_issues")
        .await
        .unwrap();
    create.assert_hits(0);
}

#[tokio::test]
async fn index_creation_failure_is_not_fatal() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/collections/acme_issues/exists");
        then.status(200).json_body(json!({"result": {"exists": false}}));
    });
    server.mock(|when, then| {
        when.method(PUT).path("/collections/acme_issues");
        then.status(200).json_body(json!({"result": true}));
    });
    server.mock(|when, then| {
        when.method(PUT).path("/collections/acme_issues/index");
        then.status(500).body("index backend down");
    });

    // Collection creation succeeds even though every index call fails.
    store(&server, 4)
        .ensure_collection("acme_issues")
        .await
        .unwrap();
}

#[tokio::test]
async fn upsert_uses_deterministic_point_id() {
    let server = MockServer::start();
    let issue = Issue {
        org: "acme".to_string(),
        repo: "web".to_string(),
        number: 42,
        title: "Login broken".to_string(),
        body: "details".to_string(),
        state: "open".to_string(),
        ..Issue::default()
    };
    let expected_id = issue.uuid();

    let upsert = server.mock(move |when, then| {
        when.method(PUT)
            .path("/collections/acme_issues/points")
            .body_contains(&expected_id);
        then.status(200).json_body(json!({"result": {}}));
    });

    store(&server, 2)
        .upsert("acme_issues", &issue, &[0.1, 0.2])
        .await
        .unwrap();
    upsert.assert();
}

#[tokio::test]
async fn query_overfetches_and_applies_threshold() {
    let server = MockServer::start();
    let query = server.mock(|when, then| {
        when.method(POST)
            .path("/collections/acme_issues/points/query")
            .json_body_partial(r#"{"limit": 10, "score_threshold": 0.82}"#);
        then.status(200).json_body(json!({"result": {"points": []}}));
    });

    let results = store(&server, 2)
        .query("acme_issues", &[0.1, 0.2], 5, 0.82, 0.9, None)
        .await
        .unwrap();
    assert!(results.is_empty());
    query.assert();
}

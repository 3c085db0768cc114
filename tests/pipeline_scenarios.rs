//! End-to-end pipeline scenarios against mock HTTP servers.
//!
//! Three mock servers stand in for the external collaborators: the issue
//! host, the vector store, and the embedding provider. Each scenario
//! builds a processor wired to them and drives a real event through the
//! dispatcher or the step pipeline.

use httpmock::prelude::*;
use httpmock::Method::PATCH;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

use simili::config::{Config, MatchCondition, ProviderConfig, RepositoryConfig, TransferRule};
use simili::embedding::{FallbackEmbedder, OpenAiEmbedder};
use simili::github::GithubClient;
use simili::llm::OpenAiLlm;
use simili::models::Issue;
use simili::pending::{ActionType, PendingAction};
use simili::pipeline::{Builder, UnifiedProcessor};
use simili::triage::Agent;
use simili::vectordb::VectorStore;

const DIMS: usize = 4;

fn base_config(qdrant_url: &str, org: &str, repo: &str) -> Config {
    let mut cfg = Config::default();
    cfg.qdrant.url = qdrant_url.to_string();
    cfg.embedding.primary = ProviderConfig {
        provider: "openai".to_string(),
        model: "test-embedding".to_string(),
        api_key: "test-key".to_string(),
        dimensions: DIMS,
    };
    cfg.repositories = vec![RepositoryConfig {
        org: org.to_string(),
        repo: repo.to_string(),
        enabled: true,
        similarity_threshold: None,
        transfer_rules: vec![],
    }];
    cfg
}

fn processor(
    cfg: Config,
    gh_server: &MockServer,
    embed_server: &MockServer,
    agent: Option<Arc<Agent>>,
) -> UnifiedProcessor {
    let gh = Arc::new(GithubClient::with_base_url(
        gh_server.base_url(),
        "test-token".to_string(),
    ));
    let embedder = Arc::new(FallbackEmbedder::new(
        Box::new(OpenAiEmbedder::with_api_base(
            embed_server.base_url(),
            "test-key".to_string(),
            "test-embedding".to_string(),
            DIMS,
        )),
        None,
    ));
    let vdb = Arc::new(VectorStore::new(&cfg.qdrant, DIMS).unwrap());

    UnifiedProcessor::new(
        Arc::new(cfg),
        gh.clone(),
        gh,
        vdb,
        embedder,
        agent,
        false,
        true,
    )
}

fn agent_for(cfg: &Config, llm_server: &MockServer) -> Arc<Agent> {
    let llm = OpenAiLlm::with_api_base(
        llm_server.base_url(),
        "test-key".to_string(),
        "test-model".to_string(),
    );
    Arc::new(Agent::new(cfg, Arc::new(llm)))
}

fn mock_embedding(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(POST).path("/v1/embeddings");
        then.status(200).json_body(json!({
            "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3, 0.4]}]
        }));
    })
}

fn mock_collection_exists<'a>(server: &'a MockServer, org: &str) -> httpmock::Mock<'a> {
    let path = format!("/collections/{}_issues/exists", org);
    server.mock(move |when, then| {
        when.method(GET).path(path);
        then.status(200).json_body(json!({"result": {"exists": true}}));
    })
}

fn query_point(org: &str, repo: &str, number: u64, state: &str, score: f64) -> serde_json::Value {
    json!({
        "id": simili::models::issue_uuid(org, repo, number),
        "score": score,
        "payload": {
            "org": org,
            "repo": repo,
            "number": number,
            "title": format!("issue {}", number),
            "state": state,
            "author": "someone",
            "url": format!("https://github.example/{}/{}/issues/{}", org, repo, number),
            "labels": []
        }
    })
}

fn opened_issue(org: &str, repo: &str, number: u64, title: &str, labels: &[&str]) -> Issue {
    Issue {
        org: org.to_string(),
        repo: repo.to_string(),
        number,
        title: title.to_string(),
        body: "A body long enough to describe the problem in reasonable detail for tests."
            .to_string(),
        state: "open".to_string(),
        labels: labels.iter().map(|s| s.to_string()).collect(),
        author: "reporter".to_string(),
        url: format!("https://github.example/{}/{}/issues/{}", org, repo, number),
        created_at: None,
        updated_at: None,
    }
}

fn write_event_file(payload: &serde_json::Value) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(payload.to_string().as_bytes()).unwrap();
    file
}

// S1: a bot comment within the cooldown window short-circuits the pipeline
// before any vector store or embedding call.
#[tokio::test]
async fn cooldown_skips_pipeline_without_external_calls() {
    let gh_server = MockServer::start();
    let qdrant_server = MockServer::start();
    let embed_server = MockServer::start();

    let comments = gh_server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/issues/42/comments");
        then.status(200).json_body(json!([{
            "id": 1,
            "body": "## 🤖 Issue Intelligence Summary\n...\n<sub>🤖 Powered by Simili</sub>",
            "created_at": chrono::Utc::now().to_rfc3339()
        }]));
    });
    let exists = mock_collection_exists(&qdrant_server, "acme");
    let embedding = mock_embedding(&embed_server);

    let cfg = base_config(&qdrant_server.base_url(), "acme", "web");
    let proc = processor(cfg, &gh_server, &embed_server, None);

    let result = proc
        .process_issue(opened_issue("acme", "web", 42, "Login broken", &[]))
        .await
        .unwrap();

    assert!(result.skipped);
    assert_eq!(result.skip_reason, "cooldown active");
    comments.assert();
    exists.assert_hits(0);
    embedding.assert_hits(0);
}

// S2: similar issues found, no transfer rule. The closed 0.93 result is
// re-weighted to 0.837 and ranks below the open 0.88; the unified comment
// is posted and the issue is indexed.
#[tokio::test]
async fn similar_found_posts_comment_and_indexes() {
    let gh_server = MockServer::start();
    let qdrant_server = MockServer::start();
    let embed_server = MockServer::start();

    gh_server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/issues/43/comments");
        then.status(200).json_body(json!([]));
    });
    let comment_post = gh_server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/web/issues/43/comments")
            .body_contains("Related Issues");
        then.status(201).json_body(json!({"id": 9001}));
    });

    mock_collection_exists(&qdrant_server, "acme");
    let query = qdrant_server.mock(|when, then| {
        when.method(POST).path("/collections/acme_issues/points/query");
        then.status(200).json_body(json!({
            "result": {"points": [
                query_point("acme", "web", 11, "closed", 0.93),
                query_point("acme", "web", 10, "open", 0.88),
            ]}
        }));
    });
    let upsert = qdrant_server.mock(|when, then| {
        when.method(PUT).path("/collections/acme_issues/points");
        then.status(200).json_body(json!({"result": {}}));
    });

    mock_embedding(&embed_server);

    let cfg = base_config(&qdrant_server.base_url(), "acme", "web");
    let proc = processor(cfg, &gh_server, &embed_server, None);

    let event = write_event_file(&json!({
        "action": "opened",
        "issue": {
            "number": 43,
            "title": "Login page broken after update",
            "body": "Steps to reproduce: open the login page after updating to the latest build.",
            "state": "open",
            "html_url": "https://github.example/acme/web/issues/43",
            "user": {"login": "reporter"},
            "labels": []
        },
        "repository": {"owner": {"login": "acme"}, "name": "web", "full_name": "acme/web"}
    }));
    let result = proc.process_event(event.path()).await.unwrap();

    assert!(!result.skipped);
    assert_eq!(result.similar_found.len(), 2);
    // Open 0.88 outranks closed 0.93 * 0.9 = 0.837.
    assert_eq!(result.similar_found[0].issue.number, 10);
    assert!((result.similar_found[0].score - 0.88).abs() < 1e-6);
    assert_eq!(result.similar_found[1].issue.number, 11);
    assert!((result.similar_found[1].score - 0.837).abs() < 1e-6);
    assert!(result.comment_posted);
    assert!(result.indexed);

    comment_post.assert();
    query.assert();
    upsert.assert();
}

// S3: a transfer rule matches by priority; the transfer executes
// immediately (delayed actions disabled), duplicate detection does not
// run, the old vector is deleted, and the issue is not re-indexed.
#[tokio::test]
async fn transfer_match_executes_and_skips_duplicate_and_indexing() {
    let gh_server = MockServer::start();
    let qdrant_server = MockServer::start();
    let embed_server = MockServer::start();
    let llm_server = MockServer::start();

    gh_server.mock(|when, then| {
        when.method(GET).path("/repos/acme/intake/issues/7/comments");
        then.status(200).json_body(json!([]));
    });
    let comment_posts = gh_server.mock(|when, then| {
        when.method(POST).path("/repos/acme/intake/issues/7/comments");
        then.status(201).json_body(json!({"id": 100}));
    });
    let target_repo = gh_server.mock(|when, then| {
        when.method(GET).path("/repos/acme/api");
        then.status(200).json_body(json!({"full_name": "acme/api"}));
    });
    let issue_node = gh_server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .body_contains("issue(number: $number)");
        then.status(200)
            .json_body(json!({"data": {"repository": {"issue": {"id": "ISSUE_NODE"}}}}));
    });
    let repo_node = gh_server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .body_contains("repository(owner: $owner, name: $repo) { id }");
        then.status(200)
            .json_body(json!({"data": {"repository": {"id": "REPO_NODE"}}}));
    });
    let transfer_mutation = gh_server.mock(|when, then| {
        when.method(POST).path("/graphql").body_contains("transferIssue");
        then.status(200)
            .json_body(json!({"data": {"transferIssue": {"issue": {"number": 99}}}}));
    });
    let remove_label = gh_server.mock(|when, then| {
        when.method(DELETE)
            .path("/repos/acme/intake/issues/7/labels/pending-transfer");
        then.status(200).json_body(json!([]));
    });

    mock_collection_exists(&qdrant_server, "acme");
    qdrant_server.mock(|when, then| {
        when.method(POST).path("/collections/acme_issues/points/query");
        then.status(200).json_body(json!({
            "result": {"points": [query_point("acme", "intake", 2, "open", 0.97)]}
        }));
    });
    let vector_delete = qdrant_server.mock(|when, then| {
        when.method(POST).path("/collections/acme_issues/points/delete");
        then.status(200).json_body(json!({"result": {}}));
    });
    let upsert = qdrant_server.mock(|when, then| {
        when.method(PUT).path("/collections/acme_issues/points");
        then.status(200).json_body(json!({"result": {}}));
    });

    mock_embedding(&embed_server);

    let mut cfg = base_config(&qdrant_server.base_url(), "acme", "intake");
    cfg.repositories[0].transfer_rules = vec![
        TransferRule {
            r#match: MatchCondition {
                labels: vec!["api".to_string()],
                ..MatchCondition::default()
            },
            target: "acme/api".to_string(),
            priority: 1,
        },
        TransferRule {
            r#match: MatchCondition {
                title_contains: vec!["frontend".to_string()],
                ..MatchCondition::default()
            },
            target: "acme/web".to_string(),
            priority: 2,
        },
    ];
    // Duplicate detection is enabled but must be pre-empted by the
    // transfer even though the search returns a 0.97 match.
    cfg.triage.enabled = true;
    cfg.triage.duplicate.enabled = true;

    let agent = agent_for(&cfg, &llm_server);
    let proc = processor(cfg, &gh_server, &embed_server, Some(agent));

    let result = proc
        .process_issue(opened_issue("acme", "intake", 7, "frontend bug", &["api"]))
        .await
        .unwrap();

    // Priority 1 beats priority 2 despite both matching.
    assert_eq!(result.transfer_target, "acme/api");
    assert!(result.transferred);
    assert!(!result.indexed);
    let triage = result.triage_result.expect("triage ran");
    assert!(triage.duplicate.is_none(), "transfer pre-empts duplicate");

    // Unified comment + transfer comment.
    comment_posts.assert_hits(2);
    target_repo.assert();
    issue_node.assert();
    repo_node.assert();
    transfer_mutation.assert();
    remove_label.assert();
    vector_delete.assert();
    upsert.assert_hits(0);
}

// S4: a 0.97 open match with auto_close_threshold 0.95 schedules a
// pending close: the unified comment carries the marker metadata, the
// pending-close label is attached, and the indexer is skipped.
#[tokio::test]
async fn duplicate_above_threshold_schedules_pending_close() {
    let gh_server = MockServer::start();
    let qdrant_server = MockServer::start();
    let embed_server = MockServer::start();
    let llm_server = MockServer::start();

    gh_server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/issues/50/comments");
        then.status(200).json_body(json!([]));
    });
    let comment_post = gh_server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/web/issues/50/comments")
            .body_contains("simili-pending-action");
        then.status(201).json_body(json!({"id": 321}));
    });
    let pending_label = gh_server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/web/issues/50/labels")
            .json_body(json!({"labels": ["pending-close"]}));
        then.status(200).json_body(json!([]));
    });
    let duplicate_label = gh_server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/web/issues/50/labels")
            .json_body(json!({"labels": ["duplicate"]}));
        then.status(200).json_body(json!([]));
    });

    mock_collection_exists(&qdrant_server, "acme");
    qdrant_server.mock(|when, then| {
        when.method(POST).path("/collections/acme_issues/points/query");
        then.status(200).json_body(json!({
            "result": {"points": [query_point("acme", "web", 10, "open", 0.97)]}
        }));
    });
    let upsert = qdrant_server.mock(|when, then| {
        when.method(PUT).path("/collections/acme_issues/points");
        then.status(200).json_body(json!({"result": {}}));
    });

    mock_embedding(&embed_server);

    let mut cfg = base_config(&qdrant_server.base_url(), "acme", "web");
    cfg.triage.enabled = true;
    cfg.triage.duplicate.enabled = true;
    cfg.defaults.delayed_actions.enabled = true;

    let agent = agent_for(&cfg, &llm_server);
    let proc = processor(cfg, &gh_server, &embed_server, Some(agent));

    let result = proc
        .process_issue(opened_issue("acme", "web", 50, "Login page broken", &[]))
        .await
        .unwrap();

    let pending = result.pending_action.expect("pending close proposed");
    assert_eq!(pending.action_type, ActionType::Close);
    assert_eq!(pending.target, "https://github.example/acme/web/issues/10");

    let triage = result.triage_result.expect("triage ran");
    let dup = triage.duplicate.expect("duplicate detected");
    assert!(dup.is_duplicate);
    assert!(dup.should_close);

    assert!(!result.indexed);
    upsert.assert_hits(0);
    comment_post.assert();
    pending_label.assert();
    duplicate_label.assert();
}

// S5: both reactions present on the marker comment; cancel wins. The
// pending label is removed, a cancellation comment is posted, and no
// transfer happens.
#[tokio::test]
async fn cancel_reaction_dominates_approve() {
    let gh_server = MockServer::start();
    let qdrant_server = MockServer::start();
    let embed_server = MockServer::start();

    let marker = PendingAction {
        action_type: ActionType::Transfer,
        org: "acme".to_string(),
        repo: "web".to_string(),
        issue_number: 8,
        target: "acme/api".to_string(),
        comment_id: 555,
        scheduled_at: chrono::Utc::now(),
        expires_at: chrono::Utc::now() + chrono::Duration::hours(12),
    };
    let marker_body = simili::pending::format_metadata(&marker).unwrap();

    gh_server.mock(move |when, then| {
        when.method(GET).path("/repos/acme/web/issues/8/comments");
        then.status(200).json_body(json!([{
            "id": 555,
            "body": format!("⚠️ transfer proposed\n\n{}", marker_body),
            "created_at": "2026-08-01T00:00:00Z"
        }]));
    });
    let reactions = gh_server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/web/issues/comments/555/reactions");
        then.status(200).json_body(json!([
            {"content": "+1", "user": {"login": "alice"}},
            {"content": "-1", "user": {"login": "bob"}}
        ]));
    });
    let remove_label = gh_server.mock(|when, then| {
        when.method(DELETE)
            .path("/repos/acme/web/issues/8/labels/pending-transfer");
        then.status(200).json_body(json!([]));
    });
    let cancel_comment = gh_server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/web/issues/8/comments")
            .body_contains("cancelled");
        then.status(201).json_body(json!({"id": 600}));
    });
    let graphql = gh_server.mock(|when, then| {
        when.method(POST).path("/graphql");
        then.status(200).json_body(json!({}));
    });

    let mut cfg = base_config(&qdrant_server.base_url(), "acme", "web");
    cfg.defaults.delayed_actions.enabled = true;

    let proc = processor(cfg, &gh_server, &embed_server, None);

    let event = write_event_file(&json!({
        "action": "created",
        "issue": {
            "number": 8,
            "title": "routed issue",
            "body": "",
            "state": "open",
            "html_url": "https://github.example/acme/web/issues/8",
            "user": {"login": "reporter"},
            "labels": [{"name": "pending-transfer"}]
        },
        "repository": {"owner": {"login": "acme"}, "name": "web", "full_name": "acme/web"},
        "comment": {"id": 900, "body": "any update?"}
    }));
    let result = proc.process_event(event.path()).await.unwrap();

    assert!(!result.skipped);
    reactions.assert();
    remove_label.assert();
    cancel_comment.assert();
    graphql.assert_hits(0);
}

// S6: an expired pending close with no reactions executes: duplicate
// label, close with reason not_planned, pending label removed.
#[tokio::test]
async fn expired_pending_close_executes() {
    let gh_server = MockServer::start();
    let qdrant_server = MockServer::start();
    let embed_server = MockServer::start();

    let marker = PendingAction {
        action_type: ActionType::Close,
        org: "acme".to_string(),
        repo: "web".to_string(),
        issue_number: 9,
        target: "https://github.example/acme/web/issues/2".to_string(),
        comment_id: 777,
        scheduled_at: chrono::Utc::now() - chrono::Duration::hours(30),
        expires_at: chrono::Utc::now() - chrono::Duration::hours(6),
    };
    let marker_body = simili::pending::format_metadata(&marker).unwrap();

    gh_server.mock(move |when, then| {
        when.method(GET).path("/repos/acme/web/issues/9/comments");
        then.status(200).json_body(json!([{
            "id": 777,
            "body": marker_body,
            "created_at": "2026-07-31T00:00:00Z"
        }]));
    });
    gh_server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/issues/9");
        then.status(200).json_body(json!({
            "number": 9,
            "title": "dup",
            "body": "",
            "state": "open",
            "html_url": "https://github.example/acme/web/issues/9",
            "user": {"login": "reporter"},
            "labels": [{"name": "pending-close"}]
        }));
    });
    gh_server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/web/issues/comments/777/reactions");
        then.status(200).json_body(json!([]));
    });
    let duplicate_label = gh_server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/web/issues/9/labels")
            .json_body(json!({"labels": ["duplicate"]}));
        then.status(200).json_body(json!([]));
    });
    let close = gh_server.mock(|when, then| {
        when.method(PATCH)
            .path("/repos/acme/web/issues/9")
            .body_contains("not_planned");
        then.status(200).json_body(json!({}));
    });
    let remove_label = gh_server.mock(|when, then| {
        when.method(DELETE)
            .path("/repos/acme/web/issues/9/labels/pending-close");
        then.status(200).json_body(json!([]));
    });

    let mut cfg = base_config(&qdrant_server.base_url(), "acme", "web");
    cfg.defaults.delayed_actions.enabled = true;

    let proc = processor(cfg, &gh_server, &embed_server, None);

    let event = write_event_file(&json!({
        "action": "created",
        "issue": {
            "number": 9,
            "title": "dup",
            "body": "",
            "state": "open",
            "html_url": "https://github.example/acme/web/issues/9",
            "user": {"login": "reporter"},
            "labels": [{"name": "pending-close"}]
        },
        "repository": {"owner": {"login": "acme"}, "name": "web", "full_name": "acme/web"},
        "comment": {"id": 901, "body": "bump"}
    }));
    let result = proc.process_event(event.path()).await.unwrap();

    assert_eq!(result.actions_executed, 1);
    duplicate_label.assert();
    close.assert();
    remove_label.assert();
}

// S6 follow-up: once the issue is closed, reconciliation only removes the
// pending label. No second close is attempted.
#[tokio::test]
async fn already_closed_pending_close_is_a_noop() {
    let gh_server = MockServer::start();
    let qdrant_server = MockServer::start();
    let embed_server = MockServer::start();

    let marker = PendingAction {
        action_type: ActionType::Close,
        org: "acme".to_string(),
        repo: "web".to_string(),
        issue_number: 9,
        target: "https://github.example/acme/web/issues/2".to_string(),
        comment_id: 777,
        scheduled_at: chrono::Utc::now() - chrono::Duration::hours(30),
        expires_at: chrono::Utc::now() - chrono::Duration::hours(6),
    };
    let marker_body = simili::pending::format_metadata(&marker).unwrap();

    gh_server.mock(move |when, then| {
        when.method(GET).path("/repos/acme/web/issues/9/comments");
        then.status(200).json_body(json!([{
            "id": 777,
            "body": marker_body,
            "created_at": "2026-07-31T00:00:00Z"
        }]));
    });
    gh_server.mock(|when, then| {
        when.method(GET).path("/repos/acme/web/issues/9");
        then.status(200).json_body(json!({
            "number": 9,
            "title": "dup",
            "body": "",
            "state": "closed",
            "html_url": "https://github.example/acme/web/issues/9",
            "user": {"login": "reporter"},
            "labels": [{"name": "pending-close"}]
        }));
    });
    let close = gh_server.mock(|when, then| {
        when.method(PATCH).path("/repos/acme/web/issues/9");
        then.status(200).json_body(json!({}));
    });
    let remove_label = gh_server.mock(|when, then| {
        when.method(DELETE)
            .path("/repos/acme/web/issues/9/labels/pending-close");
        then.status(200).json_body(json!([]));
    });

    let mut cfg = base_config(&qdrant_server.base_url(), "acme", "web");
    cfg.defaults.delayed_actions.enabled = true;

    let proc = processor(cfg, &gh_server, &embed_server, None);

    let issue = Issue {
        labels: vec!["pending-close".to_string()],
        ..opened_issue("acme", "web", 9, "dup", &[])
    };
    let result = proc.process_comment_event(&issue).await.unwrap();

    assert_eq!(result.actions_executed, 1);
    close.assert_hits(0);
    remove_label.assert();
}

// A deleted issue removes its point from the org collection.
#[tokio::test]
async fn deleted_event_removes_vector() {
    let gh_server = MockServer::start();
    let qdrant_server = MockServer::start();
    let embed_server = MockServer::start();

    let delete = qdrant_server.mock(|when, then| {
        when.method(POST)
            .path("/collections/acme_issues/points/delete")
            .body_contains(&simili::models::issue_uuid("acme", "web", 77));
        then.status(200).json_body(json!({"result": {}}));
    });

    let cfg = base_config(&qdrant_server.base_url(), "acme", "web");
    let proc = processor(cfg, &gh_server, &embed_server, None);

    let event = write_event_file(&json!({
        "action": "deleted",
        "issue": {
            "number": 77,
            "title": "gone",
            "body": "",
            "state": "open",
            "html_url": "https://github.example/acme/web/issues/77",
            "user": {"login": "reporter"},
            "labels": []
        },
        "repository": {"owner": {"login": "acme"}, "name": "web", "full_name": "acme/web"}
    }));
    let result = proc.process_event(event.path()).await.unwrap();

    assert!(result.indexed);
    delete.assert();
}

// Configuration-driven reordering rejects unknown step names.
#[tokio::test]
async fn unknown_step_name_is_a_build_error() {
    let gh_server = MockServer::start();
    let qdrant_server = MockServer::start();
    let embed_server = MockServer::start();

    let mut cfg = base_config(&qdrant_server.base_url(), "acme", "web");
    cfg.pipeline.steps = vec!["gatekeeper".to_string(), "bogus_step".to_string()];

    let gh = Arc::new(GithubClient::with_base_url(
        gh_server.base_url(),
        "test-token".to_string(),
    ));
    let embedder = Arc::new(FallbackEmbedder::new(
        Box::new(OpenAiEmbedder::with_api_base(
            embed_server.base_url(),
            "test-key".to_string(),
            "test-embedding".to_string(),
            DIMS,
        )),
        None,
    ));
    let vdb = Arc::new(VectorStore::new(&cfg.qdrant, DIMS).unwrap());

    let builder = Builder::new(
        Arc::new(cfg),
        gh.clone(),
        gh,
        vdb,
        embedder,
        None,
        false,
        true,
    );
    let err = builder.build_from_config().unwrap_err();
    assert!(err.to_string().contains("unknown step: bogus_step"));
    assert_eq!(builder.build_default().len(), 8);
}

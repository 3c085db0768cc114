//! Issue-host API client.
//!
//! A thin reqwest wrapper over the host's REST endpoints (comments, labels,
//! issues, reactions) plus the GraphQL mutation used for issue transfer.
//! One long-lived client is created at startup and shared by reference; it
//! is safe for concurrent use.
//!
//! Idempotency against the host is substring-based rather than
//! transactional: a completed transfer is recognized by the
//! `"automatically transferred to"` phrase in a prior comment, and the
//! cooldown check looks for recent comments carrying the bot signature.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::Issue;

/// Marker present in every comment the bot posts; used for cooldown checks.
pub const BOT_SIGNATURE: &str = "Simili";

/// Phrase that marks a completed transfer in a prior comment.
pub const TRANSFERRED_MARKER: &str = "automatically transferred to";

const DEFAULT_API_BASE: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    graphql_url: String,
    token: String,
}

/// Issue as returned by the REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiIssue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub labels: Vec<ApiLabel>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reaction {
    /// One of `+1`, `-1`, `laugh`, `confused`, `heart`, `hooray`, `rocket`, `eyes`.
    pub content: String,
    #[serde(default)]
    pub user: Option<ApiUser>,
}

/// Outcome of a reaction scan on a marker comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionDecision {
    Approve,
    Cancel,
    None,
}

impl ApiIssue {
    pub fn to_model(&self, org: &str, repo: &str) -> Issue {
        Issue {
            org: org.to_string(),
            repo: repo.to_string(),
            number: self.number,
            title: self.title.clone(),
            body: self.body.clone().unwrap_or_default(),
            state: self.state.clone(),
            labels: self.labels.iter().map(|l| l.name.clone()).collect(),
            author: self
                .user
                .as_ref()
                .map(|u| u.login.clone())
                .unwrap_or_default(),
            url: self.html_url.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Options for listing issues from a repository.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// `"open"`, `"closed"`, or `"all"` (default).
    pub state: Option<String>,
    pub per_page: Option<usize>,
    pub page: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

/// Splits `"owner/repo"` into its two parts.
pub fn parse_repo(full_repo: &str) -> Result<(String, String)> {
    let mut parts = full_repo.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(org), Some(repo)) if !org.is_empty() && !repo.is_empty() => {
            Ok((org.to_string(), repo.to_string()))
        }
        _ => bail!("invalid repo format: {} (expected owner/repo)", full_repo),
    }
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

impl GithubClient {
    /// Creates a client authenticated from `GITHUB_TOKEN` (or `GH_TOKEN`).
    pub fn new() -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("GH_TOKEN"))
            .map_err(|_| anyhow::anyhow!("GITHUB_TOKEN environment variable not set"))?;
        Ok(Self::with_token(token))
    }

    /// Creates a client with an explicit token, e.g. an elevated transfer
    /// token distinct from the bot identity.
    pub fn with_token(token: String) -> Self {
        Self::with_base_url(DEFAULT_API_BASE, token)
    }

    /// Creates a client against an arbitrary API base URL.
    pub fn with_base_url(api_base: impl Into<String>, token: String) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        let graphql_url = format!("{}/graphql", api_base);
        Self {
            http: reqwest::Client::new(),
            api_base,
            graphql_url,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "simili")
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        bail!(
            "{} failed: HTTP {}: {}",
            what,
            status,
            truncate_for_error(&body, 300)
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .with_context(|| format!("{}: request error", what))?;
        let response = Self::check(response, what).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("{}: invalid response body", what))
    }

    // ---- comments ----

    pub async fn list_comments(&self, org: &str, repo: &str, number: u64) -> Result<Vec<Comment>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let path = format!(
                "repos/{}/{}/issues/{}/comments?per_page={}&page={}",
                org, repo, number, PER_PAGE, page
            );
            let comments: Vec<Comment> = self.get_json(&path, "list comments").await?;
            let count = comments.len();
            all.extend(comments);
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    pub async fn post_comment(&self, org: &str, repo: &str, number: u64, body: &str) -> Result<()> {
        self.post_comment_with_id(org, repo, number, body).await?;
        Ok(())
    }

    /// Posts a comment and returns its server-assigned id.
    ///
    /// The id comes from the creation response; if the host does not echo
    /// it, falls back to listing comments and taking the most recent one
    /// whose body contains the posted text's marker substring.
    pub async fn post_comment_with_id(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64> {
        let path = format!("repos/{}/{}/issues/{}/comments", org, repo, number);
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({ "body": body }))
            .send()
            .await
            .context("post comment: request error")?;
        let response = Self::check(response, "post comment").await?;

        let created: Value = response.json().await.unwrap_or(Value::Null);
        if let Some(id) = created.get("id").and_then(Value::as_u64) {
            return Ok(id);
        }

        let comments = self.list_comments(org, repo, number).await?;
        comments
            .iter()
            .rev()
            .find(|c| c.body.contains(crate::pending::METADATA_MARKER))
            .map(|c| c.id)
            .ok_or_else(|| anyhow::anyhow!("failed to find posted comment"))
    }

    /// Returns true when a bot comment exists within the cooldown window.
    pub async fn should_skip_comment(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        cooldown_hours: i64,
    ) -> Result<bool> {
        let comments = self.list_comments(org, repo, number).await?;
        let cutoff = Utc::now() - Duration::hours(cooldown_hours);

        Ok(comments.iter().any(|c| {
            c.body.contains(BOT_SIGNATURE) && c.created_at.is_some_and(|at| at > cutoff)
        }))
    }

    /// Returns true when a prior comment marks this issue as transferred.
    pub async fn was_already_transferred(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<bool> {
        let comments = self.list_comments(org, repo, number).await?;
        Ok(comments.iter().any(|c| c.body.contains(TRANSFERRED_MARKER)))
    }

    // ---- labels and issue state ----

    pub async fn add_labels(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let path = format!("repos/{}/{}/issues/{}/labels", org, repo, number);
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({ "labels": labels }))
            .send()
            .await
            .context("add labels: request error")?;
        Self::check(response, "add labels").await?;
        Ok(())
    }

    pub async fn remove_label(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<()> {
        let path = format!("repos/{}/{}/issues/{}/labels/{}", org, repo, number, label);
        let response = self
            .request(reqwest::Method::DELETE, &path)
            .send()
            .await
            .context("remove label: request error")?;
        Self::check(response, "remove label").await?;
        Ok(())
    }

    pub async fn close_issue(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        reason: &str,
    ) -> Result<()> {
        let path = format!("repos/{}/{}/issues/{}", org, repo, number);
        let mut payload = json!({ "state": "closed" });
        if !reason.is_empty() {
            payload["state_reason"] = json!(reason);
        }
        let response = self
            .request(reqwest::Method::PATCH, &path)
            .json(&payload)
            .send()
            .await
            .context("close issue: request error")?;
        Self::check(response, "close issue").await?;
        Ok(())
    }

    // ---- issues ----

    pub async fn get_issue(&self, org: &str, repo: &str, number: u64) -> Result<Issue> {
        let path = format!("repos/{}/{}/issues/{}", org, repo, number);
        let issue: ApiIssue = self.get_json(&path, "get issue").await?;
        Ok(issue.to_model(org, repo))
    }

    /// Lists one page of issues.
    ///
    /// The host's issues list endpoint also returns pull requests and this
    /// payload carries no reliable discriminator, so every returned item is
    /// treated as an issue; the extra entries are tolerable noise for
    /// similarity search.
    pub async fn list_issues(
        &self,
        org: &str,
        repo: &str,
        opts: &ListOptions,
    ) -> Result<Vec<Issue>> {
        let state = opts.state.as_deref().unwrap_or("all");
        let per_page = opts.per_page.unwrap_or(PER_PAGE);
        let page = opts.page.unwrap_or(1);

        let mut path = format!(
            "repos/{}/{}/issues?state={}&per_page={}&page={}&sort=updated&direction=desc",
            org, repo, state, per_page, page
        );
        if let Some(since) = opts.since {
            path.push_str(&format!("&since={}", since.to_rfc3339()));
        }

        let api_issues: Vec<ApiIssue> = self.get_json(&path, "list issues").await?;
        Ok(api_issues.iter().map(|i| i.to_model(org, repo)).collect())
    }

    /// Fetches every issue via pagination.
    pub async fn list_all_issues(
        &self,
        org: &str,
        repo: &str,
        state: &str,
        batch_size: usize,
    ) -> Result<Vec<Issue>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let issues = self
                .list_issues(
                    org,
                    repo,
                    &ListOptions {
                        state: Some(state.to_string()),
                        per_page: Some(batch_size),
                        page: Some(page),
                        since: None,
                    },
                )
                .await?;
            let count = issues.len();
            all.extend(issues);
            if count < batch_size {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    /// Lists open issues carrying a specific label, with pagination.
    pub async fn list_issues_by_label(
        &self,
        org: &str,
        repo: &str,
        label: &str,
    ) -> Result<Vec<Issue>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let path = format!(
                "repos/{}/{}/issues?labels={}&state=open&per_page={}&page={}&sort=updated&direction=desc",
                org, repo, label, PER_PAGE, page
            );
            let api_issues: Vec<ApiIssue> = self.get_json(&path, "list issues by label").await?;
            let count = api_issues.len();
            all.extend(api_issues.iter().map(|i| i.to_model(org, repo)));
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    pub async fn repo_exists(&self, org: &str, repo: &str) -> Result<bool> {
        let path = format!("repos/{}/{}", org, repo);
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .context("check repo: request error")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response, "check repo").await?;
        Ok(true)
    }

    // ---- reactions ----

    pub async fn list_comment_reactions(
        &self,
        org: &str,
        repo: &str,
        comment_id: u64,
    ) -> Result<Vec<Reaction>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let path = format!(
                "repos/{}/{}/issues/comments/{}/reactions?per_page={}&page={}",
                org, repo, comment_id, PER_PAGE, page
            );
            let reactions: Vec<Reaction> = self.get_json(&path, "list reactions").await?;
            let count = reactions.len();
            all.extend(reactions);
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    /// Maps reactions on a marker comment to a three-valued decision.
    /// Cancel takes precedence over approve when both are present.
    pub async fn check_reaction_decision(
        &self,
        org: &str,
        repo: &str,
        comment_id: u64,
        approve_reaction: &str,
        cancel_reaction: &str,
    ) -> Result<ReactionDecision> {
        let reactions = self.list_comment_reactions(org, repo, comment_id).await?;

        let has_cancel = reactions.iter().any(|r| r.content == cancel_reaction);
        let has_approve = reactions.iter().any(|r| r.content == approve_reaction);

        if has_cancel {
            Ok(ReactionDecision::Cancel)
        } else if has_approve {
            Ok(ReactionDecision::Approve)
        } else {
            Ok(ReactionDecision::None)
        }
    }

    // ---- transfer (GraphQL) ----

    async fn graphql(&self, query: &str, variables: Value, what: &str) -> Result<Value> {
        let response = self
            .http
            .post(&self.graphql_url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "simili")
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .with_context(|| format!("{}: request error", what))?;
        let response = Self::check(response, what).await?;
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("{}: invalid response body", what))?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                bail!("{} failed: {}", what, errors[0]);
            }
        }
        Ok(body)
    }

    async fn issue_node_id(&self, org: &str, repo: &str, number: u64) -> Result<String> {
        let query = "query($owner: String!, $repo: String!, $number: Int!) {\n  repository(owner: $owner, name: $repo) { issue(number: $number) { id } }\n}";
        let body = self
            .graphql(
                query,
                json!({ "owner": org, "repo": repo, "number": number }),
                "get issue node id",
            )
            .await?;
        body.pointer("/data/repository/issue/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("issue node id missing from response"))
    }

    async fn repo_node_id(&self, org: &str, repo: &str) -> Result<String> {
        let query = "query($owner: String!, $repo: String!) {\n  repository(owner: $owner, name: $repo) { id }\n}";
        let body = self
            .graphql(
                query,
                json!({ "owner": org, "repo": repo }),
                "get repo node id",
            )
            .await?;
        body.pointer("/data/repository/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("repository node id missing from response"))
    }

    /// Transfers an issue to `target_repo` (`"org/repo"`).
    ///
    /// Requires a token with write access to both repositories; permission
    /// failures surface as an HTTP/GraphQL error naming the operation.
    pub async fn transfer_issue(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        target_repo: &str,
    ) -> Result<()> {
        let (target_org, target_name) = parse_repo(target_repo)?;

        let issue_id = self.issue_node_id(org, repo, number).await?;
        let repo_id = self.repo_node_id(&target_org, &target_name).await?;

        let mutation = "mutation($issueId: ID!, $repositoryId: ID!) {\n  transferIssue(input: {issueId: $issueId, repositoryId: $repositoryId}) { issue { number } }\n}";
        self.graphql(
            mutation,
            json!({ "issueId": issue_id, "repositoryId": repo_id }),
            "transfer issue",
        )
        .await?;
        Ok(())
    }
}

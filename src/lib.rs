//! # Simili
//!
//! **An issue intelligence bot: semantic duplicate detection, triage, and
//! rule-based routing for issue trackers.**
//!
//! Simili reacts to issue events from a code-hosting platform. When an
//! issue is opened it searches the org's indexed issues for semantic
//! neighbors, classifies the issue (labels, quality, duplicate), optionally
//! routes it to another repository via configurable rules, and responds
//! with one consolidated comment. Destructive operations (transfer, close
//! as duplicate) can be deferred and voted on with reactions.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────────────────────────┐   ┌──────────┐
//! │ Event     │──▶│ Pipeline                          │──▶│ Vector   │
//! │ (webhook  │   │ gatekeeper → search → rules →     │   │ store    │
//! │  payload) │   │ triage → respond → act → index    │   │ (Qdrant) │
//! └───────────┘   └────────────────┬──────────────────┘   └──────────┘
//!                                  │
//!                                  ▼
//!                         ┌────────────────┐
//!                         │ Issue host API │  comments, labels,
//!                         │                │  reactions, transfers
//!                         └────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. **Events** ([`event`]) are parsed from webhook payload files and
//!    dispatched by the [`pipeline`]: opened issues run the full step
//!    pipeline, edits re-index, deletions remove the vector, and comments
//!    trigger pending-action reconciliation.
//! 2. The **embedding gateway** ([`embedding`]) turns the issue's
//!    canonical text into a vector, with provider fallback.
//! 3. The **vector store adapter** ([`vectordb`]) keeps one collection per
//!    org, keyed by each issue's deterministic UUID ([`models`]).
//! 4. **Similarity search** ([`similarity`]), **transfer rules**
//!    ([`rules`]), and **triage** ([`triage`]) fill a shared context.
//! 5. The results land in one unified comment; side effects either execute
//!    or become **pending actions** ([`pending`], [`transfer`]) resolved
//!    later by reactions or expiry.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | YAML configuration: env expansion, defaults, validation |
//! | [`models`] | `Issue`, deterministic UUIDs, body hashes |
//! | [`event`] | Webhook payload parsing and classification |
//! | [`github`] | Issue-host REST/GraphQL client |
//! | [`embedding`] | Embedding providers (gemini/openai) with fallback |
//! | [`llm`] | LLM completion providers for triage |
//! | [`vectordb`] | Qdrant adapter: collections, upserts, weighted queries |
//! | [`similarity`] | Similarity finder and the `search` command |
//! | [`rules`] | Transfer rule matcher |
//! | [`pending`] | Pending-action model, marker comments, label scans |
//! | [`transfer`] | Transfer scheduling, reconciliation, execution |
//! | [`triage`] | Classifier, quality checker, duplicate decider, actions |
//! | [`pipeline`] | Step engine, unified processor, event dispatcher |
//! | [`indexer`] | Bulk indexing and sync re-indexing |

pub mod config;
pub mod embedding;
pub mod event;
pub mod github;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod pending;
pub mod pipeline;
pub mod rules;
pub mod similarity;
pub mod transfer;
pub mod triage;
pub mod vectordb;

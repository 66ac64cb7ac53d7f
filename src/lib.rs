//! # Revision Timeline
//!
//! Builds timelines of LLM-generated reverse outlines from a document's
//! revision history, as asynchronous jobs on interchangeable cloud backends.
//!
//! The same pipeline runs against AWS, Azure, or a local environment: a
//! [`provider::ProviderContext`] picks the secret store and job state store
//! for the configured provider once at startup and hands them out to
//! whatever needs them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌─────────────┐
//! │  Revisions   │──▶│ TimelineBuilder │──▶│ LlmService  │──▶ OpenAI / Ollama
//! │ (JSON file)  │   │  fan-out+retry  │   │ schema check│
//! └──────────────┘   └────────┬────────┘   └──────┬──────┘
//!                             │                   │ API key
//!                             ▼                   ▼
//!                    ┌─────────────────┐   ┌─────────────┐
//!                    │  JobStateStore  │   │ SecretStore │
//!                    │ SQLite/DynamoDB │   │ env/AWS/AZ  │
//!                    └─────────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rtl init                                         # create the local job table
//! rtl build doc-42 --revisions revisions.json      # run a timeline job
//! rtl status 6f1c…                                 # inspect a job
//! rtl validate request.json                        # check an LLM request
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Jobs, revisions, timelines |
//! | [`error`] | Error types |
//! | [`provider`] | Cloud provider selection and capability table |
//! | [`secrets`] | Secret stores |
//! | [`jobs`] | Job state stores |
//! | [`llm`] | LLM request contract and chat services |
//! | [`timeline`] | Timeline building |
//! | [`revisions`] | Revision sources |
//! | [`retry`] | Exponential backoff |
//! | [`sigv4`] | Signed AWS JSON API client |
//! | [`logging`] | Log subscriber setup |

pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod logging;
pub mod models;
pub mod provider;
pub mod retry;
pub mod revisions;
pub mod secrets;
pub mod sigv4;
pub mod timeline;

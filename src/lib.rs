//! # Lejechat
//!
//! Site-scoped question answering. Each imported website lives in its own
//! namespace of a shared document index; a question about that site is
//! answered by a language model grounded only in the site's own pages.
//!
//! ## Architecture
//!
//! ```text
//!  question + namespace
//!          │
//!          ▼
//! ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ NamespaceRetriever│──▶│ ContextAssembler │──▶│  ProviderChain   │
//! │  3-tier fallback  │   │ sources + context│   │ OpenAI/Groq/Anth.│
//! └────────┬─────────┘   └──────────────────┘   └────────┬─────────┘
//!          │                                             │
//!     DocumentIndex                              answer / fragments
//!   (Upstash Search)                                     │
//!                                                        ▼
//!                     ┌────────────────────────────────────────────┐
//!                     │ HTTP: /api/lejechat/query  (JSON, 8:/0:)   │
//!                     │       /v1/chat/completions (JSON, SSE)     │
//!                     └────────────────────────────────────────────┘
//! ```
//!
//! Site metadata (slug, quick prompts, homepage details) is kept by a
//! [`storage::Storage`] over Redis, a JSON file, or memory.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment fallbacks |
//! | [`models`] | Core data types |
//! | [`error`] | Classified failure types |
//! | [`storage`] | Site metadata persistence |
//! | [`index`] | Document index boundary (Upstash Search, local) |
//! | [`retriever`] | Namespace-scoped retrieval ladder |
//! | [`context`] | Context and source assembly |
//! | [`llm`] | Language-model providers |
//! | [`stream`] | Line protocol and OpenAI event-stream transcoding |
//! | [`pipeline`] | Per-request orchestration |
//! | [`import`] | Indexing of crawled pages |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod import;
pub mod index;
pub mod llm;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod quick_prompts;
pub mod retriever;
pub mod server;
pub mod storage;
pub mod stream;

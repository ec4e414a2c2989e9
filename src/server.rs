//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/lejechat/query` | Answer a question about one site (JSON or line stream) |
//! | `POST` | `/v1/chat/completions` | OpenAI-compatible chat completion (`model = "lejechat-{namespace}"`) |
//! | `GET`  | `/api/lejechat/meta/{slug}` | Site metadata by public slug |
//! | `PUT`  | `/api/lejechat/meta/{slug}/quick-prompts` | Replace the site's quick prompts |
//! | `GET`  | `/api/lejechat/indexes` | All recorded sites, newest first |
//! | `DELETE` | `/api/lejechat/indexes/{namespace}` | Forget a site's metadata |
//! | `GET`  | `/api/lejechat/debug/model` | Provider availability |
//! | `POST` | `/api/lejechat/debug/prompt` | Send `{ "message" }` to the active provider |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Native endpoints answer errors as `{ "error": "message" }`. The
//! OpenAI-compatible endpoint uses the OpenAI shape:
//!
//! ```json
//! { "error": { "message": "…", "type": "invalid_request_error", "code": 400 } }
//! ```
//!
//! Soft failures (no indexed content, no provider, thin context, provider
//! errors on the native endpoint) are not HTTP errors: they come back as a
//! normal answer whose text explains the problem.
//!
//! # CORS
//!
//! Any origin; methods `GET, POST, PUT, DELETE, OPTIONS`; headers
//! `Content-Type, Authorization, X-Use-Groq, X-Use-OpenAI`; preflight cached
//! for 24 hours.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::index::open_index;
use crate::llm::{GenerationOptions, Prompt, ProviderChain, ProviderSummary};
use crate::models::{last_user_message, Message, SiteIndexMetadata, Source};
use crate::pipeline::{Answer, AnswerStream, Outcome, QueryPipeline, QueryRequest};
use crate::storage::{select_backend, Storage, StorageOutcome};
use crate::stream::ChatStreamTranscoder;

/// Prefix that turns a namespace into a compat-endpoint model name.
pub const MODEL_PREFIX: &str = "lejechat-";

const MISSING_QUERY: &str = "Spørgsmål og navnerum er påkrævet";
const INVALID_MODEL: &str = "Ugyldigt modelnavn. Brug formatet: lejechat-<domæne>";
const NOT_FOUND: &str = "Chatbot ikke fundet";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<QueryPipeline>,
    storage: Storage,
}

impl AppState {
    pub fn new(pipeline: QueryPipeline, storage: Storage) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            storage,
        }
    }

    /// Open the index, provider chain, and storage backend described by
    /// `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let index = open_index(&config.index)?;
        let providers = ProviderChain::from_config(&config.ai)?;
        let storage = select_backend(&config.storage)?;
        let pipeline = QueryPipeline::new(
            index,
            providers,
            &config.search,
            GenerationOptions::from_config(&config.ai),
        );
        Ok(Self::new(pipeline, storage))
    }

    pub fn pipeline(&self) -> &QueryPipeline {
        &self.pipeline
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn providers(&self) -> &ProviderChain {
        self.pipeline.providers()
    }
}

/// Build the router with every endpoint and the CORS layer.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-use-groq"),
            HeaderName::from_static("x-use-openai"),
        ])
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/api/lejechat/query", post(handle_query))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/api/lejechat/meta/{slug}", get(handle_get_meta))
        .route(
            "/api/lejechat/meta/{slug}/quick-prompts",
            put(handle_put_quick_prompts),
        )
        .route("/api/lejechat/indexes", get(handle_list_indexes))
        .route("/api/lejechat/indexes/{namespace}", delete(handle_delete_index))
        .route("/api/lejechat/debug/model", get(handle_debug_model))
        .route("/api/lejechat/debug/prompt", post(handle_debug_prompt))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve on an already-bound listener until the process is terminated.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Starts the HTTP server on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let summary = state.providers().summary();
    tracing::info!(
        bind = %config.server.bind,
        provider = summary.active.as_deref().unwrap_or("none"),
        storage = state.storage().kind().as_str(),
        "lejechat server listening"
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    serve(listener, state).await
}

// ============ Error response ============

enum ErrorShape {
    /// `{ "error": "message" }`
    Native,
    /// `{ "error": { "message", "type", "code" } }`
    OpenAi { kind: &'static str },
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    shape: ErrorShape,
    message: String,
}

#[derive(Serialize)]
struct NativeErrorBody {
    error: String,
}

#[derive(Serialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Serialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    code: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.shape {
            ErrorShape::Native => {
                (self.status, Json(NativeErrorBody { error: self.message })).into_response()
            }
            ErrorShape::OpenAi { kind } => {
                let body = OpenAiErrorBody {
                    error: OpenAiErrorDetail {
                        message: self.message,
                        kind,
                        code: self.status.as_u16(),
                    },
                };
                (self.status, Json(body)).into_response()
            }
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        shape: ErrorShape::Native,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        shape: ErrorShape::Native,
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        shape: ErrorShape::Native,
        message: message.into(),
    }
}

fn invalid_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        shape: ErrorShape::OpenAi {
            kind: "invalid_request_error",
        },
        message: message.into(),
    }
}

fn server_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        shape: ErrorShape::OpenAi {
            kind: "server_error",
        },
        message: message.into(),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/lejechat/query ============

#[derive(Deserialize)]
struct QueryBody {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    stream: bool,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    sources: Vec<Source>,
}

/// Handler for `POST /api/lejechat/query`.
///
/// `query` falls back to the last `user` message. Streaming answers use the
/// line protocol described in [`crate::stream`].
async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body.map_err(|_| bad_request(MISSING_QUERY))?;

    let query = non_blank(body.query.as_deref())
        .or_else(|| non_blank(last_user_message(&body.messages)))
        .ok_or_else(|| bad_request(MISSING_QUERY))?;
    let namespace =
        non_blank(body.namespace.as_deref()).ok_or_else(|| bad_request(MISSING_QUERY))?;

    let request = QueryRequest {
        query: query.to_string(),
        namespace: namespace.to_string(),
    };

    if body.stream {
        let lines = state
            .pipeline
            .answer_stream(&request)
            .await
            .into_events()
            .map(|event| Ok::<_, Infallible>(event.encode()));
        return Ok((
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            )],
            Body::from_stream(lines),
        )
            .into_response());
    }

    let answer = state.pipeline.answer(&request).await;
    Ok(Json(QueryResponse {
        answer: answer.answer,
        sources: answer.sources,
    })
    .into_response())
}

// ============ POST /v1/chat/completions ============

#[derive(Deserialize)]
struct ChatCompletionBody {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stream: bool,
}

#[derive(Serialize)]
struct ChatCompletion {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChatChoice>,
}

#[derive(Serialize)]
struct ChatChoice {
    index: u32,
    message: ChatMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// The namespace encoded in a `lejechat-{namespace}` model name.
pub fn namespace_from_model(model: &str) -> Option<&str> {
    model
        .strip_prefix(MODEL_PREFIX)
        .filter(|ns| !ns.trim().is_empty())
}

/// `answer` followed by a markdown list of its sources.
fn with_source_list(answer: String, sources: &[Source]) -> String {
    if sources.is_empty() {
        return answer;
    }
    let list: Vec<String> = sources
        .iter()
        .map(|s| format!("- [{}]({})", s.title, s.url))
        .collect();
    format!("{}\n\n**Kilder:**\n{}", answer, list.join("\n"))
}

/// Handler for `POST /v1/chat/completions`.
async fn handle_chat_completions(
    State(state): State<AppState>,
    body: Result<Json<ChatCompletionBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body.map_err(|e| invalid_request(e.body_text()))?;

    let model = body.model.unwrap_or_default();
    let namespace = namespace_from_model(&model).ok_or_else(|| invalid_request(INVALID_MODEL))?;
    let query = non_blank(last_user_message(&body.messages))
        .ok_or_else(|| invalid_request(MISSING_QUERY))?;

    let request = QueryRequest {
        query: query.to_string(),
        namespace: namespace.to_string(),
    };

    if body.stream {
        // Failures known before the first fragment still get a status code.
        let answer = match state.pipeline.answer_stream(&request).await {
            AnswerStream::Settled(Answer {
                outcome: Outcome::GenerationFailed(_),
                answer,
                ..
            }) => return Err(server_error(answer)),
            other => other,
        };
        let lines = answer
            .into_events()
            .map(|event| Ok::<_, Infallible>(event.encode()));
        let events = ChatStreamTranscoder::new(model.as_str())
            .transcode(lines)
            .map(Ok::<_, Infallible>);
        return Ok((
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/event-stream"),
                ),
                (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            ],
            Body::from_stream(events),
        )
            .into_response());
    }

    let answer = state.pipeline.answer(&request).await;
    if let Outcome::GenerationFailed(_) = answer.outcome {
        return Err(server_error(answer.answer));
    }

    let now = chrono::Utc::now();
    let completion = ChatCompletion {
        id: format!("chatcmpl-{}", now.timestamp_millis()),
        object: "chat.completion",
        created: now.timestamp(),
        model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant",
                content: with_source_list(answer.answer, &answer.sources),
            },
            finish_reason: "stop",
        }],
    };
    Ok(Json(completion).into_response())
}

// ============ Site metadata ============

#[derive(Serialize)]
struct IndexResponse {
    index: SiteIndexMetadata,
}

#[derive(Serialize)]
struct IndexListResponse {
    indexes: Vec<SiteIndexMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuickPromptsBody {
    #[serde(default)]
    quick_prompts: Vec<String>,
}

async fn handle_get_meta(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<IndexResponse>, AppError> {
    let index = state
        .storage
        .find_by_slug(&slug)
        .await
        .ok_or_else(|| not_found(NOT_FOUND))?;
    Ok(Json(IndexResponse { index }))
}

/// Handler for `PUT /api/lejechat/meta/{slug}/quick-prompts`.
///
/// The stored list is normalized, so the response always carries three
/// prompts regardless of how many were sent.
async fn handle_put_quick_prompts(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    body: Result<Json<QuickPromptsBody>, JsonRejection>,
) -> Result<Json<IndexResponse>, AppError> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    let index = state
        .storage
        .find_by_slug(&slug)
        .await
        .ok_or_else(|| not_found(NOT_FOUND))?;

    match state
        .storage
        .update_quick_prompts(&index.namespace, &body.quick_prompts)
        .await
    {
        StorageOutcome::Saved => {}
        StorageOutcome::Missing => return Err(not_found(NOT_FOUND)),
        StorageOutcome::Failed(_) => return Err(internal("Kunne ikke gemme hurtige spørgsmål")),
    }

    let updated = state
        .storage
        .get_index(&index.namespace)
        .await
        .ok_or_else(|| not_found(NOT_FOUND))?;
    Ok(Json(IndexResponse { index: updated }))
}

async fn handle_list_indexes(State(state): State<AppState>) -> Json<IndexListResponse> {
    Json(IndexListResponse {
        indexes: state.storage.get_indexes().await,
    })
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    namespace: String,
}

async fn handle_delete_index(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    match state.storage.delete_index(&namespace).await {
        StorageOutcome::Failed(_) => Err(internal("Kunne ikke slette indeks")),
        StorageOutcome::Saved | StorageOutcome::Missing => Ok(Json(DeleteResponse {
            success: true,
            namespace,
        })),
    }
}

// ============ Debug ============

async fn handle_debug_model(State(state): State<AppState>) -> Json<ProviderSummary> {
    Json(state.providers().summary())
}

#[derive(Deserialize)]
struct PingBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct PingResponse {
    success: bool,
    provider: String,
    answer: String,
}

/// Handler for `POST /api/lejechat/debug/prompt`.
///
/// Sends the message straight to the active provider without retrieval.
async fn handle_debug_prompt(
    State(state): State<AppState>,
    body: Result<Json<PingBody>, JsonRejection>,
) -> Result<Json<PingResponse>, AppError> {
    let message = body
        .ok()
        .and_then(|Json(b)| b.message)
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| bad_request("Angiv et testspørgsmål via { \"message\": \"...\" }"))?;

    let model = state.providers().active().ok_or_else(|| {
        bad_request(
            "Ingen AI-udbyder er aktiveret. Kontrollér OPENAI_API_KEY, GROQ_API_KEY eller ANTHROPIC_API_KEY.",
        )
    })?;

    let prompt = Prompt::ping(&message, state.pipeline.options().clone());
    match model.generate(&prompt).await {
        Ok(answer) => Ok(Json(PingResponse {
            success: true,
            provider: model.name().to_string(),
            answer: answer.trim().to_string(),
        })),
        Err(e) => {
            tracing::error!(provider = model.name(), error = %e, "connectivity check failed");
            Err(internal(e.to_string()))
        }
    }
}

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};
use tower_http::services::ServeDir;

use crate::{
    compare::{ComparisonEvent, ComparisonState, Comparator},
    config::Config,
    credentials::CredentialStore,
    db::SqliteStore,
    history::HistoryStore,
    llm::LlmClient,
    models::{self, HistoryEntry, ModelOption, ModelSelection, ProviderKind},
    storage::KeyValueStore,
    telemetry,
};

type ApiError = (StatusCode, String);

/**
 * \brief 路由共享状态：键值存储与 Provider 客户端。
 */
pub struct AppState {
    pub store: Arc<dyn KeyValueStore>,
    pub client: LlmClient,
}

/**
 * \brief 启动本地 HTTP 服务：静态页面加 JSON/SSE 接口。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str, config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.db_path)?;
    telemetry::load(&store)?;
    let state = Arc::new(AppState {
        store: Arc::new(store),
        client: LlmClient::new(config)?,
    });

    let static_service = get_service(
        ServeDir::new(&config.ui_dir).append_index_html_on_directories(true),
    );
    let app = router(state).fallback_service(static_service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief API 路由（不含静态文件回退）。
 */
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/settings", get(get_settings).post(save_settings))
        .route("/api/models", get(list_models))
        .route("/api/compare", post(compare))
        .route("/api/compare/sse", get(compare_sse))
        .route("/api/history", get(list_history))
        .route("/api/history/{id}", get(get_history_entry))
        .route("/api/health", get(health_check))
        .with_state(state)
}

#[derive(Serialize, Deserialize, Debug)]
struct SettingsView {
    gemini_key: Option<String>,
    groq_key: Option<String>,
    gemini_key_set: bool,
    groq_key_set: bool,
    telemetry_enabled: bool,
}

#[derive(Deserialize, Debug)]
struct SettingsInput {
    #[serde(default)]
    gemini_api_key: Option<String>,
    #[serde(default)]
    groq_api_key: Option<String>,
    #[serde(default)]
    telemetry_enabled: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct CompareRequest {
    prompt: String,
    #[serde(default)]
    gemini_model: Option<String>,
    #[serde(default)]
    groq_model: Option<String>,
}

#[derive(Serialize, Debug)]
struct ProviderModels {
    default: &'static str,
    models: &'static [ModelOption],
}

#[derive(Serialize, Debug)]
struct ModelsResponse {
    gemini: ProviderModels,
    groq: ProviderModels,
}

#[derive(Deserialize, Debug)]
struct HistoryQuery {
    /** \brief 可选的 prompt 过滤词。 */
    q: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct HistoryResponse {
    entries: Vec<HistoryEntry>,
}

fn settings_view(store: &dyn KeyValueStore) -> Result<SettingsView> {
    let creds = CredentialStore::new(store);
    let gemini_key = creds.masked(ProviderKind::Gemini)?;
    let groq_key = creds.masked(ProviderKind::Groq)?;
    Ok(SettingsView {
        gemini_key_set: gemini_key.is_some(),
        groq_key_set: groq_key.is_some(),
        gemini_key,
        groq_key,
        telemetry_enabled: telemetry::is_enabled(),
    })
}

/**
 * \brief 返回密钥是否已保存（打码）及遥测开关。
 */
async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<SettingsView>, ApiError> {
    let view = settings_view(&*state.store).map_err(internal_err)?;
    Ok(Json(view))
}

/**
 * \brief 保存请求中提供的密钥与遥测开关。
 */
async fn save_settings(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SettingsInput>,
) -> Result<Json<SettingsView>, ApiError> {
    let store = &*state.store;
    let creds = CredentialStore::new(store);
    if let Some(key) = input.gemini_api_key.as_deref() {
        creds.set(ProviderKind::Gemini, key).map_err(internal_err)?;
    }
    if let Some(key) = input.groq_api_key.as_deref() {
        creds.set(ProviderKind::Groq, key).map_err(internal_err)?;
    }
    if let Some(enabled) = input.telemetry_enabled {
        telemetry::save(store, enabled).map_err(internal_err)?;
    }
    telemetry::log_event("server.settings", "keys saved");
    let view = settings_view(store).map_err(internal_err)?;
    Ok(Json(view))
}

async fn list_models() -> Json<ModelsResponse> {
    let entry = |kind| ProviderModels {
        default: models::default_model(kind),
        models: models::catalog(kind),
    };
    Json(ModelsResponse {
        gemini: entry(ProviderKind::Gemini),
        groq: entry(ProviderKind::Groq),
    })
}

/**
 * \brief 执行一次对比并返回最终状态。
 */
async fn compare(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompareRequest>,
) -> Json<ComparisonState> {
    let selection = ModelSelection::with_overrides(req.gemini_model, req.groq_model);
    let result = Comparator::new(&state.client, &*state.store)
        .run(&req.prompt, &selection, None)
        .await;
    Json(result)
}

/**
 * \brief 以 SSE 推送对比过程：GET /api/compare/sse?prompt=...
 */
async fn compare_sse(
    State(state): State<Arc<AppState>>,
    Query(req): Query<CompareRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel::<ComparisonEvent>();
    let selection = ModelSelection::with_overrides(req.gemini_model, req.groq_model);

    tokio::spawn(async move {
        Comparator::new(&state.client, &*state.store)
            .run(&req.prompt, &selection, Some(tx))
            .await;
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let name = match &event {
            ComparisonEvent::Started { .. } => "started",
            ComparisonEvent::ProviderFinished { .. } => "provider",
            ComparisonEvent::Completed { .. } => "completed",
            ComparisonEvent::Blocked { .. } => "blocked",
        };
        Event::default().event(name).json_data(&event)
    });
    Sse::new(stream).keep_alive(KeepAlive::new())
}

/**
 * \brief 历史列表（最新在前），可按 prompt 过滤。
 */
async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = HistoryStore::new(&*state.store);
    let entries = match q.q.as_deref() {
        Some(term) => history.search(term),
        None => history.list(),
    }
    .map_err(internal_err)?;
    Ok(Json(HistoryResponse { entries }))
}

async fn get_history_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<HistoryEntry>, ApiError> {
    HistoryStore::new(&*state.store)
        .get(&id)
        .map_err(internal_err)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("history entry {} not found", id)))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

fn internal_err<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

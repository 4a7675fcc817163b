use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

use crate::compare::{self, CompareSpec};
use crate::config::Config;
use crate::error::{DashboardError, Result};
use crate::export::{self, ExportFormat};
use crate::format::{self, FormatOption};
use crate::loader;
use crate::session::{SESSION_COOKIE, SessionHandle, SessionStore, lock};
use crate::snippet;
use crate::suggest::{
    self, CompletionTransport, HttpTransport, OperationKind, Suggestion, SuggestionGenerator,
};
use crate::table::{PREVIEW_ROWS, Table, TablePreview};

/// Most rows returned inline for a result table; downloads carry all rows.
const RESPONSE_ROWS: usize = 1000;

pub struct AppState<T> {
    pub sessions: SessionStore,
    pub generator: SuggestionGenerator<T>,
    pub config: Config,
}

impl<T: CompletionTransport> AppState<T> {
    pub fn new(transport: T, config: Config) -> Self {
        AppState {
            sessions: SessionStore::new(),
            generator: SuggestionGenerator::new(transport, &config),
            config,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = match &self {
            DashboardError::TableNotFound(_) => StatusCode::NOT_FOUND,
            DashboardError::Network(_) | DashboardError::Http { .. } => StatusCode::BAD_GATEWAY,
            DashboardError::Export(_) | DashboardError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };
        if self.is_user_error() {
            log::warn!("{}", self);
        } else {
            log::error!("{}", self);
        }
        (
            status,
            Json(StatusResponse {
                status: "error".to_string(),
                message: Some(self.to_string()),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct TableSummary {
    name: String,
    #[serde(flatten)]
    preview: TablePreview,
}

#[derive(Serialize)]
struct UploadReport {
    file: String,
    status: String,
    message: Option<String>,
    rows: Option<usize>,
    columns: Option<usize>,
}

#[derive(Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum CompareMode {
    #[default]
    Mismatches,
    Discrepancies,
    All,
}

#[derive(Deserialize)]
struct CompareRequest {
    left: String,
    right: String,
    #[serde(flatten)]
    spec: CompareSpec,
    #[serde(default)]
    mode: CompareMode,
}

#[derive(Deserialize)]
struct FormatRequest {
    table: String,
    column: String,
    option: FormatOption,
}

#[derive(Deserialize)]
struct FormulaRequest {
    table: String,
    snippet: String,
}

#[derive(Deserialize)]
struct SuggestRequest {
    request: String,
    kind: OperationKind,
}

#[derive(Deserialize)]
struct ExecuteRequest {
    snippet: Option<String>,
    kind: Option<OperationKind>,
}

#[derive(Deserialize)]
struct ExportQuery {
    filename: Option<String>,
    #[serde(default)]
    format: ExportFormat,
}

type Reply = Result<(CookieJar, Json<Value>)>;

/// Build the dashboard router around `state`
pub fn router<T: CompletionTransport + 'static>(state: Arc<AppState<T>>) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(serve_dashboard))
        .route("/api/upload", post(upload::<T>))
        .route("/api/tables", get(list_tables::<T>))
        .route("/api/tables/:name/export", get(export_table::<T>))
        .route("/api/compare", post(compare_tables::<T>))
        .route("/api/format", post(format_column::<T>))
        .route("/api/formula", post(apply_formula::<T>))
        .route("/api/suggest", post(suggest_snippet::<T>))
        .route("/api/execute", post(execute_snippet::<T>))
        .route("/api/export", get(export_result::<T>))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

/// Start the web server
///
/// # Arguments
/// * `config` - Settings read from the environment
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Runs until the server stops
pub async fn run(config: Config) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let transport = HttpTransport::new(config.suggest_timeout)?;
    if config.api_key.is_none() {
        log::warn!("OPENROUTER_API_KEY is not set; suggestions will fail until it is");
    }
    let addr = config.addr.clone();
    let app = router(Arc::new(AppState::new(transport, config)));

    let listener = TcpListener::bind(&addr).await?;
    log::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(include_str!("./static/dashboard.html"))
}

// Resolve the caller's session, issuing a cookie for a new one
fn resolve_session<T>(state: &AppState<T>, jar: CookieJar) -> (CookieJar, SessionHandle) {
    let current = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let (id, handle, created) = state.sessions.get_or_create(current.as_deref());
    let jar = if created {
        jar.add(Cookie::build((SESSION_COOKIE, id)).path("/").http_only(true))
    } else {
        jar
    };
    (jar, handle)
}

fn table_json(table: &Table) -> TablePreview {
    table.preview(RESPONSE_ROWS)
}

async fn upload<T: CompletionTransport>(
    State(state): State<Arc<AppState<T>>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Reply {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DashboardError::InvalidRequest(e.to_string()))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DashboardError::InvalidRequest(e.to_string()))?;
        files.push((file_name, bytes));
    }
    if files.is_empty() {
        return Err(DashboardError::InvalidRequest(
            "No file data received".to_string(),
        ));
    }

    let (jar, handle) = resolve_session(&state, jar);
    let mut session = lock(&handle);
    let mut reports = Vec::with_capacity(files.len());
    for (file_name, bytes) in files {
        match loader::load_table(&file_name, &bytes) {
            Ok(table) => {
                log::info!(
                    "uploaded '{}': {} rows x {} columns",
                    file_name,
                    table.row_count(),
                    table.column_count()
                );
                reports.push(UploadReport {
                    file: file_name.clone(),
                    status: "ok".to_string(),
                    message: None,
                    rows: Some(table.row_count()),
                    columns: Some(table.column_count()),
                });
                session.registry.insert(file_name, table);
            }
            Err(e) => {
                log::warn!("{}", e);
                reports.push(UploadReport {
                    file: file_name,
                    status: "error".to_string(),
                    message: Some(e.to_string()),
                    rows: None,
                    columns: None,
                });
            }
        }
    }

    let body = json!({
        "status": "ok",
        "files": reports,
        "tables": session.registry.names(),
        "ready": session.registry.is_ready(),
    });
    Ok((jar, Json(body)))
}

async fn list_tables<T: CompletionTransport>(
    State(state): State<Arc<AppState<T>>>,
    jar: CookieJar,
) -> Reply {
    let (jar, handle) = resolve_session(&state, jar);
    let session = lock(&handle);
    let tables: Vec<TableSummary> = session
        .registry
        .iter()
        .map(|(name, table)| TableSummary {
            name: name.clone(),
            preview: table.preview(PREVIEW_ROWS),
        })
        .collect();
    let body = json!({
        "status": "ok",
        "tables": tables,
        "ready": session.registry.is_ready(),
        "has_result": session.last_result.is_some(),
    });
    Ok((jar, Json(body)))
}

async fn compare_tables<T: CompletionTransport>(
    State(state): State<Arc<AppState<T>>>,
    jar: CookieJar,
    Json(request): Json<CompareRequest>,
) -> Reply {
    let (jar, handle) = resolve_session(&state, jar);
    let mut session = lock(&handle);
    session.registry.ensure_ready()?;

    let left = session.registry.get(&request.left)?;
    let right = session.registry.get(&request.right)?;
    let result = compare::compare(
        (&request.left, left),
        (&request.right, right),
        &request.spec,
    )?;

    let (table, message) = match request.mode {
        CompareMode::Mismatches => {
            let table = result.mismatches();
            let message = format!("Found {} difference(s).", table.row_count());
            (table, message)
        }
        CompareMode::Discrepancies => {
            let table = result.discrepancies();
            let message = format!(
                "Found {} row(s) present in only one file.",
                table.row_count()
            );
            (table, message)
        }
        CompareMode::All => (
            result.to_table(),
            format!(
                "Compared {} row(s), {} difference(s).",
                result.len(),
                result.mismatch_count()
            ),
        ),
    };

    let body = json!({
        "status": "ok",
        "message": message,
        "compared": result.len(),
        "mismatches": result.mismatch_count(),
        "table": table_json(&table),
    });
    session.last_result = Some(table);
    Ok((jar, Json(body)))
}

async fn format_column<T: CompletionTransport>(
    State(state): State<Arc<AppState<T>>>,
    jar: CookieJar,
    Json(request): Json<FormatRequest>,
) -> Reply {
    let (jar, handle) = resolve_session(&state, jar);
    let mut session = lock(&handle);
    session.registry.ensure_ready()?;

    let table = session.registry.get_mut(&request.table)?;
    if !table.has_column(&request.column) {
        return Err(table.missing_column(&request.column, &request.table));
    }
    format::format_column(table, &request.column, request.option)?;
    let formatted = table.clone();
    log::info!(
        "formatted column '{}' of '{}' with {:?}",
        request.column,
        request.table,
        request.option
    );

    let body = json!({
        "status": "ok",
        "message": format!("Formatted column '{}'.", request.column),
        "table": table_json(&formatted),
    });
    session.last_result = Some(formatted);
    Ok((jar, Json(body)))
}

async fn apply_formula<T: CompletionTransport>(
    State(state): State<Arc<AppState<T>>>,
    jar: CookieJar,
    Json(request): Json<FormulaRequest>,
) -> Reply {
    let (jar, handle) = resolve_session(&state, jar);
    let mut session = lock(&handle);
    session.registry.ensure_ready()?;

    let outcome = snippet::execute(&request.snippet, &mut session.registry, Some(&request.table))?;
    let table = session.registry.get(&request.table)?.clone();

    let message = if outcome.output.is_empty() {
        "Formula applied!".to_string()
    } else {
        outcome.message()
    };
    let body = json!({
        "status": "ok",
        "message": message,
        "table": table_json(&table),
    });
    session.last_result = Some(table);
    Ok((jar, Json(body)))
}

async fn suggest_snippet<T: CompletionTransport>(
    State(state): State<Arc<AppState<T>>>,
    jar: CookieJar,
    Json(request): Json<SuggestRequest>,
) -> Reply {
    let (jar, handle) = resolve_session(&state, jar);
    let description = {
        let session = lock(&handle);
        session.registry.ensure_ready()?;
        suggest::describe_tables(&session.registry)
    };

    let suggestion = state
        .generator
        .suggest(&request.request, request.kind, &description)
        .await;

    lock(&handle)
        .suggestions
        .insert(request.kind, suggestion.clone());
    Ok((jar, Json(json!(suggestion))))
}

async fn execute_snippet<T: CompletionTransport>(
    State(state): State<Arc<AppState<T>>>,
    jar: CookieJar,
    Json(request): Json<ExecuteRequest>,
) -> Reply {
    let (jar, handle) = resolve_session(&state, jar);
    let mut session = lock(&handle);
    session.registry.ensure_ready()?;

    let code = match (request.snippet, request.kind) {
        (Some(code), _) if !code.trim().is_empty() => code,
        (_, Some(kind)) => match session.suggestions.get(&kind) {
            Some(Suggestion::Snippet { code }) => code.clone(),
            _ => {
                return Err(DashboardError::InvalidRequest(format!(
                    "No {:?} suggestion to run; generate one first",
                    kind
                )));
            }
        },
        _ => {
            return Err(DashboardError::InvalidRequest(
                "Provide a snippet or the kind of a generated suggestion".to_string(),
            ));
        }
    };

    let outcome = snippet::execute(&code, &mut session.registry, None)?;
    let body = json!({
        "status": "ok",
        "output": outcome.message(),
        "updated": outcome.updated,
        "result": outcome.result.as_ref().map(table_json),
    });
    if let Some(result) = outcome.result {
        session.last_result = Some(result);
    }
    Ok((jar, Json(body)))
}

fn download(table: &Table, file_name: &str, format: ExportFormat) -> Result<Response> {
    let bytes = format.write(table)?;
    log::info!(
        "exporting {} row(s) as '{}' ({} bytes)",
        table.row_count(),
        file_name,
        bytes.len()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.mime().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                    file_name,
                    urlencoding::encode(file_name)
                ),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn export_result<T: CompletionTransport>(
    State(state): State<Arc<AppState<T>>>,
    jar: CookieJar,
    Query(query): Query<ExportQuery>,
) -> Result<(CookieJar, Response)> {
    let (jar, handle) = resolve_session(&state, jar);
    let table = lock(&handle).last_result.clone().ok_or_else(|| {
        DashboardError::InvalidRequest("Nothing to export yet; run an operation first".to_string())
    })?;
    let file_name =
        export::download_name(query.filename.as_deref(), "comparison_result", query.format);
    Ok((jar, download(&table, &file_name, query.format)?))
}

async fn export_table<T: CompletionTransport>(
    State(state): State<Arc<AppState<T>>>,
    jar: CookieJar,
    Path(name): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<(CookieJar, Response)> {
    let (jar, handle) = resolve_session(&state, jar);
    let table = lock(&handle).registry.get(&name)?.clone();
    let stem = std::path::Path::new(&name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table");
    let file_name = export::download_name(
        Some(query.filename.as_deref().unwrap_or(stem)),
        "table",
        query.format,
    );
    Ok((jar, download(&table, &file_name, query.format)?))
}

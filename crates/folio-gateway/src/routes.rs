//! Request handlers.

use crate::server::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use folio_agent::service::MAX_SESSION_ID_LEN;
use folio_agent::{AskRequest, StreamEvent};
use folio_core::FolioError;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{info, warn};

/// Header carrying the session id of a streamed answer.
pub const SESSION_HEADER: &str = "x-session-id";
/// Header telling whether the answer was served from the cache.
pub const CACHE_HEADER: &str = "x-cache";

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

fn validate(request: &AskRequest, max_message_length: usize) -> Result<(), String> {
    if request.message.trim().is_empty() {
        return Err("message must not be empty".to_string());
    }
    let len = request.message.chars().count();
    if len > max_message_length {
        return Err(format!(
            "message is {len} characters long; the limit is {max_message_length}"
        ));
    }
    if let Some(session_id) = &request.session_id {
        let well_formed = session_id.len() <= MAX_SESSION_ID_LEN
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !well_formed {
            return Err(format!(
                "session_id must be at most {MAX_SESSION_ID_LEN} characters of [A-Za-z0-9_-]"
            ));
        }
    }
    Ok(())
}

pub(crate) async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "folio",
        "cache": state.service.cache().is_enabled(),
        "memory": state.service.memory().is_enabled(),
        "documents": state.service.pipeline().has_documents(),
    }))
}

/// `POST /agent`: stream the answer as plain text.
pub(crate) async fn agent_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Response {
    if let Err(detail) = validate(&request, state.config.max_message_length) {
        return error_response(StatusCode::BAD_REQUEST, detail);
    }

    let answer = state.service.ask_stream(request).await;
    info!(session_id = %answer.session_id, cached = answer.cached, "Streaming answer");

    let body = ReceiverStream::new(answer.events).filter_map(|event| match event {
        StreamEvent::TextDelta { text } => Some(Ok::<_, Infallible>(text)),
        StreamEvent::Error { message } => Some(Ok(message)),
        StreamEvent::Done => None,
    });

    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        CACHE_HEADER,
        HeaderValue::from_static(if answer.cached { "hit" } else { "miss" }),
    );
    if let Ok(value) = HeaderValue::from_str(&answer.session_id) {
        headers.insert(SESSION_HEADER, value);
    }
    response
}

/// `GET /summary`: first-person profile summary.
pub(crate) async fn summary_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "summary": state.service.profile_summary().await }))
}

/// Body of `POST /ingest`.
#[derive(Debug, Default, Deserialize)]
pub struct IngestInput {
    /// A single file to ingest.
    #[serde(default)]
    pub file_path: Option<String>,
    /// Directories searched recursively.
    #[serde(default)]
    pub directories: Vec<String>,
}

/// `POST /ingest`: load, split, embed and store profile documents.
pub(crate) async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Json(input): Json<IngestInput>,
) -> Response {
    let Some(ingestor) = &state.ingestor else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Vector store not configured");
    };

    let directories: Vec<PathBuf> = input.directories.iter().map(PathBuf::from).collect();
    match ingestor
        .ingest(input.file_path.as_deref().map(Path::new), &directories)
        .await
    {
        Ok(report) => {
            let files: Vec<String> = report
                .files
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            Json(json!({
                "message": format!("Successfully processed {} files.", files.len()),
                "total_chunks": report.total_chunks,
                "files": files,
            }))
            .into_response()
        }
        Err(FolioError::Ingest(detail)) => error_response(StatusCode::NOT_FOUND, detail),
        Err(e) => {
            warn!(error = %e, "Ingestion failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `GET /schema`: fields of the document collection.
pub(crate) async fn schema_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pipeline = state.service.pipeline();
    if !pipeline.has_documents() {
        return Json(json!({ "error": "Vector store not connected" }));
    }
    match pipeline.document_schema().await {
        Ok(Some(schema)) => Json(json!({ "collection": schema.name, "schema": schema.fields })),
        Ok(None) => Json(json!({ "error": "Collection not found" })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

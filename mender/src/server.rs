//! HTTP boundary over the core operations.
//!
//! Thin by design: JSON in, JSON out, one route per operation, optional
//! bearer-token auth and CORS for the dashboard origin. Everything
//! interesting happens in the orchestrator.

use crate::config::MenderConfig;
use crate::error::MenderError;
use crate::orchestrator::{CallInput, ExtractInput, Mender};
use crate::synth::TransformInput;
use crate::types::RequestOptions;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct AppState {
    pub mender: Arc<Mender>,
    pub auth_token: Option<String>,
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.auth_token {
        None => true,
        Some(token) => headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {}", token))
            .unwrap_or(false),
    }
}

fn error_response(error: MenderError) -> Response {
    let status = match &error {
        MenderError::Configuration(_) | MenderError::UnresolvedVariables(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": error.to_string()}))).into_response()
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallBody {
    input: CallInput,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    credentials: Value,
    #[serde(default)]
    options: RequestOptions,
    /// Run in the background via the job queue; results arrive through the
    /// run log and the webhook.
    #[serde(rename = "async", default)]
    run_async: bool,
}

async fn call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CallBody>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if body.run_async {
        let (id, accepted) = state.mender.enqueue_call(
            body.input,
            body.payload,
            body.credentials,
            body.options,
        );
        return Json(json!({"id": id, "accepted": accepted})).into_response();
    }
    match state
        .mender
        .call(body.input, body.payload, body.credentials, body.options)
        .await
    {
        Ok(run) => Json(run).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractBody {
    input: ExtractInput,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    credentials: Value,
    #[serde(default)]
    options: RequestOptions,
}

async fn extract(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ExtractBody>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state
        .mender
        .extract(body.input, body.payload, body.credentials, body.options)
        .await
    {
        Ok(run) => Json(run).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransformBody {
    instruction: Option<String>,
    response_schema: Value,
    response_mapping: Option<String>,
    data: Value,
    #[serde(default)]
    options: RequestOptions,
}

async fn transform(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TransformBody>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let input = TransformInput {
        instruction: body.instruction.unwrap_or_default(),
        response_schema: body.response_schema,
        response_mapping: body.response_mapping,
    };
    match state.mender.transform(input, body.data, body.options).await {
        Ok(run) => Json(run).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaBody {
    instruction: String,
    response_data: Option<String>,
}

async fn generate_schema(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SchemaBody>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state
        .mender
        .generate_schema(&body.instruction, body.response_data.as_deref())
        .await
    {
        Ok(schema) => Json(json!({"jsonSchema": schema})).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRunsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    config_id: Option<String>,
}

fn default_limit() -> usize {
    20
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListRunsQuery>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state
        .mender
        .store()
        .list_runs(query.limit, query.offset, query.config_id.as_deref())
        .await
    {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => error_response(e),
    }
}

/// Build the router for a configured pipeline.
pub fn router(config: &MenderConfig, mender: Arc<Mender>) -> Router {
    let state = Arc::new(AppState {
        mender,
        auth_token: config.auth_token.clone(),
    });

    let mut cors = tower_http::cors::CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);
    if let Some(origin) = &config.dashboard_origin {
        if let Ok(origin) = origin.parse() {
            cors = cors.allow_origin([origin]);
        }
    } else {
        cors = cors.allow_origin(tower_http::cors::Any);
    }

    Router::new()
        .route("/health", get(health))
        .route("/call", post(call))
        .route("/extract", post(extract))
        .route("/transform", post(transform))
        .route("/schema", post(generate_schema))
        .route("/runs", get(list_runs))
        .layer(cors)
        .with_state(state)
}

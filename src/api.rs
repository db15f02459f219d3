//! REST API Server for the fund query agent
//!
//! Thin route layer: the orchestrator answers questions, and the gateway is
//! exposed directly for search and lookup by scheme code.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::{describe_rejection, AgentOrchestrator};
use crate::error::{AgentError, GatewayError};
use crate::gateway::FundGateway;
use crate::models::{HistoryWindow, SchemeCode, MAX_COMPARE_FUNDS};

/// Hard cap on `limit` for the search endpoint
const MAX_SEARCH_LIMIT: usize = 50;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompareRequest {
    pub fund_ids: Vec<String>,
    #[serde(default = "default_comparison_period")]
    pub comparison_period: String,
}

fn default_comparison_period() -> String {
    HistoryWindow::OneYear.label().to_string()
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub limit: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            error_kind: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            error_kind: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn with_kind(mut self, kind: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self
    }
}

type ApiReply = (StatusCode, Json<ApiResponse>);

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<AgentOrchestrator>,
    pub gateway: Arc<dyn FundGateway>,
    pub environment: String,
}

/// =============================
/// Error → Status Mapping
/// =============================

pub fn agent_status(error: &AgentError) -> StatusCode {
    match error {
        AgentError::AmbiguousIntent(_) | AgentError::UnsupportedIntent(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AgentError::InsufficientEvidence(_) => StatusCode::NOT_FOUND,
        AgentError::ResolverTimeout(_)
        | AgentError::ExecutorTimeout(_)
        | AgentError::SynthesisTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AgentError::SynthesisUpstream(_) => StatusCode::BAD_GATEWAY,
        AgentError::Cancelled => StatusCode::REQUEST_TIMEOUT,
    }
}

pub fn gateway_status(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Upstream { .. } | GatewayError::Invalid(_) => StatusCode::BAD_GATEWAY,
    }
}

fn gateway_failure(error: GatewayError) -> ApiReply {
    (
        gateway_status(&error),
        Json(ApiResponse::error(error.to_string())),
    )
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "environment": state.environment,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Question Endpoint
/// =============================

async fn answer_question(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> ApiReply {
    info!(question = %req.question, "Received question");

    // client disconnect drops this future; the guard cancels the pipeline
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    answer_reply(
        state
            .orchestrator
            .handle_with_cancel(&req.question, cancel)
            .await,
    )
}

fn answer_reply(result: crate::Result<crate::models::Answer>) -> ApiReply {
    match result {
        Ok(answer) => (StatusCode::OK, Json(ApiResponse::success(answer))),
        Err(e) => (
            agent_status(&e),
            Json(ApiResponse::error(describe_rejection(&e)).with_kind(e.kind())),
        ),
    }
}

fn bad_request(message: String) -> ApiReply {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message)))
}

/// =============================
/// Comparison Endpoint
/// =============================

async fn compare_funds(
    State(state): State<ApiState>,
    Json(req): Json<CompareRequest>,
) -> ApiReply {
    info!(fund_ids = ?req.fund_ids, period = %req.comparison_period, "Received comparison");

    if !(2..=MAX_COMPARE_FUNDS).contains(&req.fund_ids.len()) {
        return bad_request(format!(
            "fund_ids must hold between 2 and {} scheme codes",
            MAX_COMPARE_FUNDS
        ));
    }

    let mut codes = Vec::with_capacity(req.fund_ids.len());
    for raw in &req.fund_ids {
        match SchemeCode::parse(raw) {
            Some(code) => codes.push(code),
            None => return bad_request(format!("'{}' is not a scheme code", raw)),
        }
    }

    let Some(window) = HistoryWindow::from_label(&req.comparison_period) else {
        return bad_request(format!(
            "comparison_period '{}' is not one of 1M, 3M, 6M, 1Y, 3Y, 5Y",
            req.comparison_period
        ));
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    answer_reply(
        state
            .orchestrator
            .compare_with_cancel(codes, Some(window), cancel)
            .await,
    )
}

/// =============================
/// Raw Gateway Endpoints
/// =============================

async fn search_funds(
    State(state): State<ApiState>,
    Query(params): Query<SearchParams>,
) -> ApiReply {
    let term = params.q.trim();
    if term.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("query parameter 'q' is required".into())),
        );
    }

    let limit = params.limit.unwrap_or(10).clamp(1, MAX_SEARCH_LIMIT);

    match state.gateway.search_by_name(term, limit).await {
        Ok(funds) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "query": term,
                "count": funds.len(),
                "results": funds,
            }))),
        ),
        Err(e) => gateway_failure(e),
    }
}

async fn fund_details(State(state): State<ApiState>, Path(code): Path<String>) -> ApiReply {
    let Some(code) = SchemeCode::parse(&code) else {
        return bad_request(format!("'{}' is not a scheme code", code));
    };

    match state.gateway.get_by_code(&code).await {
        Ok(record) => (StatusCode::OK, Json(ApiResponse::success(record))),
        Err(e) => gateway_failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/query", post(answer_question))
        .route("/api/funds/search", get(search_funds))
        .route("/api/funds/compare", post(compare_funds))
        .route("/api/funds/:code", get(fund_details))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

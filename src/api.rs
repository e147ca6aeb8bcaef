//! REST API for a Tallychain node
//!
//! Thin boundary over [`crate::node::Node`]: it checks request shapes,
//! calls into the ledger, and serialises results. Routes:
//!
//! - `GET  /mine`
//! - `POST /transactions/new`
//! - `GET  /chain`
//! - `POST /nodes/register`
//! - `GET  /nodes/resolve`
//! - `GET  /health`, `GET /stats`

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::blockchain::{Block, Chain};
use crate::error::ChainError;
use crate::node::{Node, NodeState};
use crate::transaction::Transaction;

/// API handle shared by all request handlers.
#[derive(Clone)]
pub struct ApiNode {
    pub node: Arc<Node>,
    api_stats: Arc<RwLock<ApiStats>>,
}

/// API statistics and monitoring
#[derive(Debug, Default)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    blocks_mined: u64,
    transactions_submitted: u64,
    resolutions: u64,
    chains_replaced: u64,
    start_time: Option<Instant>,
}

impl ApiStats {
    fn new() -> Self {
        ApiStats {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

impl ApiNode {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            api_stats: Arc::new(RwLock::new(ApiStats::new())),
        }
    }

    pub async fn get_stats(&self) -> ApiStatsResponse {
        let stats = self.api_stats.read().await;
        let uptime = stats.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0);

        ApiStatsResponse {
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            blocks_mined: stats.blocks_mined,
            transactions_submitted: stats.transactions_submitted,
            resolutions: stats.resolutions,
            chains_replaced: stats.chains_replaced,
            uptime_seconds: uptime,
        }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    InvalidInput(String),
    Conflict(String),
    Unavailable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InvalidTransaction(_) | ChainError::InvalidPeerAddress(_) => {
                ApiError::InvalidInput(err.to_string())
            }
            ChainError::StaleMine => ApiError::Conflict(err.to_string()),
            ChainError::MiningCancelled => ApiError::Unavailable(err.to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct MineResponse {
    pub message: String,
    pub index: u64,
    pub transactions: Vec<Transaction>,
    pub proof: u64,
    pub previous_hash: String,
}

impl From<Block> for MineResponse {
    fn from(block: Block) -> Self {
        MineResponse {
            message: "New Block Forged".to_string(),
            index: block.index,
            transactions: block.transactions,
            proof: block.proof,
            previous_hash: block.previous_hash,
        }
    }
}

#[derive(Serialize)]
pub struct ChainResponse {
    pub chain: Chain,
    pub length: usize,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub total_nodes: Vec<String>,
}

#[derive(Serialize)]
pub struct ApiStatsResponse {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub blocks_mined: u64,
    pub transactions_submitted: u64,
    pub resolutions: u64,
    pub chains_replaced: u64,
    pub uptime_seconds: u64,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

// ============================================================================
// Middleware
// ============================================================================

/// Request statistics middleware
async fn stats_middleware(State(api): State<Arc<ApiNode>>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let success = response.status().is_success();
    let mut stats = api.api_stats.write().await;
    stats.record_request(success);

    response
}

/// Logs method, path, status and duration of every request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(api: Arc<ApiNode>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/mine", get(mine))
        .route("/transactions/new", post(new_transaction))
        .route("/chain", get(full_chain))
        .route("/nodes/register", post(register_nodes))
        .route("/nodes/resolve", get(consensus))
        .route("/health", get(health_check))
        .route("/stats", get(get_api_stats))
        // stats is the outer layer and counts the final status of every request
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn_with_state(api.clone(), stats_middleware))
        .with_state(api)
        .layer(cors)
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn run_api_server<S>(api: Arc<ApiNode>, addr: SocketAddr, shutdown: S) -> Result<(), ChainError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = build_api_router(api);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(addr = %listener.local_addr()?, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn mine(State(api): State<Arc<ApiNode>>) -> Result<Json<MineResponse>, ApiError> {
    let block = api.node.mine().await?;
    api.api_stats.write().await.blocks_mined += 1;
    Ok(Json(MineResponse::from(block)))
}

async fn new_transaction(
    State(api): State<Arc<ApiNode>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let Json(values) = body?;
    let tx = Transaction::from_json(&values)?;
    let index = api.node.submit_transaction(tx).await;

    api.api_stats.write().await.transactions_submitted += 1;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: format!("Transaction will be added to Block {}", index),
        }),
    ))
}

async fn full_chain(State(api): State<Arc<ApiNode>>) -> Json<ChainResponse> {
    let chain = api.node.chain().await;
    Json(ChainResponse {
        length: chain.len(),
        chain,
    })
}

async fn register_nodes(
    State(api): State<Arc<ApiNode>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(values) = body?;
    let nodes: Vec<String> = values
        .get("nodes")
        .and_then(Value::as_array)
        .and_then(|nodes| {
            nodes
                .iter()
                .map(|n| n.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| {
            ApiError::InvalidInput("Error: Please supply a valid list of nodes".to_string())
        })?;

    api.node.register_peers(&nodes)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "New nodes have been added".to_string(),
            total_nodes: api.node.peers.list().iter().map(|p| p.addr()).collect(),
        }),
    ))
}

async fn consensus(State(api): State<Arc<ApiNode>>) -> impl IntoResponse {
    let resolution = api.node.resolve().await;

    {
        let mut stats = api.api_stats.write().await;
        stats.resolutions += 1;
        if resolution.replaced {
            stats.chains_replaced += 1;
        }
    }

    if resolution.replaced {
        Json(serde_json::json!({
            "message": "Our chain was replaced",
            "replaced": true,
            "new_chain": resolution.chain
        }))
    } else {
        Json(serde_json::json!({
            "message": "Our chain is authoritative",
            "replaced": false,
            "chain": resolution.chain
        }))
    }
}

async fn health_check(State(api): State<Arc<ApiNode>>) -> impl IntoResponse {
    let state = api.node.state();
    let status = match state {
        NodeState::Ready => StatusCode::OK,
        NodeState::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        Json(serde_json::json!({
            "status": if status == StatusCode::OK { "healthy" } else { "unhealthy" },
            "node_state": format!("{:?}", state),
            "node_id": api.node.node_id().await,
            "length": api.node.len().await,
            "peers": api.node.peers.len(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn get_api_stats(State(api): State<Arc<ApiNode>>) -> impl IntoResponse {
    Json(api.get_stats().await)
}

//! HTTP API
//!
//! Thin axum layer over [`Node`]: balance and status reads are answered
//! from the node's last-committed snapshot, tx submission and gossip go
//! through [`Node::add_pending_tx`], and `/node/sync` streams stored blocks.

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

use crate::error::{ChainError, Result};
use crate::network::{
    AddPeerRes, GossipTxReq, PeerNode, SyncRes, TxAddReq, TxAddRes, ENDPOINT_ADD_PEER,
    ENDPOINT_GOSSIP_TX, ENDPOINT_STATUS, ENDPOINT_SYNC,
};
use crate::node::Node;
use crate::transaction::Tx;

#[derive(Debug)]
pub enum ApiError {
    Chain(ChainError),
    InvalidInput(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Chain(e @ ChainError::DuplicateTransaction(_)) => {
                (StatusCode::CONFLICT, e.to_string())
            }
            ApiError::Chain(e) if e.is_validation() => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Chain(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Chain(err)
    }
}

#[derive(Debug, Deserialize)]
struct SyncQuery {
    #[serde(rename = "fromBlock", default)]
    from_block: u64,
}

// ============================================================================
// Middleware
// ============================================================================

async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::debug!(
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

pub fn build_api_router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/balances/list", get(list_balances))
        .route("/tx/add", post(add_tx))
        .route(ENDPOINT_STATUS, get(node_status))
        .route(ENDPOINT_SYNC, get(node_sync))
        .route(ENDPOINT_GOSSIP_TX, post(gossip_tx))
        .route(ENDPOINT_ADD_PEER, post(add_peer))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(node)
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    node: Arc<Node>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(listener, build_api_router(node))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn list_balances(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.balances())
}

async fn add_tx(
    State(node): State<Arc<Node>>,
    Json(req): Json<TxAddReq>,
) -> std::result::Result<Json<TxAddRes>, ApiError> {
    if req.from.is_empty() || req.to.is_empty() {
        return Err(ApiError::InvalidInput(
            "Both from and to accounts are required".to_string(),
        ));
    }

    let tx = Tx::new(req.from, req.to, req.value, req.data);
    let hash = node.add_pending_tx(tx, None).await?;
    Ok(Json(TxAddRes {
        success: true,
        hash,
    }))
}

async fn node_status(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.status())
}

async fn node_sync(
    State(node): State<Arc<Node>>,
    Query(query): Query<SyncQuery>,
) -> std::result::Result<Json<SyncRes>, ApiError> {
    let blocks = node.blocks_from(query.from_block).await?;
    Ok(Json(SyncRes { blocks }))
}

async fn gossip_tx(
    State(node): State<Arc<Node>>,
    Json(req): Json<GossipTxReq>,
) -> std::result::Result<Json<TxAddRes>, ApiError> {
    let hash = node.add_pending_tx(req.tx, req.origin).await?;
    Ok(Json(TxAddRes {
        success: true,
        hash,
    }))
}

async fn add_peer(
    State(node): State<Arc<Node>>,
    Json(peer): Json<PeerNode>,
) -> impl IntoResponse {
    node.add_peer(peer);
    Json(AddPeerRes { success: true })
}

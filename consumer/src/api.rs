use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::bill::BillSnapshot;
use crate::session::BillingSession;
use crate::tracker::ItemState;

#[derive(Debug, Serialize)]
pub struct Ack {
    success: bool,
}

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    label: String,
    unit_price: f64,
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn router(session: Arc<BillingSession>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/current_bill", get(current_bill))
        .route("/api/items", get(items))
        .route("/api/items/:label", get(item))
        .route("/api/prices/:label", get(price))
        .route("/api/reset_bill", post(reset_bill))
        .route("/api/generate_receipt", post(generate_receipt))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(session)
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/current_bill
async fn current_bill(State(session): State<Arc<BillingSession>>) -> Json<BillSnapshot> {
    Json(session.current_bill().await)
}

/// GET /api/items
///
/// Tracker view with excluded labels hidden.
async fn items(State(session): State<Arc<BillingSession>>) -> Json<Vec<ItemState>> {
    Json(session.visible_items().await)
}

/// GET /api/items/:label
async fn item(
    State(session): State<Arc<BillingSession>>,
    Path(label): Path<String>,
) -> Result<Json<ItemState>, StatusCode> {
    session
        .item(&label)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/prices/:label
///
/// Configured price, or the default for unknown labels.
async fn price(
    State(session): State<Arc<BillingSession>>,
    Path(label): Path<String>,
) -> Json<PriceResponse> {
    let unit_price = session.price_of(&label);
    Json(PriceResponse { label, unit_price })
}

/// POST /api/reset_bill
async fn reset_bill(State(session): State<Arc<BillingSession>>) -> Json<Ack> {
    session.reset().await;
    info!("bill reset via API");
    Json(Ack { success: true })
}

/// POST /api/generate_receipt
async fn generate_receipt(
    State(session): State<Arc<BillingSession>>,
) -> (StatusCode, Json<ReceiptResponse>) {
    match session.generate_receipt().await {
        Ok(path) => (
            StatusCode::OK,
            Json(ReceiptResponse {
                success: true,
                filename: Some(path.display().to_string()),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "receipt generation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReceiptResponse {
                    success: false,
                    filename: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

//! Operator routes. Every handler requires [`AdminAuth`].

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::database::models::{Order, Transaction};
use crate::error::AppResult;
use crate::middleware::auth::AdminAuth;
use crate::numbers::ServiceOffer;

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    /// Positive credits the wallet, negative debits it.
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub order: Order,
    pub refund: Transaction,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub provider_id: String,
    pub prices_written: usize,
}

/// POST /api/admin/orders/{id}/refund
pub async fn refund_order(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(order_id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> AppResult<Json<RefundResponse>> {
    let Json(request) = body?;
    info!(%order_id, ?admin, "admin refund requested");
    let (order, refund) = state.orders.admin_refund(order_id, &request.reason).await?;
    Ok(Json(RefundResponse { order, refund }))
}

/// POST /api/admin/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(order_id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> AppResult<Json<Order>> {
    let Json(request) = body?;
    info!(%order_id, ?admin, "admin cancel requested");
    Ok(Json(state.orders.admin_cancel(order_id, &request.reason).await?))
}

/// POST /api/admin/users/{id}/adjust
pub async fn adjust_balance(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(user_id): Path<Uuid>,
    body: Result<Json<AdjustRequest>, JsonRejection>,
) -> AppResult<Json<Transaction>> {
    let Json(request) = body?;
    info!(%user_id, amount = %request.amount, ?admin, "admin balance adjustment");
    Ok(Json(
        state
            .wallet
            .adjust(user_id, request.amount, &request.reason)
            .await?,
    ))
}

/// GET /api/admin/providers/{id}/services
pub async fn list_provider_services(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(provider_id): Path<String>,
) -> AppResult<Json<Vec<ServiceOffer>>> {
    Ok(Json(state.catalog.list_services(&provider_id).await?))
}

/// POST /api/admin/providers/{id}/sync
pub async fn sync_provider_prices(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(provider_id): Path<String>,
) -> AppResult<Json<SyncResponse>> {
    let prices_written = state.catalog.sync_prices(&provider_id).await?;
    Ok(Json(SyncResponse {
        provider_id,
        prices_written,
    }))
}

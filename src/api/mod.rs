//! HTTP surface.

pub mod admin;
pub mod orders;
pub mod wallet;
pub mod webhooks;

use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::AuthConfig;
use crate::database::store::Page;
use crate::health::HealthChecker;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{CatalogService, OrderService, WalletService, WebhookProcessor};

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub wallet: WalletService,
    pub catalog: CatalogService,
    pub webhooks: Arc<WebhookProcessor>,
    pub health: HealthChecker,
    pub auth: Arc<AuthConfig>,
}

impl FromRef<AppState> for Arc<AuthConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// `?page=&per_page=`, clamped by [`Page::new`].
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl From<PageQuery> for Page {
    fn from(query: PageQuery) -> Self {
        Page::new(query.page, query.per_page)
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/orders",
            post(orders::create_order).get(orders::list_orders),
        )
        .route("/api/orders/{id}", get(orders::get_order))
        .route("/api/orders/{id}/cancel", post(orders::cancel_order))
        .route("/api/wallet/balance", get(wallet::get_balance))
        .route("/api/wallet/transactions", get(wallet::list_transactions))
        .route("/api/wallet/deposits", post(wallet::create_deposit))
        .route("/api/admin/orders/{id}/refund", post(admin::refund_order))
        .route("/api/admin/orders/{id}/cancel", post(admin::cancel_order))
        .route("/api/admin/users/{id}/adjust", post(admin::adjust_balance))
        .route(
            "/api/admin/providers/{id}/services",
            get(admin::list_provider_services),
        )
        .route("/api/admin/providers/{id}/sync", post(admin::sync_provider_prices))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::api::{AppState, PageQuery};
use crate::database::models::Order;
use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::services::{Actor, CreateOrderRequest};

fn actor(user: &AuthUser) -> Actor {
    if user.is_admin() {
        Actor::Admin
    } else {
        Actor::User(user.user_id)
    }
}

/// POST /api/orders
///
/// A failed upstream purchase still answers 201: the order comes back as
/// `FAILED` with its refund already applied.
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Order>)> {
    let Json(request) = body?;
    let order = state.orders.create_order(user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list_orders(user.user_id, page.into()).await?))
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(
        state.orders.get_order_status(order_id, actor(&user)).await?,
    ))
}

/// POST /api/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.cancel_order(order_id, user.user_id).await?))
}

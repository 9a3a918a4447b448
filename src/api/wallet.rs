use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::api::{AppState, PageQuery};
use crate::database::models::Transaction;
use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::payments::{DepositInstructions, ProviderName};
use crate::services::WalletBalance;

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub provider: String,
    pub amount: Decimal,
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// GET /api/wallet/balance
pub async fn get_balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<WalletBalance>> {
    Ok(Json(state.wallet.balance(user.user_id).await?))
}

/// GET /api/wallet/transactions?page=&per_page=
pub async fn list_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Vec<Transaction>>> {
    Ok(Json(
        state.wallet.transactions(user.user_id, page.into()).await?,
    ))
}

/// POST /api/wallet/deposits
pub async fn create_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<DepositRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<DepositInstructions>)> {
    let Json(request) = body?;
    let provider = ProviderName::from_str(&request.provider)?;
    let instructions = state
        .wallet
        .create_deposit(user.user_id, provider, request.amount, request.callback_url)
        .await?;
    Ok((StatusCode::CREATED, Json(instructions)))
}

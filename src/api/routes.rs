//! API Routes
//!
//! HTTP endpoint definitions for the `/v1` surface.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::IssuedToken;
use crate::domain::{Account, AccountId, Bank, Transfer, TransferId};
use crate::error::AppError;
use crate::handlers::{
    AdjustSupplyCommand, CreateAccountCommand, RegisterBankCommand, SetFrozenCommand,
    SetMetadataCommand, TransferCommand, UpdateBankCommand,
};
use crate::state::AppState;
use crate::store::with_timeout;

use super::middleware::{RequestContext, RequireAdmin, RequireBank};

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthenticationRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterBankRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateBankRequest {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub admin: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAccountRequest {
    pub metadata: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetFrozenRequest {
    pub id: AccountId,
    pub frozen: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetMetadataRequest {
    pub id: AccountId,
    pub metadata: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeMoneySupplyRequest {
    pub id: AccountId,
    pub change_in_cents: i64,
    #[serde(default)]
    pub allow_negative: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferRequest {
    pub source_account_id: AccountId,
    pub target_account_id: AccountId,
    pub amount_in_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TokenEnvelope {
    pub authentication_token: IssuedToken,
}

#[derive(Debug, Serialize)]
pub struct BankEnvelope {
    pub bank: Bank,
}

#[derive(Debug, Serialize)]
pub struct AccountEnvelope {
    pub account: Account,
}

#[derive(Debug, Serialize)]
pub struct TransferEnvelope {
    pub transfer: Transfer,
}

// =========================================================================
// Router
// =========================================================================

/// Create the `/v1` router. Callers layer the logging and authentication
/// middleware on top.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/v1/healthcheck", get(healthcheck))
        .route("/v1/tokens/authentication", post(create_authentication_token))
        // Banks
        .route("/v1/banks", post(register_bank))
        .route("/v1/banks/:username", get(show_bank).patch(update_bank))
        // Accounts
        .route("/v1/accounts", post(create_account))
        .route("/v1/accounts/frozen", patch(set_frozen))
        .route("/v1/accounts/metadata", patch(set_metadata))
        .route("/v1/accounts/change_money_supply", patch(change_money_supply))
        .route("/v1/accounts/:id", get(get_account))
        // Transfers
        .route("/v1/transfers", post(create_transfer))
        .route("/v1/transfers/:id", get(get_transfer))
        .fallback(not_found)
}

async fn not_found() -> AppError {
    AppError::NotFound
}

fn created<T: Serialize>(location: String, body: T) -> Response {
    (
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(body),
    )
        .into_response()
}

// =========================================================================
// GET /v1/healthcheck
// =========================================================================

async fn healthcheck(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    with_timeout(state.settings.store_timeout, state.store.ping())
        .await
        .map_err(crate::domain::LedgerError::from)?;

    Ok(Json(HealthResponse {
        status: "available",
        system_info: SystemInfo {
            environment: state.environment.clone(),
            version: env!("CARGO_PKG_VERSION"),
        },
    }))
}

// =========================================================================
// POST /v1/tokens/authentication
// =========================================================================

async fn create_authentication_token(
    State(state): State<AppState>,
    payload: Result<Json<AuthenticationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TokenEnvelope>), AppError> {
    let Json(request) = payload?;

    let token = state
        .directory
        .issue_token(&request.username, &request.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TokenEnvelope {
            authentication_token: token,
        }),
    ))
}

// =========================================================================
// POST /v1/banks
// =========================================================================

async fn register_bank(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    RequestContext(context): RequestContext,
    payload: Result<Json<RegisterBankRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;

    let mut command = RegisterBankCommand::new(request.username, request.password);
    if request.admin {
        command = command.as_admin();
    }

    let bank = state.banks.register(&principal, command, &context).await?;

    Ok(created(
        format!("/v1/banks/{}", bank.username),
        BankEnvelope { bank },
    ))
}

// =========================================================================
// GET/PATCH /v1/banks/:username
// =========================================================================

async fn show_bank(
    State(state): State<AppState>,
    RequireBank(principal): RequireBank,
    Path(username): Path<String>,
) -> Result<Json<BankEnvelope>, AppError> {
    let bank = state.banks.show(&principal, &username).await?;
    Ok(Json(BankEnvelope { bank }))
}

async fn update_bank(
    State(state): State<AppState>,
    RequireBank(principal): RequireBank,
    RequestContext(context): RequestContext,
    Path(username): Path<String>,
    payload: Result<Json<UpdateBankRequest>, JsonRejection>,
) -> Result<Json<BankEnvelope>, AppError> {
    let Json(request) = payload?;

    let mut command = UpdateBankCommand::new(username);
    if let Some(password) = request.password {
        command = command.with_password(password);
    }
    if let Some(admin) = request.admin {
        command = command.with_admin(admin);
    }

    let bank = state.banks.update(&principal, command, &context).await?;
    Ok(Json(BankEnvelope { bank }))
}

// =========================================================================
// POST /v1/accounts, GET /v1/accounts/:id
// =========================================================================

async fn create_account(
    State(state): State<AppState>,
    RequireBank(principal): RequireBank,
    RequestContext(context): RequestContext,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;

    let account = state
        .accounts
        .create(&principal, CreateAccountCommand::new(request.metadata), &context)
        .await?;

    Ok(created(
        format!("/v1/accounts/{}", account.id),
        AccountEnvelope { account },
    ))
}

async fn get_account(
    State(state): State<AppState>,
    RequireBank(principal): RequireBank,
    id: Result<Path<AccountId>, axum::extract::rejection::PathRejection>,
) -> Result<Json<AccountEnvelope>, AppError> {
    let Path(id) = id?;
    let account = state.accounts.get(&principal, id).await?;
    Ok(Json(AccountEnvelope { account }))
}

// =========================================================================
// PATCH /v1/accounts/{frozen,metadata,change_money_supply}
// =========================================================================

async fn set_frozen(
    State(state): State<AppState>,
    RequireBank(principal): RequireBank,
    RequestContext(context): RequestContext,
    payload: Result<Json<SetFrozenRequest>, JsonRejection>,
) -> Result<Json<AccountEnvelope>, AppError> {
    let Json(request) = payload?;

    let account = state
        .accounts
        .set_frozen(
            &principal,
            SetFrozenCommand::new(request.id, request.frozen),
            &context,
        )
        .await?;

    Ok(Json(AccountEnvelope { account }))
}

async fn set_metadata(
    State(state): State<AppState>,
    RequireBank(principal): RequireBank,
    RequestContext(context): RequestContext,
    payload: Result<Json<SetMetadataRequest>, JsonRejection>,
) -> Result<Json<AccountEnvelope>, AppError> {
    let Json(request) = payload?;

    let account = state
        .accounts
        .set_metadata(
            &principal,
            SetMetadataCommand::new(request.id, request.metadata),
            &context,
        )
        .await?;

    Ok(Json(AccountEnvelope { account }))
}

async fn change_money_supply(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    RequestContext(context): RequestContext,
    payload: Result<Json<ChangeMoneySupplyRequest>, JsonRejection>,
) -> Result<Json<AccountEnvelope>, AppError> {
    let Json(request) = payload?;

    let mut command = AdjustSupplyCommand::new(request.id, request.change_in_cents);
    if request.allow_negative {
        command = command.allow_negative();
    }

    let account = state
        .accounts
        .adjust_supply(&principal, command, &context)
        .await?;

    Ok(Json(AccountEnvelope { account }))
}

// =========================================================================
// POST /v1/transfers, GET /v1/transfers/:id
// =========================================================================

async fn create_transfer(
    State(state): State<AppState>,
    RequireBank(principal): RequireBank,
    RequestContext(context): RequestContext,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;

    let command = TransferCommand::new(
        request.source_account_id,
        request.target_account_id,
        request.amount_in_cents,
    );
    let transfer = state.transfers.execute(&principal, command, &context).await?;

    Ok(created(
        format!("/v1/transfers/{}", transfer.id),
        TransferEnvelope { transfer },
    ))
}

async fn get_transfer(
    State(state): State<AppState>,
    RequireBank(principal): RequireBank,
    id: Result<Path<TransferId>, axum::extract::rejection::PathRejection>,
) -> Result<Json<TransferEnvelope>, AppError> {
    let Path(id) = id?;
    let transfer = state.accounts.get_transfer(&principal, id).await?;
    Ok(Json(TransferEnvelope { transfer }))
}

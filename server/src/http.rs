//! HTTP API.
//!
//! JSON over axum. Handlers validate request bodies, call the
//! [`LedgerService`] and translate [`LedgerError`]s into status codes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use ledgerline_common::{AccountId, ErrorKind, LedgerError, Timestamp, TransactionId};
use ledgerline_ledger::{Page, TransactionRecord, TransferRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::service::LedgerService;

const OWNER_NAME_MIN: usize = 3;
const OWNER_NAME_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 255;

type AppState = Arc<LedgerService>;

/// Build the API router.
pub fn router(service: Arc<LedgerService>, metrics_enabled: bool) -> Router {
    let mut router = Router::new()
        .route("/", get(health))
        .route("/v1/accounts", post(create_account))
        .route("/v1/accounts/:account_id/balance", get(get_balance))
        .route(
            "/v1/transactions",
            post(create_transaction).get(list_transactions),
        )
        .route(
            "/v1/transactions/:transaction_id/reverse",
            post(reverse_transaction),
        );

    if metrics_enabled {
        router = router.route("/metrics", get(metrics));
    }

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": message.into() }),
        }
    }

    fn not_found(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: json!({ "error": message.into(), "code": code }),
        }
    }

    fn decode(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("error decoding json: {}", rejection.body_text()))
    }

    fn validation(fields: BTreeMap<&'static str, String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": "Validation failed", "fields": fields }),
        }
    }

    /// Map an error from a read endpoint.
    fn read(err: LedgerError) -> Self {
        Self::from_ledger(err, true)
    }

    /// Map an error from a write endpoint.
    fn write(err: LedgerError) -> Self {
        Self::from_ledger(err, false)
    }

    fn from_ledger(err: LedgerError, read: bool) -> Self {
        let status = match &err {
            LedgerError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            LedgerError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ if read && err.kind() == ErrorKind::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };

        let mut body = json!({ "error": err.to_string(), "code": err.error_code() });
        if let Some(field) = err.field() {
            body["fields"][field] = json!(err.to_string());
        }

        Self { status, body }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, body = %self.body, "Request failed");
        } else {
            warn!(status = %self.status, body = %self.body, "Request rejected");
        }
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn health() -> &'static str {
    "up"
}

async fn metrics(State(service): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.metrics().to_prometheus(),
    )
}

// --- Accounts ---

#[derive(Debug, Deserialize)]
pub struct CreateAccountBody {
    pub owner_name: Option<String>,
    pub initial_balance: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct AccountCreated {
    pub message: &'static str,
    pub id: AccountId,
    pub owner_name: String,
    pub initial_balance: Decimal,
    pub created_at: Timestamp,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: AccountId,
    pub balance: Decimal,
}

async fn create_account(
    State(service): State<AppState>,
    payload: Result<Json<CreateAccountBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AccountCreated>)> {
    let Json(body) = payload.map_err(ApiError::decode)?;

    let mut fields = BTreeMap::new();
    match body.owner_name.as_deref().map(str::trim) {
        None | Some("") => {
            fields.insert("owner_name", required());
        }
        Some(name) if name.chars().count() < OWNER_NAME_MIN => {
            fields.insert("owner_name", format!("Minimum value: {OWNER_NAME_MIN}"));
        }
        Some(name) if name.chars().count() > OWNER_NAME_MAX => {
            fields.insert("owner_name", format!("Maximum value: {OWNER_NAME_MAX}"));
        }
        Some(_) => {}
    }
    match body.initial_balance {
        None => {
            fields.insert("initial_balance", required());
        }
        Some(balance) if balance < Decimal::ZERO => {
            fields.insert(
                "initial_balance",
                "Must be greater than or equal to 0".to_string(),
            );
        }
        Some(_) => {}
    }
    let (Some(owner_name), Some(initial_balance), true) =
        (body.owner_name, body.initial_balance, fields.is_empty())
    else {
        return Err(ApiError::validation(fields));
    };

    let account = service
        .open_account(&owner_name, initial_balance)
        .await
        .map_err(ApiError::write)?;

    Ok((
        StatusCode::CREATED,
        Json(AccountCreated {
            message: "account created",
            id: account.id,
            owner_name: account.owner_name,
            initial_balance: account.balance,
            created_at: account.created_at,
        }),
    ))
}

async fn get_balance(
    State(service): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<BalanceResponse>> {
    // A malformed id names no account.
    let account_id = account_id.parse::<AccountId>().map_err(|_| {
        ApiError::not_found(format!("account not found: {account_id}"), "ACCOUNT_NOT_FOUND")
    })?;

    let view = service
        .get_balance(account_id)
        .await
        .map_err(ApiError::read)?;

    Ok(Json(BalanceResponse {
        account_id: view.account_id,
        balance: view.balance,
    }))
}

// --- Transactions ---

#[derive(Debug, Deserialize)]
pub struct CreateTransactionBody {
    pub from_account_id: Option<String>,
    pub to_account_id: Option<String>,
    pub amount: Option<Decimal>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransactionCreated {
    pub message: &'static str,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub debit_transaction_id: TransactionId,
    pub credit_transaction_id: TransactionId,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub account_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransactionList {
    pub transactions: Vec<TransactionRecord>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct TransactionReversed {
    pub message: &'static str,
    pub transaction_id: TransactionId,
    pub reversal_transaction_id: TransactionId,
}

fn required() -> String {
    "This field is required".to_string()
}

fn account_field(
    fields: &mut BTreeMap<&'static str, String>,
    name: &'static str,
    value: Option<&str>,
) -> Option<AccountId> {
    match value.map(str::trim) {
        None | Some("") => {
            fields.insert(name, required());
            None
        }
        Some(raw) => match raw.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                fields.insert(name, "Must be a valid UUID".to_string());
                None
            }
        },
    }
}

async fn create_transaction(
    State(service): State<AppState>,
    payload: Result<Json<CreateTransactionBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TransactionCreated>)> {
    let Json(body) = payload.map_err(ApiError::decode)?;

    let mut fields = BTreeMap::new();
    let from = account_field(&mut fields, "from_account_id", body.from_account_id.as_deref());
    let to = account_field(&mut fields, "to_account_id", body.to_account_id.as_deref());
    match body.amount {
        None => {
            fields.insert("amount", required());
        }
        Some(amount) if amount <= Decimal::ZERO => {
            fields.insert("amount", "Must be greater than 0".to_string());
        }
        Some(_) => {}
    }
    let description = body.description.unwrap_or_default();
    if description.chars().count() > DESCRIPTION_MAX {
        fields.insert("description", format!("Maximum value: {DESCRIPTION_MAX}"));
    }
    let (Some(from), Some(to), Some(amount), true) = (from, to, body.amount, fields.is_empty())
    else {
        return Err(ApiError::validation(fields));
    };

    let receipt = service
        .submit_transfer(TransferRequest::new(from, to, amount, description))
        .await
        .map_err(ApiError::write)?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionCreated {
            message: "transaction created",
            from_account_id: from,
            to_account_id: to,
            amount: receipt.debit.amount,
            debit_transaction_id: receipt.debit.id,
            credit_transaction_id: receipt.credit.id,
        }),
    ))
}

async fn list_transactions(
    State(service): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<TransactionList>> {
    let page = Page::new(
        query.limit.and_then(|l| l.trim().parse().ok()),
        query.offset.and_then(|o| o.trim().parse().ok()),
    );

    let account_id = match query.account_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<AccountId>() {
            Ok(id) => Some(id),
            // No account has a malformed id, so nothing matches.
            Err(_) => {
                return Ok(Json(TransactionList {
                    transactions: Vec::new(),
                    limit: page.limit,
                    offset: page.offset,
                }))
            }
        },
    };

    let transactions = service
        .list_transactions(account_id, page)
        .await
        .map_err(ApiError::read)?;

    Ok(Json(TransactionList {
        transactions,
        limit: page.limit,
        offset: page.offset,
    }))
}

async fn reverse_transaction(
    State(service): State<AppState>,
    Path(transaction_id): Path<String>,
) -> ApiResult<Json<TransactionReversed>> {
    let transaction_id = transaction_id
        .parse::<TransactionId>()
        .map_err(|_| ApiError::bad_request("invalid transaction id"))?;

    let reversal = service
        .reverse_transaction(transaction_id)
        .await
        .map_err(ApiError::write)?;

    Ok(Json(TransactionReversed {
        message: "transaction reversed",
        transaction_id,
        reversal_transaction_id: reversal.id,
    }))
}

//! API Middleware
//!
//! Bearer-token authentication, principal extractors and request logging.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::domain::{Caller, LedgerError, OperationContext, Principal};
use crate::error::AppError;
use crate::state::AppState;

const CORRELATION_HEADER: &str = "X-Correlation-Id";

// =========================================================================
// Authentication Middleware
// =========================================================================

/// Resolve the `Authorization` header into a [`Caller`] extension.
///
/// Requests without the header continue as anonymous; the route decides
/// whether that is acceptable. Any header that is present but does not
/// resolve to a live token is rejected here.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    let caller = match state.directory.authenticate(header.as_deref()).await {
        Ok(caller) => caller,
        Err(e) => return with_vary(AppError::from(e).into_response()),
    };

    let mut context = request
        .extensions()
        .get::<OperationContext>()
        .cloned()
        .unwrap_or_default();
    context.ensure_correlation_id();
    if let Some(principal) = caller.principal() {
        context = context.with_bank(principal.username.clone());
    }

    request.extensions_mut().insert(context);
    request.extensions_mut().insert(caller);

    with_vary(next.run(request).await)
}

fn with_vary(mut response: Response) -> Response {
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

// =========================================================================
// Principal extractors
// =========================================================================

fn caller_from(parts: &Parts) -> Caller {
    parts
        .extensions
        .get::<Caller>()
        .cloned()
        .unwrap_or(Caller::Anonymous)
}

/// Any authenticated bank.
#[derive(Debug, Clone)]
pub struct RequireBank(pub Principal);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequireBank {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match caller_from(parts) {
            Caller::Authenticated(principal) => Ok(RequireBank(principal)),
            Caller::Anonymous => Err(AppError::AuthenticationRequired),
        }
    }
}

/// An authenticated administrator bank.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub Principal);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequireBank(principal) = RequireBank::from_request_parts(parts, state).await?;
        if !principal.admin {
            return Err(LedgerError::NotPermitted.into());
        }
        Ok(RequireAdmin(principal))
    }
}

/// The request's [`OperationContext`], or a fresh one when no middleware
/// populated it.
#[derive(Debug, Clone)]
pub struct RequestContext(pub OperationContext);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let mut context = parts
            .extensions
            .get::<OperationContext>()
            .cloned()
            .unwrap_or_default();
        context.ensure_correlation_id();
        Ok(RequestContext(context))
    }
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Assigns the correlation id and logs each request and its outcome.
pub async fn logging_middleware(mut request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let headers = mask_headers_for_logging(request.headers());

    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    request
        .extensions_mut()
        .insert(OperationContext::new().with_correlation_id(correlation_id));

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        version = ?version,
        correlation_id = %correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        correlation_id = %correlation_id,
        "Request completed"
    );

    response
}

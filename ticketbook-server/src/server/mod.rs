mod acl;
pub mod auth;
mod config;
mod pins;
mod practice;
mod rewards;
mod tasks;
mod tickets;
mod users;

use std::sync::Arc;

use crate::server::auth::AuthCtx;
use crate::storage::{StorageError, Store, TenantStore};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    http::{Method, StatusCode, header},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDateTime, Utc};
pub use config::{AppConfig, CompanyConfig, ConfigError, InstrumentConfig, UserConfig};
use ticketbook_shared::api::{ErrorBody, endpoints};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Self {
            config: Arc::new(config),
            store,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Store handle scoped to the caller's company.
    pub fn tenant(&self, auth: &AuthCtx) -> TenantStore {
        self.store.tenant(auth.company_id())
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route(endpoints::AUTH_FORCE_LOGOUT, post(auth::api_force_logout))
        .route(endpoints::PINS_GENERATE, post(pins::api_generate_pin))
        .route(
            endpoints::TASKS_LIBRARY_CREATE,
            post(tasks::api_create_library_task),
        )
        .route(endpoints::TASKS_ASSIGN, post(tasks::api_assign_task))
        .route(endpoints::TASKS_COMPLETE, post(tasks::api_complete_task))
        .route(endpoints::TASKS_VERIFY, post(tasks::api_verify_task))
        .route(endpoints::TASKS_DELETE, post(tasks::api_delete_task))
        .route(endpoints::TASKS_LIST, post(tasks::api_list_tasks))
        .route(endpoints::TICKETS_ADJUST, post(tickets::api_adjust))
        .route(endpoints::TICKETS_BALANCE, post(tickets::api_balance))
        .route(endpoints::TICKETS_HISTORY, post(tickets::api_history))
        .route(endpoints::REWARDS_CREATE, post(rewards::api_create_reward))
        .route(endpoints::REWARDS_LIST, post(rewards::api_list_rewards))
        .route(endpoints::REWARDS_REDEEM, post(rewards::api_redeem))
        .route(endpoints::USERS_CREATE, post(users::api_create_user))
        .route(endpoints::USERS_UPDATE, post(users::api_update_user))
        .route(endpoints::USERS_DELETE, post(users::api_delete_user))
        .route(
            endpoints::USERS_TOGGLE_STATUS,
            post(users::api_toggle_status),
        )
        .route(endpoints::PRACTICE_LOG, post(practice::api_log_practice))
        .route(endpoints::PRACTICE_STREAK, post(practice::api_streak))
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state.clone())
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            user_id = tracing::field::Empty,
            role = tracing::field::Empty,
            company_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route(endpoints::HEALTH, get(health))
        .route(endpoints::AUTH_LOGIN, post(auth::api_login))
        .route(endpoints::AUTH_REFRESH, post(auth::api_refresh))
        .route(endpoints::AUTH_LOGOUT, post(auth::api_logout))
        .route(endpoints::PINS_CLAIM, post(pins::api_claim_pin))
        .method_not_allowed_fallback(method_not_allowed)
        .merge(private)
        .fallback(unknown_route)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn unknown_route() -> AppError {
    AppError::not_found("not found")
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );
    // HSTS is only honored on HTTPS; harmless otherwise
    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    // Balances and tokens must never sit in a shared cache
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("user_id", tracing::field::display(auth.user_id()));
        span.record("role", tracing::field::display(auth.role()));
        span.record("company_id", tracing::field::display(auth.company_id()));
    }
    Ok(next.run(req).await)
}

pub(crate) fn rfc3339(ts: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc).to_rfc3339()
}

/// JSON body extractor whose rejections use the common error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::bad_request(rejection.body_text())),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// A 400 that clients tell apart by `code`.
    Rejected {
        code: &'static str,
        message: String,
    },
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    MethodNotAllowed,
    Conflict {
        code: &'static str,
        message: String,
        balance: Option<i64>,
        retryable: bool,
    },
    /// Some writes committed and a follow-up one failed.
    PartialFailure(String),
    Internal(String),
}

impl AppError {
    pub(crate) fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    pub(crate) fn self_action<T: Into<String>>(msg: T) -> Self {
        Self::Rejected {
            code: "self_action",
            message: msg.into(),
        }
    }
    pub(crate) fn unauthorized() -> Self {
        Self::Unauthorized("unauthorized".to_string())
    }
    pub(crate) fn unauthorized_with<T: Into<String>>(msg: T) -> Self {
        Self::Unauthorized(msg.into())
    }
    pub(crate) fn forbidden<T: Into<String>>(msg: T) -> Self {
        Self::Forbidden(msg.into())
    }
    pub(crate) fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    pub(crate) fn conflict<T: Into<String>>(code: &'static str, msg: T) -> Self {
        Self::Conflict {
            code,
            message: msg.into(),
            balance: None,
            retryable: false,
        }
    }
    pub(crate) fn insufficient_balance(balance: i64) -> Self {
        Self::Conflict {
            code: "insufficient_balance",
            message: "insufficient balance".to_string(),
            balance: Some(balance),
            retryable: false,
        }
    }
    pub(crate) fn partial_failure<T: Into<String>>(msg: T) -> Self {
        Self::PartialFailure(msg.into())
    }
    pub(crate) fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidInput(m) => AppError::BadRequest(m),
            StorageError::Conflict(m) => AppError::conflict("conflict", m),
            other => AppError::internal(other),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let mut body = ErrorBody {
            error: String::new(),
            code: None,
            retryable: None,
            balance: None,
        };
        let (status, kind, detail) = match self {
            AppError::BadRequest(m) => {
                body.error = m;
                (StatusCode::BAD_REQUEST, "bad_request", None)
            }
            AppError::Rejected { code, message } => {
                body.error = message;
                body.code = Some(code.to_string());
                (StatusCode::BAD_REQUEST, code, None)
            }
            AppError::Unauthorized(m) => {
                body.error = m;
                (StatusCode::UNAUTHORIZED, "unauthorized", None)
            }
            AppError::Forbidden(m) => {
                body.error = m;
                (StatusCode::FORBIDDEN, "forbidden", None)
            }
            AppError::NotFound(m) => {
                body.error = m;
                (StatusCode::NOT_FOUND, "not_found", None)
            }
            AppError::MethodNotAllowed => {
                body.error = "method not allowed".to_string();
                (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", None)
            }
            AppError::Conflict {
                code,
                message,
                balance,
                retryable,
            } => {
                body.error = message;
                body.code = Some(code.to_string());
                body.balance = balance;
                body.retryable = retryable.then_some(true);
                (StatusCode::CONFLICT, code, None)
            }
            AppError::PartialFailure(m) => {
                body.error = m;
                body.code = Some("partial_failure".to_string());
                (StatusCode::INTERNAL_SERVER_ERROR, "partial_failure", None)
            }
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => {
                body.error = "internal server error".into();
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", Some(m))
            }
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %body.error, detail = %detail, "request failed");
        } else if status.is_server_error() {
            tracing::error!(status = %status, kind = kind, message = %body.error, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %body.error, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

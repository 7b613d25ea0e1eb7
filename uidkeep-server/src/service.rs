use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uidkeep_core::{
    Error, Lifetime, Registry, Remaining, RemainingParts, TimeUnit, TIMESTAMP_FORMAT,
};

use crate::auth::require_admin_key;

/// Maximum allowed UID length
const MAX_UID_LENGTH: usize = 128;

/// Shared state behind every handler
pub struct AppState {
    registry: Registry,
    admin_key: String,
}

impl AppState {
    pub fn new(registry: Registry, admin_key: impl Into<String>) -> Self {
        Self {
            registry,
            admin_key: admin_key.into(),
        }
    }

    pub fn admin_key(&self) -> &str {
        &self.admin_key
    }
}

/// A JSON `{"error": ...}` response with its status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Invalid or missing API key")
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::RecordNotFound(_) => Self::new(StatusCode::NOT_FOUND, "UID not found"),
            Error::Expired(_) => Self::bad_request("UID has expired"),
            Error::InvalidPolicy(reason) => Self::bad_request(reason),
            other => {
                tracing::error!("Request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal storage error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Validates that a UID is present and within size limits. The UID is
/// kept exactly as given, surrounding whitespace included.
fn validate_uid(uid: Option<&str>) -> Result<&str, ApiError> {
    let uid = uid
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| ApiError::bad_request("UID parameter is required"))?;
    if uid.len() > MAX_UID_LENGTH {
        return Err(ApiError::bad_request(format!(
            "UID exceeds maximum length of {} bytes",
            MAX_UID_LENGTH
        )));
    }
    Ok(uid)
}

#[derive(Debug, Default, Deserialize)]
pub struct AddQuery {
    uid: Option<String>,
    time: Option<String>,
    #[serde(rename = "type")]
    unit: Option<String>,
    permanent: Option<String>,
}

impl AddQuery {
    fn lifetime(&self) -> Result<Lifetime, ApiError> {
        let permanent = self
            .permanent
            .as_deref()
            .is_some_and(|flag| flag.eq_ignore_ascii_case("true"));
        if permanent {
            return Ok(Lifetime::Permanent);
        }

        let (Some(time), Some(unit)) = (
            self.time.as_deref().filter(|t| !t.is_empty()),
            self.unit.as_deref().filter(|u| !u.is_empty()),
        ) else {
            return Err(ApiError::bad_request(
                "Time parameters required for temporary UIDs",
            ));
        };

        let value: i64 = time
            .trim()
            .parse()
            .map_err(|_| ApiError::bad_request("Time value must be integer"))?;
        let unit: TimeUnit = unit
            .parse()
            .map_err(|_| ApiError::bad_request("Invalid time unit"))?;

        Ok(Lifetime::Temporary { value, unit })
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoveQuery {
    uid: Option<String>,
}

/// Builds the router.
///
/// # Routes
///
/// - `GET /` - Service banner
/// - `GET /health` - Health and mirror counters
/// - `GET /add_uid?uid=ID&time=VALUE&type=UNIT&permanent=BOOL&key=KEY`
/// - `GET /remove?uid=ID&key=KEY`
/// - `GET /get_time/{uid}?key=KEY`
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/add_uid", get(add_uid))
        .route("/remove", get(remove_uid))
        .route("/get_time/:uid", get(check_time))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_admin_key,
        ));

    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn home() -> Json<Value> {
    Json(json!({
        "status": "running",
        "endpoints": {
            "add_uid": "/add_uid?uid=ID&time=VALUE&type=TYPE&key=API_KEY",
            "remove_uid": "/remove?uid=ID&key=API_KEY",
            "check_time": "/get_time/ID?key=API_KEY"
        },
        "documentation": "See README for full API docs"
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.registry.mirror_stats();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "credential": state.registry.mirror().credentials().is_available(),
        "mirror": {
            "delivered": stats.delivered,
            "failed": stats.failed,
            "skipped": stats.skipped
        }
    }))
}

async fn add_uid(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AddQuery>,
) -> Result<Json<Value>, ApiError> {
    let uid = validate_uid(query.uid.as_deref())?;
    let lifetime = query.lifetime()?;
    tracing::debug!("ADD {} ({:?})", uid, lifetime);

    let policy = state.registry.add_record(uid, lifetime).await?;
    let expires_at = match policy.expires_at() {
        Some(at) => at.format(TIMESTAMP_FORMAT).to_string(),
        None => "never".to_string(),
    };

    Ok(Json(json!({
        "uid": uid,
        "status": "added",
        "expires_at": expires_at
    })))
}

async fn remove_uid(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RemoveQuery>,
) -> Result<Json<Value>, ApiError> {
    let uid = validate_uid(query.uid.as_deref())?;
    tracing::debug!("REMOVE {}", uid);

    state.registry.remove_record(uid).await?;
    Ok(Json(json!({ "status": "removed", "uid": uid })))
}

async fn check_time(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let uid = validate_uid(Some(&uid))?;
    tracing::debug!("GET_TIME {}", uid);

    match state.registry.query_remaining(uid).await? {
        Remaining::Permanent => Ok(Json(json!({
            "uid": uid,
            "status": "permanent",
            "message": "This UID will never expire"
        }))),
        Remaining::Expires {
            expires_at,
            remaining,
        } => {
            let parts = RemainingParts::from(remaining);
            Ok(Json(json!({
                "uid": uid,
                "expires_at": expires_at.format(TIMESTAMP_FORMAT).to_string(),
                "remaining": {
                    "days": parts.days,
                    "hours": parts.hours,
                    "minutes": parts.minutes,
                    "seconds": parts.seconds
                }
            })))
        }
    }
}

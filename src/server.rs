//!
//! stagegate HTTP server
//! ---------------------
//! Axum front for the session and routing core. Each browser gets a visitor cookie
//! and its own session context (identity provider handle, session store, role
//! resolver); page components ask `/navigate` what to do with a path.
//!
//! Responsibilities:
//! - Visitor lifecycle: created on sign-in, torn down on logout. Requests without a
//!   known visitor cookie are answered as a signed-out visitor and leave nothing behind.
//! - Sign-in/sign-out delegated to the identity provider (no credential checks here).
//! - Navigation decisions mapped to HTTP: 200 render, 202 pending, 303 redirect,
//!   404 unknown page.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult};
use crate::identity::{
    Identity, LocalIdentityProvider, ProfileStore, RetryPolicy, RoleResolver, SessionContext, SessionSnapshot,
    SessionStore,
};
use crate::routing::{Navigation, Navigator, ENTRY_PATH};
use crate::tprintln;

const VISITOR_COOKIE: &str = "stagegate_visitor";
const MAX_WAIT_MS: u64 = 10_000;

/// One browser's session: its provider handle and the context built on it.
pub struct Visitor {
    pub provider: Arc<LocalIdentityProvider>,
    pub context: SessionContext,
}

impl Visitor {
    pub async fn start(profiles: Arc<dyn ProfileStore>, policy: RetryPolicy) -> Self {
        let provider = Arc::new(LocalIdentityProvider::new());
        let store = SessionStore::new(provider.clone());
        let resolver = Arc::new(RoleResolver::new(profiles, policy));
        let context = SessionContext::start(store, resolver).await;
        Self { provider, context }
    }
}

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub navigator: Navigator,
    pub profiles: Arc<dyn ProfileStore>,
    pub policy: RetryPolicy,
    /// Visitor id -> live session
    pub visitors: Arc<RwLock<HashMap<String, Arc<Visitor>>>>,
}

impl AppState {
    pub fn new(navigator: Navigator, profiles: Arc<dyn ProfileStore>, policy: RetryPolicy) -> Self {
        Self { navigator, profiles, policy, visitors: Arc::new(RwLock::new(HashMap::new())) }
    }
}

fn gen_visitor_id() -> PortalResult<String> { mint_visitor_id(getrandom::getrandom) }

// 128-bit random id, base64url without padding. No entropy, no id.
fn mint_visitor_id<F>(fill: F) -> PortalResult<String>
where
    F: FnOnce(&mut [u8]) -> Result<(), getrandom::Error>,
{
    let mut buf = [0u8; 16];
    fill(&mut buf).map_err(|e| PortalError::internal("entropy_unavailable".to_string(), e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name { return Some(v[1..].to_string()); }
        }
    }
    None
}

fn visitor_cookie(vid: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("{}={}; HttpOnly; SameSite=Lax; Path=/", VISITOR_COOKIE, vid)).ok()
}

fn clear_visitor_cookie() -> HeaderValue {
    HeaderValue::from_static("stagegate_visitor=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax; Path=/")
}

async fn existing_visitor(state: &AppState, headers: &HeaderMap) -> Option<Arc<Visitor>> {
    let vid = parse_cookie(headers, VISITOR_COOKIE)?;
    state.visitors.read().await.get(&vid).cloned()
}

/// Look up the caller's visitor, creating one (and a cookie for it) when the request
/// carries no known id. Only sign-in gets here; read-only requests never create one.
async fn visitor_for(state: &AppState, headers: &HeaderMap) -> PortalResult<(Arc<Visitor>, HeaderMap)> {
    if let Some(v) = existing_visitor(state, headers).await {
        return Ok((v, HeaderMap::new()));
    }
    let vid = gen_visitor_id()?;
    let visitor = Arc::new(Visitor::start(state.profiles.clone(), state.policy).await);
    state.visitors.write().await.insert(vid.clone(), visitor.clone());
    tprintln!("visitor.new vid={}", vid);
    let mut out = HeaderMap::new();
    if let Some(c) = visitor_cookie(&vid) {
        out.insert(header::SET_COOKIE, c);
    }
    Ok((visitor, out))
}

fn navigation_response(nav: Navigation, mut headers: HeaderMap) -> (StatusCode, HeaderMap, Json<serde_json::Value>) {
    let status = match &nav {
        Navigation::Render { .. } => StatusCode::OK,
        Navigation::Pending { .. } => StatusCode::ACCEPTED,
        Navigation::NotFound { .. } => StatusCode::NOT_FOUND,
        Navigation::Redirect { to } => {
            match HeaderValue::from_str(to) {
                Ok(v) => { headers.insert(header::LOCATION, v); }
                Err(e) => error!(target: "stagegate::server", "bad redirect target {}: {}", to, e),
            }
            StatusCode::SEE_OTHER
        }
    };
    let body = serde_json::to_value(&nav).unwrap_or_else(|_| json!({"outcome": "error"}));
    (status, headers, Json(body))
}

#[derive(Debug, Deserialize)]
struct NavigateQuery {
    path: String,
    /// Wait up to this long for the session to settle instead of answering 202.
    #[serde(default)]
    wait_ms: Option<u64>,
}

async fn decide(state: &AppState, visitor: Option<&Visitor>, path: &str, wait_ms: Option<u64>) -> Navigation {
    let Some(visitor) = visitor else {
        return state.navigator.navigate(path, &SessionSnapshot::anonymous());
    };
    match wait_ms {
        Some(ms) if ms > 0 => {
            let limit = Duration::from_millis(ms.min(MAX_WAIT_MS));
            match tokio::time::timeout(limit, state.navigator.navigate_settled(path, &visitor.context)).await {
                Ok(nav) => nav,
                Err(_) => state.navigator.navigate(path, &visitor.context.snapshot()),
            }
        }
        _ => state.navigator.navigate(path, &visitor.context.snapshot()),
    }
}

async fn entry(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let visitor = existing_visitor(&state, &headers).await;
    let nav = decide(&state, visitor.as_deref(), ENTRY_PATH, None).await;
    navigation_response(nav, HeaderMap::new())
}

async fn navigate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<NavigateQuery>,
) -> impl IntoResponse {
    let visitor = existing_visitor(&state, &headers).await;
    let nav = decide(&state, visitor.as_deref(), &q.path, q.wait_ms).await;
    navigation_response(nav, HeaderMap::new())
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

async fn login(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<LoginPayload>) -> impl IntoResponse {
    if payload.id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, HeaderMap::new(), Json(json!({"status":"error","error":"missing id"})));
    }
    let (visitor, out) = match visitor_for(&state, &headers).await {
        Ok(found) => found,
        Err(e) => {
            error!(target: "stagegate::server", "login failed: {}", e);
            let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, HeaderMap::new(), Json(json!({"status":"error","error": e.code_str()})));
        }
    };
    let identity = Identity { id: payload.id.trim().to_string(), email: payload.email };
    info!(target: "stagegate::server", "login id={}", identity.id);
    visitor.provider.sign_in(identity);
    let snap = visitor.context.snapshot();
    (StatusCode::OK, out, Json(json!({"status":"ok","session": snap})))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(vid) = parse_cookie(&headers, VISITOR_COOKIE) else {
        return (StatusCode::OK, HeaderMap::new(), Json(json!({"status":"ok"})));
    };
    let removed = state.visitors.write().await.remove(&vid);
    if let Some(visitor) = removed {
        if let Err(e) = visitor.context.sign_out().await {
            warn!(target: "stagegate::server", "sign_out failed: {}", e);
        }
        tprintln!("visitor.closed vid={}", vid);
    }
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, clear_visitor_cookie());
    (StatusCode::OK, h, Json(json!({"status":"ok"})))
}

async fn session(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let snap = match existing_visitor(&state, &headers).await {
        Some(visitor) => visitor.context.snapshot(),
        None => SessionSnapshot::anonymous(),
    };
    (StatusCode::OK, Json(json!(snap)))
}

async fn retry(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(visitor) = existing_visitor(&state, &headers).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"status":"error","error":"no session"})));
    };
    visitor.context.retry().await;
    (StatusCode::OK, Json(json!(visitor.context.snapshot())))
}

async fn routes(State(state): State<AppState>) -> impl IntoResponse { Json(json!(state.navigator.table())) }

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "stagegate ok" }))
        .route("/", get(entry))
        .route("/navigate", get(navigate))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/session", get(session))
        .route("/session/retry", post(retry))
        .route("/routes", get(routes))
        .with_state(state)
}

/// Start the HTTP server from configuration: load and validate the route table and
/// profile fixtures, then serve until the listener fails.
pub async fn run(config: PortalConfig) -> anyhow::Result<()> {
    let table = config.load_route_table()?;
    let profiles = config.load_profile_store()?;
    info!(
        target: "startup",
        "stagegate starting: routes={} profiles={} resolve_attempts={} backoff_ms={}",
        table.len(),
        profiles.len(),
        config.resolve_attempts,
        config.resolve_backoff.as_millis()
    );
    let state = AppState::new(Navigator::new(Arc::new(table)), Arc::new(profiles), config.retry_policy());
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

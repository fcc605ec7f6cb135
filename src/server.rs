//!
//! fulfillment HTTP server
//! -----------------------
//! Axum-based HTTP surface for the fulfillment dashboard.
//!
//! Responsibilities:
//! - Session cookie handling: write on login/invite acceptance, clear on logout or
//!   whenever a session fails to resolve.
//! - Session middleware that resolves the current user once per request and hands it
//!   to handlers as a `RequestContext` extension.
//! - Role dashboards under `/<role>`; a request for another role's pages is redirected
//!   to the caller's own dashboard.
//! - `/ws` live channel per open dashboard: a `RoleGate` watches the user's directory
//!   record and pushes a redirect frame when the role or status no longer fits the view.
//! - Admin JSON API for the user directory and the audit trail.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditLog};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::identity::{
    match_route, LoginMachine, LoginOutcome, MemoryDirectory, RequestContext, Resolution, Role, RouteDecision, SessionResolver,
    SessionState, TokenStore, User,
};
use crate::navigation::{GateView, Navigator, RoleGate};
use crate::status::{classify, BadgeKind};

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<MemoryDirectory>,
    pub resolver: SessionResolver,
    pub tokens: TokenStore,
    pub audit: Arc<AuditLog>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_directory(config, Arc::new(MemoryDirectory::new()))
    }

    pub fn with_directory(config: Config, directory: Arc<MemoryDirectory>) -> Self {
        if let Some(provider_id) = config.bootstrap_admin.as_deref() {
            let admin = directory.ensure_admin(provider_id, "admin@localhost");
            info!(target: "startup", user_id = %admin.id, "bootstrap admin ready");
        }
        Self {
            resolver: SessionResolver::new(directory.clone()),
            tokens: TokenStore::new(config.secure_cookies()),
            audit: Arc::new(AuditLog::new(config.audit_capacity)),
            config: Arc::new(config),
            directory,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/me", get(me))
        .route("/api/badge", get(badge))
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/invites", post(create_invite))
        .route("/api/admin/users/{id}/active", post(set_active))
        .route("/api/admin/users/{id}/role", post(set_role))
        .route("/api/admin/users/{id}", delete(delete_user))
        .route("/api/admin/audit", get(audit_log))
        .route("/ws", get(live))
        .route("/{segment}", get(dashboard))
        .route("/{segment}/{*rest}", get(dashboard))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/", get(index))
        .route("/auth/login", post(login))
        .route("/auth/invite", post(accept_invite))
        .route("/logout", post(logout))
        .merge(protected)
        .with_state(state)
}

/// Start the server from environment configuration.
pub async fn run() -> anyhow::Result<()> {
    run_with_config(Config::from_env()).await
}

pub async fn run_with_config(config: Config) -> anyhow::Result<()> {
    info!(
        target: "startup",
        "fulfillment starting: bind={}, http_port={}, environment={:?}, redirect_reset_ms={}",
        config.bind, config.http_port, config.environment, config.redirect_reset.as_millis()
    );
    let addr: SocketAddr = format!("{}:{}", config.bind, config.http_port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind, config.http_port))?;
    let state = AppState::new(config);
    let app = build_router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("While binding {}", addr))?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}

fn with_cookie(mut resp: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(v) = cookie {
        resp.headers_mut().insert(header::SET_COOKIE, v);
    }
    resp
}

fn redirect(to: &str, cookie: Option<HeaderValue>) -> Response {
    with_cookie(Redirect::to(to).into_response(), cookie)
}

async fn require_session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = state.tokens.read(req.headers());
    let res = state.resolver.resolve(token.as_deref()).await;
    let user = match &res.state {
        SessionState::Authenticated(user) => user.clone(),
        SessionState::Unauthenticated => return redirect("/", clear_if_needed(&state, &res, token.as_deref())),
    };
    let ctx = RequestContext::new(user);
    debug!(target: "auth", request_id = %ctx.request_id, user_id = %ctx.user.id, path = %req.uri().path(), "session resolved");
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// Public entry point: login page, or the caller's dashboard when already signed in.
async fn index(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Response {
    let token = state.tokens.read(&headers);
    let res = state.resolver.resolve(token.as_deref()).await;
    if let SessionState::Authenticated(user) = &res.state {
        return redirect(&user.role.route(), None);
    }
    with_cookie(Html(LOGIN_PAGE).into_response(), clear_if_needed(&state, &res, token.as_deref()))
}

fn clear_if_needed(state: &AppState, res: &Resolution, token: Option<&str>) -> Option<HeaderValue> {
    if !res.clear_cookie {
        return None;
    }
    // The token is a credential; only its presence goes to the audit trail.
    let detail = if token.is_some() { "session did not resolve" } else { "session missing" };
    state.audit.record(AuditAction::SessionCleared, None, detail);
    Some(state.tokens.clear())
}

const LOGIN_PAGE: &str = "<!doctype html>\n<html><head><title>Fulfillment</title></head>\n<body><main id=\"login\"><h1>Fulfillment</h1><p>Sign in with your organisation account.</p></main></body></html>\n";

#[derive(Debug, Deserialize)]
struct LoginPayload {
    provider_id: String,
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> Response {
    let mut machine = LoginMachine::new();
    let result = match machine.begin(&payload.provider_id) {
        Ok(()) => machine.complete(&*state.directory).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(outcome) => signed_in(&state, outcome, AuditAction::Login),
        Err(e) => {
            state.audit.record(AuditAction::LoginFailed, None, format!("provider_id={} {}", payload.provider_id, e.code_str()));
            e.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct InvitePayload {
    invite_id: String,
    provider_id: String,
    #[serde(default)]
    picture: Option<String>,
}

async fn accept_invite(State(state): State<AppState>, Json(payload): Json<InvitePayload>) -> Response {
    let mut machine = LoginMachine::new();
    let result = machine
        .accept_invite(&*state.directory, &payload.invite_id, &payload.provider_id, payload.picture.as_deref())
        .await;
    match result {
        Ok(outcome) => signed_in(&state, outcome, AuditAction::InviteAccepted),
        Err(e) => {
            state.audit.record(AuditAction::InviteFailed, Some(&payload.invite_id), e.code_str());
            e.into_response()
        }
    }
}

fn signed_in(state: &AppState, outcome: LoginOutcome, action: AuditAction) -> Response {
    let cookie = match state.tokens.write(&outcome.token) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    state.audit.record(action, Some(&outcome.user.id), format!("role={}", outcome.user.role));
    let body = json!({
        "status": "ok",
        "user": outcome.user,
        "redirect": outcome.user.role.route(),
    });
    with_cookie((StatusCode::OK, Json(body)).into_response(), Some(cookie))
}

async fn logout(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Response {
    let token = state.tokens.read(&headers);
    let res = state.resolver.resolve(token.as_deref()).await;
    match &res.state {
        SessionState::Authenticated(user) => {
            let mut machine = LoginMachine::signed_in(user.summary());
            if machine.logout().is_ok() {
                state.audit.record(AuditAction::Logout, Some(&user.id), "logout");
            }
        }
        SessionState::Unauthenticated => {
            clear_if_needed(&state, &res, token.as_deref());
        }
    }
    redirect("/", Some(state.tokens.clear()))
}

async fn dashboard(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>, uri: Uri) -> Response {
    match match_route(ctx.user.role, uri.path()) {
        RouteDecision::Match => {
            let reset_ms = state.config.redirect_reset.as_millis();
            Html(render_dashboard(&ctx.user, uri.path(), reset_ms)).into_response()
        }
        RouteDecision::Mismatch { correct_route } => redirect(&correct_route, None),
    }
}

/// Page shell. The script opens `/ws` for the current path and follows redirect
/// frames behind the loading overlay; `data-redirect-reset-ms` is the server guard window.
fn render_dashboard(user: &User, path: &str, reset_ms: u128) -> String {
    let name = user.name.as_deref().unwrap_or(&user.email);
    format!(
        "<!doctype html>\n<html><head><title>Fulfillment - {role}</title></head>\n<body data-role=\"{role}\" data-path=\"{path}\" data-redirect-reset-ms=\"{reset_ms}\"><header>{name}</header><div id=\"overlay\" hidden>Loading...</div><main id=\"dashboard\"></main>\n<script>{script}</script></body></html>\n",
        role = user.role,
        path = escape_html(path),
        name = escape_html(name),
        script = LIVE_SCRIPT,
    )
}

const LIVE_SCRIPT: &str = "(function(){var p=location.protocol==='https:'?'wss://':'ws://';var ws=new WebSocket(p+location.host+'/ws?path='+encodeURIComponent(location.pathname));ws.onmessage=function(e){var m=JSON.parse(e.data);if(m.type==='redirect'){document.getElementById('overlay').hidden=false;location.replace(m.target);}};})();";

#[derive(Debug, Deserialize)]
struct LiveQuery {
    path: String,
}

/// Forwards `RoleGate` navigations to one socket as JSON frames.
struct SocketNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl Navigator for SocketNavigator {
    fn navigate(&self, target: &str) {
        let frame = json!({ "type": "redirect", "target": target, "overlay": true });
        // Receiver is gone once the socket closed; nothing left to tell.
        let _ = self.tx.send(frame.to_string());
    }
}

async fn live(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(q): Query<LiveQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| live_session(state, ctx, q.path, socket))
}

async fn live_session(state: AppState, ctx: RequestContext, path: String, mut socket: WebSocket) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let gate = RoleGate::new(&path, SocketNavigator { tx }, state.config.redirect_reset);
    let _subscription = gate.attach(&*state.directory, &ctx.user.id);
    let view = gate.refresh(&*state.directory, &ctx.user.id).await;
    debug!(target: "navigation", request_id = %ctx.request_id, user_id = %ctx.user.id, path = %path, ?view, "live channel open");

    let ready = json!({ "type": "ready", "path": path, "render": view == GateView::Render });
    if socket.send(Message::Text(ready.to_string().into())).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(target: "navigation", user_id = %ctx.user.id, "live channel closed");
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

async fn me(Extension(ctx): Extension<RequestContext>) -> Json<User> {
    Json(ctx.user)
}

#[derive(Debug, Deserialize)]
struct BadgeQuery {
    text: String,
    #[serde(default)]
    kind: Option<String>,
}

async fn badge(Query(q): Query<BadgeQuery>) -> AppResult<Json<serde_json::Value>> {
    let kind = q.kind.as_deref().map(str::parse::<BadgeKind>).transpose()?;
    let variant = classify(&q.text, kind);
    Ok(Json(json!({ "text": q.text, "variant": variant })))
}

fn require_admin(ctx: &RequestContext) -> AppResult<()> {
    if ctx.is_admin() {
        Ok(())
    } else {
        Err(AppError::unauthorized("admin_only".to_string(), format!("role {} cannot use the admin API", ctx.user.role)))
    }
}

#[derive(Debug, Deserialize)]
struct ListUsersQuery {
    #[serde(default)]
    include_deleted: bool,
}

async fn list_users(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(q): Query<ListUsersQuery>,
) -> AppResult<Json<Vec<User>>> {
    require_admin(&ctx)?;
    Ok(Json(state.directory.list(q.include_deleted)))
}

#[derive(Debug, Deserialize)]
struct InviteRequest {
    email: String,
    #[serde(default)]
    name: Option<String>,
    role: Role,
}

async fn create_invite(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<InviteRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    require_admin(&ctx)?;
    let invite = state.directory.invite(&body.email, body.name.as_deref(), body.role)?;
    state.audit.record(
        AuditAction::UserInvited,
        Some(&invite.id),
        format!("by={} role={}", ctx.user.id, invite.role),
    );
    Ok((StatusCode::CREATED, Json(invite)))
}

#[derive(Debug, Deserialize)]
struct ActiveRequest {
    active: bool,
}

async fn set_active(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<ActiveRequest>,
) -> AppResult<Json<User>> {
    require_admin(&ctx)?;
    if id == ctx.user.id && !body.active {
        return Err(AppError::user("cannot_deactivate_self", "admins cannot deactivate their own account"));
    }
    let user = state.directory.set_active(&id, body.active)?;
    state.audit.record(AuditAction::UserUpdated, Some(&id), format!("by={} active={}", ctx.user.id, body.active));
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct RoleRequest {
    role: Role,
}

async fn set_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<RoleRequest>,
) -> AppResult<Json<User>> {
    require_admin(&ctx)?;
    if id == ctx.user.id && body.role != Role::Admin {
        return Err(AppError::user("cannot_demote_self", "admins cannot remove their own admin role"));
    }
    let user = state.directory.set_role(&id, body.role)?;
    state.audit.record(AuditAction::UserUpdated, Some(&id), format!("by={} role={}", ctx.user.id, body.role));
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> AppResult<Json<User>> {
    require_admin(&ctx)?;
    if id == ctx.user.id {
        return Err(AppError::user("cannot_delete_self", "admins cannot delete their own account"));
    }
    let user = state.directory.soft_delete(&id)?;
    state.audit.record(AuditAction::UserDeleted, Some(&id), format!("by={}", ctx.user.id));
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn audit_log(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(q): Query<AuditQuery>,
) -> AppResult<Json<serde_json::Value>> {
    require_admin(&ctx)?;
    let entries = state.audit.recent(q.limit.unwrap_or(100));
    Ok(Json(json!({ "entries": entries })))
}

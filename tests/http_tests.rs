//! HTTP surface tests: the router is bound on an ephemeral port and driven with reqwest.
//! Redirects are not followed so each hop and its Set-Cookie header can be checked.

use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue as WsHeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use fulfillment::audit::AuditAction;
use fulfillment::config::{Config, Environment};
use fulfillment::identity::{Role, UserDirectory};
use fulfillment::server::{build_router, AppState};

const ROOT_PROVIDER: &str = "g-root";

type LiveSocket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    base: String,
    state: AppState,
    client: Client,
}

impl TestServer {
    async fn start() -> Result<Self> {
        let config = Config {
            environment: Environment::Development,
            bootstrap_admin: Some(ROOT_PROVIDER.to_string()),
            ..Config::default()
        };
        let state = AppState::new(config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = build_router(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        let client = Client::builder().redirect(Policy::none()).build()?;
        Ok(Self { base: format!("http://{}", addr), state, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str, token: Option<&str>) -> Result<Response> {
        let mut req = self.client.get(self.url(path));
        if let Some(t) = token {
            req = req.header(COOKIE, format!("fulfillment_session={}", t));
        }
        Ok(req.send().await?)
    }

    async fn post_json(&self, path: &str, token: Option<&str>, body: Value) -> Result<Response> {
        let mut req = self.client.post(self.url(path)).json(&body);
        if let Some(t) = token {
            req = req.header(COOKIE, format!("fulfillment_session={}", t));
        }
        Ok(req.send().await?)
    }

    async fn login(&self, provider_id: &str) -> Result<String> {
        let resp = self.post_json("/auth/login", None, json!({ "provider_id": provider_id })).await?;
        assert_eq!(resp.status(), StatusCode::OK);
        session_token(&resp).ok_or_else(|| anyhow::anyhow!("login did not set a session cookie"))
    }

    /// Open the live channel for a dashboard at `path`.
    async fn live(&self, path: &str, token: Option<&str>) -> Result<LiveSocket> {
        let url = format!("{}/ws?path={}", self.base.replacen("http://", "ws://", 1), path);
        let mut req = url.into_client_request()?;
        if let Some(t) = token {
            req.headers_mut().insert("cookie", WsHeaderValue::from_str(&format!("fulfillment_session={}", t))?);
        }
        let (stream, _resp) = tokio_tungstenite::connect_async(req).await?;
        Ok(stream)
    }
}

/// Next JSON text frame, or `None` if nothing arrives within `wait`.
async fn next_frame(ws: &mut LiveSocket, wait: Duration) -> Result<Option<Value>> {
    match tokio::time::timeout(wait, ws.next()).await {
        Err(_) | Ok(None) => Ok(None),
        Ok(Some(msg)) => match msg? {
            WsMessage::Text(s) => Ok(Some(serde_json::from_str(&s)?)),
            other => Err(anyhow::anyhow!("unexpected frame {:?}", other)),
        },
    }
}

fn set_cookie(resp: &Response) -> Option<String> {
    resp.headers().get(SET_COOKIE).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

fn session_token(resp: &Response) -> Option<String> {
    let raw = set_cookie(resp)?;
    let pair = raw.split(';').next()?;
    pair.strip_prefix("fulfillment_session=").map(|s| s.to_string()).filter(|s| !s.is_empty())
}

fn location(resp: &Response) -> Option<String> {
    resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

fn assert_cleared(resp: &Response) {
    let c = set_cookie(resp).expect("expected a Set-Cookie header");
    assert!(c.starts_with("fulfillment_session=;"), "cookie not cleared: {}", c);
    assert!(c.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
}

#[tokio::test]
async fn public_entry_renders_login_page() -> Result<()> {
    let srv = TestServer::start().await?;
    let resp = srv.get("/", None).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(set_cookie(&resp).is_none());
    assert!(resp.text().await?.contains("id=\"login\""));
    Ok(())
}

#[tokio::test]
async fn protected_page_without_cookie_redirects_home() -> Result<()> {
    let srv = TestServer::start().await?;
    let resp = srv.get("/admin", None).await?;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp).as_deref(), Some("/"));
    assert!(set_cookie(&resp).is_none());
    Ok(())
}

#[tokio::test]
async fn invalid_cookie_is_cleared_on_redirect() -> Result<()> {
    let srv = TestServer::start().await?;
    let resp = srv.get("/admin/orders", Some("forged-token")).await?;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp).as_deref(), Some("/"));
    assert_cleared(&resp);

    let entry = &srv.state.audit.recent(1)[0];
    assert_eq!(entry.action, AuditAction::SessionCleared);
    assert_eq!(entry.user_id, None);
    assert!(!entry.detail.contains("forged-token"));
    Ok(())
}

#[tokio::test]
async fn login_sets_cookie_and_routes_by_role() -> Result<()> {
    let srv = TestServer::start().await?;
    let resp = srv.post_json("/auth/login", None, json!({ "provider_id": ROOT_PROVIDER })).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = set_cookie(&resp).unwrap();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(!cookie.contains("Secure"), "development cookies are not Secure");
    let token = session_token(&resp).unwrap();
    let body: Value = resp.json().await?;
    assert_eq!(body["redirect"], "/admin");
    assert_eq!(body["user"]["id"], token.as_str());

    let admin = srv.state.directory.get(&token).expect("token is the user id");
    assert_eq!(admin.role, Role::Admin);
    assert!(admin.last_login.is_some());

    let wrong = srv.get("/packer/queue", Some(&token)).await?;
    assert_eq!(wrong.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&wrong).as_deref(), Some("/admin"));
    assert!(set_cookie(&wrong).is_none());

    let right = srv.get("/admin/users", Some(&token)).await?;
    assert_eq!(right.status(), StatusCode::OK);
    assert!(right.text().await?.contains("data-role=\"admin\""));

    let home = srv.get("/", Some(&token)).await?;
    assert_eq!(location(&home).as_deref(), Some("/admin"));
    Ok(())
}

#[tokio::test]
async fn unknown_provider_login_fails_with_notice_and_no_cookie() -> Result<()> {
    let srv = TestServer::start().await?;
    let resp = srv.post_json("/auth/login", None, json!({ "provider_id": "g-stranger" })).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(set_cookie(&resp).is_none());
    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "error");
    assert!(body["notice"].as_str().is_some_and(|n| !n.is_empty()));

    let audit = srv.state.audit.recent(1);
    assert_eq!(audit[0].action, AuditAction::LoginFailed);
    Ok(())
}

#[tokio::test]
async fn invite_flow_is_single_use() -> Result<()> {
    let srv = TestServer::start().await?;
    let admin = srv.login(ROOT_PROVIDER).await?;

    let created = srv
        .post_json("/api/admin/invites", Some(&admin), json!({ "email": "pat@example.com", "role": "packer" }))
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let invite: Value = created.json().await?;
    let invite_id = invite["id"].as_str().unwrap().to_string();
    assert_eq!(invite["active"], false);

    let accept = json!({ "invite_id": invite_id, "provider_id": "g-pat", "picture": "https://img/pat.png" });
    let first = srv.post_json("/auth/invite", None, accept.clone()).await?;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(session_token(&first).as_deref(), Some(invite_id.as_str()));

    let second = srv.post_json("/auth/invite", None, accept).await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert!(set_cookie(&second).is_none());

    let packer = srv.login("g-pat").await?;
    let page = srv.get("/packer", Some(&packer)).await?;
    assert_eq!(page.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn logout_clears_cookie_and_redirects_home() -> Result<()> {
    let srv = TestServer::start().await?;
    let token = srv.login(ROOT_PROVIDER).await?;
    let resp = srv.post_json("/logout", Some(&token), json!({})).await?;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp).as_deref(), Some("/"));
    assert_cleared(&resp);

    assert_eq!(srv.state.audit.recent(1)[0].action, AuditAction::Logout);

    let anonymous = srv.post_json("/logout", None, json!({})).await?;
    assert_cleared(&anonymous);
    assert_eq!(srv.state.audit.recent(1)[0].action, AuditAction::Logout);

    let before = srv.state.audit.len();
    let stale = srv.post_json("/logout", Some("stale-token"), json!({})).await?;
    assert_eq!(stale.status(), StatusCode::SEE_OTHER);
    assert_cleared(&stale);
    assert_eq!(srv.state.audit.len(), before + 1);
    let entry = &srv.state.audit.recent(1)[0];
    assert_eq!(entry.action, AuditAction::SessionCleared);
    assert_eq!(entry.user_id, None);
    Ok(())
}

#[tokio::test]
async fn admin_api_rejects_other_roles() -> Result<()> {
    let srv = TestServer::start().await?;
    let invite = srv.state.directory.invite("ship@example.com", None, Role::Shipper)?;
    srv.state.directory.accept_invite(&invite.id, "g-ship", None).await?;
    let shipper = srv.login("g-ship").await?;

    let resp = srv.get("/api/admin/users", Some(&shipper)).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "admin_only");

    let me: Value = srv.get("/api/me", Some(&shipper)).await?.json().await?;
    assert_eq!(me["role"], "shipper");
    Ok(())
}

#[tokio::test]
async fn deactivated_user_loses_session() -> Result<()> {
    let srv = TestServer::start().await?;
    let admin = srv.login(ROOT_PROVIDER).await?;
    let invite = srv.state.directory.invite("req@example.com", None, Role::Requester)?;
    srv.state.directory.accept_invite(&invite.id, "g-req", None).await?;
    let requester = srv.login("g-req").await?;

    let off = srv
        .post_json(&format!("/api/admin/users/{}/active", invite.id), Some(&admin), json!({ "active": false }))
        .await?;
    assert_eq!(off.status(), StatusCode::OK);

    let resp = srv.get("/requester", Some(&requester)).await?;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp).as_deref(), Some("/"));
    assert_cleared(&resp);

    let relogin = srv.post_json("/auth/login", None, json!({ "provider_id": "g-req" })).await?;
    assert_eq!(relogin.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn role_change_redirects_existing_session() -> Result<()> {
    let srv = TestServer::start().await?;
    let admin = srv.login(ROOT_PROVIDER).await?;
    let invite = srv.state.directory.invite("mover@example.com", None, Role::Packer)?;
    srv.state.directory.accept_invite(&invite.id, "g-mover", None).await?;
    let mover = srv.login("g-mover").await?;

    let changed = srv
        .post_json(&format!("/api/admin/users/{}/role", invite.id), Some(&admin), json!({ "role": "shipper" }))
        .await?;
    assert_eq!(changed.status(), StatusCode::OK);

    let resp = srv.get("/packer", Some(&mover)).await?;
    assert_eq!(location(&resp).as_deref(), Some("/shipper"));
    Ok(())
}

#[tokio::test]
async fn admin_can_soft_delete_but_not_self() -> Result<()> {
    let srv = TestServer::start().await?;
    let admin = srv.login(ROOT_PROVIDER).await?;
    let invite = srv.state.directory.invite("gone@example.com", None, Role::Packer)?;

    let resp = srv.client.delete(srv.url(&format!("/api/admin/users/{}", invite.id)))
        .header(COOKIE, format!("fulfillment_session={}", admin))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(srv.state.directory.get(&invite.id).unwrap().is_deleted());

    let listed: Vec<Value> = srv.get("/api/admin/users", Some(&admin)).await?.json().await?;
    assert!(listed.iter().all(|u| u["id"] != invite.id.as_str()));

    let own = srv.client.delete(srv.url(&format!("/api/admin/users/{}", admin)))
        .header(COOKIE, format!("fulfillment_session={}", admin))
        .send()
        .await?;
    assert_eq!(own.status(), StatusCode::BAD_REQUEST);

    let audit: Value = srv.get("/api/admin/audit?limit=50", Some(&admin)).await?.json().await?;
    let actions: Vec<&str> = audit["entries"].as_array().unwrap().iter().filter_map(|e| e["action"].as_str()).collect();
    assert!(actions.contains(&"user_deleted"));
    assert!(actions.contains(&"login"));
    Ok(())
}

#[tokio::test]
async fn admin_cannot_lock_themselves_out() -> Result<()> {
    let srv = TestServer::start().await?;
    let admin = srv.login(ROOT_PROVIDER).await?;
    let active_url = format!("/api/admin/users/{}/active", admin);
    let role_url = format!("/api/admin/users/{}/role", admin);

    let off = srv.post_json(&active_url, Some(&admin), json!({ "active": false })).await?;
    assert_eq!(off.status(), StatusCode::BAD_REQUEST);
    let body: Value = off.json().await?;
    assert_eq!(body["code"], "cannot_deactivate_self");

    let demote = srv.post_json(&role_url, Some(&admin), json!({ "role": "packer" })).await?;
    assert_eq!(demote.status(), StatusCode::BAD_REQUEST);
    let body: Value = demote.json().await?;
    assert_eq!(body["code"], "cannot_demote_self");

    assert_eq!(srv.post_json(&active_url, Some(&admin), json!({ "active": true })).await?.status(), StatusCode::OK);
    assert_eq!(srv.post_json(&role_url, Some(&admin), json!({ "role": "admin" })).await?.status(), StatusCode::OK);

    let me = srv.state.directory.get(&admin).unwrap();
    assert!(me.active);
    assert_eq!(me.role, Role::Admin);
    assert_eq!(srv.get("/admin", Some(&admin)).await?.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn role_change_pushes_one_redirect_to_open_dashboard() -> Result<()> {
    let srv = TestServer::start().await?;
    let admin = srv.login(ROOT_PROVIDER).await?;
    let invite = srv.state.directory.invite("live@example.com", None, Role::Packer)?;
    srv.state.directory.accept_invite(&invite.id, "g-live", None).await?;
    let packer = srv.login("g-live").await?;

    let mut ws = srv.live("/packer/queue", Some(&packer)).await?;
    let ready = next_frame(&mut ws, Duration::from_secs(2)).await?.expect("ready frame");
    assert_eq!(ready["type"], "ready");
    assert_eq!(ready["render"], true);

    let url = format!("/api/admin/users/{}/role", invite.id);
    for _ in 0..2 {
        let resp = srv.post_json(&url, Some(&admin), json!({ "role": "shipper" })).await?;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let frame = next_frame(&mut ws, Duration::from_secs(2)).await?.expect("redirect frame");
    assert_eq!(frame["type"], "redirect");
    assert_eq!(frame["target"], "/shipper");
    assert_eq!(frame["overlay"], true);
    assert!(next_frame(&mut ws, Duration::from_millis(100)).await?.is_none(), "guard lets only one redirect through");
    Ok(())
}

#[tokio::test]
async fn live_channel_on_wrong_route_redirects_at_once() -> Result<()> {
    let srv = TestServer::start().await?;
    let admin = srv.login(ROOT_PROVIDER).await?;
    let mut ws = srv.live("/shipper", Some(&admin)).await?;

    let ready = next_frame(&mut ws, Duration::from_secs(2)).await?.expect("ready frame");
    assert_eq!(ready["render"], false);
    let frame = next_frame(&mut ws, Duration::from_secs(2)).await?.expect("redirect frame");
    assert_eq!(frame["target"], "/admin");
    Ok(())
}

#[tokio::test]
async fn live_channel_requires_a_session() -> Result<()> {
    let srv = TestServer::start().await?;
    assert!(srv.live("/admin", None).await.is_err());
    assert!(srv.live("/admin", Some("forged-token")).await.is_err());
    Ok(())
}

#[tokio::test]
async fn badge_endpoint_classifies() -> Result<()> {
    let srv = TestServer::start().await?;
    let token = srv.login(ROOT_PROVIDER).await?;
    let body: Value = srv.get("/api/badge?text=Shipped&kind=stage", Some(&token)).await?.json().await?;
    assert_eq!(body["variant"], "success");
    let body: Value = srv.get("/api/badge?text=VIP%20Customer", Some(&token)).await?.json().await?;
    assert_eq!(body["variant"], "warning");
    let bad = srv.get("/api/badge?text=x&kind=planet", Some(&token)).await?;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

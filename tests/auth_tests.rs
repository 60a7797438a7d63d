//! End-to-end authentication tests
//!
//! Drives the full router in-process:
//! - Client certificate authentication (peer chain attached to the request)
//! - Bearer token authentication through the token registry
//! - Token minting, listing and revocation
//! - Security audit records for every decision

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode, header};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use certgate::audit::{EventType, SecurityEvent, SecurityLogger};
use certgate::auth::{AuthConfig, RevocationCheck};
use certgate::config::Config;
use certgate::identity::AuthMethod;
use certgate::mtls::{CaParams, CertGenerator, LeafCertParams, LeafUsage, PeerCertificates};
use certgate::registry::TokenRegistry;
use certgate::server::{AppState, build_router};
use certgate::token::generate_token;

const SECRET: &[u8] = b"integration-test-secret-32-bytes";
const PEER_IP: &str = "10.0.0.7";

// ── Fixtures ────────────────────────────────────────────────────────────────

/// Audit sink the test can read back.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn events(&self) -> Vec<SecurityEvent> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn last(&self) -> SecurityEvent {
        self.events().pop().expect("at least one audit event")
    }
}

struct Harness {
    router: Router,
    registry: Arc<TokenRegistry>,
    audit: SharedBuf,
}

fn harness(auth_enabled: bool) -> Harness {
    let audit = SharedBuf::default();
    let logger = Arc::new(SecurityLogger::from_writer(audit.clone()));
    let registry = Arc::new(TokenRegistry::new());
    let revocation: Arc<dyn RevocationCheck> = registry.clone();

    let auth = Arc::new(
        AuthConfig::new(SECRET.to_vec())
            .with_enabled(auth_enabled)
            .with_revocation(revocation)
            .with_logger(logger),
    );
    let state = Arc::new(AppState::from_config(
        &Config::default(),
        auth,
        Arc::clone(&registry),
    ));

    Harness {
        router: build_router(state),
        registry,
        audit,
    }
}

/// Client certificate chain for `cn`, signed by a throwaway CA.
fn client_cert(cn: &str) -> PeerCertificates {
    let ca = CertGenerator::init_ca(&CaParams {
        cn: "certgate test CA",
        validity_days: 30,
    })
    .unwrap();
    let leaf = CertGenerator::issue_leaf(
        &LeafCertParams {
            cn,
            org: Some("Example Org"),
            san_dns: vec![],
            usage: LeafUsage::Client,
            validity_days: 30,
        },
        &ca.cert_pem,
        &ca.key_pem,
    )
    .unwrap();

    let chain = rustls_pemfile::certs(&mut leaf.cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    PeerCertificates::new(chain)
}

/// Request builder carrying a peer address and optional credentials.
struct Call {
    method: &'static str,
    uri: String,
    cert: Option<PeerCertificates>,
    bearer: Option<String>,
    body: Option<Value>,
}

impl Call {
    fn new(method: &'static str, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            cert: None,
            bearer: None,
            body: None,
        }
    }

    fn cert(mut self, cert: &PeerCertificates) -> Self {
        self.cert = Some(cert.clone());
        self
    }

    fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn build(self) -> Request<Body> {
        let mut builder = Request::builder().method(self.method).uri(&self.uri);
        if let Some(token) = &self.bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match &self.body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let mut request = builder.body(body).unwrap();
        let peer: SocketAddr = format!("{PEER_IP}:50123").parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        if let Some(cert) = self.cert {
            request.extensions_mut().insert(cert);
        }
        request
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

async fn send(router: &Router, call: Call) -> Reply {
    let response = router.clone().oneshot(call.build()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply {
        status,
        headers,
        body,
    }
}

fn assert_uniform_401(reply: &Reply) {
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.headers[header::WWW_AUTHENTICATE], "Bearer");
    assert_eq!(reply.body, json!({ "error": "unauthorized" }));
}

/// Mint a token as `cert` and return `(id, token)`.
async fn mint(h: &Harness, cert: &PeerCertificates, name: &str) -> (String, String) {
    let reply = send(
        &h.router,
        Call::new("POST", "/api/tokens")
            .cert(cert)
            .json(json!({ "name": name })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    (
        reply.body["id"].as_str().unwrap().to_string(),
        reply.body["token"].as_str().unwrap().to_string(),
    )
}

// ── Public routes & disabled mode ───────────────────────────────────────────

#[tokio::test]
async fn test_health_is_public() {
    let h = harness(true);

    let reply = send(&h.router, Call::new("GET", "/api/health")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "status": "ok" }));
    assert!(h.audit.events().is_empty());
}

#[tokio::test]
async fn test_status_reports_auth_mode() {
    let h = harness(true);

    let reply = send(&h.router, Call::new("GET", "/api/status")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["auth_enabled"], true);
    assert_eq!(reply.body["tls"], false);
}

#[tokio::test]
async fn test_disabled_auth_uses_single_user_identity() {
    let h = harness(false);

    let reply = send(&h.router, Call::new("GET", "/api/whoami")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["common_name"], "single-user-mode");
    assert_eq!(reply.body["auth_method"], "none");
    assert!(reply.headers.get("x-auth-user").is_none());
    assert!(h.audit.events().is_empty());
}

#[tokio::test]
async fn test_disabled_auth_single_user_can_mint_and_delete() {
    let h = harness(false);

    let created = send(
        &h.router,
        Call::new("POST", "/api/tokens").json(json!({ "name": "local" })),
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    let id = created.body["id"].as_str().unwrap().to_string();

    let deleted = send(&h.router, Call::new("DELETE", format!("/api/tokens/{id}"))).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    assert!(h.registry.get(&id).is_none());
}

// ── Certificate authentication ──────────────────────────────────────────────

#[tokio::test]
async fn test_certificate_identity_and_audit() {
    let h = harness(true);
    let alice = client_cert("alice");

    let reply = send(&h.router, Call::new("GET", "/api/whoami").cert(&alice)).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["common_name"], "alice");
    assert_eq!(reply.body["auth_method"], "cert");
    assert!(
        reply.body["distinguished_name"]
            .as_str()
            .unwrap()
            .contains("CN=alice")
    );
    assert_eq!(reply.headers["x-auth-user"], "alice");
    assert_eq!(reply.headers["x-auth-method"], "cert");

    let event = h.audit.last();
    assert_eq!(event.event, EventType::AuthSuccess);
    assert_eq!(event.user_cn.as_deref(), Some("alice"));
    assert_eq!(event.auth_method, Some(AuthMethod::Cert));
    assert_eq!(event.source_ip.as_deref(), Some(PEER_IP));
    assert!(!event.timestamp.is_empty());
}

#[tokio::test]
async fn test_certificate_wins_over_garbage_bearer() {
    let h = harness(true);
    let alice = client_cert("alice");

    let reply = send(
        &h.router,
        Call::new("GET", "/api/whoami")
            .cert(&alice)
            .bearer("not-a-token"),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["auth_method"], "cert");
}

// ── Rejections ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_credentials_rejected() {
    let h = harness(true);

    let reply = send(&h.router, Call::new("GET", "/api/whoami")).await;

    assert_uniform_401(&reply);
    let event = h.audit.last();
    assert_eq!(event.event, EventType::AuthFailure);
    assert_eq!(event.reason.as_deref(), Some("no_credentials"));
    assert_eq!(event.source_ip.as_deref(), Some(PEER_IP));
}

#[tokio::test]
async fn test_forged_token_rejected() {
    let h = harness(true);
    let (forged, _) =
        generate_token("alice", chrono::TimeDelta::hours(1), b"some-other-secret").unwrap();

    let reply = send(&h.router, Call::new("GET", "/api/whoami").bearer(&forged)).await;

    assert_uniform_401(&reply);
    assert_eq!(h.audit.last().reason.as_deref(), Some("invalid_token"));
}

#[tokio::test]
async fn test_unregistered_token_rejected() {
    // GIVEN: a correctly signed token that was never minted through the API
    let h = harness(true);
    let (token, _) = generate_token("alice", chrono::TimeDelta::hours(1), SECRET).unwrap();

    // WHEN
    let reply = send(&h.router, Call::new("GET", "/api/whoami").bearer(&token)).await;

    // THEN: the registry refuses it
    assert_uniform_401(&reply);
    assert_eq!(h.audit.last().reason.as_deref(), Some("token_revoked"));
}

#[tokio::test]
async fn test_rejections_look_identical() {
    let h = harness(true);
    let (forged, _) = generate_token("alice", chrono::TimeDelta::hours(1), b"wrong").unwrap();

    let none = send(&h.router, Call::new("GET", "/api/whoami")).await;
    let bad = send(&h.router, Call::new("GET", "/api/whoami").bearer(&forged)).await;
    let cert_only = send(
        &h.router,
        Call::new("POST", "/api/tokens")
            .bearer(&forged)
            .json(json!({ "name": "x" })),
    )
    .await;

    for reply in [&none, &bad, &cert_only] {
        assert_uniform_401(reply);
    }
}

// ── Token lifecycle ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_token_lifecycle() {
    let h = harness(true);
    let alice = client_cert("alice");

    // Mint
    let (id, token) = mint(&h, &alice, "ci-runner").await;
    assert!(id.starts_with("tok_"));
    let created = h.audit.last();
    assert_eq!(created.event, EventType::TokenCreated);
    assert_eq!(created.token_id.as_deref(), Some(id.as_str()));
    assert!(created.details.unwrap().contains("name=ci-runner"));

    // Use
    let whoami = send(&h.router, Call::new("GET", "/api/whoami").bearer(&token)).await;
    assert_eq!(whoami.status, StatusCode::OK);
    assert_eq!(whoami.body["common_name"], "alice");
    assert_eq!(whoami.body["auth_method"], "token");
    assert_eq!(whoami.body["token_id"], id.as_str());
    assert_eq!(whoami.headers["x-auth-method"], "token");

    // List (token auth is enough); the raw token and its hash never appear
    let list = send(&h.router, Call::new("GET", "/api/tokens").bearer(&token)).await;
    assert_eq!(list.status, StatusCode::OK);
    let records = list.body.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], id.as_str());
    assert_eq!(records[0]["name"], "ci-runner");
    assert!(records[0].get("token_hash").is_none());
    assert!(!list.body.to_string().contains(&token));

    // Revoke
    let deleted = send(
        &h.router,
        Call::new("DELETE", format!("/api/tokens/{id}")).cert(&alice),
    )
    .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let revoked = h.audit.last();
    assert_eq!(revoked.event, EventType::TokenRevoked);
    assert_eq!(revoked.token_id.as_deref(), Some(id.as_str()));

    // The signature is still valid, but the token no longer works
    let after = send(&h.router, Call::new("GET", "/api/whoami").bearer(&token)).await;
    assert_uniform_401(&after);
    assert_eq!(h.audit.last().reason.as_deref(), Some("token_revoked"));

    // Second delete is a 404
    let again = send(
        &h.router,
        Call::new("DELETE", format!("/api/tokens/{id}")).cert(&alice),
    )
    .await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_token_cannot_mint_tokens() {
    let h = harness(true);
    let alice = client_cert("alice");
    let (_, token) = mint(&h, &alice, "laptop").await;

    let reply = send(
        &h.router,
        Call::new("POST", "/api/tokens")
            .bearer(&token)
            .json(json!({ "name": "escalation" })),
    )
    .await;

    assert_uniform_401(&reply);
    let event = h.audit.last();
    assert_eq!(event.reason.as_deref(), Some("cert_required"));
    assert_eq!(event.details.as_deref(), Some("token auth not accepted"));
    assert_eq!(h.registry.len(), 1);
}

#[tokio::test]
async fn test_token_cannot_delete_tokens() {
    let h = harness(true);
    let alice = client_cert("alice");
    let (id, token) = mint(&h, &alice, "laptop").await;

    let reply = send(
        &h.router,
        Call::new("DELETE", format!("/api/tokens/{id}")).bearer(&token),
    )
    .await;

    assert_uniform_401(&reply);
    assert!(h.registry.get(&id).is_some());
}

#[tokio::test]
async fn test_cannot_delete_another_users_token() {
    let h = harness(true);
    let alice = client_cert("alice");
    let bob = client_cert("bob");
    let (id, token) = mint(&h, &alice, "alice-only").await;

    let reply = send(
        &h.router,
        Call::new("DELETE", format!("/api/tokens/{id}")).cert(&bob),
    )
    .await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    let still_valid = send(&h.router, Call::new("GET", "/api/whoami").bearer(&token)).await;
    assert_eq!(still_valid.status, StatusCode::OK);
}

#[tokio::test]
async fn test_listing_is_scoped_to_caller() {
    let h = harness(true);
    let alice = client_cert("alice");
    let bob = client_cert("bob");
    mint(&h, &alice, "a1").await;
    mint(&h, &alice, "a2").await;
    mint(&h, &bob, "b1").await;

    let reply = send(&h.router, Call::new("GET", "/api/tokens").cert(&bob)).await;

    let names: Vec<&str> = reply
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["b1"]);
}

#[tokio::test]
async fn test_create_token_validation() {
    let h = harness(true);
    let alice = client_cert("alice");

    let blank = send(
        &h.router,
        Call::new("POST", "/api/tokens")
            .cert(&alice)
            .json(json!({ "name": "   " })),
    )
    .await;
    assert_eq!(blank.status, StatusCode::BAD_REQUEST);

    let missing_name = send(
        &h.router,
        Call::new("POST", "/api/tokens")
            .cert(&alice)
            .json(json!({ "label": "x" })),
    )
    .await;
    assert_eq!(missing_name.status, StatusCode::BAD_REQUEST);

    let negative_ttl = send(
        &h.router,
        Call::new("POST", "/api/tokens")
            .cert(&alice)
            .json(json!({ "name": "x", "expires_in_secs": -5 })),
    )
    .await;
    assert_eq!(negative_ttl.status, StatusCode::BAD_REQUEST);

    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_requested_ttl_is_capped() {
    let h = harness(true);
    let alice = client_cert("alice");
    let max_ttl = Config::default().auth.token_max_ttl_secs;

    let reply = send(
        &h.router,
        Call::new("POST", "/api/tokens")
            .cert(&alice)
            .json(json!({ "name": "forever", "expires_in_secs": max_ttl * 10 })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED);

    let parse = |field: &str| {
        chrono::DateTime::parse_from_rfc3339(reply.body[field].as_str().unwrap()).unwrap()
    };
    let lifetime = parse("expires_at") - parse("created_at");
    assert!(lifetime.num_seconds() <= max_ttl);
    assert!(lifetime.num_seconds() > max_ttl - 5);
}

#[tokio::test]
async fn test_out_of_range_ttl_is_capped_not_fatal() {
    // GIVEN: a lifetime far beyond what a duration can represent
    let h = harness(true);
    let alice = client_cert("alice");
    let max_ttl = Config::default().auth.token_max_ttl_secs;

    // WHEN
    let reply = send(
        &h.router,
        Call::new("POST", "/api/tokens")
            .cert(&alice)
            .json(json!({ "name": "huge", "expires_in_secs": i64::MAX })),
    )
    .await;

    // THEN: the token is minted with the configured maximum lifetime
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    let parse = |field: &str| {
        chrono::DateTime::parse_from_rfc3339(reply.body[field].as_str().unwrap()).unwrap()
    };
    let lifetime = parse("expires_at") - parse("created_at");
    assert!(lifetime.num_seconds() <= max_ttl);
    assert!(lifetime.num_seconds() > max_ttl - 5);

    let token = reply.body["token"].as_str().unwrap();
    let whoami = send(&h.router, Call::new("GET", "/api/whoami").bearer(token)).await;
    assert_eq!(whoami.status, StatusCode::OK);
}

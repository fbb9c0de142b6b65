//! In-process mock ACME server for the end-to-end tests.
//!
//! The server keeps just enough state to walk the account, order, and
//! challenge machines through their documented transitions: one pending
//! order poll before `ready`, one `processing` poll after finalize and after
//! challenge activation. Every response (except the directory document)
//! mints a fresh `Replay-Nonce`, and each signed request is checked against
//! the nonce most recently minted so the tests can prove none goes stale.

use std::{
    net::TcpListener,
    sync::{Arc, Mutex},
    thread,
};

use actix_web::{dev::ServerHandle, http::Method, web, App, HttpRequest, HttpResponse, HttpServer};
use base64::prelude::*;
use serde_json::{json, Value};

pub const TEST_CERT_PEM: &str =
    "-----BEGIN CERTIFICATE-----\nTESTCERT\n-----END CERTIFICATE-----\n";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Pretend an account already exists for any key.
    pub account_exists: bool,
    /// Advertise a `meta.termsOfService` URL in the directory.
    pub terms_of_service: bool,
    /// Contacts reported for the existing account.
    pub contact: Vec<String>,
    /// Challenge types offered by the single authorization, in order.
    pub challenge_types: Vec<&'static str>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            account_exists: false,
            terms_of_service: false,
            contact: Vec::new(),
            challenge_types: vec!["dns-01"],
        }
    }
}

#[derive(Debug, Default)]
pub struct ServerState {
    nonce_counter: u64,
    pub last_nonce: String,
    /// Set when a signed request carried anything but the latest nonce.
    pub stale_nonce_seen: bool,
    /// "jwk" or "kid" for every signed request, in order.
    pub header_forms: Vec<String>,

    pub account_created: bool,
    pub registered_contact: Vec<String>,
    pub updated_contact: Option<Vec<String>>,
    pub deactivated: bool,

    order_polls: u32,
    pub finalized: bool,
    final_polls: u32,
    challenge_polls: u32,
    /// Challenge paths that received an activation POST.
    pub activated: Vec<String>,

    pub revoked: bool,
    pub revoked_certificate: Option<String>,
    pub revoked_reason: Option<u64>,
}

impl ServerState {
    fn mint_nonce(&mut self) -> String {
        self.nonce_counter += 1;
        self.last_nonce = format!("test-nonce-{}", self.nonce_counter);
        self.last_nonce.clone()
    }
}

pub struct TestServer {
    pub base_url: String,
    pub dir_url: String,
    pub state: Arc<Mutex<ServerState>>,
    handle: ServerHandle,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        drop(self.handle.stop(false));
    }
}

struct TestData {
    base_url: String,
    config: ServerConfig,
    state: Arc<Mutex<ServerState>>,
}

pub fn with_acme_server(config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let state = Arc::new(Mutex::new(ServerState::default()));

    let data = web::Data::new(TestData {
        base_url: base_url.clone(),
        config,
        state: Arc::clone(&state),
    });

    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .default_service(web::route().to(route_request))
    })
    .listen(listener)
    .unwrap()
    .workers(1)
    .disable_signals()
    .shutdown_timeout(0)
    .run();

    let handle = server.handle();
    thread::spawn(move || {
        actix_web::rt::System::new().block_on(server).ok();
    });

    TestServer {
        dir_url: format!("{base_url}/directory"),
        base_url,
        state,
        handle,
    }
}

fn decode_b64_json(encoded: Option<&str>) -> Value {
    encoded
        .and_then(|b64| BASE64_URL_SAFE_NO_PAD.decode(b64).ok())
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .unwrap_or(Value::Null)
}

async fn route_request(
    req: HttpRequest,
    body: web::Bytes,
    data: web::Data<TestData>,
) -> HttpResponse {
    let base = data.base_url.as_str();
    let path = req.path().to_owned();

    // Unwrap the JWS envelope of signed requests: the protected header for
    // nonce/key accounting, the payload to act on.
    let (protected, payload) = if req.method() == Method::POST {
        let envelope: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let protected = decode_b64_json(envelope["protected"].as_str());
        let payload = match envelope["payload"].as_str() {
            Some("") => Value::String(String::new()),
            other => decode_b64_json(other),
        };
        (protected, payload)
    } else {
        (Value::Null, Value::Null)
    };

    let mut state = data.state.lock().unwrap();

    if req.method() == Method::POST {
        match protected["nonce"].as_str() {
            Some(nonce) if nonce == state.last_nonce => {}
            _ => state.stale_nonce_seen = true,
        }
        let form = if protected.get("jwk").is_some() {
            "jwk"
        } else {
            "kid"
        };
        state.header_forms.push(form.to_owned());
    }

    match (req.method(), path.as_str()) {
        (&Method::GET, "/directory") => {
            let mut meta = json!({ "caaIdentities": ["testdir.org"] });
            if data.config.terms_of_service {
                meta["termsOfService"] = json!(format!("{base}/acme/terms"));
            }
            HttpResponse::Ok()
                .content_type("application/json")
                .body(
                    json!({
                        "newNonce": format!("{base}/acme/new-nonce"),
                        "newAccount": format!("{base}/acme/new-acct"),
                        "newOrder": format!("{base}/acme/new-order"),
                        "revokeCert": format!("{base}/acme/revoke-cert"),
                        "keyChange": format!("{base}/acme/key-change"),
                        "meta": meta,
                    })
                    .to_string(),
                )
        }

        (&Method::GET, "/acme/new-nonce") => {
            let nonce = state.mint_nonce();
            HttpResponse::NoContent()
                .insert_header(("Replay-Nonce", nonce))
                .finish()
        }

        (&Method::POST, "/acme/new-acct") => {
            let nonce = state.mint_nonce();
            if payload["onlyReturnExisting"] == json!(true) {
                if data.config.account_exists || state.account_created {
                    HttpResponse::Ok()
                        .insert_header(("Replay-Nonce", nonce))
                        .insert_header(("Location", format!("{base}/acme/acct/1")))
                        .content_type("application/json")
                        .body(
                            json!({
                                "status": "valid",
                                "contact": data.config.contact.clone(),
                            })
                            .to_string(),
                        )
                } else {
                    HttpResponse::BadRequest()
                        .insert_header(("Replay-Nonce", nonce))
                        .content_type("application/problem+json")
                        .body(
                            json!({
                                "type": "urn:ietf:params:acme:error:accountDoesNotExist",
                                "detail": "No account exists with the provided key",
                                "status": 400,
                            })
                            .to_string(),
                        )
                }
            } else {
                state.account_created = true;
                state.registered_contact = payload["contact"]
                    .as_array()
                    .map(|contacts| {
                        contacts
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                HttpResponse::Created()
                    .insert_header(("Replay-Nonce", nonce))
                    .insert_header(("Location", format!("{base}/acme/acct/1")))
                    .content_type("application/json")
                    .body(
                        json!({
                            "status": "valid",
                            "contact": state.registered_contact.clone(),
                        })
                        .to_string(),
                    )
            }
        }

        (&Method::POST, "/acme/acct/1") => {
            let nonce = state.mint_nonce();
            let body = if payload["status"] == json!("deactivated") {
                state.deactivated = true;
                json!({ "status": "deactivated" })
            } else if let Some(contact) = payload["contact"].as_array() {
                let contact: Vec<String> = contact
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect();
                state.updated_contact = Some(contact.clone());
                json!({ "status": "valid", "contact": contact })
            } else {
                json!({ "status": "valid", "contact": data.config.contact.clone() })
            };
            HttpResponse::Ok()
                .insert_header(("Replay-Nonce", nonce))
                .content_type("application/json")
                .body(body.to_string())
        }

        (&Method::POST, "/acme/new-order") => {
            let nonce = state.mint_nonce();
            HttpResponse::Created()
                .insert_header(("Replay-Nonce", nonce))
                .insert_header(("Location", format!("{base}/acme/order/1")))
                .content_type("application/json")
                .body(
                    json!({
                        "status": "pending",
                        "expires": "2030-01-01T00:00:00Z",
                        "identifiers": payload["identifiers"].clone(),
                        "authorizations": [format!("{base}/acme/authz/1")],
                        "finalize": format!("{base}/acme/finalize/1"),
                    })
                    .to_string(),
                )
        }

        (&Method::POST, "/acme/order/1") => {
            let nonce = state.mint_nonce();
            let status = if state.finalized {
                state.final_polls += 1;
                if state.final_polls <= 1 {
                    "processing"
                } else {
                    "valid"
                }
            } else {
                state.order_polls += 1;
                if state.order_polls <= 1 {
                    "pending"
                } else {
                    "ready"
                }
            };
            let mut order = json!({
                "status": status,
                "expires": "2030-01-01T00:00:00Z",
                "identifiers": [{ "type": "dns", "value": "example.com" }],
                "authorizations": [format!("{base}/acme/authz/1")],
                "finalize": format!("{base}/acme/finalize/1"),
            });
            if status == "valid" {
                order["certificate"] = json!(format!("{base}/acme/cert/1"));
            }
            HttpResponse::Ok()
                .insert_header(("Replay-Nonce", nonce))
                .content_type("application/json")
                .body(order.to_string())
        }

        (&Method::POST, "/acme/authz/1") => {
            let nonce = state.mint_nonce();
            let challenges: Vec<Value> = data
                .config
                .challenge_types
                .iter()
                .enumerate()
                .map(|(i, challenge_type)| {
                    json!({
                        "type": challenge_type,
                        "status": "pending",
                        "url": format!("{base}/acme/chlg/{i}"),
                        "token": format!("tok-{challenge_type}"),
                    })
                })
                .collect();
            HttpResponse::Ok()
                .insert_header(("Replay-Nonce", nonce))
                .content_type("application/json")
                .body(
                    json!({
                        "identifier": { "type": "dns", "value": "example.com" },
                        "status": "pending",
                        "expires": "2030-01-01T00:00:00Z",
                        "challenges": challenges,
                    })
                    .to_string(),
                )
        }

        (&Method::POST, chlg_path) if chlg_path.starts_with("/acme/chlg/") => {
            let nonce = state.mint_nonce();
            let index: usize = chlg_path
                .trim_start_matches("/acme/chlg/")
                .parse()
                .unwrap_or(0);
            let challenge_type = data
                .config
                .challenge_types
                .get(index)
                .copied()
                .unwrap_or("dns-01");

            let status = if payload.is_object() {
                // activation
                state.activated.push(chlg_path.to_owned());
                "pending"
            } else {
                state.challenge_polls += 1;
                if state.challenge_polls <= 1 {
                    "processing"
                } else {
                    "valid"
                }
            };
            HttpResponse::Ok()
                .insert_header(("Replay-Nonce", nonce))
                .content_type("application/json")
                .body(
                    json!({
                        "type": challenge_type,
                        "status": status,
                        "url": format!("{base}{chlg_path}"),
                        "token": format!("tok-{challenge_type}"),
                    })
                    .to_string(),
                )
        }

        (&Method::POST, "/acme/finalize/1") => {
            let nonce = state.mint_nonce();
            state.finalized = true;
            HttpResponse::Ok()
                .insert_header(("Replay-Nonce", nonce))
                .content_type("application/json")
                .body(
                    json!({
                        "status": "processing",
                        "expires": "2030-01-01T00:00:00Z",
                        "identifiers": [{ "type": "dns", "value": "example.com" }],
                        "authorizations": [format!("{base}/acme/authz/1")],
                        "finalize": format!("{base}/acme/finalize/1"),
                    })
                    .to_string(),
                )
        }

        (&Method::POST, "/acme/cert/1") => {
            let nonce = state.mint_nonce();
            HttpResponse::Ok()
                .insert_header(("Replay-Nonce", nonce))
                .content_type("application/pem-certificate-chain")
                .body(TEST_CERT_PEM)
        }

        (&Method::POST, "/acme/revoke-cert") => {
            let nonce = state.mint_nonce();
            if payload["certificate"].is_string() {
                state.revoked = true;
                state.revoked_certificate =
                    payload["certificate"].as_str().map(str::to_owned);
                state.revoked_reason = payload["reason"].as_u64();
                HttpResponse::Ok()
                    .insert_header(("Replay-Nonce", nonce))
                    .finish()
            } else {
                HttpResponse::BadRequest()
                    .insert_header(("Replay-Nonce", nonce))
                    .content_type("application/problem+json")
                    .body(
                        json!({
                            "type": "urn:ietf:params:acme:error:malformed",
                            "detail": "no certificate in payload",
                            "status": 400,
                        })
                        .to_string(),
                    )
            }
        }

        _ => HttpResponse::NotFound().finish(),
    }
}

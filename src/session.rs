//! Protocol session: signed and unsigned exchanges plus the nonce lifecycle.
//!
//! Setup is:
//!
//! 1. [`Session::new`] with the account key.
//! 2. [`crate::account::bootstrap`] to fetch the directory and first nonce.
//! 3. An account operation that learns the key ID from a `Location` header.
//! 4. Any number of further signed calls, now in `kid` form.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    api,
    error::{Error, Result},
    jws::{self, Jwk, ProtectedHeader},
    key::AccountKey,
    req::{self, RawResponse},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The most recent HTTP exchange, owned by the session and replaced wholesale
/// on every request.
#[derive(Debug, Default)]
pub struct LastResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: String,
    pub content_type: String,
    /// Parsed body, when the content type says it is JSON.
    pub json: Option<Value>,
}

impl LastResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Sole owner of all mutable protocol state for one run.
pub struct Session {
    agent: ureq::Agent,
    account_key: AccountKey,
    domain_key: Option<p256::ecdsa::SigningKey>,
    directory: Option<api::Directory>,
    account: Option<api::Account>,
    order: Option<api::Order>,
    /// At most one valid nonce exists at a time; a signed POST consumes it
    /// and adopts the `Replay-Nonce` of the response.
    nonce: Option<String>,
    last: LastResponse,
    poll_interval: Duration,
}

impl Session {
    pub fn new(account_key: p256::ecdsa::SigningKey) -> Self {
        Session {
            agent: req::agent(),
            account_key: AccountKey::new(account_key),
            domain_key: None,
            directory: None,
            account: None,
            order: None,
            nonce: None,
            last: LastResponse::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn set_domain_key(&mut self, key: p256::ecdsa::SigningKey) {
        self.domain_key = Some(key);
    }

    pub fn domain_key(&self) -> Result<&p256::ecdsa::SigningKey> {
        self.domain_key
            .as_ref()
            .ok_or_else(|| Error::protocol("no domain key loaded"))
    }

    pub fn account_key(&self) -> &AccountKey {
        &self.account_key
    }

    pub fn kid(&self) -> Option<&str> {
        self.account_key.key_id()
    }

    pub fn set_kid(&mut self, kid: String) {
        log::debug!("key ID is {kid}");
        self.account_key.set_key_id(kid);
    }

    pub(crate) fn set_directory(&mut self, directory: api::Directory) {
        self.directory = Some(directory);
    }

    pub fn directory(&self) -> Result<&api::Directory> {
        self.directory
            .as_ref()
            .ok_or_else(|| Error::protocol("directory not fetched yet"))
    }

    pub fn set_account(&mut self, account: api::Account) {
        self.account = Some(account);
    }

    pub fn account(&self) -> Result<&api::Account> {
        self.account
            .as_ref()
            .ok_or_else(|| Error::protocol("account not retrieved yet"))
    }

    pub(crate) fn set_order(&mut self, order: api::Order) {
        self.order = Some(order);
    }

    /// The most recent order snapshot. Useful for debugging.
    pub fn order(&self) -> Option<&api::Order> {
        self.order.as_ref()
    }

    /// Delay between status polls. The protocol default is 5 seconds; tests
    /// shrink it.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn last(&self) -> &LastResponse {
        &self.last
    }

    /// Unsigned GET. Captures headers and body into [`Self::last`], adopts
    /// any `Replay-Nonce`, and returns the status code.
    pub fn fetch(&mut self, url: &str) -> Result<u16> {
        log::debug!("GET {url}");
        let raw = req::get(&self.agent, url)?;
        Ok(self.absorb(raw))
    }

    /// Signed POST of `payload` to `url`, returning the status code.
    ///
    /// The protected header uses `kid` form once the account URL is known and
    /// `jwk` form before that. The held nonce is consumed up front; whatever
    /// `Replay-Nonce` the response carries (success or error) replaces it.
    pub fn sign_and_send<T: Serialize + ?Sized>(&mut self, url: &str, payload: &T) -> Result<u16> {
        let nonce = self
            .nonce
            .take()
            .ok_or_else(|| Error::protocol("need a nonce first"))?;

        let protected = match self.account_key.key_id() {
            Some(kid) if !kid.is_empty() => ProtectedHeader::new_kid(kid, url, nonce),
            _ => {
                let jwk = Jwk::try_from(self.account_key.signing_key())?;
                ProtectedHeader::new_jwk(jwk, url, nonce)
            }
        };

        let body = jws::sign(protected, self.account_key.signing_key(), payload)?;

        log::debug!("POST {url}");
        let raw = req::post_jose(&self.agent, url, &body)?;
        Ok(self.absorb(raw))
    }

    fn absorb(&mut self, raw: RawResponse) -> u16 {
        if let Some(nonce) = raw.header("replay-nonce") {
            self.nonce = Some(nonce.to_owned());
        }

        let content_type = raw.header("content-type").unwrap_or_default().to_owned();
        let json = if content_type.contains("json") {
            serde_json::from_str(&raw.body).ok()
        } else {
            None
        };

        self.last = LastResponse {
            status: raw.status,
            headers: raw.headers,
            body: raw.body,
            content_type,
            json,
        };

        self.last.status
    }

    /// Deserialize the last response body.
    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.last.json {
            Some(json) => Ok(serde_json::from_value(json.clone())?),
            None => Err(Error::protocol("expected a JSON response body")),
        }
    }

    pub fn require_header(&self, name: &str) -> Result<String> {
        self.last
            .header(name)
            .map(str::to_owned)
            .ok_or_else(|| Error::protocol(format!("missing header: {name}")))
    }

    /// The ACME problem in the last response, if any.
    ///
    /// A response is a problem when its content type is
    /// `application/problem+json` or the body carries a top-level `error`
    /// object.
    pub fn problem(&self) -> Option<api::Problem> {
        let json = self.last.json.as_ref()?;

        if self
            .last
            .content_type
            .to_ascii_lowercase()
            .contains("application/problem+json")
        {
            return serde_json::from_value(json.clone()).ok();
        }

        match json.get("error") {
            Some(error @ Value::Object(_)) => serde_json::from_value(error.clone()).ok(),
            _ => None,
        }
    }

    /// Build the error for a failed exchange: the server's problem document
    /// when it sent one (logged verbatim for the operator), otherwise a
    /// protocol error with `msg`.
    pub(crate) fn fail(&self, msg: impl Into<String>) -> Error {
        match self.problem() {
            Some(problem) => {
                self.log_problem();
                Error::Problem(problem)
            }
            None => Error::Protocol(msg.into()),
        }
    }

    /// Fail if the last response carries a problem even though the status
    /// code looked fine.
    pub(crate) fn check_problem(&self) -> Result<()> {
        match self.problem() {
            Some(problem) => {
                self.log_problem();
                Err(Error::Problem(problem))
            }
            None => Ok(()),
        }
    }

    fn log_problem(&self) {
        if let Some(json) = &self.last.json {
            if let Ok(doc) = serde_json::to_string_pretty(json) {
                log::warn!("the server reported the following error:\n{doc}");
            }
        }
    }
}

//! ACME wire objects.
//!
//! Request payloads serialize to exactly the JSON the protocol expects (no
//! `null` placeholders); response objects tolerate fields this client does
//! not use.

use std::fmt;

use serde::{
    ser::{SerializeMap as _, Serializer},
    Deserialize, Serialize,
};

/// Serializes to `""`, the POST-as-GET payload.
pub struct EmptyString;

impl Serialize for EmptyString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("")
    }
}

/// Serializes to `{}`, the challenge activation payload.
pub struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

/// Directory object for client self-configuration.
///
/// See [RFC 8555 §7.1.1](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,

    /// Servers without pre-authorization support omit this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_authz: Option<String>,

    pub revoke_cert: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_change: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

impl Directory {
    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.as_ref()?.terms_of_service.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub caa_identities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_account_required: Option<bool>,
}

/// Account object, doubling as the `newAccount` request payload.
///
/// All fields are optional so that the same struct expresses the lookup
/// payload (`{"onlyReturnExisting":true}`), the creation payload, the email
/// update and the deactivation request without serializing anything extra.
///
/// See [RFC 8555 §7.1.2](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_return_existing: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,
}

impl Account {
    /// The `{"onlyReturnExisting":true}` lookup payload.
    pub fn lookup() -> Self {
        Account {
            only_return_existing: Some(true),
            ..Default::default()
        }
    }

    pub fn is_status_valid(&self) -> bool {
        self.status.as_deref() == Some("valid")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: &str) -> Self {
        Identifier {
            _type: "dns".to_owned(),
            value: value.to_owned(),
        }
    }

    pub fn is_type_dns(&self) -> bool {
        self._type == "dns"
    }
}

/// The `newOrder` request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrderRequest {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderRequest {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        NewOrderRequest {
            identifiers: names
                .iter()
                .map(|name| Identifier::dns(name.as_ref()))
                .collect(),
        }
    }
}

/// See [RFC 8555 §7.1.3](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// An order resource as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub status: OrderStatus,

    pub expires: Option<String>,

    #[serde(default)]
    pub identifiers: Vec<Identifier>,

    pub error: Option<Problem>,

    #[serde(default)]
    pub authorizations: Vec<String>,

    pub finalize: String,

    /// Present once the order reaches `valid`.
    pub certificate: Option<String>,
}

/// See [RFC 8555 §7.1.4](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// An authorization resource: one identifier, several candidate challenges.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub expires: Option<String>,
    pub challenges: Vec<Challenge>,
    pub wildcard: Option<bool>,
}

/// See [RFC 8555 §7.1.6](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Challenge {
    /// `dns-01`, `http-01`, `tls-alpn-01`, or a type this client has never
    /// heard of; unknown types are still offered to the hook.
    #[serde(rename = "type")]
    pub _type: String,

    pub url: String,

    pub status: ChallengeStatus,

    pub validated: Option<String>,

    /// Populated by the server when validation failed.
    pub error: Option<Problem>,

    #[serde(default)]
    pub token: String,
}

/// Order finalization payload carrying the CSR.
///
/// The CSR is base64url-encoded DER, not PEM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finalize {
    pub csr: String,
}

impl Finalize {
    pub fn new(csr: String) -> Self {
        Finalize { csr }
    }
}

/// Certificate revocation payload.
///
/// See [RFC 8555 §7.6](https://datatracker.ietf.org/doc/html/rfc8555#section-7.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revocation {
    /// base64url-encoded DER of the end-entity certificate.
    pub certificate: String,

    /// Revocation reason code from [RFC 5280 §5.3.1].
    ///
    /// [RFC 5280 §5.3.1]: https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1
    pub reason: usize,
}

impl Revocation {
    pub fn new(certificate: String, reason: usize) -> Self {
        Revocation {
            certificate,
            reason,
        }
    }
}

pub const ERROR_ACCOUNT_DOES_NOT_EXIST: &str = "urn:ietf:params:acme:error:accountDoesNotExist";

/// An `application/problem+json` error document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<Subproblem>>,
}

impl Problem {
    /// True for the problem that signals "no account for this key", which
    /// the `new` subcommand treats as the go-ahead to create one.
    pub fn is_account_does_not_exist(&self) -> bool {
        self._type == ERROR_ACCOUNT_DOES_NOT_EXIST
    }

    pub fn is_bad_nonce(&self) -> bool {
        self._type == "urn:ietf:params:acme:error:badNonce" || self._type == "badNonce"
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type),
            None => write!(f, "{}", self._type),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub _type: String,
    pub detail: Option<String>,
    pub identifier: Option<Identifier>,
}

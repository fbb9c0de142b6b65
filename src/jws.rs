//! JWS Flattened JSON Serialization for signed ACME requests.
//!
//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use base64::prelude::*;
use p256::ecdsa::{signature::Signer as _, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// JWS Protected Header.
///
/// > For newAccount requests, and for revokeCert requests authenticated by a
/// > certificate key, there MUST be a "jwk" field. [...] For all other
/// > requests, the request is signed using an existing account, and there
/// > MUST be a "kid" field.
///
/// The two constructors enforce the mutual exclusion; the session picks one
/// based on whether the account URL is known yet.
#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct ProtectedHeader {
    alg: String,

    /// Anti-replay token; must be the value most recently issued by the
    /// server ([RFC 8555 §6.5]).
    ///
    /// [RFC 8555 §6.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.5
    nonce: String,

    /// Target URL, bound into the signature ([RFC 8555 §6.4]).
    ///
    /// [RFC 8555 §6.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.4
    url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    pub(crate) fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        ProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    pub(crate) fn new_kid(kid: &str, url: &str, nonce: String) -> Self {
        ProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }
}

/// JSON Web Key form of a P-256 public key.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Jwk {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    _use: String,
    x: String,
    y: String,
}

impl TryFrom<&p256::ecdsa::SigningKey> for Jwk {
    type Error = Error;

    fn try_from(key: &p256::ecdsa::SigningKey) -> Result<Self> {
        let point = key.verifying_key().to_encoded_point(false);

        let x = point
            .x()
            .ok_or_else(|| Error::crypto("public key has no x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| Error::crypto("public key has no y coordinate"))?;

        Ok(Jwk {
            alg: "ES256".to_owned(),
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            _use: "sig".to_owned(),
            x: base64url(x),
            y: base64url(y),
        })
    }
}

// LEXICAL ORDER OF FIELDS MATTERS: RFC 7638 hashes the members sorted by name.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct JwkThumb {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl From<&Jwk> for JwkThumb {
    fn from(a: &Jwk) -> Self {
        JwkThumb {
            crv: a.crv.clone(),
            kty: a.kty.clone(),
            x: a.x.clone(),
            y: a.y.clone(),
        }
    }
}

/// RFC 7638 JWK thumbprint of the account key: base64url of the SHA-256 of
/// the canonical JWK member serialization.
pub(crate) fn thumbprint(key: &p256::ecdsa::SigningKey) -> Result<String> {
    let jwk = Jwk::try_from(key)?;
    let canonical = serde_json::to_string(&JwkThumb::from(&jwk))?;
    Ok(base64url(&Sha256::digest(canonical)))
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlattenedJws {
    protected: String,
    payload: String,
    signature: String,
}

/// Sign `payload` under `protected` according to [RFC 7515 §5.1], producing
/// the request body for a signed POST.
///
/// A payload serializing to `""` (see [`crate::api::EmptyString`]) marks a
/// POST-as-GET and is carried as the genuinely empty string rather than its
/// base64url encoding.
///
/// [RFC 7515 §5.1]: https://datatracker.ietf.org/doc/html/rfc7515#section-5.1
pub(crate) fn sign<T: Serialize + ?Sized>(
    protected: ProtectedHeader,
    key: &p256::ecdsa::SigningKey,
    payload: &T,
) -> Result<String> {
    let protected = base64url(&serde_json::to_string(&protected)?);

    let payload = {
        let payload_json = serde_json::to_string(payload)?;
        if payload_json == "\"\"" {
            String::new()
        } else {
            base64url(&payload_json)
        }
    };

    let to_sign = format!("{protected}.{payload}");
    let signature: Signature = key.sign(to_sign.as_bytes());
    let signature = base64url(&signature.to_bytes());

    let jws = FlattenedJws {
        protected,
        payload,
        signature,
    };

    Ok(serde_json::to_string(&jws)?)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::{api, key::create_p256_key};

    fn decode_json(b64: &str) -> Value {
        let raw = BASE64_URL_SAFE_NO_PAD.decode(b64).unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[test]
    fn jwk_header_carries_no_kid() {
        let key = create_p256_key();
        let jwk = Jwk::try_from(&key).unwrap();
        let header = ProtectedHeader::new_jwk(jwk, "https://ca/acme/new-acct", "n1".to_owned());

        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["alg"], "ES256");
        assert_eq!(json["nonce"], "n1");
        assert!(json.get("jwk").is_some());
        assert!(json.get("kid").is_none());
    }

    #[test]
    fn kid_header_carries_no_jwk() {
        let header =
            ProtectedHeader::new_kid("https://ca/acct/1", "https://ca/acme/x", "n2".to_owned());

        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["kid"], "https://ca/acct/1");
        assert!(json.get("jwk").is_none());
    }

    #[test]
    fn post_as_get_payload_is_empty_string() {
        let key = create_p256_key();
        let header = ProtectedHeader::new_kid("https://ca/acct/1", "https://ca/x", "n".to_owned());
        let jws = sign(header, &key, &api::EmptyString).unwrap();

        let body: Value = serde_json::from_str(&jws).unwrap();
        assert_eq!(body["payload"], "");
        assert!(!body["protected"].as_str().unwrap().is_empty());
        assert!(!body["signature"].as_str().unwrap().is_empty());
    }

    #[test]
    fn object_payload_is_base64url() {
        let key = create_p256_key();
        let header = ProtectedHeader::new_kid("https://ca/acct/1", "https://ca/x", "n".to_owned());
        let jws = sign(header, &key, &api::EmptyObject).unwrap();

        let body: Value = serde_json::from_str(&jws).unwrap();
        let payload = decode_json(body["payload"].as_str().unwrap());
        assert_eq!(payload, serde_json::json!({}));
    }

    #[test]
    fn thumbprint_is_deterministic_and_canonical() {
        let key = create_p256_key();

        let a = thumbprint(&key).unwrap();
        let b = thumbprint(&key).unwrap();
        assert_eq!(a, b);

        // RFC 7638: base64url(SHA-256(canonical {"crv","kty","x","y"})).
        let jwk = Jwk::try_from(&key).unwrap();
        let canonical = format!(
            r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
            jwk.x, jwk.y
        );
        assert_eq!(a, base64url(&Sha256::digest(canonical)));
    }

    #[test]
    fn thumbprint_differs_between_keys() {
        let a = thumbprint(&create_p256_key()).unwrap();
        let b = thumbprint(&create_p256_key()).unwrap();
        assert_ne!(a, b);
    }
}

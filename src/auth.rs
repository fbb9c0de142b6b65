//! Authorization controller: prove control of every identifier in an order.

use std::path::Path;

use sha2::{Digest as _, Sha256};

use crate::{
    api,
    confirm::Confirm,
    error::{Error, Result},
    hook,
    jws,
    session::Session,
};

/// The proof string binding a challenge token to the account key.
///
/// `dns-01` responses carry `base64url(SHA-256(token.thumbprint))`; every
/// other type uses `token.thumbprint` as-is.
pub fn key_authorization(
    token: &str,
    key: &p256::ecdsa::SigningKey,
    challenge_type: &str,
) -> Result<String> {
    let thumbprint = jws::thumbprint(key)?;
    let key_auth = format!("{token}.{thumbprint}");

    Ok(if challenge_type == "dns-01" {
        jws::base64url(&Sha256::digest(key_auth))
    } else {
        key_auth
    })
}

/// Satisfy every authorization named by `authorization_urls`.
///
/// For each pending authorization, the first pending challenge the hook (or
/// the operator) accepts is activated and polled to completion. Once a
/// challenge has been activated, no other type is attempted for that
/// authorization: a failure there fails the order.
pub fn authorize(
    session: &mut Session,
    authorization_urls: &[String],
    hook: Option<&Path>,
    challenge_confirm: &mut dyn Confirm,
) -> Result<()> {
    for auth_url in authorization_urls {
        log::info!("retrieving authorization at {auth_url}");
        if session.sign_and_send(auth_url, &api::EmptyString)? != 200 {
            return Err(session.fail(format!("failed to retrieve auth {auth_url}")));
        }
        let auth: api::Authorization = session.read_json()?;

        match auth.status {
            api::AuthorizationStatus::Valid => continue,
            api::AuthorizationStatus::Pending => {}
            status => {
                return Err(Error::protocol(format!(
                    "unexpected auth status ({status:?}) at {auth_url}"
                )));
            }
        }

        if !auth.identifier.is_type_dns() || auth.identifier.value.is_empty() {
            return Err(Error::protocol(format!(
                "no valid identifier in auth {auth_url}"
            )));
        }
        let identifier = auth.identifier.value.clone();

        let mut challenge_done = false;
        for challenge in &auth.challenges {
            if challenge.status != api::ChallengeStatus::Pending {
                continue;
            }

            let key_auth = key_authorization(
                &challenge.token,
                session.account_key().signing_key(),
                &challenge._type,
            )?;

            if let Some(hook) = hook {
                log::debug!(
                    "type={} ident={identifier} token={} key_auth={key_auth}",
                    challenge._type,
                    challenge.token
                );
                let code = hook::run(
                    hook,
                    "begin",
                    &challenge._type,
                    &identifier,
                    &challenge.token,
                    &key_auth,
                )?;
                if code > 0 {
                    log::info!("challenge {} declined", challenge._type);
                    continue;
                }
            } else {
                let prompt = format!(
                    "challenge={} ident={identifier} token={} key_auth={key_auth}\n\
                     type 'y' to accept challenge, anything else to skip",
                    challenge._type, challenge.token
                );
                if !challenge_confirm.confirm(&prompt)? {
                    continue;
                }
            }

            // Committed: activate this challenge and see it through. The
            // cleanup hook runs whatever happens past this point.
            let outcome = activate_and_poll(session, challenge);
            challenge_done = outcome.is_ok();

            if let Some(hook) = hook {
                let method = if challenge_done { "done" } else { "failed" };
                // cleanup exit code is deliberately ignored
                let _ = hook::run(
                    hook,
                    method,
                    &challenge._type,
                    &identifier,
                    &challenge.token,
                    &key_auth,
                );
            }

            outcome?;
            break;
        }

        if !challenge_done {
            return Err(Error::protocol("no challenge completed"));
        }
    }

    Ok(())
}

fn activate_and_poll(session: &mut Session, challenge: &api::Challenge) -> Result<()> {
    let url = &challenge.url;

    log::info!("starting challenge at {url}");
    if session.sign_and_send(url, &api::EmptyObject)? != 200 {
        return Err(session.fail(format!("failed to start challenge at {url}")));
    }

    loop {
        log::info!("polling challenge status at {url}");
        if session.sign_and_send(url, &api::EmptyString)? != 200 {
            return Err(session.fail(format!("failed to poll challenge status at {url}")));
        }
        let polled: api::Challenge = session.read_json()?;

        match polled.status {
            api::ChallengeStatus::Valid => return Ok(()),
            api::ChallengeStatus::Processing | api::ChallengeStatus::Pending => {
                log::debug!("challenge {:?}, waiting", polled.status);
                std::thread::sleep(session.poll_interval());
            }
            status => {
                return Err(session.fail(format!(
                    "challenge {url} failed with status {status:?}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::create_p256_key;

    // dns-01 hashes the proof; everything else passes token.thumbprint through.
    #[test]
    fn key_authorization_by_challenge_type() {
        let key = create_p256_key();
        let thumbprint = jws::thumbprint(&key).unwrap();

        let http = key_authorization("tok", &key, "http-01").unwrap();
        assert_eq!(http, format!("tok.{thumbprint}"));

        let tls_alpn = key_authorization("tok", &key, "tls-alpn-01").unwrap();
        assert_eq!(tls_alpn, http);

        let dns = key_authorization("tok", &key, "dns-01").unwrap();
        assert_eq!(
            dns,
            jws::base64url(&Sha256::digest(format!("tok.{thumbprint}")))
        );
        assert_ne!(dns, http);
    }

    #[test]
    fn key_authorization_depends_on_token() {
        let key = create_p256_key();
        let a = key_authorization("tok-a", &key, "dns-01").unwrap();
        let b = key_authorization("tok-b", &key, "dns-01").unwrap();
        assert_ne!(a, b);
    }
}

//! Order controller: create, authorize, finalize, download.

use std::path::Path;

use crate::{
    api,
    auth,
    cert,
    confirm::Confirm,
    error::{Error, Result},
    session::Session,
};

/// Drive one order from creation to an issued certificate and return the PEM
/// chain the server handed back.
///
/// Polling runs at the session's poll interval with no retry cap; the loops
/// end only on a terminal status or a transport error.
pub fn issue(
    session: &mut Session,
    names: &[String],
    hook: Option<&Path>,
    challenge_confirm: &mut dyn Confirm,
) -> Result<String> {
    let primary = names
        .first()
        .ok_or_else(|| Error::input("no domain names to order"))?;
    let url = session.directory()?.new_order.clone();
    let request = api::NewOrderRequest::from_names(names);

    log::info!("creating new order for {primary} at {url}");
    if session.sign_and_send(&url, &request)? != 201 {
        return Err(session.fail(format!("failed to create new order at {url}")));
    }
    let order: api::Order = session.read_json()?;
    let order_url = session.require_header("location")?;
    log::info!("order URL: {order_url}");

    match order.status {
        api::OrderStatus::Pending | api::OrderStatus::Ready => {}
        status => {
            return Err(Error::protocol(format!("invalid order status ({status:?})")));
        }
    }

    let order = if order.status == api::OrderStatus::Pending {
        let authorizations = order.authorizations.clone();
        session.set_order(order);
        auth::authorize(session, &authorizations, hook, challenge_confirm)
            .map_err(|err| {
                log::warn!("failed to authorize order at {order_url}");
                err
            })?;

        poll_order(session, &order_url, api::OrderStatus::Ready, |status| {
            status == api::OrderStatus::Pending
        })?
    } else {
        order
    };

    log::info!("generating certificate request");
    let domains: Vec<&str> = names.iter().map(String::as_str).collect();
    let csr = cert::csr_base64url(session.domain_key()?, &domains)?;

    let finalize_url = order.finalize.clone();
    session.set_order(order);

    log::info!("finalizing order at {finalize_url}");
    if session.sign_and_send(&finalize_url, &api::Finalize::new(csr))? != 200 {
        return Err(session.fail(format!("failed to finalize order at {finalize_url}")));
    }
    session.check_problem()?;

    let order = poll_order(session, &order_url, api::OrderStatus::Valid, |status| {
        status == api::OrderStatus::Processing
    })?;

    let certificate_url = order
        .certificate
        .clone()
        .ok_or_else(|| Error::protocol("failed to parse certificate url"))?;
    session.set_order(order);

    log::info!("retrieving certificate at {certificate_url}");
    if session.sign_and_send(&certificate_url, &api::EmptyString)? != 200 {
        return Err(session.fail(format!(
            "failed to retrieve certificate at {certificate_url}"
        )));
    }
    session.check_problem()?;

    Ok(session.last().body.clone())
}

/// POST-as-GET the order URL until it reaches `want`; only `keep_waiting`
/// statuses are allowed in between.
fn poll_order(
    session: &mut Session,
    order_url: &str,
    want: api::OrderStatus,
    keep_waiting: impl Fn(api::OrderStatus) -> bool,
) -> Result<api::Order> {
    loop {
        log::info!("polling order status at {order_url}");
        if session.sign_and_send(order_url, &api::EmptyString)? != 200 {
            return Err(session.fail(format!("failed to poll order status at {order_url}")));
        }
        let order: api::Order = session.read_json()?;

        if order.status == want {
            return Ok(order);
        }
        if !keep_waiting(order.status) {
            return Err(session.fail(format!(
                "unexpected order status ({:?}) at {order_url}",
                order.status
            )));
        }

        log::debug!("order {:?}, waiting", order.status);
        std::thread::sleep(session.poll_interval());
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt as _, path::PathBuf, time::Duration};

    use super::*;
    use crate::{account, auth::key_authorization, confirm::Scripted, key::create_p256_key, test};

    fn session_for(server: &test::TestServer) -> Session {
        let mut session = Session::new(create_p256_key());
        session.set_poll_interval(Duration::from_millis(5));
        session.set_domain_key(create_p256_key());
        account::bootstrap(&mut session, &server.dir_url).unwrap();
        account::retrieve(&mut session).unwrap();
        session
    }

    fn hook_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("hook.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn issues_certificate_with_dns01_hook() {
        let config = test::ServerConfig {
            account_exists: true,
            challenge_types: vec!["dns-01"],
            ..Default::default()
        };
        let server = test::with_acme_server(config);
        let mut session = session_for(&server);

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("hook.log");
        let hook = hook_script(
            dir.path(),
            &format!("echo \"$1 $2 $3 $4 $5\" >> {}; exit 0", log.display()),
        );

        let mut confirm = Scripted::new(&[]);
        let pem = issue(
            &mut session,
            &["example.com".to_owned()],
            Some(&hook),
            &mut confirm,
        )
        .unwrap();
        assert_eq!(pem, test::TEST_CERT_PEM);

        // hook ran begin then done, with the hashed dns-01 proof
        let expected_auth = key_authorization(
            "tok-dns-01",
            session.account_key().signing_key(),
            "dns-01",
        )
        .unwrap();
        let logged = fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = logged.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("begin dns-01 example.com tok-dns-01 {expected_auth}"),
                format!("done dns-01 example.com tok-dns-01 {expected_auth}"),
            ]
        );

        let state = server.state.lock().unwrap();
        assert!(state.finalized);
        assert_eq!(state.activated, vec!["/acme/chlg/0".to_owned()]);
    }

    #[test]
    fn hook_decline_falls_through_to_next_challenge_type() {
        let config = test::ServerConfig {
            account_exists: true,
            challenge_types: vec!["dns-01", "http-01"],
            ..Default::default()
        };
        let server = test::with_acme_server(config);
        let mut session = session_for(&server);

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("hook.log");
        // decline dns-01, accept everything else
        let hook = hook_script(
            dir.path(),
            &format!(
                "if [ \"$1\" = begin ] && [ \"$2\" = dns-01 ]; then exit 1; fi\n\
                 echo \"$1 $2 $3 $4 $5\" >> {}; exit 0",
                log.display()
            ),
        );

        let mut confirm = Scripted::new(&[]);
        issue(
            &mut session,
            &["example.com".to_owned()],
            Some(&hook),
            &mut confirm,
        )
        .unwrap();

        // the declined challenge was never activated
        let state = server.state.lock().unwrap();
        assert_eq!(state.activated, vec!["/acme/chlg/1".to_owned()]);

        // http-01 proof is token.thumbprint, not hashed
        let expected_auth = key_authorization(
            "tok-http-01",
            session.account_key().signing_key(),
            "http-01",
        )
        .unwrap();
        assert!(expected_auth.starts_with("tok-http-01."));
        let logged = fs::read_to_string(&log).unwrap();
        assert!(logged.contains(&format!("begin http-01 example.com tok-http-01 {expected_auth}")));
    }

    #[test]
    fn hookless_issue_asks_the_operator() {
        let config = test::ServerConfig {
            account_exists: true,
            challenge_types: vec!["dns-01"],
            ..Default::default()
        };
        let server = test::with_acme_server(config);
        let mut session = session_for(&server);

        let mut confirm = Scripted::new(&[true]);
        issue(&mut session, &["example.com".to_owned()], None, &mut confirm).unwrap();
        assert_eq!(confirm.prompts.len(), 1);
        assert!(confirm.prompts[0].contains("challenge=dns-01"));
    }

    #[test]
    fn skipping_every_challenge_fails_the_order() {
        let config = test::ServerConfig {
            account_exists: true,
            challenge_types: vec!["dns-01"],
            ..Default::default()
        };
        let server = test::with_acme_server(config);
        let mut session = session_for(&server);

        let mut confirm = Scripted::new(&[false]);
        let err = issue(&mut session, &["example.com".to_owned()], None, &mut confirm).unwrap_err();
        assert!(matches!(&err, Error::Protocol(msg) if msg.contains("no challenge completed")));
        assert!(server.state.lock().unwrap().activated.is_empty());
    }
}

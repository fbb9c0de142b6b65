//! Directory bootstrap and account lifecycle.

use crate::{
    api,
    confirm::Confirm,
    error::{Error, Result},
    session::Session,
};

/// Fetch the directory document and the first nonce.
///
/// The directory GET must return 200 and the `newNonce` GET must return 204;
/// afterwards the session holds one fresh nonce and every operation URL.
pub fn bootstrap(session: &mut Session, directory_url: &str) -> Result<()> {
    log::info!("fetching directory at {directory_url}");
    if session.fetch(directory_url)? != 200 {
        return Err(session.fail(format!("failed to fetch directory at {directory_url}")));
    }
    session.check_problem()?;
    let directory: api::Directory = session.read_json()?;

    let nonce_url = directory.new_nonce.clone();
    session.set_directory(directory);

    log::debug!("fetching new nonce at {nonce_url}");
    if session.fetch(&nonce_url)? != 204 {
        return Err(session.fail(format!("failed to fetch new nonce at {nonce_url}")));
    }
    session.check_problem()?;

    Ok(())
}

/// Create a fresh account (the `new` subcommand).
///
/// Probes with `onlyReturnExisting` first: an existing account is a failure
/// for this subcommand, and only the `accountDoesNotExist` problem opens the
/// creation path. Terms of service, when the directory advertises any, must
/// be accepted interactively unless `-y` swapped in an always-yes confirmer.
pub fn new(
    session: &mut Session,
    email: Option<&str>,
    tos_confirm: &mut dyn Confirm,
) -> Result<()> {
    let url = session.directory()?.new_account.clone();

    log::info!("creating new account at {url}");
    match session.sign_and_send(&url, &api::Account::lookup())? {
        200 => {
            let kid = session.require_header("location")?;
            session.set_kid(kid.clone());
            Err(Error::protocol(format!("account already exists at {kid}")))
        }

        400 if session
            .problem()
            .is_some_and(|problem| problem.is_account_does_not_exist()) =>
        {
            if let Some(terms) = session.directory()?.terms_of_service() {
                let terms = terms.to_owned();
                if !tos_confirm.confirm(&format!("type 'y' to accept the terms at {terms}"))? {
                    return Err(Error::input("terms not agreed to, aborted"));
                }
                log::info!("terms at {terms} accepted");
            }

            let registration = api::Account {
                terms_of_service_agreed: Some(true),
                contact: email
                    .filter(|email| !email.is_empty())
                    .map(|email| vec![format!("mailto:{email}")]),
                ..Default::default()
            };

            if session.sign_and_send(&url, &registration)? != 201 {
                return Err(session.fail(format!("failed to create account at {url}")));
            }
            session.check_problem()?;

            let account: api::Account = session.read_json()?;
            if !account.is_status_valid() {
                return Err(Error::protocol(format!(
                    "account created but status is not valid ({})",
                    account.status.as_deref().unwrap_or("unknown")
                )));
            }

            let kid = session.require_header("location")?;
            log::info!("account created at {kid}");
            session.set_kid(kid);
            session.set_account(account);
            Ok(())
        }

        _ => Err(session.fail(format!("failed to create account at {url}"))),
    }
}

/// Locate the existing account for the loaded key and remember its URL.
pub fn retrieve(session: &mut Session) -> Result<()> {
    let url = session.directory()?.new_account.clone();

    log::info!("retrieving account at {url}");
    match session.sign_and_send(&url, &api::Account::lookup())? {
        200 => session.check_problem()?,

        400 if session
            .problem()
            .is_some_and(|problem| problem.is_account_does_not_exist()) =>
        {
            return Err(Error::protocol(format!(
                "no account associated with this key found at {url}; consider trying 'new'"
            )));
        }

        _ => return Err(session.fail(format!("failed to retrieve account at {url}"))),
    }

    let account: api::Account = session.read_json()?;
    if !account.is_status_valid() {
        return Err(Error::protocol(format!(
            "invalid account status ({})",
            account.status.as_deref().unwrap_or("unknown")
        )));
    }

    let kid = session.require_header("location")?;
    log::info!("account location: {kid}");
    session.set_kid(kid);
    session.set_account(account);
    Ok(())
}

/// Bring the account's contact email in line with the command line.
///
/// Comparison is case-insensitive on the whole address, matching the
/// original client's behavior (strictly, RFC 5321 local parts are case
/// sensitive; a differently-cased address is treated as already up to date).
pub fn update(session: &mut Session, email: Option<&str>) -> Result<()> {
    let email = email.unwrap_or_default();
    let contacts = session.account()?.contact.clone().unwrap_or_default();

    let mut email_update = false;
    if !email.is_empty() {
        if contacts.is_empty() {
            email_update = true;
        }
        for contact in &contacts {
            let addr = contact
                .get(.."mailto:".len())
                .filter(|prefix| prefix.eq_ignore_ascii_case("mailto:"))
                .map(|_| &contact["mailto:".len()..])
                .ok_or_else(|| Error::protocol("failed to parse account contacts"))?;
            if !addr.eq_ignore_ascii_case(email) {
                email_update = true;
            }
        }
    } else if !contacts.is_empty() {
        email_update = true;
    }

    let kid = session
        .kid()
        .ok_or_else(|| Error::protocol("account location unknown"))?
        .to_owned();

    if !email_update {
        log::info!("email is already up to date for account at {kid}");
        return Ok(());
    }

    let contact = if email.is_empty() {
        log::info!("removing account email at {kid}");
        Vec::new()
    } else {
        log::info!("updating account email to {email} at {kid}");
        vec![format!("mailto:{email}")]
    };

    let payload = api::Account {
        contact: Some(contact),
        ..Default::default()
    };
    if session.sign_and_send(&kid, &payload)? != 200 {
        return Err(session.fail(format!("failed to update account email at {kid}")));
    }
    session.check_problem()?;

    log::info!("account at {kid} updated");
    Ok(())
}

/// Permanently deactivate the account.
pub fn deactivate(session: &mut Session) -> Result<()> {
    let kid = session
        .kid()
        .ok_or_else(|| Error::protocol("account location unknown"))?
        .to_owned();

    log::info!("deactivating account at {kid}");
    let payload = api::Account {
        status: Some("deactivated".to_owned()),
        ..Default::default()
    };
    if session.sign_and_send(&kid, &payload)? != 200 {
        return Err(session.fail(format!("failed to deactivate account at {kid}")));
    }
    session.check_problem()?;

    log::info!("account at {kid} deactivated");
    Ok(())
}

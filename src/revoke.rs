//! Certificate revocation.

use std::{fs, path::Path};

use crate::{
    api,
    cert,
    error::{Error, Result},
    jws,
    session::Session,
};

/// Revoke the certificate stored at `certfile`.
///
/// The wire format wants base64url DER of the end-entity certificate, so the
/// first PEM block of the file is re-encoded. `reason` is an RFC 5280
/// reason code; the CLI always passes 0 (unspecified).
pub fn revoke(session: &mut Session, certfile: &Path, reason: usize) -> Result<()> {
    let pem = fs::read_to_string(certfile).map_err(|err| Error::fs(certfile, err))?;
    let der = cert::first_certificate_der(&pem)
        .map_err(|_| Error::crypto(format!("failed to load {}", certfile.display())))?;

    let url = session.directory()?.revoke_cert.clone();

    log::info!("revoking {} at {url}", certfile.display());
    let payload = api::Revocation::new(jws::base64url(&der), reason);
    if session.sign_and_send(&url, &payload)? != 200 {
        return Err(session.fail(format!(
            "failed to revoke {} at {url}",
            certfile.display()
        )));
    }
    session.check_problem()?;

    log::info!("revoked {}", certfile.display());
    Ok(())
}

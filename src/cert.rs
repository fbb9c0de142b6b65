//! CSR generation and local certificate inspection.

use std::{
    fs,
    io::{BufReader, Cursor},
    path::Path,
    time::SystemTime,
};

use der::{asn1::Ia5String, oid::AssociatedOid as _, Decode as _, Encode as _};
use x509_cert::{
    builder::{Builder as _, RequestBuilder},
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
};

use crate::{
    error::{Error, Result},
    jws,
};

/// Create a CSR for `domains` signed by `signer` and return its
/// base64url-encoded DER, ready for the finalize payload.
///
/// The first domain becomes the Common Name; all domains (wildcards
/// included, verbatim) go into a Subject Alternative Name extension.
pub fn csr_base64url(signer: &p256::ecdsa::SigningKey, domains: &[&str]) -> Result<String> {
    let primary = domains
        .first()
        .ok_or_else(|| Error::crypto("no domains for certificate request"))?;

    let subject = format!("CN={primary}")
        .parse::<Name>()
        .map_err(|err| Error::crypto(format!("bad subject name: {err}")))?;

    let mut builder = RequestBuilder::new(subject, signer)
        .map_err(|err| Error::crypto(format!("csr builder: {err}")))?;

    let san = domains
        .iter()
        .map(|domain| {
            Ia5String::new(domain)
                .map(GeneralName::DnsName)
                .map_err(|err| Error::crypto(format!("bad SAN entry {domain}: {err}")))
        })
        .collect::<Result<Vec<_>>>()?;
    builder
        .add_extension(&SubjectAltName(san))
        .map_err(|err| Error::crypto(format!("csr extension: {err}")))?;

    let csr = builder
        .build::<p256::ecdsa::DerSignature>()
        .map_err(|err| Error::crypto(format!("csr signing: {err}")))?;
    let der = csr
        .to_der()
        .map_err(|err| Error::crypto(format!("csr encoding: {err}")))?;

    Ok(jws::base64url(&der))
}

/// DER of the end-entity certificate, the first block in a PEM chain.
pub fn first_certificate_der(pem: &str) -> Result<Vec<u8>> {
    let mut reader = BufReader::new(Cursor::new(pem));
    let first = rustls_pemfile::certs(&mut reader).next();
    first
        .ok_or_else(|| Error::crypto("no certificate found in PEM"))?
        .map(|der| der.to_vec())
        .map_err(|err| Error::crypto(format!("bad certificate PEM: {err}")))
}

/// Whole days until the end-entity certificate expires; negative once it has.
pub fn valid_days_left(pem: &str) -> Result<i64> {
    let der = first_certificate_der(pem)?;
    let cert = x509_cert::Certificate::from_der(&der)
        .map_err(|err| Error::crypto(format!("bad certificate: {err}")))?;

    let not_after = cert
        .tbs_certificate
        .validity
        .not_after
        .to_system_time();

    const DAY: u64 = 24 * 3600;
    match not_after.duration_since(SystemTime::now()) {
        Ok(left) => Ok((left.as_secs() / DAY) as i64),
        Err(err) => Ok(-((err.duration().as_secs() / DAY) as i64)),
    }
}

fn san_dns_names(cert: &x509_cert::Certificate) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(extensions) = &cert.tbs_certificate.extensions {
        for ext in extensions {
            if ext.extn_id != SubjectAltName::OID {
                continue;
            }
            if let Ok(san) = SubjectAltName::from_der(ext.extn_value.as_bytes()) {
                for general_name in san.0 {
                    if let GeneralName::DnsName(name) = general_name {
                        names.push(name.to_string());
                    }
                }
            }
        }
    }
    names
}

/// Freshness gate for reissue: true when `cert_path` exists, still has at
/// least `min_days` of validity, and its SAN covers every requested name
/// (literal match, no wildcard expansion). Any parse trouble means "not
/// current" and triggers reissue.
pub fn is_current(cert_path: &Path, names: &[String], min_days: i64) -> bool {
    let pem = match fs::read_to_string(cert_path) {
        Ok(pem) => pem,
        Err(_) => return false,
    };

    let days_left = match valid_days_left(&pem) {
        Ok(days) => days,
        Err(err) => {
            log::warn!("{}: {err}", cert_path.display());
            return false;
        }
    };
    log::info!("{} expires in {days_left} days", cert_path.display());
    if days_left < min_days {
        log::info!("{} is due for renewal", cert_path.display());
        return false;
    }

    let der = match first_certificate_der(&pem) {
        Ok(der) => der,
        Err(_) => return false,
    };
    let cert = match x509_cert::Certificate::from_der(&der) {
        Ok(cert) => cert,
        Err(_) => return false,
    };

    let covered = san_dns_names(&cert);
    for name in names {
        if !covered.iter().any(|san| san.eq_ignore_ascii_case(name)) {
            log::info!("{} does not include {name}", cert_path.display());
            return false;
        }
    }

    true
}

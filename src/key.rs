use std::{fs, io, os::unix::fs::OpenOptionsExt as _, path::Path};

use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Make a P-256 private key (from which we can derive a public key).
///
/// ES256 is the one signature algorithm every ACME server must implement, so
/// both the account key and the per-domain certificate keys use it.
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

/// The account key plus the account URL once the server has told us one.
#[derive(Clone, Debug)]
pub struct AccountKey {
    signing_key: p256::ecdsa::SigningKey,

    /// Set after the first successful `newAccount` exchange.
    key_id: Option<String>,
}

impl AccountKey {
    pub fn new(signing_key: p256::ecdsa::SigningKey) -> Self {
        AccountKey {
            signing_key,
            key_id: None,
        }
    }

    pub fn signing_key(&self) -> &p256::ecdsa::SigningKey {
        &self.signing_key
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid);
    }
}

/// Load a PKCS#8 PEM key from `path`, generating it first when it does not
/// exist and `allow_create` permits. Fresh key files are written with mode
/// 0600.
pub fn load_or_create(path: &Path, allow_create: bool) -> Result<p256::ecdsa::SigningKey> {
    match fs::read_to_string(path) {
        Ok(pem) => {
            let pem = Zeroizing::new(pem);
            ecdsa::SigningKey::<p256::NistP256>::from_pkcs8_pem(&pem)
                .map_err(|err| Error::crypto(format!("{}: {err}", path.display())))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound && allow_create => {
            let key = create_p256_key();
            let pem = key
                .to_pkcs8_pem(pkcs8::LineEnding::LF)
                .map_err(|err| Error::crypto(format!("{}: {err}", path.display())))?;
            write_key_pem(path, &pem)?;
            log::info!("created key {}", path.display());
            Ok(key)
        }
        Err(err) => Err(Error::fs(path, err)),
    }
}

fn write_key_pem(path: &Path, pem: &str) -> Result<()> {
    use io::Write as _;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|err| Error::fs(path, err))?;
    file.write_all(pem.as_bytes())
        .map_err(|err| Error::fs(path, err))
}

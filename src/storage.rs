//! Configuration directory layout.
//!
//! ```text
//! <confdir>/                    0755
//! ├── private/                  0700
//! │   ├── key.pem               0600  account key
//! │   └── <domain>/key.pem      0600  domain key
//! └── <domain>/cert.pem         0644  issued chain
//! ```

use std::{
    fs,
    io::Write as _,
    os::unix::fs::{DirBuilderExt as _, OpenOptionsExt as _},
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

/// Paths derived from the config dir and (for `issue`) the base domain.
#[derive(Debug, Clone)]
pub struct Layout {
    pub confdir: PathBuf,
    pub keydir: PathBuf,
    pub domain_keydir: Option<PathBuf>,
    pub certdir: Option<PathBuf>,
}

impl Layout {
    pub fn new(confdir: &Path, base_domain: Option<&str>) -> Self {
        Layout {
            confdir: confdir.to_owned(),
            keydir: confdir.join("private"),
            domain_keydir: base_domain.map(|domain| confdir.join("private").join(domain)),
            certdir: base_domain.map(|domain| confdir.join(domain)),
        }
    }

    pub fn account_key_file(&self) -> PathBuf {
        self.keydir.join("key.pem")
    }

    pub fn domain_key_file(&self) -> Option<PathBuf> {
        self.domain_keydir.as_ref().map(|dir| dir.join("key.pem"))
    }

    pub fn certificate_file(&self) -> Option<PathBuf> {
        self.certdir.as_ref().map(|dir| dir.join("cert.pem"))
    }
}

/// Require `dir` to exist, creating it with `mode` when `allow_create`.
pub fn check_or_mkdir(allow_create: bool, dir: &Path, mode: u32) -> Result<()> {
    if !dir.exists() {
        if !allow_create {
            return Err(Error::input(format!("failed to access {}", dir.display())));
        }
        fs::DirBuilder::new()
            .mode(mode)
            .create(dir)
            .map_err(|err| Error::fs(dir, err))?;
        log::info!("created directory {}", dir.display());
    }

    let meta = fs::metadata(dir).map_err(|err| Error::fs(dir, err))?;
    if !meta.is_dir() {
        return Err(Error::input(format!("{} is not a directory", dir.display())));
    }
    Ok(())
}

/// Write the issued PEM chain world-readable.
pub fn save_certificate(path: &Path, pem: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|err| Error::fs(path, err))?;
    file.write_all(pem.as_bytes())
        .map_err(|err| Error::fs(path, err))?;

    log::info!("saved certificate to {}", path.display());
    Ok(())
}

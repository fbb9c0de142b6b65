//! External validation hook.
//!
//! The hook is a program the operator supplies to provision and tear down
//! challenge responses. ABI: `<hook> <method> <type> <identifier> <token>
//! <key_auth>` with `method` one of `begin`, `done`, `failed`. The child
//! inherits the environment and stdio; the only channel back is the exit
//! code.

use std::{path::Path, process::Command};

use crate::error::{Error, Result};

/// Run the hook and block until it exits.
///
/// Returns the exit status. Spawn failure and death by signal map to
/// [`Error::Hook`], which aborts the authorization; a nonzero exit is a
/// normal outcome the caller interprets (`begin`: decline; `done`/`failed`:
/// ignored).
pub fn run(
    hook: &Path,
    method: &str,
    challenge_type: &str,
    identifier: &str,
    token: &str,
    key_auth: &str,
) -> Result<i32> {
    log::info!(
        "running {} {method} {challenge_type} {identifier} {token} {key_auth}",
        hook.display()
    );

    let status = Command::new(hook)
        .args([method, challenge_type, identifier, token, key_auth])
        .status()
        .map_err(|err| {
            log::warn!("failed to execute {}: {err}", hook.display());
            Error::Hook(-1)
        })?;

    match status.code() {
        Some(code) => {
            log::debug!("hook returned {code}");
            Ok(code)
        }
        None => {
            log::warn!("{} terminated by signal", hook.display());
            Err(Error::Hook(-1))
        }
    }
}

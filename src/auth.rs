//! HTTP Basic-Auth against a credential file.
//!
//! The file holds one `user:sha256-hex` pair per line (blank lines and `#`
//! comments ignored). Password digests are compared in constant time. The
//! handle is reloadable so a SIGHUP can pick up credential changes without
//! a restart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// Parsed credential set plus the realm advertised in challenges.
pub struct BasicAuth {
    realm: String,
    users: HashMap<String, Vec<u8>>,
}

impl BasicAuth {
    pub fn from_file(path: &Path, realm: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Initialization(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut users = HashMap::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (user, digest_hex) = line.split_once(':').ok_or_else(|| {
                Error::Initialization(format!(
                    "{}:{}: expected user:sha256hex",
                    path.display(),
                    number + 1
                ))
            })?;
            let digest = hex::decode(digest_hex.trim()).map_err(|e| {
                Error::Initialization(format!(
                    "{}:{}: bad digest: {}",
                    path.display(),
                    number + 1,
                    e
                ))
            })?;
            users.insert(user.to_string(), digest);
        }

        Ok(Self {
            realm: realm.to_string(),
            users,
        })
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Verify an `Authorization` header value; returns the user id on
    /// success.
    pub fn check(&self, authorization: Option<&str>) -> Result<String> {
        let header = authorization.ok_or(Error::Unauthorized)?;
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or(Error::Unauthorized)?
            .trim();
        let decoded = BASE64.decode(encoded).map_err(|_| Error::Unauthorized)?;
        let pair = String::from_utf8(decoded).map_err(|_| Error::Unauthorized)?;
        let (user, password) = pair.split_once(':').ok_or(Error::Unauthorized)?;

        let expected = self.users.get(user).ok_or(Error::Unauthorized)?;
        let digest = Sha256::digest(password.as_bytes());
        if bool::from(digest.as_slice().ct_eq(expected.as_slice())) {
            Ok(user.to_string())
        } else {
            Err(Error::Unauthorized)
        }
    }
}

/// Shared, reloadable auth handle. `None` inside means auth is disabled and
/// every request passes.
#[derive(Clone, Default)]
pub struct AuthState {
    inner: Arc<RwLock<Option<BasicAuth>>>,
}

impl AuthState {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Load (or re-load) credentials from `path`; `None` disables auth.
    pub fn reload(&self, path: Option<&Path>, realm: &str) -> Result<()> {
        let auth = match path {
            Some(path) => Some(BasicAuth::from_file(path, realm)?),
            None => None,
        };
        let mut slot = self.inner.write().expect("auth lock poisoned");
        *slot = auth;
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.inner.read().expect("auth lock poisoned").is_some()
    }

    pub fn realm(&self) -> Option<String> {
        self.inner
            .read()
            .expect("auth lock poisoned")
            .as_ref()
            .map(|auth| auth.realm().to_string())
    }

    /// `Ok(None)` when auth is disabled, `Ok(Some(user))` on a valid header.
    pub fn check(&self, authorization: Option<&str>) -> Result<Option<String>> {
        let guard = self.inner.read().expect("auth lock poisoned");
        match guard.as_ref() {
            None => Ok(None),
            Some(auth) => auth.check(authorization).map(Some),
        }
    }
}

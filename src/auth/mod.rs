//! Bearer-token persistence and display-claim decoding
//!
//! The token is an opaque credential attached to every request. The client
//! decodes the JWT payload only to read non-secret display claims (subject,
//! role) and to drop stale tokens early; signature verification is the
//! backend's responsibility, never performed here.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

const TOKEN_FILE: &str = "jgpt_token";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token expired")]
    Expired,

    #[error("token storage failed: {0}")]
    Storage(#[from] std::io::Error),
}

/// Display claims read from the token payload, unverified.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Decode the payload segment of a JWT without verifying the signature.
/// Rejects tokens whose `exp` claim is in the past.
pub fn decode_claims(token: &str) -> Result<Claims, AuthError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(AuthError::Malformed("expected three segments".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::Malformed(e.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|e| AuthError::Malformed(e.to_string()))?;

    if let Some(exp) = claims.exp {
        if Utc::now().timestamp() >= exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

/// File-backed token storage under the client data directory, durable
/// across restarts.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(TOKEN_FILE),
        }
    }

    /// Load the stored token, if any. A token that fails to decode or has
    /// expired is removed and treated as absent, so the host falls back to
    /// its login flow instead of issuing doomed requests.
    pub fn load(&self) -> Result<Option<(String, Claims)>, AuthError> {
        let token = match fs::read_to_string(&self.path) {
            Ok(raw) => raw.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match decode_claims(&token) {
            Ok(claims) => Ok(Some((token, claims))),
            Err(err) => {
                tracing::warn!(%err, "dropping unusable stored token");
                fs::remove_file(&self.path).ok();
                Ok(None)
            }
        }
    }

    /// Persist a freshly issued token. The token must at least decode;
    /// a credential we cannot read claims from is rejected up front.
    pub fn save(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode_claims(token)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, token)?;
        Ok(claims)
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
        format!("{header}.{body}.unverified-signature")
    }

    #[test]
    fn decodes_subject_and_role() {
        let t = token(serde_json::json!({"sub": "jane@garnet.dev", "role": "admin"}));
        let claims = decode_claims(&t).unwrap();
        assert_eq!(claims.sub, "jane@garnet.dev");
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert!(claims.exp.is_none());
    }

    #[test]
    fn rejects_expired_and_malformed() {
        let stale = token(serde_json::json!({"sub": "x", "exp": 1_000}));
        assert!(matches!(decode_claims(&stale), Err(AuthError::Expired)));

        assert!(matches!(
            decode_claims("not-a-jwt"),
            Err(AuthError::Malformed(_))
        ));
        assert!(matches!(
            decode_claims("a.b.c.d"),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn store_roundtrip_and_stale_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        assert!(store.load().unwrap().is_none());

        let fresh = token(serde_json::json!({
            "sub": "jane@garnet.dev",
            "role": "viewer",
            "exp": Utc::now().timestamp() + 3600,
        }));
        store.save(&fresh).unwrap();
        let (loaded, claims) = store.load().unwrap().unwrap();
        assert_eq!(loaded, fresh);
        assert_eq!(claims.role.as_deref(), Some("viewer"));

        // Overwrite with an expired token: load drops it silently.
        let stale = token(serde_json::json!({"sub": "x", "exp": 1_000}));
        std::fs::write(dir.path().join(TOKEN_FILE), &stale).unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(store.load().unwrap().is_none()); // file is gone now

        store.clear().unwrap(); // idempotent on a missing file
    }
}

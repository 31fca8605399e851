//! Authentication support for the sync server.
//!
//! The server never manages accounts; it only resolves the credentials on a
//! request to a user identity. Two authenticators are provided:
//!
//! - [`PlainAuthenticator`]: credentials are the UTF-8 identity itself
//! - [`TokenAuthenticator`]: HMAC-SHA256 signed tokens with expiry
//!
//! ## Token Format
//!
//! - N bytes: identity (UTF-8)
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the preceding bytes

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const TIMESTAMP_LEN: usize = 8;
const SIGNATURE_LEN: usize = 32;
const TRAILER_LEN: usize = TIMESTAMP_LEN + SIGNATURE_LEN;

/// Resolves request credentials to a user identity.
pub trait Authenticator: Send + Sync {
    /// Returns the identity the credentials belong to.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if the credentials are not valid.
    fn authenticate(&self, credentials: &[u8]) -> ServerResult<String>;
}

/// Accepts the credential bytes as the identity. For trusted deployments
/// and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainAuthenticator;

impl Authenticator for PlainAuthenticator {
    fn authenticate(&self, credentials: &[u8]) -> ServerResult<String> {
        let identity = std::str::from_utf8(credentials)
            .map_err(|_| ServerError::AuthenticationFailed("identity is not UTF-8".into()))?;
        if identity.is_empty() {
            return Err(ServerError::AuthenticationFailed("empty identity".into()));
        }
        Ok(identity.to_string())
    }
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates signed credential tokens.
#[derive(Clone)]
pub struct TokenAuthenticator {
    config: AuthConfig,
}

impl TokenAuthenticator {
    /// Creates a new token authenticator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token binding `identity` to the current time.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an empty identity.
    pub fn create_token(&self, identity: &str) -> ServerResult<Vec<u8>> {
        if identity.is_empty() {
            return Err(ServerError::InvalidRequest("empty identity".into()));
        }

        let mut token = Vec::with_capacity(identity.len() + TRAILER_LEN);
        token.extend_from_slice(identity.as_bytes());
        token.extend_from_slice(&now_millis().to_be_bytes());

        let signature = self.sign(&token)?;
        token.extend_from_slice(&signature);
        Ok(token)
    }

    /// Validates a token and returns the identity it carries.
    pub fn validate_token(&self, token: &[u8]) -> ServerResult<String> {
        if token.len() <= TRAILER_LEN {
            return Err(ServerError::AuthenticationFailed("invalid token length".into()));
        }

        let (signed, signature) = token.split_at(token.len() - SIGNATURE_LEN);
        let mac = self.mac(signed)?;
        mac.verify_slice(signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let (identity, timestamp) = signed.split_at(signed.len() - TIMESTAMP_LEN);
        let mut timestamp_bytes = [0u8; TIMESTAMP_LEN];
        timestamp_bytes.copy_from_slice(timestamp);
        let issued = u64::from_be_bytes(timestamp_bytes);

        let expiry_millis = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued.saturating_add(expiry_millis) {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        String::from_utf8(identity.to_vec())
            .map_err(|_| ServerError::AuthenticationFailed("identity is not UTF-8".into()))
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }

    fn sign(&self, data: &[u8]) -> ServerResult<[u8; SIGNATURE_LEN]> {
        Ok(self.mac(data)?.finalize().into_bytes().into())
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, credentials: &[u8]) -> ServerResult<String> {
        self.validate_token(credentials)
    }
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> TokenAuthenticator {
        TokenAuthenticator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let auth = authenticator();
        let token = auth.create_token("alice").unwrap();
        assert_eq!(token.len(), 5 + 40);

        assert_eq!(auth.validate_token(&token).unwrap(), "alice");
        assert_eq!(auth.authenticate(&token).unwrap(), "alice");
    }

    #[test]
    fn reject_tampered_identity() {
        let auth = authenticator();
        let mut token = auth.create_token("alice").unwrap();
        token[0] = b'm';

        assert!(matches!(
            auth.validate_token(&token),
            Err(ServerError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn reject_tampered_signature() {
        let auth = authenticator();
        let mut token = auth.create_token("alice").unwrap();
        let last = token.len() - 1;
        token[last] ^= 0xFF;

        assert!(auth.validate_token(&token).is_err());
    }

    #[test]
    fn reject_other_secret() {
        let token = authenticator().create_token("alice").unwrap();
        let other = TokenAuthenticator::new(AuthConfig::new(b"another-secret".to_vec()));
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let auth = TokenAuthenticator::new(
            AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec())
                .with_expiry(Duration::from_secs(0)),
        );
        let token = auth.create_token("alice").unwrap();

        std::thread::sleep(Duration::from_millis(10));

        assert!(auth.validate_token(&token).is_err());
    }

    #[test]
    fn reject_short_token() {
        assert!(authenticator().validate_token(&[0u8; 40]).is_err());
        assert!(authenticator().create_token("").is_err());
    }

    #[test]
    fn plain_authenticator() {
        assert_eq!(PlainAuthenticator.authenticate(b"bob").unwrap(), "bob");
        assert!(PlainAuthenticator.authenticate(b"").is_err());
        assert!(PlainAuthenticator.authenticate(&[0xff, 0xfe]).is_err());
    }
}

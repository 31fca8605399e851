//! Credential token commands.

use drivesync_server::{AuthConfig, TokenAuthenticator};
use std::time::Duration;

/// Mints a signed credential token for `user` and prints it as hex.
pub fn mint(secret: &str, user: &str, expiry_hours: u64) -> Result<(), Box<dyn std::error::Error>> {
    let token = authenticator(secret, expiry_hours).create_token(user)?;
    println!("{}", hex::encode(token));
    Ok(())
}

/// Checks a hex token and prints the identity it carries.
pub fn verify(
    secret: &str,
    token: &str,
    expiry_hours: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = hex::decode(token.trim())?;
    let identity = authenticator(secret, expiry_hours).validate_token(&bytes)?;
    println!("{identity}");
    Ok(())
}

fn authenticator(secret: &str, expiry_hours: u64) -> TokenAuthenticator {
    let config = AuthConfig::new(secret.as_bytes().to_vec())
        .with_expiry(Duration::from_secs(expiry_hours.saturating_mul(3600)));
    TokenAuthenticator::new(config)
}

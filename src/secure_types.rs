//! Secure Types Module
//!
//! Credential storage that zeroes secrets from memory when dropped, so
//! passwords and NT hashes do not linger in memory dumps.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{ADError, Result};

/// A secure string that automatically zeros its contents when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    pub fn new(s: String) -> Self {
        Self { inner: s }
    }

    /// Temporarily exposes the secret as a string slice.
    ///
    /// The returned reference should be used immediately and not stored.
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString([REDACTED])")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// LM hash of the empty password, used when only the NT half is given
pub const EMPTY_LM_HASH: &str = "aad3b435b51404eeaad3b435b51404ee";

/// The secret half of a credential.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub enum Secret {
    Password(SecureString),
    /// LM and NT hashes, lowercase hex
    Hashes { lm: SecureString, nt: SecureString },
}

/// Secure credentials container with automatic memory cleanup.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    domain: String,
    username: String,
    secret: Secret,
}

impl Credentials {
    /// Build credentials from the command-line inputs.
    ///
    /// Hashes take precedence over a password. Accepted hash forms are
    /// `LMhash:NThash`, `:NThash` and `NThash`.
    pub fn new(
        domain: String,
        username: String,
        password: Option<String>,
        hashes: Option<String>,
    ) -> Result<Self> {
        if username.trim().is_empty() {
            return Err(ADError::ValidationError("username must not be empty".to_string()));
        }

        let secret = match hashes.filter(|h| !h.is_empty()) {
            Some(hashes) => parse_hashes(&zeroize::Zeroizing::new(hashes))?,
            None => Secret::Password(SecureString::new(password.unwrap_or_default())),
        };

        Ok(Self {
            domain,
            username,
            secret,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Cleartext password, if these credentials carry one.
    pub fn password(&self) -> Option<&str> {
        match &self.secret {
            Secret::Password(password) => Some(password.expose_secret()),
            Secret::Hashes { .. } => None,
        }
    }

    /// Identity used for a simple bind: `user@domain`, unless the
    /// username is already a UPN or a down-level `DOMAIN\user` name.
    pub fn bind_identity(&self) -> String {
        if self.username.contains('@') || self.username.contains('\\') || self.domain.is_empty() {
            self.username.clone()
        } else {
            format!("{}@{}", self.username, self.domain)
        }
    }
}

fn is_hash(value: &str) -> bool {
    value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_hashes(hashes: &str) -> Result<Secret> {
    let (lm, nt) = match hashes.split_once(':') {
        Some((lm, nt)) => (if lm.is_empty() { EMPTY_LM_HASH } else { lm }, nt),
        None => (EMPTY_LM_HASH, hashes),
    };

    if !is_hash(lm) || !is_hash(nt) {
        return Err(ADError::ValidationError(
            "hashes must be 32 hex characters each, in the form LMhash:NThash".to_string(),
        ));
    }

    Ok(Secret::Hashes {
        lm: SecureString::new(lm.to_ascii_lowercase()),
        nt: SecureString::new(nt.to_ascii_lowercase()),
    })
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = match self.secret {
            Secret::Password(_) => "password",
            Secret::Hashes { .. } => "hashes",
        };
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field(secret, &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials(user: {}, secret: [REDACTED])", self.bind_identity())
    }
}

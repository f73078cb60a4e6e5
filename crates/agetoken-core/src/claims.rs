//! Age token claims
//!
//! The claim set is fixed and versioned. It asserts that the holder of one
//! attested device passed an age check at a threshold (`age_over`); it never
//! carries a birthdate, a name or the raw device key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::{digest_from_hex, sha256};
use crate::error::{Result, TokenError};

/// Current claims schema version
pub const CLAIMS_VERSION: u8 = 1;

/// Signed claim set carried in the token payload
///
/// Unknown members are rejected when decoding so that a newer issuer cannot
/// smuggle fields past an older verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgeClaims {
    /// Schema version
    pub ver: u8,

    /// Issuer identifier
    pub iss: String,

    /// Device binding: hex SHA-256 of the attested device public key
    pub sub: String,

    /// Audience (verifier ecosystem)
    pub aud: String,

    /// Age threshold asserted true for the subject
    pub age_over: u8,

    /// Issued at (unix seconds)
    pub iat: i64,

    /// Expires at (unix seconds, inclusive)
    pub exp: i64,

    /// Unique token id
    pub jti: String,

    /// Mint generation; tokens below the current generation are revoked
    pub gen: u64,
}

impl AgeClaims {
    /// Check the schema invariants
    pub fn validate(&self) -> Result<()> {
        if self.ver != CLAIMS_VERSION {
            return Err(TokenError::InvalidClaims(format!(
                "unsupported claims version {}",
                self.ver
            )));
        }
        if self.exp <= self.iat {
            return Err(TokenError::InvalidClaims(format!(
                "exp ({}) must be after iat ({})",
                self.exp, self.iat
            )));
        }
        if self.age_over == 0 {
            return Err(TokenError::InvalidClaims("age_over must be positive".into()));
        }
        if self.jti.is_empty() {
            return Err(TokenError::InvalidClaims("jti must not be empty".into()));
        }
        DeviceBinding::from_hex(&self.sub)?;
        Ok(())
    }

    /// Whether the token has expired at `now` (expiry is inclusive of `exp`)
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.exp
    }

    /// Device binding of the subject
    pub fn device(&self) -> Result<DeviceBinding> {
        DeviceBinding::from_hex(&self.sub)
    }

    /// Expiry as a UTC timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    /// Issuance as a UTC timestamp
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }
}

/// Opaque device identifier derived from an attested device public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceBinding(String);

impl DeviceBinding {
    /// Hash an attested device public key into a binding
    pub fn from_device_public_key(public_key: &[u8]) -> Self {
        Self(hex::encode(sha256(public_key)))
    }

    /// Parse an existing binding (64 lowercase hex characters)
    pub fn from_hex(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        digest_from_hex(&normalized)
            .map(|_| Self(normalized))
            .ok_or_else(|| TokenError::InvalidClaims(format!("invalid device binding: {}", value)))
    }

    /// Hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builder for [`AgeClaims`]
#[derive(Debug, Clone, Default)]
pub struct ClaimsBuilder {
    issuer: Option<String>,
    audience: Option<String>,
    subject: Option<DeviceBinding>,
    age_over: Option<u8>,
    issued_at: Option<i64>,
    lifetime_secs: Option<i64>,
    token_id: Option<String>,
    generation: u64,
}

impl ClaimsBuilder {
    /// Create a new claims builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Set the audience
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Bind the token to a device
    pub fn subject(mut self, device: DeviceBinding) -> Self {
        self.subject = Some(device);
        self
    }

    /// Set the asserted age threshold
    pub fn age_over(mut self, age_over: u8) -> Self {
        self.age_over = Some(age_over);
        self
    }

    /// Set the issuance time (unix seconds)
    pub fn issued_at(mut self, iat: i64) -> Self {
        self.issued_at = Some(iat);
        self
    }

    /// Set the lifetime in seconds; `exp = iat + lifetime`
    pub fn lifetime_secs(mut self, secs: i64) -> Self {
        self.lifetime_secs = Some(secs);
        self
    }

    /// Override the random token id
    pub fn token_id(mut self, jti: impl Into<String>) -> Self {
        self.token_id = Some(jti.into());
        self
    }

    /// Set the mint generation
    pub fn generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Build the claims
    ///
    /// Returns an error if required fields are missing or `exp <= iat`.
    pub fn build(self) -> Result<AgeClaims> {
        let iss = self.issuer.ok_or(TokenError::MissingField("iss".into()))?;
        let aud = self.audience.ok_or(TokenError::MissingField("aud".into()))?;
        let sub = self.subject.ok_or(TokenError::MissingField("sub".into()))?;
        let age_over = self.age_over.ok_or(TokenError::MissingField("age_over".into()))?;
        let iat = self.issued_at.unwrap_or_else(|| Utc::now().timestamp());
        let lifetime = self
            .lifetime_secs
            .ok_or(TokenError::MissingField("lifetime".into()))?;
        let exp = iat
            .checked_add(lifetime)
            .ok_or_else(|| TokenError::InvalidClaims("lifetime overflows exp".into()))?;
        let jti = self
            .token_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let claims = AgeClaims {
            ver: CLAIMS_VERSION,
            iss,
            sub: sub.0,
            aud,
            age_over,
            iat,
            exp,
            jti,
            gen: self.generation,
        };
        claims.validate()?;
        Ok(claims)
    }
}

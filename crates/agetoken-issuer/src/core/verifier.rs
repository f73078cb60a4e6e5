//! Token verification
//!
//! A token is accepted only if every check passes, in this order:
//!
//! 1. the trust anchor pins the issuer's current key
//! 2. the signature verifies under the key named by `kid`
//! 3. `iss` and `aud` match this deployment
//! 4. the token has not expired (`now <= exp`)
//! 5. the token, its device and its generation are not revoked
//!
//! The anchor check comes first so that a re-pinned anchor rejects every
//! token, valid or not.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use agetoken_core::{token, AgeClaims, Clock, DeviceBinding, Thumbprint, TokenError, TokenHash};
use serde::Serialize;
use tracing::{debug, error, warn};

use super::anchor_link::AnchorLink;
use super::generation::GenerationCounter;
use super::legacy::LegacyToken;
use super::rejection::{Rejection, RevocationCause};
use super::revocation::RevocationService;
use crate::keys::KeyStore;

/// What to do when the trust anchor cannot be read during verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorFailurePolicy {
    /// Reject with `AnchorUnreachable`
    #[default]
    FailClosed,
    /// Log a warning and continue with the remaining checks
    FailOpen,
}

impl AnchorFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorFailurePolicy::FailClosed => "closed",
            AnchorFailurePolicy::FailOpen => "open",
        }
    }
}

impl fmt::Display for AnchorFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnchorFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" | "fail-closed" | "fail_closed" => Ok(AnchorFailurePolicy::FailClosed),
            "open" | "fail-open" | "fail_open" => Ok(AnchorFailurePolicy::FailOpen),
            other => Err(format!("expected 'closed' or 'open', got '{}'", other)),
        }
    }
}

/// Deployment policy for the verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierPolicy {
    pub issuer: String,
    pub audience: String,
    pub failure_policy: AnchorFailurePolicy,
    pub accept_legacy: bool,
}

/// State of the trust anchor relative to the issuer key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustStatus {
    /// The anchor pins the current key
    Verified,
    /// The anchor pins no key yet
    NotPublished,
    /// The anchor pins a different key
    Mismatch { anchored: Thumbprint },
    /// The anchor could not be read
    Unreachable(String),
}

impl TrustStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustStatus::Verified => "verified",
            TrustStatus::NotPublished => "not_published",
            TrustStatus::Mismatch { .. } => "mismatch",
            TrustStatus::Unreachable(_) => "unreachable",
        }
    }

    pub fn anchored(&self) -> Option<Thumbprint> {
        match self {
            TrustStatus::Verified | TrustStatus::NotPublished | TrustStatus::Unreachable(_) => None,
            TrustStatus::Mismatch { anchored } => Some(*anchored),
        }
    }
}

/// Wire format of a verified token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenFormat {
    Compact,
    Legacy,
}

/// An accepted token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedToken {
    pub token_hash: TokenHash,
    pub format: TokenFormat,
    /// Device binding
    pub subject: String,
    pub age_over: u8,
    pub issued_at: i64,
    pub expires_at: i64,
    pub generation: u64,
    /// Full claims; absent for legacy tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<AgeClaims>,
}

/// Verifies tokens against keys, anchor and revocation state
pub struct Verifier {
    keys: Arc<KeyStore>,
    revocations: Arc<RevocationService>,
    generation: Arc<GenerationCounter>,
    anchor: AnchorLink,
    clock: Arc<dyn Clock>,
    policy: VerifierPolicy,
}

impl Verifier {
    pub fn new(
        keys: Arc<KeyStore>,
        revocations: Arc<RevocationService>,
        generation: Arc<GenerationCounter>,
        anchor: AnchorLink,
        clock: Arc<dyn Clock>,
        policy: VerifierPolicy,
    ) -> Self {
        Self {
            keys,
            revocations,
            generation,
            anchor,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &VerifierPolicy {
        &self.policy
    }

    /// Compare the anchored thumbprint with the current key
    pub async fn trust_status(&self) -> TrustStatus {
        let expected = self.keys.current_thumbprint();
        match self.anchor.read_thumbprint().await {
            Ok(Some(anchored)) if anchored == expected => TrustStatus::Verified,
            Ok(Some(anchored)) => TrustStatus::Mismatch { anchored },
            Ok(None) => TrustStatus::NotPublished,
            Err(e) => TrustStatus::Unreachable(e.to_string()),
        }
    }

    async fn check_trust(&self) -> Result<(), Rejection> {
        let expected = self.keys.current_thumbprint();
        match self.trust_status().await {
            TrustStatus::Verified => Ok(()),
            status @ (TrustStatus::Mismatch { .. } | TrustStatus::NotPublished) => {
                let anchored = status.anchored();
                error!(
                    expected = %expected,
                    anchored = ?anchored.map(|t| t.to_hex()),
                    anchor = %self.anchor.description(),
                    "ALERT: trust anchor does not pin the issuer key, rejecting all tokens"
                );
                Err(Rejection::TrustIntegrityFailure { expected, anchored })
            }
            TrustStatus::Unreachable(reason) => match self.policy.failure_policy {
                AnchorFailurePolicy::FailClosed => {
                    warn!(error = %reason, "Trust anchor unreachable, failing closed");
                    Err(Rejection::AnchorUnreachable(reason))
                }
                AnchorFailurePolicy::FailOpen => {
                    warn!(error = %reason, "Trust anchor unreachable, continuing under fail-open policy");
                    Ok(())
                }
            },
        }
    }

    /// Verify a serialized token
    pub async fn verify(&self, serialized: &str) -> Result<VerifiedToken, Rejection> {
        self.check_trust().await?;

        let serialized = serialized.trim();
        let now = self.clock.now();
        let result = match token::peek_header(serialized) {
            Ok(header) => self.verify_compact(serialized, &header.kid, now),
            Err(e) if self.policy.accept_legacy => match LegacyToken::decode(serialized) {
                Ok(legacy) => self.verify_legacy(serialized, legacy, now),
                Err(_) => Err(Rejection::from(e)),
            },
            Err(e) => Err(Rejection::from(e)),
        };

        match &result {
            Ok(verified) => debug!(
                token_hash = %verified.token_hash,
                format = ?verified.format,
                "Token accepted"
            ),
            Err(rejection @ (Rejection::Expired { .. } | Rejection::Revoked(_))) => {
                debug!(kind = %rejection.kind(), reason = %rejection, "Token rejected")
            }
            Err(rejection) => debug!(kind = %rejection.kind(), "Token rejected"),
        }
        result
    }

    fn verify_compact(&self, serialized: &str, kid: &str, now: i64) -> Result<VerifiedToken, Rejection> {
        let Some(public_key) = self.keys.key_for_kid(kid, now) else {
            warn!(kid = %kid, "SECURITY: token signed with unknown key id, likely attack");
            return Err(Rejection::SignatureInvalid(format!("unknown key id '{}'", kid)));
        };

        let claims = token::decode_and_verify(serialized, &public_key).map_err(|e| {
            if let TokenError::SignatureInvalid(reason) = &e {
                warn!(kid = %kid, reason = %reason, "SECURITY: token signature invalid, likely attack");
            }
            Rejection::from(e)
        })?;

        if claims.iss != self.policy.issuer {
            return Err(Rejection::Malformed(format!("unexpected issuer '{}'", claims.iss)));
        }
        if claims.aud != self.policy.audience {
            return Err(Rejection::Malformed(format!("unexpected audience '{}'", claims.aud)));
        }
        if claims.is_expired_at(now) {
            return Err(Rejection::Expired { exp: claims.exp, now });
        }

        let token_hash = TokenHash::of_token(serialized);
        let device = claims.device().map_err(Rejection::from)?;
        self.check_revocation(&token_hash, &device, claims.gen)?;

        Ok(VerifiedToken {
            token_hash,
            format: TokenFormat::Compact,
            subject: claims.sub.clone(),
            age_over: claims.age_over,
            issued_at: claims.iat,
            expires_at: claims.exp,
            generation: claims.gen,
            claims: Some(claims),
        })
    }

    fn verify_legacy(&self, serialized: &str, legacy: LegacyToken, now: i64) -> Result<VerifiedToken, Rejection> {
        let device = legacy.device_binding()?;
        if now > legacy.exp {
            return Err(Rejection::Expired { exp: legacy.exp, now });
        }

        let token_hash = TokenHash::of_token(serialized);
        self.check_revocation(&token_hash, &device, legacy.generation)?;

        warn!(device_id = %device, "Accepted unsigned legacy token");
        Ok(VerifiedToken {
            token_hash,
            format: TokenFormat::Legacy,
            subject: legacy.device,
            age_over: legacy.age_over,
            issued_at: legacy.iat,
            expires_at: legacy.exp,
            generation: legacy.generation,
            claims: None,
        })
    }

    fn check_revocation(&self, token_hash: &TokenHash, device: &DeviceBinding, generation: u64) -> Result<(), Rejection> {
        if self.revocations.is_revoked(token_hash) {
            return Err(Rejection::Revoked(RevocationCause::Token));
        }
        if self.revocations.is_device_revoked(device) {
            return Err(Rejection::Revoked(RevocationCause::Device));
        }
        let current = self.generation.current();
        if generation < current {
            return Err(Rejection::Revoked(RevocationCause::Generation {
                token_generation: generation,
                current_generation: current,
            }));
        }
        Ok(())
    }
}

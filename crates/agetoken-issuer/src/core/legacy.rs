//! Legacy unsigned token format
//!
//! Early clients were handed standard base64 of a bare JSON object:
//!
//! ```json
//! {"device":"<64 hex>","ageOver":18,"iat":1700000000,"exp":1700086400,"generation":0}
//! ```
//!
//! Nothing signs it, so it is only accepted when explicitly enabled. It is
//! still subject to the trust anchor check, expiry, device revocation and
//! the generation counter; a generation bump retires every legacy token.

use agetoken_core::DeviceBinding;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use super::rejection::Rejection;

/// Decoded legacy token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyToken {
    pub device: String,
    pub age_over: u8,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub generation: u64,
}

impl LegacyToken {
    /// Parse the base64 JSON form
    pub fn decode(token: &str) -> Result<Self, Rejection> {
        let bytes = STANDARD
            .decode(token.trim())
            .map_err(|e| Rejection::Malformed(format!("legacy token is not base64: {}", e)))?;
        let parsed: LegacyToken = serde_json::from_slice(&bytes)
            .map_err(|e| Rejection::Malformed(format!("invalid legacy token: {}", e)))?;
        if parsed.age_over == 0 {
            return Err(Rejection::Malformed("legacy token age_over must be positive".into()));
        }
        Ok(parsed)
    }

    /// Base64 JSON form
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    pub fn device_binding(&self) -> Result<DeviceBinding, Rejection> {
        DeviceBinding::from_hex(&self.device).map_err(|e| Rejection::Malformed(e.to_string()))
    }
}

//! Issuer signing keys, JWK key files and thumbprints
//!
//! The issuer holds exactly one Ed25519 signing key at a time. It is stored on
//! disk as a JSON Web Key (`kty: OKP`, `crv: Ed25519`) whose members are
//! base64url without padding:
//!
//! ```json
//! {"kty":"OKP","crv":"Ed25519","x":"<public>","d":"<private>"}
//! ```
//!
//! The thumbprint is the RFC 7638 JWK thumbprint of the public half: SHA-256
//! over `{"crv":"Ed25519","kty":"OKP","x":"..."}`. It doubles as the key id
//! embedded in tokens (first 16 hex characters) and as the value pinned on
//! the external trust anchor.
//!
//! Confidentiality of the key file is a deployment concern. The file is
//! written atomically and, on Unix, readable by the owner only, but nothing
//! here encrypts it.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::digest::{digest_from_hex, sha256, DIGEST_LEN};
use crate::error::{KeyLoadError, Result, TokenError};

/// JWK key type for Ed25519
pub const JWK_KTY: &str = "OKP";
/// JWK curve name for Ed25519
pub const JWK_CRV: &str = "Ed25519";
/// JOSE algorithm name for Ed25519 signatures
pub const JWK_ALG: &str = "EdDSA";
/// Number of hex characters of the thumbprint used as key id
pub const KID_HEX_LEN: usize = 16;

/// SHA-256 thumbprint of an issuer public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Thumbprint([u8; DIGEST_LEN]);

impl Thumbprint {
    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string
    pub fn from_hex(value: &str) -> Result<Self> {
        digest_from_hex(value)
            .map(Self)
            .ok_or_else(|| TokenError::CryptoError(format!("Invalid thumbprint hex: {}", value)))
    }

    /// Compute the thumbprint of raw Ed25519 public key bytes
    pub fn of_public_key(public_key: &[u8; 32]) -> Self {
        Self(sha256(canonical_public_jwk(public_key).as_bytes()))
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Key id: first 16 hex characters of the thumbprint
    pub fn kid(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(KID_HEX_LEN);
        hex
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbprint({})", self.to_hex())
    }
}

impl Serialize for Thumbprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Thumbprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Thumbprint::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Canonical RFC 7638 thumbprint input: required members only, sorted, no whitespace
fn canonical_public_jwk(public_key: &[u8; 32]) -> String {
    format!(
        r#"{{"crv":"{}","kty":"{}","x":"{}"}}"#,
        JWK_CRV,
        JWK_KTY,
        URL_SAFE_NO_PAD.encode(public_key)
    )
}

/// The issuer's Ed25519 signing keypair
///
/// The private half never leaves this type except through [`persist`].
#[derive(Clone)]
pub struct SigningKeypair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    thumbprint: Thumbprint,
}

impl fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("kid", &self.kid())
            .field("signing_key", &"[redacted]")
            .finish()
    }
}

impl SigningKeypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Create a keypair from an existing signing key
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let thumbprint = Thumbprint::of_public_key(&verifying_key.to_bytes());
        Self {
            signing_key,
            verifying_key,
            thumbprint,
        }
    }

    /// Create a keypair from the 32-byte Ed25519 secret
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    /// Thumbprint of the public half
    pub fn thumbprint(&self) -> Thumbprint {
        self.thumbprint
    }

    /// Key id embedded in token headers
    pub fn kid(&self) -> String {
        self.thumbprint.kid()
    }

    /// Public half, safe to share
    pub fn public_key(&self) -> IssuerPublicKey {
        IssuerPublicKey {
            verifying_key: self.verifying_key,
            thumbprint: self.thumbprint,
        }
    }

    /// Sign arbitrary bytes
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// JWS signing key (PKCS#8 DER of the secret)
    pub fn encoding_key(&self) -> Result<EncodingKey> {
        let der = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| TokenError::CryptoError(e.to_string()))?;
        Ok(EncodingKey::from_ed_der(der.as_bytes()))
    }

    fn to_key_file(&self) -> KeyFile {
        KeyFile {
            kty: JWK_KTY.to_string(),
            crv: JWK_CRV.to_string(),
            x: URL_SAFE_NO_PAD.encode(self.verifying_key.to_bytes()),
            d: URL_SAFE_NO_PAD.encode(self.signing_key.to_bytes()),
        }
    }
}

/// Ed25519 public key of an issuer, with its thumbprint
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IssuerPublicKey {
    verifying_key: VerifyingKey,
    thumbprint: Thumbprint,
}

impl fmt::Debug for IssuerPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerPublicKey")
            .field("kid", &self.kid())
            .finish()
    }
}

impl IssuerPublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)?;
        Ok(Self {
            verifying_key,
            thumbprint: Thumbprint::of_public_key(bytes),
        })
    }

    /// Create a public key from a public JWK
    pub fn from_jwk(jwk: &PublicJwk) -> Result<Self> {
        if jwk.kty != JWK_KTY || jwk.crv != JWK_CRV {
            return Err(TokenError::CryptoError(format!(
                "Unsupported key type {}/{}",
                jwk.kty, jwk.crv
            )));
        }
        let bytes = decode_key_component(&jwk.x).map_err(TokenError::CryptoError)?;
        Self::from_bytes(&bytes)
    }

    /// Raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Thumbprint of this key
    pub fn thumbprint(&self) -> Thumbprint {
        self.thumbprint
    }

    /// Key id embedded in token headers
    pub fn kid(&self) -> String {
        self.thumbprint.kid()
    }

    /// Verify a detached signature over `message`
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.verifying_key
            .verify_strict(message, signature)
            .map_err(|e| TokenError::SignatureInvalid(e.to_string()))
    }

    /// JWS verification key
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(self.to_bytes()))
            .map_err(TokenError::from)
    }

    /// Export as a public JWK suitable for a JWKS document
    pub fn to_jwk(&self) -> PublicJwk {
        PublicJwk {
            kty: JWK_KTY.to_string(),
            crv: JWK_CRV.to_string(),
            x: URL_SAFE_NO_PAD.encode(self.to_bytes()),
            key_use: Some("sig".to_string()),
            kid: Some(self.kid()),
            alg: Some(JWK_ALG.to_string()),
        }
    }
}

/// Public JSON Web Key as served from the JWKS endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

/// On-disk private key file
#[derive(Serialize, Deserialize)]
struct KeyFile {
    kty: String,
    crv: String,
    x: String,
    d: String,
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        self.d.zeroize();
    }
}

fn decode_key_component(value: &str) -> std::result::Result<[u8; 32], String> {
    let mut bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| format!("invalid base64url: {}", e))?;
    let result: std::result::Result<[u8; 32], _> = bytes.as_slice().try_into();
    let len = bytes.len();
    bytes.zeroize();
    result.map_err(|_| format!("expected 32 bytes, got {}", len))
}

/// Compute the thumbprint of a keypair
pub fn thumbprint(keypair: &SigningKeypair) -> Thumbprint {
    keypair.thumbprint()
}

/// Load the key file at `path`; a missing file is an error
pub fn load(path: &Path) -> std::result::Result<SigningKeypair, KeyLoadError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(KeyLoadError::NotFound(path.to_path_buf()))
        }
        Err(e) => {
            return Err(KeyLoadError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    parse_key_file(path, &contents)
}

/// Load the key file at `path`, generating and persisting a new key if absent
///
/// Corrupt content is never replaced: it fails with [`KeyLoadError::Corrupt`].
pub fn load_or_generate(path: &Path) -> std::result::Result<SigningKeypair, KeyLoadError> {
    match load(path) {
        Ok(keypair) => {
            info!(kid = %keypair.kid(), path = %path.display(), "Loaded issuer signing key");
            Ok(keypair)
        }
        Err(KeyLoadError::NotFound(_)) => {
            let keypair = SigningKeypair::generate();
            persist(&keypair, path)?;
            warn!(
                kid = %keypair.kid(),
                path = %path.display(),
                "No issuer key found, generated a new signing key"
            );
            Ok(keypair)
        }
        Err(e) => Err(e),
    }
}

/// Write the keypair to `path` atomically (temp file + fsync + rename)
pub fn persist(keypair: &SigningKeypair, path: &Path) -> std::result::Result<(), KeyLoadError> {
    let persist_err = |reason: String| KeyLoadError::Persist {
        path: path.to_path_buf(),
        reason,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| persist_err(e.to_string()))?;

    let mut json =
        serde_json::to_string(&keypair.to_key_file()).map_err(|e| persist_err(e.to_string()))?;

    // NamedTempFile is created 0600 on Unix and lives on the same filesystem.
    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| persist_err(e.to_string()))?;
    let written = tmp
        .write_all(json.as_bytes())
        .and_then(|_| tmp.flush())
        .and_then(|_| tmp.as_file().sync_all());
    json.zeroize();
    written.map_err(|e| persist_err(e.to_string()))?;

    tmp.persist(path).map_err(|e| persist_err(e.error.to_string()))?;
    Ok(())
}

fn parse_key_file(path: &Path, contents: &str) -> std::result::Result<SigningKeypair, KeyLoadError> {
    let corrupt = |reason: String| KeyLoadError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let file: KeyFile = serde_json::from_str(contents).map_err(|e| corrupt(e.to_string()))?;

    if file.kty != JWK_KTY || file.crv != JWK_CRV {
        return Err(corrupt(format!(
            "unsupported key type {}/{}, expected {}/{}",
            file.kty, file.crv, JWK_KTY, JWK_CRV
        )));
    }

    let mut secret = decode_key_component(&file.d).map_err(|e| corrupt(format!("d: {}", e)))?;
    let public = decode_key_component(&file.x).map_err(|e| corrupt(format!("x: {}", e)))?;

    let keypair = SigningKeypair::from_secret_bytes(&secret);
    secret.zeroize();

    if keypair.public_key().to_bytes() != public {
        return Err(corrupt("public component does not match private key".into()));
    }

    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbprint_is_deterministic() {
        let kp = SigningKeypair::generate();
        let restored = SigningKeypair::from_secret_bytes(&kp.signing_key.to_bytes());

        assert_eq!(kp.thumbprint(), restored.thumbprint());
        assert_eq!(thumbprint(&kp), kp.public_key().thumbprint());
    }

    #[test]
    fn test_thumbprint_matches_rfc7638_input() {
        let kp = SigningKeypair::generate();
        let x = URL_SAFE_NO_PAD.encode(kp.public_key().to_bytes());
        let expected = sha256(format!(r#"{{"crv":"Ed25519","kty":"OKP","x":"{}"}}"#, x).as_bytes());

        assert_eq!(kp.thumbprint().as_bytes(), &expected);
    }

    #[test]
    fn test_kid_is_thumbprint_prefix() {
        let kp = SigningKeypair::generate();
        assert_eq!(kp.kid().len(), KID_HEX_LEN);
        assert!(kp.thumbprint().to_hex().starts_with(&kp.kid()));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let kp = SigningKeypair::generate();
        let debug = format!("{:?}", kp);
        let secret = URL_SAFE_NO_PAD.encode(kp.signing_key.to_bytes());

        assert!(debug.contains("[redacted]"));
        assert!(!debug.contains(&secret));
    }

    #[test]
    fn test_load_or_generate_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issuer.jwk");

        let first = load_or_generate(&path).unwrap();
        assert!(path.exists());

        let second = load_or_generate(&path).unwrap();
        assert_eq!(first.thumbprint(), second.thumbprint());
    }

    #[test]
    fn test_key_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issuer.jwk");
        let kp = load_or_generate(&path).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["kty"], "OKP");
        assert_eq!(raw["crv"], "Ed25519");
        assert_eq!(raw["x"], URL_SAFE_NO_PAD.encode(kp.public_key().to_bytes()));
        assert!(!raw["d"].as_str().unwrap().contains('='));
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = load(&dir.path().join("absent.jwk"));
        assert!(matches!(result, Err(KeyLoadError::NotFound(_))));
    }

    #[test]
    fn test_corrupt_file_is_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issuer.jwk");
        fs::write(&path, "{not json").unwrap();

        let result = load_or_generate(&path);
        assert!(matches!(result, Err(KeyLoadError::Corrupt { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn test_mismatched_public_component_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issuer.jwk");
        let kp = SigningKeypair::generate();
        let other = SigningKeypair::generate();

        let body = serde_json::json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(other.public_key().to_bytes()),
            "d": URL_SAFE_NO_PAD.encode(kp.signing_key.to_bytes()),
        });
        fs::write(&path, body.to_string()).unwrap();

        assert!(matches!(load(&path), Err(KeyLoadError::Corrupt { .. })));
    }

    #[test]
    fn test_wrong_curve_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issuer.jwk");
        fs::write(&path, r#"{"kty":"EC","crv":"P-256","x":"AA","d":"AA"}"#).unwrap();

        assert!(matches!(load(&path), Err(KeyLoadError::Corrupt { .. })));
    }

    #[test]
    fn test_public_jwk_roundtrip() {
        let kp = SigningKeypair::generate();
        let jwk = kp.public_key().to_jwk();

        assert_eq!(jwk.kid.as_deref(), Some(kp.kid().as_str()));
        assert_eq!(jwk.alg.as_deref(), Some("EdDSA"));

        let restored = IssuerPublicKey::from_jwk(&jwk).unwrap();
        assert_eq!(restored, kp.public_key());
    }

    #[test]
    fn test_thumbprint_serde_as_hex() {
        let kp = SigningKeypair::generate();
        let json = serde_json::to_string(&kp.thumbprint()).unwrap();
        assert_eq!(json, format!("\"{}\"", kp.thumbprint().to_hex()));

        let back: Thumbprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kp.thumbprint());
    }
}

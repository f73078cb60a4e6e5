//! Integration Tests for the Issuer Service
//!
//! These tests drive the assembled service the way a deployment does:
//! - mint, verify and expire tokens under a manual clock
//! - revoke by token, device and generation
//! - trust anchor pinning, outages and key rotation
//! - the HTTP API end to end

use std::sync::Arc;
use std::time::Duration;

use agetoken_anchor::{MemoryAnchor, PublisherIdentity, RetryPolicy};
use agetoken_core::{DeviceBinding, ManualClock, SigningKeypair, TokenHash};
use agetoken_issuer::core::{
    AnchorFailurePolicy, AnchorLink, ErrorKind, IssueError, LegacyToken, Rejection, RevocationCause,
    TokenFormat,
};
use agetoken_issuer::{create_router, AppState, FileStore, IssuerConfig, KeyStore, MemoryStore, RevocationStore};

// =============================================================================
// Test Helpers
// =============================================================================

const T0: i64 = 1_700_000_000;
const HOUR: i64 = 3600;

struct Harness {
    state: Arc<AppState>,
    board: Arc<MemoryAnchor>,
    clock: Arc<ManualClock>,
    anchor: AnchorLink,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(IssuerConfig::default()).await
    }

    async fn with_config(config: IssuerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new())).await
    }

    async fn with_store(config: IssuerConfig, store: Arc<dyn RevocationStore>) -> Self {
        let board = Arc::new(MemoryAnchor::new());
        let publisher = PublisherIdentity::generate();
        board.authorize(publisher.address());

        let keys = Arc::new(KeyStore::new(SigningKeypair::generate(), config.key_grace));
        let clock = Arc::new(ManualClock::new(T0));
        let anchor = AnchorLink::new(board.clone(), publisher, Duration::from_millis(500))
            .with_retry(RetryPolicy::none());
        anchor
            .publish_thumbprint(keys.current_thumbprint())
            .await
            .expect("Failed to pin issuer key");

        let state = AppState::build(&config, keys, store, anchor.clone(), clock.clone())
            .await
            .expect("Failed to build service state");

        Self {
            state: Arc::new(state),
            board,
            clock,
            anchor,
        }
    }

    async fn mint(&self, device: &str) -> (String, TokenHash) {
        let minted = self
            .state
            .issuer
            .mint(&DeviceBinding::from_device_public_key(device.as_bytes()))
            .await
            .expect("Failed to mint");
        (minted.token.into_string(), minted.token_hash)
    }

    async fn verify(&self, token: &str) -> Result<agetoken_issuer::core::VerifiedToken, Rejection> {
        self.state.verifier.verify(token).await
    }
}

fn legacy_token(device: &DeviceBinding, iat: i64, exp: i64, generation: u64) -> String {
    LegacyToken {
        device: device.as_str().to_string(),
        age_over: 18,
        iat,
        exp,
        generation,
    }
    .encode()
    .unwrap()
}

// =============================================================================
// Mint / Verify / Expire
// =============================================================================

#[tokio::test]
async fn test_mint_verify_then_expire() {
    let h = Harness::new().await;
    let (token, token_hash) = h.mint("deviceA").await;

    let verified = h.verify(&token).await.unwrap();
    assert_eq!(verified.age_over, 18);
    assert_eq!(verified.format, TokenFormat::Compact);
    assert_eq!(verified.token_hash, token_hash);
    assert_eq!(
        verified.subject,
        DeviceBinding::from_device_public_key(b"deviceA").as_str()
    );
    assert_eq!(verified.expires_at, T0 + 24 * HOUR);

    h.clock.advance(25 * HOUR);
    let rejection = h.verify(&token).await.unwrap_err();
    assert_eq!(rejection.kind(), ErrorKind::Expired);
}

#[tokio::test]
async fn test_expiry_boundary_is_inclusive() {
    let h = Harness::new().await;
    let (token, _) = h.mint("deviceA").await;
    let exp = T0 + 24 * HOUR;

    h.clock.set(exp);
    assert!(h.verify(&token).await.is_ok());

    h.clock.set(exp + 1);
    assert_eq!(
        h.verify(&token).await.unwrap_err(),
        Rejection::Expired { exp, now: exp + 1 }
    );
}

// =============================================================================
// Revocation
// =============================================================================

#[tokio::test]
async fn test_revocation_affects_only_revoked_token() {
    let h = Harness::new().await;
    let (t1, t1_hash) = h.mint("deviceA").await;
    let (t2, _) = h.mint("deviceA").await;

    let outcome = h.state.revocations.revoke(t1_hash, "reported stolen").await.unwrap();
    assert!(outcome.published());

    assert_eq!(
        h.verify(&t1).await.unwrap_err(),
        Rejection::Revoked(RevocationCause::Token)
    );
    assert!(h.verify(&t2).await.is_ok());
    assert_eq!(h.board.snapshot().revocation_root, h.state.revocations.root());
}

#[tokio::test]
async fn test_generation_bump_revokes_older_tokens() {
    let h = Harness::new().await;
    let (old, _) = h.mint("deviceA").await;

    let (before, after) = h.state.generation.bump("key compromise drill").await.unwrap();
    assert_eq!((before, after), (0, 1));
    let (new, _) = h.mint("deviceA").await;

    assert_eq!(
        h.verify(&old).await.unwrap_err(),
        Rejection::Revoked(RevocationCause::Generation {
            token_generation: 0,
            current_generation: 1,
        })
    );
    assert_eq!(h.verify(&new).await.unwrap().generation, 1);
}

#[tokio::test]
async fn test_device_revocation() {
    let h = Harness::new().await;
    let device = DeviceBinding::from_device_public_key(b"lost-phone");
    let (token, _) = h.mint("lost-phone").await;
    let (other, _) = h.mint("deviceB").await;

    assert!(h.state.revocations.revoke_device(device.clone(), "lost").await.unwrap());

    assert_eq!(
        h.verify(&token).await.unwrap_err(),
        Rejection::Revoked(RevocationCause::Device)
    );
    assert!(h.verify(&other).await.is_ok());
    assert!(matches!(
        h.state.issuer.mint(&device).await,
        Err(IssueError::DeviceRevoked(_))
    ));
}

#[tokio::test]
async fn test_revocations_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("revocations.jsonl");

    let (token_hash, root) = {
        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let h = Harness::with_store(IssuerConfig::default(), store).await;
        let (_, token_hash) = h.mint("deviceA").await;
        h.state.revocations.revoke(token_hash, "test").await.unwrap();
        h.state.generation.bump("test").await.unwrap();
        (token_hash, h.state.revocations.root())
    };

    let store = Arc::new(FileStore::open(&path).await.unwrap());
    let h = Harness::with_store(IssuerConfig::default(), store).await;
    assert!(h.state.revocations.is_revoked(&token_hash));
    assert_eq!(h.state.revocations.root(), root);
    assert_eq!(h.state.generation.current(), 1);
}

// =============================================================================
// Trust Anchor
// =============================================================================

#[tokio::test]
async fn test_trust_mismatch_rejects_every_token() {
    let h = Harness::new().await;
    let (token, _) = h.mint("deviceA").await;

    let foreign = SigningKeypair::generate().thumbprint();
    h.anchor.publish_thumbprint(foreign).await.unwrap();

    for candidate in [token.as_str(), "garbage", ""] {
        match h.verify(candidate).await {
            Err(Rejection::TrustIntegrityFailure { expected, anchored }) => {
                assert_eq!(expected, h.state.keys.current_thumbprint());
                assert_eq!(anchored, Some(foreign));
            }
            other => panic!("expected TrustIntegrityFailure, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_anchor_outage_fails_closed_by_default() {
    let h = Harness::new().await;
    let (token, _) = h.mint("deviceA").await;
    h.board.set_available(false);

    assert_eq!(h.verify(&token).await.unwrap_err().kind(), ErrorKind::AnchorUnreachable);
}

#[tokio::test]
async fn test_anchor_outage_fail_open_continues() {
    let h = Harness::with_config(IssuerConfig {
        anchor_failure_policy: AnchorFailurePolicy::FailOpen,
        ..IssuerConfig::default()
    })
    .await;
    let (token, token_hash) = h.mint("deviceA").await;
    h.board.set_available(false);

    assert!(h.verify(&token).await.is_ok());

    // Other checks still apply
    h.state.revocations.revoke(token_hash, "stolen").await.unwrap();
    assert_eq!(h.verify(&token).await.unwrap_err().kind(), ErrorKind::Revoked);
}

#[tokio::test]
async fn test_minting_ignores_anchor_outage() {
    let h = Harness::new().await;
    h.board.set_available(false);

    assert!(h
        .state
        .issuer
        .mint(&DeviceBinding::from_device_public_key(b"deviceA"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_rotation_grace_window() {
    let h = Harness::with_config(IssuerConfig {
        key_grace: Duration::from_secs(HOUR as u64),
        ..IssuerConfig::default()
    })
    .await;
    let (old_token, _) = h.mint("deviceA").await;

    h.state.keys.rotate(SigningKeypair::generate(), T0);

    // The anchor still pins the old key until the new one is published
    assert_eq!(
        h.verify(&old_token).await.unwrap_err().kind(),
        ErrorKind::TrustIntegrityFailure
    );
    h.anchor
        .publish_thumbprint(h.state.keys.current_thumbprint())
        .await
        .unwrap();

    let (new_token, _) = h.mint("deviceA").await;
    assert!(h.verify(&old_token).await.is_ok());
    assert!(h.verify(&new_token).await.is_ok());

    h.clock.advance(HOUR);
    assert_eq!(
        h.verify(&old_token).await.unwrap_err().kind(),
        ErrorKind::SignatureInvalid
    );
    assert!(h.verify(&new_token).await.is_ok());
}

// =============================================================================
// Legacy Format
// =============================================================================

#[tokio::test]
async fn test_legacy_tokens_rejected_by_default() {
    let h = Harness::new().await;
    let device = DeviceBinding::from_device_public_key(b"deviceA");
    let token = legacy_token(&device, T0, T0 + HOUR, 0);

    assert_eq!(h.verify(&token).await.unwrap_err().kind(), ErrorKind::Malformed);
}

#[tokio::test]
async fn test_legacy_tokens_when_enabled() {
    let h = Harness::with_config(IssuerConfig {
        accept_legacy: true,
        ..IssuerConfig::default()
    })
    .await;
    let device = DeviceBinding::from_device_public_key(b"deviceA");

    let current = legacy_token(&device, T0, T0 + HOUR, 0);
    let verified = h.verify(&current).await.unwrap();
    assert_eq!(verified.format, TokenFormat::Legacy);
    assert!(verified.claims.is_none());

    let expired = legacy_token(&device, T0 - 2 * HOUR, T0 - HOUR, 0);
    assert_eq!(h.verify(&expired).await.unwrap_err().kind(), ErrorKind::Expired);

    h.state.generation.bump("retire legacy").await.unwrap();
    assert!(matches!(
        h.verify(&current).await.unwrap_err(),
        Rejection::Revoked(RevocationCause::Generation { .. })
    ));

    // Compact tokens still verify alongside
    let (compact, _) = h.mint("deviceA").await;
    assert!(h.verify(&compact).await.is_ok());
}

// =============================================================================
// HTTP API
// =============================================================================

async fn spawn_server(state: Arc<AppState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_mint_verify_revoke() {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::{json, Value};

    let h = Harness::new().await;
    let base = spawn_server(Arc::clone(&h.state)).await;
    let client = reqwest::Client::new();

    let minted: Value = client
        .post(format!("{}/v1/tokens/mint", base))
        .json(&json!({ "device_public_key": STANDARD.encode(b"deviceA") }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = minted["token"].as_str().unwrap().to_string();
    let token_hash = minted["token_hash"].as_str().unwrap().to_string();
    assert_eq!(token_hash, TokenHash::of_token(&token).to_hex());

    let resp = client
        .post(format!("{}/v1/tokens/verify", base))
        .json(&json!({ "token": token }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["valid"], true);
    assert_eq!(body["claims"]["age_over"], 18);

    let revoked: Value = client
        .post(format!("{}/v1/revocations", base))
        .json(&json!({ "token_hash": token_hash, "reason": "stolen" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(revoked["revoked"], true);
    assert_eq!(revoked["newly_revoked"], true);
    assert_eq!(revoked["published"], true);
    assert_eq!(revoked["total_revoked"], 1);

    let resp = client
        .post(format!("{}/v1/tokens/verify", base))
        .json(&json!({ "token": token }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["valid"], false);
    assert_eq!(body["error"]["kind"], "Revoked");

    let status: Value = client
        .get(format!("{}/v1/revocations/{}", base, token_hash))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["is_revoked"], true);
    assert_eq!(status["reason"], "stolen");

    let root: Value = client
        .get(format!("{}/v1/revocations/root", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["in_sync"], true);
    assert_eq!(root["root"], revoked["merkle_root"]);

    let proof: agetoken_core::MerkleProof = {
        let body: Value = client
            .get(format!("{}/v1/revocations/{}/proof", base, token_hash))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        serde_json::from_value(body["proof"].clone()).unwrap()
    };
    assert!(proof.verify(&h.state.revocations.root()));
}

#[tokio::test]
async fn test_http_error_statuses() {
    use serde_json::{json, Value};

    let h = Harness::new().await;
    let base = spawn_server(Arc::clone(&h.state)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/v1/tokens/verify", base))
        .json(&json!({ "token": "not-a-token" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "Malformed");

    let resp = client
        .post(format!("{}/v1/tokens/mint", base))
        .json(&json!({ "device_public_key": "%%%" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "BAD_REQUEST");

    let resp = client
        .get(format!("{}/v1/revocations/{}/proof", base, "00".repeat(32)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    h.board.set_available(false);
    let resp = client
        .post(format!("{}/v1/tokens/verify", base))
        .json(&json!({ "token": "not-a-token" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["valid"], false);
    assert_eq!(body["error"]["kind"], "AnchorUnreachable");

    let resp = client
        .post(format!("{}/v1/issuer/thumbprint/publish", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn test_http_keys_generation_and_info() {
    use serde_json::{json, Value};

    let h = Harness::new().await;
    let base = spawn_server(Arc::clone(&h.state)).await;
    let client = reqwest::Client::new();

    let jwks: Value = client
        .get(format!("{}/.well-known/jwks.json", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jwks["keys"][0]["kid"], h.state.keys.current_kid());
    assert_eq!(jwks["keys"][0]["crv"], "Ed25519");

    let info: Value = client
        .get(format!("{}/v1/issuer/info", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["trust_anchor_status"], "verified");
    assert_eq!(info["thumbprint"], h.state.keys.current_thumbprint().to_hex());
    assert_eq!(info["anchored_thumbprint"], info["thumbprint"]);

    let bumped: Value = client
        .post(format!("{}/v1/generation/bump", base))
        .json(&json!({ "reason": "incident" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bumped["old_generation"], 0);
    assert_eq!(bumped["new_generation"], 1);

    let current: Value = client
        .get(format!("{}/v1/generation", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["current_generation"], 1);

    let device = DeviceBinding::from_device_public_key(b"deviceA");
    let revoked: Value = client
        .post(format!("{}/v1/revocations/device", base))
        .json(&json!({ "device_id": device.as_str(), "reason": "lost" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(revoked["newly_revoked"], true);
    assert!(h.state.revocations.is_device_revoked(&device));

    let ready: Value = client
        .get(format!("{}/ready", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["generation"], 1);
}

#[tokio::test]
async fn test_http_publish_leaves_foreign_pin() {
    use serde_json::Value;

    let h = Harness::new().await;
    let base = spawn_server(Arc::clone(&h.state)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/v1/issuer/thumbprint/publish", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["published"], false);

    let foreign = SigningKeypair::generate().thumbprint();
    h.anchor.publish_thumbprint(foreign).await.unwrap();
    let sequence = h.board.snapshot().sequence;

    let resp = client
        .post(format!("{}/v1/issuer/thumbprint/publish", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(h.board.snapshot().thumbprint, Some(foreign));
    assert_eq!(h.board.snapshot().sequence, sequence);

    // Rotation is refused too
    let resp = client
        .post(format!("{}/v1/issuer/keys/rotate", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    assert_eq!(h.board.snapshot().thumbprint, Some(foreign));
}

#[tokio::test]
async fn test_http_key_rotation() {
    use serde_json::Value;

    let h = Harness::with_config(IssuerConfig {
        key_grace: Duration::from_secs(HOUR as u64),
        ..IssuerConfig::default()
    })
    .await;
    let base = spawn_server(Arc::clone(&h.state)).await;
    let client = reqwest::Client::new();
    let old_kid = h.state.keys.current_kid();
    let (old_token, _) = h.mint("deviceA").await;

    let resp = client
        .post(format!("{}/v1/issuer/keys/rotate", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["published"], true);
    assert_eq!(body["kid"], h.state.keys.current_kid());
    assert_ne!(h.state.keys.current_kid(), old_kid);
    assert_eq!(h.board.snapshot().thumbprint, Some(h.state.keys.current_thumbprint()));

    let (new_token, _) = h.mint("deviceA").await;
    assert!(h.verify(&old_token).await.is_ok());
    assert!(h.verify(&new_token).await.is_ok());

    let jwks: Value = client
        .get(format!("{}/.well-known/jwks.json", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jwks["keys"].as_array().unwrap().len(), 2);
}

//! Attack Scenario Tests
//!
//! Each test plays an adversary against the assembled verifier: forged or
//! tampered tokens, key confusion, and attempts to subvert the trust
//! anchor. Every attack must end in a rejection of the documented kind,
//! and legitimate tokens must keep verifying afterwards.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{json, Value};

use agetoken_anchor::{AnchorError, MemoryAnchor, PublisherIdentity, RetryPolicy, StateUpdate, TrustAnchor};
use agetoken_core::{token, ClaimsBuilder, DeviceBinding, ManualClock, SigningKeypair};
use agetoken_issuer::core::{AnchorLink, ErrorKind, LegacyToken, Rejection, RevocationCause};
use agetoken_issuer::{AppState, IssuerConfig, KeyStore, MemoryStore};

// =============================================================================
// Test Helpers
// =============================================================================

const T0: i64 = 1_700_000_000;

struct Target {
    state: AppState,
    board: Arc<MemoryAnchor>,
    publisher: PublisherIdentity,
}

async fn target() -> Target {
    let board = Arc::new(MemoryAnchor::new());
    let publisher = PublisherIdentity::generate();
    board.authorize(publisher.address());

    let config = IssuerConfig::default();
    let keys = Arc::new(KeyStore::new(SigningKeypair::generate(), config.key_grace));
    let anchor = AnchorLink::new(board.clone(), publisher.clone(), Duration::from_millis(500))
        .with_retry(RetryPolicy::none());
    anchor.publish_thumbprint(keys.current_thumbprint()).await.unwrap();

    let state = AppState::build(
        &config,
        keys,
        Arc::new(MemoryStore::new()),
        anchor,
        Arc::new(ManualClock::new(T0)),
    )
    .await
    .unwrap();

    Target {
        state,
        board,
        publisher,
    }
}

async fn mint(target: &Target, device: &str) -> String {
    target
        .state
        .issuer
        .mint(&DeviceBinding::from_device_public_key(device.as_bytes()))
        .await
        .unwrap()
        .token
        .into_string()
}

fn valid_claims() -> Value {
    let claims = ClaimsBuilder::new()
        .issuer("age-token-issuer")
        .audience("age-gated-sites")
        .subject(DeviceBinding::from_device_public_key(b"attacker-device"))
        .age_over(21)
        .issued_at(T0)
        .lifetime_secs(3600)
        .build()
        .unwrap();
    serde_json::to_value(claims).unwrap()
}

/// Assemble a compact token from raw JSON, signed by `signer`
fn forge(header: &Value, payload: &Value, signer: &SigningKeypair) -> String {
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string())
    );
    let signature = signer.sign(signing_input.as_bytes());
    format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

fn segments(token: &str) -> Vec<String> {
    token.split('.').map(str::to_string).collect()
}

async fn rejection_kind(target: &Target, token: &str) -> ErrorKind {
    target.state.verifier.verify(token).await.unwrap_err().kind()
}

// =============================================================================
// Token Forgery
// =============================================================================

/// Attack: sign a token with a foreign key but claim the issuer's kid
#[tokio::test]
async fn attack_foreign_key_with_issuer_kid_prevented() {
    let target = target().await;
    let attacker = SigningKeypair::generate();

    let header = json!({ "alg": "EdDSA", "typ": "JWT", "kid": target.state.keys.current_kid() });
    let forged = forge(&header, &valid_claims(), &attacker);

    assert_eq!(rejection_kind(&target, &forged).await, ErrorKind::SignatureInvalid);
}

/// Attack: self-issue a well-formed token under the attacker's own key
#[tokio::test]
async fn attack_self_signed_token_prevented() {
    let target = target().await;
    let attacker = SigningKeypair::generate();
    let claims = serde_json::from_value(valid_claims()).unwrap();
    let forged = token::encode(&claims, &attacker).unwrap();

    assert_eq!(
        rejection_kind(&target, forged.as_str()).await,
        ErrorKind::SignatureInvalid
    );
}

/// Attack: strip the signature and declare `alg: none`
#[tokio::test]
async fn attack_alg_none_prevented() {
    let target = target().await;
    let header = json!({ "alg": "none", "kid": target.state.keys.current_kid() });
    let unsigned = format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(valid_claims().to_string())
    );
    assert_eq!(rejection_kind(&target, &unsigned).await, ErrorKind::Malformed);

    let with_junk_signature = format!("{}AAAA", unsigned);
    assert_eq!(
        rejection_kind(&target, &with_junk_signature).await,
        ErrorKind::Malformed
    );
}

/// Attack: mark an extension critical hoping the verifier ignores it
#[tokio::test]
async fn attack_critical_header_extension_prevented() {
    let target = target().await;
    let issuer_key = target.state.keys.signing_key();
    let header = json!({
        "alg": "EdDSA",
        "kid": issuer_key.kid(),
        "crit": ["exp-override"],
    });
    let token = forge(&header, &valid_claims(), &issuer_key);

    assert_eq!(rejection_kind(&target, &token).await, ErrorKind::Malformed);
}

// =============================================================================
// Token Tampering
// =============================================================================

/// Attack: raise age_over in a genuine token's payload
#[tokio::test]
async fn attack_age_upgrade_prevented() {
    let target = target().await;
    let genuine = mint(&target, "deviceA").await;
    let parts = segments(&genuine);

    let mut payload: Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&parts[1]).unwrap()).unwrap();
    payload["age_over"] = json!(21);
    let tampered = format!(
        "{}.{}.{}",
        parts[0],
        URL_SAFE_NO_PAD.encode(payload.to_string()),
        parts[2]
    );

    assert_eq!(rejection_kind(&target, &tampered).await, ErrorKind::SignatureInvalid);
    assert!(target.state.verifier.verify(&genuine).await.is_ok());
}

/// Attack: graft one device's payload onto another token's signature
#[tokio::test]
async fn attack_signature_transplant_prevented() {
    let target = target().await;
    let a = segments(&mint(&target, "deviceA").await);
    let b = segments(&mint(&target, "deviceB").await);

    let grafted = format!("{}.{}.{}", a[0], b[1], a[2]);
    assert_eq!(rejection_kind(&target, &grafted).await, ErrorKind::SignatureInvalid);
}

/// Attack: extend the lifetime of a genuine token
#[tokio::test]
async fn attack_lifetime_extension_prevented() {
    let target = target().await;
    let parts = segments(&mint(&target, "deviceA").await);

    let mut payload: Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&parts[1]).unwrap()).unwrap();
    payload["exp"] = json!(T0 + 365 * 24 * 3600);
    let tampered = format!(
        "{}.{}.{}",
        parts[0],
        URL_SAFE_NO_PAD.encode(payload.to_string()),
        parts[2]
    );

    assert_eq!(rejection_kind(&target, &tampered).await, ErrorKind::SignatureInvalid);
}

/// Attack: present a token signed by the issuer key for another audience
#[tokio::test]
async fn attack_cross_audience_token_prevented() {
    let target = target().await;
    let issuer_key = target.state.keys.signing_key();

    let mut claims = valid_claims();
    claims["aud"] = json!("another-ecosystem");
    let header = json!({ "alg": "EdDSA", "typ": "JWT", "kid": issuer_key.kid() });
    let token = forge(&header, &claims, &issuer_key);

    assert_eq!(rejection_kind(&target, &token).await, ErrorKind::Malformed);
}

/// Attack: smuggle an unknown claim past the verifier
#[tokio::test]
async fn attack_smuggled_claim_prevented() {
    let target = target().await;
    let issuer_key = target.state.keys.signing_key();

    let mut claims = valid_claims();
    claims["admin"] = json!(true);
    let header = json!({ "alg": "EdDSA", "typ": "JWT", "kid": issuer_key.kid() });
    let token = forge(&header, &claims, &issuer_key);

    assert_eq!(rejection_kind(&target, &token).await, ErrorKind::Malformed);
}

/// Attack: oversized input meant to exhaust the verifier
#[tokio::test]
async fn attack_oversized_token_prevented() {
    let target = target().await;
    let huge = format!("{}.{}.{}", "a".repeat(4096), "b".repeat(4096), "c".repeat(4096));

    assert_eq!(rejection_kind(&target, &huge).await, ErrorKind::Malformed);
}

// =============================================================================
// Revocation Evasion
// =============================================================================

/// Attack: mutate a revoked token so its hash no longer matches
#[tokio::test]
async fn attack_revoked_token_mutation_prevented() {
    let target = target().await;
    let revoked = mint(&target, "deviceA").await;
    target
        .state
        .revocations
        .revoke(agetoken_core::TokenHash::of_token(&revoked), "stolen")
        .await
        .unwrap();

    for mutated in [
        format!("{} ", revoked),
        format!("{}=", revoked),
        format!(" {}", revoked),
        format!("{}.", revoked),
    ] {
        assert!(
            target.state.verifier.verify(&mutated).await.is_err(),
            "mutated token accepted: {:?}",
            mutated
        );
    }
}

/// Attack: replay a token minted before a generation bump
#[tokio::test]
async fn attack_pre_bump_token_replay_prevented() {
    let target = target().await;
    let old = mint(&target, "deviceA").await;
    target.state.generation.bump("suspected leak").await.unwrap();

    assert!(matches!(
        target.state.verifier.verify(&old).await,
        Err(Rejection::Revoked(RevocationCause::Generation { .. }))
    ));
}

/// Attack: hand-craft an unsigned legacy token while legacy support is off
#[tokio::test]
async fn attack_legacy_forgery_prevented() {
    let target = target().await;
    let forged = LegacyToken {
        device: DeviceBinding::from_device_public_key(b"attacker-device")
            .as_str()
            .to_string(),
        age_over: 21,
        iat: T0,
        exp: T0 + 3600,
        generation: 0,
    }
    .encode()
    .unwrap();

    assert_eq!(rejection_kind(&target, &forged).await, ErrorKind::Malformed);
}

// =============================================================================
// Trust Anchor Subversion
// =============================================================================

/// Attack: an unauthorized publisher pins its own key
#[tokio::test]
async fn attack_unauthorized_repin_prevented() {
    let target = target().await;
    let genuine = mint(&target, "deviceA").await;
    let attacker = PublisherIdentity::generate();
    let attacker_key = SigningKeypair::generate();

    let result = target
        .board
        .publish_thumbprint(attacker_key.thumbprint(), &attacker)
        .await;
    assert!(matches!(result, Err(AnchorError::PublishRejected(_))));

    assert_eq!(
        target.board.snapshot().thumbprint,
        Some(target.state.keys.current_thumbprint())
    );
    assert!(target.state.verifier.verify(&genuine).await.is_ok());
}

/// Attack: replay a previously accepted transition
#[tokio::test]
async fn attack_replayed_transition_prevented() {
    let target = target().await;
    let old_root = target.board.snapshot().revocation_root;
    let transition = target.publisher.sign(StateUpdate::RevocationRoot(old_root));
    target.board.submit(transition.clone()).await.unwrap();

    let genuine = mint(&target, "deviceA").await;
    target
        .state
        .revocations
        .revoke(agetoken_core::TokenHash::of_token(&genuine), "stolen")
        .await
        .unwrap();

    // Rolling the root back would hide the revocation
    let result = target.board.submit(transition).await;
    assert!(matches!(result, Err(AnchorError::PublishRejected(_))));
    assert_eq!(
        target.board.snapshot().revocation_root,
        target.state.revocations.root()
    );
}

/// Attack: alter a signed transition in flight
#[tokio::test]
async fn attack_tampered_transition_prevented() {
    let target = target().await;
    let mut transition = target
        .publisher
        .sign(StateUpdate::Thumbprint(target.state.keys.current_thumbprint()));
    transition.update = StateUpdate::Thumbprint(SigningKeypair::generate().thumbprint());

    let result = target.board.submit(transition).await;
    assert!(matches!(result, Err(AnchorError::PublishRejected(_))));
    assert_eq!(
        target.board.snapshot().thumbprint,
        Some(target.state.keys.current_thumbprint())
    );
}

/// Attack: a compromised but authorized publisher re-pins the anchor
///
/// The anchor accepts the write; the verifier must then refuse every token
/// rather than trust a key the anchor no longer vouches for.
#[tokio::test]
async fn attack_anchor_repin_detected() {
    let target = target().await;
    let genuine = mint(&target, "deviceA").await;

    let insider = PublisherIdentity::generate();
    target.board.authorize(insider.address());
    target
        .board
        .publish_thumbprint(SigningKeypair::generate().thumbprint(), &insider)
        .await
        .unwrap();

    assert_eq!(
        rejection_kind(&target, &genuine).await,
        ErrorKind::TrustIntegrityFailure
    );
    assert!(target
        .state
        .issuer
        .mint(&DeviceBinding::from_device_public_key(b"deviceB"))
        .await
        .is_ok());
}

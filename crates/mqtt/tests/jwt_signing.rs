use std::{path::PathBuf, sync::Arc, time::Duration};

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use llapbridge_mqtt::{CredentialManager, JwtSigner, SigningError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Claims {
    iat: i64,
    exp: i64,
    aud: String,
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn manager(key: &str, algorithm: &str) -> CredentialManager {
    CredentialManager::new(
        "blue-jet-123",
        fixture(key),
        algorithm,
        Duration::from_secs(20 * 60),
        Arc::new(JwtSigner),
    )
}

fn decode_unverified(token: &str, algorithm: Algorithm) -> Claims {
    let mut validation = Validation::new(algorithm);
    validation.insecure_disable_signature_validation();
    validation.set_audience(&["blue-jet-123"]);
    jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .unwrap()
        .claims
}

#[test]
fn test_rs256_token_carries_claims() {
    let credential = manager("rsa_private.pem", "RS256").issue().unwrap();

    let header = jsonwebtoken::decode_header(credential.token()).unwrap();
    assert_eq!(header.alg, Algorithm::RS256);

    let claims = decode_unverified(credential.token(), Algorithm::RS256);
    assert_eq!(claims.aud, "blue-jet-123");
    assert_eq!(claims.iat, credential.issued_at().unix_timestamp());
    assert_eq!(claims.exp, credential.expires_at().unix_timestamp());
    assert_eq!(claims.exp - claims.iat, 1200);
}

#[test]
fn test_es256_token_carries_claims() {
    let credential = manager("ec_private.pem", "ES256").issue().unwrap();

    let header = jsonwebtoken::decode_header(credential.token()).unwrap();
    assert_eq!(header.alg, Algorithm::ES256);

    let claims = decode_unverified(credential.token(), Algorithm::ES256);
    assert_eq!(claims.aud, "blue-jet-123");
}

#[test]
fn test_rs256_is_deterministic_for_same_clock() {
    let manager = manager("rsa_private.pem", "RS256");
    let now = time::OffsetDateTime::now_utc();

    let a = manager.issue_at(now).unwrap();
    let b = manager.issue_at(now).unwrap();
    assert_eq!(a.token(), b.token());
}

#[test]
fn test_key_algorithm_mismatch_is_rejected() {
    let err = manager("ec_private.pem", "RS256").issue().unwrap_err();
    assert!(matches!(err, SigningError::InvalidKey(_)));
}
